//! Import orchestrator - runs the stages in dependency order.
//!
//! One stage per [`EntityKind`], strictly sequential, each run to
//! exhaustion before the next starts. Batches are the unit of progress:
//! the state file is saved after every batch and cancellation is only
//! honoured between batches.

use crate::config::Config;
use crate::core::{EntityKind, ExternalId, SourceAdapter, TargetCreator};
use crate::error::{ImportError, MigrateError, Result};
use crate::importer::{BatchImporter, BatchOutcome};
use crate::mapper::EntityMapper;
use crate::registry::{backend_from_config, IdentifierRegistry, MemoryBackend, RegistryBackend};
use crate::source::{source_from_config, CursorReader};
use crate::state::{ImportState, KindState, RunStatus, StageStatus};
use crate::target::{DryRunTarget, HttpTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Import orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceAdapter>,
    target: Arc<dyn TargetCreator>,
    registry_backend: Arc<dyn RegistryBackend>,
    state_file: Option<PathBuf>,
    state: Option<ImportState>,
    error_log: Option<PathBuf>,
    dry_run: bool,
    progress: bool,
    progress_tx: Option<mpsc::Sender<ProgressUpdate>>,
}

/// Progress after one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub kind: EntityKind,
    /// Rows processed so far in this stage.
    pub processed: u64,
    /// Rows the source reported for this stage.
    pub total: u64,
    pub created: u64,
    pub failed: u64,
    pub batches: u64,
}

/// Per-kind line of an [`ImportResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindSummary {
    pub kind: EntityKind,
    pub status: StageStatus,
    pub total: u64,
    pub created: u64,
    pub already_imported: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Result of an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    /// Unique run identifier.
    pub run_id: String,

    /// Final status.
    pub status: String,

    /// Nothing was created in the target.
    pub dry_run: bool,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    pub kinds: Vec<KindSummary>,

    pub rows_created: u64,

    pub rows_already_imported: u64,

    pub rows_skipped: u64,

    pub rows_failed: u64,

    /// Row-level errors of this run, in the order they occurred.
    pub errors: Vec<ImportError>,
}

/// Source rows vs. registered mappings for one kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KindCount {
    pub kind: EntityKind,
    pub enabled: bool,
    /// `None` for kinds that are not read from the source.
    pub source_rows: Option<u64>,
    pub mapped: usize,
}

impl Orchestrator {
    /// Create an orchestrator with the collaborators named in the config.
    pub async fn new(config: Config) -> Result<Self> {
        let source = source_from_config(&config.source).await?;
        let target = Arc::new(HttpTarget::new(&config.target)?);
        let registry_backend = backend_from_config(&config.registry).await?;
        Ok(Self::with_collaborators(config, source, target, registry_backend))
    }

    /// Create an orchestrator that creates nothing.
    ///
    /// Existing mappings are read from the configured registry into memory,
    /// so the run reports what a real run would create; nothing is written
    /// back.
    pub async fn dry_run(config: Config) -> Result<Self> {
        let source = source_from_config(&config.source).await?;
        let existing = backend_from_config(&config.registry)
            .await?
            .load_all()
            .await?;
        info!(
            "Dry run: {} existing mappings loaded into memory",
            existing.len()
        );
        let mut orchestrator = Self::with_collaborators(
            config,
            source,
            Arc::new(DryRunTarget::new()),
            Arc::new(MemoryBackend::seeded(existing)),
        );
        orchestrator.dry_run = true;
        Ok(orchestrator)
    }

    /// Create an orchestrator around explicit collaborators.
    pub fn with_collaborators(
        config: Config,
        source: Arc<dyn SourceAdapter>,
        target: Arc<dyn TargetCreator>,
        registry_backend: Arc<dyn RegistryBackend>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            registry_backend,
            state_file: None,
            state: None,
            error_log: None,
            dry_run: false,
            progress: false,
            progress_tx: None,
        }
    }

    /// Set the state file path for resume capability.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Write the run's row errors to this file as JSON lines.
    pub fn with_error_log(mut self, path: PathBuf) -> Self {
        self.error_log = Some(path);
        self
    }

    /// Print a JSON progress line to stderr after every batch.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Send a progress update after every batch.
    pub fn with_progress_channel(mut self, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Load existing state for resume.
    pub fn resume(mut self) -> Result<Self> {
        let path = self.state_file.as_ref().ok_or_else(|| {
            MigrateError::Config("resume requires a state file".into())
        })?;
        if path.exists() {
            let state = ImportState::load(path)?;
            state.validate_config(&self.config.hash())?;
            info!("Resuming run {} from state file: {:?}", state.run_id, path);
            self.state = Some(state);
        } else {
            warn!("State file {:?} not found, starting a new run", path);
        }
        Ok(self)
    }

    /// Run the import.
    pub async fn run(mut self, cancel: Option<CancellationToken>) -> Result<ImportResult> {
        let started_at = Utc::now();
        let cancel = cancel.unwrap_or_default();

        let mut state = self.state.take().unwrap_or_else(|| {
            ImportState::new(uuid::Uuid::new_v4().to_string(), self.config.hash())
        });
        state.status = RunStatus::Running;
        state.completed_at = None;

        info!(
            "Starting import run {} (source: {}, target: {}, batch size: {})",
            state.run_id,
            self.source.source_type(),
            self.target.target_type(),
            self.config.import.batch_size
        );
        self.log_source_settings().await;

        let mut registry =
            IdentifierRegistry::open(self.registry_backend.clone(), &self.config.import.id_prefix)
                .await?;
        let importer = BatchImporter::new(self.target.clone());
        let reader = CursorReader::new(self.source.clone(), self.config.import.batch_size);
        let mut errors = Vec::new();

        let run_result = self
            .run_stages(&mut state, &mut registry, &importer, &reader, &cancel, &mut errors)
            .await;

        let status = match &run_result {
            Ok(()) => {
                state.mark_completed();
                "completed"
            }
            Err(MigrateError::Cancelled) => {
                state.mark_cancelled();
                "cancelled"
            }
            Err(e) => {
                error!("Import aborted: {}", e);
                state.mark_failed();
                "failed"
            }
        };
        self.save_state(&mut state)?;
        self.write_error_log(&errors)?;

        let completed_at = Utc::now();
        let result = build_result(&state, status, self.dry_run, started_at, completed_at, errors);

        log_error_summary(&result.errors);
        info!(
            "Import {}: {} created, {} already imported, {} skipped, {} failed in {:.1}s",
            result.status,
            result.rows_created,
            result.rows_already_imported,
            result.rows_skipped,
            result.rows_failed,
            result.duration_seconds
        );

        run_result.map(|()| result)
    }

    async fn run_stages(
        &self,
        state: &mut ImportState,
        registry: &mut IdentifierRegistry,
        importer: &BatchImporter,
        reader: &CursorReader,
        cancel: &CancellationToken,
        errors: &mut Vec<ImportError>,
    ) -> Result<()> {
        for kind in EntityKind::IMPORT_ORDER {
            if !self.config.import.stage_enabled(kind) {
                debug!("{}: disabled by configuration", kind);
                state.kind_mut(kind).mark_disabled();
                continue;
            }
            if state.is_kind_completed(kind) {
                info!("{}: already completed, skipping", kind);
                continue;
            }
            if cancel.is_cancelled() {
                info!("Cancellation requested, stopping before {}", kind);
                return Err(MigrateError::Cancelled);
            }

            state.kind_mut(kind).mark_in_progress();
            let stage = match kind {
                EntityKind::MappedCategory => {
                    self.import_mapped_categories(state, registry, importer, errors)
                        .await
                }
                EntityKind::Category => {
                    self.import_categories(state, registry, importer, reader, errors)
                        .await
                }
                _ => {
                    self.import_stage(kind, state, registry, importer, reader, cancel, errors)
                        .await
                }
            };

            match stage {
                Ok(()) => {
                    let kind_state = state.kind_mut(kind);
                    kind_state.mark_completed();
                    info!(
                        "{}: completed ({} created, {} failed)",
                        kind, kind_state.rows_created, kind_state.rows_failed
                    );
                    self.save_state(state)?;
                }
                Err(MigrateError::Cancelled) => return Err(MigrateError::Cancelled),
                Err(e) => {
                    state.kind_mut(kind).mark_failed(&e.to_string());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Cursor loop for a kind read batch by batch.
    #[allow(clippy::too_many_arguments)]
    async fn import_stage(
        &self,
        kind: EntityKind,
        state: &mut ImportState,
        registry: &mut IdentifierRegistry,
        importer: &BatchImporter,
        reader: &CursorReader,
        cancel: &CancellationToken,
        errors: &mut Vec<ImportError>,
    ) -> Result<()> {
        let mapper = self
            .mapper(kind)?
            .with_skipped_categories(&state.skipped_categories);

        let total = self.source.count(kind).await?;
        state.kind_mut(kind).rows_total = total;

        let mut cursor: Option<ExternalId> = state.cursor(kind).cloned();
        match &cursor {
            Some(c) => info!("{}: resuming after {} ({} rows in source)", kind, c, total),
            None => info!("{}: starting ({} rows in source)", kind, total),
        }

        loop {
            if cancel.is_cancelled() {
                info!("Cancellation requested, stopping {} at batch boundary", kind);
                return Err(MigrateError::Cancelled);
            }

            let batch = reader.fetch_next(kind, cursor.as_ref()).await?;
            if batch.is_empty() {
                break;
            }

            let outcome = importer
                .import_batch(kind, &batch.rows, &mapper, registry)
                .await?;
            self.finish_batch(kind, outcome, batch.cursor.clone(), state, errors)
                .await?;
            cursor = batch.cursor;
        }
        Ok(())
    }

    async fn import_mapped_categories(
        &self,
        state: &mut ImportState,
        registry: &mut IdentifierRegistry,
        importer: &BatchImporter,
        errors: &mut Vec<ImportError>,
    ) -> Result<()> {
        let kind = EntityKind::MappedCategory;
        restart_stage(state, kind);
        let outcome = importer
            .import_mapped_categories(self.config.import.placement_mappings(), registry)
            .await?;
        state.kind_mut(kind).rows_total = outcome.processed();
        self.finish_batch(kind, outcome, None, state, errors).await
    }

    /// Source categories are read completely, then created parents first.
    async fn import_categories(
        &self,
        state: &mut ImportState,
        registry: &mut IdentifierRegistry,
        importer: &BatchImporter,
        reader: &CursorReader,
        errors: &mut Vec<ImportError>,
    ) -> Result<()> {
        let kind = EntityKind::Category;
        let mapper = self.mapper(kind)?;
        restart_stage(state, kind);

        let total = self.source.count(kind).await?;
        state.kind_mut(kind).rows_total = total;
        info!("{}: reading {} rows", kind, total);

        let mut rows = Vec::new();
        let mut cursor: Option<ExternalId> = None;
        loop {
            let batch = reader.fetch_next(kind, cursor.as_ref()).await?;
            if batch.is_empty() {
                break;
            }
            cursor = batch.cursor;
            rows.extend(batch.rows);
        }

        let tree = importer
            .import_category_tree(&rows, &mapper, registry)
            .await?;
        if !tree.skipped_ids.is_empty() {
            info!(
                "{}: {} categories skipped with their content",
                kind,
                tree.skipped_ids.len()
            );
        }
        state.skipped_categories.extend(tree.skipped_ids);
        self.finish_batch(kind, tree.outcome, cursor, state, errors)
            .await
    }

    fn mapper(&self, kind: EntityKind) -> Result<EntityMapper> {
        EntityMapper::for_kind(kind, &self.config.import)
            .ok_or_else(|| MigrateError::Config(format!("no mapper for {}", kind)))
    }

    /// Record a batch, report progress, persist state and check the error limit.
    async fn finish_batch(
        &self,
        kind: EntityKind,
        outcome: BatchOutcome,
        cursor: Option<ExternalId>,
        state: &mut ImportState,
        errors: &mut Vec<ImportError>,
    ) -> Result<()> {
        for row_error in &outcome.errors {
            warn!("{}", row_error);
        }

        let kind_state = state.kind_mut(kind);
        kind_state.record_batch(&outcome, cursor);
        let update = ProgressUpdate {
            kind,
            processed: kind_state.rows_processed(),
            total: kind_state.rows_total,
            created: kind_state.rows_created,
            failed: kind_state.rows_failed,
            batches: kind_state.batches,
        };

        if outcome.batch_skipped {
            debug!("{}: batch already imported", kind);
        }
        info!(
            "{}: {}/{} processed ({} created, {} failed)",
            kind, update.processed, update.total, update.created, update.failed
        );
        self.send_progress(update).await;

        errors.extend(outcome.errors);
        self.save_state(state)?;

        if let Some(limit) = self.config.import.max_row_errors {
            if errors.len() > limit {
                return Err(MigrateError::ErrorThreshold {
                    errors: errors.len(),
                    limit,
                });
            }
        }
        Ok(())
    }

    async fn send_progress(&self, update: ProgressUpdate) {
        if self.progress {
            if let Ok(json) = serde_json::to_string(&update) {
                eprintln!("{}", json);
            }
        }
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(update).await;
        }
    }

    async fn log_source_settings(&self) {
        match self.source.config_values().await {
            Ok(values) => {
                let sorted: BTreeMap<_, _> = values.into_iter().collect();
                for (name, value) in sorted {
                    debug!("source setting {} = {}", name, value);
                }
            }
            Err(e) => warn!("Could not read source settings: {}", e),
        }
    }

    /// Save state to file. Dry runs leave no state behind.
    fn save_state(&self, state: &mut ImportState) -> Result<()> {
        if self.dry_run {
            return Ok(());
        }
        if let Some(ref path) = self.state_file {
            state.save(path)?;
        }
        Ok(())
    }

    fn write_error_log(&self, errors: &[ImportError]) -> Result<()> {
        if let Some(ref path) = self.error_log {
            write_error_log(path, errors)?;
            info!("Wrote {} row errors to {:?}", errors.len(), path);
        }
        Ok(())
    }

    /// Source row counts next to the mappings already in the registry.
    pub async fn counts(&self) -> Result<Vec<KindCount>> {
        let registry =
            IdentifierRegistry::open(self.registry_backend.clone(), &self.config.import.id_prefix)
                .await?;

        let mut counts = Vec::with_capacity(EntityKind::IMPORT_ORDER.len());
        for kind in EntityKind::IMPORT_ORDER {
            let enabled = self.config.import.stage_enabled(kind);
            let source_rows = if kind.is_sourced() && enabled {
                Some(self.source.count(kind).await?)
            } else {
                None
            };
            let mapped = registry.count(kind);
            match source_rows {
                Some(rows) => info!("{}: {} source rows, {} mapped", kind, rows, mapped),
                None => info!("{}: {} mapped", kind, mapped),
            }
            counts.push(KindCount {
                kind,
                enabled,
                source_rows,
                mapped,
            });
        }
        Ok(counts)
    }
}

/// Stages processed as one unit start over with fresh counters.
fn restart_stage(state: &mut ImportState, kind: EntityKind) {
    let kind_state = state.kind_mut(kind);
    *kind_state = KindState::new();
    kind_state.mark_in_progress();
}

fn build_result(
    state: &ImportState,
    status: &str,
    dry_run: bool,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
    errors: Vec<ImportError>,
) -> ImportResult {
    let kinds: Vec<KindSummary> = EntityKind::IMPORT_ORDER
        .iter()
        .filter_map(|kind| {
            state.kind(*kind).map(|k| KindSummary {
                kind: *kind,
                status: k.status,
                total: k.rows_total,
                created: k.rows_created,
                already_imported: k.rows_already_imported,
                skipped: k.rows_skipped,
                failed: k.rows_failed,
            })
        })
        .collect();

    ImportResult {
        run_id: state.run_id.clone(),
        status: status.to_string(),
        dry_run,
        duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
        started_at,
        completed_at,
        rows_created: kinds.iter().map(|k| k.created).sum(),
        rows_already_imported: kinds.iter().map(|k| k.already_imported).sum(),
        rows_skipped: kinds.iter().map(|k| k.skipped).sum(),
        rows_failed: kinds.iter().map(|k| k.failed).sum(),
        kinds,
        errors,
    }
}

fn log_error_summary(errors: &[ImportError]) {
    let mut per_kind: BTreeMap<EntityKind, usize> = BTreeMap::new();
    for e in errors {
        *per_kind.entry(e.kind).or_default() += 1;
    }
    for (kind, count) in per_kind {
        warn!("{}: {} rows failed and will be retried on the next run", kind, count);
    }
}

/// One JSON object per line.
fn write_error_log(path: &Path, errors: &[ImportError]) -> Result<()> {
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for e in errors {
        serde_json::to_writer(&mut file, e)?;
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(())
}

impl ImportResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
