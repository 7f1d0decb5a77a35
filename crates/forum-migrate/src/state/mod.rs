//! Run state file for resume.
//!
//! The state records, per entity kind, how far the cursor got and what the
//! batches produced. It is rewritten after every batch, after the batch's
//! mappings are durable in the identifier registry, so a resumed run never
//! skips rows whose mappings were lost.

use crate::core::{EntityKind, ExternalId};
use crate::error::{MigrateError, Result};
use crate::importer::BatchOutcome;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Import run state for resume capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportState {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// Current run status.
    pub status: RunStatus,

    /// Per-kind progress.
    pub kinds: BTreeMap<EntityKind, KindState>,

    /// Source category ids whose content is not imported, including the
    /// descendants of skipped categories found during the category stage.
    #[serde(default)]
    pub skipped_categories: BTreeSet<String>,

    /// When the run finished (if it did).
    pub completed_at: Option<DateTime<Utc>>,

    /// HMAC-SHA256 over the serialized state (without this field), keyed
    /// by the config hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Stage status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Turned off in the configuration.
    Disabled,
}

/// Per-kind state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindState {
    pub status: StageStatus,

    /// Last external id of the last finished batch.
    pub cursor: Option<ExternalId>,

    /// Rows the source reported for this kind.
    pub rows_total: u64,

    pub rows_created: u64,

    /// Rows that already had a mapping.
    pub rows_already_imported: u64,

    /// Rows the mapper chose not to import.
    pub rows_skipped: u64,

    pub rows_failed: u64,

    pub batches: u64,

    pub completed_at: Option<DateTime<Utc>>,

    /// Error message if the stage aborted the run.
    pub error: Option<String>,
}

impl ImportState {
    pub fn new(run_id: String, config_hash: String) -> Self {
        Self {
            run_id,
            config_hash,
            started_at: Utc::now(),
            status: RunStatus::Running,
            kinds: BTreeMap::new(),
            skipped_categories: BTreeSet::new(),
            completed_at: None,
            hmac: None,
        }
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;

        let content = serde_json::to_string(&unsigned)?;
        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load state from a file and verify its signature.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::State(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let state: Self = serde_json::from_str(&content)?;

        match &state.hmac {
            Some(stored) if *stored == state.compute_hmac()? => Ok(state),
            Some(_) => Err(MigrateError::State(
                "State file integrity check failed: HMAC mismatch (possible tampering)".into(),
            )),
            None => Err(MigrateError::State(
                "State file has no HMAC signature".into(),
            )),
        }
    }

    /// Save state to a file (atomic write with HMAC).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    pub fn kind_mut(&mut self, kind: EntityKind) -> &mut KindState {
        self.kinds.entry(kind).or_insert_with(KindState::new)
    }

    pub fn kind(&self, kind: EntityKind) -> Option<&KindState> {
        self.kinds.get(&kind)
    }

    pub fn is_kind_completed(&self, kind: EntityKind) -> bool {
        self.kinds
            .get(&kind)
            .map(|k| k.status == StageStatus::Completed)
            .unwrap_or(false)
    }

    /// Cursor to continue `kind` from.
    pub fn cursor(&self, kind: EntityKind) -> Option<&ExternalId> {
        self.kinds.get(&kind).and_then(|k| k.cursor.as_ref())
    }

    pub fn total_failed(&self) -> u64 {
        self.kinds.values().map(|k| k.rows_failed).sum()
    }

    pub fn mark_completed(&mut self) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = RunStatus::Cancelled;
    }
}

impl KindState {
    pub fn new() -> Self {
        Self {
            status: StageStatus::Pending,
            cursor: None,
            rows_total: 0,
            rows_created: 0,
            rows_already_imported: 0,
            rows_skipped: 0,
            rows_failed: 0,
            batches: 0,
            completed_at: None,
            error: None,
        }
    }

    pub fn mark_in_progress(&mut self) {
        self.status = StageStatus::InProgress;
        self.error = None;
    }

    pub fn mark_completed(&mut self) {
        self.status = StageStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = StageStatus::Failed;
        self.error = Some(error.to_string());
    }

    pub fn mark_disabled(&mut self) {
        self.status = StageStatus::Disabled;
    }

    /// Fold a finished batch in and move the cursor past it.
    pub fn record_batch(&mut self, outcome: &BatchOutcome, cursor: Option<ExternalId>) {
        self.rows_created += outcome.created;
        self.rows_already_imported += outcome.already_imported;
        self.rows_skipped += outcome.skipped;
        self.rows_failed += outcome.failed;
        self.batches += 1;
        if cursor.is_some() {
            self.cursor = cursor;
        }
    }

    pub fn rows_processed(&self) -> u64 {
        self.rows_created + self.rows_already_imported + self.rows_skipped + self.rows_failed
    }
}

impl Default for KindState {
    fn default() -> Self {
        Self::new()
    }
}
