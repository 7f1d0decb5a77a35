//! Driving mapped rows through creation and registration.
//!
//! For every row: map, create, register. A row that cannot be mapped or
//! that the target rejects becomes an [`ImportError`] and the batch moves
//! on; nothing is registered for it, so the next run tries it again. A
//! target that is unavailable, or a registry failure, aborts the run.
//!
//! The mapping for a created object is durable before the next row starts.

mod categories;

pub use categories::CategoryTreeOutcome;

use std::sync::Arc;
use tracing::debug;

use crate::core::{EntityKind, ExternalId, InternalId, SourceRow, TargetCreator};
use crate::error::{CreateError, ImportError, MigrateError, Result, RowError};
use crate::mapper::{EntityMapper, MapOutcome, MappedRequest};
use crate::registry::IdentifierRegistry;

/// Result of importing one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Created(InternalId),
    /// A mapping already existed; nothing was created.
    AlreadyImported,
    /// The mapper chose not to import the row.
    Skipped(String),
    Failed(ImportError),
}

/// Counts and errors for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub created: u64,
    pub already_imported: u64,
    pub skipped: u64,
    pub failed: u64,
    pub errors: Vec<ImportError>,
    /// Every row was already mapped, so the batch was not processed.
    pub batch_skipped: bool,
}

impl BatchOutcome {
    pub fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Created(_) => self.created += 1,
            RowOutcome::AlreadyImported => self.already_imported += 1,
            RowOutcome::Skipped(_) => self.skipped += 1,
            RowOutcome::Failed(error) => {
                self.failed += 1;
                self.errors.push(error);
            }
        }
    }

    pub fn processed(&self) -> u64 {
        self.created + self.already_imported + self.skipped + self.failed
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.created += other.created;
        self.already_imported += other.already_imported;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }
}

pub struct BatchImporter {
    target: Arc<dyn TargetCreator>,
}

impl BatchImporter {
    pub fn new(target: Arc<dyn TargetCreator>) -> Self {
        Self { target }
    }

    pub fn target_type(&self) -> &'static str {
        self.target.target_type()
    }

    /// Import one batch of rows of a single kind.
    pub async fn import_batch(
        &self,
        kind: EntityKind,
        rows: &[SourceRow],
        mapper: &EntityMapper,
        registry: &mut IdentifierRegistry,
    ) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();

        if registry.all_exist(kind, rows.iter().map(|row| &row.external_id)) {
            debug!("{}: batch of {} already imported, skipping", kind, rows.len());
            outcome.already_imported = rows.len() as u64;
            outcome.batch_skipped = true;
            return Ok(outcome);
        }

        for row in rows {
            outcome.record(self.import_row(kind, row, mapper, registry).await?);
        }
        Ok(outcome)
    }

    /// Map, create and register a single row.
    pub async fn import_row(
        &self,
        kind: EntityKind,
        row: &SourceRow,
        mapper: &EntityMapper,
        registry: &mut IdentifierRegistry,
    ) -> Result<RowOutcome> {
        if registry.contains(kind, &row.external_id) {
            return Ok(RowOutcome::AlreadyImported);
        }

        match mapper.map(row, &*registry) {
            Err(cause) => Ok(RowOutcome::Failed(ImportError::new(
                kind,
                &row.external_id,
                cause,
            ))),
            Ok(MapOutcome::Skip(reason)) => {
                debug!("{} {} skipped: {}", kind, row.external_id, reason);
                Ok(RowOutcome::Skipped(reason))
            }
            Ok(MapOutcome::Create(request)) => {
                self.create(kind, &row.external_id, request, registry).await
            }
        }
    }

    /// Create one object and register it, plus its aliases.
    pub async fn create(
        &self,
        kind: EntityKind,
        external_id: &ExternalId,
        mut request: MappedRequest,
        registry: &mut IdentifierRegistry,
    ) -> Result<RowOutcome> {
        request.import_key = Some(format!("{}:{}", kind, registry.key(external_id)));

        match self.target.create(kind, &request).await {
            Ok(id) => {
                registry.register(kind, external_id, id).await?;
                for (alias_kind, alias) in &request.aliases {
                    registry.register(*alias_kind, alias, id).await?;
                }
                Ok(RowOutcome::Created(id))
            }
            Err(CreateError::Rejected(message)) => Ok(RowOutcome::Failed(ImportError::new(
                kind,
                external_id,
                RowError::Rejected(message),
            ))),
            Err(CreateError::Unavailable(message)) => Err(MigrateError::Target(message)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    /// Records every request; rejects usernames starting with "bad".
    #[derive(Default)]
    pub struct RecordingTarget {
        next_id: AtomicI64,
        pub requests: Mutex<Vec<(EntityKind, MappedRequest)>>,
        down: bool,
    }

    impl RecordingTarget {
        /// A target whose every create fails as unavailable.
        pub fn unavailable() -> Self {
            Self {
                down: true,
                ..Self::default()
            }
        }

        pub fn count(&self, kind: EntityKind) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|(k, _)| *k == kind)
                .count()
        }
    }

    #[async_trait]
    impl TargetCreator for RecordingTarget {
        async fn create(
            &self,
            kind: EntityKind,
            request: &MappedRequest,
        ) -> std::result::Result<InternalId, CreateError> {
            if self.down {
                return Err(CreateError::Unavailable("down".into()));
            }
            let rejected = request
                .get("username")
                .and_then(|v| v.as_str())
                .is_some_and(|name| name.starts_with("bad"));
            if rejected {
                return Err(CreateError::Rejected("HTTP 422: invalid username".into()));
            }
            self.requests.lock().unwrap().push((kind, request.clone()));
            Ok(InternalId(1000 + self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        fn target_type(&self) -> &'static str {
            "recording"
        }
    }
}
