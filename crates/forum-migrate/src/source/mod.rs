//! Reading source rows in cursor order.
//!
//! [`CursorReader`] sits between the orchestrator and a [`SourceAdapter`]:
//! it asks for one batch at a time, drops repeated external ids and makes
//! sure the cursor only ever moves forward.

mod dump;
mod postgres;

pub use dump::DumpSource;
pub use postgres::PgSource;

use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use crate::config::{SourceConfig, SourceType};
use crate::core::{EntityKind, ExternalId, SourceAdapter, SourceRow};
use crate::error::{MigrateError, Result};

/// Build the adapter named in the configuration.
pub async fn source_from_config(config: &SourceConfig) -> Result<Arc<dyn SourceAdapter>> {
    let source: Arc<dyn SourceAdapter> = match config.r#type {
        SourceType::Postgres => Arc::new(PgSource::new(config).await?),
        SourceType::Dump => {
            let dir = config.dump_dir.as_ref().ok_or_else(|| {
                MigrateError::Config("source.dump_dir is required for type: dump".into())
            })?;
            Arc::new(DumpSource::open(dir, config)?)
        }
    };
    Ok(source)
}

/// One batch of rows and the cursor that follows it.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub rows: Vec<SourceRow>,
    /// Cursor to resume after this batch. `None` only for an empty batch.
    pub cursor: Option<ExternalId>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn external_ids(&self) -> impl Iterator<Item = &ExternalId> {
        self.rows.iter().map(|row| &row.external_id)
    }
}

pub struct CursorReader {
    source: Arc<dyn SourceAdapter>,
    batch_size: usize,
}

impl CursorReader {
    pub fn new(source: Arc<dyn SourceAdapter>, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn source(&self) -> &Arc<dyn SourceAdapter> {
        &self.source
    }

    /// Fetch the batch after `cursor`. An empty batch means the kind is done.
    pub async fn fetch_next(
        &self,
        kind: EntityKind,
        cursor: Option<&ExternalId>,
    ) -> Result<Batch> {
        let (rows, next) = self.source.fetch(kind, cursor, self.batch_size).await?;
        if rows.is_empty() {
            return Ok(Batch::default());
        }

        let fetched = rows.len();
        let mut seen = HashSet::with_capacity(fetched);
        let rows: Vec<SourceRow> = rows
            .into_iter()
            .filter(|row| seen.insert(row.external_id.clone()))
            .collect();
        if rows.len() < fetched {
            debug!(
                "{}: dropped {} duplicate rows in batch",
                kind,
                fetched - rows.len()
            );
        }

        let next = match next {
            Some(next) => next,
            None => rows
                .iter()
                .map(|row| row.external_id.clone())
                .max()
                .ok_or_else(|| MigrateError::source("non-empty batch without rows"))?,
        };

        // A cursor that fails to advance would loop forever.
        if let Some(previous) = cursor {
            if next <= *previous {
                return Err(MigrateError::source(format!(
                    "{} cursor did not advance past {} (got {}); source must order by its key",
                    kind, previous, next
                )));
            }
        }

        Ok(Batch {
            rows,
            cursor: Some(next),
        })
    }
}
