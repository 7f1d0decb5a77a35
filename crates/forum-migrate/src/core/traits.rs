//! Collaborator seams of the import engine.
//!
//! - [`SourceAdapter`]: reads rows from the legacy database
//! - [`TargetCreator`]: creates objects in the target system
//! - [`IdLookup`]: read-only view of imported identifiers for mappers
//!
//! Retries and timeouts are the collaborators' business. The engine treats
//! any `Err` from a source adapter, and `CreateError::Unavailable` from a
//! target, as fatal for the run.

use async_trait::async_trait;
use std::collections::HashMap;

use super::kind::EntityKind;
use super::value::{ExternalId, InternalId, SourceRow};
use crate::error::{CreateError, Result};
use crate::mapper::MappedRequest;

/// Read-only access to a legacy data source.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Number of rows the source holds for a kind. Used for progress only.
    async fn count(&self, kind: EntityKind) -> Result<u64>;

    /// Fetch up to `limit` rows ordered by key, strictly after `cursor`.
    ///
    /// Returns the rows and the cursor to pass on the next call. An empty
    /// row set means the kind is exhausted.
    async fn fetch(
        &self,
        kind: EntityKind,
        cursor: Option<&ExternalId>,
        limit: usize,
    ) -> Result<(Vec<SourceRow>, Option<ExternalId>)>;

    /// Source-system settings (version, limits) for diagnostics.
    async fn config_values(&self) -> Result<HashMap<String, String>>;

    /// Adapter name for logging.
    fn source_type(&self) -> &'static str;
}

/// Object creation in the target system.
#[async_trait]
pub trait TargetCreator: Send + Sync {
    /// Create one object and return the identifier the target assigned.
    async fn create(
        &self,
        kind: EntityKind,
        request: &MappedRequest,
    ) -> std::result::Result<InternalId, CreateError>;

    /// Collaborator name for logging.
    fn target_type(&self) -> &'static str;
}

/// Resolve already-imported records while mapping a row.
pub trait IdLookup {
    fn internal_id_for(&self, kind: EntityKind, external_id: &ExternalId) -> Option<InternalId>;
}
