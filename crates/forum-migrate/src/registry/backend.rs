//! Storage trait for identifier mappings.
//!
//! Implementations:
//!
//! - **Journal**: append-only JSON-lines file (`journal.rs`)
//! - **PostgreSQL**: mapping table (`postgres.rs`)
//! - **Memory**: process-local, for dry runs and tests (`memory.rs`)
//!
//! The registry works with `Arc<dyn RegistryBackend>` and keeps its own
//! read cache; backends only need to store and replay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{EntityKind, InternalId};
use crate::error::Result;

/// One persisted mapping. `key` is the namespaced external id and `prefix`
/// the namespace it was registered under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityMapping {
    pub kind: EntityKind,
    pub key: String,
    pub internal_id: InternalId,
    #[serde(default)]
    pub prefix: String,
}

/// What happened to an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The mapping is now stored.
    Inserted,
    /// The backend already held a mapping for this key.
    Existing(InternalId),
}

/// Durable storage for identifier mappings.
///
/// `insert` must not return before the mapping survives a crash.
#[async_trait]
pub trait RegistryBackend: Send + Sync {
    /// Create tables/files if needed. Idempotent.
    async fn init(&self) -> Result<()>;

    /// Every stored mapping.
    async fn load_all(&self) -> Result<Vec<IdentityMapping>>;

    /// Store a mapping durably.
    async fn insert(&self, mapping: &IdentityMapping) -> Result<InsertOutcome>;

    /// Backend name for logging.
    fn backend_type(&self) -> &'static str;
}
