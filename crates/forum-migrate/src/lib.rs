//! # forum-migrate
//!
//! Resumable, idempotent import of legacy forum databases.
//!
//! Records are read from a legacy source in key order, translated into
//! creation requests and created in the target system one kind at a time:
//!
//! - **Identifier registry** mapping every (kind, external id) to the id the
//!   target assigned, durable before the next row starts
//! - **Cursor reading** in batches, so an interrupted run resumes where it
//!   stopped
//! - **Category hierarchies** created parents first, with relocation and
//!   skip directives from the configuration
//! - **Row-level errors** collected and logged while the run goes on
//!
//! ## Example
//!
//! ```rust,no_run
//! use forum_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> forum_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(None).await?;
//!     println!("Created {} objects", result.rows_created);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod hierarchy;
pub mod importer;
pub mod mapper;
pub mod orchestrator;
pub mod registry;
pub mod source;
pub mod state;
pub mod target;

// Re-exports for convenient access
pub use crate::core::{
    EntityKind, ExternalId, FieldValue, IdLookup, InternalId, SourceAdapter, SourceRow,
    TargetCreator,
};
pub use config::{CategoryMapping, Config, ImportConfig, RegistryConfig, SourceConfig, TargetConfig};
pub use error::{CreateError, ImportError, MigrateError, Result, RowError};
pub use importer::{BatchImporter, BatchOutcome, RowOutcome};
pub use mapper::{EntityMapper, MapOutcome, MappedRequest};
pub use orchestrator::{ImportResult, KindCount, Orchestrator, ProgressUpdate};
pub use registry::{IdentifierRegistry, JournalBackend, MemoryBackend, RegistryBackend};
pub use source::{CursorReader, DumpSource, PgSource};
pub use state::ImportState;
pub use target::{DryRunTarget, HttpTarget};
