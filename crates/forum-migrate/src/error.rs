//! Error types for the import engine.
//!
//! [`MigrateError`] covers conditions that abort a run. Failures that only
//! affect a single source row are not errors in this sense: they are
//! collected as [`ImportError`] values and the run keeps going.

use crate::core::{EntityKind, ExternalId, InternalId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Run-fatal error type.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source adapter failed (unreachable, query error, unreadable dump).
    #[error("Source error: {0}")]
    Source(String),

    /// Target creation collaborator is unavailable.
    #[error("Target unavailable: {0}")]
    Target(String),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// The same external id was mapped to two different internal ids.
    #[error(
        "Duplicate mapping for {kind} {external_id}: already mapped to {existing}, refusing {attempted}"
    )]
    DuplicateMapping {
        kind: EntityKind,
        external_id: String,
        existing: InternalId,
        attempted: InternalId,
    },

    /// Identifier registry storage error
    #[error("Identifier registry error: {0}")]
    Registry(String),

    /// State file error
    #[error("State file error: {0}")]
    State(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since last run - cannot resume. Use `run` to start fresh.")]
    ConfigChanged,

    /// Too many row-level errors.
    #[error("Aborting: {errors} row errors exceeds the configured limit of {limit}")]
    ErrorThreshold { errors: usize, limit: usize },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run was cancelled at a batch boundary (SIGINT, etc.)
    #[error("Import cancelled")]
    Cancelled,
}

pub const EXIT_CONFIG_ERROR: u8 = 1;
pub const EXIT_SOURCE_ERROR: u8 = 2;
pub const EXIT_TARGET_ERROR: u8 = 3;
pub const EXIT_DUPLICATE_MAPPING: u8 = 4;
pub const EXIT_STATE_ERROR: u8 = 5;
pub const EXIT_ERROR_THRESHOLD: u8 = 6;
pub const EXIT_IO_ERROR: u8 = 7;
pub const EXIT_CANCELLED: u8 = 130;

impl MigrateError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl ToString, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    pub fn source(message: impl Into<String>) -> Self {
        MigrateError::Source(message.into())
    }

    pub fn registry(message: impl Into<String>) -> Self {
        MigrateError::Registry(message.into())
    }

    /// Attribute a database failure to the identifier registry instead of
    /// the source.
    pub fn into_registry(self) -> Self {
        match self {
            MigrateError::Postgres(e) => MigrateError::Registry(format!("PostgreSQL error: {}", e)),
            MigrateError::Pool { message, context } => {
                MigrateError::Registry(format!("{} ({})", message, context))
            }
            other => other,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::ConfigChanged => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::Source(_) | MigrateError::Postgres(_) | MigrateError::Pool { .. } => {
                EXIT_SOURCE_ERROR
            }
            MigrateError::Target(_) => EXIT_TARGET_ERROR,
            MigrateError::DuplicateMapping { .. } => EXIT_DUPLICATE_MAPPING,
            MigrateError::Registry(_) | MigrateError::State(_) | MigrateError::Json(_) => {
                EXIT_STATE_ERROR
            }
            MigrateError::ErrorThreshold { .. } => EXIT_ERROR_THRESHOLD,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Failure reported by a target creation collaborator.
#[derive(Error, Debug, Clone)]
pub enum CreateError {
    /// The target refused this object. Only the row is affected.
    #[error("rejected by target: {0}")]
    Rejected(String),

    /// The target cannot be reached, or retries were exhausted.
    #[error("target unavailable: {0}")]
    Unavailable(String),
}

/// Why a single row could not be imported.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum RowError {
    /// The row could not be translated into a creation request.
    #[error("mapping failed: {0}")]
    Mapping(String),

    /// A referenced record has not been imported.
    #[error("{kind} {external_id} has not been imported")]
    MissingReference { kind: EntityKind, external_id: String },

    /// The target refused the creation request.
    #[error("{0}")]
    Rejected(String),

    /// The category's parent could not be created in this pass.
    #[error("parent category {0} was not created")]
    ParentFailed(String),
}

impl RowError {
    pub fn mapping(message: impl Into<String>) -> Self {
        RowError::Mapping(message.into())
    }

    pub fn missing(kind: EntityKind, external_id: &ExternalId) -> Self {
        RowError::MissingReference {
            kind,
            external_id: external_id.to_string(),
        }
    }

    /// Short machine-friendly name for the error class.
    pub fn class(&self) -> &'static str {
        match self {
            RowError::Mapping(_) => "mapping",
            RowError::MissingReference { .. } => "missing_reference",
            RowError::Rejected(_) => "rejected",
            RowError::ParentFailed(_) => "parent_failed",
        }
    }
}

/// A row-level failure recorded for the operator's error log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportError {
    pub kind: EntityKind,
    pub external_id: String,
    pub message: String,
    pub cause: RowError,
}

impl ImportError {
    pub fn new(kind: EntityKind, external_id: &ExternalId, cause: RowError) -> Self {
        Self {
            kind,
            external_id: external_id.to_string(),
            message: cause.to_string(),
            cause,
        }
    }
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.kind, self.external_id, self.message)
    }
}
