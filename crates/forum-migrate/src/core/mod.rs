//! Core types shared by every part of the engine.
//!
//! - [`kind`]: entity kinds and their dependency order
//! - [`identifier`]: SQL identifier quoting for generated queries
//! - [`value`]: identifiers and source row values
//! - [`traits`]: source, target and lookup seams

pub mod identifier;
pub mod kind;
pub mod traits;
pub mod value;

pub use kind::EntityKind;
pub use traits::{IdLookup, SourceAdapter, TargetCreator};
pub use value::{ExternalId, FieldValue, InternalId, SourceRow};
