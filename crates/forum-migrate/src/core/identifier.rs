//! SQL identifier validation and quoting.
//!
//! Schema and column names from the configuration end up in generated SQL
//! (key columns in keyset pagination, the registry schema). Identifiers
//! cannot be bound as parameters, so they are validated and quoted here.

use crate::error::{MigrateError, Result};

/// PostgreSQL truncates identifiers at 63 bytes.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Reject empty, over-long and NUL-containing identifiers.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(MigrateError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(MigrateError::Config(format!(
            "Identifier contains a null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(MigrateError::Config(format!(
            "Identifier exceeds {} bytes: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}
