//! PostgreSQL-backed identifier mappings.
//!
//! Mappings live in `<schema>.id_map` (default schema `_forum_migrate`),
//! keyed by `(kind, external_id)`. The primary key enforces the
//! one-mapping-per-key invariant even if two processes share the table.

use async_trait::async_trait;
use deadpool_postgres::Pool;

use super::backend::{IdentityMapping, InsertOutcome, RegistryBackend};
use crate::core::identifier::quote_ident;
use crate::core::{EntityKind, InternalId};
use crate::error::{MigrateError, Result};

pub struct PgRegistryBackend {
    pool: Pool,
    schema: String,
}

impl PgRegistryBackend {
    pub fn new(pool: Pool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn table(&self) -> Result<String> {
        Ok(format!("{}.id_map", quote_ident(&self.schema)?))
    }
}

fn db_error(e: tokio_postgres::Error) -> MigrateError {
    MigrateError::from(e).into_registry()
}

#[async_trait]
impl RegistryBackend for PgRegistryBackend {
    async fn init(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "initializing registry schema").into_registry())?;

        conn.execute(
            &format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema)?),
            &[],
        )
        .await
        .map_err(db_error)?;

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    kind TEXT NOT NULL,
                    external_id TEXT NOT NULL,
                    internal_id BIGINT NOT NULL,
                    prefix TEXT NOT NULL DEFAULT '',
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    PRIMARY KEY (kind, external_id)
                )",
                self.table()?
            ),
            &[],
        )
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<IdentityMapping>> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "loading registry").into_registry())?;

        // Dry runs load without init; a missing table just means nothing yet.
        let exists = conn
            .query_one("SELECT to_regclass($1) IS NOT NULL", &[&self.table()?])
            .await
            .map_err(db_error)?;
        if !exists.get::<_, bool>(0) {
            return Ok(Vec::new());
        }

        let rows = conn
            .query(
                &format!(
                    "SELECT kind, external_id, internal_id, prefix FROM {}",
                    self.table()?
                ),
                &[],
            )
            .await
            .map_err(db_error)?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.get(0);
            let kind: EntityKind = kind.parse().map_err(MigrateError::Registry)?;
            mappings.push(IdentityMapping {
                kind,
                key: row.get(1),
                internal_id: InternalId(row.get(2)),
                prefix: row.get(3),
            });
        }
        Ok(mappings)
    }

    async fn insert(&self, mapping: &IdentityMapping) -> Result<InsertOutcome> {
        let conn = self
            .pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, "registering mapping").into_registry())?;

        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO {} (kind, external_id, internal_id, prefix)
                     VALUES ($1, $2, $3, $4)
                     ON CONFLICT (kind, external_id) DO NOTHING",
                    self.table()?
                ),
                &[
                    &mapping.kind.as_str(),
                    &mapping.key,
                    &mapping.internal_id.0,
                    &mapping.prefix,
                ],
            )
            .await
            .map_err(db_error)?;

        if inserted == 1 {
            return Ok(InsertOutcome::Inserted);
        }

        let row = conn
            .query_one(
                &format!(
                    "SELECT internal_id FROM {} WHERE kind = $1 AND external_id = $2",
                    self.table()?
                ),
                &[&mapping.kind.as_str(), &mapping.key],
            )
            .await
            .map_err(db_error)?;
        Ok(InsertOutcome::Existing(InternalId(row.get(0))))
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
