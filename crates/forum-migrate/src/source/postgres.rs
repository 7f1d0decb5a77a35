//! PostgreSQL source adapter.
//!
//! Each kind is read with the configured SELECT, wrapped in keyset
//! pagination over its key columns:
//!
//! ```sql
//! SELECT * FROM (<query>) src WHERE (k1, k2) > ($1, $2) ORDER BY k1, k2 LIMIT n
//! ```
//!
//! Cursor parts are bound with explicit casts (`bigint` or `text`) so the
//! comparison works whatever integer width the key column has. Text key
//! columns are compared and ordered with `COLLATE "C"`, which is byte order,
//! the same order the cursor reader checks progress with.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use deadpool_postgres::Pool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, info};

use crate::config::{EntityQuery, SourceConfig};
use crate::core::identifier::quote_ident;
use crate::core::{EntityKind, ExternalId, FieldValue, SourceAdapter, SourceRow};
use crate::error::{MigrateError, Result};

pub struct PgSource {
    pool: Pool,
    queries: BTreeMap<EntityKind, EntityQuery>,
    keys: HashMap<EntityKind, Vec<String>>,
    settings_sql: Option<String>,
    /// Per kind, which key columns are text. Filled on first fetch.
    text_keys: Mutex<HashMap<EntityKind, Vec<bool>>>,
}

impl PgSource {
    /// Connect using `source.postgres`.
    pub async fn new(config: &SourceConfig) -> Result<Self> {
        let pg = config.postgres.as_ref().ok_or_else(|| {
            MigrateError::Config("source.postgres is required for type: postgres".into())
        })?;
        let pool = crate::db::connect(pg, "source").await?;

        let keys = config
            .queries
            .keys()
            .map(|kind| (*kind, config.key_columns(*kind)))
            .collect();

        info!(
            "PostgreSQL source ready with queries for: {}",
            config
                .queries
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self {
            pool,
            queries: config.queries.clone(),
            keys,
            settings_sql: config.settings_sql.clone(),
            text_keys: Mutex::new(HashMap::new()),
        })
    }

    async fn client(&self, context: &str) -> Result<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, context))
    }

    /// Which key columns of `kind` have a text type, read from the
    /// prepared query's result columns.
    async fn text_key_columns(
        &self,
        client: &deadpool_postgres::Object,
        kind: EntityKind,
        sql: &str,
        key: &[String],
    ) -> Result<Vec<bool>> {
        let cached = self
            .text_keys
            .lock()
            .map_err(|_| MigrateError::source("key type cache poisoned"))?
            .get(&kind)
            .cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let stmt = client
            .prepare(&format!("SELECT * FROM ({}) src", strip_statement(sql)))
            .await?;
        let text = key
            .iter()
            .map(|column| {
                stmt.columns()
                    .iter()
                    .find(|c| c.name() == column.as_str())
                    .map(|c| is_text_type(c.type_().name()))
                    .ok_or_else(|| {
                        MigrateError::source(format!(
                            "{}: key column '{}' is not in the query result",
                            kind, column
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!("{}: text key columns {:?}", kind, text);

        self.text_keys
            .lock()
            .map_err(|_| MigrateError::source("key type cache poisoned"))?
            .insert(kind, text.clone());
        Ok(text)
    }
}

fn is_text_type(type_name: &str) -> bool {
    matches!(type_name, "text" | "varchar" | "bpchar" | "name")
}

/// A cursor part bound as a query parameter.
#[derive(Debug)]
enum CursorParam {
    Int(i64),
    Text(String),
}

impl CursorParam {
    fn cast(&self) -> &'static str {
        match self {
            CursorParam::Int(_) => "bigint",
            CursorParam::Text(_) => "text",
        }
    }

    fn as_sql(&self) -> &(dyn ToSql + Sync) {
        match self {
            CursorParam::Int(v) => v,
            CursorParam::Text(s) => s,
        }
    }
}

fn cursor_params(cursor: &ExternalId, key: &[String]) -> Result<Vec<CursorParam>> {
    let parts = cursor.parts();
    if parts.len() != key.len() {
        return Err(MigrateError::source(format!(
            "cursor {} has {} parts but the key has {} columns",
            cursor,
            parts.len(),
            key.len()
        )));
    }
    parts
        .into_iter()
        .map(|part| match part {
            ExternalId::Int(v) => Ok(CursorParam::Int(*v)),
            ExternalId::Text(s) => Ok(CursorParam::Text(s.clone())),
            ExternalId::Composite(_) => Err(MigrateError::source(format!(
                "nested composite cursor {}",
                cursor
            ))),
        })
        .collect()
}

fn strip_statement(sql: &str) -> &str {
    sql.trim().trim_end_matches(';').trim_end()
}

/// Keyset page query for `sql` ordered by `key`. `text_key[i]` marks key
/// column `i` as text, compared in byte order.
fn page_sql(
    sql: &str,
    key: &[String],
    text_key: &[bool],
    cursor: Option<&[CursorParam]>,
    limit: usize,
) -> Result<String> {
    let columns = key
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let column = quote_ident(c)?;
            Ok(if text_key.get(i).copied().unwrap_or(false) {
                format!("{} COLLATE \"C\"", column)
            } else {
                column
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let order = columns.join(", ");
    let inner = strip_statement(sql);

    Ok(match cursor {
        None => format!(
            "SELECT * FROM ({}) src ORDER BY {} LIMIT {}",
            inner, order, limit
        ),
        Some(params) => {
            let placeholders = params
                .iter()
                .enumerate()
                .map(|(i, p)| format!("${}::{}", i + 1, p.cast()))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "SELECT * FROM ({}) src WHERE ({}) > ({}) ORDER BY {} LIMIT {}",
                inner, order, placeholders, order, limit
            )
        }
    })
}

fn count_sql(sql: &str) -> String {
    format!("SELECT COUNT(*) FROM ({}) src", strip_statement(sql))
}

/// Convert a PostgreSQL column value by its type name.
///
/// Types without a native mapping are read as text when the driver allows
/// it and become NULL otherwise. Cast such columns in the query.
fn convert_value(row: &Row, idx: usize, type_name: &str) -> FieldValue {
    match type_name {
        "bool" => row
            .try_get::<_, Option<bool>>(idx)
            .ok()
            .flatten()
            .map(FieldValue::Bool),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)
            .ok()
            .flatten()
            .map(|v| FieldValue::Int(v.into())),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)
            .ok()
            .flatten()
            .map(|v| FieldValue::Int(v.into())),
        "int8" => row
            .try_get::<_, Option<i64>>(idx)
            .ok()
            .flatten()
            .map(FieldValue::Int),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)
            .ok()
            .flatten()
            .map(|v| FieldValue::Float(v.into())),
        "float8" => row
            .try_get::<_, Option<f64>>(idx)
            .ok()
            .flatten()
            .map(FieldValue::Float),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .ok()
            .flatten()
            .map(|v| FieldValue::Timestamp(v.and_utc())),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .ok()
            .flatten()
            .map(FieldValue::Timestamp),
        "date" => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .ok()
            .flatten()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|v| FieldValue::Timestamp(v.and_utc())),
        _ => row
            .try_get::<_, Option<String>>(idx)
            .ok()
            .flatten()
            .map(FieldValue::Text),
    }
    .unwrap_or(FieldValue::Null)
}

fn convert_row(row: &Row, key: &[String]) -> Result<SourceRow> {
    let mut fields = BTreeMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        fields.insert(
            column.name().to_string(),
            convert_value(row, idx, column.type_().name()),
        );
    }
    SourceRow::keyed(fields, key).map_err(MigrateError::Source)
}

#[async_trait]
impl SourceAdapter for PgSource {
    async fn count(&self, kind: EntityKind) -> Result<u64> {
        let Some(query) = self.queries.get(&kind) else {
            return Ok(0);
        };
        let client = self.client("counting source rows").await?;
        let row = client.query_one(&count_sql(&query.sql), &[]).await?;
        Ok(row.get::<_, i64>(0).max(0) as u64)
    }

    async fn fetch(
        &self,
        kind: EntityKind,
        cursor: Option<&ExternalId>,
        limit: usize,
    ) -> Result<(Vec<SourceRow>, Option<ExternalId>)> {
        let (Some(query), Some(key)) = (self.queries.get(&kind), self.keys.get(&kind)) else {
            debug!("{}: no source query configured", kind);
            return Ok((Vec::new(), None));
        };

        let client = self.client("fetching source batch").await?;
        let text_key = self.text_key_columns(&client, kind, &query.sql, key).await?;

        let params = cursor.map(|c| cursor_params(c, key)).transpose()?;
        let sql = page_sql(&query.sql, key, &text_key, params.as_deref(), limit)?;
        let bound: Vec<&(dyn ToSql + Sync)> = params
            .as_ref()
            .map(|ps| ps.iter().map(CursorParam::as_sql).collect())
            .unwrap_or_default();

        let rows = client.query(&sql, &bound).await?;

        let rows = rows
            .iter()
            .map(|row| convert_row(row, key))
            .collect::<Result<Vec<_>>>()?;
        let next = rows.last().map(|row| row.external_id.clone());
        Ok((rows, next))
    }

    async fn config_values(&self) -> Result<HashMap<String, String>> {
        let client = self.client("reading source settings").await?;
        let mut values = HashMap::new();

        let version = client.query_one("SHOW server_version", &[]).await?;
        values.insert("server_version".to_string(), version.get::<_, String>(0));

        if let Some(sql) = &self.settings_sql {
            for row in client.query(strip_statement(sql), &[]).await? {
                let name: Option<String> = row.try_get(0)?;
                let value: Option<String> = row.try_get(1)?;
                if let Some(name) = name {
                    values.insert(name, value.unwrap_or_default());
                }
            }
        }
        Ok(values)
    }

    fn source_type(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_first_page_has_no_predicate() {
        let sql =
            page_sql("SELECT id, name FROM users;", &key(&["id"]), &[false], None, 500).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT id, name FROM users) src ORDER BY \"id\" LIMIT 500"
        );
    }

    #[test]
    fn test_composite_cursor_predicate() {
        let cursor = ExternalId::composite([ExternalId::Int(3), ExternalId::from("b")]);
        let k = key(&["group_id", "user_name"]);
        let params = cursor_params(&cursor, &k).unwrap();
        let sql = page_sql("SELECT * FROM m", &k, &[false, true], Some(&params), 10).unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM (SELECT * FROM m) src \
             WHERE (\"group_id\", \"user_name\" COLLATE \"C\") > ($1::bigint, $2::text) \
             ORDER BY \"group_id\", \"user_name\" COLLATE \"C\" LIMIT 10"
        );
    }

    #[test]
    fn test_text_key_pages_in_byte_order() {
        // "B" sorts before "a" in byte order, as ExternalId ordering does.
        assert!(ExternalId::from("B") < ExternalId::from("a"));

        let k = key(&["slug"]);
        let first = page_sql("SELECT * FROM tags", &k, &[true], None, 1).unwrap();
        assert_eq!(
            first,
            "SELECT * FROM (SELECT * FROM tags) src ORDER BY \"slug\" COLLATE \"C\" LIMIT 1"
        );

        let params = cursor_params(&ExternalId::from("B"), &k).unwrap();
        let next = page_sql("SELECT * FROM tags", &k, &[true], Some(&params), 1).unwrap();
        assert!(next.contains("WHERE (\"slug\" COLLATE \"C\") > ($1::text)"));
        assert!(next.ends_with("ORDER BY \"slug\" COLLATE \"C\" LIMIT 1"));
    }

    #[test]
    fn test_text_type_names() {
        assert!(is_text_type("varchar"));
        assert!(is_text_type("text"));
        assert!(!is_text_type("int4"));
    }

    #[test]
    fn test_cursor_arity_must_match_key() {
        let cursor = ExternalId::Int(3);
        assert!(cursor_params(&cursor, &key(&["a", "b"])).is_err());
    }

    #[test]
    fn test_count_sql() {
        assert_eq!(
            count_sql("SELECT id FROM posts ; "),
            "SELECT COUNT(*) FROM (SELECT id FROM posts) src"
        );
    }
}
