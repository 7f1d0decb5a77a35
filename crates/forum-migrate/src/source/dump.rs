//! JSON-lines export directory as a source.
//!
//! Layout: one `<kind>.jsonl` file per entity kind (`user.jsonl`,
//! `group_membership.jsonl`, ...), each line a flat JSON object of column
//! values, plus an optional `settings.json` object. Missing files mean the
//! kind is empty. Rows are held in memory sorted by key.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

use crate::config::SourceConfig;
use crate::core::{EntityKind, ExternalId, FieldValue, SourceAdapter, SourceRow};
use crate::error::{MigrateError, Result};

#[derive(Debug, Default)]
pub struct DumpSource {
    rows: HashMap<EntityKind, Vec<SourceRow>>,
    settings: HashMap<String, String>,
}

impl DumpSource {
    /// Load every `<kind>.jsonl` in `dir`.
    pub fn open<P: AsRef<Path>>(dir: P, config: &SourceConfig) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(MigrateError::source(format!(
                "dump directory {} does not exist",
                dir.display()
            )));
        }

        let mut rows = HashMap::new();
        for kind in EntityKind::IMPORT_ORDER.into_iter().filter(|k| k.is_sourced()) {
            let path = dir.join(format!("{}.jsonl", kind.as_str()));
            if !path.exists() {
                continue;
            }
            let key = config.key_columns(kind);
            let loaded = read_jsonl(&path, &key)?;
            info!("Loaded {} {} rows from {}", loaded.len(), kind, path.display());
            rows.insert(kind, loaded);
        }

        let mut source = Self::from_rows(rows);
        let settings_path = dir.join("settings.json");
        if settings_path.exists() {
            source.settings = read_settings(&settings_path)?;
        }
        Ok(source)
    }

    /// Build a source from rows already in memory.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = (EntityKind, Vec<SourceRow>)>,
    {
        let mut by_kind: HashMap<EntityKind, Vec<SourceRow>> = HashMap::new();
        for (kind, mut batch) in rows {
            by_kind.entry(kind).or_default().append(&mut batch);
        }
        for rows in by_kind.values_mut() {
            rows.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        }
        Self {
            rows: by_kind,
            settings: HashMap::new(),
        }
    }

    pub fn with_settings(mut self, settings: HashMap<String, String>) -> Self {
        self.settings = settings;
        self
    }
}

fn read_jsonl(path: &Path, key: &[String]) -> Result<Vec<SourceRow>> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: BTreeMap<String, FieldValue> = serde_json::from_str(&line).map_err(|e| {
            MigrateError::source(format!("{}:{}: {}", path.display(), index + 1, e))
        })?;
        let row = SourceRow::keyed(fields, key).map_err(|e| {
            MigrateError::source(format!("{}:{}: {}", path.display(), index + 1, e))
        })?;
        rows.push(row);
    }
    Ok(rows)
}

fn read_settings(path: &Path) -> Result<HashMap<String, String>> {
    let content = std::fs::read_to_string(path)?;
    let values: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;
    Ok(values
        .into_iter()
        .map(|(name, value)| {
            let value = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (name, value)
        })
        .collect())
}

#[async_trait]
impl SourceAdapter for DumpSource {
    async fn count(&self, kind: EntityKind) -> Result<u64> {
        Ok(self.rows.get(&kind).map_or(0, Vec::len) as u64)
    }

    async fn fetch(
        &self,
        kind: EntityKind,
        cursor: Option<&ExternalId>,
        limit: usize,
    ) -> Result<(Vec<SourceRow>, Option<ExternalId>)> {
        let Some(rows) = self.rows.get(&kind) else {
            return Ok((Vec::new(), None));
        };
        let start = match cursor {
            Some(cursor) => rows.partition_point(|row| row.external_id <= *cursor),
            None => 0,
        };
        let page: Vec<SourceRow> = rows.iter().skip(start).take(limit).cloned().collect();
        let next = page.last().map(|row| row.external_id.clone());
        Ok((page, next))
    }

    async fn config_values(&self) -> Result<HashMap<String, String>> {
        Ok(self.settings.clone())
    }

    fn source_type(&self) -> &'static str {
        "dump"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceType;
    use tempfile::TempDir;

    fn dump_config(dir: &Path) -> SourceConfig {
        SourceConfig {
            r#type: SourceType::Dump,
            postgres: None,
            dump_dir: Some(dir.to_path_buf()),
            queries: BTreeMap::new(),
            settings_sql: None,
        }
    }

    #[tokio::test]
    async fn test_open_sorts_and_pages() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("user.jsonl"),
            "{\"id\": 3, \"username\": \"c\"}\n\n{\"id\": 1, \"username\": \"a\"}\n{\"id\": 2, \"username\": \"b\"}\n",
        )
        .unwrap();
        let source = DumpSource::open(dir.path(), &dump_config(dir.path())).unwrap();

        assert_eq!(source.count(EntityKind::User).await.unwrap(), 3);
        assert_eq!(source.count(EntityKind::Post).await.unwrap(), 0);

        let (first, cursor) = source.fetch(EntityKind::User, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].text("username"), Some("a"));
        assert_eq!(cursor, Some(ExternalId::Int(2)));

        let (rest, cursor) = source
            .fetch(EntityKind::User, cursor.as_ref(), 2)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(cursor, Some(ExternalId::Int(3)));

        let (done, _) = source
            .fetch(EntityKind::User, cursor.as_ref(), 2)
            .await
            .unwrap();
        assert!(done.is_empty());
    }

    #[tokio::test]
    async fn test_join_tables_use_composite_keys() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("group_membership.jsonl"),
            "{\"group_id\": 2, \"user_id\": 1}\n{\"group_id\": 1, \"user_id\": 5}\n",
        )
        .unwrap();
        let source = DumpSource::open(dir.path(), &dump_config(dir.path())).unwrap();
        let (rows, _) = source
            .fetch(EntityKind::GroupMembership, None, 10)
            .await
            .unwrap();
        assert_eq!(rows[0].external_id.to_string(), "1:5");
        assert_eq!(rows[1].external_id.to_string(), "2:1");
    }

    #[tokio::test]
    async fn test_bad_line_reports_location() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("post.jsonl"), "{\"id\": 1}\n{\"title\": \"x\"}\n").unwrap();
        let err = DumpSource::open(dir.path(), &dump_config(dir.path())).unwrap_err();
        assert!(err.to_string().contains("post.jsonl:2"));
    }

    #[tokio::test]
    async fn test_settings_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            "{\"board_version\": \"2.0.4\", \"max_posts\": 50}",
        )
        .unwrap();
        let source = DumpSource::open(dir.path(), &dump_config(dir.path())).unwrap();
        let values = source.config_values().await.unwrap();
        assert_eq!(values["board_version"], "2.0.4");
        assert_eq!(values["max_posts"], "50");
    }

    #[test]
    fn test_missing_dir_is_source_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = DumpSource::open(&missing, &dump_config(&missing)).unwrap_err();
        assert!(matches!(err, MigrateError::Source(_)));
    }
}
