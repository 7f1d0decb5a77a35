//! Configuration type definitions.

use crate::core::EntityKind;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Legacy data source.
    pub source: SourceConfig,

    /// Target system creation API.
    pub target: TargetConfig,

    /// Where identifier mappings are persisted.
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Import behavior.
    #[serde(default)]
    pub import: ImportConfig,
}

/// PostgreSQL connection settings, shared by the source and registry.
#[derive(Clone, Serialize, Deserialize)]
pub struct PgConnectionConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode: disable, require, verify-ca, verify-full (default: "disable").
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl fmt::Debug for PgConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Kind of legacy source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Live PostgreSQL database queried with keyset pagination.
    #[default]
    Postgres,
    /// Directory of JSON-lines exports, one file per entity kind.
    Dump,
}

/// Source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source type (default: postgres).
    #[serde(default)]
    pub r#type: SourceType,

    /// Connection settings for `type: postgres`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PgConnectionConfig>,

    /// Export directory for `type: dump`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dump_dir: Option<PathBuf>,

    /// Per-kind row queries for `type: postgres`.
    #[serde(default)]
    pub queries: BTreeMap<EntityKind, EntityQuery>,

    /// Query returning (name, value) pairs of source-system settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_sql: Option<String>,
}

/// How rows of one kind are selected from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityQuery {
    /// SELECT statement producing the columns the mapper reads.
    pub sql: String,

    /// Columns forming the external id, in cursor order. Defaults to
    /// `[id]`, or the natural pair for join tables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
}

impl SourceConfig {
    /// Key columns for a kind: configured, or the kind's default.
    pub fn key_columns(&self, kind: EntityKind) -> Vec<String> {
        match self.queries.get(&kind) {
            Some(query) if !query.key.is_empty() => query.key.clone(),
            _ => kind.default_key().iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Target creation API configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Base URL of the import API; objects are POSTed to `{base_url}/{collection}`.
    pub base_url: String,

    /// API key sent in the `Api-Key` header.
    #[serde(default)]
    pub api_key: String,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient failures before the target counts as unavailable (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries in milliseconds, multiplied by the attempt (default: 500).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

/// Identifier registry storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryBackendKind {
    /// Append-only JSON-lines file.
    #[default]
    Journal,
    /// Table in a PostgreSQL database.
    Postgres,
    /// In-memory only. Nothing survives the process.
    Memory,
}

/// Identifier registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Storage backend (default: journal).
    #[serde(default)]
    pub backend: RegistryBackendKind,

    /// Journal file path (default: "id_map.jsonl").
    #[serde(default = "default_journal_path")]
    pub path: PathBuf,

    /// Connection settings for `backend: postgres`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PgConnectionConfig>,

    /// Schema holding the mapping table (default: "_forum_migrate").
    #[serde(default = "default_registry_schema")]
    pub schema: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: RegistryBackendKind::default(),
            path: default_journal_path(),
            postgres: None,
            schema: default_registry_schema(),
        }
    }
}

/// Where a group of source categories lands in the target hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMapping {
    /// Source category ids covered by this entry.
    #[serde(default)]
    pub source_ids: Vec<String>,

    /// Target path, root first. Empty for skip entries.
    #[serde(default)]
    pub path: Vec<String>,

    /// Drop these categories (and everything posted in them).
    #[serde(default)]
    pub skip: bool,
}

/// Import behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Rows per source batch (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Prepended to every external id in the registry so several sources,
    /// or a deliberate re-import, do not collide.
    #[serde(default)]
    pub id_prefix: String,

    /// Import anonymous post authors as users (default: false).
    #[serde(default)]
    pub import_anonymous_users: bool,

    /// Import private messages (default: true).
    #[serde(default = "default_true")]
    pub import_private_messages: bool,

    /// Import bookmarks (default: true).
    #[serde(default = "default_true")]
    pub import_bookmarks: bool,

    /// Abort once more than this many rows have failed. Unlimited if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_row_errors: Option<usize>,

    /// Source group types that are never imported.
    #[serde(default)]
    pub excluded_group_types: Vec<String>,

    /// Category relocation and skip directives.
    #[serde(default)]
    pub category_mappings: Vec<CategoryMapping>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            id_prefix: String::new(),
            import_anonymous_users: false,
            import_private_messages: true,
            import_bookmarks: true,
            max_row_errors: None,
            excluded_group_types: Vec::new(),
            category_mappings: Vec::new(),
        }
    }
}

impl ImportConfig {
    /// Whether the stage for `kind` runs. Only the optional stages can be off.
    pub fn stage_enabled(&self, kind: EntityKind) -> bool {
        match kind {
            EntityKind::AnonymousUser => self.import_anonymous_users,
            EntityKind::Message => self.import_private_messages,
            EntityKind::Bookmark => self.import_bookmarks,
            _ => true,
        }
    }

    /// Source category ids named by skip directives.
    pub fn skipped_category_ids(&self) -> HashSet<String> {
        self.category_mappings
            .iter()
            .filter(|m| m.skip)
            .flat_map(|m| m.source_ids.iter().cloned())
            .collect()
    }

    /// Mappings that place categories in the target hierarchy.
    pub fn placement_mappings(&self) -> impl Iterator<Item = &CategoryMapping> {
        self.category_mappings.iter().filter(|m| !m.skip)
    }
}

// Default value functions for serde
fn default_pg_port() -> u16 {
    5432
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("id_map.jsonl")
}

fn default_registry_schema() -> String {
    "_forum_migrate".to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_true() -> bool {
    true
}
