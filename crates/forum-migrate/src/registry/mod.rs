//! Identifier registry: which source records already exist in the target.
//!
//! Every created object is recorded as `(kind, prefix + external id) ->
//! internal id`. The registry is the only durable record of what has been
//! imported, so it is consulted both to resolve cross-entity references and
//! to skip rows that a previous run already created.
//!
//! Writes go to the backend first and only then to the in-memory cache, so
//! a lookup never reports a mapping that would be lost in a crash.

mod backend;
mod journal;
mod memory;
mod postgres;

pub use backend::{IdentityMapping, InsertOutcome, RegistryBackend};
pub use journal::JournalBackend;
pub use memory::MemoryBackend;
pub use postgres::PgRegistryBackend;

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{RegistryBackendKind, RegistryConfig};
use crate::core::{EntityKind, ExternalId, IdLookup, InternalId};
use crate::error::{MigrateError, Result};

/// Build the backend named in the configuration.
pub async fn backend_from_config(config: &RegistryConfig) -> Result<Arc<dyn RegistryBackend>> {
    let backend: Arc<dyn RegistryBackend> = match config.backend {
        RegistryBackendKind::Journal => Arc::new(JournalBackend::new(&config.path)),
        RegistryBackendKind::Memory => Arc::new(MemoryBackend::new()),
        RegistryBackendKind::Postgres => {
            let pg = config.postgres.as_ref().ok_or_else(|| {
                MigrateError::Config("registry.postgres is required for backend: postgres".into())
            })?;
            let pool = crate::db::connect(pg, "registry")
                .await
                .map_err(MigrateError::into_registry)?;
            Arc::new(PgRegistryBackend::new(pool, config.schema.clone()))
        }
    };
    Ok(backend)
}

pub struct IdentifierRegistry {
    backend: Arc<dyn RegistryBackend>,
    prefix: String,
    cache: HashMap<EntityKind, HashMap<String, IdentityMapping>>,
}

impl IdentifierRegistry {
    /// Initialize the backend and load every stored mapping.
    ///
    /// Two stored mappings for the same key with different ids mean the
    /// store was tampered with or shared incorrectly; that is fatal.
    pub async fn open(backend: Arc<dyn RegistryBackend>, prefix: impl Into<String>) -> Result<Self> {
        backend.init().await?;
        let mappings = backend.load_all().await?;

        let mut cache: HashMap<EntityKind, HashMap<String, IdentityMapping>> = HashMap::new();
        for mapping in mappings {
            let by_key = cache.entry(mapping.kind).or_default();
            match by_key.get(&mapping.key) {
                Some(existing) if existing.internal_id != mapping.internal_id => {
                    return Err(MigrateError::DuplicateMapping {
                        kind: mapping.kind,
                        external_id: mapping.key,
                        existing: existing.internal_id,
                        attempted: mapping.internal_id,
                    });
                }
                Some(_) => {}
                None => {
                    by_key.insert(mapping.key.clone(), mapping);
                }
            }
        }

        let registry = Self {
            backend,
            prefix: prefix.into(),
            cache,
        };
        info!(
            "Identifier registry ({}) loaded {} mappings",
            registry.backend.backend_type(),
            registry.len()
        );
        Ok(registry)
    }

    /// Namespaced storage key for an external id.
    pub fn key(&self, external_id: &ExternalId) -> String {
        format!("{}{}", self.prefix, external_id)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn backend_type(&self) -> &'static str {
        self.backend.backend_type()
    }

    pub fn lookup(&self, kind: EntityKind, external_id: &ExternalId) -> Option<InternalId> {
        self.cache
            .get(&kind)
            .and_then(|by_key| by_key.get(&self.key(external_id)))
            .map(|mapping| mapping.internal_id)
    }

    pub fn contains(&self, kind: EntityKind, external_id: &ExternalId) -> bool {
        self.lookup(kind, external_id).is_some()
    }

    /// True iff every id already has a mapping.
    pub fn all_exist<'a, I>(&self, kind: EntityKind, external_ids: I) -> bool
    where
        I: IntoIterator<Item = &'a ExternalId>,
    {
        external_ids
            .into_iter()
            .all(|id| self.contains(kind, id))
    }

    /// Record a mapping durably.
    ///
    /// Registering the same mapping again is a no-op. A different internal
    /// id for an already-mapped key is a [`MigrateError::DuplicateMapping`].
    pub async fn register(
        &mut self,
        kind: EntityKind,
        external_id: &ExternalId,
        internal_id: InternalId,
    ) -> Result<()> {
        let key = self.key(external_id);

        if let Some(existing) = self.cache.get(&kind).and_then(|m| m.get(&key)) {
            if existing.internal_id == internal_id {
                return Ok(());
            }
            return Err(MigrateError::DuplicateMapping {
                kind,
                external_id: key,
                existing: existing.internal_id,
                attempted: internal_id,
            });
        }

        let mapping = IdentityMapping {
            kind,
            key,
            internal_id,
            prefix: self.prefix.clone(),
        };
        match self.backend.insert(&mapping).await? {
            InsertOutcome::Inserted => {}
            InsertOutcome::Existing(existing) if existing == internal_id => {}
            InsertOutcome::Existing(existing) => {
                // Someone else wrote this key since we loaded. Trust the store.
                let key = mapping.key.clone();
                self.cache.entry(kind).or_default().insert(
                    key.clone(),
                    IdentityMapping {
                        internal_id: existing,
                        ..mapping
                    },
                );
                return Err(MigrateError::DuplicateMapping {
                    kind,
                    external_id: key,
                    existing,
                    attempted: internal_id,
                });
            }
        }

        debug!("registered {} {} -> {}", kind, mapping.key, internal_id);
        self.cache
            .entry(kind)
            .or_default()
            .insert(mapping.key.clone(), mapping);
        Ok(())
    }

    /// Mapped ids of a kind registered under exactly this registry's prefix.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.cache
            .get(&kind)
            .map(|by_key| {
                by_key
                    .values()
                    .filter(|mapping| mapping.prefix == self.prefix)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Total mappings across all kinds and prefixes.
    pub fn len(&self) -> usize {
        self.cache.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every cached mapping, for seeding a dry-run copy.
    pub fn snapshot(&self) -> Vec<IdentityMapping> {
        let mut all: Vec<IdentityMapping> = self
            .cache
            .values()
            .flat_map(|by_key| by_key.values().cloned())
            .collect();
        all.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));
        all
    }
}

impl IdLookup for IdentifierRegistry {
    fn internal_id_for(&self, kind: EntityKind, external_id: &ExternalId) -> Option<InternalId> {
        self.lookup(kind, external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn memory_registry(prefix: &str) -> IdentifierRegistry {
        IdentifierRegistry::open(Arc::new(MemoryBackend::new()), prefix)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let mut registry = memory_registry("").await;
        let id = ExternalId::Int(7);

        assert_eq!(registry.lookup(EntityKind::User, &id), None);
        registry
            .register(EntityKind::User, &id, InternalId(70))
            .await
            .unwrap();
        assert_eq!(registry.lookup(EntityKind::User, &id), Some(InternalId(70)));
        assert_eq!(registry.lookup(EntityKind::Group, &id), None);
        assert_eq!(registry.count(EntityKind::User), 1);
    }

    #[tokio::test]
    async fn test_register_identical_is_noop() {
        let mut registry = memory_registry("").await;
        let id = ExternalId::from("abc");
        registry
            .register(EntityKind::Post, &id, InternalId(1))
            .await
            .unwrap();
        registry
            .register(EntityKind::Post, &id, InternalId(1))
            .await
            .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_register_conflict_is_duplicate_mapping() {
        let mut registry = memory_registry("").await;
        let id = ExternalId::Int(3);
        registry
            .register(EntityKind::Group, &id, InternalId(30))
            .await
            .unwrap();

        let err = registry
            .register(EntityKind::Group, &id, InternalId(31))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MigrateError::DuplicateMapping {
                existing: InternalId(30),
                attempted: InternalId(31),
                ..
            }
        ));
        assert_eq!(registry.lookup(EntityKind::Group, &id), Some(InternalId(30)));
    }

    #[tokio::test]
    async fn test_backend_conflict_is_detected() {
        // Another writer already stored the key; our cache has never seen it.
        let backend = Arc::new(MemoryBackend::new());
        let mut registry = IdentifierRegistry::open(backend.clone(), "").await.unwrap();
        backend
            .insert(&IdentityMapping {
                kind: EntityKind::User,
                key: "5".into(),
                internal_id: InternalId(50),
                prefix: String::new(),
            })
            .await
            .unwrap();

        let err = registry
            .register(EntityKind::User, &ExternalId::Int(5), InternalId(51))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_DUPLICATE_MAPPING);
        assert_eq!(
            registry.lookup(EntityKind::User, &ExternalId::Int(5)),
            Some(InternalId(50))
        );
    }

    #[tokio::test]
    async fn test_all_exist() {
        let mut registry = memory_registry("").await;
        let ids: Vec<ExternalId> = (1..=3).map(ExternalId::Int).collect();
        for (n, id) in ids.iter().take(2).enumerate() {
            registry
                .register(EntityKind::Post, id, InternalId(n as i64 + 100))
                .await
                .unwrap();
        }
        assert!(!registry.all_exist(EntityKind::Post, &ids));
        assert!(registry.all_exist(EntityKind::Post, &ids[..2]));

        registry
            .register(EntityKind::Post, &ids[2], InternalId(102))
            .await
            .unwrap();
        assert!(registry.all_exist(EntityKind::Post, &ids));
    }

    #[tokio::test]
    async fn test_prefix_namespaces_keys() {
        let backend: Arc<dyn RegistryBackend> = Arc::new(MemoryBackend::new());
        let mut first = IdentifierRegistry::open(backend.clone(), "siteA-")
            .await
            .unwrap();
        first
            .register(EntityKind::User, &ExternalId::Int(1), InternalId(10))
            .await
            .unwrap();

        let mut second = IdentifierRegistry::open(backend, "siteB-").await.unwrap();
        assert_eq!(second.lookup(EntityKind::User, &ExternalId::Int(1)), None);
        assert_eq!(second.count(EntityKind::User), 0);
        second
            .register(EntityKind::User, &ExternalId::Int(1), InternalId(11))
            .await
            .unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn test_count_matches_prefix_exactly() {
        let backend: Arc<dyn RegistryBackend> = Arc::new(MemoryBackend::new());
        let mut v10 = IdentifierRegistry::open(backend.clone(), "v10").await.unwrap();
        v10.register(EntityKind::User, &ExternalId::from("-7"), InternalId(1))
            .await
            .unwrap();
        let mut bare = IdentifierRegistry::open(backend.clone(), "").await.unwrap();
        bare.register(EntityKind::User, &ExternalId::Int(8), InternalId(2))
            .await
            .unwrap();

        let v1 = IdentifierRegistry::open(backend.clone(), "v1").await.unwrap();
        assert_eq!(v1.count(EntityKind::User), 0);
        let v10 = IdentifierRegistry::open(backend.clone(), "v10").await.unwrap();
        assert_eq!(v10.count(EntityKind::User), 1);
        let bare = IdentifierRegistry::open(backend, "").await.unwrap();
        assert_eq!(bare.count(EntityKind::User), 1);
        assert_eq!(bare.len(), 2);
    }

    #[tokio::test]
    async fn test_mappings_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.jsonl");
        let composite = ExternalId::composite([ExternalId::Int(2), ExternalId::Int(9)]);

        {
            let mut registry =
                IdentifierRegistry::open(Arc::new(JournalBackend::new(&path)), "")
                    .await
                    .unwrap();
            registry
                .register(EntityKind::GroupMembership, &composite, InternalId(5))
                .await
                .unwrap();
        }

        let registry = IdentifierRegistry::open(Arc::new(JournalBackend::new(&path)), "")
            .await
            .unwrap();
        assert_eq!(
            registry.internal_id_for(EntityKind::GroupMembership, &composite),
            Some(InternalId(5))
        );
    }

    #[tokio::test]
    async fn test_conflicting_journal_lines_fail_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ids.jsonl");
        std::fs::write(
            &path,
            "{\"kind\":\"user\",\"key\":\"1\",\"internal_id\":100}\n\
             {\"kind\":\"user\",\"key\":\"1\",\"internal_id\":101}\n",
        )
        .unwrap();

        let result = IdentifierRegistry::open(Arc::new(JournalBackend::new(&path)), "").await;
        assert!(matches!(result, Err(MigrateError::DuplicateMapping { .. })));
    }

    #[tokio::test]
    async fn test_snapshot_seeds_dry_run_copy() {
        let mut registry = memory_registry("").await;
        registry
            .register(EntityKind::Category, &ExternalId::Int(4), InternalId(40))
            .await
            .unwrap();

        let copy = IdentifierRegistry::open(
            Arc::new(MemoryBackend::seeded(registry.snapshot())),
            "",
        )
        .await
        .unwrap();
        assert_eq!(
            copy.lookup(EntityKind::Category, &ExternalId::Int(4)),
            Some(InternalId(40))
        );
        assert_eq!(copy.count(EntityKind::Category), 1);
    }
}
