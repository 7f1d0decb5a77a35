//! Process-local mapping store.
//!
//! Used for dry runs (seeded from the real backend so already-imported
//! records still resolve) and in tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::backend::{IdentityMapping, InsertOutcome, RegistryBackend};
use crate::core::EntityKind;
use crate::error::{MigrateError, Result};

#[derive(Default)]
pub struct MemoryBackend {
    mappings: Mutex<HashMap<(EntityKind, String), IdentityMapping>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a copy of existing mappings. Later entries win.
    pub fn seeded(mappings: Vec<IdentityMapping>) -> Self {
        let map = mappings
            .into_iter()
            .map(|m| ((m.kind, m.key.clone()), m))
            .collect();
        Self {
            mappings: Mutex::new(map),
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<(EntityKind, String), IdentityMapping>>> {
        self.mappings
            .lock()
            .map_err(|_| MigrateError::registry("memory registry lock poisoned"))
    }
}

#[async_trait]
impl RegistryBackend for MemoryBackend {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<IdentityMapping>> {
        let mut mappings: Vec<IdentityMapping> = self
            .lock()?
            .values()
            .cloned()
            .collect();
        mappings.sort_by(|a, b| (a.kind, &a.key).cmp(&(b.kind, &b.key)));
        Ok(mappings)
    }

    async fn insert(&self, mapping: &IdentityMapping) -> Result<InsertOutcome> {
        let mut map = self.lock()?;
        let slot = (mapping.kind, mapping.key.clone());
        if let Some(existing) = map.get(&slot) {
            return Ok(InsertOutcome::Existing(existing.internal_id));
        }
        map.insert(slot, mapping.clone());
        Ok(InsertOutcome::Inserted)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
