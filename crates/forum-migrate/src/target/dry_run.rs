//! Target that creates nothing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use crate::core::{EntityKind, InternalId, TargetCreator};
use crate::error::CreateError;
use crate::mapper::MappedRequest;

/// Assigns sequential ids and counts what would have been created.
#[derive(Debug)]
pub struct DryRunTarget {
    next_id: AtomicI64,
    created: Mutex<BTreeMap<EntityKind, u64>>,
}

impl DryRunTarget {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            created: Mutex::new(BTreeMap::new()),
        }
    }

    /// Objects that would have been created per kind.
    pub fn created(&self) -> BTreeMap<EntityKind, u64> {
        self.created
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Default for DryRunTarget {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TargetCreator for DryRunTarget {
    async fn create(
        &self,
        kind: EntityKind,
        _request: &MappedRequest,
    ) -> Result<InternalId, CreateError> {
        if let Ok(mut created) = self.created.lock() {
            *created.entry(kind).or_default() += 1;
        }
        Ok(InternalId(self.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn target_type(&self) -> &'static str {
        "dry-run"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequential_ids_and_counts() {
        let target = DryRunTarget::new();
        let request = MappedRequest::new();
        assert_eq!(
            target.create(EntityKind::User, &request).await.unwrap(),
            InternalId(1)
        );
        assert_eq!(
            target.create(EntityKind::User, &request).await.unwrap(),
            InternalId(2)
        );
        target.create(EntityKind::Post, &request).await.unwrap();

        let created = target.created();
        assert_eq!(created[&EntityKind::User], 2);
        assert_eq!(created[&EntityKind::Post], 1);
    }
}
