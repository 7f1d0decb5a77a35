//! Category imports, run through a [`HierarchyPass`] so parents exist
//! before their children.
//!
//! Two passes use this:
//! - mapped categories, built from configured name paths
//! - source categories, whose paths are their parent chains

use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use super::{BatchImporter, BatchOutcome, RowOutcome};
use crate::config::CategoryMapping;
use crate::core::{EntityKind, ExternalId, InternalId, SourceRow};
use crate::error::{ImportError, Result, RowError};
use crate::hierarchy::{CategoryPath, HierarchyPass, ParentSlot};
use crate::mapper::{mapped_category_request, EntityMapper, MapOutcome};
use crate::registry::IdentifierRegistry;

/// Outcome of the source category pass.
#[derive(Debug, Default)]
pub struct CategoryTreeOutcome {
    pub outcome: BatchOutcome,
    /// Source ids not imported because they or an ancestor were skipped.
    pub skipped_ids: Vec<String>,
}

impl BatchImporter {
    /// Create the categories named by placement mappings, ancestors first.
    ///
    /// Each full path also records the mapping's source ids as category
    /// aliases, so those source categories resolve to it.
    pub async fn import_mapped_categories<'a, I>(
        &self,
        mappings: I,
        registry: &mut IdentifierRegistry,
    ) -> Result<BatchOutcome>
    where
        I: IntoIterator<Item = &'a CategoryMapping>,
    {
        let kind = EntityKind::MappedCategory;
        let mut aliases: HashMap<CategoryPath, Vec<String>> = HashMap::new();
        for mapping in mappings {
            aliases
                .entry(CategoryPath::new(mapping.path.iter().cloned()))
                .or_default()
                .extend(mapping.source_ids.iter().cloned());
        }

        let mut pass = HierarchyPass::new(aliases.keys().cloned());
        let mut outcome = BatchOutcome::default();
        let order = pass.order().to_vec();

        for path in order {
            let external_id = path.external_id();
            let source_ids = aliases.get(&path).map(Vec::as_slice).unwrap_or(&[]);

            if let Some(id) = registry.lookup(kind, &external_id) {
                // A crash between create and alias registration leaves the
                // aliases missing; registering again is a no-op otherwise.
                for source_id in source_ids {
                    registry
                        .register(EntityKind::Category, &ExternalId::Text(source_id.clone()), id)
                        .await?;
                }
                pass.record_created(&path, id);
                outcome.record(RowOutcome::AlreadyImported);
                continue;
            }

            let parent = match pass.parent_slot(&path) {
                ParentSlot::Root => None,
                ParentSlot::Resolved(id) => Some(id),
                ParentSlot::Unavailable(parent) | ParentSlot::Skipped(parent) => {
                    pass.record_failed(&path);
                    outcome.record(RowOutcome::Failed(ImportError::new(
                        kind,
                        &external_id,
                        RowError::ParentFailed(parent.joined()),
                    )));
                    continue;
                }
            };

            let name = path.leaf().unwrap_or_default();
            let request = mapped_category_request(name, parent, source_ids);
            let result = self.create(kind, &external_id, request, registry).await?;
            match &result {
                RowOutcome::Created(id) => {
                    debug!("created mapped category {} -> {}", path, id);
                    pass.record_created(&path, *id);
                }
                _ => pass.record_failed(&path),
            }
            outcome.record(result);
        }

        if outcome.created > 0 {
            info!("Created {} mapped categories", outcome.created);
        }
        Ok(outcome)
    }

    /// Import source categories ordered by their parent chains.
    pub async fn import_category_tree(
        &self,
        rows: &[SourceRow],
        mapper: &EntityMapper,
        registry: &mut IdentifierRegistry,
    ) -> Result<CategoryTreeOutcome> {
        let kind = EntityKind::Category;
        let mut result = CategoryTreeOutcome::default();

        let by_id: BTreeMap<String, &SourceRow> = rows
            .iter()
            .map(|row| (row.external_id.to_string(), row))
            .collect();

        let mut paths = Vec::with_capacity(rows.len());
        let mut seeds: Vec<(CategoryPath, InternalId)> = Vec::new();
        for row in rows {
            match parent_chain(row, &by_id, registry) {
                Ok(chain) => {
                    if let Some(seed) = chain.seed {
                        seeds.push(seed);
                    }
                    paths.push(chain.path);
                }
                Err(cause) => result.outcome.record(RowOutcome::Failed(ImportError::new(
                    kind,
                    &row.external_id,
                    cause,
                ))),
            }
        }

        let mut pass = HierarchyPass::new(paths);
        for (path, id) in &seeds {
            pass.record_created(path, *id);
        }
        let order = pass.order().to_vec();

        for path in order {
            if pass.is_settled(&path) {
                continue;
            }
            let Some(leaf) = path.leaf() else { continue };
            let Some(row) = by_id.get(leaf).copied() else {
                continue;
            };
            let external_id = &row.external_id;

            if let Some(id) = registry.lookup(kind, external_id) {
                pass.record_created(&path, id);
                result.outcome.record(RowOutcome::AlreadyImported);
                continue;
            }

            let parent = match pass.parent_slot(&path) {
                ParentSlot::Root => None,
                ParentSlot::Resolved(id) => Some(id),
                ParentSlot::Skipped(parent) => {
                    pass.record_skipped(&path);
                    result.skipped_ids.push(leaf.to_string());
                    result.outcome.record(RowOutcome::Skipped(format!(
                        "parent category {} is skipped",
                        parent.leaf().unwrap_or_default()
                    )));
                    continue;
                }
                ParentSlot::Unavailable(parent) => {
                    pass.record_failed(&path);
                    result.outcome.record(RowOutcome::Failed(ImportError::new(
                        kind,
                        external_id,
                        RowError::ParentFailed(parent.leaf().unwrap_or_default().to_string()),
                    )));
                    continue;
                }
            };

            match mapper.map(row, &*registry) {
                Err(cause) => {
                    pass.record_failed(&path);
                    result
                        .outcome
                        .record(RowOutcome::Failed(ImportError::new(kind, external_id, cause)));
                }
                Ok(MapOutcome::Skip(reason)) => {
                    pass.record_skipped(&path);
                    result.skipped_ids.push(leaf.to_string());
                    result.outcome.record(RowOutcome::Skipped(reason));
                }
                Ok(MapOutcome::Create(request)) => {
                    let request =
                        request.opt_attr("parent_category_id", parent.map(|p| p.0));
                    let created = self.create(kind, external_id, request, registry).await?;
                    match &created {
                        RowOutcome::Created(id) => pass.record_created(&path, *id),
                        _ => pass.record_failed(&path),
                    }
                    result.outcome.record(created);
                }
            }
        }

        Ok(result)
    }
}

struct Chain {
    path: CategoryPath,
    /// Parent outside this source set that is already imported.
    seed: Option<(CategoryPath, InternalId)>,
}

/// Legacy schemas mark root categories with a NULL, 0 or empty parent.
fn parent_of(row: &SourceRow) -> Option<ExternalId> {
    row.reference("parent_id").filter(|parent| {
        let text = parent.to_string();
        text != "0" && text != row.external_id.to_string()
    })
}

fn parent_chain(
    row: &SourceRow,
    by_id: &BTreeMap<String, &SourceRow>,
    registry: &IdentifierRegistry,
) -> std::result::Result<Chain, RowError> {
    let mut segments = vec![row.external_id.to_string()];
    let mut visited: HashSet<String> = segments.iter().cloned().collect();
    let mut current = row;
    let mut seed = None;

    while let Some(parent) = parent_of(current) {
        let key = parent.to_string();
        if !visited.insert(key.clone()) {
            return Err(RowError::mapping(format!(
                "category parent chain loops at {}",
                key
            )));
        }
        match by_id.get(&key) {
            Some(parent_row) => {
                segments.push(key);
                current = *parent_row;
            }
            None => {
                let id = registry
                    .lookup(EntityKind::Category, &parent)
                    .ok_or_else(|| RowError::missing(EntityKind::Category, &parent))?;
                segments.push(key.clone());
                seed = Some((CategoryPath::new([key]), id));
                break;
            }
        }
    }

    segments.reverse();
    Ok(Chain {
        path: CategoryPath::new(segments),
        seed,
    })
}

#[cfg(test)]
mod tests {
    use super::super::testing::RecordingTarget;
    use super::*;
    use crate::config::ImportConfig;
    use crate::registry::MemoryBackend;
    use std::sync::Arc;

    fn category(id: i64, name: &str, parent: Option<i64>) -> SourceRow {
        let row = SourceRow::new(ExternalId::Int(id), Default::default())
            .with("id", id)
            .with("name", name);
        match parent {
            Some(parent) => row.with("parent_id", parent),
            None => row,
        }
    }

    async fn registry() -> IdentifierRegistry {
        IdentifierRegistry::open(Arc::new(MemoryBackend::new()), "")
            .await
            .unwrap()
    }

    fn placement(ids: &[&str], path: &[&str]) -> CategoryMapping {
        CategoryMapping {
            source_ids: ids.iter().map(|s| s.to_string()).collect(),
            path: path.iter().map(|s| s.to_string()).collect(),
            skip: false,
        }
    }

    fn mapper(config: &ImportConfig) -> EntityMapper {
        EntityMapper::for_kind(EntityKind::Category, config).unwrap()
    }

    #[tokio::test]
    async fn test_mapped_categories_created_parent_first() {
        let target = Arc::new(RecordingTarget::default());
        let importer = BatchImporter::new(target.clone());
        let mut registry = registry().await;

        let mappings = vec![
            placement(&["5"], &["A", "B"]),
            placement(&["6"], &["A", "B", "C"]),
            placement(&["7"], &["A", "D"]),
        ];
        let outcome = importer
            .import_mapped_categories(&mappings, &mut registry)
            .await
            .unwrap();
        assert_eq!(outcome.created, 4);

        let requests = target.requests.lock().unwrap();
        let names: Vec<&str> = requests
            .iter()
            .map(|(_, r)| r.get("name").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["A", "B", "D", "C"]);

        // B's parent is A; C's parent is B.
        let id_a = registry
            .lookup(EntityKind::MappedCategory, &CategoryPath::new(["A"]).external_id())
            .unwrap();
        assert_eq!(requests[1].1.get_i64("parent_category_id"), Some(id_a.0));

        let id_c = registry
            .lookup(
                EntityKind::MappedCategory,
                &CategoryPath::new(["A", "B", "C"]).external_id(),
            )
            .unwrap();
        assert_eq!(
            registry.lookup(EntityKind::Category, &ExternalId::Int(6)),
            Some(id_c)
        );
    }

    #[tokio::test]
    async fn test_mapped_categories_are_idempotent() {
        let target = Arc::new(RecordingTarget::default());
        let importer = BatchImporter::new(target.clone());
        let mut registry = registry().await;
        let mappings = vec![placement(&["5"], &["A", "B"])];

        importer
            .import_mapped_categories(&mappings, &mut registry)
            .await
            .unwrap();
        let second = importer
            .import_mapped_categories(&mappings, &mut registry)
            .await
            .unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.already_imported, 2);
        assert_eq!(target.count(EntityKind::MappedCategory), 2);
    }

    #[tokio::test]
    async fn test_source_tree_orders_parents_first() {
        let target = Arc::new(RecordingTarget::default());
        let importer = BatchImporter::new(target.clone());
        let mut registry = registry().await;

        let rows = vec![
            category(3, "Child", Some(2)),
            category(1, "Root", Some(0)),
            category(2, "Middle", Some(1)),
        ];
        let result = importer
            .import_category_tree(&rows, &mapper(&ImportConfig::default()), &mut registry)
            .await
            .unwrap();
        assert_eq!(result.outcome.created, 3);

        let requests = target.requests.lock().unwrap();
        let names: Vec<&str> = requests
            .iter()
            .map(|(_, r)| r.get("name").unwrap().as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Root", "Middle", "Child"]);
        assert!(requests[0].1.get("parent_category_id").is_none());

        let middle = registry.lookup(EntityKind::Category, &ExternalId::Int(2)).unwrap();
        assert_eq!(requests[2].1.get_i64("parent_category_id"), Some(middle.0));
    }

    #[tokio::test]
    async fn test_failed_parent_fails_descendants() {
        let target = Arc::new(RecordingTarget::default());
        let importer = BatchImporter::new(target.clone());
        let mut registry = registry().await;

        // Category 1 has no name, so it cannot be mapped.
        let rows = vec![
            SourceRow::new(ExternalId::Int(1), Default::default()).with("id", 1),
            category(2, "Middle", Some(1)),
            category(3, "Leaf", Some(2)),
            category(4, "Other", None),
        ];
        let result = importer
            .import_category_tree(&rows, &mapper(&ImportConfig::default()), &mut registry)
            .await
            .unwrap();

        assert_eq!(result.outcome.created, 1);
        assert_eq!(result.outcome.failed, 3);
        let causes: Vec<&str> = result
            .outcome
            .errors
            .iter()
            .map(|e| e.cause.class())
            .collect();
        assert_eq!(causes, vec!["mapping", "parent_failed", "parent_failed"]);
        assert_eq!(target.count(EntityKind::Category), 1);
    }

    #[tokio::test]
    async fn test_skip_directive_covers_descendants() {
        let target = Arc::new(RecordingTarget::default());
        let importer = BatchImporter::new(target.clone());
        let mut registry = registry().await;
        let config = ImportConfig {
            category_mappings: vec![CategoryMapping {
                source_ids: vec!["1".into()],
                path: vec![],
                skip: true,
            }],
            ..ImportConfig::default()
        };

        let rows = vec![
            category(1, "Spam", None),
            category(2, "More spam", Some(1)),
            category(3, "Real", None),
        ];
        let result = importer
            .import_category_tree(&rows, &mapper(&config), &mut registry)
            .await
            .unwrap();

        assert_eq!(result.outcome.created, 1);
        assert_eq!(result.outcome.skipped, 2);
        assert_eq!(result.skipped_ids, vec!["1".to_string(), "2".to_string()]);
        assert!(registry.lookup(EntityKind::Category, &ExternalId::Int(1)).is_none());
        assert!(registry.lookup(EntityKind::Category, &ExternalId::Int(2)).is_none());
    }

    #[tokio::test]
    async fn test_relocated_category_is_not_created() {
        let target = Arc::new(RecordingTarget::default());
        let importer = BatchImporter::new(target.clone());
        let mut registry = registry().await;
        let config = ImportConfig {
            category_mappings: vec![placement(&["1"], &["Support"])],
            ..ImportConfig::default()
        };

        importer
            .import_mapped_categories(config.placement_mappings(), &mut registry)
            .await
            .unwrap();
        let support = registry
            .lookup(EntityKind::MappedCategory, &CategoryPath::new(["Support"]).external_id())
            .unwrap();

        let rows = vec![category(1, "Old support", None), category(2, "Printers", Some(1))];
        let result = importer
            .import_category_tree(&rows, &mapper(&config), &mut registry)
            .await
            .unwrap();

        assert_eq!(result.outcome.already_imported, 1);
        assert_eq!(result.outcome.created, 1);
        let requests = target.requests.lock().unwrap();
        let (_, printers) = requests.last().unwrap();
        assert_eq!(printers.get_i64("parent_category_id"), Some(support.0));
    }

    #[tokio::test]
    async fn test_missing_parent_is_reported() {
        let target = Arc::new(RecordingTarget::default());
        let importer = BatchImporter::new(target);
        let mut registry = registry().await;

        let rows = vec![category(2, "Orphan", Some(99))];
        let result = importer
            .import_category_tree(&rows, &mapper(&ImportConfig::default()), &mut registry)
            .await
            .unwrap();
        assert_eq!(result.outcome.failed, 1);
        assert_eq!(result.outcome.errors[0].cause.class(), "missing_reference");
    }

    #[tokio::test]
    async fn test_parent_imported_earlier_is_used() {
        let target = Arc::new(RecordingTarget::default());
        let importer = BatchImporter::new(target.clone());
        let mut registry = registry().await;
        registry
            .register(EntityKind::Category, &ExternalId::Int(99), InternalId(5))
            .await
            .unwrap();

        let rows = vec![category(2, "Child", Some(99))];
        let result = importer
            .import_category_tree(&rows, &mapper(&ImportConfig::default()), &mut registry)
            .await
            .unwrap();
        assert_eq!(result.outcome.created, 1);
        let requests = target.requests.lock().unwrap();
        assert_eq!(requests[0].1.get_i64("parent_category_id"), Some(5));
    }
}
