//! Parent-before-child ordering for tree-shaped entities.
//!
//! Categories are described by paths: lists of segments from the root down
//! to the category itself. For configured mappings the segments are names
//! (`["Support", "Hardware"]`); for source categories they are the external
//! ids of the parent chain (`["1", "4", "12"]`). Either way the pass
//! expands every path into its prefixes, deduplicates them and orders them
//! by `(length, joined path)`, which puts every ancestor before its
//! descendants.
//!
//! A [`HierarchyPass`] also owns the `path -> internal id` table for one
//! pass. It is not persisted; the identifier registry is.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use crate::core::{ExternalId, InternalId};

/// Root-first list of segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CategoryPath(Vec<String>);

impl CategoryPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Last segment.
    pub fn leaf(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// The path one level up. `None` at depth 1.
    pub fn parent(&self) -> Option<CategoryPath> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(CategoryPath(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Every non-empty prefix, shortest first, ending with the path itself.
    pub fn prefixes(&self) -> impl Iterator<Item = CategoryPath> + '_ {
        (1..=self.0.len()).map(move |n| CategoryPath(self.0[..n].to_vec()))
    }

    pub fn joined(&self) -> String {
        self.0.join("/")
    }

    /// Registry key for a category created from this path.
    pub fn external_id(&self) -> ExternalId {
        ExternalId::composite(self.0.iter().cloned().map(ExternalId::Text))
    }

    fn sort_key(&self) -> (usize, String) {
        (self.0.len(), self.joined())
    }
}

impl fmt::Display for CategoryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Expand, deduplicate and order paths so ancestors come first.
pub fn creation_order<I>(paths: I) -> Vec<CategoryPath>
where
    I: IntoIterator<Item = CategoryPath>,
{
    let mut keyed: BTreeSet<((usize, String), Vec<String>)> = BTreeSet::new();
    for path in paths {
        for prefix in path.prefixes() {
            keyed.insert((prefix.sort_key(), prefix.0));
        }
    }
    keyed
        .into_iter()
        .map(|(_, segments)| CategoryPath(segments))
        .collect()
}

/// Where a path's parent stands in the current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentSlot {
    /// Depth 1: create at the root.
    Root,
    /// Parent exists with this internal id.
    Resolved(InternalId),
    /// Parent could not be created. The path must not be created either.
    Unavailable(CategoryPath),
    /// Parent was skipped on purpose.
    Skipped(CategoryPath),
}

#[derive(Debug, Default)]
pub struct HierarchyPass {
    order: Vec<CategoryPath>,
    created: HashMap<CategoryPath, InternalId>,
    failed: HashSet<CategoryPath>,
    skipped: HashSet<CategoryPath>,
}

impl HierarchyPass {
    pub fn new<I>(paths: I) -> Self
    where
        I: IntoIterator<Item = CategoryPath>,
    {
        Self {
            order: creation_order(paths),
            ..Self::default()
        }
    }

    /// Paths in creation order.
    pub fn order(&self) -> &[CategoryPath] {
        &self.order
    }

    pub fn parent_slot(&self, path: &CategoryPath) -> ParentSlot {
        let Some(parent) = path.parent() else {
            return ParentSlot::Root;
        };
        if let Some(id) = self.created.get(&parent) {
            return ParentSlot::Resolved(*id);
        }
        if self.skipped.contains(&parent) {
            return ParentSlot::Skipped(parent);
        }
        // Failed, or never reached because of an earlier error.
        ParentSlot::Unavailable(parent)
    }

    pub fn record_created(&mut self, path: &CategoryPath, id: InternalId) {
        self.created.insert(path.clone(), id);
    }

    pub fn record_failed(&mut self, path: &CategoryPath) {
        self.failed.insert(path.clone());
    }

    pub fn record_skipped(&mut self, path: &CategoryPath) {
        self.skipped.insert(path.clone());
    }

    pub fn internal_id(&self, path: &CategoryPath) -> Option<InternalId> {
        self.created.get(path).copied()
    }

    pub fn is_settled(&self, path: &CategoryPath) -> bool {
        self.created.contains_key(path) || self.failed.contains(path) || self.skipped.contains(path)
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn skipped(&self) -> impl Iterator<Item = &CategoryPath> {
        self.skipped.iter()
    }
}
