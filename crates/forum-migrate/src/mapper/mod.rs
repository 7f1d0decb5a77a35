//! Translating source rows into target creation requests.
//!
//! A mapper is a pure function of one row plus the identifiers imported so
//! far. It never creates anything; the importer does that with the request
//! it returns.

mod bookmark;
mod category;
mod group;
mod message;
mod post;
mod user;

pub use category::mapped_category_request;

use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::config::ImportConfig;
use crate::core::{EntityKind, ExternalId, IdLookup, InternalId, SourceRow};
use crate::error::RowError;

/// Target-shaped attributes for one object, plus what to do after creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRequest {
    /// JSON attributes sent to the target.
    pub attributes: Map<String, Value>,
    /// Extra registry keys to record the new internal id under, so later
    /// rows can reference the object by those ids too.
    pub aliases: Vec<(EntityKind, ExternalId)>,
    /// Stable per-object key the target may use to reject replays.
    pub import_key: Option<String>,
}

impl MappedRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attr(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Set the attribute only when a value is present.
    pub fn opt_attr<V: Into<Value>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(value) => self.attr(name, value),
            None => self,
        }
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        self.attributes.insert(name.to_string(), value.into());
    }

    pub fn alias(mut self, kind: EntityKind, external_id: ExternalId) -> Self {
        self.aliases.push((kind, external_id));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Attribute as an integer, for tests and logging.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }
}

/// What a mapper decided for a row.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    Create(MappedRequest),
    /// Deliberately not imported. Not an error.
    Skip(String),
}

pub type MapResult = std::result::Result<MapOutcome, RowError>;

/// Per-kind row translation. Closed over the import configuration.
#[derive(Debug, Clone)]
pub enum EntityMapper {
    User,
    AnonymousUser,
    Group { excluded_types: HashSet<String> },
    GroupMembership,
    Category { skipped: HashSet<String> },
    Post { skipped_categories: HashSet<String> },
    Message,
    Bookmark,
}

impl EntityMapper {
    /// Mapper for a sourced kind. Mapped categories have none; they are
    /// built from configuration by the hierarchy pass.
    pub fn for_kind(kind: EntityKind, config: &ImportConfig) -> Option<Self> {
        let mapper = match kind {
            EntityKind::User => EntityMapper::User,
            EntityKind::AnonymousUser => EntityMapper::AnonymousUser,
            EntityKind::Group => EntityMapper::Group {
                excluded_types: config.excluded_group_types.iter().cloned().collect(),
            },
            EntityKind::GroupMembership => EntityMapper::GroupMembership,
            EntityKind::MappedCategory => return None,
            EntityKind::Category => EntityMapper::Category {
                skipped: config.skipped_category_ids(),
            },
            EntityKind::Post => EntityMapper::Post {
                skipped_categories: config.skipped_category_ids(),
            },
            EntityKind::Message => EntityMapper::Message,
            EntityKind::Bookmark => EntityMapper::Bookmark,
        };
        Some(mapper)
    }

    /// Add source category ids whose content is dropped, such as the
    /// descendants of a skipped category.
    pub fn with_skipped_categories<'a, I>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        match &mut self {
            EntityMapper::Category { skipped } => skipped.extend(ids.into_iter().cloned()),
            EntityMapper::Post { skipped_categories } => {
                skipped_categories.extend(ids.into_iter().cloned())
            }
            _ => {}
        }
        self
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            EntityMapper::User => EntityKind::User,
            EntityMapper::AnonymousUser => EntityKind::AnonymousUser,
            EntityMapper::Group { .. } => EntityKind::Group,
            EntityMapper::GroupMembership => EntityKind::GroupMembership,
            EntityMapper::Category { .. } => EntityKind::Category,
            EntityMapper::Post { .. } => EntityKind::Post,
            EntityMapper::Message => EntityKind::Message,
            EntityMapper::Bookmark => EntityKind::Bookmark,
        }
    }

    pub fn map(&self, row: &SourceRow, ids: &dyn IdLookup) -> MapResult {
        match self {
            EntityMapper::User => user::map_user(row),
            EntityMapper::AnonymousUser => user::map_anonymous_user(row),
            EntityMapper::Group { excluded_types } => group::map_group(row, excluded_types),
            EntityMapper::GroupMembership => group::map_membership(row, ids),
            EntityMapper::Category { skipped } => category::map_category(row, skipped),
            EntityMapper::Post { skipped_categories } => {
                post::map_post(row, ids, skipped_categories)
            }
            EntityMapper::Message => message::map_message(row, ids),
            EntityMapper::Bookmark => bookmark::map_bookmark(row, ids),
        }
    }
}

/// Required text column.
fn required_text<'a>(row: &'a SourceRow, column: &str) -> std::result::Result<&'a str, RowError> {
    row.text(column)
        .ok_or_else(|| RowError::mapping(format!("'{}' is missing or empty", column)))
}

/// Required reference column.
fn required_reference(row: &SourceRow, column: &str) -> std::result::Result<ExternalId, RowError> {
    row.reference(column)
        .ok_or_else(|| RowError::mapping(format!("'{}' is missing", column)))
}

/// Resolve a reference that must already be imported.
fn resolve(
    ids: &dyn IdLookup,
    kind: EntityKind,
    external_id: &ExternalId,
) -> std::result::Result<InternalId, RowError> {
    ids.internal_id_for(kind, external_id)
        .ok_or_else(|| RowError::missing(kind, external_id))
}

/// Timestamp column as an RFC 3339 attribute value.
fn timestamp_attr(row: &SourceRow, column: &str) -> Option<String> {
    row.timestamp(column).map(|ts| ts.to_rfc3339())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    /// In-memory lookup keyed by the external id's display form, the way
    /// the registry keys it.
    #[derive(Default)]
    pub struct Lookup(pub HashMap<(EntityKind, String), InternalId>);

    impl Lookup {
        pub fn with(mut self, kind: EntityKind, external_id: impl Into<ExternalId>, id: i64) -> Self {
            self.0
                .insert((kind, external_id.into().to_string()), InternalId(id));
            self
        }
    }

    impl IdLookup for Lookup {
        fn internal_id_for(&self, kind: EntityKind, external_id: &ExternalId) -> Option<InternalId> {
            self.0.get(&(kind, external_id.to_string())).copied()
        }
    }

    pub fn row(id: i64) -> SourceRow {
        SourceRow::new(ExternalId::Int(id), BTreeMap::new()).with("id", id)
    }

    pub fn created(outcome: MapResult) -> MappedRequest {
        match outcome {
            Ok(MapOutcome::Create(request)) => request,
            other => panic!("expected a create request, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::CategoryMapping;

    #[test]
    fn test_for_kind_covers_sourced_kinds() {
        let config = ImportConfig::default();
        for kind in EntityKind::IMPORT_ORDER {
            let mapper = EntityMapper::for_kind(kind, &config);
            assert_eq!(mapper.is_some(), kind.is_sourced());
            if let Some(mapper) = mapper {
                assert_eq!(mapper.kind(), kind);
            }
        }
    }

    #[test]
    fn test_skip_mappings_reach_category_and_post_mappers() {
        let config = ImportConfig {
            category_mappings: vec![CategoryMapping {
                source_ids: vec!["9".into()],
                path: vec![],
                skip: true,
            }],
            ..ImportConfig::default()
        };
        let mapper = EntityMapper::for_kind(EntityKind::Category, &config).unwrap();
        let outcome = mapper.map(&row(9).with("name", "Spam"), &Lookup::default());
        assert!(matches!(outcome, Ok(MapOutcome::Skip(_))));

        let extra = vec!["10".to_string()];
        let post = EntityMapper::for_kind(EntityKind::Post, &config)
            .unwrap()
            .with_skipped_categories(&extra);
        match post {
            EntityMapper::Post { skipped_categories } => {
                assert!(skipped_categories.contains("9"));
                assert!(skipped_categories.contains("10"));
            }
            other => panic!("unexpected mapper {:?}", other),
        }
    }

    #[test]
    fn test_request_builder() {
        let request = MappedRequest::new()
            .attr("name", "General")
            .opt_attr::<i64>("parent_category_id", None)
            .opt_attr("position", Some(3))
            .alias(EntityKind::Category, ExternalId::from("12"));
        assert_eq!(request.get("name"), Some(&Value::from("General")));
        assert!(request.get("parent_category_id").is_none());
        assert_eq!(request.get_i64("position"), Some(3));
        assert_eq!(request.aliases.len(), 1);
    }
}
