use std::collections::HashSet;

use super::{required_reference, required_text, resolve, MapOutcome, MapResult, MappedRequest};
use crate::core::{EntityKind, IdLookup, SourceRow};

pub(super) fn map_group(row: &SourceRow, excluded_types: &HashSet<String>) -> MapResult {
    if let Some(group_type) = row.get("group_type").map(group_type_key) {
        if excluded_types.contains(&group_type) {
            return Ok(MapOutcome::Skip(format!("group type {} is excluded", group_type)));
        }
    }

    let name = required_text(row, "name")?;
    let request = MappedRequest::new()
        .attr("name", name.trim())
        .opt_attr("description", row.text("description"));
    Ok(MapOutcome::Create(request))
}

/// Group types are compared as text whether stored as numbers or strings.
fn group_type_key(value: &crate::core::FieldValue) -> String {
    match value.as_str() {
        Some(s) => s.trim().to_string(),
        None => value.to_json().to_string(),
    }
}

pub(super) fn map_membership(row: &SourceRow, ids: &dyn IdLookup) -> MapResult {
    let group = resolve(ids, EntityKind::Group, &required_reference(row, "group_id")?)?;
    let user = resolve(ids, EntityKind::User, &required_reference(row, "user_id")?)?;

    let request = MappedRequest::new()
        .attr("group_id", group.0)
        .attr("user_id", user.0)
        .attr("owner", row.flag("owner"));
    Ok(MapOutcome::Create(request))
}

#[cfg(test)]
mod tests {
    use super::super::testing::{created, row, Lookup};
    use super::*;
    use crate::core::{ExternalId, SourceRow};
    use crate::error::RowError;
    use std::collections::BTreeMap;

    #[test]
    fn test_excluded_group_type_is_skipped() {
        let excluded: HashSet<String> = ["3".to_string()].into_iter().collect();
        let outcome = map_group(&row(1).with("name", "Bots").with("group_type", 3), &excluded);
        assert!(matches!(outcome, Ok(MapOutcome::Skip(_))));

        let request = created(map_group(
            &row(2).with("name", "Staff").with("group_type", 1),
            &excluded,
        ));
        assert_eq!(request.get("name").unwrap(), "Staff");
    }

    #[test]
    fn test_nothing_excluded_by_default() {
        let outcome = map_group(&row(1).with("name", "Bots").with("group_type", 3), &HashSet::new());
        assert!(matches!(outcome, Ok(MapOutcome::Create(_))));
    }

    fn membership(group: i64, user: i64) -> SourceRow {
        SourceRow::new(
            ExternalId::composite([ExternalId::Int(group), ExternalId::Int(user)]),
            BTreeMap::new(),
        )
        .with("group_id", group)
        .with("user_id", user)
    }

    #[test]
    fn test_membership_resolves_both_sides() {
        let ids = Lookup::default()
            .with(EntityKind::Group, 3, 300)
            .with(EntityKind::User, 17, 1700);
        let request = created(map_membership(&membership(3, 17), &ids));
        assert_eq!(request.get_i64("group_id"), Some(300));
        assert_eq!(request.get_i64("user_id"), Some(1700));
    }

    #[test]
    fn test_membership_with_unknown_user() {
        let ids = Lookup::default().with(EntityKind::Group, 3, 300);
        let err = map_membership(&membership(3, 18), &ids).unwrap_err();
        assert_eq!(
            err,
            RowError::MissingReference {
                kind: EntityKind::User,
                external_id: "18".into()
            }
        );
    }
}
