use std::collections::HashSet;

use super::{required_text, MapOutcome, MapResult, MappedRequest};
use crate::core::{EntityKind, ExternalId, InternalId, SourceRow};

/// Source category attributes. The parent is filled in by the hierarchy
/// pass, which knows whether it was created.
pub(super) fn map_category(row: &SourceRow, skipped: &HashSet<String>) -> MapResult {
    let id = row.external_id.to_string();
    if skipped.contains(&id) {
        return Ok(MapOutcome::Skip(format!("category {} is skipped", id)));
    }

    let name = required_text(row, "name")?;
    let request = MappedRequest::new()
        .attr("name", name.trim())
        .opt_attr("description", row.text("description"))
        .opt_attr("position", row.int("position"));
    Ok(MapOutcome::Create(request))
}

/// Request for a category built from a configured path.
///
/// `source_ids` are the source categories relocated to exactly this path;
/// they resolve to the new category once it exists.
pub fn mapped_category_request(
    name: &str,
    parent: Option<InternalId>,
    source_ids: &[String],
) -> MappedRequest {
    source_ids.iter().fold(
        MappedRequest::new()
            .attr("name", name)
            .opt_attr("parent_category_id", parent.map(|p| p.0)),
        |request, id| request.alias(EntityKind::Category, ExternalId::Text(id.clone())),
    )
}
