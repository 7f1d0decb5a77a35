use std::collections::HashSet;

use super::{required_reference, required_text, resolve, timestamp_attr, MapOutcome, MapResult, MappedRequest};
use crate::core::{EntityKind, ExternalId, IdLookup, InternalId, SourceRow};
use crate::error::RowError;

/// Posts come in two shapes: the first post of a topic (no `topic_id`, or
/// `topic_id` equal to its own id) opens a topic in a category; every other
/// post is a reply to the topic's first post.
pub(super) fn map_post(
    row: &SourceRow,
    ids: &dyn IdLookup,
    skipped_categories: &HashSet<String>,
) -> MapResult {
    if let Some(category) = row.reference("category_id") {
        if skipped_categories.contains(&category.to_string()) {
            return Ok(MapOutcome::Skip(format!("category {} is skipped", category)));
        }
    }

    let author = resolve_author(row, ids)?;
    let raw = required_text(row, "raw")?;

    let mut request = MappedRequest::new()
        .attr("user_id", author.0)
        .attr("raw", raw)
        .opt_attr("created_at", timestamp_attr(row, "created_at"));

    match topic_of(row) {
        None => {
            let category_ref = required_reference(row, "category_id")?;
            let category = resolve(ids, EntityKind::Category, &category_ref)?;
            let title = required_text(row, "title")?;
            request.set("title", title.trim());
            request.set("category_id", category.0);
        }
        Some(topic) => {
            let first_post = resolve(ids, EntityKind::Post, &topic)?;
            request.set("topic_post_id", first_post.0);
        }
    }

    Ok(MapOutcome::Create(request))
}

/// External id of the topic's first post, or `None` for a first post.
fn topic_of(row: &SourceRow) -> Option<ExternalId> {
    row.reference("topic_id")
        .filter(|topic| topic.to_string() != row.external_id.to_string())
}

/// Authors are registered users or, failing that, imported guests.
fn resolve_author(row: &SourceRow, ids: &dyn IdLookup) -> Result<InternalId, RowError> {
    let author = required_reference(row, "user_id")?;
    ids.internal_id_for(EntityKind::User, &author)
        .or_else(|| ids.internal_id_for(EntityKind::AnonymousUser, &author))
        .ok_or_else(|| RowError::missing(EntityKind::User, &author))
}
