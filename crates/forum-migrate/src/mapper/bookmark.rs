use super::{required_reference, resolve, timestamp_attr, MapOutcome, MapResult, MappedRequest};
use crate::core::{EntityKind, IdLookup, SourceRow};

pub(super) fn map_bookmark(row: &SourceRow, ids: &dyn IdLookup) -> MapResult {
    let user = resolve(ids, EntityKind::User, &required_reference(row, "user_id")?)?;
    let post = resolve(ids, EntityKind::Post, &required_reference(row, "post_id")?)?;

    let request = MappedRequest::new()
        .attr("user_id", user.0)
        .attr("post_id", post.0)
        .opt_attr("created_at", timestamp_attr(row, "created_at"));
    Ok(MapOutcome::Create(request))
}
