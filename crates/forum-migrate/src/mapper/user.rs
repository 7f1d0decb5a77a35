use super::{required_text, timestamp_attr, MapOutcome, MapResult, MappedRequest};
use crate::core::SourceRow;

const MAX_USERNAME_LENGTH: usize = 60;

pub(super) fn map_user(row: &SourceRow) -> MapResult {
    let username = required_text(row, "username")?;

    let request = MappedRequest::new()
        .attr("username", username.trim())
        .opt_attr("email", row.text("email").map(str::trim))
        .opt_attr("name", row.text("name"))
        .opt_attr("created_at", timestamp_attr(row, "created_at"))
        .attr("admin", row.flag("admin"))
        .attr("active", true);
    Ok(MapOutcome::Create(request))
}

/// Guests who posted without an account become staged users.
pub(super) fn map_anonymous_user(row: &SourceRow) -> MapResult {
    let name = required_text(row, "name")?;
    let username = guest_username(name, &row.external_id.to_string());

    let request = MappedRequest::new()
        .attr("username", username)
        .attr("name", name.trim())
        .opt_attr("email", row.text("email").map(str::trim))
        .attr("staged", true)
        .attr("active", false);
    Ok(MapOutcome::Create(request))
}

/// `name` reduced to `[a-z0-9_]`, suffixed with the source id so two
/// guests with the same display name stay distinct.
fn guest_username(name: &str, id: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    let slug = if slug.is_empty() { "guest" } else { slug };

    let suffix = format!("_{}", id);
    let room = MAX_USERNAME_LENGTH.saturating_sub(suffix.len());
    let mut username: String = slug.chars().take(room).collect();
    username.push_str(&suffix);
    username
}
