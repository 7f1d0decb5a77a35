use super::{required_reference, required_text, resolve, timestamp_attr, MapOutcome, MapResult, MappedRequest};
use crate::core::{EntityKind, ExternalId, IdLookup, SourceRow};
use crate::error::RowError;

/// Private messages. `recipient_ids` is a comma separated list of user ids;
/// replies name the message they answer in `reply_to_id`.
pub(super) fn map_message(row: &SourceRow, ids: &dyn IdLookup) -> MapResult {
    let sender = resolve(ids, EntityKind::User, &required_reference(row, "user_id")?)?;
    let raw = required_text(row, "raw")?;

    let recipients = recipient_ids(row)?
        .iter()
        .map(|id| resolve(ids, EntityKind::User, id).map(|internal| internal.0))
        .collect::<Result<Vec<_>, RowError>>()?;

    let mut request = MappedRequest::new()
        .attr("user_id", sender.0)
        .attr("recipient_ids", recipients)
        .attr("raw", raw)
        .opt_attr("created_at", timestamp_attr(row, "created_at"));

    match row.reference("reply_to_id") {
        Some(parent) => {
            let parent = resolve(ids, EntityKind::Message, &parent)?;
            request.set("reply_to_message_id", parent.0);
            request = request.opt_attr("title", row.text("title"));
        }
        None => {
            request.set("title", required_text(row, "title")?.trim());
        }
    }

    Ok(MapOutcome::Create(request))
}

fn recipient_ids(row: &SourceRow) -> Result<Vec<ExternalId>, RowError> {
    let ids: Vec<ExternalId> = match row.get("recipient_ids") {
        Some(value) => match value.as_i64().filter(|_| value.as_str().is_none()) {
            Some(single) => vec![ExternalId::Int(single)],
            None => value
                .as_str()
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| match s.parse::<i64>() {
                    Ok(n) => ExternalId::Int(n),
                    Err(_) => ExternalId::from(s),
                })
                .collect(),
        },
        None => Vec::new(),
    };
    if ids.is_empty() {
        return Err(RowError::mapping("message has no recipients"));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{created, row, Lookup};
    use super::*;

    fn lookup() -> Lookup {
        Lookup::default()
            .with(EntityKind::User, 1, 101)
            .with(EntityKind::User, 2, 102)
            .with(EntityKind::User, 3, 103)
            .with(EntityKind::Message, 50, 5000)
    }

    #[test]
    fn test_message_resolves_recipients() {
        let request = created(map_message(
            &row(60)
                .with("user_id", 1)
                .with("recipient_ids", "2, 3")
                .with("title", "Hi")
                .with("raw", "psst"),
            &lookup(),
        ));
        assert_eq!(request.get_i64("user_id"), Some(101));
        assert_eq!(
            request.get("recipient_ids").unwrap(),
            &serde_json::json!([102, 103])
        );
        assert_eq!(request.get("title").unwrap(), "Hi");
    }

    #[test]
    fn test_single_numeric_recipient() {
        let request = created(map_message(
            &row(61)
                .with("user_id", 1)
                .with("recipient_ids", 2)
                .with("title", "Hi")
                .with("raw", "psst"),
            &lookup(),
        ));
        assert_eq!(request.get("recipient_ids").unwrap(), &serde_json::json!([102]));
    }

    #[test]
    fn test_reply_links_parent() {
        let request = created(map_message(
            &row(62)
                .with("user_id", 2)
                .with("recipient_ids", "1")
                .with("reply_to_id", 50)
                .with("raw", "re"),
            &lookup(),
        ));
        assert_eq!(request.get_i64("reply_to_message_id"), Some(5000));
        assert!(request.get("title").is_none());
    }

    #[test]
    fn test_unknown_recipient_is_missing_reference() {
        let err = map_message(
            &row(63)
                .with("user_id", 1)
                .with("recipient_ids", "2,9")
                .with("title", "Hi")
                .with("raw", "x"),
            &lookup(),
        )
        .unwrap_err();
        assert_eq!(err, RowError::missing(EntityKind::User, &ExternalId::Int(9)));
    }

    #[test]
    fn test_no_recipients_fails_mapping() {
        let err = map_message(
            &row(64).with("user_id", 1).with("recipient_ids", " , ").with("title", "t").with("raw", "x"),
            &lookup(),
        )
        .unwrap_err();
        assert!(matches!(err, RowError::Mapping(_)));
    }
}
