//! Entity kinds and their fixed import order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Record categories the engine knows how to import.
///
/// Each kind is also a namespace in the identifier registry, so the same
/// external id may appear under several kinds without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    User,
    AnonymousUser,
    Group,
    GroupMembership,
    /// Synthetic categories built from configured category paths.
    MappedCategory,
    Category,
    Post,
    Message,
    Bookmark,
}

impl EntityKind {
    /// All kinds in dependency order. Later kinds reference earlier ones.
    pub const IMPORT_ORDER: [EntityKind; 9] = [
        EntityKind::User,
        EntityKind::AnonymousUser,
        EntityKind::Group,
        EntityKind::GroupMembership,
        EntityKind::MappedCategory,
        EntityKind::Category,
        EntityKind::Post,
        EntityKind::Message,
        EntityKind::Bookmark,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::AnonymousUser => "anonymous_user",
            EntityKind::Group => "group",
            EntityKind::GroupMembership => "group_membership",
            EntityKind::MappedCategory => "mapped_category",
            EntityKind::Category => "category",
            EntityKind::Post => "post",
            EntityKind::Message => "message",
            EntityKind::Bookmark => "bookmark",
        }
    }

    /// Target collection that objects of this kind are created in.
    pub fn endpoint(&self) -> &'static str {
        match self {
            EntityKind::User | EntityKind::AnonymousUser => "users",
            EntityKind::Group => "groups",
            EntityKind::GroupMembership => "group_memberships",
            EntityKind::MappedCategory | EntityKind::Category => "categories",
            EntityKind::Post => "posts",
            EntityKind::Message => "messages",
            EntityKind::Bookmark => "bookmarks",
        }
    }

    /// Whether the source adapter is queried for this kind.
    ///
    /// Mapped categories come from configuration, not from the source.
    pub fn is_sourced(&self) -> bool {
        !matches!(self, EntityKind::MappedCategory)
    }

    /// Key columns used when none are configured.
    pub fn default_key(&self) -> &'static [&'static str] {
        match self {
            EntityKind::GroupMembership => &["group_id", "user_id"],
            EntityKind::Bookmark => &["user_id", "post_id"],
            _ => &["id"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::IMPORT_ORDER
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_order_references_point_backwards() {
        let pos = |k: EntityKind| {
            EntityKind::IMPORT_ORDER
                .iter()
                .position(|x| *x == k)
                .unwrap()
        };
        assert!(pos(EntityKind::User) < pos(EntityKind::GroupMembership));
        assert!(pos(EntityKind::Group) < pos(EntityKind::GroupMembership));
        assert!(pos(EntityKind::MappedCategory) < pos(EntityKind::Category));
        assert!(pos(EntityKind::Category) < pos(EntityKind::Post));
        assert!(pos(EntityKind::Post) < pos(EntityKind::Bookmark));
    }

    #[test]
    fn test_parse_and_display() {
        for kind in EntityKind::IMPORT_ORDER {
            assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
        }
        assert!("topic".parse::<EntityKind>().is_err());
        assert_eq!(EntityKind::GroupMembership.to_string(), "group_membership");
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&EntityKind::AnonymousUser).unwrap();
        assert_eq!(json, "\"anonymous_user\"");
    }
}
