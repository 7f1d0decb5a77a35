//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    ///
    /// Batch size does not change cursor positions, so it is left out and
    /// may differ between a run and its resume.
    pub fn hash(&self) -> String {
        let mut normalized = self.clone();
        normalized.import.batch_size = 0;
        let yaml = serde_yaml::to_string(&normalized).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EntityKind;

    const SAMPLE: &str = r#"
source:
  type: postgres
  postgres:
    host: legacy-db
    database: forum
    user: reader
    password: hunter2
  queries:
    user:
      sql: "SELECT id, username, email FROM members"
    group_membership:
      sql: "SELECT group_id, user_id FROM member_groups"
      key: [group_id, user_id]
target:
  base_url: https://forum.example.com/admin/import
  api_key: secret
import:
  batch_size: 500
  id_prefix: "v1-"
  category_mappings:
    - source_ids: ["12", "13"]
      path: [Support, Hardware]
    - source_ids: ["99"]
      skip: true
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.source.r#type, SourceType::Postgres);
        assert_eq!(config.source.postgres.as_ref().unwrap().port, 5432);
        assert_eq!(config.import.batch_size, 500);
        assert_eq!(config.import.id_prefix, "v1-");
        assert_eq!(config.registry.backend, RegistryBackendKind::Journal);

        assert_eq!(
            config.source.key_columns(EntityKind::User),
            vec!["id".to_string()]
        );
        let memberships = &config.source.queries[&EntityKind::GroupMembership];
        assert_eq!(memberships.key.len(), 2);
        assert_eq!(
            config.source.key_columns(EntityKind::Bookmark),
            vec!["user_id".to_string(), "post_id".to_string()]
        );

        assert!(config.import.skipped_category_ids().contains("99"));
        assert_eq!(config.import.placement_mappings().count(), 1);
    }

    #[test]
    fn test_optional_stage_defaults() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert!(!config.import.stage_enabled(EntityKind::AnonymousUser));
        assert!(config.import.stage_enabled(EntityKind::Message));
        assert!(config.import.stage_enabled(EntityKind::Bookmark));
        assert!(config.import.stage_enabled(EntityKind::Post));
    }

    #[test]
    fn test_hash_ignores_batch_size() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let mut resized = config.clone();
        resized.import.batch_size = 10;
        assert_eq!(config.hash(), resized.hash());

        let mut changed = config.clone();
        changed.import.id_prefix = "v2-".into();
        assert_ne!(config.hash(), changed.hash());
    }

    #[test]
    fn test_unknown_kind_in_queries_is_rejected() {
        let yaml = SAMPLE.replace("    user:\n", "    topic:\n");
        assert!(Config::from_yaml(&yaml).is_err());
    }
}
