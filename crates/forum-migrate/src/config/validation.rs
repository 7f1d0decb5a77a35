//! Configuration validation.

use super::{Config, PgConnectionConfig, RegistryBackendKind, SourceType};
use crate::error::{MigrateError, Result};
use std::collections::HashMap;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    match config.source.r#type {
        SourceType::Postgres => {
            let pg = config.source.postgres.as_ref().ok_or_else(|| {
                MigrateError::Config("source.postgres is required for type: postgres".into())
            })?;
            validate_connection("source.postgres", pg)?;
            for (kind, query) in &config.source.queries {
                if query.sql.trim().is_empty() {
                    return Err(MigrateError::Config(format!(
                        "source.queries.{}.sql is required",
                        kind
                    )));
                }
                if query.key.iter().any(|c| c.trim().is_empty()) {
                    return Err(MigrateError::Config(format!(
                        "source.queries.{}.key contains an empty column name",
                        kind
                    )));
                }
            }
        }
        SourceType::Dump => {
            if config.source.dump_dir.is_none() {
                return Err(MigrateError::Config(
                    "source.dump_dir is required for type: dump".into(),
                ));
            }
        }
    }

    // Target validation
    if config.target.base_url.trim().is_empty() {
        return Err(MigrateError::Config("target.base_url is required".into()));
    }

    // Registry validation
    if config.registry.backend == RegistryBackendKind::Postgres {
        let pg = config.registry.postgres.as_ref().ok_or_else(|| {
            MigrateError::Config("registry.postgres is required for backend: postgres".into())
        })?;
        validate_connection("registry.postgres", pg)?;
    }

    // Import validation
    if config.import.batch_size == 0 {
        return Err(MigrateError::Config(
            "import.batch_size must be at least 1".into(),
        ));
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (i, mapping) in config.import.category_mappings.iter().enumerate() {
        if mapping.skip {
            if !mapping.path.is_empty() {
                return Err(MigrateError::Config(format!(
                    "import.category_mappings[{}]: a skip entry cannot have a path",
                    i
                )));
            }
            if mapping.source_ids.is_empty() {
                return Err(MigrateError::Config(format!(
                    "import.category_mappings[{}]: a skip entry needs source_ids",
                    i
                )));
            }
        } else {
            if mapping.path.is_empty() {
                return Err(MigrateError::Config(format!(
                    "import.category_mappings[{}]: path is required unless skip is set",
                    i
                )));
            }
            if mapping.path.iter().any(|segment| segment.trim().is_empty()) {
                return Err(MigrateError::Config(format!(
                    "import.category_mappings[{}]: path segments cannot be empty",
                    i
                )));
            }
        }

        for id in &mapping.source_ids {
            if let Some(previous) = seen.insert(id.as_str(), i) {
                return Err(MigrateError::Config(format!(
                    "import.category_mappings: source id '{}' appears in entries {} and {}",
                    id, previous, i
                )));
            }
        }
    }

    Ok(())
}

fn validate_connection(section: &str, pg: &PgConnectionConfig) -> Result<()> {
    if pg.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", section)));
    }
    if pg.database.is_empty() {
        return Err(MigrateError::Config(format!(
            "{}.database is required",
            section
        )));
    }
    if pg.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", section)));
    }
    if pg.max_connections == 0 {
        return Err(MigrateError::Config(format!(
            "{}.max_connections must be at least 1",
            section
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        CategoryMapping, ImportConfig, RegistryConfig, SourceConfig, TargetConfig,
    };
    use std::collections::BTreeMap;

    fn connection() -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "legacy".to_string(),
            user: "reader".to_string(),
            password: "password".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 4,
        }
    }

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                r#type: SourceType::Postgres,
                postgres: Some(connection()),
                dump_dir: None,
                queries: BTreeMap::new(),
                settings_sql: None,
            },
            target: TargetConfig {
                base_url: "http://localhost:3000/import".to_string(),
                api_key: "key".to_string(),
                timeout_secs: 30,
                max_retries: 3,
                retry_delay_ms: 500,
            },
            registry: RegistryConfig::default(),
            import: ImportConfig::default(),
        }
    }

    fn mapping(ids: &[&str], path: &[&str], skip: bool) -> CategoryMapping {
        CategoryMapping {
            source_ids: ids.iter().map(|s| s.to_string()).collect(),
            path: path.iter().map(|s| s.to_string()).collect(),
            skip,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.postgres.as_mut().unwrap().host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_dump_source_needs_directory() {
        let mut config = valid_config();
        config.source.r#type = SourceType::Dump;
        config.source.postgres = None;
        assert!(validate(&config).is_err());
        config.source.dump_dir = Some("export".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_postgres_registry_needs_connection() {
        let mut config = valid_config();
        config.registry.backend = RegistryBackendKind::Postgres;
        assert!(validate(&config).is_err());
        config.registry.postgres = Some(connection());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.import.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_target_url() {
        let mut config = valid_config();
        config.target.base_url = " ".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_category_mapping_rules() {
        let mut config = valid_config();
        config.import.category_mappings = vec![mapping(&["1"], &[], false)];
        assert!(validate(&config).is_err(), "placement without path");

        config.import.category_mappings = vec![mapping(&["1"], &["A", ""], false)];
        assert!(validate(&config).is_err(), "empty segment");

        config.import.category_mappings = vec![mapping(&["1"], &["A"], true)];
        assert!(validate(&config).is_err(), "skip with path");

        config.import.category_mappings = vec![
            mapping(&["1", "2"], &["A"], false),
            mapping(&["2"], &[], true),
        ];
        assert!(validate(&config).is_err(), "id in two entries");

        config.import.category_mappings = vec![
            mapping(&["1", "2"], &["A", "B"], false),
            mapping(&["3"], &[], true),
        ];
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_connection_debug_redacts_password() {
        let mut pg = connection();
        pg.password = "super_secret_password_123".to_string();
        let debug_output = format!("{:?}", pg);
        assert!(
            debug_output.contains("[REDACTED]"),
            "Debug output should contain [REDACTED]"
        );
        assert!(
            !debug_output.contains("super_secret_password_123"),
            "Debug output should not contain actual password value"
        );
    }

    #[test]
    fn test_target_config_debug_redacts_api_key() {
        let mut config = valid_config();
        config.target.api_key = "super_secret_key_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_key_456"));
    }
}
