use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let compiled =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
            message: format!("Failed to compile JSON schema: {}", e),
        })?;

    let error_messages: Vec<String> = compiled
        .iter_errors(json_value)
        .map(|e| format!("{} at {}", e, e.instance_path()))
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::Validation {
            message: "retry.max_attempts must be at least 1".to_string(),
        });
    }

    if config.cost.calls_per_file == 0 {
        return Err(ConfigError::Validation {
            message: "cost.calls_per_file must be at least 1".to_string(),
        });
    }

    if config.cost.daily_call_ceiling == 0 {
        return Err(ConfigError::Validation {
            message: "cost.daily_call_ceiling must be positive".to_string(),
        });
    }

    if config.grouping.max_files_per_pack == 0 {
        return Err(ConfigError::Validation {
            message: "grouping.max_files_per_pack must be at least 1".to_string(),
        });
    }

    for skill in &config.filters.required_skills {
        if skill.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "filters.required_skills must not contain blank entries".to_string(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::IsolationPolicy;

    #[test]
    fn test_minimal_config_loads() {
        let config = load_config_from_str(r#"{"version": "1.0"}"#).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.isolation, IsolationPolicy::ContinueOnError);
    }

    #[test]
    fn test_full_config_loads() {
        let config = load_config_from_str(
            r#"{
                "version": "1.0",
                "grouping": {"allow_singleton_packs": false, "max_files_per_pack": 4},
                "filters": {"exclude_students": true, "required_skills": ["rust", "sql"]},
                "retry": {"max_attempts": 5, "initial_delay_ms": 100},
                "cost": {"calls_per_file": 3, "daily_call_ceiling": 200},
                "limits": {"max_file_size_bytes": 1048576},
                "timeouts": {"absolute_ceiling_secs": 600},
                "isolation": "fail_fast",
                "sync": {"field_map_ttl_secs": 60}
            }"#,
        )
        .unwrap();

        assert!(!config.grouping.allow_singleton_packs);
        assert_eq!(config.filters.required_skills, vec!["rust", "sql"]);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.cost.calls_per_file, 3);
        assert_eq!(config.isolation, IsolationPolicy::FailFast);
    }

    #[test]
    fn test_unknown_key_rejected_by_schema() {
        let err = load_config_from_str(r#"{"version": "1.0", "wat": true}"#).unwrap_err();
        assert!(matches!(err, ConfigError::SchemaValidation { .. }));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let err = load_config_from_str(r#"{"version": "2.0"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_blank_required_skill_rejected() {
        let err = load_config_from_str(
            r#"{"version": "1.0", "filters": {"required_skills": ["rust", "  "]}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        // Schema allows >= 1 only; semantic check covers hand-built values.
        let err =
            load_config_from_str(r#"{"version": "1.0", "retry": {"max_attempts": 0}}"#)
                .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation { .. } | ConfigError::SchemaValidation { .. }
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        let err = load_config_from_str("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::ParseJson(_)));
    }
}
