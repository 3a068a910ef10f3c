//! Configuration validation.
//!
//! Checks a loaded configuration for problems that would make a plan
//! meaningless (missing backend settings, duplicate or empty identifiers,
//! tag values that are not strings) and warns about declared tags that the
//! engine will silently skip.

use crate::error::{ConfigError, Result};
use crate::tags::{IgnoreConfig, SystemTagPolicy};
use std::collections::HashSet;
use tracing::debug;

use super::schema::{BackendConfig, BackendKind, ResourceConfig, SystemTagRule, TagSyncConfig};

/// Validator for tagsync configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration and collects every problem found.
    #[must_use]
    pub fn check(&self, config: &TagSyncConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_backend(&config.backend, &mut result);
        Self::validate_system_tags(&config.system_tags, &mut result);
        Self::validate_ignore_tags(&config.ignore_tags, &mut result);

        if let Err(e) = config.default_tag_set() {
            result.errors.push(ValidationError {
                field: String::from("default_tags"),
                message: e.to_string(),
            });
        }

        Self::validate_resources(config, &mut result);
        result
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, config: &TagSyncConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        match result.errors.first() {
            None => {
                debug!("Configuration validation passed");
                Ok(result)
            }
            Some(first_error) => Err(ConfigError::validation(
                first_error.message.clone(),
                first_error.field.clone(),
            )
            .into()),
        }
    }

    fn validate_backend(backend: &BackendConfig, result: &mut ValidationResult) {
        match backend.kind {
            BackendKind::Http => {
                match backend.endpoint.as_deref() {
                    None | Some("") => result.errors.push(ValidationError {
                        field: String::from("backend.endpoint"),
                        message: String::from("An endpoint is required when using the http backend"),
                    }),
                    Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                        result.errors.push(ValidationError {
                            field: String::from("backend.endpoint"),
                            message: format!("Endpoint must be an http(s) URL: {url}"),
                        });
                    }
                    Some(url) if url.starts_with("http://") => {
                        result
                            .warnings
                            .push(format!("backend.endpoint: {url} is not using TLS"));
                    }
                    Some(_) => {}
                }

                if backend.timeout_secs == Some(0) {
                    result.errors.push(ValidationError {
                        field: String::from("backend.timeout_secs"),
                        message: String::from("Timeout must be at least 1 second"),
                    });
                }
            }
            BackendKind::Local => {
                if backend.path.as_deref() == Some("") {
                    result.errors.push(ValidationError {
                        field: String::from("backend.path"),
                        message: String::from("Store path cannot be empty"),
                    });
                }
            }
            BackendKind::S3 => {}
        }

        if backend.kind != BackendKind::Http && backend.endpoint.is_some() {
            result.warnings.push(format!(
                "backend.endpoint: ignored by the {} backend",
                backend.kind
            ));
        }
    }

    fn validate_system_tags(rules: &[SystemTagRule], result: &mut ValidationResult) {
        for (i, rule) in rules.iter().enumerate() {
            let prefix = format!("system_tags[{i}]");

            if rule.prefixes.is_empty() && rule.keys.is_empty() {
                result
                    .warnings
                    .push(format!("{prefix}: rule reserves no keys"));
            }

            if rule.prefixes.iter().any(String::is_empty) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.prefixes"),
                    message: String::from("An empty prefix would reserve every key"),
                });
            }

            if rule.service.as_deref() == Some("") {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.service"),
                    message: String::from("Service cannot be empty; omit it to match all services"),
                });
            }
        }
    }

    fn validate_ignore_tags(ignore: &IgnoreConfig, result: &mut ValidationResult) {
        if ignore.key_prefixes.iter().any(String::is_empty) {
            result.errors.push(ValidationError {
                field: String::from("ignore_tags.key_prefixes"),
                message: String::from("An empty prefix would ignore every key"),
            });
        }
    }

    fn validate_resources(config: &TagSyncConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in configuration"));
            return;
        }

        let policy = config.build_policy();
        let mut seen = HashSet::new();

        for (i, resource) in config.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if resource.identifier.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.identifier"),
                    message: String::from("Resource identifier cannot be empty"),
                });
            } else if !seen.insert(resource.identifier.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.identifier"),
                    message: format!("Duplicate resource identifier: {}", resource.identifier),
                });
            }

            if resource.service.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.service"),
                    message: String::from("Service prefix cannot be empty"),
                });
            }

            Self::validate_resource_tags(resource, &policy, &config.ignore_tags, &prefix, result);
        }
    }

    fn validate_resource_tags(
        resource: &ResourceConfig,
        policy: &SystemTagPolicy,
        ignore: &IgnoreConfig,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        for (key, value) in &resource.tags {
            if key.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.tags"),
                    message: String::from("Tag keys must not be empty"),
                });
            } else if !value.is_string() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.tags.{key}"),
                    message: format!("Tag '{key}' must be a string, quote it in YAML"),
                });
            }

            if policy.is_system_tag(key, &resource.service) {
                result.warnings.push(format!(
                    "{prefix}.tags.{key}: reserved for service '{}' and will not be applied",
                    resource.service
                ));
            } else if ignore.ignores(key) {
                result.warnings.push(format!(
                    "{prefix}.tags.{key}: matches ignore_tags and will not be applied"
                ));
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> TagSyncConfig {
        ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("valid yaml")
    }

    #[test]
    fn test_valid_config() {
        let config = parse(
            r#"
backend:
  type: local
  path: .tagsync/tags.json
resources:
  - identifier: arn:aws:s3:::logs
    service: s3
    tags:
      env: prod
"#,
        );

        let result = ConfigValidator::new().validate(&config).expect("valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_http_backend_requires_endpoint() {
        let config = parse("backend:\n  type: http\nresources: []\n");

        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "backend.endpoint");
        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_duplicate_and_empty_identifiers() {
        let config = parse(
            r"
resources:
  - identifier: a
    service: s3
  - identifier: a
    service: s3
  - identifier: ''
    service: ''
",
        );

        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert_eq!(
            fields,
            vec![
                "resources[1].identifier",
                "resources[2].identifier",
                "resources[2].service"
            ]
        );
    }

    #[test]
    fn test_non_string_tag_value() {
        let config = parse(
            r"
resources:
  - identifier: a
    service: s3
    tags:
      replicas: 3
",
        );

        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "resources[0].tags.replicas");
    }

    #[test]
    fn test_warns_about_skipped_tags() {
        let config = parse(
            r"
ignore_tags:
  keys: [CostCenter]
resources:
  - identifier: env-1
    service: elasticbeanstalk
    tags:
      Name: web
      CostCenter: '42'
      aws:owner: me
",
        );

        let result = ConfigValidator::new().check(&config);
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 3);
    }

    #[test]
    fn test_empty_prefixes_rejected() {
        let config = parse(
            r"
system_tags:
  - prefixes: ['']
ignore_tags:
  key_prefixes: ['']
resources: []
",
        );

        let result = ConfigValidator::new().check(&config);
        assert_eq!(result.error_count(), 2);
    }
}
