//! Configuration validation for stack definitions.
//!
//! This module provides comprehensive validation of stack configurations,
//! ensuring declarations are well-formed and internally consistent before a
//! registry is built. Reference cycles are not checked here; that is the
//! dependency graph's job.

use crate::error::{ConfigError, Result, TerraplaneError};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{ResourceSpec, StackConfig};
use super::value::Value;

/// Validator for stack configurations.
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

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_settings(config, &mut result);
        Self::validate_resources(config, &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(TerraplaneError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates project configuration.
    fn validate_project(config: &StackConfig, result: &mut ValidationResult) {
        if config.project.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_identifier(&config.project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                    config.project.name
                ),
            });
        }

        if config.project.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        }
    }

    /// Validates run settings.
    fn validate_settings(config: &StackConfig, result: &mut ValidationResult) {
        if config.settings.parallelism == 0 {
            result.errors.push(ValidationError {
                field: String::from("settings.parallelism"),
                message: String::from("Parallelism must be at least 1"),
            });
        }

        if config.settings.parallelism > 64 {
            result.warnings.push(format!(
                "settings.parallelism: {} concurrent actions is unusually high",
                config.settings.parallelism
            ));
        }
    }

    /// Validates all resource declarations.
    fn validate_resources(config: &StackConfig, result: &mut ValidationResult) {
        if config.resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources declared in configuration"));
            return;
        }

        let declared: HashSet<String> = config.resources.iter().map(ResourceSpec::address).collect();
        let mut seen = HashSet::new();

        for (i, resource) in config.resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");
            let address = resource.address();

            // Identity must be unique within the stack
            if !seen.insert(address.clone()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate resource: {address}"),
                });
            }

            if !is_valid_identifier(&resource.kind) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.kind"),
                    message: format!(
                        "Resource kind '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                        resource.kind
                    ),
                });
            }

            if !is_valid_identifier(&resource.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens or underscores.",
                        resource.name
                    ),
                });
            }

            Self::validate_depends_on(resource, &declared, &prefix, result);
            Self::validate_attributes(resource, &declared, &prefix, result);
        }
    }

    /// Validates explicit ordering hints.
    fn validate_depends_on(
        resource: &ResourceSpec,
        declared: &HashSet<String>,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        let address = resource.address();

        for (i, dep) in resource.depends_on.iter().enumerate() {
            let segments: Vec<&str> = dep.split('.').collect();
            if segments.len() != 2 || segments.iter().any(|s| s.is_empty()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.depends_on[{i}]"),
                    message: format!("Invalid address '{dep}'. Expected format: kind.name"),
                });
                continue;
            }

            if *dep == address {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.depends_on[{i}]"),
                    message: format!("Resource {address} cannot depend on itself"),
                });
                continue;
            }

            if !declared.contains(dep) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.depends_on[{i}]"),
                    message: format!("Unknown resource: {dep}"),
                });
            }
        }
    }

    /// Validates attribute values and their references.
    fn validate_attributes(
        resource: &ResourceSpec,
        declared: &HashSet<String>,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        let address = resource.address();

        for (attr_name, value) in &resource.attributes {
            let field = format!("{prefix}.attributes.{attr_name}");

            if attr_name == "id" {
                result.warnings.push(format!(
                    "{field}: 'id' is provider-assigned and will be overwritten on apply"
                ));
            }

            for reference in value.references() {
                let target = reference.address();

                if target == address {
                    result.errors.push(ValidationError {
                        field: field.clone(),
                        message: format!("Resource {address} cannot reference itself"),
                    });
                } else if !declared.contains(&target) {
                    result.errors.push(ValidationError {
                        field: field.clone(),
                        message: format!("Unknown resource: {target}"),
                    });
                }
            }

            Self::check_embedded_interpolation(value, &field, result);
        }
    }

    /// Rejects `${...}` tokens embedded inside larger strings. Only
    /// whole-string references are supported.
    fn check_embedded_interpolation(value: &Value, field: &str, result: &mut ValidationResult) {
        match value {
            Value::String(s) => {
                if s.contains("${") {
                    result.errors.push(ValidationError {
                        field: field.to_string(),
                        message: format!(
                            "Embedded interpolation is not supported; a reference must be the entire value: '{s}'"
                        ),
                    });
                }
            }
            Value::List(items) => {
                for item in items {
                    Self::check_embedded_interpolation(item, field, result);
                }
            }
            Value::Map(entries) => {
                for item in entries.values() {
                    Self::check_embedded_interpolation(item, field, result);
                }
            }
            _ => {}
        }
    }
}

/// Validates that an identifier follows the naming convention.
/// Identifiers must be lowercase alphanumeric with hyphens or underscores,
/// starting with a letter.
fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '_' {
            return false;
        }
    }

    // Cannot end with a separator
    if name.ends_with('-') || name.ends_with('_') {
        return false;
    }

    // Cannot have consecutive separators
    if name.contains("--") || name.contains("__") {
        return false;
    }

    true
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
    use crate::config::parser::ConfigParser;

    fn parse(yaml: &str) -> StackConfig {
        ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("valid yaml")
    }

    #[test]
    fn test_valid_identifier() {
        assert!(is_valid_identifier("network"));
        assert!(is_valid_identifier("route_table"));
        assert!(is_valid_identifier("web-1"));
        assert!(is_valid_identifier("a"));
    }

    #[test]
    fn test_invalid_identifier() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("Network")); // uppercase
        assert!(!is_valid_identifier("1net")); // starts with digit
        assert!(!is_valid_identifier("net.work")); // dot is the address separator
        assert!(!is_valid_identifier("net-")); // trailing separator
        assert!(!is_valid_identifier("net--work")); // consecutive separators
    }

    #[test]
    fn test_valid_config_passes() {
        let config = parse(
            r"
project:
  name: web-stack
resources:
  - kind: network
    name: main
    attributes:
      cidr_block: 10.0.0.0/16
  - kind: subnet
    name: public
    attributes:
      network_id: ${network.main.id}
",
        );
        let result = ConfigValidator::new().validate(&config);
        assert!(result.is_ok());
    }

    #[test]
    fn test_duplicate_resource_rejected() {
        let config = parse(
            r"
project:
  name: web-stack
resources:
  - kind: network
    name: main
  - kind: network
    name: main
",
        );
        let result = ConfigValidator::new().validate(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_reference_target_rejected() {
        let config = parse(
            r"
project:
  name: web-stack
resources:
  - kind: subnet
    name: public
    attributes:
      network_id: ${network.missing.id}
",
        );
        let result = ConfigValidator::new().validate(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_depends_on_rejected() {
        let config = parse(
            r"
project:
  name: web-stack
resources:
  - kind: instance
    name: web
    depends_on:
      - network.missing
",
        );
        let result = ConfigValidator::new().validate(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_self_reference_rejected() {
        let config = parse(
            r"
project:
  name: web-stack
resources:
  - kind: instance
    name: web
    attributes:
      peer: ${instance.web.id}
",
        );
        let result = ConfigValidator::new().validate(&config);
        assert!(result.is_err());
    }

    #[test]
    fn test_embedded_interpolation_rejected() {
        let config = parse(
            r#"
project:
  name: web-stack
resources:
  - kind: network
    name: main
  - kind: instance
    name: web
    attributes:
      note: "prefix-${network.main.id}-suffix"
"#,
        );
        let result = ConfigValidator::new().validate(&config);
        assert!(result.is_err());
    }
}
