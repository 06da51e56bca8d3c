use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

use eyre::Result;

use crate::config::models::{AgentConfig, ControlPlaneConfig, FleetEntry};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Duplicate fleet id '{id}'")]
    DuplicateFleet { id: String },

    #[error("Document '{path}' for {context} cannot be read")]
    MissingDocument { path: String, context: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

pub struct ControlPlaneConfigValidator;

impl ControlPlaneConfigValidator {
    /// Validate the whole configuration, reporting every problem at once.
    pub fn validate(config: &ControlPlaneConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.distribution_addr) {
            errors.push(e);
        }

        if let Err(e) = config.send_timeout() {
            errors.push(ValidationError::InvalidField {
                field: "fanout_send_timeout".to_string(),
                message: e.to_string(),
            });
        }

        if let Err(e) = Self::validate_log_level(&config.logging.level) {
            errors.push(e);
        }

        let mut seen = HashSet::new();
        for fleet in &config.fleets {
            if !seen.insert(fleet.id.as_str()) {
                errors.push(ValidationError::DuplicateFleet {
                    id: fleet.id.clone(),
                });
            }
            errors.extend(Self::validate_fleet(fleet));
        }

        if let Some(agent) = &config.agent {
            errors.extend(Self::validate_agent(agent));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_log_level(level: &str) -> ValidationResult<()> {
        tracing_subscriber::EnvFilter::try_new(level)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: e.to_string(),
            })
    }

    fn validate_fleet(fleet: &FleetEntry) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if fleet.id.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "fleets[].id".to_string(),
            });
        }

        let mut names = HashSet::new();
        for api in &fleet.apis {
            if api.name.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("fleet '{}' api name", fleet.id),
                });
            } else if !names.insert(api.name.as_str()) {
                errors.push(ValidationError::InvalidField {
                    field: format!("fleet '{}' apis", fleet.id),
                    message: format!("api name '{}' is used twice", api.name),
                });
            }
        }

        for path in fleet.source_paths() {
            if !Path::new(path).is_file() {
                errors.push(ValidationError::MissingDocument {
                    path: path.to_string(),
                    context: format!("fleet '{}'", fleet.id),
                });
            }
        }

        errors
    }

    fn validate_agent(agent: &AgentConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&agent.listen_addr) {
            errors.push(e);
        }
        if let Err(e) = Self::validate_url(&agent.manager_url, "agent.manager_url") {
            errors.push(e);
        }
        if agent.fleet_id.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "agent.fleet_id".to_string(),
            });
        }

        errors
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }
                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }
                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::ApiEntry;

    fn config_with_document(path: &str) -> ControlPlaneConfig {
        ControlPlaneConfig {
            fleets: vec![FleetEntry {
                id: "default".to_string(),
                apis: vec![ApiEntry {
                    name: "todos".to_string(),
                    spec_path: path.to_string(),
                }],
                static_routes: vec![],
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let mut document = NamedTempFile::new().unwrap();
        write!(document, "openapi: 3.0.0").unwrap();
        let config = config_with_document(document.path().to_str().unwrap());
        assert!(ControlPlaneConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = config_with_document("/definitely/not/here.yaml");
        config.distribution_addr = "nope".to_string();
        config.fanout_send_timeout = "soon".to_string();
        config.fleets.push(config.fleets[0].clone());

        let err = ControlPlaneConfigValidator::validate(&config).unwrap_err();
        let ValidationError::ValidationFailed { message } = err else {
            panic!("expected aggregated error");
        };
        assert!(message.contains("Invalid listen address 'nope'"));
        assert!(message.contains("fanout_send_timeout"));
        assert!(message.contains("Duplicate fleet id 'default'"));
        assert!(message.contains("/definitely/not/here.yaml"));
    }

    #[test]
    fn test_agent_manager_url() {
        let config = ControlPlaneConfig {
            agent: Some(AgentConfig {
                listen_addr: "127.0.0.1:8090".to_string(),
                manager_url: "ftp://manager".to_string(),
                fleet_id: "default".to_string(),
                node_name: "agent".to_string(),
            }),
            ..Default::default()
        };
        let err = ControlPlaneConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("agent.manager_url"));
    }
}
