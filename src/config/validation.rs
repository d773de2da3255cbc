use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::config::models::{BackendGroupConfig, RouteRuleConfig, ServerConfig};

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("invalid fallback address '{address}': {reason}")]
    InvalidFallbackAddress { address: String, reason: String },

    #[error("TLS certificate file not found: {path}")]
    CertNotFound { path: String },

    #[error("TLS key file not found: {path}")]
    KeyNotFound { path: String },

    #[error("backend group '{name}' is defined more than once")]
    DuplicateBackendGroup { name: String },

    #[error("backend group '{name}' has no targets")]
    EmptyBackendGroup { name: String },

    #[error("invalid target URL '{url}' in backend group '{group}': {reason}")]
    InvalidTargetUrl {
        group: String,
        url: String,
        reason: String,
    },

    #[error("target weight must be >= 1 (group '{group}', url '{url}')")]
    InvalidWeight { group: String, url: String },

    #[error("health check thresholds for group '{group}' must be >= 1")]
    InvalidHealthCheckThreshold { group: String },

    #[error("route rule #{index} references unknown backend group '{backend}'")]
    UnknownRouteBackend { index: usize, backend: String },

    #[error("default_backend references unknown backend group '{backend}'")]
    UnknownDefaultBackend { backend: String },

    #[error("route rule #{index} has no match predicate (path, path_prefix, host, methods, or headers)")]
    EmptyRoutePredicate { index: usize },

    #[error("routing has neither rules nor a default_backend: no request could ever match")]
    NoRoutesConfigured,

    #[error("metrics address '{address}' is invalid: {reason}")]
    InvalidMetricsAddress { address: String, reason: String },
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a fully-parsed `ServerConfig` against the semantic constraints
/// that serde's structural deserialization cannot express (cross-field
/// references, file existence, numeric ranges).
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        Self::validate_listen_address(&config.server.listen_addr)?;
        if let Some(fallback) = &config.server.fallback_addr {
            Self::validate_fallback_address(fallback)?;
        }
        Self::validate_tls_files(&config.server.tls.cert_path, &config.server.tls.key_path)?;

        let group_names = Self::validate_backend_groups(&config.backend_groups)?;
        Self::validate_routing(&config.routing, &group_names)?;
        Self::validate_metrics_address(&config.telemetry.metrics_addr)?;

        Ok(())
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        address
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })
    }

    fn validate_fallback_address(address: &str) -> ValidationResult<()> {
        address
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidFallbackAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })
    }

    fn validate_metrics_address(address: &str) -> ValidationResult<()> {
        address
            .parse::<SocketAddr>()
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidMetricsAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })
    }

    fn validate_tls_files(cert_path: &str, key_path: &str) -> ValidationResult<()> {
        if !Path::new(cert_path).exists() {
            return Err(ValidationError::CertNotFound {
                path: cert_path.to_string(),
            });
        }
        if !Path::new(key_path).exists() {
            return Err(ValidationError::KeyNotFound {
                path: key_path.to_string(),
            });
        }
        Ok(())
    }

    fn validate_backend_groups(
        groups: &[BackendGroupConfig],
    ) -> ValidationResult<HashSet<String>> {
        let mut seen = HashSet::new();
        for group in groups {
            if !seen.insert(group.name.clone()) {
                return Err(ValidationError::DuplicateBackendGroup {
                    name: group.name.clone(),
                });
            }
            if group.targets.is_empty() {
                return Err(ValidationError::EmptyBackendGroup {
                    name: group.name.clone(),
                });
            }
            for target in &group.targets {
                let parsed = Url::parse(&target.url).map_err(|e| ValidationError::InvalidTargetUrl {
                    group: group.name.clone(),
                    url: target.url.clone(),
                    reason: e.to_string(),
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ValidationError::InvalidTargetUrl {
                        group: group.name.clone(),
                        url: target.url.clone(),
                        reason: "scheme must be http or https".to_string(),
                    });
                }
                if parsed.host_str().is_none() {
                    return Err(ValidationError::InvalidTargetUrl {
                        group: group.name.clone(),
                        url: target.url.clone(),
                        reason: "missing host".to_string(),
                    });
                }
                if target.weight < 1 {
                    return Err(ValidationError::InvalidWeight {
                        group: group.name.clone(),
                        url: target.url.clone(),
                    });
                }
            }
            if group.health_check.healthy_threshold < 1 || group.health_check.unhealthy_threshold < 1
            {
                return Err(ValidationError::InvalidHealthCheckThreshold {
                    group: group.name.clone(),
                });
            }
        }
        Ok(seen)
    }

    fn validate_routing(
        routing: &crate::config::models::RoutingConfig,
        group_names: &HashSet<String>,
    ) -> ValidationResult<()> {
        if routing.rules.is_empty() && routing.default_backend.is_none() {
            return Err(ValidationError::NoRoutesConfigured);
        }

        for (index, rule) in routing.rules.iter().enumerate() {
            if !Self::rule_has_predicate(rule) {
                return Err(ValidationError::EmptyRoutePredicate { index });
            }
            if !group_names.contains(&rule.backend) {
                return Err(ValidationError::UnknownRouteBackend {
                    index,
                    backend: rule.backend.clone(),
                });
            }
        }

        if let Some(default_backend) = &routing.default_backend {
            if !group_names.contains(default_backend) {
                return Err(ValidationError::UnknownDefaultBackend {
                    backend: default_backend.clone(),
                });
            }
        }

        Ok(())
    }

    fn rule_has_predicate(rule: &RouteRuleConfig) -> bool {
        rule.path.is_some()
            || rule.path_prefix.is_some()
            || rule.host.is_some()
            || rule.methods.is_some()
            || rule.headers.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn temp_file() -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"dummy").unwrap();
        f
    }

    fn valid_config(cert: &NamedTempFile, key: &NamedTempFile) -> ServerConfig {
        ServerConfig {
            server: ServerSection {
                listen_addr: "0.0.0.0:4433".to_string(),
                fallback_addr: Some("0.0.0.0:8080".to_string()),
                tls: TlsConfig {
                    cert_path: cert.path().to_string_lossy().to_string(),
                    key_path: key.path().to_string_lossy().to_string(),
                },
                quic: QuicConfig::default(),
            },
            backend_groups: vec![BackendGroupConfig {
                name: "api".to_string(),
                targets: vec![TargetConfig {
                    url: "http://127.0.0.1:8001".to_string(),
                    weight: 1,
                }],
                strategy: Strategy::RoundRobin,
                health_check: HealthCheckSpecConfig::default(),
                timeout: std::time::Duration::from_secs(10),
                retries: 0,
            }],
            routing: RoutingConfig {
                rules: vec![RouteRuleConfig {
                    path_prefix: Some("/api".to_string()),
                    backend: "api".to_string(),
                    ..Default::default()
                }],
                default_backend: Some("api".to_string()),
            },
            telemetry: TelemetryConfig::default(),
        }
    }

    #[test]
    fn accepts_valid_config() {
        let cert = temp_file();
        let key = temp_file();
        let config = valid_config(&cert, &key);
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn rejects_invalid_listen_address() {
        let cert = temp_file();
        let key = temp_file();
        let mut config = valid_config(&cert, &key);
        config.server.listen_addr = "not-an-address".to_string();
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ValidationError::InvalidListenAddress { .. })
        ));
    }

    #[test]
    fn rejects_missing_cert_file() {
        let cert = temp_file();
        let key = temp_file();
        let mut config = valid_config(&cert, &key);
        config.server.tls.cert_path = "/nonexistent/cert.pem".to_string();
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ValidationError::CertNotFound { .. })
        ));
    }

    #[test]
    fn rejects_empty_backend_group() {
        let cert = temp_file();
        let key = temp_file();
        let mut config = valid_config(&cert, &key);
        config.backend_groups[0].targets.clear();
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ValidationError::EmptyBackendGroup { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_backend_group_names() {
        let cert = temp_file();
        let key = temp_file();
        let mut config = valid_config(&cert, &key);
        let dup = config.backend_groups[0].clone();
        config.backend_groups.push(dup);
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ValidationError::DuplicateBackendGroup { .. })
        ));
    }

    #[test]
    fn rejects_unknown_route_backend() {
        let cert = temp_file();
        let key = temp_file();
        let mut config = valid_config(&cert, &key);
        config.routing.rules[0].backend = "missing".to_string();
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ValidationError::UnknownRouteBackend { .. })
        ));
    }

    #[test]
    fn rejects_unknown_default_backend() {
        let cert = temp_file();
        let key = temp_file();
        let mut config = valid_config(&cert, &key);
        config.routing.default_backend = Some("missing".to_string());
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ValidationError::UnknownDefaultBackend { .. })
        ));
    }

    #[test]
    fn rejects_route_with_no_predicate() {
        let cert = temp_file();
        let key = temp_file();
        let mut config = valid_config(&cert, &key);
        config.routing.rules[0].path_prefix = None;
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ValidationError::EmptyRoutePredicate { .. })
        ));
    }

    #[test]
    fn rejects_zero_weight_target() {
        let cert = temp_file();
        let key = temp_file();
        let mut config = valid_config(&cert, &key);
        config.backend_groups[0].targets[0].weight = 0;
        assert!(matches!(
            ConfigValidator::validate(&config),
            Err(ValidationError::InvalidWeight { .. })
        ));
    }
}
