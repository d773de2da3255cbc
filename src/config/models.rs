use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Top-level configuration, as loaded from the YAML file.
///
/// Immutable after `load_config` returns: runtime entities built from this
/// config only ever mutate their own atomic/guarded fields, never the config
/// itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub server: ServerSection,
    #[serde(alias = "backends")]
    pub backend_groups: Vec<BackendGroupConfig>,
    pub routing: RoutingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    pub listen_addr: String,
    #[serde(default)]
    pub fallback_addr: Option<String>,
    pub tls: TlsConfig,
    #[serde(default)]
    pub quic: QuicConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QuicConfig {
    pub max_streams_per_connection: u64,
    #[serde(with = "duration_secs")]
    pub max_idle_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub keep_alive_period: Duration,
    pub enable_0rtt: bool,
    pub congestion_control: CongestionControl,
    pub max_data: u64,
    pub max_stream_data: u64,
}

impl Default for QuicConfig {
    fn default() -> Self {
        Self {
            max_streams_per_connection: 100,
            max_idle_timeout: Duration::from_secs(30),
            keep_alive_period: Duration::from_secs(10),
            enable_0rtt: false,
            congestion_control: CongestionControl::Cubic,
            max_data: 10_000_000,
            max_stream_data: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CongestionControl {
    Cubic,
    Bbr,
    Newreno,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendGroupConfig {
    pub name: String,
    pub targets: Vec<TargetConfig>,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub health_check: HealthCheckSpecConfig,
    #[serde(default = "default_group_timeout", with = "duration_secs")]
    pub timeout: Duration,
    #[serde(default)]
    pub retries: u32,
}

fn default_group_timeout() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Weighted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HealthCheckSpecConfig {
    pub enabled: bool,
    pub path: String,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub healthy_threshold: u32,
    pub unhealthy_threshold: u32,
}

impl Default for HealthCheckSpecConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/health".to_string(),
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(2),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutingConfig {
    #[serde(default)]
    pub rules: Vec<RouteRuleConfig>,
    #[serde(default)]
    pub default_backend: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RouteRuleConfig {
    pub priority: i32,
    pub path: Option<String>,
    pub path_prefix: Option<String>,
    pub host: Option<String>,
    pub methods: Option<Vec<String>>,
    pub headers: Option<HashMap<String, String>>,
    pub backend: String,
    pub strip_prefix: bool,
}

impl Default for RouteRuleConfig {
    fn default() -> Self {
        Self {
            priority: 0,
            path: None,
            path_prefix: None,
            host: None,
            methods: None,
            headers: None,
            backend: String::new(),
            strip_prefix: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TelemetryConfig {
    pub metrics_addr: String,
    pub metrics_path: String,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_addr: "0.0.0.0:9090".to_string(),
            metrics_path: "/metrics".to_string(),
            log_level: None,
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Health status surfaced on the runtime `Backend` and reused by `/health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Serde (de)serialization of human-friendly durations ("10s", "2m") via `humantime`.
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
server:
  listen_addr: "0.0.0.0:4433"
  tls:
    cert_path: "cert.pem"
    key_path: "key.pem"
backend_groups:
  - name: g
    targets:
      - url: "http://127.0.0.1:8001"
routing:
  default_backend: g
"#
    }

    #[test]
    fn parses_minimal_config_with_defaults() {
        let config: ServerConfig = serde_yaml::from_str(minimal_yaml()).unwrap();
        assert_eq!(config.backend_groups.len(), 1);
        assert_eq!(config.backend_groups[0].strategy, Strategy::RoundRobin);
        assert_eq!(config.backend_groups[0].targets[0].weight, 1);
        assert_eq!(config.backend_groups[0].health_check.healthy_threshold, 2);
        assert_eq!(config.telemetry.metrics_addr, "0.0.0.0:9090");
        assert!(!config.server.quic.enable_0rtt);
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        let bad = format!("{}\nbogus_key: 1\n", minimal_yaml());
        let result: Result<ServerConfig, _> = serde_yaml::from_str(&bad);
        assert!(result.is_err());
    }

    #[test]
    fn legacy_backends_alias_is_accepted() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:4433"
  tls:
    cert_path: "cert.pem"
    key_path: "key.pem"
backends:
  - name: g
    targets:
      - url: "http://127.0.0.1:8001"
routing:
  default_backend: g
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend_groups[0].name, "g");
    }

    #[test]
    fn duration_suffixes_parse() {
        let yaml = r#"
server:
  listen_addr: "0.0.0.0:4433"
  tls:
    cert_path: "cert.pem"
    key_path: "key.pem"
backend_groups:
  - name: g
    targets:
      - url: "http://127.0.0.1:8001"
    timeout: "2m"
    health_check:
      interval: "30s"
routing:
  default_backend: g
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend_groups[0].timeout, Duration::from_secs(120));
        assert_eq!(
            config.backend_groups[0].health_check.interval,
            Duration::from_secs(30)
        );
    }
}
