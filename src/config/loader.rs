use std::path::Path;
use thiserror::Error;
use tokio::fs;

use crate::config::models::ServerConfig;
use crate::config::validation::{ConfigValidator, ValidationError};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Loads, parses and validates the proxy configuration from a YAML file.
///
/// Validation failures and parse failures are both surfaced through
/// `ConfigError`, which `main` maps to exit code 1.
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<ServerConfig, ConfigError> {
    let path_ref = path.as_ref();
    let path_display = path_ref.to_string_lossy().to_string();

    let raw = fs::read_to_string(path_ref)
        .await
        .map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

    let config: ServerConfig =
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path_display.clone(),
            source,
        })?;

    ConfigValidator::validate(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn missing_file_yields_read_error() {
        let result = load_config("/nonexistent/path/proxy.yaml").await;
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[tokio::test]
    async fn malformed_yaml_yields_parse_error() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"not: [valid, yaml: structure").unwrap();
        let result = load_config(f.path()).await;
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
