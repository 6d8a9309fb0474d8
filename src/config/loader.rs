//! Configuration file loading

use std::path::Path;

use tracing::debug;

use super::types::{ClientConfig, LogLevel, ServerConfig};
use crate::error::ConfigError;

/// Environment variable overriding the configured log level on both sides.
pub const ENV_LOG_LEVEL: &str = "DNSVEIL_LOG_LEVEL";

/// Load and validate the client configuration from a JSON file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_client_config(path: impl AsRef<Path>) -> Result<ClientConfig, ConfigError> {
    let contents = read_config_file(path.as_ref())?;
    load_client_config_str(&contents)
}

/// Load and validate the client configuration from a JSON string.
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_client_config_str(json: &str) -> Result<ClientConfig, ConfigError> {
    let mut config: ClientConfig =
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.log_level = log_level_override(config.log_level)?;
    config.validate()?;
    Ok(config)
}

/// Load and validate the server configuration from a JSON file.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_server_config(path: impl AsRef<Path>) -> Result<ServerConfig, ConfigError> {
    let contents = read_config_file(path.as_ref())?;
    load_server_config_str(&contents)
}

/// Load and validate the server configuration from a JSON string.
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_server_config_str(json: &str) -> Result<ServerConfig, ConfigError> {
    let mut config: ServerConfig =
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
    config.log_level = log_level_override(config.log_level)?;
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<String, ConfigError> {
    debug!("loading configuration from {:?}", path);
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }
    Ok(std::fs::read_to_string(path)?)
}

fn log_level_override(configured: LogLevel) -> Result<LogLevel, ConfigError> {
    match std::env::var(ENV_LOG_LEVEL) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::env(ENV_LOG_LEVEL, format!("invalid level '{value}'"))),
        Err(_) => Ok(configured),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CLIENT_JSON: &str = r#"{
        "EndPoints": ["127.0.0.1:5353"],
        "Resolver": "wss://dns.example.net/tunnel",
        "ResolverAuthToken": "secret",
        "LogLevel": "info"
    }"#;

    #[test]
    fn load_client_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(CLIENT_JSON.as_bytes()).unwrap();

        let config = load_client_config(file.path()).unwrap();
        assert_eq!(config.resolver, "wss://dns.example.net/tunnel");
    }

    #[test]
    fn missing_file_is_reported() {
        let result = load_client_config("/nonexistent/dnsveil.json");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn invalid_json_is_reported() {
        assert!(matches!(
            load_server_config_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let json = r#"{
            "Urls": [],
            "Resolver": "8.8.8.8:53",
            "AuthToken": "t",
            "LogLevel": "info"
        }"#;
        assert!(matches!(
            load_server_config_str(json),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn missing_log_level_is_fatal() {
        let json = r#"{
            "Urls": ["127.0.0.1:8080"],
            "Resolver": "8.8.8.8:53",
            "AuthToken": "t"
        }"#;
        assert!(matches!(
            load_server_config_str(json),
            Err(ConfigError::Parse(_))
        ));
    }
}
