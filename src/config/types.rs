//! Configuration types
//!
//! JSON keys follow the service's established configuration schema:
//!
//! ```json
//! // client
//! {
//!   "EndPoints": ["127.0.0.1:53"],
//!   "Resolver": "wss://dns.example.net/tunnel",
//!   "ResolverAuthToken": "secret",
//!   "LogFile": "/var/log/dnsveil.log",
//!   "LogLevel": "info"
//! }
//!
//! // server
//! {
//!   "Urls": ["http://0.0.0.0:8080"],
//!   "Resolver": "8.8.8.8:53",
//!   "AuthToken": ["secret"],
//!   "LogLevel": "info"
//! }
//! ```
//!
//! `AuthToken` accepts either a single string or a list of allowed tokens.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ConfigError;
use crate::transport::ResolverEndpoint;

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to a tracing level.
    #[must_use]
    pub fn as_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ConfigError::validation(format!(
                "unknown log level '{other}'"
            ))),
        }
    }
}

/// Client daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClientConfig {
    /// Local UDP bind addresses the stub resolver talks to.
    pub end_points: Vec<String>,

    /// WebSocket URI of the relay server (`ws://` or `wss://`).
    pub resolver: String,

    /// Pre-shared token presented as the first TEXT message.
    pub resolver_auth_token: String,

    /// Optional log file path; stderr formatting when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Log verbosity.
    pub log_level: LogLevel,
}

impl ClientConfig {
    /// Validate field contents.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.end_points.is_empty() {
            return Err(ConfigError::validation("EndPoints must not be empty"));
        }
        for endpoint in &self.end_points {
            resolve_host_port(endpoint)
                .map_err(|e| ConfigError::validation(format!("EndPoints entry '{endpoint}': {e}")))?;
        }
        ResolverEndpoint::parse(&self.resolver)
            .map_err(|e| ConfigError::validation(format!("Resolver: {e}")))?;
        if self.resolver_auth_token.is_empty() {
            return Err(ConfigError::validation("ResolverAuthToken must not be empty"));
        }
        Ok(())
    }

    /// Resolve the configured endpoints to socket addresses.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if an entry cannot be resolved.
    pub fn endpoint_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.end_points
            .iter()
            .map(|e| {
                resolve_host_port(e)
                    .map_err(|err| ConfigError::validation(format!("EndPoints entry '{e}': {err}")))
            })
            .collect()
    }
}

/// Server daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerConfig {
    /// HTTP bind URIs (or bare `host:port`) to accept WebSocket upgrades on.
    pub urls: Vec<String>,

    /// Upstream recursive resolver, `host:port`, reached via UDP.
    pub resolver: String,

    /// Allowed pre-shared tokens. A single string or a list.
    #[serde(deserialize_with = "string_or_seq")]
    pub auth_token: Vec<String>,

    /// Optional log file path.
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Log verbosity.
    pub log_level: LogLevel,
}

impl ServerConfig {
    /// Validate field contents.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::validation("Urls must not be empty"));
        }
        for url in &self.urls {
            parse_bind_url(url)
                .map_err(|e| ConfigError::validation(format!("Urls entry '{url}': {e}")))?;
        }
        resolve_host_port(&self.resolver)
            .map_err(|e| ConfigError::validation(format!("Resolver '{}': {e}", self.resolver)))?;
        if self.auth_token.is_empty() {
            return Err(ConfigError::validation("AuthToken must not be empty"));
        }
        if self.auth_token.iter().any(String::is_empty) {
            return Err(ConfigError::validation("AuthToken entries must not be empty"));
        }
        Ok(())
    }

    /// Resolve the configured bind URIs to socket addresses.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if an entry cannot be resolved.
    pub fn bind_addrs(&self) -> Result<Vec<SocketAddr>, ConfigError> {
        self.urls
            .iter()
            .map(|u| {
                parse_bind_url(u)
                    .map_err(|e| ConfigError::validation(format!("Urls entry '{u}': {e}")))
            })
            .collect()
    }

    /// Resolve the upstream resolver address.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if the address cannot be resolved.
    pub fn upstream_addr(&self) -> Result<SocketAddr, ConfigError> {
        resolve_host_port(&self.resolver)
            .map_err(|e| ConfigError::validation(format!("Resolver '{}': {e}", self.resolver)))
    }
}

/// Resolve a `host:port` string to a socket address.
///
/// Tries a literal parse first, then system name resolution, taking the
/// first result.
///
/// # Errors
///
/// Returns a human-readable reason when neither succeeds.
pub fn resolve_host_port(s: &str) -> Result<SocketAddr, String> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    match s.to_socket_addrs() {
        Ok(mut addrs) => addrs.next().ok_or_else(|| "no addresses returned".into()),
        Err(e) => Err(e.to_string()),
    }
}

/// Parse a bind URI (`http://host:port`, `https://host:port`, or bare
/// `host:port`) to a socket address. Any path component is ignored.
fn parse_bind_url(url: &str) -> Result<SocketAddr, String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    let host_port = rest.split('/').next().unwrap_or(rest);
    resolve_host_port(host_port)
}

fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(token) => vec![token],
        OneOrMany::Many(tokens) => tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_config() -> ClientConfig {
        ClientConfig {
            end_points: vec!["127.0.0.1:53".into()],
            resolver: "wss://dns.example.net/tunnel".into(),
            resolver_auth_token: "secret".into(),
            log_file: None,
            log_level: LogLevel::Info,
        }
    }

    #[test]
    fn client_config_keys_are_pascal_case() {
        let json = r#"{
            "EndPoints": ["127.0.0.1:5353"],
            "Resolver": "wss://dns.example.net/",
            "ResolverAuthToken": "tok",
            "LogLevel": "debug"
        }"#;
        let config: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.end_points, vec!["127.0.0.1:5353"]);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.log_file.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn client_config_rejects_missing_token() {
        let json = r#"{
            "EndPoints": ["127.0.0.1:5353"],
            "Resolver": "wss://dns.example.net/",
            "LogLevel": "info"
        }"#;
        assert!(serde_json::from_str::<ClientConfig>(json).is_err());
    }

    #[test]
    fn client_config_rejects_missing_log_level() {
        let json = r#"{
            "EndPoints": ["127.0.0.1:5353"],
            "Resolver": "wss://dns.example.net/",
            "ResolverAuthToken": "tok"
        }"#;
        assert!(serde_json::from_str::<ClientConfig>(json).is_err());
    }

    #[test]
    fn client_validate_rejects_bad_endpoint() {
        let mut config = client_config();
        config.end_points = vec!["not-an-endpoint".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn client_validate_rejects_bad_scheme() {
        let mut config = client_config();
        config.resolver = "https://dns.example.net/".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn server_auth_token_accepts_single_string() {
        let json = r#"{
            "Urls": ["http://0.0.0.0:8080"],
            "Resolver": "8.8.8.8:53",
            "AuthToken": "only-one",
            "LogLevel": "info"
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.auth_token, vec!["only-one"]);
        config.validate().unwrap();
    }

    #[test]
    fn server_auth_token_accepts_list() {
        let json = r#"{
            "Urls": ["0.0.0.0:8080"],
            "Resolver": "9.9.9.9:53",
            "AuthToken": ["a", "b"],
            "LogLevel": "warn"
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.auth_token.len(), 2);
    }

    #[test]
    fn bind_url_parsing_strips_scheme_and_path() {
        assert_eq!(
            parse_bind_url("http://127.0.0.1:8080/tunnel").unwrap(),
            "127.0.0.1:8080".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bind_url("0.0.0.0:9000").unwrap(),
            "0.0.0.0:9000".parse::<SocketAddr>().unwrap()
        );
        assert!(parse_bind_url("http://nowhere").is_err());
    }

    #[test]
    fn server_validate_rejects_empty_token_entry() {
        let mut config = ServerConfig {
            urls: vec!["127.0.0.1:8080".into()],
            resolver: "8.8.8.8:53".into(),
            auth_token: vec![String::new()],
            log_file: None,
            log_level: LogLevel::Info,
        };
        assert!(config.validate().is_err());
        config.auth_token = vec!["t".into()];
        config.validate().unwrap();
    }

    #[test]
    fn log_level_from_str() {
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("TRACE".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
