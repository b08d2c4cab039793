//! Relay Configuration
//!
//! One `RelayConfig` is built at process start and handed by reference to the
//! admission gate, the relays and the generation pipeline. Nothing reads the
//! environment after that point.
//!
//! # Sources
//!
//! Values are layered, later sources winning:
//!
//! 1. Built-in defaults
//! 2. TOML file (`--config`, or `$XDG_CONFIG_HOME/token-relay/relay.toml`)
//! 3. Environment variables
//!
//! # Environment Variables
//!
//! - `APPSYNC_ENDPOINT`: pub/sub GraphQL endpoint for private connections
//! - `APPSYNC_API_KEY`: API key sent as `x-api-key`
//! - `AWS_REGION`: region of the websocket gateway
//! - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN`:
//!   credentials for signing gateway pushes and function invocations
//! - `RELAY_PUSH_ENDPOINT`: override for the connection push endpoint
//! - `RELAY_PROCESSOR_FUNCTION`: name of the downstream processing function
//! - `RELAY_INVOKE_URL`: invoke over HTTP instead of in-process
//! - `RELAY_COMPLETION_SIGNAL`: `none` or `streaming_end`
//! - `RELAY_HTTP_TIMEOUT`: outbound request timeout in seconds
//! - `OLLAMA_HOST`, `OLLAMA_PORT`, `RELAY_MODEL`: generation backend
//!
//! # Example
//!
//! ```toml
//! region = "cn-north-1"
//! completion_signal = "streaming_end"
//!
//! [publish]
//! endpoint = "https://example.appsync-api.us-east-1.amazonaws.com/graphql"
//! api_key = "da2-xxxx"
//!
//! [backend]
//! model = "llama3.2"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signing::RequestSigner;

/// Function invoked by the admission gate when none is configured
pub const DEFAULT_PROCESSOR_FUNCTION: &str = "langchain_processor_qa";

/// Errors raised while building or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for this schema
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: toml::de::Error,
    },

    /// A value needed for the requested operation is not configured
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    /// A configured value is out of range or malformed
    #[error("invalid configuration for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Whether the relay sends a terminal envelope when generation ends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionSignal {
    /// `on_end` does nothing; the last token envelope is the final answer
    #[default]
    None,
    /// `on_end` sends one `"streaming_end"` envelope with the full answer
    StreamingEnd,
}

impl CompletionSignal {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "none" | "off" | "" => Some(Self::None),
            "streaming_end" | "end" => Some(Self::StreamingEnd),
            _ => None,
        }
    }
}

/// Pub/sub relay used for private connections
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// GraphQL endpoint URL
    pub endpoint: Option<String>,
    /// API key sent as `x-api-key`
    pub api_key: Option<String>,
}

/// Connection push channel used for direct connections
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Fixed management endpoint, bypassing the region-derived URL
    pub endpoint_override: Option<String>,
}

/// Static AWS credentials used to sign outbound requests
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    /// Access key id
    pub access_key_id: Option<String>,
    /// Secret access key
    pub secret_access_key: Option<String>,
    /// Session token for temporary credentials
    pub session_token: Option<String>,
}

impl std::fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Downstream invocation settings for the admission gate
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct InvocationConfig {
    /// Name of the processing function to invoke
    pub function_name: String,
    /// Invoke over HTTP at this base URL; in-process when unset
    pub url: Option<String>,
}

impl Default for InvocationConfig {
    fn default() -> Self {
        Self {
            function_name: DEFAULT_PROCESSOR_FUNCTION.to_string(),
            url: None,
        }
    }
}

/// Generation backend settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Ollama host
    pub host: String,
    /// Ollama port
    pub port: u16,
    /// Model used for generation runs
    pub model: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.2".to_string(),
        }
    }
}

/// Process-wide relay configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Region of the websocket gateway
    pub region: String,
    /// Outbound HTTP timeout in seconds
    pub http_timeout_secs: u64,
    /// End-of-stream behavior
    pub completion_signal: CompletionSignal,
    /// Pub/sub relay
    pub publish: PublishConfig,
    /// Connection push channel
    pub push: PushConfig,
    /// Downstream invocation
    pub invocation: InvocationConfig,
    /// Generation backend
    pub backend: BackendSettings,
    /// Request signing credentials
    pub credentials: CredentialSettings,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            http_timeout_secs: 30,
            completion_signal: CompletionSignal::default(),
            publish: PublishConfig::default(),
            push: PushConfig::default(),
            invocation: InvocationConfig::default(),
            backend: BackendSettings::default(),
            credentials: CredentialSettings::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from an optional file plus the process environment
    ///
    /// An explicit `path` must exist. Without one, the default path is used
    /// when present and silently skipped otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML config file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("APPSYNC_ENDPOINT") {
            self.publish.endpoint = Some(v);
        }
        if let Some(v) = lookup("APPSYNC_API_KEY") {
            self.publish.api_key = Some(v);
        }
        if let Some(v) = lookup("AWS_REGION") {
            self.region = v;
        }
        if let Some(v) = lookup("AWS_ACCESS_KEY_ID") {
            self.credentials.access_key_id = Some(v);
        }
        if let Some(v) = lookup("AWS_SECRET_ACCESS_KEY") {
            self.credentials.secret_access_key = Some(v);
        }
        if let Some(v) = lookup("AWS_SESSION_TOKEN") {
            self.credentials.session_token = Some(v);
        }
        if let Some(v) = lookup("RELAY_PUSH_ENDPOINT") {
            self.push.endpoint_override = Some(v);
        }
        if let Some(v) = lookup("RELAY_PROCESSOR_FUNCTION") {
            self.invocation.function_name = v;
        }
        if let Some(v) = lookup("RELAY_INVOKE_URL") {
            self.invocation.url = Some(v);
        }
        if let Some(v) = lookup("RELAY_COMPLETION_SIGNAL") {
            self.completion_signal =
                CompletionSignal::parse(&v).ok_or_else(|| ConfigError::Invalid {
                    field: "completion_signal",
                    reason: format!("unknown value {v:?}"),
                })?;
        }
        if let Some(v) = lookup("RELAY_HTTP_TIMEOUT") {
            self.http_timeout_secs = v.parse().map_err(|_| ConfigError::Invalid {
                field: "http_timeout_secs",
                reason: format!("not a number: {v:?}"),
            })?;
        }
        if let Some(v) = lookup("OLLAMA_HOST") {
            self.backend.host = v;
        }
        if let Some(v) = lookup("OLLAMA_PORT") {
            self.backend.port = v.parse().map_err(|_| ConfigError::Invalid {
                field: "backend.port",
                reason: format!("not a port: {v:?}"),
            })?;
        }
        if let Some(v) = lookup("RELAY_MODEL") {
            self.backend.model = v;
        }
        Ok(())
    }

    /// Check values that would otherwise fail late
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "http_timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.invocation.function_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "invocation.function_name",
                reason: "must not be empty".to_string(),
            });
        }
        // A publish key means private connections are expected
        if self.publish.api_key.is_some() && self.publish.endpoint.is_none() {
            return Err(ConfigError::Missing("publish.endpoint"));
        }
        let creds = &self.credentials;
        if creds.access_key_id.is_some() != creds.secret_access_key.is_some() {
            return Err(ConfigError::Invalid {
                field: "credentials",
                reason: "access_key_id and secret_access_key must be set together".to_string(),
            });
        }
        if let Some(endpoint) = &self.publish.endpoint {
            if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                return Err(ConfigError::Invalid {
                    field: "publish.endpoint",
                    reason: format!("not an http(s) URL: {endpoint}"),
                });
            }
        }
        Ok(())
    }

    /// SigV4 signer for `service` in `region`
    ///
    /// Fails with [`ConfigError::Missing`] when no credentials are configured.
    pub fn signer(
        &self,
        service: &'static str,
        region: &str,
    ) -> Result<RequestSigner, ConfigError> {
        let creds = &self.credentials;
        let access_key_id = creds
            .access_key_id
            .clone()
            .ok_or(ConfigError::Missing("credentials.access_key_id"))?;
        let secret_access_key = creds
            .secret_access_key
            .clone()
            .ok_or(ConfigError::Missing("credentials.secret_access_key"))?;
        Ok(RequestSigner::new(
            access_key_id,
            secret_access_key,
            creds.session_token.clone(),
            region,
            service,
        ))
    }

    /// Outbound HTTP timeout
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Build the shared outbound HTTP client
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .timeout(self.http_timeout())
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "http_timeout_secs",
                reason: e.to_string(),
            })
    }
}

/// Default config file location
///
/// `$XDG_CONFIG_HOME/token-relay/relay.toml` (or the platform equivalent).
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("token-relay").join("relay.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.completion_signal, CompletionSignal::None);
        assert_eq!(config.invocation.function_name, DEFAULT_PROCESSOR_FUNCTION);
        assert!(config.publish.endpoint.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
region = "cn-north-1"
completion_signal = "streaming_end"

[publish]
endpoint = "https://pubsub.example.com/graphql"
api_key = "key-1"

[backend]
model = "qwen2.5"
"#
        )
        .unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.region, "cn-north-1");
        assert_eq!(config.completion_signal, CompletionSignal::StreamingEnd);
        assert_eq!(
            config.publish.endpoint.as_deref(),
            Some("https://pubsub.example.com/graphql")
        );
        assert_eq!(config.publish.api_key.as_deref(), Some("key-1"));
        assert_eq!(config.backend.model, "qwen2.5");
        // Untouched sections keep their defaults
        assert_eq!(config.backend.port, 11434);
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_from_file_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "region = [").unwrap();
        let err = RelayConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = RelayConfig::load(Some(Path::new("/nonexistent/relay.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RelayConfig::default();
        config
            .apply_env_with(env(&[
                ("APPSYNC_ENDPOINT", "https://a.example.com/graphql"),
                ("APPSYNC_API_KEY", "secret"),
                ("AWS_REGION", "eu-west-1"),
                ("RELAY_COMPLETION_SIGNAL", "streaming_end"),
                ("RELAY_HTTP_TIMEOUT", "5"),
                ("OLLAMA_PORT", "8080"),
            ]))
            .unwrap();

        assert_eq!(config.publish.endpoint.as_deref(), Some("https://a.example.com/graphql"));
        assert_eq!(config.publish.api_key.as_deref(), Some("secret"));
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.completion_signal, CompletionSignal::StreamingEnd);
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert_eq!(config.backend.port, 8080);
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_env_with(env(&[("RELAY_COMPLETION_SIGNAL", "sometimes")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "completion_signal", .. }));

        let err = config
            .apply_env_with(env(&[("OLLAMA_PORT", "99999")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "backend.port", .. }));
    }

    #[test]
    fn test_validate() {
        let mut config = RelayConfig::default();
        config.http_timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.publish.endpoint = Some("ftp://nope".to_string());
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.invocation.function_name = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = RelayConfig::default();
        config.publish.api_key = Some("da2-key".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("publish.endpoint"))
        ));
    }

    #[test]
    fn test_credentials_from_env() {
        let mut config = RelayConfig::default();
        assert!(matches!(
            config.signer(crate::signing::EXECUTE_API_SERVICE, "us-east-1"),
            Err(ConfigError::Missing("credentials.access_key_id"))
        ));

        config
            .apply_env_with(env(&[
                ("AWS_ACCESS_KEY_ID", "AKID"),
                ("AWS_SECRET_ACCESS_KEY", "hush"),
                ("AWS_SESSION_TOKEN", "FwoGZXIvYXdz"),
            ]))
            .unwrap();
        assert!(config.validate().is_ok());

        let signer = config
            .signer(crate::signing::LAMBDA_SERVICE, "cn-north-1")
            .unwrap();
        assert_eq!(signer.region(), "cn-north-1");
        assert_eq!(signer.service(), "lambda");

        let debug = format!("{:?}", config.credentials);
        assert!(debug.contains("AKID"));
        assert!(!debug.contains("hush"));
        assert!(!debug.contains("FwoGZXIvYXdz"));
    }

    #[test]
    fn test_half_configured_credentials_rejected() {
        let mut config = RelayConfig::default();
        config.credentials.access_key_id = Some("AKID".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "credentials", .. })
        ));
    }

    #[test]
    fn test_default_config_path() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("token-relay/relay.toml"));
        }
    }
}
