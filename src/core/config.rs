use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::fmt;

/// Default `recvWindow` sent with signed requests, in milliseconds.
pub const DEFAULT_RECV_WINDOW_MS: u64 = 5_000;

/// Which deployment of the exchange to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Testnet,
}

impl Environment {
    pub const fn is_testnet(self) -> bool {
        matches!(self, Self::Testnet)
    }
}

/// API key pair. Both halves stay wrapped in [`Secret`] and never show up in
/// `Debug` output or serialized configs.
#[derive(Clone)]
pub struct Credentials {
    api_key: Secret<String>,
    secret_key: Secret<String>,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: Secret::new(api_key.into()),
            secret_key: Secret::new(secret_key.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.api_key.expose_secret().is_empty() && !self.secret_key.expose_secret().is_empty()
    }

    /// Get API key (use carefully - exposes secret)
    pub fn api_key(&self) -> &str {
        self.api_key.expose_secret()
    }

    /// Get secret key (use carefully - exposes secret)
    pub fn secret_key(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub credentials: Option<Credentials>,
    pub environment: Environment,
    pub base_url: Option<String>,
    pub ws_url: Option<String>,
    pub recv_window_ms: u64,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for ExchangeConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let redacted = self.credentials.as_ref().map(|_| "[REDACTED]");
        let mut state = serializer.serialize_struct("ExchangeConfig", 6)?;
        state.serialize_field("api_key", &redacted)?;
        state.serialize_field("secret_key", &redacted)?;
        state.serialize_field("environment", &self.environment)?;
        state.serialize_field("base_url", &self.base_url)?;
        state.serialize_field("ws_url", &self.ws_url)?;
        state.serialize_field("recv_window_ms", &self.recv_window_ms)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ExchangeConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ExchangeConfigHelper {
            api_key: Option<String>,
            secret_key: Option<String>,
            #[serde(default)]
            environment: Environment,
            base_url: Option<String>,
            ws_url: Option<String>,
            recv_window_ms: Option<u64>,
        }

        let helper = ExchangeConfigHelper::deserialize(deserializer)?;
        let credentials = match (helper.api_key, helper.secret_key) {
            (Some(api_key), Some(secret_key)) => Some(Credentials::new(api_key, secret_key)),
            _ => None,
        };
        Ok(Self {
            credentials,
            environment: helper.environment,
            base_url: helper.base_url,
            ws_url: helper.ws_url,
            recv_window_ms: helper.recv_window_ms.unwrap_or(DEFAULT_RECV_WINDOW_MS),
        })
    }
}

impl ExchangeConfig {
    /// Create a new configuration with API credentials
    #[must_use]
    pub fn new(api_key: String, secret_key: String) -> Self {
        Self {
            credentials: Some(Credentials::new(api_key, secret_key)),
            environment: Environment::Production,
            base_url: None,
            ws_url: None,
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
        }
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_API_KEY` (e.g., `BINANCE_COINM_API_KEY`)
    /// - `{PREFIX}_SECRET_KEY`
    /// - `{PREFIX}_TESTNET` (optional, defaults to false)
    /// - `{PREFIX}_BASE_URL` (optional)
    /// - `{PREFIX}_WS_URL` (optional)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let api_key_var = format!("{}_API_KEY", prefix);
        let secret_key_var = format!("{}_SECRET_KEY", prefix);

        let api_key = env::var(&api_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(api_key_var))?;
        let secret_key = env::var(&secret_key_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(secret_key_var))?;

        let testnet = env::var(format!("{}_TESTNET", prefix))
            .unwrap_or_else(|_| "false".to_string())
            .parse::<bool>()
            .unwrap_or(false);

        let recv_window_ms = match env::var(format!("{}_RECV_WINDOW_MS", prefix)) {
            Ok(raw) => raw.parse::<u64>().map_err(|e| {
                ConfigError::InvalidConfiguration(format!("Invalid recv window '{}': {}", raw, e))
            })?,
            Err(_) => DEFAULT_RECV_WINDOW_MS,
        };

        Ok(Self {
            credentials: Some(Credentials::new(api_key, secret_key)),
            environment: if testnet {
                Environment::Testnet
            } else {
                Environment::Production
            },
            base_url: env::var(format!("{}_BASE_URL", prefix)).ok(),
            ws_url: env::var(format!("{}_WS_URL", prefix)).ok(),
            recv_window_ms,
        })
    }

    /// Create configuration from .env file and environment variables
    ///
    /// **Security Warning**: Never commit .env files to version control!
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    /// Create configuration from a specific .env file path
    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {
                // no file, fall back to the process environment
            }
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    /// Configuration for public endpoints and market streams only.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            credentials: None,
            environment: Environment::Production,
            base_url: None,
            ws_url: None,
            recv_window_ms: DEFAULT_RECV_WINDOW_MS,
        }
    }

    /// Check if this configuration has valid credentials for authenticated operations
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.credentials.as_ref().is_some_and(Credentials::is_complete)
    }

    /// Set testnet mode
    #[must_use]
    pub const fn testnet(mut self, testnet: bool) -> Self {
        self.environment = if testnet {
            Environment::Testnet
        } else {
            Environment::Production
        };
        self
    }

    #[must_use]
    pub const fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    /// Set custom REST base URL
    #[must_use]
    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// Set custom WebSocket endpoint
    #[must_use]
    pub fn ws_url(mut self, ws_url: String) -> Self {
        self.ws_url = Some(ws_url);
        self
    }

    #[must_use]
    pub const fn recv_window_ms(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref().filter(|c| c.is_complete())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_redacts_credentials() {
        let config = ExchangeConfig::new("my-api-key".to_string(), "my-secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("my-api-key"));
        assert!(!json.contains("my-secret"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = ExchangeConfig::new("my-api-key".to_string(), "my-secret".to_string());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("my-api-key"));
        assert!(!debug.contains("my-secret"));
    }

    #[test]
    fn test_builder_setters() {
        let config = ExchangeConfig::new("k".to_string(), "s".to_string())
            .testnet(true)
            .recv_window_ms(3_000);
        assert_eq!(config.environment, Environment::Testnet);
        assert_eq!(config.recv_window_ms, 3_000);
        assert!(config.has_credentials());
        assert!(!ExchangeConfig::read_only().has_credentials());
        assert!(!ExchangeConfig::new(String::new(), "s".to_string()).has_credentials());
    }

    #[test]
    fn test_from_env_missing_variable() {
        let err = ExchangeConfig::from_env("COINMX_UNIT_TEST_MISSING").unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvironmentVariable(var) if var == "COINMX_UNIT_TEST_MISSING_API_KEY"));
    }

    #[test]
    fn test_deserialize_config() {
        let config: ExchangeConfig = serde_json::from_str(
            r#"{"api_key":"a","secret_key":"b","environment":"testnet","base_url":null,"ws_url":null}"#,
        )
        .unwrap();
        assert!(config.has_credentials());
        assert!(config.environment.is_testnet());
        assert_eq!(config.recv_window_ms, DEFAULT_RECV_WINDOW_MS);
    }
}
