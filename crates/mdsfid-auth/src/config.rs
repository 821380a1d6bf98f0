//! Handshake and identity-service configuration.
//!
//! Both sections are immutable value objects built once at startup, either
//! programmatically through the `new`/`with_*` builders or from a TOML file
//! plus environment overrides via [`loader::load_config`].
//!
//! # Example (TOML)
//!
//! ```toml
//! [handshake]
//! base_url = "https://vus.example.cl"
//! auth_path = "/auth/login"
//! client_id = "sitio-confianza"
//! allowed_redirect_hosts = ["app.example.cl"]
//!
//! [identity_service]
//! base_url = "https://mdsfid.example.cl/api"
//! create_identity_path = "/crearidentidad"
//! validate_identity_path = "/validaridentidad"
//! timeout = "10s"
//! token_lifetime = "5m"
//! secret_encoding = "base64"
//! ```

use std::fmt;
use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use url::Url;

/// Default outbound request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lifetime of the signed service token.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(300);

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// Root configuration for the `mdsfid` handshake.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MdsfidConfig {
    /// Authorization provider (VUS) settings.
    pub handshake: HandshakeConfig,

    /// Identity backend (MDSFID) settings.
    pub identity_service: IdentityServiceConfig,

    /// Logging settings for binaries embedding the handshake.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MdsfidConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found in any section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.handshake.validate()?;
        self.identity_service.validate()?;
        Ok(())
    }
}

/// Authorization provider settings used to build the login redirect.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HandshakeConfig {
    /// Root of the authorization endpoint.
    pub base_url: String,

    /// Path of the authorization endpoint, relative to `base_url`.
    pub auth_path: String,

    /// This application's identifier with the authorization provider.
    pub client_id: String,

    /// Hosts accepted as callback targets. Empty means nothing is accepted.
    #[serde(default)]
    pub allowed_redirect_hosts: Vec<String>,
}

impl HandshakeConfig {
    /// Creates a handshake configuration with an empty allow-list.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        auth_path: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            auth_path: auth_path.into(),
            client_id: client_id.into(),
            allowed_redirect_hosts: Vec::new(),
        }
    }

    /// Sets the hosts accepted as redirect targets.
    #[must_use]
    pub fn with_allowed_redirect_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_redirect_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Validates the handshake configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for an empty base URL, auth path or
    /// client id and `ConfigError::InvalidValue` for an unparseable base URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_url("handshake.base_url", &self.base_url)?;
        if self.auth_path.trim().is_empty() {
            return Err(ConfigError::Missing("handshake.auth_path".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("handshake.client_id".to_string()));
        }
        if self.allowed_redirect_hosts.is_empty() {
            tracing::warn!("handshake.allowed_redirect_hosts is empty; every redirect will be refused");
        }
        Ok(())
    }
}

/// How the pre-shared signing secret is supplied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretEncoding {
    /// The secret bytes are the UTF-8 bytes of the configured string.
    #[default]
    Raw,
    /// The configured string is standard base64 of the secret bytes.
    Base64,
}

impl SecretEncoding {
    /// Decodes a configured secret into key bytes.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a base64 secret does not decode.
    pub fn decode(self, secret: &str) -> Result<Vec<u8>, ConfigError> {
        match self {
            Self::Raw => Ok(secret.as_bytes().to_vec()),
            Self::Base64 => STANDARD.decode(secret.trim()).map_err(|e| {
                ConfigError::InvalidValue(format!("signing secret is not valid base64: {e}"))
            }),
        }
    }
}

/// Identity backend settings.
#[derive(Clone, Deserialize, Serialize)]
pub struct IdentityServiceConfig {
    /// Root of the identity backend API.
    pub base_url: String,

    /// Path of the create-identity endpoint.
    pub create_identity_path: String,

    /// Path of the validate-identity endpoint.
    pub validate_identity_path: String,

    /// Outbound request timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    /// Lifetime of the signed service token (`exp - iat`).
    #[serde(default = "default_token_lifetime", with = "humantime_serde")]
    pub token_lifetime: Duration,

    /// Pre-shared HMAC secret.
    #[serde(default, skip_serializing)]
    pub signing_secret: String,

    /// How `signing_secret` is encoded.
    #[serde(default)]
    pub secret_encoding: SecretEncoding,

    /// Optional key id emitted as the `kid` header of the service token.
    #[serde(default)]
    pub key_id: Option<String>,
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_token_lifetime() -> Duration {
    DEFAULT_TOKEN_LIFETIME
}

impl IdentityServiceConfig {
    /// Creates an identity-service configuration with default timings.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        create_identity_path: impl Into<String>,
        validate_identity_path: impl Into<String>,
        signing_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            create_identity_path: create_identity_path.into(),
            validate_identity_path: validate_identity_path.into(),
            timeout: DEFAULT_TIMEOUT,
            token_lifetime: DEFAULT_TOKEN_LIFETIME,
            signing_secret: signing_secret.into(),
            secret_encoding: SecretEncoding::Raw,
            key_id: None,
        }
    }

    /// Sets the outbound request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the service token lifetime.
    #[must_use]
    pub fn with_token_lifetime(mut self, lifetime: Duration) -> Self {
        self.token_lifetime = lifetime;
        self
    }

    /// Sets how the signing secret is encoded.
    #[must_use]
    pub fn with_secret_encoding(mut self, encoding: SecretEncoding) -> Self {
        self.secret_encoding = encoding;
        self
    }

    /// Sets the `kid` header for service tokens.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Validates the identity-service configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` for empty URLs, paths or secret and
    /// `ConfigError::InvalidValue` for unparseable URLs, zero durations or a
    /// base64 secret that does not decode.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_url("identity_service.base_url", &self.base_url)?;
        if self.create_identity_path.trim().is_empty() {
            return Err(ConfigError::Missing(
                "identity_service.create_identity_path".to_string(),
            ));
        }
        if self.validate_identity_path.trim().is_empty() {
            return Err(ConfigError::Missing(
                "identity_service.validate_identity_path".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "identity_service.timeout must be > 0".to_string(),
            ));
        }
        if self.token_lifetime.as_secs() == 0 {
            return Err(ConfigError::InvalidValue(
                "identity_service.token_lifetime must be at least 1s".to_string(),
            ));
        }
        if self.signing_secret.is_empty() {
            return Err(ConfigError::Missing(
                "identity_service.signing_secret".to_string(),
            ));
        }
        if self.secret_encoding.decode(&self.signing_secret)?.is_empty() {
            return Err(ConfigError::InvalidValue(
                "identity_service.signing_secret decodes to zero bytes".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for IdentityServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityServiceConfig")
            .field("base_url", &self.base_url)
            .field("create_identity_path", &self.create_identity_path)
            .field("validate_identity_path", &self.validate_identity_path)
            .field("timeout", &self.timeout)
            .field("token_lifetime", &self.token_lifetime)
            .field("signing_secret", &"[REDACTED]")
            .field("secret_encoding", &self.secret_encoding)
            .field("key_id", &self.key_id)
            .finish()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level when `RUST_LOG` is not set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn require_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(field.to_string()));
    }
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidValue(format!("{field} is not a valid URL: {e}")))
}

pub mod loader {
    use std::path::PathBuf;

    use config::{Config, Environment, File};

    use super::{ConfigError, MdsfidConfig};

    /// Default configuration file, looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "mdsfid.toml";

    /// Loads configuration from a TOML file and `MDSFID__*` environment
    /// overrides, then validates it.
    ///
    /// When `path` is `None`, `mdsfid.toml` is used if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Load` if the sources cannot be merged or
    /// deserialized, or any validation error.
    pub fn load_config(path: Option<&str>) -> Result<MdsfidConfig, ConfigError> {
        let mut builder = Config::builder();
        let file = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        } else if path.is_some() {
            return Err(ConfigError::Load(format!(
                "config file not found: {}",
                file.display()
            )));
        }
        // e.g. MDSFID__IDENTITY_SERVICE__SIGNING_SECRET=...
        builder = builder.add_source(
            Environment::with_prefix("MDSFID")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("handshake.allowed_redirect_hosts")
                .try_parsing(true),
        );
        let merged: MdsfidConfig = builder
            .build()
            .map_err(|e| ConfigError::Load(format!("config build error: {e}")))?
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}
