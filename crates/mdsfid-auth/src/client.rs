//! Identity backend (MDSFID) client.
//!
//! The client performs exactly two operations:
//!
//! 1. **Create identity** - register a pending identity exchange and obtain
//!    an opaque `id_token`.
//! 2. **Validate identity** - resolve an `id_token` into raw identity fields.
//!
//! The backend reports business rejections with HTTP 200 and a body-level
//! `code`, so transport status and body code are checked independently.
//!
//! # Example
//!
//! ```ignore
//! use mdsfid_auth::{IdentityServiceClient, IdentityServiceConfig};
//!
//! let config = IdentityServiceConfig::new(
//!     "https://mdsfid.example.cl/api",
//!     "/crearidentidad",
//!     "/validaridentidad",
//!     secret,
//! );
//! let client = IdentityServiceClient::new(config)?;
//!
//! let payload = client.validate_identity(&id_token).await?;
//! ```

use std::sync::Arc;

use serde_json::{Map, Value, json};
use url::Url;

use crate::AuthResult;
use crate::config::IdentityServiceConfig;
use crate::error::AuthError;
use crate::signer::{HmacTokenSigner, TokenSigner};
use crate::transport::{HttpTransport, ReqwestTransport, TransportRequest, TransportResponse};

/// Body `code` signalling a successful validation.
pub const SUCCESS_CODE: i64 = 1000;

const CREATE_IDENTITY: &str = "create_identity";
const VALIDATE_IDENTITY: &str = "validate_identity";

/// Client for the identity backend.
///
/// Stateless apart from its configuration; every call signs a fresh token.
#[derive(Clone)]
pub struct IdentityServiceClient {
    config: IdentityServiceConfig,
    transport: Arc<dyn HttpTransport>,
    signer: Arc<dyn TokenSigner>,
}

impl IdentityServiceClient {
    /// Creates a client with a `reqwest` transport and an HMAC signer built
    /// from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` for an invalid configuration, or
    /// `AuthError::Transport` if the HTTP client cannot be built.
    pub fn new(config: IdentityServiceConfig) -> AuthResult<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.timeout)?;
        let signer = HmacTokenSigner::from_config(&config)?;
        Ok(Self::with_parts(config, Arc::new(transport), Arc::new(signer)))
    }

    /// Creates a client with injected transport and signer.
    #[must_use]
    pub fn with_parts(
        config: IdentityServiceConfig,
        transport: Arc<dyn HttpTransport>,
        signer: Arc<dyn TokenSigner>,
    ) -> Self {
        Self {
            config,
            transport,
            signer,
        }
    }

    /// Returns the client configuration.
    #[must_use]
    pub fn config(&self) -> &IdentityServiceConfig {
        &self.config
    }

    /// Signs a new service token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Signing` if the token cannot be encoded.
    pub fn sign_service_token(&self) -> AuthResult<String> {
        self.signer.sign()
    }

    /// Registers a pending identity exchange and returns its `id_token`.
    ///
    /// Not safe to retry unless the backend deduplicates.
    ///
    /// # Arguments
    ///
    /// * `id_user_json` - JSON document with `run_ciudadano`/`dv_ciudadano`
    /// * `client_id` - The authorization provider client id
    /// * `redirect_uri` - Where the provider should send the user back
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Upstream` for a non-2xx status or a body that is
    /// not JSON, and `AuthError::MalformedResponse` if `data.id_token` is
    /// missing.
    pub async fn create_identity(
        &self,
        id_user_json: &str,
        client_id: &str,
        redirect_uri: &str,
    ) -> AuthResult<String> {
        let url = self.endpoint(&self.config.create_identity_path)?;
        let body = json!({
            "id_user": id_user_json,
            "id_client": client_id,
            "uri": redirect_uri,
        });
        let request = TransportRequest::post_json(url, self.signer.sign()?, body);

        let response = self.transport.send(request).await?;
        let body = Self::ensure_json_success(response, CREATE_IDENTITY)?;

        let id_token = body
            .get("data")
            .and_then(|data| data.get("id_token"))
            .ok_or_else(|| AuthError::malformed(CREATE_IDENTITY, "missing data.id_token"))?;

        match id_token {
            Value::String(token) => Ok(token.clone()),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(AuthError::malformed(
                CREATE_IDENTITY,
                "data.id_token is not a string",
            )),
        }
    }

    /// Resolves an `id_token` into the raw identity payload (`data`).
    ///
    /// Safe to retry.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Upstream` for a non-2xx status or non-JSON body,
    /// `AuthError::MalformedResponse` if `code` or an object `data` is
    /// missing, and `AuthError::Rejected` if `code` is not 1000.
    pub async fn validate_identity(&self, id_token: &str) -> AuthResult<Map<String, Value>> {
        let url = self.endpoint(&self.config.validate_identity_path)?;
        let request =
            TransportRequest::get(url, self.signer.sign()?).with_query("id_token", id_token);

        let response = self.transport.send(request).await?;
        let body = Self::ensure_json_success(response, VALIDATE_IDENTITY)?;

        let code = body
            .get("code")
            .filter(|code| !code.is_null())
            .ok_or_else(|| AuthError::malformed(VALIDATE_IDENTITY, "missing code"))?;

        if code.as_i64() != Some(SUCCESS_CODE) {
            tracing::warn!(%code, "Identity backend rejected validation");
            return Err(AuthError::rejected(VALIDATE_IDENTITY, code.to_string()));
        }

        match body.get("data") {
            Some(Value::Object(data)) => Ok(data.clone()),
            _ => Err(AuthError::malformed(
                VALIDATE_IDENTITY,
                "missing data object",
            )),
        }
    }

    /// Joins the base URL and an endpoint path with exactly one `/`.
    fn endpoint(&self, path: &str) -> AuthResult<Url> {
        join_url(&self.config.base_url, path)
    }

    /// Checks the status and that the body is a JSON object or array.
    fn ensure_json_success(
        response: TransportResponse,
        operation: &'static str,
    ) -> AuthResult<Value> {
        let status = response.status;
        let success = response.is_success();
        let json = response
            .json
            .filter(|json| success && (json.is_object() || json.is_array()));
        json.ok_or_else(|| {
            tracing::warn!(operation, status, "Identity backend returned no usable body");
            AuthError::upstream(operation, status, &response.body)
        })
    }
}

impl std::fmt::Debug for IdentityServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityServiceClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Joins `base` and `path`, trimming the separator on both sides.
pub(crate) fn join_url(base: &str, path: &str) -> AuthResult<Url> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| {
        AuthError::Config(crate::config::ConfigError::InvalidValue(format!(
            "invalid endpoint URL {joined}: {e}"
        )))
    })
}
