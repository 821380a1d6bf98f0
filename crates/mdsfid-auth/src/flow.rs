//! Authentication flow orchestration.
//!
//! This module provides the [`AuthFlow`] that drives one delegated login:
//!
//! 1. **Start login** - check the redirect URI, issue a state value and
//!    build the authorization URL.
//! 2. **Validate state** - consume the stored state and compare it with the
//!    one returned by the provider.
//! 3. **Resolve identity** - exchange the callback `id_token` for a
//!    normalized [`IdentityRecord`].
//!
//! Steps 1 and 2 happen in unrelated HTTP requests; the only shared resource
//! between them is the [`StateStore`].
//!
//! # Example
//!
//! ```ignore
//! use mdsfid_auth::{AuthFlow, HandshakeConfig, IdentityServiceClient, InMemoryStateStore};
//!
//! let flow = AuthFlow::new(handshake, client, Arc::new(InMemoryStateStore::new()));
//!
//! // Redirect the user here
//! let url = flow.start_login("https://app.example.cl/callback").await?;
//!
//! // In the callback handler
//! if !flow.validate_state(params.state.as_deref()).await {
//!     return forbidden();
//! }
//! let identity = flow.resolve_identity(&params.id_token).await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use subtle::ConstantTimeEq;
use url::Url;

use crate::AuthResult;
use crate::client::{IdentityServiceClient, join_url};
use crate::config::HandshakeConfig;
use crate::error::AuthError;
use crate::identity::IdentityRecord;
use crate::state::{DEFAULT_STATE_KEY, StateStore, generate_state};

/// Performs the consuming application's own login for a verified identity.
#[async_trait]
pub trait LoginExecutor: Send + Sync {
    /// Whatever the application needs to decide the post-login redirect.
    type Output: Send;

    /// Logs the identity in locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the local login fails.
    async fn login(&self, identity: &IdentityRecord) -> AuthResult<Self::Output>;
}

/// Decides where to send the user after a local login.
pub trait PostLoginRedirector<R>: Send + Sync {
    /// Returns the URL or internal route to redirect to.
    fn resolve(&self, login_result: &R) -> String;
}

/// Result of handling a provider callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The login succeeded; redirect the user here.
    Redirect(String),
    /// The state was missing, reused or forged.
    StateRejected,
}

/// Orchestrates the delegated authentication handshake.
#[derive(Clone)]
pub struct AuthFlow {
    config: HandshakeConfig,
    client: IdentityServiceClient,
    state_store: Arc<dyn StateStore>,
    state_key: String,
    allowed_hosts: Vec<String>,
}

impl AuthFlow {
    /// Creates a flow storing state under [`DEFAULT_STATE_KEY`].
    #[must_use]
    pub fn new(
        config: HandshakeConfig,
        client: IdentityServiceClient,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        let allowed_hosts = config
            .allowed_redirect_hosts
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();

        Self {
            config,
            client,
            state_store,
            state_key: DEFAULT_STATE_KEY.to_string(),
            allowed_hosts,
        }
    }

    /// Sets the key the state is stored under.
    #[must_use]
    pub fn with_state_key(mut self, state_key: impl Into<String>) -> Self {
        self.state_key = state_key.into();
        self
    }

    /// Returns the handshake configuration.
    #[must_use]
    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    /// Returns the identity-service client.
    #[must_use]
    pub fn client(&self) -> &IdentityServiceClient {
        &self.client
    }

    /// Returns the key the state is stored under.
    #[must_use]
    pub fn state_key(&self) -> &str {
        &self.state_key
    }

    /// Starts a login and returns the authorization URL to redirect to.
    ///
    /// The redirect URI is checked before any state is generated, so a
    /// refused request leaves the state store untouched.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidRedirectUri` if the host is not allowed,
    /// `AuthError::StateStore` if the state cannot be stored.
    pub async fn start_login(&self, redirect_uri: &str) -> AuthResult<Url> {
        self.check_redirect_uri(redirect_uri)?;

        let state = generate_state();
        self.state_store.put(&self.state_key, &state).await?;

        let mut url = join_url(&self.config.base_url, &self.config.auth_path)?;
        url.query_pairs_mut()
            .append_pair("state", &state)
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri);

        tracing::debug!(
            "Generated authorization URL: {}",
            url.as_str().split('?').next().unwrap_or("")
        );

        Ok(url)
    }

    /// Consumes the stored state and compares it with `received_state`.
    ///
    /// Each issued state validates at most once. Never fails: a missing,
    /// reused or mismatching state, or a store error, all yield `false`.
    pub async fn validate_state(&self, received_state: Option<&str>) -> bool {
        let stored = match self.state_store.pull(&self.state_key).await {
            Ok(Some(stored)) if !stored.is_empty() => stored,
            Ok(_) => {
                tracing::warn!("State validation failed: no state stored");
                return false;
            }
            Err(e) => {
                tracing::warn!(error = %e, "State validation failed: state store error");
                return false;
            }
        };

        let Some(received) = received_state else {
            tracing::warn!("State validation failed: no state received");
            return false;
        };

        let matches: bool = stored.as_bytes().ct_eq(received.as_bytes()).into();
        if !matches {
            tracing::warn!("State validation failed: state mismatch");
        }
        matches
    }

    /// Resolves a callback `id_token` into a verified identity.
    ///
    /// # Errors
    ///
    /// Propagates identity-service errors and returns
    /// `AuthError::IdentityNotFound` if no national identifier resolves.
    pub async fn resolve_identity(&self, id_token: &str) -> AuthResult<IdentityRecord> {
        let payload = self.client.validate_identity(id_token).await?;
        let identity = IdentityRecord::from_payload(payload)?;

        tracing::info!("Resolved identity from identity backend");

        Ok(identity)
    }

    /// Handles a provider callback end to end: validates the state, resolves
    /// the identity, runs the local login and picks the redirect.
    ///
    /// # Errors
    ///
    /// Propagates errors from identity resolution and from `executor`.
    pub async fn complete_login<E, P>(
        &self,
        received_state: Option<&str>,
        id_token: &str,
        executor: &E,
        redirector: &P,
    ) -> AuthResult<CallbackOutcome>
    where
        E: LoginExecutor,
        P: PostLoginRedirector<E::Output>,
    {
        if !self.validate_state(received_state).await {
            return Ok(CallbackOutcome::StateRejected);
        }

        let identity = self.resolve_identity(id_token).await?;
        let login_result = executor.login(&identity).await?;

        Ok(CallbackOutcome::Redirect(redirector.resolve(&login_result)))
    }

    /// Returns `true` if `redirect_uri` parses and its host is allowed.
    #[must_use]
    pub fn is_valid_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.check_redirect_uri(redirect_uri).is_ok()
    }

    fn check_redirect_uri(&self, redirect_uri: &str) -> AuthResult<()> {
        let url = Url::parse(redirect_uri)
            .map_err(|e| AuthError::invalid_redirect_uri(format!("unparseable URI: {e}")))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AuthError::invalid_redirect_uri("URI has no host"))?;

        // The parser lower-cases hosts; the allow-list matches the host as written.
        if written_host(redirect_uri) != Some(host) {
            tracing::warn!(host, "Refused redirect URI whose host was normalized by parsing");
            return Err(AuthError::invalid_redirect_uri(format!(
                "host '{host}' is not allowed"
            )));
        }

        if self.allowed_hosts.iter().any(|allowed| allowed == host) {
            Ok(())
        } else {
            tracing::warn!(host, "Refused redirect URI with host outside the allow-list");
            Err(AuthError::invalid_redirect_uri(format!(
                "host '{host}' is not allowed"
            )))
        }
    }
}

/// Host component of `uri` exactly as it appears in the input.
fn written_host(uri: &str) -> Option<&str> {
    let (_, rest) = uri.trim().split_once("://")?;
    let authority = rest
        .split(['/', '\\', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host_port)| host_port);

    if host_port.starts_with('[') {
        host_port.find(']').map(|end| &host_port[..=end])
    } else {
        host_port.split(':').next()
    }
}

impl std::fmt::Debug for AuthFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlow")
            .field("config", &self.config)
            .field("client", &self.client)
            .field("state_key", &self.state_key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::config::IdentityServiceConfig;
    use crate::signer::TokenSigner;
    use crate::state::InMemoryStateStore;
    use crate::transport::{HttpTransport, TransportRequest, TransportResponse};

    struct StaticSigner;

    impl TokenSigner for StaticSigner {
        fn sign(&self) -> AuthResult<String> {
            Ok("signed".to_string())
        }
    }

    struct JsonTransport(Value);

    #[async_trait]
    impl HttpTransport for JsonTransport {
        async fn send(&self, _request: TransportRequest) -> AuthResult<TransportResponse> {
            Ok(TransportResponse {
                status: 200,
                body: self.0.to_string(),
                json: Some(self.0.clone()),
            })
        }
    }

    struct FailingStore;

    #[async_trait]
    impl StateStore for FailingStore {
        async fn put(&self, _key: &str, _value: &str) -> AuthResult<()> {
            Err(AuthError::StateStore("unavailable".to_string()))
        }

        async fn pull(&self, _key: &str) -> AuthResult<Option<String>> {
            Err(AuthError::StateStore("unavailable".to_string()))
        }
    }

    fn handshake(hosts: &[&str]) -> HandshakeConfig {
        HandshakeConfig::new("https://vus.example.cl/", "/auth/login", "sitio client")
            .with_allowed_redirect_hosts(hosts.iter().copied())
    }

    fn flow_with(
        hosts: &[&str],
        backend: Value,
        store: Arc<dyn StateStore>,
    ) -> AuthFlow {
        let config = IdentityServiceConfig::new(
            "https://mdsfid.example.cl",
            "/crear",
            "/validar",
            "secret",
        );
        let client = IdentityServiceClient::with_parts(
            config,
            Arc::new(JsonTransport(backend)),
            Arc::new(StaticSigner),
        );
        AuthFlow::new(handshake(hosts), client, store)
    }

    fn query_param(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn test_start_login_builds_url_and_stores_state() {
        let store = Arc::new(InMemoryStateStore::new());
        let flow = flow_with(&["app.example.cl"], json!({}), store.clone());

        let url = flow
            .start_login("https://app.example.cl/callback?next=/home")
            .await
            .unwrap();

        assert_eq!(
            url.as_str().split('?').next().unwrap(),
            "https://vus.example.cl/auth/login"
        );
        let state = query_param(&url, "state").unwrap();
        assert_eq!(state.len(), 32);
        assert_eq!(query_param(&url, "client_id").as_deref(), Some("sitio client"));
        assert_eq!(
            query_param(&url, "redirect_uri").as_deref(),
            Some("https://app.example.cl/callback?next=/home")
        );
        assert!(url.as_str().contains("client_id=sitio+client"));
        assert!(url.as_str().contains("redirect_uri=https%3A%2F%2Fapp.example.cl"));

        assert_eq!(store.pull(DEFAULT_STATE_KEY).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn test_start_login_refuses_unlisted_host_without_storing() {
        let store = Arc::new(InMemoryStateStore::new());
        let flow = flow_with(&["app.example.cl"], json!({}), store.clone());

        for uri in [
            "https://evil.example.com/callback",
            "https://app.example.cl.evil.com/callback",
            "not a uri",
            "/relative/callback",
            "mailto:someone@app.example.cl",
        ] {
            let err = flow.start_login(uri).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidRedirectUri { .. }), "{uri}");
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_host_match_is_case_sensitive() {
        let store = Arc::new(InMemoryStateStore::new());
        let flow = flow_with(&["app.example.cl"], json!({}), store.clone());

        for uri in [
            "https://APP.EXAMPLE.CL/cb",
            "https://App.example.cl/cb",
            "https://user@APP.example.cl:8443/cb",
        ] {
            assert!(!flow.is_valid_redirect_uri(uri), "{uri}");
            let err = flow.start_login(uri).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidRedirectUri { .. }), "{uri}");
        }
        assert!(store.is_empty());

        assert!(flow.is_valid_redirect_uri("https://user@app.example.cl:8443/cb?x=1"));
        assert!(flow.is_valid_redirect_uri("https://app.example.cl"));
    }

    #[test]
    fn test_written_host() {
        assert_eq!(written_host("https://APP.example.cl/cb"), Some("APP.example.cl"));
        assert_eq!(written_host("https://u:p@h.example:80?q"), Some("h.example"));
        assert_eq!(written_host("http://[::1]:8080/"), Some("[::1]"));
        assert_eq!(written_host("mailto:someone@app.example.cl"), None);
    }

    #[tokio::test]
    async fn test_empty_allow_list_refuses_everything() {
        let store = Arc::new(InMemoryStateStore::new());
        let flow = flow_with(&[], json!({}), store.clone());

        assert!(!flow.is_valid_redirect_uri("https://app.example.cl/callback"));
        assert!(flow.start_login("https://app.example.cl/callback").await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_allow_list_entries_are_trimmed() {
        let flow = flow_with(
            &["  app.example.cl "],
            json!({}),
            Arc::new(InMemoryStateStore::new()),
        );
        assert!(flow.is_valid_redirect_uri("https://app.example.cl/cb"));
        assert!(!flow.is_valid_redirect_uri("https://other.example.cl/cb"));
    }

    #[tokio::test]
    async fn test_state_validates_once() {
        let store = Arc::new(InMemoryStateStore::new());
        let flow = flow_with(&["app.example.cl"], json!({}), store);

        let url = flow.start_login("https://app.example.cl/cb").await.unwrap();
        let state = query_param(&url, "state").unwrap();

        assert!(flow.validate_state(Some(&state)).await);
        assert!(!flow.validate_state(Some(&state)).await);
    }

    #[tokio::test]
    async fn test_state_mismatch_consumes_stored_state() {
        let store = Arc::new(InMemoryStateStore::new());
        let flow = flow_with(&["app.example.cl"], json!({}), store.clone());

        let url = flow.start_login("https://app.example.cl/cb").await.unwrap();
        let state = query_param(&url, "state").unwrap();

        assert!(!flow.validate_state(Some("0123456789abcdef0123456789abcdef")).await);
        assert!(!flow.validate_state(Some(&state)).await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_validate_state_empty_store_and_none() {
        let store = Arc::new(InMemoryStateStore::new());
        let flow = flow_with(&["app.example.cl"], json!({}), store.clone());

        assert!(!flow.validate_state(None).await);
        assert!(!flow.validate_state(Some("anything")).await);

        store.put(DEFAULT_STATE_KEY, "stored").await.unwrap();
        assert!(!flow.validate_state(None).await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_errors() {
        let flow = flow_with(&["app.example.cl"], json!({}), Arc::new(FailingStore));

        let err = flow.start_login("https://app.example.cl/cb").await.unwrap_err();
        assert!(matches!(err, AuthError::StateStore(_)));
        assert!(!flow.validate_state(Some("state")).await);
    }

    #[tokio::test]
    async fn test_custom_state_key() {
        let store = Arc::new(InMemoryStateStore::new());
        let flow = flow_with(&["app.example.cl"], json!({}), store.clone())
            .with_state_key("vus_auth_state");

        flow.start_login("https://app.example.cl/cb").await.unwrap();
        assert!(store.pull("vus_auth_state").await.unwrap().is_some());
        assert!(store.pull(DEFAULT_STATE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_identity_flat() {
        let flow = flow_with(
            &[],
            json!({"code": 1000, "data": {"run_ciudadano": 12345678, "dv_ciudadano": "5"}}),
            Arc::new(InMemoryStateStore::new()),
        );

        let identity = flow.resolve_identity("tok").await.unwrap();
        assert_eq!(identity.national_id(), 12345678);
        assert_eq!(identity.check_digit(), "5");
    }

    #[tokio::test]
    async fn test_resolve_identity_not_found() {
        let flow = flow_with(
            &[],
            json!({"code": 1000, "data": {"nombre": "Ana"}}),
            Arc::new(InMemoryStateStore::new()),
        );

        let err = flow.resolve_identity("tok").await.unwrap_err();
        assert!(matches!(err, AuthError::IdentityNotFound));
    }

    struct RecordingLogin;

    #[async_trait]
    impl LoginExecutor for RecordingLogin {
        type Output = u64;

        async fn login(&self, identity: &IdentityRecord) -> AuthResult<u64> {
            Ok(identity.national_id())
        }
    }

    struct DashboardRedirect;

    impl PostLoginRedirector<u64> for DashboardRedirect {
        fn resolve(&self, user_id: &u64) -> String {
            format!("/dashboard/{user_id}")
        }
    }

    #[tokio::test]
    async fn test_complete_login() {
        let store = Arc::new(InMemoryStateStore::new());
        let flow = flow_with(
            &["app.example.cl"],
            json!({"code": 1000, "data": {"id_user": "{\"run_ciudadano\":87654321,\"dv_ciudadano\":\"K\"}"}}),
            store,
        );

        let url = flow.start_login("https://app.example.cl/cb").await.unwrap();
        let state = query_param(&url, "state").unwrap();

        let outcome = flow
            .complete_login(Some(&state), "tok", &RecordingLogin, &DashboardRedirect)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            CallbackOutcome::Redirect("/dashboard/87654321".to_string())
        );

        let replay = flow
            .complete_login(Some(&state), "tok", &RecordingLogin, &DashboardRedirect)
            .await
            .unwrap();
        assert_eq!(replay, CallbackOutcome::StateRejected);
    }
}
