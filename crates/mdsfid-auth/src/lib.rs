//! # mdsfid-auth
//!
//! Delegated authentication handshake with an external authorization
//! provider (VUS) and a trusted identity backend (MDSFID).
//!
//! The consuming application redirects the user to the provider, receives a
//! callback carrying an opaque `id_token`, and exchanges that token through
//! the identity backend for a verified citizen identity (RUN and check
//! digit).
//!
//! ## Modules
//!
//! - [`config`] - Handshake and identity-service configuration
//! - [`error`] - Error taxonomy shared by every stage
//! - [`state`] - Single-use state storage and generation
//! - [`signer`] - Short-lived HS256 service tokens
//! - [`transport`] - Injectable HTTP transport
//! - [`client`] - Identity backend client
//! - [`identity`] - Normalized identity record
//! - [`flow`] - End-to-end handshake orchestration
//!
//! Session management, local user lookup and redirect policy are supplied by
//! the application through [`StateStore`], [`LoginExecutor`] and
//! [`PostLoginRedirector`].

pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod identity;
pub mod signer;
pub mod state;
pub mod transport;

pub use client::{IdentityServiceClient, SUCCESS_CODE};
pub use config::{
    ConfigError, HandshakeConfig, IdentityServiceConfig, LoggingConfig, MdsfidConfig,
    SecretEncoding,
};
pub use error::AuthError;
pub use flow::{AuthFlow, CallbackOutcome, LoginExecutor, PostLoginRedirector};
pub use identity::IdentityRecord;
pub use signer::{HmacTokenSigner, ServiceTokenClaims, TokenSigner};
pub use state::{DEFAULT_STATE_KEY, InMemoryStateStore, StateStore, generate_state};
pub use transport::{
    HttpTransport, ReqwestTransport, TransportMethod, TransportRequest, TransportResponse,
};

/// Type alias for handshake results.
pub type AuthResult<T> = Result<T, AuthError>;
