//! Error types for the delegated authentication handshake.
//!
//! A single taxonomy covers both the orchestrator and the identity-service
//! client, so callers can match on one enum regardless of which stage failed.
//! State validation is deliberately absent: a rejected state is an ordinary
//! `false`, not an error.

use crate::config::ConfigError;

/// Maximum number of characters of an upstream body kept for diagnostics.
const DETAIL_SNIPPET_LEN: usize = 512;

/// Errors that can occur during the authentication handshake.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The requested redirect URI is unparseable or its host is not allowed.
    #[error("Invalid redirect URI: {reason}")]
    InvalidRedirectUri {
        /// Why the redirect URI was refused.
        reason: String,
    },

    /// The identity backend could not be reached (network, timeout, cancel).
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The identity backend answered outside 2xx or without a JSON body.
    #[error("Upstream error during {operation}: HTTP {status} - {detail}")]
    Upstream {
        /// The backend operation that failed.
        operation: &'static str,
        /// HTTP status code returned by the backend.
        status: u16,
        /// Bounded snippet of the response body.
        detail: String,
    },

    /// The identity backend answered 2xx but rejected the request in its body.
    #[error("Upstream rejected {operation}: code {code}")]
    Rejected {
        /// The backend operation that was rejected.
        operation: &'static str,
        /// The business code carried in the response body.
        code: String,
    },

    /// The response is valid JSON but a required field is missing.
    #[error("Malformed response from {operation}: {reason}")]
    MalformedResponse {
        /// The backend operation whose response was malformed.
        operation: &'static str,
        /// Which required field was missing or of the wrong shape.
        reason: String,
    },

    /// No national identifier could be resolved from the validated payload.
    #[error("National identifier not found in identity payload")]
    IdentityNotFound,

    /// The service token could not be signed.
    #[error("Token signing failed: {0}")]
    Signing(String),

    /// The state store backend failed.
    #[error("State store error: {0}")]
    StateStore(String),

    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AuthError {
    /// Creates an `InvalidRedirectUri` error.
    #[must_use]
    pub fn invalid_redirect_uri(reason: impl Into<String>) -> Self {
        Self::InvalidRedirectUri {
            reason: reason.into(),
        }
    }

    /// Creates an `Upstream` error, truncating the body to a short snippet.
    #[must_use]
    pub fn upstream(operation: &'static str, status: u16, body: &str) -> Self {
        Self::Upstream {
            operation,
            status,
            detail: body.chars().take(DETAIL_SNIPPET_LEN).collect(),
        }
    }

    /// Creates a `Rejected` error.
    #[must_use]
    pub fn rejected(operation: &'static str, code: impl Into<String>) -> Self {
        Self::Rejected {
            operation,
            code: code.into(),
        }
    }

    /// Creates a `MalformedResponse` error.
    #[must_use]
    pub fn malformed(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            operation,
            reason: reason.into(),
        }
    }

    /// Wraps any transport failure, keeping the original cause.
    #[must_use]
    pub fn transport(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Transport(source.into())
    }

    /// Returns `true` if the backend answered but refused the request.
    #[must_use]
    pub fn is_upstream_error(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Rejected { .. })
    }

    /// Returns `true` if this is a network or external service error.
    #[must_use]
    pub fn is_external_error(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Upstream { .. }
                | Self::Rejected { .. }
                | Self::MalformedResponse { .. }
        )
    }

    /// Returns `true` if the failure was caused by caller input.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidRedirectUri { .. })
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AuthError::invalid_redirect_uri("host not allowed");
        assert_eq!(err.to_string(), "Invalid redirect URI: host not allowed");

        let err = AuthError::upstream("create_identity", 500, "boom");
        assert_eq!(
            err.to_string(),
            "Upstream error during create_identity: HTTP 500 - boom"
        );

        let err = AuthError::rejected("validate_identity", "2000");
        assert!(err.to_string().contains("2000"));

        let err = AuthError::malformed("create_identity", "missing data.id_token");
        assert!(err.to_string().contains("data.id_token"));
    }

    #[test]
    fn test_upstream_detail_is_truncated() {
        let body = "x".repeat(2048);
        let AuthError::Upstream { detail, .. } = AuthError::upstream("op", 502, &body) else {
            panic!("expected Upstream");
        };
        assert_eq!(detail.len(), DETAIL_SNIPPET_LEN);
    }

    #[test]
    fn test_error_predicates() {
        assert!(AuthError::upstream("op", 500, "").is_upstream_error());
        assert!(AuthError::rejected("op", "2000").is_upstream_error());
        assert!(!AuthError::IdentityNotFound.is_upstream_error());

        assert!(AuthError::transport("connection reset").is_external_error());
        assert!(AuthError::malformed("op", "no data").is_external_error());
        assert!(!AuthError::invalid_redirect_uri("x").is_external_error());

        assert!(AuthError::invalid_redirect_uri("x").is_client_error());
        assert!(!AuthError::IdentityNotFound.is_client_error());
    }
}
