//! Short-lived service tokens for authenticating to the identity backend.
//!
//! Every backend call carries a fresh HS256 token with only `iat` and `exp`
//! claims, signed with a secret shared with the backend operator.

use std::fmt;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::AuthResult;
use crate::config::{IdentityServiceConfig, SecretEncoding};
use crate::error::AuthError;

/// Produces the bearer token sent to the identity backend.
pub trait TokenSigner: Send + Sync {
    /// Signs a new service token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Signing` if the token cannot be encoded.
    fn sign(&self) -> AuthResult<String>;
}

/// Claims carried by a service token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTokenClaims {
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration (Unix timestamp).
    pub exp: i64,
}

/// HMAC-SHA256 [`TokenSigner`].
///
/// The secret is decoded once here, never per call.
pub struct HmacTokenSigner {
    key: EncodingKey,
    lifetime: Duration,
    key_id: Option<String>,
}

impl HmacTokenSigner {
    /// Creates a signer from an encoded secret.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if a base64 secret does not decode.
    pub fn new(secret: &str, encoding: SecretEncoding, lifetime: Duration) -> AuthResult<Self> {
        let bytes = encoding.decode(secret)?;
        Ok(Self {
            key: EncodingKey::from_secret(&bytes),
            lifetime,
            key_id: None,
        })
    }

    /// Creates a signer from the identity-service configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Config` if the configured secret does not decode.
    pub fn from_config(config: &IdentityServiceConfig) -> AuthResult<Self> {
        let signer = Self::new(
            &config.signing_secret,
            config.secret_encoding,
            config.token_lifetime,
        )?;
        Ok(match &config.key_id {
            Some(kid) => signer.with_key_id(kid.clone()),
            None => signer,
        })
    }

    /// Sets the `kid` header.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Builds the claims for a token issued at `now`.
    #[must_use]
    pub fn claims_at(&self, now: OffsetDateTime) -> ServiceTokenClaims {
        let iat = now.unix_timestamp();
        let lifetime = i64::try_from(self.lifetime.as_secs()).unwrap_or(i64::MAX);
        ServiceTokenClaims {
            iat,
            exp: iat.saturating_add(lifetime),
        }
    }
}

impl TokenSigner for HmacTokenSigner {
    fn sign(&self) -> AuthResult<String> {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = self.key_id.clone();
        let claims = self.claims_at(OffsetDateTime::now_utc());
        encode(&header, &claims, &self.key).map_err(|e| AuthError::Signing(e.to_string()))
    }
}

impl fmt::Debug for HmacTokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacTokenSigner")
            .field("lifetime", &self.lifetime)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};

    use super::*;

    fn decode_claims(token: &str, secret: &[u8]) -> ServiceTokenClaims {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        decode::<ServiceTokenClaims>(token, &DecodingKey::from_secret(secret), &validation)
            .unwrap()
            .claims
    }

    #[test]
    fn test_sign_uses_configured_lifetime() {
        let signer =
            HmacTokenSigner::new("secret", SecretEncoding::Raw, Duration::from_secs(300)).unwrap();
        let token = signer.sign().unwrap();

        let claims = decode_claims(&token, b"secret");
        assert_eq!(claims.exp - claims.iat, 300);

        let now = OffsetDateTime::now_utc().unix_timestamp();
        assert!((claims.iat - now).abs() <= 5);
    }

    #[test]
    fn test_base64_secret_decoded_once() {
        let signer =
            HmacTokenSigner::new("c2VjcmV0", SecretEncoding::Base64, Duration::from_secs(60))
                .unwrap();
        let token = signer.sign().unwrap();

        let claims = decode_claims(&token, b"secret");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn test_invalid_base64_secret() {
        let result = HmacTokenSigner::new("%%%", SecretEncoding::Base64, Duration::from_secs(60));
        assert!(matches!(result, Err(AuthError::Config(_))));
    }

    #[test]
    fn test_key_id_header() {
        let signer = HmacTokenSigner::new("secret", SecretEncoding::Raw, Duration::from_secs(60))
            .unwrap()
            .with_key_id("sitio-confianza");
        let token = signer.sign().unwrap();

        let header = decode_header(&token).unwrap();
        assert_eq!(header.alg, Algorithm::HS256);
        assert_eq!(header.kid.as_deref(), Some("sitio-confianza"));
    }

    #[test]
    fn test_claims_at() {
        let signer =
            HmacTokenSigner::new("secret", SecretEncoding::Raw, Duration::from_secs(90)).unwrap();
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(
            signer.claims_at(now),
            ServiceTokenClaims {
                iat: 1_700_000_000,
                exp: 1_700_000_090,
            }
        );
    }

    #[test]
    fn test_debug_hides_key() {
        let signer =
            HmacTokenSigner::new("secret", SecretEncoding::Raw, Duration::from_secs(60)).unwrap();
        assert!(!format!("{signer:?}").contains("secret"));
    }
}
