//! Bearer-token authentication against the external identity provider.
//!
//! A bearer token is either an opaque access token (checked through the
//! provider's introspection endpoint) or a provider-signed identity token
//! (checked locally against the published signing keys). The two shapes
//! cannot be told apart syntactically, so both paths are tried in a fixed
//! order and every failure collapses into a single [`AuthError`].

mod id_token;
mod introspection;

pub use id_token::IdTokenVerifier;
pub use introspection::IntrospectionClient;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use docchat_common::config::AuthConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Authenticated identity derived from a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub email: String,
    pub display_name: Option<String>,
    pub picture_url: Option<String>,
    pub subject_id: String,
}

/// The two ways a bearer token can be interpreted, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationPath {
    AccessToken,
    IdentityToken,
}

impl fmt::Display for VerificationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccessToken => f.write_str("access_token"),
            Self::IdentityToken => f.write_str("identity_token"),
        }
    }
}

/// Why a single verification path rejected a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathFailure {
    #[error("no token supplied")]
    MissingToken,

    #[error("identity provider unreachable: {0}")]
    Unreachable(String),

    #[error("identity provider rejected token (HTTP {status})")]
    Rejected { status: u16 },

    #[error("malformed token or provider response: {0}")]
    Malformed(String),

    #[error("audience does not match this client")]
    AudienceMismatch,

    #[error("issuer not accepted")]
    IssuerMismatch,

    #[error("token expired")]
    Expired,

    #[error("signature verification failed")]
    BadSignature,

    #[error("no published key with id {0:?}")]
    UnknownKey(String),

    #[error("required claim missing: {0}")]
    MissingClaim(&'static str),

    #[error("token invalid: {0}")]
    Invalid(String),
}

/// Authentication failure.
///
/// Always displays as `invalid token`; the per-path causes are kept for
/// logs and tests but never change the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid token")]
pub struct AuthError {
    pub access_token: PathFailure,
    pub identity_token: PathFailure,
}

impl AuthError {
    /// Failure for an absent or blank token; no provider call is made.
    pub fn missing() -> Self {
        Self {
            access_token: PathFailure::MissingToken,
            identity_token: PathFailure::MissingToken,
        }
    }

    pub fn failure(&self, path: VerificationPath) -> &PathFailure {
        match path {
            VerificationPath::AccessToken => &self.access_token,
            VerificationPath::IdentityToken => &self.identity_token,
        }
    }

    pub fn is_missing_token(&self) -> bool {
        self.access_token == PathFailure::MissingToken
    }
}

impl From<AuthError> for docchat_common::Error {
    fn from(e: AuthError) -> Self {
        Self::Auth(e.to_string())
    }
}

/// Seam for anything that turns a bearer token into a [`Principal`].
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Dual-path verifier: introspection first, identity-token second.
///
/// No retries: a network failure on the first path falls through to the
/// second, and a failure there is final.
pub struct IdentityVerifier {
    introspection: IntrospectionClient,
    id_tokens: IdTokenVerifier,
}

impl IdentityVerifier {
    pub fn new(config: &AuthConfig) -> docchat_common::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| docchat_common::Error::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            introspection: IntrospectionClient::new(
                http.clone(),
                config.tokeninfo_url.clone(),
                config.client_id.clone(),
            ),
            id_tokens: IdTokenVerifier::new(
                http,
                config.jwks_url.clone(),
                config.client_id.clone(),
                config.issuers.clone(),
                config.jwks_cache_ttl(),
                config.jwks_refetch_cooldown(),
            ),
        })
    }

    async fn check(&self, path: VerificationPath, token: &str) -> Result<Principal, PathFailure> {
        match path {
            VerificationPath::AccessToken => self.introspection.verify(token).await,
            VerificationPath::IdentityToken => self.id_tokens.verify(token).await,
        }
    }
}

#[async_trait]
impl TokenVerifier for IdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::missing());
        }

        let access_token = match self.check(VerificationPath::AccessToken, token).await {
            Ok(principal) => return Ok(principal),
            Err(failure) => {
                tracing::debug!(path = %VerificationPath::AccessToken, reason = %failure, "Verification path failed");
                failure
            }
        };

        let identity_token = match self.check(VerificationPath::IdentityToken, token).await {
            Ok(principal) => return Ok(principal),
            Err(failure) => {
                tracing::debug!(path = %VerificationPath::IdentityToken, reason = %failure, "Verification path failed");
                failure
            }
        };

        tracing::info!(
            access_token = %access_token,
            identity_token = %identity_token,
            "Authentication failed"
        );

        Err(AuthError {
            access_token,
            identity_token,
        })
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
///
/// The scheme is matched case-insensitively; a blank token counts as absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
