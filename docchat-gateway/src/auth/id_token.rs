//! Identity-token path: verify a provider-signed JWT against the published keys.

use super::{PathFailure, Principal};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Verifies RS256 identity tokens; signing keys are cached for `cache_ttl`.
///
/// An unknown key id refetches the key set only when the cached set is at
/// least `refetch_cooldown` old.
pub struct IdTokenVerifier {
    http: reqwest::Client,
    jwks_url: String,
    client_id: String,
    issuers: Vec<String>,
    cache_ttl: Duration,
    refetch_cooldown: Duration,
    cache: RwLock<Option<CachedKeys>>,
}

impl IdTokenVerifier {
    pub fn new(
        http: reqwest::Client,
        jwks_url: String,
        client_id: String,
        issuers: Vec<String>,
        cache_ttl: Duration,
        refetch_cooldown: Duration,
    ) -> Self {
        Self {
            http,
            jwks_url,
            client_id,
            issuers,
            cache_ttl,
            refetch_cooldown,
            cache: RwLock::new(None),
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Principal, PathFailure> {
        let header = decode_header(token).map_err(|e| PathFailure::Malformed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| PathFailure::Malformed("token header has no key id".into()))?;
        let key = self.decoding_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(self.issuers.as_slice());
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let claims = decode::<IdTokenClaims>(token, &key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => PathFailure::Expired,
                ErrorKind::InvalidAudience => PathFailure::AudienceMismatch,
                ErrorKind::InvalidIssuer => PathFailure::IssuerMismatch,
                ErrorKind::InvalidSignature => PathFailure::BadSignature,
                _ => PathFailure::Invalid(e.to_string()),
            })?
            .claims;

        Ok(Principal {
            email: claims.email.ok_or(PathFailure::MissingClaim("email"))?,
            subject_id: claims.sub.ok_or(PathFailure::MissingClaim("sub"))?,
            display_name: claims.name,
            picture_url: claims.picture,
        })
    }

    /// Resolve `kid` to a key, refetching once if the cached set does not know it.
    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, PathFailure> {
        let (keys, refetch_allowed) = match self.cached().await {
            Some((keys, age)) => (keys, age >= self.refetch_cooldown),
            None => (self.refresh().await?, false),
        };

        if let Some(jwk) = keys.find(kid) {
            return to_decoding_key(jwk);
        }
        if !refetch_allowed {
            tracing::debug!(kid, "Unknown signing key, key set too recent to refetch");
            return Err(PathFailure::UnknownKey(kid.to_string()));
        }

        tracing::debug!(kid, "Unknown signing key, refetching key set");
        let keys = self.refresh().await?;
        match keys.find(kid) {
            Some(jwk) => to_decoding_key(jwk),
            None => Err(PathFailure::UnknownKey(kid.to_string())),
        }
    }

    /// Unexpired cached keys and their age.
    async fn cached(&self) -> Option<(Arc<JwkSet>, Duration)> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .map(|c| (c, c.fetched_at.elapsed()))
            .filter(|(_, age)| *age < self.cache_ttl)
            .map(|(c, age)| (Arc::clone(&c.keys), age))
    }

    async fn refresh(&self) -> Result<Arc<JwkSet>, PathFailure> {
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| PathFailure::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PathFailure::Unreachable(format!(
                "key endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| PathFailure::Malformed(format!("key set: {e}")))?;
        let keys = Arc::new(keys);

        tracing::debug!(count = keys.keys.len(), "Fetched identity provider signing keys");

        *self.cache.write().await = Some(CachedKeys {
            keys: Arc::clone(&keys),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }
}

fn to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, PathFailure> {
    DecodingKey::from_jwk(jwk).map_err(|e| PathFailure::Malformed(format!("signing key: {e}")))
}
