//! Access-token path: ask the provider's tokeninfo endpoint.

use super::{PathFailure, Principal};
use reqwest::StatusCode;
use serde::Deserialize;

/// Fields of a tokeninfo response that matter here.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    aud: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
    #[serde(default)]
    sub: Option<String>,
}

pub struct IntrospectionClient {
    http: reqwest::Client,
    tokeninfo_url: String,
    client_id: String,
}

impl IntrospectionClient {
    pub fn new(http: reqwest::Client, tokeninfo_url: String, client_id: String) -> Self {
        Self {
            http,
            tokeninfo_url,
            client_id,
        }
    }

    pub async fn verify(&self, token: &str) -> Result<Principal, PathFailure> {
        let response = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("access_token", token)])
            .send()
            .await
            .map_err(|e| PathFailure::Unreachable(e.to_string()))?;

        if response.status() != StatusCode::OK {
            return Err(PathFailure::Rejected {
                status: response.status().as_u16(),
            });
        }

        let info: TokenInfo = response
            .json()
            .await
            .map_err(|e| PathFailure::Malformed(e.to_string()))?;

        if info.aud.as_deref() != Some(self.client_id.as_str()) {
            return Err(PathFailure::AudienceMismatch);
        }

        Ok(Principal {
            email: info.email.ok_or(PathFailure::MissingClaim("email"))?,
            subject_id: info.sub.ok_or(PathFailure::MissingClaim("sub"))?,
            display_name: info.name,
            picture_url: info.picture,
        })
    }
}
