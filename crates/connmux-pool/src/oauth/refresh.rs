//! Refresh-token grant
//!
//! Exchanges a refresh token for a new access token. Performs no retries;
//! the establisher makes exactly one refresh attempt per establishment.

use std::time::Duration;

use async_trait::async_trait;
use connmux_core::{Credential, RefreshOutcome};
use tracing::{debug, info, warn};
use url::Url;

use super::token::{TokenErrorResponse, TokenResponse};
use crate::error::RefreshFailure;

/// Performs the credential refresh for the establisher
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self, credential: &Credential) -> Result<RefreshOutcome, RefreshFailure>;
}

/// OAuth 2.0 refresh-token grant over HTTP
pub struct OAuthRefresher {
    http_client: reqwest::Client,
}

impl OAuthRefresher {
    /// Create a refresher whose token requests time out after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }

    /// Create a refresher around an existing client (shared connection pool)
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

/// Validated inputs of a refresh request
struct RefreshRequest<'a> {
    endpoint: Url,
    refresh_token: &'a str,
    client_id: &'a str,
    client_secret: Option<&'a str>,
    scope: Option<&'a str>,
}

impl<'a> RefreshRequest<'a> {
    /// Check preconditions in order, before any network call
    fn from_credential(credential: &'a Credential) -> Result<Self, RefreshFailure> {
        let refresh_token = credential
            .refresh_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(RefreshFailure::MissingRefreshToken)?;
        let endpoint = credential
            .token_endpoint
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or(RefreshFailure::MissingTokenEndpoint)?;
        let client_id = credential
            .client_id
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(RefreshFailure::MissingClientId)?;

        let endpoint = Url::parse(endpoint).map_err(|e| RefreshFailure::InvalidTokenEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            endpoint,
            refresh_token,
            client_id,
            client_secret: credential.client_secret.as_deref(),
            scope: credential.scope.as_deref(),
        })
    }

    fn form(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", self.refresh_token),
            ("client_id", self.client_id),
        ];
        if let Some(secret) = self.client_secret {
            params.push(("client_secret", secret));
        }
        if let Some(scope) = self.scope {
            params.push(("scope", scope));
        }
        params
    }
}

#[async_trait]
impl CredentialRefresher for OAuthRefresher {
    async fn refresh(&self, credential: &Credential) -> Result<RefreshOutcome, RefreshFailure> {
        let request = RefreshRequest::from_credential(credential)?;

        info!(
            endpoint = %request.endpoint,
            client_id = %request.client_id,
            "[OAuthRefresher] Refreshing access token"
        );

        let response = self
            .http_client
            .post(request.endpoint.clone())
            .form(&request.form())
            .send()
            .await
            .map_err(|e| RefreshFailure::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RefreshFailure::Network(e.to_string()))?;

        if !status.is_success() {
            let reason = serde_json::from_slice::<TokenErrorResponse>(&body)
                .ok()
                .and_then(|b| b.message())
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            warn!(
                status = status.as_u16(),
                reason = %reason,
                "[OAuthRefresher] Token endpoint rejected refresh"
            );
            return Err(RefreshFailure::Endpoint {
                status: status.as_u16(),
                reason,
            });
        }

        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| RefreshFailure::MalformedResponse(e.to_string()))?;
        outcome_from_response(token, request.refresh_token)
    }
}

/// Map a 2xx token response, falling back to the prior refresh token when
/// the server does not rotate it
fn outcome_from_response(
    token: TokenResponse,
    prior_refresh_token: &str,
) -> Result<RefreshOutcome, RefreshFailure> {
    let access_token = token
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RefreshFailure::MalformedResponse("missing access_token".to_string()))?;

    let rotated = token.refresh_token.is_some();
    debug!(
        rotated,
        expires_in = ?token.expires_in,
        "[OAuthRefresher] Token refresh successful"
    );

    Ok(RefreshOutcome {
        access_token,
        refresh_token: Some(
            token
                .refresh_token
                .unwrap_or_else(|| prior_refresh_token.to_string()),
        ),
        expires_in: token.expires_in,
        scope: token.scope,
    })
}
