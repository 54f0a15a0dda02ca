use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::IdentityConfig;
use crate::error::AuthError;

use super::TokenSet;

/// Token exchange operations against an identity provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Exchange a refresh token for a new token set
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;

    /// Resource-owner password grant
    async fn password_grant(&self, username: &str, password: &str) -> Result<TokenSet, AuthError>;

    /// End the provider-side session for a refresh token
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;
}

/// OAuth error body returned by the token endpoint
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// OpenID Connect identity provider (Keycloak realm endpoints)
pub struct OidcIdentityProvider {
    http: reqwest::Client,
    config: IdentityConfig,
}

impl OidcIdentityProvider {
    pub fn new(config: IdentityConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AuthError::Refresh(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    fn client_params<'a>(&'a self, params: &mut Vec<(&'static str, &'a str)>) {
        params.push(("client_id", self.config.client_id.as_str()));
        if let Some(ref secret) = self.config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenSet, String> {
        let response = self
            .http
            .post(self.config.token_endpoint())
            .form(params)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(describe_error(status.as_u16(), &body));
        }

        response.json::<TokenSet>().await.map_err(|e| e.to_string())
    }
}

fn describe_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<OAuthErrorBody>(body) {
        Ok(err) => match err.error_description {
            Some(description) => format!("{} ({}): {}", err.error, status, description),
            None => format!("{} ({})", err.error, status),
        },
        Err(_) => format!("HTTP {}", status),
    }
}

#[async_trait]
impl IdentityProvider for OidcIdentityProvider {
    #[tracing::instrument(name = "identity.refresh", skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.client_params(&mut params);

        self.token_request(&params).await.map_err(AuthError::Refresh)
    }

    #[tracing::instrument(name = "identity.password_grant", skip(self, password))]
    async fn password_grant(&self, username: &str, password: &str) -> Result<TokenSet, AuthError> {
        let mut params = vec![
            ("grant_type", "password"),
            ("username", username),
            ("password", password),
            ("scope", "openid"),
        ];
        self.client_params(&mut params);

        self.token_request(&params).await.map_err(AuthError::Login)
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let mut params = vec![("refresh_token", refresh_token)];
        self.client_params(&mut params);

        let response = self
            .http
            .post(self.config.logout_endpoint())
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::Refresh(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(AuthError::Refresh(describe_error(status.as_u16(), &body)))
        }
    }
}
