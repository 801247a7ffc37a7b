//! Google OAuth 2.0 authorization for calendar access.
//!
//! The consent flow runs once through the HTTP surface (`/auth/google` then
//! `/oauth2/callback`). After that, access tokens are cached in memory and
//! renewed with the refresh token shortly before they expire.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use zeroize::Zeroize;

use super::{SchedulingError, SchedulingResult};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// Message returned to callers while no calendar account is linked.
pub const NOT_CONNECTED_MESSAGE: &str =
    "Google Calendar non è collegato. Vai su /auth/google per collegarlo.";

/// Refresh this long before the reported expiry.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// OAuth client settings.
#[derive(Clone)]
pub struct GoogleOAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    /// Long-lived refresh token from an earlier consent, if any
    pub refresh_token: Option<String>,
    pub auth_url: String,
    pub token_url: String,
}

impl GoogleOAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            refresh_token: None,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for GoogleOAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleOAuthConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("auth_url", &self.auth_url)
            .field("token_url", &self.token_url)
            .finish()
    }
}

impl Drop for GoogleOAuthConfig {
    fn drop(&mut self) {
        self.client_secret.zeroize();
        if let Some(token) = self.refresh_token.as_mut() {
            token.zeroize();
        }
    }
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

impl AccessToken {
    fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now() + EXPIRY_SKEW
    }
}

#[derive(Default)]
struct TokenState {
    access: Option<AccessToken>,
    refresh_token: Option<String>,
}

impl Drop for TokenState {
    fn drop(&mut self) {
        if let Some(token) = self.access.as_mut() {
            token.value.zeroize();
        }
        if let Some(token) = self.refresh_token.as_mut() {
            token.zeroize();
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

/// Token manager for one linked Google account.
pub struct GoogleOAuth {
    config: GoogleOAuthConfig,
    http: Client,
    state: Mutex<TokenState>,
}

impl GoogleOAuth {
    pub fn new(config: GoogleOAuthConfig) -> Self {
        Self::with_client(config, Client::new())
    }

    pub fn with_client(config: GoogleOAuthConfig, http: Client) -> Self {
        let state = TokenState {
            access: None,
            refresh_token: config.refresh_token.clone(),
        };
        Self {
            config,
            http,
            state: Mutex::new(state),
        }
    }

    /// Consent page URL requesting offline calendar access.
    pub fn consent_url(&self) -> SchedulingResult<String> {
        let url = url::Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", CALENDAR_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| SchedulingError::NotConfigured(format!("Invalid auth URL: {e}")))?;
        Ok(url.into())
    }

    /// Trade an authorization code from the consent redirect for tokens.
    pub async fn exchange_code(&self, code: &str) -> SchedulingResult<()> {
        let response = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
                ("redirect_uri", &self.config.redirect_uri),
            ])
            .await?;

        let mut state = self.state.lock();
        if let Some(refresh) = response.refresh_token.clone() {
            state.refresh_token = Some(refresh);
        }
        state.access = Some(to_access_token(&response));
        info!(
            has_refresh_token = state.refresh_token.is_some(),
            "Google Calendar authorized"
        );
        Ok(())
    }

    /// A valid access token, refreshing it when needed.
    pub async fn access_token(&self) -> SchedulingResult<String> {
        let refresh_token = {
            let state = self.state.lock();
            if let Some(token) = state.access.as_ref()
                && !token.is_expired()
            {
                return Ok(token.value.clone());
            }
            state.refresh_token.clone()
        };

        let Some(refresh_token) = refresh_token else {
            return Err(SchedulingError::NotAuthorized(
                NOT_CONNECTED_MESSAGE.to_string(),
            ));
        };

        debug!("Refreshing Google access token");
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
                ("client_id", &self.config.client_id),
                ("client_secret", &self.config.client_secret),
            ])
            .await?;

        let token = to_access_token(&response);
        let value = token.value.clone();
        let mut state = self.state.lock();
        state.access = Some(token);
        if let Some(rotated) = response.refresh_token {
            state.refresh_token = Some(rotated);
        }
        Ok(value)
    }

    /// Whether calendar calls can be made without a new consent.
    pub fn is_authorized(&self) -> bool {
        let state = self.state.lock();
        state.refresh_token.is_some() || state.access.as_ref().is_some_and(|t| !t.is_expired())
    }

    async fn request_token(&self, form: &[(&str, &str)]) -> SchedulingResult<TokenResponse> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SchedulingError::Http(format!(
                "Token request failed with status {status}: {body}"
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| SchedulingError::InvalidResponse(format!("Failed to parse token: {e}")))
    }
}

fn to_access_token(response: &TokenResponse) -> AccessToken {
    let lifetime = if response.expires_in > 0 {
        response.expires_in
    } else {
        DEFAULT_TOKEN_LIFETIME_SECS
    };
    AccessToken {
        value: response.access_token.clone(),
        expires_at: Instant::now() + Duration::from_secs(lifetime),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> GoogleOAuthConfig {
        let mut config = GoogleOAuthConfig::new(
            "client-id",
            "client-secret",
            "https://bridge.example/oauth2/callback",
        );
        config.token_url = format!("{}/token", server.uri());
        config
    }

    #[test]
    fn test_consent_url() {
        let oauth = GoogleOAuth::new(GoogleOAuthConfig::new(
            "client-id",
            "secret",
            "https://bridge.example/oauth2/callback",
        ));
        let url = url::Url::parse(&oauth.consent_url().unwrap()).unwrap();
        assert_eq!(url.host_str(), Some("accounts.google.com"));

        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["client_id"], "client-id");
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["scope"], CALENDAR_SCOPE);
        assert_eq!(params["redirect_uri"], "https://bridge.example/oauth2/callback");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = GoogleOAuthConfig::new("id", "top-secret", "https://x/cb");
        config.refresh_token = Some("refresh-secret".to_string());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("top-secret"));
        assert!(!rendered.contains("refresh-secret"));
    }

    #[tokio::test]
    async fn test_not_authorized_without_refresh_token() {
        let server = MockServer::start().await;
        let oauth = GoogleOAuth::new(config_for(&server));
        assert!(!oauth.is_authorized());

        match oauth.access_token().await {
            Err(SchedulingError::NotAuthorized(message)) => {
                assert_eq!(message, NOT_CONNECTED_MESSAGE);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_code_then_cached_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-1",
                "expires_in": 3600,
                "refresh_token": "refresh-1"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let oauth = GoogleOAuth::new(config_for(&server));
        oauth.exchange_code("auth-code").await.unwrap();
        assert!(oauth.is_authorized());

        assert_eq!(oauth.access_token().await.unwrap(), "access-1");
        assert_eq!(oauth.access_token().await.unwrap(), "access-1");
    }

    #[tokio::test]
    async fn test_refresh_grant_used_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=stored-refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-2",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = config_for(&server);
        config.refresh_token = Some("stored-refresh".to_string());
        let oauth = GoogleOAuth::new(config);
        assert!(oauth.is_authorized());

        assert_eq!(oauth.access_token().await.unwrap(), "access-2");
        assert_eq!(oauth.access_token().await.unwrap(), "access-2");
    }

    #[tokio::test]
    async fn test_token_endpoint_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let oauth = GoogleOAuth::new(config_for(&server));
        match oauth.exchange_code("bad").await {
            Err(SchedulingError::Http(message)) => assert!(message.contains("invalid_grant")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!oauth.is_authorized());
    }
}
