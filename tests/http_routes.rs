//! HTTP surface tests
//!
//! Requests go straight through the router with `oneshot`; the Google token
//! endpoint is served by wiremock.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use tower::util::ServiceExt;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callbridge::core::scheduling::{
    AppointmentConfirmation, AppointmentRequest, Availability, GoogleOAuth, GoogleOAuthConfig,
    Scheduler, SchedulingResult,
};
use callbridge::core::session::SessionSettings;
use callbridge::core::tools::ToolDispatcher;
use callbridge::{ServerConfig, routes, state::AppState};

struct IdleScheduler;

#[async_trait]
impl Scheduler for IdleScheduler {
    async fn find_available_slots(&self, _request: &str) -> SchedulingResult<Availability> {
        Ok(Availability::NoSlots {
            message: String::new(),
        })
    }

    async fn create_appointment(
        &self,
        _request: AppointmentRequest,
    ) -> SchedulingResult<AppointmentConfirmation> {
        unreachable!("no bookings in route tests")
    }
}

fn app(config: ServerConfig, oauth: Option<GoogleOAuth>) -> Router {
    let dispatcher = Arc::new(ToolDispatcher::new(
        Arc::new(IdleScheduler),
        chrono_tz::Europe::Rome,
    ));
    let state = AppState::from_parts(
        config,
        None,
        dispatcher,
        oauth.map(Arc::new),
        SessionSettings {
            session: Default::default(),
            turn: Default::default(),
            greeting: None,
        },
    );

    routes::api::create_api_router()
        .merge(routes::media_stream::create_media_stream_router())
        .with_state(state)
}

fn oauth_for(token_url: String) -> GoogleOAuth {
    let mut config = GoogleOAuthConfig::new(
        "client-123",
        "shh",
        "https://bridge.example.com/oauth2/callback",
    );
    config.token_url = token_url;
    GoogleOAuth::new(config)
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let response = app(ServerConfig::default(), None)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body, json!({"status": "OK"}));
}

#[tokio::test]
async fn test_incoming_call_uses_host_header() {
    let response = app(ServerConfig::default(), None)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/incoming-call")
                .header(header::HOST, "abc123.ngrok.app")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/xml"
    );
    let body = body_text(response).await;
    assert!(body.contains("<Stream url=\"wss://abc123.ngrok.app/media-stream\"/>"));
}

#[tokio::test]
async fn test_incoming_call_prefers_public_host() {
    let mut config = ServerConfig::default();
    config.public_host = Some("bridge.example.com".to_string());

    let response = app(config, None)
        .oneshot(
            Request::builder()
                .uri("/incoming-call")
                .header(header::HOST, "10.0.0.5:5050")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let body = body_text(response).await;
    assert!(body.contains("wss://bridge.example.com/media-stream"));
}

#[tokio::test]
async fn test_consent_redirect() {
    let response = app(
        ServerConfig::default(),
        Some(oauth_for("http://127.0.0.1:9/token".to_string())),
    )
    .oneshot(
        Request::builder()
            .uri("/auth/google")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
    assert!(location.contains("client_id=client-123"));
    assert!(location.contains("access_type=offline"));
    assert!(location.contains("prompt=consent"));
}

#[tokio::test]
async fn test_consent_without_oauth_client() {
    let response = app(ServerConfig::default(), None)
        .oneshot(
            Request::builder()
                .uri("/auth/google")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_callback_exchanges_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("code=auth-code-1"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "ya29.token",
            "expires_in": 3599,
            "refresh_token": "1//refresh"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = app(
        ServerConfig::default(),
        Some(oauth_for(format!("{}/token", server.uri()))),
    )
    .oneshot(
        Request::builder()
            .uri("/oauth2/callback?code=auth-code-1")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_text(response).await,
        "Google Calendar collegato correttamente!"
    );
}

#[tokio::test]
async fn test_callback_exchange_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "invalid_grant"})))
        .mount(&server)
        .await;

    let response = app(
        ServerConfig::default(),
        Some(oauth_for(format!("{}/token", server.uri()))),
    )
    .oneshot(
        Request::builder()
            .uri("/oauth2/callback?code=stale")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "Errore durante l'autenticazione");
}

#[tokio::test]
async fn test_callback_without_code() {
    let response = app(
        ServerConfig::default(),
        Some(oauth_for("http://127.0.0.1:9/token".to_string())),
    )
    .oneshot(
        Request::builder()
            .uri("/oauth2/callback")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_media_stream_requires_upgrade() {
    let response = app(ServerConfig::default(), None)
        .oneshot(
            Request::builder()
                .uri("/media-stream")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
