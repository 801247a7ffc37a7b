use axum::{
    Router,
    routing::get,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, oauth, twiml};
use crate::state::AppState;
use std::sync::Arc;

/// Create the HTTP router: health, call setup and the Google consent flow
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(api::health_check))
        .route(
            "/incoming-call",
            get(twiml::incoming_call).post(twiml::incoming_call),
        )
        .route("/auth/google", get(oauth::start_consent))
        .route("/oauth2/callback", get(oauth::consent_callback))
        .layer(TraceLayer::new_for_http())
}
