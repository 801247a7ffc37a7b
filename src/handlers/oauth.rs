//! Google Calendar consent flow.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{error, info};

use crate::errors::{AppError, AppResult};
use crate::state::AppState;

pub const CONNECTED_MESSAGE: &str = "Google Calendar collegato correttamente!";
pub const AUTH_FAILED_MESSAGE: &str = "Errore durante l'autenticazione";

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
}

/// `GET /auth/google` sends the operator to Google's consent page.
pub async fn start_consent(State(state): State<Arc<AppState>>) -> AppResult<Redirect> {
    let oauth = state.oauth.as_ref().ok_or(AppError::CalendarNotConfigured)?;
    let url = oauth.consent_url()?;
    info!("Redirecting to Google consent page");
    Ok(Redirect::to(&url))
}

/// `GET /oauth2/callback` trades the authorization code for tokens.
pub async fn consent_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<CallbackParams>,
) -> AppResult<Response> {
    let oauth = state.oauth.as_ref().ok_or(AppError::CalendarNotConfigured)?;

    if let Some(denied) = params.error {
        error!(reason = %denied, "Google consent was not granted");
        return Ok(auth_failed());
    }
    let code = params.code.ok_or(AppError::MissingParameter("code"))?;

    match oauth.exchange_code(&code).await {
        Ok(()) => {
            info!("Google Calendar connected");
            Ok(CONNECTED_MESSAGE.into_response())
        }
        Err(e) => {
            error!("OAuth code exchange failed: {}", e);
            Ok(auth_failed())
        }
    }
}

fn auth_failed() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, AUTH_FAILED_MESSAGE).into_response()
}
