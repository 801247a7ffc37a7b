//! Call-setup markup.
//!
//! The telephony provider fetches this document when a call arrives and is
//! told to open a media stream back to `/media-stream` on this server.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header},
    response::IntoResponse,
};
use tracing::info;

use crate::state::AppState;

/// `GET|POST /incoming-call`
pub async fn incoming_call(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let host = state.config.public_host.clone().or_else(|| {
        headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string)
    });
    let host = host.unwrap_or_else(|| state.config.address());

    info!(host = %host, "Incoming call, connecting media stream");

    (
        [(header::CONTENT_TYPE, "text/xml")],
        connect_stream_markup(&host),
    )
}

/// TwiML that connects the call to the media-stream socket on `host`.
pub fn connect_stream_markup(host: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Connect><Stream url=\"wss://{}/media-stream\"/></Connect></Response>",
        escape_attribute(host)
    )
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
