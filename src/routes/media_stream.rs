//! Media-stream WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::media_stream_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the media-stream WebSocket router
///
/// # Endpoint
///
/// `GET /media-stream` - WebSocket upgrade for one phone call
///
/// # Protocol
///
/// The phone side sends JSON frames tagged by `event`:
/// `connected`, `start`, `media` (base64 u-law), `mark`, `stop`.
///
/// The server answers with `media`, `mark` and `clear` frames carrying the
/// stream id from `start`.
pub fn create_media_stream_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
