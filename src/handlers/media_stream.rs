//! Telephony media-stream WebSocket handler
//!
//! Decodes transport frames from the phone side into [`InboundFrame`]s and
//! writes [`TransportRoute`]s back, leaving everything in between to
//! [`open_session`].

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::session::{TransportLink, open_session};
use crate::core::transport::{InboundFrame, TransportRoute};
use crate::state::AppState;

/// Channel buffer size between the socket tasks and the session loop
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (1 MB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// Media-stream WebSocket handler
///
/// Upgrades the connection opened by the telephony provider after it fetched
/// the call-setup markup.
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    info!("Media stream connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_socket(socket, state))
}

async fn handle_media_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let Some(connector) = app_state.connector.clone() else {
        error!("OPENAI_API_KEY is not configured, refusing call");
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    let (route_tx, mut route_rx) = mpsc::channel::<TransportRoute>(CHANNEL_BUFFER_SIZE);
    let (frame_tx, frame_rx) = mpsc::channel::<InboundFrame>(CHANNEL_BUFFER_SIZE);

    // Sender task for outgoing frames
    let sender_task = tokio::spawn(async move {
        while let Some(route) = route_rx.recv().await {
            let result = match route {
                TransportRoute::Frame(frame) => match serde_json::to_string(&frame) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outbound frame: {}", e);
                        continue;
                    }
                },
                TransportRoute::Close => {
                    info!("Closing media stream connection");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = result {
                error!("Failed to send media stream frame: {}", e);
                break;
            }
        }
    });

    // Reader task for incoming frames; dropping `frame_tx` tells the session
    // the phone side is gone
    let reader_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Text(text)) => match InboundFrame::parse(text.as_str()) {
                    Ok(frame) => {
                        if frame_tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Dropping malformed transport frame: {}", e),
                },
                Ok(Message::Close(_)) => {
                    info!("Media stream closed by phone side");
                    break;
                }
                Ok(_) => debug!("Ignoring non-text media stream message"),
                Err(e) => {
                    warn!("Media stream WebSocket error: {}", e);
                    break;
                }
            }
        }
    });

    let transport = TransportLink {
        inbound: frame_rx,
        outbound: route_tx,
    };
    if let Err(e) = open_session(
        connector.as_ref(),
        Arc::clone(&app_state.dispatcher),
        app_state.session.clone(),
        transport,
    )
    .await
    {
        error!("Call session ended with error: {}", e);
    }

    // All route senders are gone once the session returns, so the sender
    // task drains what is queued and exits
    reader_task.abort();
    if let Err(e) = sender_task.await {
        debug!("Sender task ended abnormally: {}", e);
    }
    info!("Media stream connection finished");
}
