//! Audio relay between the phone side and the generation service.
//!
//! Both directions pass base64 G.711 u-law through untouched. The relay never
//! owns state: it reads and records through [`TurnMachine`] accessors so the
//! session loop stays the single writer.

use tracing::trace;

use crate::core::realtime::ClientEvent;
use crate::core::transport::OutboundFrame;
use crate::core::turn::{RESPONSE_MARK, TurnMachine};

/// Forward one caller audio frame upstream.
///
/// Always records the frame's transport timestamp; returns the append event
/// only while forwarding is enabled. Frames arriving while it is disabled are
/// dropped.
pub fn forward_inbound(
    machine: &mut TurnMachine,
    timestamp: u64,
    payload: String,
) -> Option<ClientEvent> {
    machine.observe_inbound(timestamp);

    if !machine.append_enabled() {
        trace!(timestamp, "Append disabled, dropping caller frame");
        return None;
    }

    Some(ClientEvent::InputAudioBufferAppend { audio: payload })
}

/// Forward one generated audio chunk to the phone side.
///
/// Returns the media frame followed by its mark, or nothing when the chunk is
/// dropped (stream not started, or the item was cut off by a barge-in).
pub fn forward_outbound(
    machine: &mut TurnMachine,
    item_id: &str,
    delta: String,
) -> Vec<OutboundFrame> {
    let Some(stream_sid) = machine.accept_reply_chunk(item_id) else {
        return Vec::new();
    };

    vec![
        OutboundFrame::media(stream_sid.clone(), delta),
        OutboundFrame::mark(stream_sid, RESPONSE_MARK),
    ]
}
