//! Telephony media-stream transport.
//!
//! Wire types for the Twilio Media Streams WebSocket protocol. The call's
//! audio arrives as base64 G.711 u-law in `media` frames and leaves the same
//! way; `mark` frames echo delivery acknowledgments and `clear` discards
//! playback the phone side has queued.

pub mod messages;

pub use messages::{
    InboundFrame, MediaInfo, OutboundFrame, StartInfo, TransportError, TransportRoute,
};
