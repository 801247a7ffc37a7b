//! Media stream frame types.
//!
//! Inbound frames (phone side to bridge):
//! - `connected` - Socket handshake done
//! - `start` - Stream metadata, carries the stream id
//! - `media` - One audio chunk with its transport timestamp
//! - `mark` - A previously sent mark has been played
//! - `stop` - The call ended
//!
//! Outbound frames (bridge to phone side):
//! - `media` - Audio to play
//! - `mark` - Delivery acknowledgment request
//! - `clear` - Discard queued playback

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Maximum accepted size for a single inbound text frame (1 MB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors raised while decoding inbound frames.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The frame is not valid JSON for any known event
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// The frame exceeds the size limit
    #[error("Frame too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// Frames received from the telephony transport.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundFrame {
    /// WebSocket connected
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },

    /// Stream started
    Start {
        /// Stream metadata
        start: StartInfo,
    },

    /// Audio chunk from the caller
    Media {
        /// Audio payload and timing
        media: MediaInfo,
    },

    /// Mark playback acknowledgment
    Mark {
        /// Echoed mark
        mark: MarkInfo,
    },

    /// Stream stopped
    Stop,

    /// Any other event (dtmf and friends)
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, TransportError> {
        if text.len() > MAX_FRAME_SIZE {
            return Err(TransportError::TooLarge {
                size: text.len(),
                max: MAX_FRAME_SIZE,
            });
        }
        serde_json::from_str(text).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

/// Metadata carried by the `start` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartInfo {
    /// Stream identifier, echoed on every outbound frame
    pub stream_sid: String,
    /// Call identifier
    #[serde(default)]
    pub call_sid: Option<String>,
}

/// Audio chunk carried by a `media` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MediaInfo {
    /// Transport clock in milliseconds since stream start
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: u64,
    /// Base64-encoded G.711 u-law audio
    pub payload: String,
    /// Track name ("inbound")
    #[serde(default)]
    pub track: Option<String>,
}

/// Mark carried by an inbound `mark` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkInfo {
    /// Mark name as sent
    #[serde(default)]
    pub name: String,
}

/// The transport sends timestamps as decimal strings; accept bare numbers too.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timestamp {
        Number(u64),
        Text(String),
    }

    match Timestamp::deserialize(deserializer)? {
        Timestamp::Number(n) => Ok(n),
        Timestamp::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// =============================================================================
// Outbound Frames
// =============================================================================

/// Frames sent to the telephony transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Audio to play
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },

    /// Delivery acknowledgment request
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutboundMark,
    },

    /// Discard queued playback
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl OutboundFrame {
    /// Audio frame.
    pub fn media(stream_sid: impl Into<String>, payload: impl Into<String>) -> Self {
        OutboundFrame::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: payload.into(),
            },
        }
    }

    /// Mark frame.
    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        OutboundFrame::Mark {
            stream_sid: stream_sid.into(),
            mark: OutboundMark { name: name.into() },
        }
    }

    /// Clear frame.
    pub fn clear(stream_sid: impl Into<String>) -> Self {
        OutboundFrame::Clear {
            stream_sid: stream_sid.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMark {
    pub name: String,
}

/// Work items for the transport writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportRoute {
    /// Serialize and send a frame
    Frame(OutboundFrame),
    /// Close the socket and stop writing
    Close,
}
