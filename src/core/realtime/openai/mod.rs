//! OpenAI Realtime API module.
//!
//! Connects one call to OpenAI's Realtime API over WebSocket.
//!
//! # Features
//!
//! - G.711 u-law audio in and out, passed through as base64
//! - Server-side voice activity detection with explicit response requests
//! - Function calling for the scheduling tools
//! - Input transcription for call logs
//!
//! # Supported Models
//!
//! - `gpt-4o-realtime-preview-2024-12-17` - December 2024 version (default)
//! - `gpt-4o-realtime-preview` - GPT-4o Realtime Preview
//! - `gpt-4o-mini-realtime-preview` - Mini model for lower latency
//!
//! # Supported Voices
//!
//! alloy, ash, ballad, coral, echo, sage, shimmer, verse

mod client;
mod config;
pub mod messages;

pub use client::OpenAIRealtime;
pub use config::{
    DEFAULT_TRANSCRIPTION_MODEL, Modality, OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat,
    OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
pub use messages::{
    ApiError, ClientEvent, ConversationItem, ServerEvent, SessionConfig, TurnDetection,
};
