//! Realtime speech-generation service module.
//!
//! This module provides the abstraction the call session uses to reach the
//! hosted generation service, and its OpenAI Realtime implementation.
//!
//! # Architecture
//!
//! - [`RealtimeConnector`] opens one upstream connection per call
//! - [`UpstreamLink`] carries typed client events out and [`UpstreamEvent`]s in
//! - Each connection is owned by a single spawned task; the session loop never
//!   touches the socket directly
//!
//! # Example
//!
//! ```rust,ignore
//! use callbridge::core::realtime::{OpenAIRealtime, RealtimeConfig, RealtimeConnector};
//!
//! let connector = OpenAIRealtime::new(RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     ..Default::default()
//! })?;
//! let mut link = connector.connect().await?;
//! ```

mod base;
pub mod openai;

pub use base::{
    FunctionDefinition, InputTranscriptionConfig, RealtimeConfig, RealtimeConnector,
    RealtimeError, RealtimeResult, ToolDefinition, TurnDetectionConfig, UpstreamEvent,
    UpstreamLink,
};
pub use openai::{
    ClientEvent, ConversationItem, OPENAI_REALTIME_URL, OpenAIRealtime, OpenAIRealtimeModel,
    OpenAIRealtimeVoice, ServerEvent, SessionConfig,
};
