//! Base traits and types for the realtime speech-generation service.
//!
//! A call session talks to exactly one upstream connection. The connection is
//! opened through a [`RealtimeConnector`] and handed back as an [`UpstreamLink`]:
//! a sender for [`ClientEvent`]s and a receiver of [`UpstreamEvent`]s. Dropping
//! the sender closes the upstream socket.
//!
//! # Audio Format
//!
//! Calls carry 8kHz G.711 u-law end to end. Payloads stay base64-encoded and
//! are passed through without transcoding.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use super::openai::messages::{ClientEvent, ServerEvent};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during realtime operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Connection to the provider failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The upstream connection closed while the call was still active
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,
}

/// Result type for realtime operations.
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Configuration Types
// =============================================================================

/// Configuration for the realtime provider connection and session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API key for authentication
    pub api_key: String,

    /// WebSocket endpoint, without the model query parameter
    #[serde(default)]
    pub url: String,

    /// Model to use (e.g., "gpt-4o-realtime-preview-2024-12-17")
    #[serde(default)]
    pub model: String,

    /// Voice for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Temperature for response generation (0.6 to 1.2)
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Input audio format
    #[serde(default)]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(default)]
    pub output_audio_format: Option<String>,

    /// Input audio transcription, used for logging only
    #[serde(default)]
    pub input_audio_transcription: Option<InputTranscriptionConfig>,

    /// Turn detection configuration
    #[serde(default)]
    pub turn_detection: Option<TurnDetectionConfig>,

    /// Tool definitions for function calling
    #[serde(default)]
    pub tools: Option<Vec<ToolDefinition>>,

    /// Tool choice strategy
    #[serde(default)]
    pub tool_choice: Option<String>,

    /// Response modalities (text, audio, or both)
    #[serde(default)]
    pub modalities: Option<Vec<String>>,
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputTranscriptionConfig {
    /// Model to use for transcription (e.g., "whisper-1")
    pub model: String,
}

/// Configuration for turn detection (VAD).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetectionConfig {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(default)]
        threshold: Option<f32>,
        /// Amount of audio to include before voice detection (ms)
        #[serde(default)]
        prefix_padding_ms: Option<u32>,
        /// Silence duration before end of turn (ms)
        #[serde(default)]
        silence_duration_ms: Option<u32>,
        /// Whether the server creates responses on its own
        #[serde(default)]
        create_response: Option<bool>,
        /// Interrupt model output on speech detection
        #[serde(default)]
        interrupt_response: Option<bool>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetectionConfig {
    fn default() -> Self {
        TurnDetectionConfig::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(false),
            interrupt_response: Some(true),
        }
    }
}

/// Tool definition for function calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionDefinition,
}

/// Function definition for tool calling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Function name
    pub name: String,
    /// Function description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for parameters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

// =============================================================================
// Upstream Link
// =============================================================================

/// Everything the session loop can receive from the upstream connection.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// A decoded server event
    Server(ServerEvent),
    /// The connection ended; no further events follow
    Closed {
        /// Close reason or transport error, when known
        reason: Option<String>,
    },
}

/// Duplex handle to one open upstream connection.
///
/// The connection task exits when `sender` is dropped, closing the socket.
#[derive(Debug)]
pub struct UpstreamLink {
    /// Outbound client events, forwarded in order
    pub sender: mpsc::Sender<ClientEvent>,
    /// Inbound server events, in arrival order
    pub events: mpsc::Receiver<UpstreamEvent>,
}

impl UpstreamLink {
    /// Build a link from raw channel ends. Used by connectors and test doubles.
    pub fn new(sender: mpsc::Sender<ClientEvent>, events: mpsc::Receiver<UpstreamEvent>) -> Self {
        Self { sender, events }
    }
}

// =============================================================================
// Connector Trait
// =============================================================================

/// Opens upstream connections, one per call.
///
/// # Example
///
/// ```rust,ignore
/// use callbridge::core::realtime::{OpenAIRealtime, RealtimeConfig, RealtimeConnector};
///
/// let connector = OpenAIRealtime::new(RealtimeConfig {
///     api_key: "sk-...".to_string(),
///     ..Default::default()
/// })?;
/// let mut link = connector.connect().await?;
/// while let Some(event) = link.events.recv().await {
///     // feed the session loop
/// }
/// ```
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    /// Open a new upstream connection.
    async fn connect(&self) -> RealtimeResult<UpstreamLink>;

    /// Provider name, for logging.
    fn provider_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_turn_detection_requests_explicit_responses() {
        match TurnDetectionConfig::default() {
            TurnDetectionConfig::ServerVad {
                create_response,
                interrupt_response,
                threshold,
                ..
            } => {
                assert_eq!(create_response, Some(false));
                assert_eq!(interrupt_response, Some(true));
                assert_eq!(threshold, Some(0.5));
            }
            TurnDetectionConfig::None => panic!("expected server_vad"),
        }
    }

    #[test]
    fn test_turn_detection_from_json() {
        let config: TurnDetectionConfig =
            serde_json::from_str(r#"{"type":"server_vad","silence_duration_ms":700}"#).unwrap();
        assert!(matches!(
            config,
            TurnDetectionConfig::ServerVad {
                silence_duration_ms: Some(700),
                threshold: None,
                ..
            }
        ));

        let none: TurnDetectionConfig = serde_json::from_str(r#"{"type":"none"}"#).unwrap();
        assert!(matches!(none, TurnDetectionConfig::None));
    }

    #[test]
    fn test_error_display() {
        let err = RealtimeError::ConnectionClosed("going away".to_string());
        assert_eq!(err.to_string(), "Connection closed: going away");
        assert_eq!(RealtimeError::NotConnected.to_string(), "Not connected");
    }
}
