//! OpenAI Realtime API client implementation.
//!
//! This module provides the connector that opens one OpenAI Realtime WebSocket
//! per call and bridges it to a pair of channels.
//!
//! # API Reference
//!
//! - Endpoint: `wss://api.openai.com/v1/realtime?model=<model>`
//! - Protocol: WebSocket with JSON events
//! - Audio: G.711 u-law at 8kHz, base64 encoded
//!
//! # Example
//!
//! ```rust,ignore
//! use callbridge::core::realtime::{OpenAIRealtime, RealtimeConfig, RealtimeConnector};
//!
//! let connector = OpenAIRealtime::new(RealtimeConfig {
//!     api_key: "sk-...".to_string(),
//!     voice: Some("coral".to_string()),
//!     ..Default::default()
//! })?;
//! let link = connector.connect().await?;
//! link.sender.send(ClientEvent::SessionUpdate { session: Box::new(connector.build_session_config()) }).await?;
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use http::HeaderValue;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Message, client::IntoClientRequest};
use tracing::{debug, error, info, trace, warn};

use super::config::{
    DEFAULT_TRANSCRIPTION_MODEL, Modality, OPENAI_REALTIME_URL, OpenAIRealtimeAudioFormat,
    OpenAIRealtimeModel, OpenAIRealtimeVoice,
};
use super::messages::{
    ClientEvent, InputAudioTranscription, ServerEvent, SessionConfig, ToolDef, TurnDetection,
};
use crate::core::realtime::base::{
    RealtimeConfig, RealtimeConnector, RealtimeError, RealtimeResult, TurnDetectionConfig,
    UpstreamEvent, UpstreamLink,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// OpenAI Realtime Client
// =============================================================================

/// OpenAI Realtime API connector.
///
/// Holds the validated configuration; every [`connect`](RealtimeConnector::connect)
/// call opens a fresh socket owned by a spawned task. There is no reconnection:
/// when the socket drops, the link reports [`UpstreamEvent::Closed`] and the
/// call ends.
#[derive(Debug, Clone)]
pub struct OpenAIRealtime {
    /// Configuration
    config: RealtimeConfig,
    /// Parsed model
    model: OpenAIRealtimeModel,
    /// Parsed voice
    voice: OpenAIRealtimeVoice,
    /// Audio format
    audio_format: OpenAIRealtimeAudioFormat,
}

impl OpenAIRealtime {
    /// Create a connector from configuration.
    pub fn new(config: RealtimeConfig) -> RealtimeResult<Self> {
        if config.api_key.is_empty() {
            return Err(RealtimeError::AuthenticationFailed(
                "API key is required".to_string(),
            ));
        }

        let model = if config.model.is_empty() {
            OpenAIRealtimeModel::default()
        } else {
            OpenAIRealtimeModel::from_str_or_default(&config.model)
        };

        let voice = config
            .voice
            .as_deref()
            .map(OpenAIRealtimeVoice::from_str_or_default)
            .unwrap_or_default();

        let audio_format = config
            .input_audio_format
            .as_deref()
            .map(OpenAIRealtimeAudioFormat::from_str_or_default)
            .unwrap_or_default();

        Ok(Self {
            config,
            model,
            voice,
            audio_format,
        })
    }

    /// Get the configured model.
    pub fn model(&self) -> OpenAIRealtimeModel {
        self.model
    }

    /// Get the configured voice.
    pub fn voice(&self) -> OpenAIRealtimeVoice {
        self.voice
    }

    /// Get the configured audio format.
    pub fn audio_format(&self) -> OpenAIRealtimeAudioFormat {
        self.audio_format
    }

    /// Build the WebSocket URL with the model parameter.
    pub fn build_ws_url(&self) -> RealtimeResult<String> {
        let base = if self.config.url.is_empty() {
            OPENAI_REALTIME_URL
        } else {
            self.config.url.as_str()
        };

        let mut url = url::Url::parse(base).map_err(|e| {
            RealtimeError::InvalidConfiguration(format!("Invalid realtime URL '{base}': {e}"))
        })?;
        url.query_pairs_mut()
            .append_pair("model", self.model.as_str());

        Ok(url.to_string())
    }

    /// Build the one-time session configuration sent before any audio.
    pub fn build_session_config(&self) -> SessionConfig {
        let output_format = self
            .config
            .output_audio_format
            .as_deref()
            .map(OpenAIRealtimeAudioFormat::from_str_or_default)
            .unwrap_or(self.audio_format);

        let turn_detection = self
            .config
            .turn_detection
            .clone()
            .unwrap_or_default();

        SessionConfig {
            modalities: Some(self.config.modalities.clone().unwrap_or_else(|| {
                vec![
                    Modality::Text.as_str().to_string(),
                    Modality::Audio.as_str().to_string(),
                ]
            })),
            voice: Some(self.voice.as_str().to_string()),
            instructions: self.config.instructions.clone(),
            input_audio_format: Some(self.audio_format.as_str().to_string()),
            output_audio_format: Some(output_format.as_str().to_string()),
            input_audio_transcription: Some(InputAudioTranscription {
                model: self
                    .config
                    .input_audio_transcription
                    .as_ref()
                    .map(|t| t.model.clone())
                    .unwrap_or_else(|| DEFAULT_TRANSCRIPTION_MODEL.to_string()),
            }),
            turn_detection: Some(match turn_detection {
                TurnDetectionConfig::ServerVad {
                    threshold,
                    prefix_padding_ms,
                    silence_duration_ms,
                    create_response,
                    interrupt_response,
                } => TurnDetection::ServerVad {
                    threshold,
                    prefix_padding_ms,
                    silence_duration_ms,
                    create_response,
                    interrupt_response,
                },
                TurnDetectionConfig::None => TurnDetection::None {},
            }),
            tools: self.config.tools.as_ref().map(|tools| {
                tools
                    .iter()
                    .map(|t| ToolDef {
                        tool_type: t.tool_type.clone(),
                        name: t.function.name.clone(),
                        description: t.function.description.clone(),
                        parameters: t.function.parameters.clone(),
                    })
                    .collect()
            }),
            tool_choice: self.config.tool_choice.clone(),
            temperature: self.config.temperature,
        }
    }
}

#[async_trait]
impl RealtimeConnector for OpenAIRealtime {
    async fn connect(&self) -> RealtimeResult<UpstreamLink> {
        let url = self.build_ws_url()?;

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.config.api_key))
            .map_err(|e| RealtimeError::AuthenticationFailed(e.to_string()))?;
        let headers = request.headers_mut();
        headers.insert(http::header::AUTHORIZATION, bearer);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::ConnectionFailed(e.to_string()))?;

        info!(model = %self.model, "Connected to OpenAI Realtime API");

        let (mut ws_sink, mut ws_stream) = ws_stream.split();
        let (client_tx, mut client_rx) = mpsc::channel::<ClientEvent>(WS_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<UpstreamEvent>(WS_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    outgoing = client_rx.recv() => {
                        let Some(event) = outgoing else {
                            debug!("Session released upstream link, closing socket");
                            let _ = ws_sink.send(Message::Close(None)).await;
                            return;
                        };

                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("Failed to serialize {}: {}", event.kind(), e);
                                continue;
                            }
                        };

                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            break Some(format!("send failed: {e}"));
                        }
                    }

                    incoming = ws_stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(ServerEvent::Unknown) => {
                                        trace!("Ignoring server event: {}", text);
                                    }
                                    Ok(event) => {
                                        if event_tx.send(UpstreamEvent::Server(event)).await.is_err() {
                                            // Session loop is gone; nothing left to deliver to.
                                            let _ = ws_sink.send(Message::Close(None)).await;
                                            return;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Failed to parse server event: {} - {}", e, text);
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    break Some(format!("pong failed: {e}"));
                                }
                            }
                            Some(Ok(Message::Close(frame))) => {
                                info!("WebSocket closed by server");
                                break Some(
                                    frame
                                        .map(|f| format!("{} {}", f.code, f.reason.as_str()))
                                        .unwrap_or_else(|| "closed by server".to_string()),
                                );
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                error!("WebSocket error: {}", e);
                                break Some(e.to_string());
                            }
                            None => break None,
                        }
                    }
                }
            };

            let _ = event_tx.send(UpstreamEvent::Closed { reason }).await;
        });

        Ok(UpstreamLink::new(client_tx, event_rx))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::base::{FunctionDefinition, ToolDefinition};

    fn test_config() -> RealtimeConfig {
        RealtimeConfig {
            api_key: "sk-test".to_string(),
            voice: Some("sage".to_string()),
            instructions: Some("Rispondi in italiano.".to_string()),
            temperature: Some(0.8),
            ..Default::default()
        }
    }

    #[test]
    fn test_api_key_required() {
        let result = OpenAIRealtime::new(RealtimeConfig::default());
        assert!(matches!(
            result,
            Err(RealtimeError::AuthenticationFailed(_))
        ));
    }

    #[test]
    fn test_defaults_applied() {
        let client = OpenAIRealtime::new(RealtimeConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.model(), OpenAIRealtimeModel::Gpt4oRealtimePreview20241217);
        assert_eq!(client.voice(), OpenAIRealtimeVoice::Coral);
        assert_eq!(client.audio_format(), OpenAIRealtimeAudioFormat::G711Ulaw);
    }

    #[test]
    fn test_build_ws_url() {
        let client = OpenAIRealtime::new(test_config()).unwrap();
        assert_eq!(
            client.build_ws_url().unwrap(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17"
        );

        let custom = OpenAIRealtime::new(RealtimeConfig {
            url: "ws://127.0.0.1:9000/v1/realtime".to_string(),
            ..test_config()
        })
        .unwrap();
        assert!(
            custom
                .build_ws_url()
                .unwrap()
                .starts_with("ws://127.0.0.1:9000/v1/realtime?model=")
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        let client = OpenAIRealtime::new(RealtimeConfig {
            url: "not a url".to_string(),
            ..test_config()
        })
        .unwrap();
        assert!(matches!(
            client.build_ws_url(),
            Err(RealtimeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_session_config_for_calls() {
        let client = OpenAIRealtime::new(RealtimeConfig {
            tools: Some(vec![ToolDefinition {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: "find_available_slots".to_string(),
                    description: None,
                    parameters: None,
                },
            }]),
            tool_choice: Some("auto".to_string()),
            ..test_config()
        })
        .unwrap();

        let session = client.build_session_config();
        let value = serde_json::to_value(&session).unwrap();

        assert_eq!(value["input_audio_format"], "g711_ulaw");
        assert_eq!(value["output_audio_format"], "g711_ulaw");
        assert_eq!(value["voice"], "sage");
        assert_eq!(value["modalities"], serde_json::json!(["text", "audio"]));
        assert_eq!(value["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(value["turn_detection"]["type"], "server_vad");
        assert_eq!(value["turn_detection"]["create_response"], false);
        assert_eq!(value["turn_detection"]["interrupt_response"], true);
        assert_eq!(value["tools"][0]["name"], "find_available_slots");
        assert_eq!(value["tools"][0]["type"], "function");
        assert_eq!(value["tool_choice"], "auto");
        assert!((value["temperature"].as_f64().unwrap() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_provider_name() {
        let client = OpenAIRealtime::new(test_config()).unwrap();
        assert_eq!(client.provider_name(), "openai");
    }
}
