//! Configuration module for the call bridge
//!
//! Configuration comes from environment variables (optionally seeded from a
//! `.env` file) and an optional YAML file. Priority: YAML > ENV vars > .env
//! values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Applying YAML overrides on top of the environment
//!
//! # Example
//! ```rust,no_run
//! use callbridge::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;

use crate::core::realtime::{
    InputTranscriptionConfig, OPENAI_REALTIME_URL, RealtimeConfig, ToolDefinition,
    TurnDetectionConfig,
};
use crate::core::scheduling::GoogleOAuthConfig;
use crate::core::turn::{DEFAULT_MAX_UTTERANCE, TurnConfig};

mod env;
mod merge;
mod yaml;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5050;
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const DEFAULT_VOICE: &str = "coral";
pub const DEFAULT_TEMPERATURE: f32 = 0.8;
pub const DEFAULT_CALENDAR_ID: &str = "primary";
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Rome;

/// Receptionist prompt used when no instructions are configured.
pub const DEFAULT_INSTRUCTIONS: &str = "Sei l'assistente telefonico di un'azienda di \
assistenza tecnica. Parla in italiano, con frasi brevi e cordiali. Aiuta il cliente a \
trovare uno slot libero per un intervento usando lo strumento find_available_slots, poi \
chiedi nome, numero di telefono e indirizzo e prenota con book_appointment solo dopo che \
il cliente ha confermato data e ora. Non inventare disponibilità.";

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Server configuration
///
/// Contains everything needed to run the bridge:
/// - Server settings (host, port, TLS, public host for call-setup markup)
/// - Generation service settings (OpenAI Realtime)
/// - Turn-taking tuning (server VAD, utterance cap)
/// - Google Calendar credentials and scheduling time zone
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,
    pub tls: Option<TlsConfig>,
    /// Host name advertised in the media stream URL; the request `Host` header when unset
    pub public_host: Option<String>,

    // Generation service
    pub openai_api_key: Option<String>,
    pub openai_url: String,
    pub openai_model: String,
    pub openai_voice: String,
    pub instructions: String,
    pub temperature: f32,
    /// Instruction that makes the assistant speak first
    pub greeting: Option<String>,

    // Turn taking
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,
    pub max_utterance_ms: u64,
    pub listen_during_reply: bool,

    // Google Calendar
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    pub google_redirect_uri: Option<String>,
    pub google_refresh_token: Option<String>,
    pub google_calendar_id: String,

    // Scheduling
    pub calendar_timezone: Tz,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            public_host: None,
            openai_api_key: None,
            openai_url: OPENAI_REALTIME_URL.to_string(),
            openai_model: DEFAULT_MODEL.to_string(),
            openai_voice: DEFAULT_VOICE.to_string(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            greeting: None,
            vad_threshold: 0.5,
            vad_prefix_padding_ms: 300,
            vad_silence_duration_ms: 500,
            max_utterance_ms: DEFAULT_MAX_UTTERANCE.as_millis() as u64,
            listen_during_reply: false,
            google_client_id: None,
            google_client_secret: None,
            google_redirect_uri: None,
            google_refresh_token: None,
            google_calendar_id: DEFAULT_CALENDAR_ID.to_string(),
            calendar_timezone: DEFAULT_TIMEZONE,
        }
    }
}

/// Zeroize secret fields when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut secret) = self.google_client_secret {
            secret.zeroize();
        }
        if let Some(ref mut token) = self.google_refresh_token {
            token.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only.
    ///
    /// Call `dotenvy::dotenv()` first to seed values from a `.env` file.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            return Err(format!(
                "VAD_THRESHOLD must be between 0.0 and 1.0, got {}",
                self.vad_threshold
            ));
        }
        if !(0.6..=1.2).contains(&self.temperature) {
            return Err(format!(
                "OPENAI_TEMPERATURE must be between 0.6 and 1.2, got {}",
                self.temperature
            ));
        }
        if self.max_utterance_ms == 0 {
            return Err("MAX_UTTERANCE_MS must be greater than zero".to_string());
        }
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Generation service settings for one call, with the given tools.
    pub fn realtime_config(&self, tools: Vec<ToolDefinition>) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            url: self.openai_url.clone(),
            model: self.openai_model.clone(),
            voice: Some(self.openai_voice.clone()),
            instructions: Some(self.instructions.clone()),
            temperature: Some(self.temperature),
            input_audio_format: Some("g711_ulaw".to_string()),
            output_audio_format: Some("g711_ulaw".to_string()),
            input_audio_transcription: Some(InputTranscriptionConfig {
                model: "whisper-1".to_string(),
            }),
            turn_detection: Some(TurnDetectionConfig::ServerVad {
                threshold: Some(self.vad_threshold),
                prefix_padding_ms: Some(self.vad_prefix_padding_ms),
                silence_duration_ms: Some(self.vad_silence_duration_ms),
                create_response: Some(false),
                interrupt_response: Some(true),
            }),
            tools: Some(tools),
            tool_choice: Some("auto".to_string()),
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
        }
    }

    /// Turn-taking settings for one call.
    pub fn turn_config(&self) -> TurnConfig {
        TurnConfig {
            max_utterance: Duration::from_millis(self.max_utterance_ms),
            listen_during_reply: self.listen_during_reply,
        }
    }

    /// Google OAuth client settings, when client id, secret and redirect URI are all set.
    pub fn google_oauth_config(&self) -> Option<GoogleOAuthConfig> {
        let (Some(client_id), Some(client_secret), Some(redirect_uri)) = (
            self.google_client_id.as_ref(),
            self.google_client_secret.as_ref(),
            self.google_redirect_uri.as_ref(),
        ) else {
            return None;
        };

        let mut config = GoogleOAuthConfig::new(client_id, client_secret, redirect_uri);
        config.refresh_token = self.google_refresh_token.clone();
        Some(config)
    }
}
