use serde::Deserialize;
use std::path::PathBuf;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override the environment.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 5050
///   public_host: "bridge.example.com"
///   tls:
///     cert_path: "/etc/callbridge/cert.pem"
///     key_path: "/etc/callbridge/key.pem"
///
/// openai:
///   api_key: "sk-..."
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   voice: "coral"
///   temperature: 0.8
///   greeting: "Saluta il cliente e chiedi come puoi aiutarlo."
///
/// turn:
///   vad_threshold: 0.5
///   prefix_padding_ms: 300
///   silence_duration_ms: 500
///   max_utterance_ms: 8000
///   listen_during_reply: false
///
/// google:
///   client_id: "....apps.googleusercontent.com"
///   client_secret: "..."
///   redirect_uri: "https://bridge.example.com/oauth2/callback"
///   calendar_id: "primary"
///
/// scheduling:
///   timezone: "Europe/Rome"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub openai: Option<OpenAIYaml>,
    pub turn: Option<TurnYaml>,
    pub google: Option<GoogleYaml>,
    pub scheduling: Option<SchedulingYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub public_host: Option<String>,
    pub tls: Option<TlsYaml>,
}

/// TLS configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TlsYaml {
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Generation service settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct OpenAIYaml {
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    pub greeting: Option<String>,
}

/// Turn-taking settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TurnYaml {
    pub vad_threshold: Option<f32>,
    pub prefix_padding_ms: Option<u32>,
    pub silence_duration_ms: Option<u32>,
    pub max_utterance_ms: Option<u64>,
    pub listen_during_reply: Option<bool>,
}

/// Google Calendar credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct GoogleYaml {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub calendar_id: Option<String>,
}

/// Scheduling settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SchedulingYaml {
    /// IANA time zone name
    pub timezone: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
