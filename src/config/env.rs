//! Environment variable loading.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use chrono_tz::Tz;

use super::{ServerConfig, TlsConfig};

/// A non-empty environment value.
fn var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment value, naming the key on failure.
fn parse_var<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|e| format!("Invalid value for {key}: '{raw}' ({e})"))
        })
        .transpose()
}

fn parse_bool(key: &str) -> Result<Option<bool>, String> {
    var(key)
        .map(|raw| match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(format!("Invalid value for {key}: '{raw}' (expected true or false)")),
        })
        .transpose()
}

pub(super) fn parse_timezone(key: &str, raw: &str) -> Result<Tz, String> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|e| format!("Invalid value for {key}: '{raw}' ({e})"))
}

/// Build a configuration from environment variables over the defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = ServerConfig::default();

    if let Some(host) = var("HOST") {
        config.host = host;
    }
    if let Some(port) = parse_var("PORT")? {
        config.port = port;
    }
    config.tls = match (var("TLS_CERT_PATH"), var("TLS_KEY_PATH")) {
        (Some(cert), Some(key)) => Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        }),
        (None, None) => None,
        _ => return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".into()),
    };
    config.public_host = var("PUBLIC_HOST");

    config.openai_api_key = var("OPENAI_API_KEY");
    if let Some(url) = var("OPENAI_REALTIME_URL") {
        config.openai_url = url;
    }
    if let Some(model) = var("OPENAI_REALTIME_MODEL") {
        config.openai_model = model;
    }
    if let Some(voice) = var("OPENAI_VOICE") {
        config.openai_voice = voice;
    }
    if let Some(instructions) = var("SYSTEM_INSTRUCTIONS") {
        config.instructions = instructions;
    }
    if let Some(temperature) = parse_var("OPENAI_TEMPERATURE")? {
        config.temperature = temperature;
    }
    config.greeting = var("GREETING");

    if let Some(threshold) = parse_var("VAD_THRESHOLD")? {
        config.vad_threshold = threshold;
    }
    if let Some(padding) = parse_var("VAD_PREFIX_PADDING_MS")? {
        config.vad_prefix_padding_ms = padding;
    }
    if let Some(silence) = parse_var("VAD_SILENCE_DURATION_MS")? {
        config.vad_silence_duration_ms = silence;
    }
    if let Some(max) = parse_var("MAX_UTTERANCE_MS")? {
        config.max_utterance_ms = max;
    }
    if let Some(listen) = parse_bool("LISTEN_DURING_REPLY")? {
        config.listen_during_reply = listen;
    }

    config.google_client_id = var("GOOGLE_CLIENT_ID");
    config.google_client_secret = var("GOOGLE_CLIENT_SECRET");
    config.google_redirect_uri = var("GOOGLE_REDIRECT_URI");
    config.google_refresh_token = var("GOOGLE_REFRESH_TOKEN");
    if let Some(calendar_id) = var("GOOGLE_CALENDAR_ID") {
        config.google_calendar_id = calendar_id;
    }
    if let Some(raw) = var("CALENDAR_TIMEZONE") {
        config.calendar_timezone = parse_timezone("CALENDAR_TIMEZONE", &raw)?;
    }

    Ok(config)
}
