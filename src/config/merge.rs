//! Applying YAML overrides on top of the environment.

use std::path::PathBuf;

use super::env::{load_from_env, parse_timezone};
use super::yaml::YamlConfig;
use super::{ServerConfig, TlsConfig};

/// Load the environment, then overlay whatever the YAML file sets.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(public_host) = server.public_host {
            config.public_host = Some(public_host);
        }
        if let Some(tls) = server.tls {
            match (tls.cert_path, tls.key_path) {
                (Some(cert), Some(key)) => {
                    config.tls = Some(TlsConfig {
                        cert_path: PathBuf::from(cert),
                        key_path: PathBuf::from(key),
                    });
                }
                (None, None) => {}
                _ => {
                    return Err(
                        "server.tls.cert_path and server.tls.key_path must be set together".into(),
                    );
                }
            }
        }
    }

    if let Some(openai) = yaml.openai {
        if let Some(api_key) = openai.api_key {
            config.openai_api_key = Some(api_key);
        }
        if let Some(url) = openai.url {
            config.openai_url = url;
        }
        if let Some(model) = openai.model {
            config.openai_model = model;
        }
        if let Some(voice) = openai.voice {
            config.openai_voice = voice;
        }
        if let Some(instructions) = openai.instructions {
            config.instructions = instructions;
        }
        if let Some(temperature) = openai.temperature {
            config.temperature = temperature;
        }
        if let Some(greeting) = openai.greeting {
            config.greeting = Some(greeting);
        }
    }

    if let Some(turn) = yaml.turn {
        if let Some(threshold) = turn.vad_threshold {
            config.vad_threshold = threshold;
        }
        if let Some(padding) = turn.prefix_padding_ms {
            config.vad_prefix_padding_ms = padding;
        }
        if let Some(silence) = turn.silence_duration_ms {
            config.vad_silence_duration_ms = silence;
        }
        if let Some(max) = turn.max_utterance_ms {
            config.max_utterance_ms = max;
        }
        if let Some(listen) = turn.listen_during_reply {
            config.listen_during_reply = listen;
        }
    }

    if let Some(google) = yaml.google {
        if let Some(client_id) = google.client_id {
            config.google_client_id = Some(client_id);
        }
        if let Some(client_secret) = google.client_secret {
            config.google_client_secret = Some(client_secret);
        }
        if let Some(redirect_uri) = google.redirect_uri {
            config.google_redirect_uri = Some(redirect_uri);
        }
        if let Some(refresh_token) = google.refresh_token {
            config.google_refresh_token = Some(refresh_token);
        }
        if let Some(calendar_id) = google.calendar_id {
            config.google_calendar_id = calendar_id;
        }
    }

    if let Some(timezone) = yaml.scheduling.and_then(|s| s.timezone) {
        config.calendar_timezone = parse_timezone("scheduling.timezone", &timezone)?;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup_env_vars() {
        unsafe {
            for key in super::super::env::tests::ENV_KEYS {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_no_yaml_is_env_only() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("OPENAI_VOICE", "ash");
        }

        let config = merge_config(None).unwrap();
        assert_eq!(config.openai_voice, "ash");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_partial_tls_in_yaml_is_rejected() {
        cleanup_env_vars();

        let yaml: YamlConfig =
            serde_yaml::from_str("server:\n  tls:\n    cert_path: \"/c.pem\"\n").unwrap();
        let err = merge_config(Some(yaml)).unwrap_err().to_string();
        assert!(err.contains("server.tls"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_yaml_google_overrides() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("GOOGLE_CALENDAR_ID", "env-calendar");
            std::env::set_var("GOOGLE_CLIENT_ID", "env-client");
        }

        let yaml: YamlConfig =
            serde_yaml::from_str("google:\n  calendar_id: \"team@example.com\"\n").unwrap();
        let config = merge_config(Some(yaml)).unwrap();
        assert_eq!(config.google_calendar_id, "team@example.com");
        assert_eq!(config.google_client_id.as_deref(), Some("env-client"));

        cleanup_env_vars();
    }
}
