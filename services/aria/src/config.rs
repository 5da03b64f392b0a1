//! Application Configuration Module
//!
//! Centralizes configuration for the assistant binary. Settings load from
//! environment variables (a local `.env` is honored) into a single struct
//! passed through the application.

use std::env;
use tracing::Level;

/// Realtime conversation model for live sessions.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
/// Turn-based model for the text fallback.
pub const DEFAULT_CHAT_MODEL: &str = "gemini-2.5-flash";
/// Synthesis model for speaking text-mode replies.
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
/// Prebuilt voice used for all synthesized speech.
pub const DEFAULT_VOICE: &str = "Zephyr";

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub gemini_api_key: String,
    pub live_model: String,
    pub chat_model: String,
    pub tts_model: String,
    pub voice: String,
    pub input_device: Option<String>,
    pub log_level: Level,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: Your secret key for the Gemini API. Required.
    // *   `ARIA_LIVE_MODEL`: (Optional) Realtime model for voice sessions.
    // *   `ARIA_CHAT_MODEL`: (Optional) Model for text-mode replies.
    // *   `ARIA_TTS_MODEL`: (Optional) Model for speech synthesis.
    // *   `ARIA_VOICE`: (Optional) Prebuilt voice name. Defaults to "Zephyr".
    // *   `ARIA_INPUT_DEVICE`: (Optional) Capture device name.
    // *   `RUST_LOG`: (Optional) Logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. Useful for local development, ignored if absent.
        dotenvy::dotenv().ok();

        let gemini_api_key = env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let live_model =
            env::var("ARIA_LIVE_MODEL").unwrap_or_else(|_| DEFAULT_LIVE_MODEL.to_string());
        let chat_model =
            env::var("ARIA_CHAT_MODEL").unwrap_or_else(|_| DEFAULT_CHAT_MODEL.to_string());
        let tts_model =
            env::var("ARIA_TTS_MODEL").unwrap_or_else(|_| DEFAULT_TTS_MODEL.to_string());
        let voice = env::var("ARIA_VOICE").unwrap_or_else(|_| DEFAULT_VOICE.to_string());
        let input_device = env::var("ARIA_INPUT_DEVICE").ok();

        let log_level_str = env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        Ok(Self {
            gemini_api_key,
            live_model,
            chat_model,
            tts_model,
            voice,
            input_device,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_optional_vars() {
        for var in [
            "ARIA_LIVE_MODEL",
            "ARIA_CHAT_MODEL",
            "ARIA_TTS_MODEL",
            "ARIA_VOICE",
            "ARIA_INPUT_DEVICE",
            "RUST_LOG",
        ] {
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn missing_api_key_is_rejected() {
        clear_optional_vars();
        unsafe { env::remove_var("GEMINI_API_KEY") };
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::MissingVar(_))));
    }

    #[test]
    #[serial]
    fn defaults_apply_when_only_key_is_set() {
        clear_optional_vars();
        unsafe { env::set_var("GEMINI_API_KEY", "k") };
        let config = Config::from_env().unwrap();
        assert_eq!(config.voice, DEFAULT_VOICE);
        assert_eq!(config.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(config.log_level, Level::INFO);
        assert!(config.input_device.is_none());
    }

    #[test]
    #[serial]
    fn invalid_log_level_is_rejected() {
        clear_optional_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "k");
            env::set_var("RUST_LOG", "noisy");
        }
        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidLogLevel(_))));
        unsafe { env::remove_var("RUST_LOG") };
    }
}
