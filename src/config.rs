//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: Converts between Rust structs and TOML/JSON/env representations
//! - **derive macros**: Generate Debug, Clone, Serialize, Deserialize implementations
//! - **Result<T, E>**: Error handling that forces you to handle potential failures
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, GOOGLE_API_KEY, HOST, PORT, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, live backend, context
/// service, audio, session) keeps each concern readable and lets handlers
/// borrow only the section they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub live: LiveConfig,
    pub context_service: ContextServiceConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech backend (live session) configuration.
///
/// ## Fields:
/// - `api_key`: Credential for the backend. Never read from config.toml in
///   practice; the loader overrides it from the GOOGLE_API_KEY environment
///   variable, and it is skipped on serialization so the GET /config endpoint
///   cannot leak it.
/// - `endpoint`: wss URL of the backend's bidirectional streaming endpoint.
/// - `model`: Conversational speech model to request.
/// - `voice`: Prebuilt synthesis voice name injected into session setup.
/// - `connect_timeout_seconds`: How long to wait for the backend handshake
///   before reporting the backend as unavailable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveConfig {
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub connect_timeout_seconds: u64,
}

/// Read API of the main application, used to assemble the per-user context
/// bundle at session start.
///
/// ## Fields:
/// - `base_url`: Root of the internal context endpoint. When unset, every
///   session starts with an empty bundle (useful for local development).
/// - `request_timeout_seconds`: Per-request timeout; context reads are
///   best-effort and must not stall session open for long.
/// - `reflection_limit`: How many of the most recent reflections to include.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextServiceConfig {
    pub base_url: Option<String>,
    pub request_timeout_seconds: u64,
    pub reflection_limit: usize,
}

/// Audio pipeline constants.
///
/// ## Fields:
/// - `capture_sample_rate`: Microphone rate; the backend expects PCM16 at
///   16 kHz so this is also the advertised inbound mime rate.
/// - `playback_sample_rate`: Rate of backend audio output (24 kHz observed).
/// - `capture_block_size`: Samples per capture block. One block becomes one
///   wire frame; a tuning constant, not a protocol contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub capture_block_size: usize,
    pub channels: u16,
}

/// Session lifecycle tuning.
///
/// ## Tuning guidelines:
/// - Higher concurrent sessions: more simultaneous conversations, one backend
///   connection each, so memory and bandwidth scale linearly.
/// - The heartbeat pair follows the usual WebSocket convention: ping on the
///   interval, drop the client after the timeout with no pong.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_concurrent_sessions: usize,
    pub heartbeat_interval_seconds: u64,
    pub client_timeout_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            live: LiveConfig {
                api_key: None,
                endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                model: "gemini-2.5-flash-preview-native-audio-dialog".to_string(),
                voice: "Kore".to_string(),
                connect_timeout_seconds: 15,
            },
            context_service: ContextServiceConfig {
                base_url: None,
                request_timeout_seconds: 5,
                reflection_limit: 5,
            },
            audio: AudioConfig {
                capture_sample_rate: 16_000,
                playback_sample_rate: 24_000,
                capture_block_size: 4096,
                channels: 1,
            },
            session: SessionConfig {
                max_concurrent_sessions: 10,
                heartbeat_interval_seconds: 30,
                client_timeout_seconds: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases: HOST, PORT (deployment platforms) and
    ///    GOOGLE_API_KEY (the backend credential, kept out of the TOML file)
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `PORT=3000`: Special case for deployment platforms
    /// - `GOOGLE_API_KEY=...`: Backend credential
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms set these without the APP_ prefix
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        // The backend credential lives in the environment, never in the file
        if let Ok(key) = env::var("GOOGLE_API_KEY") {
            settings = settings.set_override("live.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## Why validate:
    /// Catching configuration errors at startup prevents confusing runtime
    /// failures (a zero block size, for example, would make the capture
    /// pipeline spin without ever producing a frame).
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.live.model.is_empty() {
            return Err(anyhow::anyhow!("Live model name cannot be empty"));
        }

        if self.live.voice.is_empty() {
            return Err(anyhow::anyhow!("Live voice name cannot be empty"));
        }

        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rates must be greater than 0"));
        }

        if self.audio.capture_block_size == 0 {
            return Err(anyhow::anyhow!("Capture block size must be greater than 0"));
        }

        if self.audio.channels != 1 {
            return Err(anyhow::anyhow!(
                "Only mono audio is supported (channels = 1)"
            ));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        if self.session.heartbeat_interval_seconds >= self.session.client_timeout_seconds {
            return Err(anyhow::anyhow!(
                "Heartbeat interval must be shorter than the client timeout"
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The default configuration must be internally consistent.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.capture_sample_rate, 16_000);
        assert_eq!(config.audio.playback_sample_rate, 24_000);
        assert_eq!(config.live.voice, "Kore");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.capture_block_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channels = 2;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.heartbeat_interval_seconds = 90;
        assert!(config.validate().is_err());
    }

    /// The credential must never appear in serialized config (the GET /config
    /// endpoint returns this serialization verbatim).
    #[test]
    fn test_api_key_not_serialized() {
        let mut config = AppConfig::default();
        config.live.api_key = Some("secret".to_string());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("api_key"));
    }
}
