//! Configuration management
//!
//! Loads and persists the voice bridge's configuration: the OpenAI
//! Realtime credential and model, audio/codec settings for each leg,
//! turn-detection thresholds, streaming-mode parameters, and the
//! process-level HTTP server settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server bind settings.
    #[serde(default)]
    pub http: HttpConfig,
    /// Realtime voice bridge settings.
    #[serde(default)]
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Everything the realtime relay needs, independent of transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub session: SessionTimeouts,
    #[serde(default)]
    pub twilio: TwilioConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiConfig::default(),
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            session: SessionTimeouts::default(),
            twilio: TwilioConfig::default(),
        }
    }
}

/// Voices supported by the OpenAI Realtime API.
pub const SUPPORTED_OPENAI_VOICES: &[&str] = &[
    "alloy", "ash", "ballad", "coral", "echo", "sage", "shimmer", "verse", "cedar", "marin",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Realtime model id, e.g. "gpt-realtime".
    #[serde(default = "default_openai_model")]
    pub model: String,
    /// System instructions sent in `session.update`.
    #[serde(default = "default_instructions")]
    pub instructions: String,
    /// Send a ping this often if tungstenite's native ping isn't relied on.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// How long to wait for a pong before declaring the connection lost.
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,
    /// How long to wait for a clean close handshake.
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
}

fn default_openai_model() -> String {
    "gpt-realtime".to_string()
}

fn default_instructions() -> String {
    "You are a helpful voice assistant speaking with a caller over the phone. \
     Keep replies short and conversational."
        .to_string()
}

fn default_ping_interval_secs() -> u64 {
    15
}

fn default_ping_timeout_secs() -> u64 {
    10
}

fn default_close_timeout_secs() -> u64 {
    10
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            model: default_openai_model(),
            instructions: default_instructions(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            close_timeout_secs: default_close_timeout_secs(),
        }
    }
}

/// Audio codec/streaming settings, independent of telephony vs. alternative
/// transports — a non-Twilio caller can run the same relay at PCM16/24kHz.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Wire codec name sent as `audio.input.format.type` / `output.format.type`.
    #[serde(default = "default_format")]
    pub input_format: String,
    #[serde(default = "default_format")]
    pub output_format: String,
    /// Sample rate in Hz for both legs (Twilio: 8000, alternative: 24000).
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: u32,
    /// Bytes per sample for the *input* duration accounting. µ-law is 1
    /// byte/sample; 16-bit PCM is 2.
    #[serde(default = "default_bytes_per_sample")]
    pub bytes_per_sample: u32,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Bounded queue depth for both the inbound and outbound audio queues.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Maximum bytes retained per response in `Accumulate` mode.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: usize,
    /// Maximum chunk count retained per response in `Accumulate` mode.
    #[serde(default = "default_max_chunks")]
    pub max_chunks_per_response: usize,
    /// Output audio streaming policy.
    #[serde(default)]
    pub streaming_mode: StreamingMode,
    /// `Windowed` mode: flush after this many chunks.
    #[serde(default = "default_window_size_chunks")]
    pub window_size_chunks: usize,
    /// `Windowed` mode: flush if a delta is at least this many bytes.
    #[serde(default = "default_immediate_threshold_bytes")]
    pub immediate_threshold_bytes: usize,
    /// `Windowed` mode: flush after this many milliseconds since the first
    /// chunk in the window, even if neither other threshold was hit.
    #[serde(default = "default_window_timeout_ms")]
    pub window_timeout_ms: u64,
}

fn default_format() -> String {
    "g711_ulaw".to_string()
}

fn default_sample_rate() -> u32 {
    8000
}

fn default_bytes_per_sample() -> u32 {
    1
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_queue_depth() -> usize {
    100
}

fn default_max_memory_mb() -> usize {
    50
}

fn default_max_chunks() -> usize {
    1000
}

fn default_window_size_chunks() -> usize {
    5
}

fn default_immediate_threshold_bytes() -> usize {
    4096
}

fn default_window_timeout_ms() -> u64 {
    200
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_format: default_format(),
            output_format: default_format(),
            sample_rate_hz: default_sample_rate(),
            bytes_per_sample: default_bytes_per_sample(),
            voice: default_voice(),
            speed: default_speed(),
            queue_depth: default_queue_depth(),
            max_memory_mb: default_max_memory_mb(),
            max_chunks_per_response: default_max_chunks(),
            streaming_mode: StreamingMode::default(),
            window_size_chunks: default_window_size_chunks(),
            immediate_threshold_bytes: default_immediate_threshold_bytes(),
            window_timeout_ms: default_window_timeout_ms(),
        }
    }
}

/// Output audio delivery policy (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Forward every delta immediately; no batching.
    Individual,
    /// Batch deltas by count/size/time.
    Windowed,
    /// Retain all deltas until `response.done`.
    #[default]
    Accumulate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_vad_type")]
    pub r#type: String,
    #[serde(default = "default_true")]
    pub create_response: bool,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
    #[serde(default = "default_prefix_padding_ms")]
    pub prefix_padding_ms: u32,
    #[serde(default = "default_silence_duration_ms")]
    pub silence_duration_ms: u32,
}

fn default_vad_type() -> String {
    "server_vad".to_string()
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> f32 {
    0.5
}

fn default_prefix_padding_ms() -> u32 {
    300
}

fn default_silence_duration_ms() -> u32 {
    500
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            r#type: default_vad_type(),
            create_response: true,
            threshold: default_threshold(),
            prefix_padding_ms: default_prefix_padding_ms(),
            silence_duration_ms: default_silence_duration_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTimeouts {
    /// How many 1-second `recv` attempts to make while waiting for
    /// `session.created` before giving up.
    #[serde(default = "default_session_creation_timeout_secs")]
    pub session_creation_timeout_secs: u32,
    /// Debounce between sending a `function_call_output` and the
    /// following `response.create`.
    #[serde(default = "default_tool_result_debounce_ms")]
    pub tool_result_debounce_ms: u64,
    /// Bound on waiting for cancelled tool tasks during teardown.
    #[serde(default = "default_tool_cancel_deadline_ms")]
    pub tool_cancel_deadline_ms: u64,
}

fn default_session_creation_timeout_secs() -> u32 {
    5
}

fn default_tool_result_debounce_ms() -> u64 {
    100
}

fn default_tool_cancel_deadline_ms() -> u64 {
    2000
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            session_creation_timeout_secs: default_session_creation_timeout_secs(),
            tool_result_debounce_ms: default_tool_result_debounce_ms(),
            tool_cancel_deadline_ms: default_tool_cancel_deadline_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    #[serde(default = "default_twilio_voice")]
    pub twiml_voice: String,
    #[serde(default = "default_greeting")]
    pub greeting_message: String,
    #[serde(default = "default_pause_secs")]
    pub pause_length_secs: u32,
}

fn default_twilio_voice() -> String {
    "Google.en-US-Chirp3-HD-Aoede".to_string()
}

fn default_greeting() -> String {
    "Please wait while we connect your call to the A. I. voice assistant.".to_string()
}

fn default_pause_secs() -> u32 {
    1
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            twiml_voice: default_twilio_voice(),
            greeting_message: default_greeting(),
            pause_length_secs: default_pause_secs(),
        }
    }
}

impl Config {
    /// Load configuration from disk, creating a default file on first run.
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .context("Failed to read config file")?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Persist configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path
            .parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Fetch the OpenAI Realtime API key, failing fast per spec: a missing
    /// credential is a configuration-fatal error the caller cannot start
    /// without.
    pub fn openai_api_key(&self) -> Result<String> {
        std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY is not set; the voice bridge cannot start without it")
    }
}

/// Path to the configuration file.
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "voice-bridge", "voice-bridge")
        .context("Failed to resolve project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_audio_config_matches_twilio_wire_format() {
        let cfg = AudioConfig::default();
        assert_eq!(cfg.input_format, "g711_ulaw");
        assert_eq!(cfg.sample_rate_hz, 8000);
        assert_eq!(cfg.bytes_per_sample, 1);
    }

    #[test]
    fn streaming_mode_defaults_to_accumulate() {
        assert_eq!(AudioConfig::default().streaming_mode, StreamingMode::Accumulate);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let s = toml::to_string_pretty(&cfg).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.bridge.audio.sample_rate_hz, cfg.bridge.audio.sample_rate_hz);
    }
}
