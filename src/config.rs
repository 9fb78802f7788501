//! Configuration loading and types for voxkey
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/voxkey/config.toml)
//! 3. Environment (API credential only)
//! 4. CLI arguments (highest priority)
//!
//! Loaded once at startup and held immutable, so no session ever
//! observes a config change mid-flight; edits take effect on restart.

use crate::error::VoxkeyError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Voxkey Configuration
#
# Location: ~/.config/voxkey/config.toml
# All settings can be overridden via CLI flags

# State file for external integrations (Waybar, polybar, etc.)
# Use "auto" for the default location ($XDG_RUNTIME_DIR/voxkey/state),
# a custom path, or "disabled" to turn off. The daemon writes the session
# state ("idle", "recording", "stopping") to this file whenever it changes.
state_file = "auto"

[hotkey]
# Key that starts (and in tap_tap mode also stops) dictation
# Common choices: SCROLLLOCK, PAUSE, RIGHTALT, F13-F24
# Use `evtest` to find key names for your keyboard
key = "SCROLLLOCK"

# Activation mode: "tap_tap", "push_to_talk" or "two_pedal"
# - tap_tap: press once to start, press again to stop (default)
# - push_to_talk: hold to dictate, release to stop
# - two_pedal: `key` starts, `stop_key` stops
mode = "tap_tap"

# Second binding for two_pedal mode (ignored otherwise)
# stop_key = "PAUSE"

[audio]
# Audio input device ("default" uses the system default)
# List devices with: pactl list sources short
device = "default"

# Sample rate in Hz sent to the STT backend
sample_rate = 16000

# Frame duration in milliseconds (one network message per frame)
frame_ms = 20

# Maximum session duration in seconds (safety limit)
max_duration_secs = 300

[stt]
# Streaming speech-to-text endpoint (websocket)
endpoint = "wss://stt.example.com/v1/stream"

# Language hint sent in the handshake
language = "en"

# Environment variable holding the API credential (read once at startup)
api_key_env = "VOXKEY_API_KEY"

# Reconnect policy for mid-session connection drops
max_retries = 5
initial_backoff_ms = 250
max_backoff_ms = 4000

[inject]
# Delay between injected key events in milliseconds
# 0 = fastest possible, increase if the compositor drops characters
key_delay_ms = 0
"#;

/// Hotkey activation mode
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Press once to start, press the same key again to stop (default)
    #[default]
    TapTap,
    /// Hold key to dictate, release to stop
    PushToTalk,
    /// Distinct start and stop keys
    TwoPedal,
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub hotkey: HotkeyConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub stt: SttConfig,

    #[serde(default)]
    pub inject: InjectConfig,

    /// Optional path to a state file for external integrations (e.g., Waybar).
    /// "auto" resolves to $XDG_RUNTIME_DIR/voxkey/state, "disabled" turns it off.
    #[serde(default)]
    pub state_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hotkey: HotkeyConfig::default(),
            audio: AudioConfig::default(),
            stt: SttConfig::default(),
            inject: InjectConfig::default(),
            state_file: Some("auto".to_string()),
        }
    }
}

/// Hotkey detection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HotkeyConfig {
    /// Key name (evdev KEY_* constant name, without the KEY_ prefix)
    #[serde(default = "default_hotkey_key")]
    pub key: String,

    /// Second binding for two_pedal mode
    #[serde(default)]
    pub stop_key: Option<String>,

    /// Activation mode
    #[serde(default)]
    pub mode: ActivationMode,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            key: default_hotkey_key(),
            stop_key: None,
            mode: ActivationMode::default(),
        }
    }
}

/// Audio capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// PipeWire/PulseAudio device name, or "default"
    #[serde(default = "default_audio_device")]
    pub device: String,

    /// Sample rate in Hz sent to the STT backend
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Frame duration in milliseconds
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    /// Maximum session duration in seconds (safety limit)
    #[serde(default = "default_max_duration")]
    pub max_duration_secs: u32,
}

impl AudioConfig {
    /// Samples per frame at the configured rate.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_audio_device(),
            sample_rate: default_sample_rate(),
            frame_ms: default_frame_ms(),
            max_duration_secs: default_max_duration(),
        }
    }
}

/// Streaming speech-to-text configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SttConfig {
    /// Websocket endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Language hint sent in the handshake
    #[serde(default = "default_language")]
    pub language: String,

    /// Environment variable holding the API credential
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Reconnect attempts before giving up on a session
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First reconnect delay in milliseconds
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Reconnect delay ceiling in milliseconds
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            language: default_language(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

/// Text injection configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct InjectConfig {
    /// Delay between injected key events in milliseconds
    #[serde(default)]
    pub key_delay_ms: u64,
}

fn default_hotkey_key() -> String {
    "SCROLLLOCK".to_string()
}

fn default_audio_device() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_frame_ms() -> u32 {
    20
}

fn default_max_duration() -> u32 {
    300
}

fn default_endpoint() -> String {
    "wss://stt.example.com/v1/stream".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_api_key_env() -> String {
    "VOXKEY_API_KEY".to_string()
}

fn default_max_retries() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    250
}

fn default_max_backoff() -> u64 {
    4000
}

impl Config {
    /// Default config file location (~/.config/voxkey/config.toml)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("voxkey").join("config.toml"))
    }

    /// Config directory (~/.config/voxkey)
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("voxkey"))
    }

    /// Runtime directory for state/pid files
    pub fn runtime_dir() -> PathBuf {
        dirs::runtime_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("voxkey")
    }

    /// Resolve the state_file setting to a concrete path, if enabled.
    pub fn resolve_state_file(&self) -> Option<PathBuf> {
        match self.state_file.as_deref() {
            None | Some("disabled") | Some("") => None,
            Some("auto") => Some(Self::runtime_dir().join("state")),
            Some(path) => Some(PathBuf::from(path)),
        }
    }

    /// Read the API credential from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.stt.api_key_env)
            .ok()
            .filter(|v| !v.is_empty())
    }
}

/// Load configuration from the given path, the default location, or
/// built-in defaults when no file exists.
pub fn load_config(path: Option<&Path>) -> Result<Config, VoxkeyError> {
    let path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => Config::default_path().filter(|p| p.exists()),
    };

    let config = match path {
        Some(path) => {
            tracing::debug!("Loading config from {:?}", path);
            let content = std::fs::read_to_string(&path).map_err(|e| {
                VoxkeyError::Config(format!("Cannot read {:?}: {}", path, e))
            })?;
            toml::from_str(&content)
                .map_err(|e| VoxkeyError::Config(format!("Invalid config {:?}: {}", path, e)))?
        }
        None => {
            tracing::debug!("No config file found, using defaults");
            Config::default()
        }
    };

    validate(&config)?;
    Ok(config)
}

/// Check cross-field constraints. Called after file load and again
/// after CLI overrides are applied.
pub fn validate(config: &Config) -> Result<(), VoxkeyError> {
    if config.audio.sample_rate == 0 {
        return Err(VoxkeyError::Config("audio.sample_rate must be > 0".into()));
    }
    if config.audio.frame_ms == 0 {
        return Err(VoxkeyError::Config("audio.frame_ms must be > 0".into()));
    }
    if !config.stt.endpoint.starts_with("ws://") && !config.stt.endpoint.starts_with("wss://") {
        return Err(VoxkeyError::Config(format!(
            "stt.endpoint must be a ws:// or wss:// URL, got '{}'",
            config.stt.endpoint
        )));
    }
    if config.hotkey.mode == ActivationMode::TwoPedal && config.hotkey.stop_key.is_none() {
        return Err(VoxkeyError::Config(
            "hotkey.mode = \"two_pedal\" requires hotkey.stop_key".into(),
        ));
    }
    Ok(())
}
