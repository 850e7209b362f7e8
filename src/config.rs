//! Configuration types for the avatar face, lip-sync and voice session.

use crate::credentials::CredentialRef;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// Per-frame morph blending.
    pub blend: BlendConfig,
    /// Audio and timeline driven lip-sync thresholds.
    pub lipsync: LipSyncConfig,
    /// Synthetic (text-timed) speech pacing.
    pub speech: SpeechConfig,
    /// Realtime voice session settings.
    pub voice: VoiceConfig,
    /// Credential source and ephemeral token lifetime.
    pub credentials: CredentialsConfig,
    /// Character model asset layout.
    pub rig: RigConfig,
}

/// Morph blending configuration.
///
/// Mouth shapes track audio quickly while expression changes stay gradual.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    /// Interpolation rate for expression (non-viseme) control points.
    pub expression_rate: f32,
    /// Interpolation rate for viseme-named control points.
    pub viseme_rate: f32,
    /// Per-frame multiplier applied to viseme strength when no new signal arrives.
    pub idle_decay: f32,
    /// Strength below which the idle-decayed viseme is cleared.
    pub idle_clear_below: f32,
    /// Distance below which a control point counts as settled.
    pub settle_epsilon: f32,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            expression_rate: 0.12,
            viseme_rate: 0.5,
            idle_decay: 0.9,
            idle_clear_below: 0.01,
            settle_epsilon: 1e-3,
        }
    }
}

/// Frequency-band lip-sync configuration.
///
/// These are heuristics, not a calibrated model. Every value is tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// FFT window length in samples. Yields `fft_size / 2` frequency bins.
    pub fft_size: usize,
    /// Time smoothing between successive spectra (0 = none, close to 1 = heavy).
    pub smoothing: f32,
    /// Normalized volume below which the mouth starts closing.
    pub min_volume: f32,
    /// Band energy a dominant high/low band must exceed.
    pub dominant_band: f32,
    /// How much a dominant band must exceed the mid band.
    pub dominance_ratio: f32,
    /// Mid-band energy selecting the open/central viseme.
    pub mid_band: f32,
    /// Volume selecting the generic mouth-open fallback.
    pub open_volume: f32,
    /// Per-tick strength multiplier below `min_volume`.
    pub decay: f32,
    /// Strength below which the viseme is cleared.
    pub clear_below: f32,
    /// Sampling task tick interval in milliseconds.
    pub analysis_interval_ms: u64,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_volume: 0.02,
            dominant_band: 0.3,
            dominance_ratio: 1.2,
            mid_band: 0.25,
            open_volume: 0.15,
            decay: 0.85,
            clear_below: 0.03,
            analysis_interval_ms: 16,
        }
    }
}

/// Synthetic speech timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Interval between character steps in milliseconds.
    pub char_interval_ms: u64,
    /// Speaking rate used to estimate utterance duration.
    pub words_per_minute: f32,
    /// Language tag handed to the synthesizer (e.g. `si-LK`).
    pub language: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            char_interval_ms: 70,
            words_per_minute: 150.0,
            language: "si-LK".to_owned(),
        }
    }
}

/// Default persona instructions for the realtime agent.
pub const DEFAULT_INSTRUCTIONS: &str = "You are \"Ava\", a friendly and expressive \
Sinhala-speaking virtual assistant avatar.\n\
\n\
Language:\n\
- Always respond in Sinhala (සිංහල) using natural, conversational words.\n\
- Keep responses short: 1-3 sentences.\n\
\n\
Emotion:\n\
- Express emotions clearly through word choice: සතුටුයි (happy), කණගාටුයි (sad), \
අපූරුයි (wonderful), අඩෝ (oh no), වාව් (wow).\n\
- Match the user's mood when appropriate and be empathetic.\n\
\n\
Style:\n\
- Start with a short acknowledgement: හරි, ඔව්, හ්ම්ම්.\n\
- Be warm and brief. Ask a follow-up question when it keeps the conversation going.";

/// Realtime voice session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// HTTPS base URL used for credential minting.
    pub api_base_url: String,
    /// WebSocket endpoint for the realtime session.
    pub realtime_url: String,
    /// Realtime model identifier.
    pub model: String,
    /// Output voice identifier.
    pub voice: String,
    /// Agent instructions (persona prompt).
    pub instructions: String,
    /// Model used to transcribe user audio.
    pub transcription_model: String,
    /// Audio codec for both directions.
    pub audio_format: String,
    /// Sample rate of the audio codec in Hz.
    pub sample_rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.openai.com".to_owned(),
            realtime_url: "wss://api.openai.com/v1/realtime".to_owned(),
            model: "gpt-realtime".to_owned(),
            voice: "marin".to_owned(),
            instructions: DEFAULT_INSTRUCTIONS.to_owned(),
            transcription_model: "gpt-4o-mini-transcribe".to_owned(),
            audio_format: "pcm16".to_owned(),
            sample_rate: 24_000,
        }
    }
}

/// Credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Where the long-lived API key comes from.
    pub api_key: CredentialRef,
    /// Mint short-lived `ek_` tokens instead of handing the API key to the session.
    pub ephemeral: bool,
    /// Validity assumed for a minted token when the server reports no expiry.
    pub token_validity_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            api_key: CredentialRef::Env {
                var: "OPENAI_API_KEY".to_owned(),
            },
            ephemeral: true,
            token_validity_secs: 60 * 60,
        }
    }
}

/// Character model asset configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Path to the binary glTF (GLB) character model.
    pub model_path: Option<PathBuf>,
    /// Node name of the head mesh.
    pub head_mesh: String,
    /// Node name of the teeth mesh.
    pub teeth_mesh: String,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            head_mesh: "Wolf3D_Head".to_owned(),
            teeth_mesh: "Wolf3D_Teeth".to_owned(),
        }
    }
}

impl AvatarConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::AvatarError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AvatarError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/ava/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("ava").join("config.toml")
        } else if let Some(config) = dirs::config_dir() {
            config.join("ava").join("config.toml")
        } else {
            PathBuf::from("/tmp/ava-config/config.toml")
        }
    }
}
