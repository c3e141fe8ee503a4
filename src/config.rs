use crate::audio::{SampleFormat, SegmenterConfig};
use crate::defaults;
use crate::error::{ConvoiceError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
#[cfg(feature = "cli")]
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub registry: RegistrySection,
    pub conversation: ConversationSection,
    pub audio: AudioSection,
    pub channels: ChannelSection,
}

/// Session limits and supervisor cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistrySection {
    pub max_concurrent: usize,
    pub cleanup_interval_secs: u64,
}

/// Defaults applied to conversations that leave fields unset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConversationSection {
    pub language: String,
    pub voice: String,
    pub max_duration_secs: u64,
    pub silence_timeout_ms: u64,
    pub enable_vad: bool,
    pub enable_nlp: bool,
    pub enable_emotion: bool,
    pub streaming_mode: bool,
    pub auto_response: bool,
}

/// Segmentation and voice activity detection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioSection {
    /// Explicit segment threshold; derived from the sample rate and format when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_bytes: Option<usize>,
    pub sample_rate: u32,
    pub vad_threshold: f32,
    pub sample_format: SampleFormat,
}

/// Per-session channel capacities
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelSection {
    pub audio_buffer: usize,
    pub text_buffer: usize,
    pub control_buffer: usize,
    pub event_buffer: usize,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT_SESSIONS,
            cleanup_interval_secs: defaults::CLEANUP_INTERVAL.as_secs(),
        }
    }
}

impl Default for ConversationSection {
    fn default() -> Self {
        Self {
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            max_duration_secs: defaults::MAX_DURATION.as_secs(),
            silence_timeout_ms: defaults::SILENCE_TIMEOUT.as_millis() as u64,
            enable_vad: true,
            enable_nlp: true,
            enable_emotion: true,
            streaming_mode: true,
            auto_response: true,
        }
    }
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            flush_bytes: None,
            sample_rate: defaults::SAMPLE_RATE,
            vad_threshold: defaults::VAD_ENERGY_THRESHOLD,
            sample_format: SampleFormat::default(),
        }
    }
}

impl AudioSection {
    /// Bytes buffered per utterance segment.
    pub fn segmenter(&self) -> SegmenterConfig {
        match self.flush_bytes {
            Some(flush_bytes) => SegmenterConfig { flush_bytes },
            None => SegmenterConfig::for_format(self.sample_rate, self.sample_format),
        }
    }
}

impl Default for ChannelSection {
    fn default() -> Self {
        Self {
            audio_buffer: defaults::AUDIO_BUFFER,
            text_buffer: defaults::TEXT_BUFFER,
            control_buffer: defaults::CONTROL_BUFFER,
            event_buffer: defaults::EVENT_BUFFER,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CONVOICE_LANGUAGE → conversation.language
    /// - CONVOICE_VOICE → conversation.voice
    /// - CONVOICE_MAX_SESSIONS → registry.max_concurrent (ignored unless a number)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(language) = std::env::var("CONVOICE_LANGUAGE")
            && !language.is_empty()
        {
            self.conversation.language = language;
        }

        if let Ok(voice) = std::env::var("CONVOICE_VOICE")
            && !voice.is_empty()
        {
            self.conversation.voice = voice;
        }

        if let Ok(max) = std::env::var("CONVOICE_MAX_SESSIONS")
            && let Ok(max) = max.trim().parse::<usize>()
        {
            self.registry.max_concurrent = max;
        }

        self
    }

    /// Rejects values that would leave the engine unable to run.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("registry.max_concurrent", self.registry.max_concurrent as u64),
            ("registry.cleanup_interval_secs", self.registry.cleanup_interval_secs),
            ("conversation.max_duration_secs", self.conversation.max_duration_secs),
            ("conversation.silence_timeout_ms", self.conversation.silence_timeout_ms),
            ("audio.sample_rate", self.audio.sample_rate as u64),
            ("audio.flush_bytes", self.audio.segmenter().flush_bytes as u64),
            ("channels.audio_buffer", self.channels.audio_buffer as u64),
            ("channels.text_buffer", self.channels.text_buffer as u64),
            ("channels.control_buffer", self.channels.control_buffer as u64),
            ("channels.event_buffer", self.channels.event_buffer as u64),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConvoiceError::ConfigInvalidValue {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.audio.vad_threshold) {
            return Err(ConvoiceError::ConfigInvalidValue {
                key: "audio.vad_threshold".to_string(),
                message: format!("{} is outside 0.0..=1.0", self.audio.vad_threshold),
            });
        }

        Ok(())
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConvoiceError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/convoice/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("convoice")
            .join("config.toml")
    }
}
