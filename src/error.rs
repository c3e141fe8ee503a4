//! Error types for convoice.

use std::fmt;
use thiserror::Error;

/// Which provider capability failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    SpeechToText,
    TextToSpeech,
    Nlp,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderKind::SpeechToText => "speech-to-text",
            ProviderKind::TextToSpeech => "text-to-speech",
            ProviderKind::Nlp => "nlp",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum ConvoiceError {
    // Registry errors
    #[error("Maximum concurrent conversations reached: {max}")]
    CapacityExceeded { max: usize },

    #[error("Conversation {id} not found")]
    SessionNotFound { id: String },

    #[error("Conversation {id} is already registered")]
    DuplicateSession { id: String },

    #[error("Conversation {id} is closed")]
    SessionClosed { id: String },

    #[error("Conversation registry is shut down")]
    RegistryShutdown,

    #[error("{channel} channel full for conversation {id}")]
    ChannelFull { id: String, channel: &'static str },

    // Session errors
    #[error("{provider} provider failed: {message}")]
    Provider {
        provider: ProviderKind,
        message: String,
    },

    #[error("Event channel full for conversation {session_id}, event dropped")]
    EventChannelSaturated { session_id: String },

    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio file errors
    #[error("Audio file error: {message}")]
    AudioFile { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ConvoiceError {
    /// Builds a provider failure.
    pub fn provider(provider: ProviderKind, message: impl Into<String>) -> Self {
        ConvoiceError::Provider {
            provider,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvoiceError>;
