//! convoice - Voice conversation orchestration engine
//!
//! Runs many concurrent voice conversations, each as its own set of tasks
//! bridging inbound audio, speech-to-text, reply generation and
//! text-to-speech through bounded channels.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod conversation;
pub mod defaults;
pub mod error;
pub mod logging;
#[cfg(feature = "cli")]
pub mod output;
pub mod providers;

// Composition root for the simulate command
#[cfg(feature = "cli")]
pub mod simulate;

// Sessions
pub use conversation::{
    ConversationConfig, ConversationEvent, ConversationStatus, EventKind, RegistryConfig,
    SessionHandle, SessionRegistry, SessionSnapshot,
};

// Providers
pub use providers::{LanguageProcessor, ProviderGateway, SpeechToText, TextToSpeech};

// Error handling
pub use error::{ConvoiceError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_hash_suffix_matches_build() {
        let ver = version_string();
        match option_env!("GIT_HASH") {
            Some(hash) if !hash.is_empty() => assert_eq!(ver.split('+').nth(1), Some(hash)),
            _ => assert_eq!(ver, env!("CARGO_PKG_VERSION")),
        }
    }
}
