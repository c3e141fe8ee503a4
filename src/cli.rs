//! Command-line interface for convoice
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Voice conversation orchestration engine
#[derive(Parser, Debug)]
#[command(
    name = "convoice",
    version,
    about = "Voice conversation orchestration engine"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs, -vv: trace logs)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a duration string.
///
/// Supports any format accepted by `humantime`: bare numbers (seconds),
/// single-unit (`30s`, `5m`, `2h`), and compound (`1h30m`, `2m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    // Bare number → seconds
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive one conversation from a WAV file using mock providers
    Simulate {
        /// WAV file to stream into the conversation
        wav: PathBuf,

        /// Audio chunk length in milliseconds
        #[arg(long, value_name = "MS", default_value = "100")]
        chunk_ms: u32,

        /// Text the mock recognizer returns for every utterance
        #[arg(long, value_name = "TEXT", default_value = "hello")]
        transcript: String,

        /// Fixed assistant reply (default: canned responses)
        #[arg(long, value_name = "TEXT")]
        reply: Option<String>,

        /// Conversation language (default: from config)
        #[arg(long, value_name = "LANG")]
        language: Option<String>,

        /// Send chunks at real-time pace instead of as fast as possible
        #[arg(long)]
        realtime: bool,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,

        /// Give up waiting for replies after this long. Examples: 30s, 2m
        #[arg(long, value_name = "DURATION", default_value = "30s", value_parser = parse_duration)]
        timeout: Duration,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the resolved configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
