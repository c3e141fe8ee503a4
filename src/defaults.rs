//! Default configuration constants for convoice.
//!
//! Shared by the registry, the session actor and the TOML config layer so the
//! same numbers apply whether a value comes from a file or from code.

use std::time::Duration;

/// Assumed audio sample rate in Hz.
pub const SAMPLE_RATE: u32 = 16000;

/// Audio accumulated per utterance segment.
pub const SEGMENT_DURATION: Duration = Duration::from_secs(2);

/// Segment flush threshold in bytes.
///
/// Two seconds of 16 kHz mono PCM16. Wire chunks of any size accumulate until
/// this many bytes are buffered or a chunk is marked last.
pub const SEGMENT_FLUSH_BYTES: usize = 64_000;

/// Default VAD energy threshold (mean of squared normalized magnitudes).
///
/// Equivalent to an RMS of 0.02, the level that separates typical microphone
/// speech from background noise.
pub const VAD_ENERGY_THRESHOLD: f32 = 0.0004;

/// Default conversation language.
pub const DEFAULT_LANGUAGE: &str = "zh";

/// Default synthesized voice.
pub const DEFAULT_VOICE: &str = "alloy";

/// Default maximum length of a single conversation.
pub const MAX_DURATION: Duration = Duration::from_secs(30 * 60);

/// Default audio inactivity window before a conversation ends.
pub const SILENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default cap on concurrently registered conversations.
pub const MAX_CONCURRENT_SESSIONS: usize = 100;

/// Default interval between lifecycle supervisor sweeps.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Period of the per-session silence watchdog.
pub const WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// Inbound audio channel capacity.
pub const AUDIO_BUFFER: usize = 100;

/// Text channel capacity (both directions).
pub const TEXT_BUFFER: usize = 100;

/// Control channel capacity.
pub const CONTROL_BUFFER: usize = 10;

/// Event channel capacity.
pub const EVENT_BUFFER: usize = 100;
