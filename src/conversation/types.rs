//! Data types exchanged with a conversation session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Serde adapter storing a [`Duration`] as whole milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Session parameters fixed at creation.
///
/// Empty strings and zero durations mean "use the registry default"; they are
/// filled in by [`ConversationConfig::resolve`] before the session starts and
/// never change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    pub id: String,
    pub language: String,
    pub voice: String,
    pub enable_vad: bool,
    pub enable_nlp: bool,
    pub enable_emotion: bool,
    pub streaming_mode: bool,
    pub auto_response: bool,
    #[serde(with = "duration_ms")]
    pub max_duration: Duration,
    #[serde(with = "duration_ms")]
    pub silence_timeout: Duration,
    pub user_id: String,
    pub session_id: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            language: String::new(),
            voice: String::new(),
            enable_vad: true,
            enable_nlp: true,
            enable_emotion: true,
            streaming_mode: true,
            auto_response: true,
            max_duration: Duration::ZERO,
            silence_timeout: Duration::ZERO,
            user_id: String::new(),
            session_id: String::new(),
        }
    }
}

/// Registry-wide values used for unset [`ConversationConfig`] fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationDefaults {
    pub language: String,
    pub voice: String,
    pub max_duration: Duration,
    pub silence_timeout: Duration,
    pub enable_vad: bool,
    pub enable_nlp: bool,
    pub enable_emotion: bool,
    pub streaming_mode: bool,
    pub auto_response: bool,
}

impl Default for ConversationDefaults {
    fn default() -> Self {
        Self {
            language: crate::defaults::DEFAULT_LANGUAGE.to_string(),
            voice: crate::defaults::DEFAULT_VOICE.to_string(),
            max_duration: crate::defaults::MAX_DURATION,
            silence_timeout: crate::defaults::SILENCE_TIMEOUT,
            enable_vad: true,
            enable_nlp: true,
            enable_emotion: true,
            streaming_mode: true,
            auto_response: true,
        }
    }
}

impl ConversationDefaults {
    /// Starting point for a new conversation with the default feature flags.
    ///
    /// Identity, language, voice and durations stay unset so
    /// [`ConversationConfig::resolve`] still fills them.
    pub fn config(&self) -> ConversationConfig {
        ConversationConfig {
            enable_vad: self.enable_vad,
            enable_nlp: self.enable_nlp,
            enable_emotion: self.enable_emotion,
            streaming_mode: self.streaming_mode,
            auto_response: self.auto_response,
            ..ConversationConfig::default()
        }
    }
}

impl ConversationConfig {
    /// Fills unset fields from `defaults` and assigns an id when missing.
    pub fn resolve(mut self, defaults: &ConversationDefaults) -> Self {
        if self.id.is_empty() {
            self.id = Uuid::new_v4().to_string();
        }
        if self.language.is_empty() {
            self.language = defaults.language.clone();
        }
        if self.voice.is_empty() {
            self.voice = defaults.voice.clone();
        }
        if self.max_duration.is_zero() {
            self.max_duration = defaults.max_duration;
        }
        if self.silence_timeout.is_zero() {
            self.silence_timeout = defaults.silence_timeout;
        }
        self
    }
}

/// A unit of raw audio moving through a session channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioChunk {
    pub id: String,
    pub data: Vec<u8>,
    pub sequence: u64,
    pub is_last: bool,
    pub timestamp: DateTime<Utc>,
}

impl AudioChunk {
    pub fn new(data: Vec<u8>, sequence: u64, is_last: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data,
            sequence,
            is_last,
            timestamp: Utc::now(),
        }
    }
}

/// Who produced a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    System,
}

/// Optional recognition details attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// One entry of a session's append-only transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub id: String,
    pub kind: MessageKind,
    pub content: String,
    pub speaker: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl ConversationMessage {
    pub fn user(content: impl Into<String>, metadata: MessageMetadata) -> Self {
        Self::new(MessageKind::User, "user", content, metadata)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(
            MessageKind::Assistant,
            "assistant",
            content,
            MessageMetadata::default(),
        )
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageKind::System, "system", content, MessageMetadata::default())
    }

    fn new(
        kind: MessageKind,
        speaker: &str,
        content: impl Into<String>,
        metadata: MessageMetadata,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content: content.into(),
            speaker: speaker.to_string(),
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Operator commands accepted on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Start,
    Pause,
    Resume,
    Stop,
    Mute,
    Unmute,
}

/// A control command with its issue time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationControl {
    pub action: ControlAction,
    pub timestamp: DateTime<Utc>,
}

impl ConversationControl {
    pub fn new(action: ControlAction) -> Self {
        Self {
            action,
            timestamp: Utc::now(),
        }
    }
}

/// Which terminal condition ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// `Stop` control command or `stop_session`.
    Stopped,
    /// No audio for the configured silence timeout.
    SilenceTimeout,
    /// The session reached its maximum duration.
    MaxDuration,
    /// The owning registry shut down.
    Shutdown,
    /// Removed by the lifecycle supervisor after outliving its deadline.
    Expired,
    /// A session task panicked.
    Failed,
}
