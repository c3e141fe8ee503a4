//! Lifecycle events published on a session's event channel.

use crate::conversation::state::ConversationStatus;
use crate::conversation::types::{ControlAction, EndReason};
use crate::error::{ConvoiceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

/// Event payloads, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ConversationStarted {
        language: String,
        voice: String,
    },
    ConversationEnded {
        reason: EndReason,
        duration_ms: u64,
        message_count: usize,
    },
    SpeechStart,
    SpeechEnd {
        bytes: usize,
    },
    TextReceived {
        text: String,
        confidence: f32,
    },
    ResponseStart {
        input_text: String,
    },
    ResponseEnd {
        response_text: String,
        audio_duration_ms: u64,
    },
    Error {
        message: String,
    },
    StatusChange {
        action: ControlAction,
        status: ConversationStatus,
    },
}

impl EventKind {
    /// Wire name of the event, matching the serialized `type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ConversationStarted { .. } => "conversation_started",
            EventKind::ConversationEnded { .. } => "conversation_ended",
            EventKind::SpeechStart => "speech_start",
            EventKind::SpeechEnd { .. } => "speech_end",
            EventKind::TextReceived { .. } => "text_received",
            EventKind::ResponseStart { .. } => "response_start",
            EventKind::ResponseEnd { .. } => "response_end",
            EventKind::Error { .. } => "error",
            EventKind::StatusChange { .. } => "status_change",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEvent {
    pub conversation_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

/// Best-effort sender for one session's events.
///
/// Never blocks: a full channel drops the event with a warning.
#[derive(Debug, Clone)]
pub(crate) struct EventEmitter {
    conversation_id: String,
    tx: mpsc::Sender<ConversationEvent>,
}

impl EventEmitter {
    pub(crate) fn new(conversation_id: String, tx: mpsc::Sender<ConversationEvent>) -> Self {
        Self {
            conversation_id,
            tx,
        }
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        if let Err(e) = self.try_emit(kind) {
            warn!(conversation_id = %self.conversation_id, "{}", e);
        }
    }

    /// Delivers an event if there is room.
    ///
    /// A consumer that dropped its receiver is not an error.
    pub(crate) fn try_emit(&self, kind: EventKind) -> Result<()> {
        let name = kind.name();
        let event = ConversationEvent {
            conversation_id: self.conversation_id.clone(),
            kind,
            timestamp: Utc::now(),
        };
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ConvoiceError::EventChannelSaturated {
                session_id: self.conversation_id.clone(),
            }),
            Err(TrySendError::Closed(_)) => {
                trace!(conversation_id = %self.conversation_id, event = name, "no event consumer");
                Ok(())
            }
        }
    }
}
