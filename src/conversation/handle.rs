//! Transport-facing handle to a running conversation.

use crate::conversation::events::ConversationEvent;
use crate::conversation::state::{ConversationStatus, SessionState};
use crate::conversation::types::{
    AudioChunk, ControlAction, ConversationConfig, ConversationControl, ConversationMessage,
    EndReason,
};
use crate::error::{ConvoiceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// State shared between a session's tasks and its handles.
pub(crate) struct SessionShared {
    pub(crate) config: ConversationConfig,
    pub(crate) state: SessionState,
    pub(crate) token: CancellationToken,
}

impl SessionShared {
    /// Ends the session with `reason` unless another reason already won.
    pub(crate) fn cancel(&self, reason: EndReason) {
        self.state.set_end_reason(reason);
        self.token.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TurnOrigin {
    /// Typed by the transport user.
    Typed,
    /// Recognized from the session's own audio and already recorded.
    Transcript,
}

#[derive(Debug, Clone)]
pub(crate) struct TextTurn {
    pub(crate) text: String,
    pub(crate) origin: TurnOrigin,
}

/// Receiving ends of a session's outbound channels.
///
/// Each receiver yields `None` once the session has torn down and its buffer
/// is drained.
#[derive(Debug)]
pub struct SessionOutputs {
    /// Synthesized reply audio.
    pub audio: mpsc::Receiver<AudioChunk>,
    /// Assistant reply text.
    pub text: mpsc::Receiver<String>,
    pub events: mpsc::Receiver<ConversationEvent>,
}

/// Point-in-time copy of a session for transports and persistence layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub config: ConversationConfig,
    pub status: ConversationStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub end_reason: Option<EndReason>,
    pub muted: bool,
    pub messages: Vec<ConversationMessage>,
}

/// Cloneable handle to one conversation.
///
/// Sending never touches the session's tasks directly: inbound data goes
/// through bounded channels that reject sends once the session has ended.
#[derive(Clone)]
pub struct SessionHandle {
    pub(crate) shared: Arc<SessionShared>,
    audio_tx: mpsc::Sender<AudioChunk>,
    text_tx: mpsc::Sender<TextTurn>,
    pub(crate) control_tx: mpsc::Sender<ConversationControl>,
    outputs: Arc<Mutex<Option<SessionOutputs>>>,
}

impl SessionHandle {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        audio_tx: mpsc::Sender<AudioChunk>,
        text_tx: mpsc::Sender<TextTurn>,
        control_tx: mpsc::Sender<ConversationControl>,
        outputs: SessionOutputs,
    ) -> Self {
        Self {
            shared,
            audio_tx,
            text_tx,
            control_tx,
            outputs: Arc::new(Mutex::new(Some(outputs))),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.config.id
    }

    /// The resolved configuration the session runs with.
    pub fn config(&self) -> &ConversationConfig {
        &self.shared.config
    }

    pub fn status(&self) -> ConversationStatus {
        self.shared.state.status()
    }

    pub fn is_ended(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn is_muted(&self) -> bool {
        self.shared.state.is_muted()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.shared.state.start_time()
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.shared.state.end_time()
    }

    /// Total duration, known once the session has torn down.
    pub fn duration(&self) -> Option<Duration> {
        self.shared.state.duration()
    }

    /// Time since the session started.
    pub fn elapsed(&self) -> Duration {
        self.shared.state.elapsed()
    }

    pub fn end_reason(&self) -> Option<EndReason> {
        self.shared.state.end_reason()
    }

    /// Copy of the message log.
    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.shared.state.messages()
    }

    pub fn message_count(&self) -> usize {
        self.shared.state.message_count()
    }

    pub async fn send_audio(&self, chunk: AudioChunk) -> Result<()> {
        self.audio_tx
            .send(chunk)
            .await
            .map_err(|_| self.closed_error())
    }

    pub fn try_send_audio(&self, chunk: AudioChunk) -> Result<()> {
        self.audio_tx
            .try_send(chunk)
            .map_err(|e| self.try_send_error(e, "audio"))
    }

    /// Submits a typed user turn.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        let turn = TextTurn {
            text: text.into(),
            origin: TurnOrigin::Typed,
        };
        self.text_tx
            .send(turn)
            .await
            .map_err(|_| self.closed_error())
    }

    pub async fn send_control(&self, action: ControlAction) -> Result<()> {
        self.control_tx
            .send(ConversationControl::new(action))
            .await
            .map_err(|_| self.closed_error())
    }

    pub fn try_send_control(&self, action: ControlAction) -> Result<()> {
        self.control_tx
            .try_send(ConversationControl::new(action))
            .map_err(|e| self.try_send_error(e, "control"))
    }

    /// Takes the outbound receivers. Only the first call gets them.
    pub fn take_outputs(&self) -> Option<SessionOutputs> {
        self.outputs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = &self.shared.state;
        SessionSnapshot {
            id: self.id().to_string(),
            config: self.shared.config.clone(),
            status: state.status(),
            start_time: state.start_time(),
            end_time: state.end_time(),
            duration_ms: state.duration().map(|d| d.as_millis() as u64),
            end_reason: state.end_reason(),
            muted: state.is_muted(),
            messages: state.messages(),
        }
    }

    /// Whether `other` refers to the same running session.
    pub(crate) fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn closed_error(&self) -> ConvoiceError {
        ConvoiceError::SessionClosed {
            id: self.id().to_string(),
        }
    }

    fn try_send_error<T>(&self, error: TrySendError<T>, channel: &'static str) -> ConvoiceError {
        match error {
            TrySendError::Full(_) => ConvoiceError::ChannelFull {
                id: self.id().to_string(),
                channel,
            },
            TrySendError::Closed(_) => self.closed_error(),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}
