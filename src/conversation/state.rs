//! Shared per-session state.
//!
//! Written by the session's own tasks and read through [`SessionHandle`]
//! clones. Status changes go through a compare-and-swap loop so that only
//! edges of the conversation state graph are ever observed.
//!
//! [`SessionHandle`]: crate::conversation::SessionHandle

use crate::conversation::types::{ConversationMessage, EndReason};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;

/// Conversation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ConversationStatus {
    Idle = 0,
    Listening = 1,
    Processing = 2,
    Speaking = 3,
    Paused = 4,
    Ended = 5,
    Error = 6,
}

impl ConversationStatus {
    /// Whether `self -> next` is an edge of the state graph.
    pub fn can_transition_to(self, next: ConversationStatus) -> bool {
        use ConversationStatus::*;
        match self {
            Idle => matches!(next, Listening | Processing | Paused | Error | Ended),
            Listening => matches!(next, Listening | Processing | Paused | Error | Ended),
            Processing => matches!(
                next,
                Processing | Speaking | Listening | Paused | Error | Ended
            ),
            Speaking => matches!(next, Listening | Processing | Paused | Error | Ended),
            Paused => matches!(next, Listening | Error | Ended),
            Error => next == Ended,
            Ended => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ConversationStatus::Ended
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConversationStatus::Idle => "idle",
            ConversationStatus::Listening => "listening",
            ConversationStatus::Processing => "processing",
            ConversationStatus::Speaking => "speaking",
            ConversationStatus::Paused => "paused",
            ConversationStatus::Ended => "ended",
            ConversationStatus::Error => "error",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConversationStatus::Idle,
            1 => ConversationStatus::Listening,
            2 => ConversationStatus::Processing,
            3 => ConversationStatus::Speaking,
            4 => ConversationStatus::Paused,
            5 => ConversationStatus::Ended,
            _ => ConversationStatus::Error,
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change: the status the session actually had.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: ConversationStatus,
    pub to: ConversationStatus,
}

pub(crate) struct SessionState {
    status: AtomicU8,
    start_time: DateTime<Utc>,
    started_at: Instant,
    end_time: OnceLock<DateTime<Utc>>,
    duration: OnceLock<Duration>,
    end_reason: OnceLock<EndReason>,
    messages: RwLock<Vec<ConversationMessage>>,
    muted: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl SessionState {
    pub(crate) fn new() -> Self {
        let now = Instant::now();
        Self {
            status: AtomicU8::new(ConversationStatus::Idle as u8),
            start_time: Utc::now(),
            started_at: now,
            end_time: OnceLock::new(),
            duration: OnceLock::new(),
            end_reason: OnceLock::new(),
            messages: RwLock::new(Vec::new()),
            muted: AtomicBool::new(false),
            last_activity: Mutex::new(now),
        }
    }

    pub(crate) fn status(&self) -> ConversationStatus {
        ConversationStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Moves to `next` if the current status allows it.
    ///
    /// Returns the previous status on success.
    pub(crate) fn transition(
        &self,
        next: ConversationStatus,
    ) -> std::result::Result<ConversationStatus, InvalidTransition> {
        self.transition_when(next, |_| true)
    }

    /// Like [`transition`](Self::transition), but only from statuses accepted
    /// by `from_filter`.
    pub(crate) fn transition_when(
        &self,
        next: ConversationStatus,
        from_filter: impl Fn(ConversationStatus) -> bool,
    ) -> std::result::Result<ConversationStatus, InvalidTransition> {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            let from = ConversationStatus::from_u8(current);
            if !from_filter(from) || !from.can_transition_to(next) {
                return Err(InvalidTransition { from, to: next });
            }
            match self.status.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }

    /// Records why the session ends. The first caller wins.
    pub(crate) fn set_end_reason(&self, reason: EndReason) -> bool {
        self.end_reason.set(reason).is_ok()
    }

    pub(crate) fn end_reason(&self) -> Option<EndReason> {
        self.end_reason.get().copied()
    }

    /// Stamps end time and duration. Later calls are no-ops.
    pub(crate) fn finish(&self) -> Duration {
        let elapsed = self.elapsed();
        self.end_time.get_or_init(Utc::now);
        *self.duration.get_or_init(|| elapsed)
    }

    pub(crate) fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub(crate) fn end_time(&self) -> Option<DateTime<Utc>> {
        self.end_time.get().copied()
    }

    pub(crate) fn duration(&self) -> Option<Duration> {
        self.duration.get().copied()
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn push_message(&self, message: ConversationMessage) {
        self.messages
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message);
    }

    pub(crate) fn messages(&self) -> Vec<ConversationMessage> {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn message_count(&self) -> usize {
        self.messages
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub(crate) fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub(crate) fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
    }
}
