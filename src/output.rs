//! Event rendering for terminal output.
//! Used by `convoice simulate`.

use crate::conversation::{ConversationEvent, EventKind};
use owo_colors::OwoColorize;
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Dim,
    Lifecycle,
    Good,
    Notice,
    Bad,
}

/// One-line plain description of an event.
pub fn describe_event(kind: &EventKind) -> String {
    match kind {
        EventKind::ConversationStarted { language, voice } => {
            format!("conversation started [{language}, voice {voice}]")
        }
        EventKind::ConversationEnded {
            reason,
            duration_ms,
            message_count,
        } => {
            let reason = serde_json::to_value(reason)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{:?}", reason));
            format!(
                "conversation ended ({reason}) after {:.1}s, {message_count} messages",
                *duration_ms as f64 / 1000.0
            )
        }
        EventKind::SpeechStart => "speech started".to_string(),
        EventKind::SpeechEnd { bytes } => format!("speech ended ({bytes} bytes)"),
        EventKind::TextReceived { text, confidence } => {
            format!("user: {text} ({:.0}%)", confidence * 100.0)
        }
        EventKind::ResponseStart { input_text } => format!("responding to: {input_text}"),
        EventKind::ResponseEnd {
            response_text,
            audio_duration_ms,
        } => format!("assistant: {response_text} ({audio_duration_ms}ms audio)"),
        EventKind::Error { message } => format!("error: {message}"),
        EventKind::StatusChange { action, status } => {
            let action = serde_json::to_value(action)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{:?}", action));
            format!("{action} -> {status}")
        }
    }
}

fn tone_for(kind: &EventKind) -> Tone {
    match kind {
        EventKind::ConversationStarted { .. } | EventKind::ConversationEnded { .. } => {
            Tone::Lifecycle
        }
        EventKind::TextReceived { .. } | EventKind::ResponseEnd { .. } => Tone::Good,
        EventKind::StatusChange { .. } => Tone::Notice,
        EventKind::Error { .. } => Tone::Bad,
        _ => Tone::Dim,
    }
}

fn paint(text: &str, tone: Tone) -> String {
    match tone {
        Tone::Dim => text.dimmed().to_string(),
        Tone::Lifecycle => text.cyan().to_string(),
        Tone::Good => text.green().to_string(),
        Tone::Notice => text.yellow().to_string(),
        Tone::Bad => text.red().to_string(),
    }
}

/// Render an event to stderr with colors and a relative timestamp.
pub fn render_event(event: &ConversationEvent, elapsed_ms: u64) {
    let stamp = format!("{:>7.3}s", elapsed_ms as f64 / 1000.0);
    eprintln!(
        "{} {}",
        stamp.dimmed(),
        paint(&describe_event(&event.kind), tone_for(&event.kind))
    );
}

/// Write an event as one JSON line to stdout.
pub fn render_event_json(event: &ConversationEvent) -> io::Result<()> {
    let line = serde_json::to_string(event).map_err(io::Error::other)?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()
}
