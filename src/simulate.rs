//! Simulated conversation driven from a WAV file.
//!
//! Composition root for `convoice simulate`: builds a registry over mock
//! providers, streams the clip into one session, and reports every event the
//! session emits until the expected replies have arrived.

use crate::audio::{AudioSegmenter, WavClip};
use crate::config::Config;
use crate::conversation::{
    AudioChunk, ConversationConfig, ConversationEvent, EndReason, EventKind, RegistryConfig,
    SessionRegistry,
};
use crate::output::{render_event, render_event_json};
use crate::providers::ProviderGateway;
use crate::providers::mock::{MockLanguageProcessor, MockSpeechToText, MockTextToSpeech};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How events are written while the simulation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutput {
    Human,
    Json,
    Silent,
}

/// Options for one simulated conversation.
#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub wav: PathBuf,
    pub chunk_ms: u32,
    pub transcript: String,
    pub reply: Option<String>,
    pub language: Option<String>,
    pub realtime: bool,
    pub output: EventOutput,
    pub timeout: Duration,
}

/// What happened during a simulated conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationSummary {
    pub conversation_id: String,
    pub chunks_sent: usize,
    pub segments: usize,
    pub replies: Vec<String>,
    pub reply_audio_bytes: usize,
    pub errors: Vec<String>,
    pub end_reason: Option<EndReason>,
    pub message_count: usize,
    pub timed_out: bool,
}

/// Number of non-empty segments a session will cut from `chunks`.
fn expected_segments(chunks: &[AudioChunk], config: &RegistryConfig) -> usize {
    let mut segmenter = AudioSegmenter::with_config(config.session.segmenter);
    chunks
        .iter()
        .filter_map(|chunk| segmenter.push(chunk.clone()))
        .filter(|segment| !segment.is_empty())
        .count()
}

fn providers_for(options: &SimulateOptions) -> ProviderGateway {
    let gateway = ProviderGateway::new(
        Arc::new(MockSpeechToText::new().with_response(&options.transcript)),
        Arc::new(MockTextToSpeech::new()),
    );
    match &options.reply {
        Some(reply) => gateway
            .with_language_processor(Arc::new(MockLanguageProcessor::new().with_response(reply))),
        None => gateway,
    }
}

fn conversation_config(registry: &RegistryConfig, options: &SimulateOptions) -> ConversationConfig {
    ConversationConfig {
        language: options.language.clone().unwrap_or_default(),
        user_id: "simulator".to_string(),
        ..registry.defaults.config()
    }
}

fn report(output: EventOutput, event: &ConversationEvent, started: Instant) -> Result<()> {
    match output {
        EventOutput::Human => {
            render_event(event, started.elapsed().as_millis() as u64);
            Ok(())
        }
        EventOutput::Json => render_event_json(event).context("Failed to write event"),
        EventOutput::Silent => Ok(()),
    }
}

fn stop(registry: &SessionRegistry, id: &str) {
    // The session may already have ended on its own and been deregistered.
    if let Err(e) = registry.stop_session(id) {
        debug!("Stop skipped: {}", e);
    }
}

/// Runs one conversation over the given WAV file and returns a summary.
///
/// Must be called from within a Tokio runtime.
pub async fn run_simulation(config: &Config, options: SimulateOptions) -> Result<SimulationSummary> {
    let clip = WavClip::open(&options.wav)?;
    let clip_ms = clip.duration_ms();
    let chunks = clip.into_chunks(options.chunk_ms);

    let registry_config = RegistryConfig::from_config(config);
    let segments = expected_segments(&chunks, &registry_config);
    let expected_replies = if config.conversation.auto_response
        && !options.transcript.trim().is_empty()
    {
        segments
    } else {
        0
    };
    info!(
        "Simulating {}ms of audio as {} chunks ({} segments)",
        clip_ms,
        chunks.len(),
        segments
    );

    let conversation = conversation_config(&registry_config, &options);
    let registry = SessionRegistry::new(registry_config, providers_for(&options));
    let session = registry.start_session(conversation)?;
    let mut outputs = session
        .take_outputs()
        .context("Session outputs already taken")?;
    let started = Instant::now();

    let chunks_sent = chunks.len();
    let pace = Duration::from_millis(options.chunk_ms as u64);
    let sender = session.clone();
    let realtime = options.realtime;
    let mut feeder = tokio::spawn(async move {
        for chunk in chunks {
            if let Err(e) = sender.send_audio(chunk).await {
                warn!("Stopped feeding audio: {}", e);
                break;
            }
            if realtime {
                tokio::time::sleep(pace).await;
            }
        }
    });

    let mut summary = SimulationSummary {
        conversation_id: session.id().to_string(),
        chunks_sent,
        segments,
        replies: Vec::new(),
        reply_audio_bytes: 0,
        errors: Vec::new(),
        end_reason: None,
        message_count: 0,
        timed_out: false,
    };

    let expected_transcripts = if options.transcript.trim().is_empty() {
        0
    } else {
        segments
    };
    let deadline = tokio::time::sleep(options.timeout);
    tokio::pin!(deadline);
    let mut transcripts = 0;
    let mut turns_done = 0;
    let mut fed = false;
    let mut stopping = false;
    let mut audio_open = true;
    let mut text_open = true;

    loop {
        if !stopping
            && fed
            && transcripts >= expected_transcripts
            && turns_done >= expected_replies
        {
            debug!("All expected turns finished, stopping conversation");
            stop(&registry, session.id());
            stopping = true;
        }

        tokio::select! {
            event = outputs.events.recv() => {
                let Some(event) = event else { break };
                report(options.output, &event, started)?;
                match &event.kind {
                    EventKind::TextReceived { .. } => transcripts += 1,
                    EventKind::ResponseEnd { .. } => turns_done += 1,
                    EventKind::Error { message } => summary.errors.push(message.clone()),
                    EventKind::ConversationEnded { reason, message_count, .. } => {
                        summary.end_reason = Some(*reason);
                        summary.message_count = *message_count;
                    }
                    _ => {}
                }
            }
            joined = &mut feeder, if !fed => {
                if let Err(e) = joined {
                    warn!("Audio feeder failed: {}", e);
                }
                fed = true;
            }
            reply = outputs.text.recv(), if text_open => match reply {
                Some(reply) => summary.replies.push(reply),
                None => text_open = false,
            },
            audio = outputs.audio.recv(), if audio_open => match audio {
                Some(chunk) => summary.reply_audio_bytes += chunk.data.len(),
                None => audio_open = false,
            },
            _ = &mut deadline, if !stopping => {
                warn!(
                    "Timed out after {:?} with {}/{} replies",
                    options.timeout, turns_done, expected_replies
                );
                summary.timed_out = true;
                if !fed {
                    feeder.abort();
                }
                stop(&registry, session.id());
                stopping = true;
            }
        }
    }

    // Events close last; anything still buffered on the other outputs is drained here.
    while let Some(reply) = outputs.text.recv().await {
        summary.replies.push(reply);
    }
    while let Some(chunk) = outputs.audio.recv().await {
        summary.reply_audio_bytes += chunk.data.len();
    }

    registry.shutdown();
    Ok(summary)
}
