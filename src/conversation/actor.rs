//! Session actor: the tasks that drive one conversation.
//!
//! ```text
//!  audio_in ──▶ audio loop ──(VAD, segmenter, STT)──┐
//!                                                   ▼
//!  text_in ───────────────────────────────────▶ text loop ──(NLP, TTS)──▶ text_out, audio_out
//!  control_in ─▶ control loop
//!               silence watchdog
//! ```
//!
//! A driver task owns the four loops. It enforces the maximum duration,
//! contains task panics and performs teardown exactly once after every loop
//! has exited.

use crate::audio::{AudioSegmenter, Segment, SegmenterConfig, VadConfig, detect_voice_activity};
use crate::conversation::events::{EventEmitter, EventKind};
use crate::conversation::handle::{
    SessionHandle, SessionOutputs, SessionShared, TextTurn, TurnOrigin,
};
use crate::conversation::state::{ConversationStatus, SessionState};
use crate::conversation::types::{
    AudioChunk, ControlAction, ConversationConfig, ConversationControl, ConversationMessage,
    EndReason, MessageMetadata,
};
use crate::defaults;
use crate::providers::{ProviderGateway, SpeechRequest, VoiceParams, canned_response};
use std::future::Future;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

/// Bounded channel capacities for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCapacities {
    pub audio: usize,
    pub text: usize,
    pub control: usize,
    pub event: usize,
}

impl Default for ChannelCapacities {
    fn default() -> Self {
        Self {
            audio: defaults::AUDIO_BUFFER,
            text: defaults::TEXT_BUFFER,
            control: defaults::CONTROL_BUFFER,
            event: defaults::EVENT_BUFFER,
        }
    }
}

/// Per-session tunables shared by every session of a registry.
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub segmenter: SegmenterConfig,
    pub vad: VadConfig,
    pub channels: ChannelCapacities,
    /// Silence watchdog period. Zero falls back to one second.
    pub watchdog_tick: Duration,
}

/// Called once after teardown so the owner can forget the session.
pub(crate) type OnExit = Box<dyn FnOnce(&Arc<SessionShared>) + Send + 'static>;

/// A session that has been built but not yet started.
pub(crate) struct SessionActor {
    ctx: SessionContext,
    settings: SessionSettings,
    audio_rx: mpsc::Receiver<AudioChunk>,
    text_rx: mpsc::Receiver<TextTurn>,
    control_rx: mpsc::Receiver<ConversationControl>,
    text_loopback: mpsc::Sender<TextTurn>,
}

/// Everything a loop needs, cloned into each task.
///
/// Holds the outbound senders; the channels close when the last clone drops.
#[derive(Clone)]
struct SessionContext {
    shared: Arc<SessionShared>,
    providers: ProviderGateway,
    events: EventEmitter,
    audio_out: mpsc::Sender<AudioChunk>,
    text_out: mpsc::Sender<String>,
}

/// What a loop hands back when it exits.
enum LoopExit {
    Audio(mpsc::Receiver<AudioChunk>),
    Text(mpsc::Receiver<TextTurn>),
    Control(mpsc::Receiver<ConversationControl>),
    Watchdog,
}

impl LoopExit {
    fn close_inbound(self) {
        match self {
            LoopExit::Audio(mut rx) => rx.close(),
            LoopExit::Text(mut rx) => rx.close(),
            LoopExit::Control(mut rx) => rx.close(),
            LoopExit::Watchdog => {}
        }
    }
}

impl SessionActor {
    /// Wires the six channels for a resolved config.
    ///
    /// The session token is a child of `parent`, so cancelling the parent
    /// ends the session.
    pub(crate) fn new(
        config: ConversationConfig,
        settings: SessionSettings,
        providers: ProviderGateway,
        parent: &CancellationToken,
    ) -> (Self, SessionHandle) {
        let caps = settings.channels;
        let (audio_tx, audio_rx) = mpsc::channel(caps.audio.max(1));
        let (text_tx, text_rx) = mpsc::channel(caps.text.max(1));
        let (control_tx, control_rx) = mpsc::channel(caps.control.max(1));
        let (audio_out, audio_out_rx) = mpsc::channel(caps.audio.max(1));
        let (text_out, text_out_rx) = mpsc::channel(caps.text.max(1));
        let (event_tx, event_rx) = mpsc::channel(caps.event.max(1));

        let shared = Arc::new(SessionShared {
            config,
            state: SessionState::new(),
            token: parent.child_token(),
        });
        let events = EventEmitter::new(shared.config.id.clone(), event_tx);

        let handle = SessionHandle::new(
            Arc::clone(&shared),
            audio_tx,
            text_tx.clone(),
            control_tx,
            SessionOutputs {
                audio: audio_out_rx,
                text: text_out_rx,
                events: event_rx,
            },
        );

        let actor = Self {
            ctx: SessionContext {
                shared,
                providers,
                events,
                audio_out,
                text_out,
            },
            settings,
            audio_rx,
            text_rx,
            control_rx,
            text_loopback: text_tx,
        };
        (actor, handle)
    }

    /// Spawns the driver task. `on_exit` runs after teardown.
    pub(crate) fn spawn(self, on_exit: OnExit) -> tokio::task::JoinHandle<()> {
        let span = info_span!("conversation", id = %self.ctx.shared.config.id);
        tokio::spawn(self.drive(on_exit).instrument(span))
    }

    async fn drive(self, on_exit: OnExit) {
        let SessionActor {
            ctx,
            settings,
            audio_rx,
            text_rx,
            control_rx,
            text_loopback,
        } = self;
        let shared = Arc::clone(&ctx.shared);
        let config = &shared.config;

        ctx.events.emit(EventKind::ConversationStarted {
            language: config.language.clone(),
            voice: config.voice.clone(),
        });
        info!(
            language = %config.language,
            voice = %config.voice,
            max_duration = ?config.max_duration,
            "Conversation started"
        );

        let tick = if settings.watchdog_tick.is_zero() {
            defaults::WATCHDOG_TICK
        } else {
            settings.watchdog_tick
        };

        let mut tasks = JoinSet::new();
        tasks.spawn(
            audio_loop(ctx.clone(), audio_rx, text_loopback, settings.segmenter, settings.vad)
                .in_current_span(),
        );
        tasks.spawn(text_loop(ctx.clone(), text_rx).in_current_span());
        tasks.spawn(control_loop(ctx.clone(), control_rx).in_current_span());
        tasks.spawn(silence_watchdog(ctx.clone(), tick).in_current_span());

        let deadline = tokio::time::sleep(config.max_duration);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline, if !shared.token.is_cancelled() => {
                    info!("Maximum duration reached");
                    shared.cancel(EndReason::MaxDuration);
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(exit)) => exit.close_inbound(),
                    Some(Err(e)) => {
                        error!("Session task failed: {}", e);
                        ctx.events.emit(EventKind::Error {
                            message: format!("session task failed: {}", e),
                        });
                        ctx.set_status(ConversationStatus::Error);
                        shared.cancel(EndReason::Failed);
                    }
                },
            }
        }

        teardown(ctx, &shared);
        on_exit(&shared);
    }
}

/// Final bookkeeping once every loop has exited.
fn teardown(ctx: SessionContext, shared: &Arc<SessionShared>) {
    let state = &shared.state;
    state.set_end_reason(EndReason::Shutdown);
    let reason = state.end_reason().unwrap_or(EndReason::Shutdown);

    ctx.set_status(ConversationStatus::Ended);
    let duration = state.finish();
    let message_count = state.message_count();

    ctx.events.emit(EventKind::ConversationEnded {
        reason,
        duration_ms: duration.as_millis() as u64,
        message_count,
    });
    info!(
        reason = ?reason,
        duration_ms = duration.as_millis() as u64,
        message_count,
        "Conversation ended"
    );
    // Last sender clones: outbound receivers see the end of their streams.
    drop(ctx);
}

impl SessionContext {
    fn config(&self) -> &ConversationConfig {
        &self.shared.config
    }

    fn state(&self) -> &SessionState {
        &self.shared.state
    }

    fn set_status(&self, next: ConversationStatus) -> bool {
        match self.state().transition(next) {
            Ok(_) => true,
            Err(rejected) => {
                debug!(from = %rejected.from, to = %rejected.to, "Status change rejected");
                false
            }
        }
    }

    /// Back to listening after a turn, unless paused or ended meanwhile.
    fn settle_listening(&self) {
        let result = self.state().transition_when(ConversationStatus::Listening, |s| {
            matches!(s, ConversationStatus::Processing | ConversationStatus::Speaking)
        });
        if let Err(rejected) = result {
            debug!(from = %rejected.from, "Not returning to listening");
        }
    }

    /// Runs `fut` unless the session is cancelled first.
    async fn race<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.shared.token.cancelled() => None,
            out = fut => Some(out),
        }
    }

    fn report_provider_error(&self, error: &crate::error::ConvoiceError) {
        warn!("{}", error);
        self.events.emit(EventKind::Error {
            message: error.to_string(),
        });
    }
}

async fn audio_loop(
    ctx: SessionContext,
    mut rx: mpsc::Receiver<AudioChunk>,
    loopback: mpsc::Sender<TextTurn>,
    segmenter_config: SegmenterConfig,
    vad: VadConfig,
) -> LoopExit {
    let mut segmenter = AudioSegmenter::with_config(segmenter_config);
    let mut in_speech = false;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = ctx.shared.token.cancelled() => break,
            chunk = rx.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        ctx.state().touch();
        if ctx.state().is_muted() {
            trace!(sequence = chunk.sequence, "Muted, dropping audio chunk");
            continue;
        }

        // Speech is only picked up between turns.
        let between_turns = matches!(
            ctx.state().status(),
            ConversationStatus::Idle | ConversationStatus::Listening
        );
        if ctx.config().enable_vad
            && !in_speech
            && between_turns
            && detect_voice_activity(&chunk.data, &vad)
        {
            in_speech = true;
            ctx.events.emit(EventKind::SpeechStart);
            if ctx
                .state()
                .transition_when(ConversationStatus::Listening, |s| {
                    s == ConversationStatus::Idle
                })
                .is_ok()
            {
                debug!("Listening");
            }
        }

        let Some(segment) = segmenter.push(chunk) else {
            continue;
        };

        if in_speech {
            in_speech = false;
            ctx.events.emit(EventKind::SpeechEnd {
                bytes: segment.len(),
            });
        }

        if segment.is_empty() {
            continue;
        }
        if ctx.state().status() == ConversationStatus::Paused {
            debug!(bytes = segment.len(), "Paused, discarding segment");
            continue;
        }

        if transcribe_segment(&ctx, segment, &loopback).await.is_break() {
            break;
        }
    }

    LoopExit::Audio(rx)
}

async fn transcribe_segment(
    ctx: &SessionContext,
    segment: Segment,
    loopback: &mpsc::Sender<TextTurn>,
) -> ControlFlow<()> {
    let config = ctx.config();
    if !ctx.set_status(ConversationStatus::Processing) {
        return ControlFlow::Continue(());
    }

    let request = SpeechRequest {
        conversation_id: config.id.clone(),
        audio: segment.data,
        language: config.language.clone(),
        user_id: config.user_id.clone(),
        session_id: config.session_id.clone(),
    };
    let Some(result) = ctx.race(ctx.providers.stt.transcribe(&request)).await else {
        return ControlFlow::Break(());
    };

    let transcript = match result {
        Ok(transcript) => transcript,
        Err(e) => {
            ctx.report_provider_error(&e);
            ctx.settle_listening();
            return ControlFlow::Continue(());
        }
    };

    let text = transcript.text.trim();
    if text.is_empty() {
        debug!("Empty transcript, skipping utterance");
        ctx.settle_listening();
        return ControlFlow::Continue(());
    }

    ctx.state().push_message(ConversationMessage::user(
        text,
        MessageMetadata {
            confidence: Some(transcript.confidence),
            language: Some(transcript.language.clone()),
        },
    ));
    ctx.events.emit(EventKind::TextReceived {
        text: text.to_string(),
        confidence: transcript.confidence,
    });
    debug!(confidence = transcript.confidence, "Transcribed: {}", text);

    if !config.auto_response {
        ctx.settle_listening();
        return ControlFlow::Continue(());
    }

    let turn = TextTurn {
        text: text.to_string(),
        origin: TurnOrigin::Transcript,
    };
    match ctx.race(loopback.send(turn)).await {
        None => ControlFlow::Break(()),
        Some(Ok(())) => ControlFlow::Continue(()),
        Some(Err(_)) => {
            debug!("Text loop gone, transcript not answered");
            ControlFlow::Break(())
        }
    }
}

async fn text_loop(ctx: SessionContext, mut rx: mpsc::Receiver<TextTurn>) -> LoopExit {
    let mut out_sequence = 0u64;

    loop {
        let turn = tokio::select! {
            biased;
            _ = ctx.shared.token.cancelled() => break,
            turn = rx.recv() => match turn {
                Some(turn) => turn,
                None => break,
            },
        };

        if ctx.state().status() == ConversationStatus::Paused {
            debug!("Paused, discarding text turn");
            continue;
        }

        if turn.origin == TurnOrigin::Typed {
            ctx.state().push_message(ConversationMessage::user(
                turn.text.as_str(),
                MessageMetadata {
                    confidence: None,
                    language: Some(ctx.config().language.clone()),
                },
            ));
        }

        if respond(&ctx, turn.text, &mut out_sequence).await.is_break() {
            break;
        }
    }

    LoopExit::Text(rx)
}

async fn respond(ctx: &SessionContext, input: String, out_sequence: &mut u64) -> ControlFlow<()> {
    let config = ctx.config();
    if !ctx.set_status(ConversationStatus::Processing) {
        return ControlFlow::Continue(());
    }
    ctx.events.emit(EventKind::ResponseStart {
        input_text: input.clone(),
    });

    let reply = match ctx.providers.nlp.as_ref().filter(|_| config.enable_nlp) {
        Some(nlp) => match ctx.race(nlp.process_text(&input, &config.user_id)).await {
            None => return ControlFlow::Break(()),
            Some(Ok(reply)) => reply,
            Some(Err(e)) => {
                ctx.report_provider_error(&e);
                ctx.settle_listening();
                return ControlFlow::Continue(());
            }
        },
        None => canned_response(&input),
    };

    ctx.state()
        .push_message(ConversationMessage::assistant(reply.as_str()));
    match ctx.race(ctx.text_out.send(reply.clone())).await {
        None => return ControlFlow::Break(()),
        Some(Err(_)) => trace!("No text consumer"),
        Some(Ok(())) => {}
    }

    let params = VoiceParams {
        language: config.language.clone(),
        voice: config.voice.clone(),
        user_id: config.user_id.clone(),
        session_id: config.session_id.clone(),
    };
    let audio = match ctx.race(ctx.providers.tts.synthesize(&reply, &params)).await {
        None => return ControlFlow::Break(()),
        Some(Ok(audio)) => audio,
        Some(Err(e)) => {
            ctx.report_provider_error(&e);
            ctx.settle_listening();
            return ControlFlow::Continue(());
        }
    };

    ctx.set_status(ConversationStatus::Speaking);
    *out_sequence += 1;
    let audio_duration_ms = audio.duration.as_millis() as u64;
    let chunk = AudioChunk::new(audio.data, *out_sequence, true);
    match ctx.race(ctx.audio_out.send(chunk)).await {
        None => return ControlFlow::Break(()),
        Some(Err(_)) => trace!("No audio consumer"),
        Some(Ok(())) => {}
    }

    ctx.events.emit(EventKind::ResponseEnd {
        response_text: reply,
        audio_duration_ms,
    });
    ctx.settle_listening();
    ControlFlow::Continue(())
}

async fn control_loop(
    ctx: SessionContext,
    mut rx: mpsc::Receiver<ConversationControl>,
) -> LoopExit {
    loop {
        let control = tokio::select! {
            biased;
            _ = ctx.shared.token.cancelled() => break,
            control = rx.recv() => match control {
                Some(control) => control,
                None => break,
            },
        };

        let action = control.action;
        match action {
            ControlAction::Start => {
                ctx.set_status(ConversationStatus::Listening);
            }
            ControlAction::Pause => {
                ctx.set_status(ConversationStatus::Paused);
            }
            ControlAction::Resume => {
                if ctx
                    .state()
                    .transition_when(ConversationStatus::Listening, |s| {
                        s == ConversationStatus::Paused
                    })
                    .is_err()
                {
                    debug!("Resume ignored, not paused");
                }
            }
            ControlAction::Stop => {
                ctx.set_status(ConversationStatus::Ended);
            }
            ControlAction::Mute => ctx.state().set_muted(true),
            ControlAction::Unmute => ctx.state().set_muted(false),
        }

        let status = ctx.state().status();
        info!(action = ?action, status = %status, "Control command");
        ctx.events.emit(EventKind::StatusChange { action, status });

        if action == ControlAction::Stop {
            ctx.shared.cancel(EndReason::Stopped);
            break;
        }
    }

    LoopExit::Control(rx)
}

async fn silence_watchdog(ctx: SessionContext, tick: Duration) -> LoopExit {
    let timeout = ctx.config().silence_timeout;
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = ctx.shared.token.cancelled() => break,
            _ = ticker.tick() => {
                let idle = ctx.state().idle_for();
                if idle >= timeout {
                    info!(idle_ms = idle.as_millis() as u64, "Silence timeout");
                    ctx.shared.cancel(EndReason::SilenceTimeout);
                    break;
                }
            }
        }
    }

    LoopExit::Watchdog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::events::ConversationEvent;
    use crate::conversation::types::ConversationDefaults;
    use crate::error::Result;
    use crate::providers::{
        MockLanguageProcessor, MockSpeechToText, MockTextToSpeech, SpeechToText, Transcript,
    };
    use std::sync::Mutex;

    fn config(silence: Duration) -> ConversationConfig {
        ConversationConfig {
            id: "test-session".to_string(),
            language: "en".to_string(),
            silence_timeout: silence,
            ..Default::default()
        }
        .resolve(&ConversationDefaults::default())
    }

    fn small_settings() -> SessionSettings {
        SessionSettings {
            segmenter: SegmenterConfig { flush_bytes: 64 },
            ..Default::default()
        }
    }

    fn start(
        config: ConversationConfig,
        settings: SessionSettings,
        providers: ProviderGateway,
    ) -> (SessionHandle, SessionOutputs, CancellationToken) {
        let root = CancellationToken::new();
        let (actor, handle) = SessionActor::new(config, settings, providers, &root);
        let outputs = handle.take_outputs().unwrap();
        actor.spawn(Box::new(|_| {}));
        (handle, outputs, root)
    }

    async fn collect_events(rx: &mut mpsc::Receiver<ConversationEvent>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(event.kind);
        }
        kinds
    }

    /// Lets every session task run until it blocks. The paused clock only
    /// advances once the runtime is idle.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn loud(len: usize) -> Vec<u8> {
        std::iter::repeat_n(8000i16.to_le_bytes(), len / 2)
            .flatten()
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_session_and_closes_channels() {
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(60)), small_settings(), ProviderGateway::mock());

        handle.send_control(ControlAction::Stop).await.unwrap();
        let events = collect_events(&mut outputs.events).await;

        assert!(matches!(events.first(), Some(EventKind::ConversationStarted { .. })));
        assert!(events.contains(&EventKind::StatusChange {
            action: ControlAction::Stop,
            status: ConversationStatus::Ended,
        }));
        match events.last() {
            Some(EventKind::ConversationEnded { reason, .. }) => {
                assert_eq!(*reason, EndReason::Stopped)
            }
            other => panic!("Expected ConversationEnded last, got {:?}", other),
        }

        assert_eq!(handle.status(), ConversationStatus::Ended);
        assert!(handle.end_time().is_some());
        assert!(outputs.audio.recv().await.is_none());
        assert!(outputs.text.recv().await.is_none());
        assert!(handle.send_audio(AudioChunk::new(vec![0; 4], 1, false)).await.is_err());
        assert!(handle.send_text("late").await.is_err());
        assert!(handle.try_send_control(ControlAction::Start).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_timeout_ends_session() {
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(2)), small_settings(), ProviderGateway::mock());

        handle
            .send_audio(AudioChunk::new(vec![0; 100], 1, false))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let events = collect_events(&mut outputs.events).await;
        assert!(started.elapsed() <= Duration::from_secs(3));

        let ended: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, EventKind::ConversationEnded { .. }))
            .collect();
        assert_eq!(ended.len(), 1);
        assert_eq!(handle.end_reason(), Some(EndReason::SilenceTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_ends_session() {
        let mut config = config(Duration::from_secs(600));
        config.max_duration = Duration::from_secs(5);
        let (handle, mut outputs, _root) = start(config, small_settings(), ProviderGateway::mock());

        collect_events(&mut outputs.events).await;
        assert_eq!(handle.end_reason(), Some(EndReason::MaxDuration));
        assert!(handle.duration().unwrap() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_is_shutdown() {
        let (handle, mut outputs, root) =
            start(config(Duration::from_secs(60)), small_settings(), ProviderGateway::mock());

        root.cancel();
        collect_events(&mut outputs.events).await;
        assert_eq!(handle.end_reason(), Some(EndReason::Shutdown));
        assert_eq!(handle.status(), ConversationStatus::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_turn_produces_reply() {
        let providers = ProviderGateway::new(
            Arc::new(MockSpeechToText::new().with_response("what time is it")),
            Arc::new(MockTextToSpeech::new()),
        )
        .with_language_processor(Arc::new(MockLanguageProcessor::new().with_response("noon")));
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(60)), small_settings(), providers);

        handle.send_audio(AudioChunk::new(loud(40), 1, false)).await.unwrap();
        handle.send_audio(AudioChunk::new(loud(40), 2, true)).await.unwrap();

        assert_eq!(outputs.text.recv().await.unwrap(), "noon");
        let audio = outputs.audio.recv().await.unwrap();
        assert!(audio.is_last);
        assert!(!audio.data.is_empty());

        settle().await;
        handle.send_control(ControlAction::Stop).await.unwrap();
        let events: Vec<_> = collect_events(&mut outputs.events)
            .await
            .iter()
            .map(|e| e.name())
            .collect();
        let expected = [
            "conversation_started",
            "speech_start",
            "speech_end",
            "text_received",
            "response_start",
            "response_end",
        ];
        assert_eq!(&events[..expected.len()], &expected);
        assert_eq!(events.last(), Some(&"conversation_ended"));

        let messages = handle.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].content, "what time is it");
        assert_eq!(messages[0].metadata.confidence, Some(0.95));
        assert_eq!(messages[1].content, "noon");
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_text_recorded_and_answered_with_fallback() {
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(60)), small_settings(), ProviderGateway::mock());

        handle.send_text("abc").await.unwrap();
        assert_eq!(
            outputs.text.recv().await.unwrap(),
            canned_response("abc")
        );

        let messages = handle.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].speaker, "user");
        assert_eq!(messages[0].content, "abc");
        assert_eq!(messages[1].speaker, "assistant");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stt_failure_keeps_session_alive() {
        let providers = ProviderGateway::new(
            Arc::new(MockSpeechToText::new().with_failure()),
            Arc::new(MockTextToSpeech::new()),
        );
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(60)), small_settings(), providers);

        handle.send_audio(AudioChunk::new(vec![1; 10], 1, true)).await.unwrap();

        let mut saw_error = false;
        while let Some(event) = outputs.events.recv().await {
            if let EventKind::Error { message } = &event.kind {
                assert!(message.contains("speech-to-text"));
                saw_error = true;
                break;
            }
        }
        assert!(saw_error);
        assert!(!handle.is_ended());
        assert_eq!(handle.message_count(), 0);

        handle.send_text("still here").await.unwrap();
        assert!(outputs.text.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_discards_turns_and_mute_drops_audio() {
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(60)), small_settings(), ProviderGateway::mock());

        handle.send_control(ControlAction::Pause).await.unwrap();
        settle().await;
        handle.send_text("ignored").await.unwrap();
        settle().await;
        handle.send_control(ControlAction::Resume).await.unwrap();
        handle.send_control(ControlAction::Mute).await.unwrap();
        settle().await;
        handle.send_audio(AudioChunk::new(loud(10), 1, true)).await.unwrap();
        settle().await;
        handle.send_control(ControlAction::Unmute).await.unwrap();
        handle.send_control(ControlAction::Stop).await.unwrap();

        let events = collect_events(&mut outputs.events).await;
        let statuses: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EventKind::StatusChange { action, status } => Some((*action, *status)),
                _ => None,
            })
            .collect();
        assert_eq!(statuses[0], (ControlAction::Pause, ConversationStatus::Paused));
        assert_eq!(statuses[1], (ControlAction::Resume, ConversationStatus::Listening));
        assert!(!events.contains(&EventKind::SpeechStart));
        assert!(!events.iter().any(|e| matches!(e, EventKind::SpeechEnd { .. })));
        assert_eq!(handle.message_count(), 0);
        assert!(!handle.is_muted());
    }

    struct PanickingSpeechToText;

    #[async_trait::async_trait]
    impl SpeechToText for PanickingSpeechToText {
        async fn transcribe(&self, _request: &SpeechRequest) -> Result<Transcript> {
            panic!("recognizer crashed");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_panic_is_contained() {
        let providers = ProviderGateway::new(
            Arc::new(PanickingSpeechToText),
            Arc::new(MockTextToSpeech::new()),
        );
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(60)), small_settings(), providers);

        handle.send_audio(AudioChunk::new(vec![1; 10], 1, true)).await.unwrap();
        let events = collect_events(&mut outputs.events).await;

        assert!(events.iter().any(|e| matches!(e, EventKind::Error { .. })));
        assert!(matches!(
            events.last(),
            Some(EventKind::ConversationEnded {
                reason: EndReason::Failed,
                ..
            })
        ));
        assert_eq!(handle.status(), ConversationStatus::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn test_on_exit_runs_after_teardown() {
        let root = CancellationToken::new();
        let (actor, handle) = SessionActor::new(
            config(Duration::from_secs(60)),
            small_settings(),
            ProviderGateway::mock(),
            &root,
        );
        let seen = Arc::new(Mutex::new(None));
        let seen_in_exit = Arc::clone(&seen);
        let task = actor.spawn(Box::new(move |shared| {
            *seen_in_exit.lock().unwrap() = Some(shared.state.status());
        }));

        handle.send_control(ControlAction::Stop).await.unwrap();
        task.await.unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(ConversationStatus::Ended));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nlp_failure_skips_turn() {
        let providers = ProviderGateway::new(
            Arc::new(MockSpeechToText::new()),
            Arc::new(MockTextToSpeech::new()),
        )
        .with_language_processor(Arc::new(MockLanguageProcessor::new().with_failure()));
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(60)), small_settings(), providers);

        handle.send_text("hello").await.unwrap();
        settle().await;
        assert_eq!(handle.status(), ConversationStatus::Listening);

        handle.send_control(ControlAction::Stop).await.unwrap();
        let events = collect_events(&mut outputs.events).await;
        assert!(events.iter().any(|e| matches!(
            e,
            EventKind::Error { message } if message.contains("nlp")
        )));
        assert!(!events.iter().any(|e| matches!(e, EventKind::ResponseEnd { .. })));

        assert!(outputs.text.recv().await.is_none());
        assert!(outputs.audio.recv().await.is_none());
        let messages = handle.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].speaker, "user");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tts_failure_returns_to_listening_without_audio() {
        let providers = ProviderGateway::new(
            Arc::new(MockSpeechToText::new()),
            Arc::new(MockTextToSpeech::new().with_failure()),
        );
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(60)), small_settings(), providers);

        handle.send_text("hi").await.unwrap();
        assert_eq!(outputs.text.recv().await.unwrap(), canned_response("hi"));
        settle().await;
        assert_eq!(handle.status(), ConversationStatus::Listening);
        assert!(!handle.is_ended());

        handle.send_control(ControlAction::Stop).await.unwrap();
        let events = collect_events(&mut outputs.events).await;
        assert!(events.iter().any(|e| matches!(
            e,
            EventKind::Error { message } if message.contains("text-to-speech")
        )));
        assert!(!events.iter().any(|e| matches!(e, EventKind::ResponseEnd { .. })));
        assert!(outputs.audio.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_duration_preempts_slow_provider() {
        let providers = ProviderGateway::new(
            Arc::new(MockSpeechToText::new().with_delay(Duration::from_secs(60))),
            Arc::new(MockTextToSpeech::new()),
        );
        let mut config = config(Duration::from_secs(600));
        config.max_duration = Duration::from_secs(5);
        let (handle, mut outputs, _root) = start(config, small_settings(), providers);

        handle.send_audio(AudioChunk::new(vec![1; 10], 1, true)).await.unwrap();
        let events = collect_events(&mut outputs.events).await;

        assert_eq!(handle.end_reason(), Some(EndReason::MaxDuration));
        let duration = handle.duration().unwrap();
        assert!(duration >= Duration::from_secs(5));
        assert!(duration < Duration::from_secs(6), "ended after {:?}", duration);
        assert!(!events.iter().any(|e| matches!(e, EventKind::TextReceived { .. })));
        assert_eq!(handle.message_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_while_paused_is_not_detected() {
        let (handle, mut outputs, _root) =
            start(config(Duration::from_secs(60)), small_settings(), ProviderGateway::mock());

        handle.send_control(ControlAction::Pause).await.unwrap();
        settle().await;
        handle.send_audio(AudioChunk::new(loud(200), 1, false)).await.unwrap();
        settle().await;
        assert_eq!(handle.status(), ConversationStatus::Paused);

        handle.send_control(ControlAction::Stop).await.unwrap();
        let events = collect_events(&mut outputs.events).await;
        assert!(!events.contains(&EventKind::SpeechStart));
    }
}
