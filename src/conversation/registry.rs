//! Concurrency-bounded directory of live conversations.

use crate::audio::VadConfig;
use crate::config::Config;
use crate::conversation::actor::{ChannelCapacities, SessionActor, SessionSettings};
use crate::conversation::handle::{SessionHandle, SessionShared};
use crate::conversation::state::ConversationStatus;
use crate::conversation::supervisor::{self, LifecycleSupervisor, SweepReport};
use crate::conversation::types::{
    ControlAction, ConversationConfig, ConversationControl, ConversationDefaults, EndReason,
};
use crate::defaults;
use crate::error::{ConvoiceError, Result};
use crate::providers::ProviderGateway;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Id to handle map shared with the supervisor and session teardown.
pub(crate) type SessionMap = Arc<RwLock<HashMap<String, SessionHandle>>>;

/// Registry limits and the defaults applied to new sessions.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub max_concurrent: usize,
    pub cleanup_interval: Duration,
    pub defaults: ConversationDefaults,
    pub session: SessionSettings,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::MAX_CONCURRENT_SESSIONS,
            cleanup_interval: defaults::CLEANUP_INTERVAL,
            defaults: ConversationDefaults::default(),
            session: SessionSettings::default(),
        }
    }
}

impl RegistryConfig {
    /// Creates a registry configuration from app config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent: config.registry.max_concurrent,
            cleanup_interval: Duration::from_secs(config.registry.cleanup_interval_secs),
            defaults: ConversationDefaults {
                language: config.conversation.language.clone(),
                voice: config.conversation.voice.clone(),
                max_duration: Duration::from_secs(config.conversation.max_duration_secs),
                silence_timeout: Duration::from_millis(config.conversation.silence_timeout_ms),
                enable_vad: config.conversation.enable_vad,
                enable_nlp: config.conversation.enable_nlp,
                enable_emotion: config.conversation.enable_emotion,
                streaming_mode: config.conversation.streaming_mode,
                auto_response: config.conversation.auto_response,
            },
            session: SessionSettings {
                segmenter: config.audio.segmenter(),
                vad: VadConfig {
                    threshold: config.audio.vad_threshold,
                    format: config.audio.sample_format,
                },
                channels: ChannelCapacities {
                    audio: config.channels.audio_buffer,
                    text: config.channels.text_buffer,
                    control: config.channels.control_buffer,
                    event: config.channels.event_buffer,
                },
                watchdog_tick: defaults::WATCHDOG_TICK,
            },
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

/// Owns every live conversation of one process (or one test).
///
/// Dropping the registry cancels all of its sessions and the supervisor.
pub struct SessionRegistry {
    config: RegistryConfig,
    providers: ProviderGateway,
    sessions: SessionMap,
    token: CancellationToken,
}

impl SessionRegistry {
    /// Creates a registry and starts its lifecycle supervisor.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: RegistryConfig, providers: ProviderGateway) -> Self {
        let sessions: SessionMap = Arc::new(RwLock::new(HashMap::new()));
        let token = CancellationToken::new();

        LifecycleSupervisor::new(
            Arc::clone(&sessions),
            config.cleanup_interval,
            token.child_token(),
        )
        .spawn();

        Self {
            config,
            providers,
            sessions,
            token,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Starts a conversation and returns its handle.
    ///
    /// Unset config fields are filled from the registry defaults; an empty id
    /// gets a fresh uuid.
    pub fn start_session(&self, config: ConversationConfig) -> Result<SessionHandle> {
        if self.token.is_cancelled() {
            return Err(ConvoiceError::RegistryShutdown);
        }

        let config = config.resolve(&self.config.defaults);
        let id = config.id.clone();

        let (actor, handle) = {
            let mut sessions = self.write_sessions();
            if sessions.len() >= self.config.max_concurrent {
                warn!(max = self.config.max_concurrent, "Rejecting conversation, at capacity");
                return Err(ConvoiceError::CapacityExceeded {
                    max: self.config.max_concurrent,
                });
            }
            if sessions.contains_key(&id) {
                return Err(ConvoiceError::DuplicateSession { id });
            }

            let (actor, handle) = SessionActor::new(
                config,
                self.config.session.clone(),
                self.providers.clone(),
                &self.token,
            );
            sessions.insert(id.clone(), handle.clone());
            (actor, handle)
        };

        let weak = Arc::downgrade(&self.sessions);
        actor.spawn(Box::new(move |shared| deregister(&weak, shared)));
        debug!(id = %id, "Registered conversation");

        Ok(handle)
    }

    pub fn get_session(&self, id: &str) -> Option<SessionHandle> {
        self.read_sessions().get(id).cloned()
    }

    /// Snapshot of every registered session, in no particular order.
    pub fn list_sessions(&self) -> Vec<SessionHandle> {
        self.read_sessions().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_sessions().is_empty()
    }

    /// Asks a session to stop.
    ///
    /// Delivery goes through the control channel. If that channel is full the
    /// session is forced to `ended` and cancelled instead. Either way teardown
    /// completes asynchronously.
    pub fn stop_session(&self, id: &str) -> Result<()> {
        let handle = self
            .get_session(id)
            .ok_or_else(|| ConvoiceError::SessionNotFound { id: id.to_string() })?;

        match handle
            .control_tx
            .try_send(ConversationControl::new(ControlAction::Stop))
        {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(id = %id, "Control channel full, forcing conversation to end");
                let shared = &handle.shared;
                if let Err(rejected) = shared.state.transition(ConversationStatus::Ended) {
                    debug!(id = %id, from = %rejected.from, "Already ended");
                }
                shared.cancel(EndReason::Stopped);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                debug!(id = %id, "Conversation already torn down");
                Ok(())
            }
        }
    }

    /// Runs one supervisor sweep immediately.
    pub fn sweep(&self) -> SweepReport {
        supervisor::sweep(&self.sessions)
    }

    /// Ends every session and stops the supervisor.
    pub fn shutdown(&self) {
        if self.token.is_cancelled() {
            return;
        }
        let sessions = self.list_sessions();
        info!(count = sessions.len(), "Shutting down conversation registry");
        for handle in &sessions {
            handle.shared.state.set_end_reason(EndReason::Shutdown);
        }
        self.token.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.token.is_cancelled()
    }

    fn read_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_sessions(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("max_concurrent", &self.config.max_concurrent)
            .finish()
    }
}

/// Removes `shared`'s entry, unless the id now belongs to a newer session.
fn deregister(sessions: &Weak<RwLock<HashMap<String, SessionHandle>>>, shared: &Arc<SessionShared>) {
    let Some(sessions) = sessions.upgrade() else {
        return;
    };
    let mut map = sessions.write().unwrap_or_else(PoisonError::into_inner);
    let id = &shared.config.id;
    let owned = map
        .get(id)
        .is_some_and(|handle| Arc::ptr_eq(&handle.shared, shared));
    if owned {
        map.remove(id);
        debug!(id = %id, "Deregistered conversation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::events::EventKind;

    fn registry(max: usize) -> SessionRegistry {
        SessionRegistry::new(
            RegistryConfig::default().with_max_concurrent(max),
            ProviderGateway::mock(),
        )
    }

    fn named(id: &str) -> ConversationConfig {
        ConversationConfig {
            id: id.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_assigns_id_and_defaults() {
        let registry = registry(4);
        let handle = registry.start_session(ConversationConfig::default()).unwrap();

        assert!(!handle.id().is_empty());
        assert_eq!(handle.config().language, defaults::DEFAULT_LANGUAGE);
        assert_eq!(handle.config().voice, defaults::DEFAULT_VOICE);
        assert_eq!(handle.config().max_duration, defaults::MAX_DURATION);
        assert_eq!(handle.config().silence_timeout, defaults::SILENCE_TIMEOUT);
        assert!(registry.get_session(handle.id()).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_config_flags_reach_sessions_through_defaults() {
        let mut app = Config::default();
        app.conversation.enable_nlp = false;
        app.conversation.auto_response = false;
        let registry = SessionRegistry::new(RegistryConfig::from_config(&app), ProviderGateway::mock());

        let template = registry.config().defaults.config();
        let handle = registry.start_session(template).unwrap();

        assert!(!handle.config().enable_nlp);
        assert!(!handle.config().auto_response);
        assert!(handle.config().enable_vad);
        assert_eq!(handle.config().language, defaults::DEFAULT_LANGUAGE);
    }

    #[tokio::test]
    async fn test_first_event_is_conversation_started() {
        let registry = registry(4);
        let handle = registry.start_session(named("a")).unwrap();
        let mut outputs = handle.take_outputs().unwrap();
        let event = outputs.events.recv().await.unwrap();
        assert!(matches!(event.kind, EventKind::ConversationStarted { .. }));
        assert_eq!(event.conversation_id, "a");
        assert!(handle.take_outputs().is_none());
    }

    #[tokio::test]
    async fn test_capacity_is_enforced() {
        let registry = registry(2);
        registry.start_session(named("a")).unwrap();
        registry.start_session(named("b")).unwrap();

        match registry.start_session(named("c")) {
            Err(ConvoiceError::CapacityExceeded { max }) => assert_eq!(max, 2),
            other => panic!("Expected CapacityExceeded, got {:?}", other),
        }
        assert!(registry.get_session("c").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = registry(4);
        registry.start_session(named("same")).unwrap();
        assert!(matches!(
            registry.start_session(named("same")),
            Err(ConvoiceError::DuplicateSession { .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_unknown_session() {
        let registry = registry(4);
        assert!(matches!(
            registry.stop_session("missing"),
            Err(ConvoiceError::SessionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_deregisters_after_teardown() {
        let registry = registry(4);
        let handle = registry.start_session(named("a")).unwrap();
        let mut outputs = handle.take_outputs().unwrap();

        registry.stop_session("a").unwrap();
        while outputs.events.recv().await.is_some() {}

        // Deregistration runs right after the event channel closes.
        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(registry.is_empty());
        assert_eq!(handle.end_reason(), Some(EndReason::Stopped));
        assert!(registry.stop_session("a").is_err());
    }

    #[tokio::test]
    async fn test_stop_with_full_control_channel_forces_end() {
        let mut config = RegistryConfig::default();
        config.session.channels.control = 1;
        let registry = SessionRegistry::new(config, ProviderGateway::mock());
        let handle = registry.start_session(named("busy")).unwrap();

        // Fill the single control slot before the control loop runs.
        handle.try_send_control(ControlAction::Mute).unwrap();
        registry.stop_session("busy").unwrap();

        assert_eq!(handle.status(), ConversationStatus::Ended);
        assert_eq!(handle.end_reason(), Some(EndReason::Stopped));
    }

    #[tokio::test]
    async fn test_shutdown_ends_all_sessions() {
        let registry = registry(8);
        let handles: Vec<_> = (0..3)
            .map(|i| registry.start_session(named(&format!("s{}", i))).unwrap())
            .collect();
        let mut outputs: Vec<_> = handles.iter().map(|h| h.take_outputs().unwrap()).collect();

        registry.shutdown();
        for out in &mut outputs {
            while out.events.recv().await.is_some() {}
        }

        for handle in &handles {
            assert_eq!(handle.status(), ConversationStatus::Ended);
            assert_eq!(handle.end_reason(), Some(EndReason::Shutdown));
        }
        assert!(matches!(
            registry.start_session(named("late")),
            Err(ConvoiceError::RegistryShutdown)
        ));
    }

    #[tokio::test]
    async fn test_drop_cancels_sessions() {
        let registry = registry(4);
        let handle = registry.start_session(named("a")).unwrap();
        let mut outputs = handle.take_outputs().unwrap();
        drop(registry);

        while outputs.events.recv().await.is_some() {}
        assert!(handle.is_ended());
        assert_eq!(handle.end_reason(), Some(EndReason::Shutdown));
    }

    #[tokio::test]
    async fn test_sweep_removes_ended_sessions() {
        let registry = registry(4);
        let handle = registry.start_session(named("done")).unwrap();
        handle.shared.state.transition(ConversationStatus::Ended).unwrap();

        let report = registry.sweep();
        assert_eq!(report.ended, 1);
        assert!(registry.is_empty());
        assert_eq!(registry.sweep(), SweepReport::default());
    }
}
