//! Speech-to-text, text-to-speech and language providers.
//!
//! Sessions talk to remote engines only through these traits. Concrete
//! network clients live outside this crate; the [`mock`] implementations are
//! used by tests and the `simulate` command.

pub mod canned;
pub mod mock;

use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;

pub use canned::canned_response;
pub use mock::{MockLanguageProcessor, MockSpeechToText, MockTextToSpeech};

/// One completed utterance submitted for recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechRequest {
    pub conversation_id: String,
    pub audio: Vec<u8>,
    pub language: String,
    pub user_id: String,
    pub session_id: String,
}

/// Recognition result.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub text: String,
    pub confidence: f32,
    pub language: String,
}

/// Voice parameters forwarded to synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParams {
    pub language: String,
    pub voice: String,
    pub user_id: String,
    pub session_id: String,
}

/// Synthesis result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    pub data: Vec<u8>,
    pub duration: Duration,
}

#[async_trait::async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, request: &SpeechRequest) -> Result<Transcript>;
}

#[async_trait::async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str, params: &VoiceParams) -> Result<SynthesizedAudio>;
}

/// Produces the assistant's reply to a user turn.
#[async_trait::async_trait]
pub trait LanguageProcessor: Send + Sync {
    async fn process_text(&self, text: &str, user_id: &str) -> Result<String>;
}

/// The set of providers shared by every session of a registry.
///
/// The language processor is optional; without one, replies come from
/// [`canned_response`].
#[derive(Clone)]
pub struct ProviderGateway {
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub nlp: Option<Arc<dyn LanguageProcessor>>,
}

impl ProviderGateway {
    pub fn new(stt: Arc<dyn SpeechToText>, tts: Arc<dyn TextToSpeech>) -> Self {
        Self {
            stt,
            tts,
            nlp: None,
        }
    }

    pub fn with_language_processor(mut self, nlp: Arc<dyn LanguageProcessor>) -> Self {
        self.nlp = Some(nlp);
        self
    }

    /// Gateway backed entirely by default mocks.
    pub fn mock() -> Self {
        Self::new(
            Arc::new(MockSpeechToText::new()),
            Arc::new(MockTextToSpeech::new()),
        )
    }
}

impl std::fmt::Debug for ProviderGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderGateway")
            .field("nlp", &self.nlp.is_some())
            .finish_non_exhaustive()
    }
}
