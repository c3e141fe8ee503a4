//! In-process providers with scripted behaviour.

use crate::defaults::SAMPLE_RATE;
use crate::error::{ConvoiceError, ProviderKind, Result};
use crate::providers::{
    LanguageProcessor, SpeechRequest, SpeechToText, SynthesizedAudio, TextToSpeech, Transcript,
    VoiceParams,
};
use std::time::Duration;

/// Mock speech-to-text engine.
#[derive(Debug, Clone)]
pub struct MockSpeechToText {
    response: String,
    confidence: f32,
    should_fail: bool,
    delay: Option<Duration>,
}

impl MockSpeechToText {
    pub fn new() -> Self {
        Self {
            response: "mock transcription".to_string(),
            confidence: 0.95,
            should_fail: false,
            delay: None,
        }
    }

    /// Configure the text returned for every segment.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Configure the mock to fail on every call.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Simulate recognition latency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Default for MockSpeechToText {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SpeechToText for MockSpeechToText {
    async fn transcribe(&self, request: &SpeechRequest) -> Result<Transcript> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(ConvoiceError::provider(
                ProviderKind::SpeechToText,
                "mock transcription failure",
            ));
        }
        Ok(Transcript {
            text: self.response.clone(),
            confidence: self.confidence,
            language: request.language.clone(),
        })
    }
}

/// Mock text-to-speech engine.
///
/// Produces silent PCM16 audio, 60 ms per input character.
#[derive(Debug, Clone, Default)]
pub struct MockTextToSpeech {
    should_fail: bool,
    delay: Option<Duration>,
}

const MS_PER_CHAR: u64 = 60;

impl MockTextToSpeech {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl TextToSpeech for MockTextToSpeech {
    async fn synthesize(&self, text: &str, _params: &VoiceParams) -> Result<SynthesizedAudio> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(ConvoiceError::provider(
                ProviderKind::TextToSpeech,
                "mock synthesis failure",
            ));
        }
        let duration = Duration::from_millis(text.chars().count() as u64 * MS_PER_CHAR);
        let samples = SAMPLE_RATE as u128 * duration.as_millis() / 1000;
        Ok(SynthesizedAudio {
            data: vec![0u8; samples as usize * 2],
            duration,
        })
    }
}

/// Mock language processor.
///
/// Echoes the input unless a fixed response is configured.
#[derive(Debug, Clone, Default)]
pub struct MockLanguageProcessor {
    response: Option<String>,
    should_fail: bool,
    delay: Option<Duration>,
}

impl MockLanguageProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, response: &str) -> Self {
        self.response = Some(response.to_string());
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl LanguageProcessor for MockLanguageProcessor {
    async fn process_text(&self, text: &str, _user_id: &str) -> Result<String> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail {
            return Err(ConvoiceError::provider(
                ProviderKind::Nlp,
                "mock language processing failure",
            ));
        }
        Ok(self
            .response
            .clone()
            .unwrap_or_else(|| format!("You said: {}", text)))
    }
}
