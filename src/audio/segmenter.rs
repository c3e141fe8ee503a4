//! Utterance segmentation.
//!
//! Accumulates bytes from sequential audio chunks and emits a segment when:
//! - the buffer reaches the flush threshold
//! - a chunk is marked `is_last` (even when the buffer is empty)
//!
//! This decouples wire-level chunk sizes from the utterance unit that is sent
//! to speech-to-text.

use crate::audio::vad::SampleFormat;
use crate::conversation::types::AudioChunk;
use crate::defaults;
use tracing::warn;

/// Configuration for the segmenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterConfig {
    /// Buffered byte count that triggers a flush.
    pub flush_bytes: usize,
}

impl SegmenterConfig {
    /// Threshold holding [`defaults::SEGMENT_DURATION`] of mono audio.
    pub fn for_format(sample_rate: u32, format: SampleFormat) -> Self {
        let samples = sample_rate as u128 * defaults::SEGMENT_DURATION.as_millis() / 1000;
        Self {
            flush_bytes: (samples as usize).saturating_mul(format.bytes_per_sample()),
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            flush_bytes: defaults::SEGMENT_FLUSH_BYTES,
        }
    }
}

/// A completed utterance ready for transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Concatenated chunk payloads.
    pub data: Vec<u8>,
    /// Sequence number of the first chunk in this segment.
    pub first_sequence: Option<u64>,
    /// Sequence number of the last chunk in this segment.
    pub last_sequence: Option<u64>,
    /// Whether the flush was triggered by an `is_last` chunk.
    pub is_final: bool,
}

impl Segment {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }
}

/// Byte-threshold segmenter, one per session.
#[derive(Debug)]
pub struct AudioSegmenter {
    config: SegmenterConfig,
    buffer: Vec<u8>,
    first_sequence: Option<u64>,
    last_sequence: Option<u64>,
    /// Highest sequence seen across the session, for gap detection.
    high_water: Option<u64>,
    gaps: u64,
}

impl AudioSegmenter {
    pub fn new() -> Self {
        Self::with_config(SegmenterConfig::default())
    }

    pub fn with_config(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: Vec::with_capacity(config.flush_bytes),
            first_sequence: None,
            last_sequence: None,
            high_water: None,
            gaps: 0,
        }
    }

    /// Adds a chunk and returns a segment if this chunk completed one.
    ///
    /// Chunks are appended in arrival order. Sequence irregularities are
    /// counted and logged but never cause reordering or loss.
    pub fn push(&mut self, chunk: AudioChunk) -> Option<Segment> {
        self.track_sequence(chunk.sequence);

        if self.first_sequence.is_none() {
            self.first_sequence = Some(chunk.sequence);
        }
        self.last_sequence = Some(chunk.sequence);
        self.buffer.extend_from_slice(&chunk.data);

        if chunk.is_last || self.buffer.len() >= self.config.flush_bytes {
            Some(self.flush(chunk.is_last))
        } else {
            None
        }
    }

    /// Number of bytes waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Number of sequence gaps or regressions observed so far.
    pub fn sequence_gaps(&self) -> u64 {
        self.gaps
    }

    /// Discards buffered audio without emitting a segment.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.first_sequence = None;
        self.last_sequence = None;
    }

    fn flush(&mut self, is_final: bool) -> Segment {
        Segment {
            data: std::mem::replace(&mut self.buffer, Vec::with_capacity(self.config.flush_bytes)),
            first_sequence: self.first_sequence.take(),
            last_sequence: self.last_sequence.take(),
            is_final,
        }
    }

    fn track_sequence(&mut self, sequence: u64) {
        match self.high_water {
            Some(high) if high.checked_add(1) != Some(sequence) => {
                self.gaps += 1;
                warn!(
                    expected = high.wrapping_add(1),
                    got = sequence,
                    "audio chunk sequence gap"
                );
                self.high_water = Some(high.max(sequence));
            }
            _ => self.high_water = Some(sequence),
        }
    }
}

impl Default for AudioSegmenter {
    fn default() -> Self {
        Self::new()
    }
}
