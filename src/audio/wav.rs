//! WAV file loading for simulated conversations.
//!
//! Decodes a WAV file to 16 kHz mono PCM and slices it into the wire-level
//! [`AudioChunk`]s a transport would deliver.

use crate::conversation::types::AudioChunk;
use crate::defaults::SAMPLE_RATE;
use crate::error::{ConvoiceError, Result};
use std::io::Read;
use std::path::Path;

/// Decoded audio clip, normalized to 16 kHz mono.
#[derive(Debug, Clone)]
pub struct WavClip {
    samples: Vec<i16>,
}

impl WavClip {
    /// Decodes from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| ConvoiceError::AudioFile {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        if spec.channels == 0 {
            return Err(ConvoiceError::AudioFile {
                message: "WAV file declares zero channels".to_string(),
            });
        }
        if spec.sample_rate == 0 {
            return Err(ConvoiceError::AudioFile {
                message: "WAV file declares a zero sample rate".to_string(),
            });
        }

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ConvoiceError::AudioFile {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        let mono_samples = downmix(&raw_samples, spec.channels);

        let samples = if spec.sample_rate != SAMPLE_RATE {
            resample(&mono_samples, spec.sample_rate, SAMPLE_RATE)
        } else {
            mono_samples
        };

        Ok(Self { samples })
    }

    /// Opens and decodes a WAV file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path).map_err(|e| ConvoiceError::AudioFile {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Clip length in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / SAMPLE_RATE as u64
    }

    /// Slices the clip into little-endian PCM16 chunks of `chunk_ms` each.
    ///
    /// Sequence numbers start at 1. The final chunk is marked `is_last`; an
    /// empty clip yields a single empty `is_last` chunk so the receiver still
    /// sees the end of the utterance.
    pub fn into_chunks(self, chunk_ms: u32) -> Vec<AudioChunk> {
        let samples_per_chunk = ((SAMPLE_RATE as u64 * chunk_ms.max(1) as u64) / 1000).max(1) as usize;

        if self.samples.is_empty() {
            return vec![AudioChunk::new(Vec::new(), 1, true)];
        }

        let total = self.samples.len().div_ceil(samples_per_chunk);
        self.samples
            .chunks(samples_per_chunk)
            .enumerate()
            .map(|(i, window)| {
                let data = window.iter().flat_map(|s| s.to_le_bytes()).collect();
                AudioChunk::new(data, i as u64 + 1, i + 1 == total)
            })
            .collect()
    }
}

fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let width = channels as usize;
    samples
        .chunks_exact(width)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / width as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx.min(samples.len() - 1)]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
