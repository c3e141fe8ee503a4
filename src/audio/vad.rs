//! Voice Activity Detection (VAD).
//!
//! Stateless energy classifier: the mean of squared, normalized sample
//! magnitudes is compared against a fixed threshold. The result is advisory;
//! it drives status and event transitions but never drops audio.

use crate::defaults;
use serde::{Deserialize, Serialize};

/// How raw chunk bytes are interpreted as samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian PCM. A trailing odd byte is ignored.
    #[default]
    Pcm16Le,
    /// Unsigned 8-bit PCM centred on 128.
    U8,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::Pcm16Le => 2,
            SampleFormat::U8 => 1,
        }
    }
}

/// Configuration for voice activity detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Energy threshold (mean square, 0.0 to 1.0) above which speech is present.
    pub threshold: f32,
    /// Sample interpretation of chunk bytes.
    pub format: SampleFormat,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::VAD_ENERGY_THRESHOLD,
            format: SampleFormat::default(),
        }
    }
}

/// Returns true if the buffer's energy exceeds the configured threshold.
pub fn detect_voice_activity(data: &[u8], config: &VadConfig) -> bool {
    mean_square_energy(data, config.format) > config.threshold
}

/// Mean of squared normalized sample magnitudes.
///
/// # Returns
/// A value in 0.0..=1.0 where 0.0 is digital silence and 1.0 is a full-scale
/// square wave. Empty input yields 0.0.
pub fn mean_square_energy(data: &[u8], format: SampleFormat) -> f32 {
    let (sum_squares, count) = match format {
        SampleFormat::Pcm16Le => data
            .chunks_exact(2)
            .map(|pair| {
                let sample = i16::from_le_bytes([pair[0], pair[1]]);
                let normalized = sample as f64 / i16::MAX as f64;
                normalized * normalized
            })
            .fold((0.0f64, 0usize), |(sum, n), sq| (sum + sq, n + 1)),
        SampleFormat::U8 => data
            .iter()
            .map(|&byte| {
                let normalized = (byte as f64 - 128.0) / 127.0;
                normalized * normalized
            })
            .fold((0.0f64, 0usize), |(sum, n), sq| (sum + sq, n + 1)),
    };

    if count == 0 {
        return 0.0;
    }

    (sum_squares / count as f64).min(1.0) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm16(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_energy_silence_is_zero() {
        let silence = pcm16(&[0; 1000]);
        assert_eq!(mean_square_energy(&silence, SampleFormat::Pcm16Le), 0.0);
    }

    #[test]
    fn test_energy_empty_is_zero() {
        assert_eq!(mean_square_energy(&[], SampleFormat::Pcm16Le), 0.0);
        assert_eq!(mean_square_energy(&[], SampleFormat::U8), 0.0);
    }

    #[test]
    fn test_energy_full_scale_is_one() {
        let loud = pcm16(&[i16::MAX; 500]);
        let energy = mean_square_energy(&loud, SampleFormat::Pcm16Le);
        assert!((energy - 1.0).abs() < 0.001, "got {}", energy);
    }

    #[test]
    fn test_energy_negative_samples_clamped() {
        // i16::MIN normalizes slightly past -1.0; clamp keeps the range closed
        let loud = pcm16(&[i16::MIN; 500]);
        let energy = mean_square_energy(&loud, SampleFormat::Pcm16Le);
        assert!(energy <= 1.0);
        assert!(energy > 0.99);
    }

    #[test]
    fn test_energy_mixed_sign() {
        let mut samples = vec![1000i16; 500];
        samples.extend(vec![-1000i16; 500]);
        let energy = mean_square_energy(&pcm16(&samples), SampleFormat::Pcm16Le);
        // (1000/32767)^2 ≈ 0.00093
        assert!(energy > 0.0008 && energy < 0.0011, "got {}", energy);
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        let mut data = pcm16(&[0; 10]);
        data.push(0xFF);
        assert_eq!(mean_square_energy(&data, SampleFormat::Pcm16Le), 0.0);
    }

    #[test]
    fn test_u8_midpoint_is_silence() {
        let data = vec![128u8; 256];
        assert_eq!(mean_square_energy(&data, SampleFormat::U8), 0.0);
    }

    #[test]
    fn test_u8_extremes_are_loud() {
        let data: Vec<u8> = (0..256).map(|i| if i % 2 == 0 { 0 } else { 255 }).collect();
        assert!(mean_square_energy(&data, SampleFormat::U8) > 0.99);
    }

    #[test]
    fn test_detects_speech_above_threshold() {
        let config = VadConfig::default();
        // RMS ~0.09, well above the 0.02 default
        let speech = pcm16(&[3000; 800]);
        assert!(detect_voice_activity(&speech, &config));
    }

    #[test]
    fn test_rejects_quiet_noise() {
        let config = VadConfig::default();
        // RMS ~0.006
        let noise = pcm16(&[200; 800]);
        assert!(!detect_voice_activity(&noise, &config));
    }

    #[test]
    fn test_threshold_is_tunable() {
        let noise = pcm16(&[200; 800]);
        let sensitive = VadConfig {
            threshold: 0.00001,
            format: SampleFormat::Pcm16Le,
        };
        assert!(detect_voice_activity(&noise, &sensitive));
    }

    #[test]
    fn test_sample_format_serde_names() {
        let json = serde_json::to_string(&SampleFormat::Pcm16Le).unwrap();
        assert_eq!(json, "\"pcm16_le\"");
        let parsed: SampleFormat = serde_json::from_str("\"u8\"").unwrap();
        assert_eq!(parsed, SampleFormat::U8);
    }
}
