//! Audio handling: voice activity detection, utterance segmentation, WAV input.

pub mod segmenter;
pub mod vad;
pub mod wav;

pub use segmenter::{AudioSegmenter, Segment, SegmenterConfig};
pub use vad::{SampleFormat, VadConfig, detect_voice_activity, mean_square_energy};
pub use wav::WavClip;
