use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use convoice::audio::{AudioSegmenter, SampleFormat, SegmenterConfig, VadConfig, detect_voice_activity};
use convoice::conversation::AudioChunk;
use std::hint::black_box;

/// 100ms of PCM16 at 16kHz: a low-amplitude sine wave.
fn speech_chunk(sequence: u64) -> AudioChunk {
    let data: Vec<u8> = (0..1600)
        .flat_map(|i| {
            let sample = ((i as f32 * 0.07).sin() * 3000.0) as i16;
            sample.to_le_bytes()
        })
        .collect();
    AudioChunk::new(data, sequence, false)
}

fn bench_segmenter(c: &mut Criterion) {
    let mut group = c.benchmark_group("segmenter");

    for flush_bytes in [8_000usize, 32_000, 128_000] {
        let chunks: Vec<AudioChunk> = (1..=100).map(speech_chunk).collect();
        let total: usize = chunks.iter().map(|c| c.data.len()).sum();
        group.throughput(Throughput::Bytes(total as u64));

        group.bench_with_input(
            BenchmarkId::new("push", flush_bytes),
            &chunks,
            |b, chunks| {
                b.iter(|| {
                    let mut segmenter = AudioSegmenter::with_config(SegmenterConfig { flush_bytes });
                    let mut segments = 0;
                    for chunk in chunks.iter().cloned() {
                        if segmenter.push(chunk).is_some() {
                            segments += 1;
                        }
                    }
                    black_box(segments)
                });
            },
        );
    }

    group.finish();
}

fn bench_vad(c: &mut Criterion) {
    let chunk = speech_chunk(1);
    let mut group = c.benchmark_group("vad");
    group.throughput(Throughput::Bytes(chunk.data.len() as u64));

    for format in [SampleFormat::Pcm16Le, SampleFormat::U8] {
        let config = VadConfig {
            format,
            ..VadConfig::default()
        };
        group.bench_function(BenchmarkId::new("detect", format!("{:?}", format)), |b| {
            b.iter(|| detect_voice_activity(black_box(&chunk.data), &config));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_segmenter, bench_vad);
criterion_main!(benches);
