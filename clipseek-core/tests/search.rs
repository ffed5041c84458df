//! End-to-end searches over synthetic signals through the public API.

use approx::assert_abs_diff_eq;
use clipseek_core::{
    AudioSignal, BackendKind, ClipseekError, MatchConfig, SampleRecord, SearchController,
};
use rand::{rngs::StdRng, Rng, SeedableRng};

const SR: u32 = 8_000;
const LONG_SECONDS: f64 = 20.0;
const SAMPLE_SECONDS: f64 = 1.0;
const EMBED_AT: f64 = 7.25;
const ALL_BACKENDS: [BackendKind; 3] = [
    BackendKind::Sequential,
    BackendKind::Threaded,
    BackendKind::Device,
];

fn noise(rng: &mut StdRng, len: usize, amplitude: f32) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-amplitude..amplitude)).collect()
}

/// Low-level noise with `sample` copied in at `at` seconds.
fn fixture(seed: u64, at: f64) -> (AudioSignal, SampleRecord) {
    let mut rng = StdRng::seed_from_u64(seed);
    let sample_len = (SAMPLE_SECONDS * SR as f64) as usize;
    let sample = AudioSignal::normalized(noise(&mut rng, sample_len, 1.0), SR);
    let mut long = noise(&mut rng, (LONG_SECONDS * SR as f64) as usize, 0.05);
    let start = (at * SR as f64).floor() as usize;
    long[start..start + sample.len()].copy_from_slice(sample.samples());
    (AudioSignal::new(long, SR), SampleRecord::new("clip", sample))
}

fn config(backend: BackendKind) -> MatchConfig {
    MatchConfig {
        sample_rate: SR,
        chunk_duration: 4.0,
        overlap: 1.5,
        stop_confidence: 0.99,
        workers: 3,
        backend,
    }
}

#[test]
fn sequential_finds_embedded_sample_and_stops_early() {
    let (long, sample) = fixture(7, EMBED_AT);
    let mut ctl = SearchController::new(config(BackendKind::Sequential)).unwrap();
    let out = ctl.search(&long, &sample).unwrap();

    assert!(out.result.is_found());
    assert_abs_diff_eq!(
        out.result.offset_seconds,
        EMBED_AT,
        epsilon = 1.0 / SR as f64
    );
    assert!(out.result.confidence_percent > 95.0);
    assert!(out.stats.early_stopped);
    assert!(
        out.stats.chunks_evaluated < out.stats.chunks_planned,
        "evaluated {} of {}",
        out.stats.chunks_evaluated,
        out.stats.chunks_planned
    );
}

#[test]
fn parallel_backends_evaluate_every_chunk() {
    let (long, sample) = fixture(11, EMBED_AT);
    for backend in [BackendKind::Threaded, BackendKind::Device] {
        let mut ctl = SearchController::new(config(backend)).unwrap();
        assert!(!ctl.capabilities().early_stop);
        let out = ctl.search(&long, &sample).unwrap();

        assert_eq!(out.stats.backend, backend);
        assert!(!out.stats.early_stopped);
        assert_eq!(out.stats.chunks_evaluated, out.stats.chunks_planned);
        assert_abs_diff_eq!(
            out.result.offset_seconds,
            EMBED_AT,
            epsilon = 1.0 / SR as f64
        );
    }
}

#[test]
fn all_backends_agree_without_early_stop() {
    let (long, sample) = fixture(23, 12.125);
    let results: Vec<_> = ALL_BACKENDS
        .into_iter()
        .map(|backend| {
            let cfg = MatchConfig {
                stop_confidence: 2.0,
                ..config(backend)
            };
            SearchController::new(cfg)
                .unwrap()
                .search(&long, &sample)
                .unwrap()
        })
        .collect();

    let reference = results[0];
    assert!(!reference.stats.early_stopped);
    for other in &results[1..] {
        assert_eq!(other.result.offset_seconds, reference.result.offset_seconds);
        assert_abs_diff_eq!(other.result.score, reference.result.score, epsilon = 1e-5);
        assert_eq!(other.stats.chunks_evaluated, reference.stats.chunks_evaluated);
    }
}

#[test]
fn repeated_search_is_idempotent() {
    let (long, sample) = fixture(5, 3.125);
    let mut ctl = SearchController::new(config(BackendKind::Threaded)).unwrap();
    let first = ctl.search(&long, &sample).unwrap();
    let second = ctl.search(&long, &sample).unwrap();
    assert_eq!(first.result, second.result);
}

#[test]
fn sample_as_long_as_a_chunk_is_found_at_chunk_start() {
    let mut rng = StdRng::seed_from_u64(99);
    let chunk_len = 4 * SR as usize;
    let sample = AudioSignal::normalized(noise(&mut rng, chunk_len, 1.0), SR);
    let mut long = noise(&mut rng, (LONG_SECONDS * SR as f64) as usize, 0.05);
    // Chunk 1 starts at 2.5 s.
    let start = (2.5 * SR as f64) as usize;
    long[start..start + chunk_len].copy_from_slice(sample.samples());
    let long = AudioSignal::new(long, SR);
    let sample = SampleRecord::new("whole-chunk", sample);

    let cfg = MatchConfig {
        stop_confidence: 2.0,
        ..config(BackendKind::Sequential)
    };
    let out = SearchController::new(cfg)
        .unwrap()
        .search(&long, &sample)
        .unwrap();
    assert_abs_diff_eq!(out.result.offset_seconds, 2.5, epsilon = 1e-9);
    assert!(out.result.score > 0.99);
}

#[test]
fn long_signal_shorter_than_a_chunk_reports_no_match() {
    let mut rng = StdRng::seed_from_u64(1);
    let long = AudioSignal::new(noise(&mut rng, 3 * SR as usize, 0.5), SR);
    let sample = AudioSignal::new(noise(&mut rng, SR as usize / 2, 1.0), SR);
    let sample = SampleRecord::new("s", sample);

    for backend in ALL_BACKENDS {
        let out = SearchController::new(config(backend))
            .unwrap()
            .search(&long, &sample)
            .unwrap();
        assert_eq!(out.stats.chunks_planned, 0);
        assert_eq!(out.stats.chunks_evaluated, 0);
        assert_eq!(out.result.score, -1.0);
        assert!(!out.result.is_found());
    }
}

#[test]
fn sample_longer_than_a_chunk_reports_no_match() {
    let mut rng = StdRng::seed_from_u64(2);
    let long = AudioSignal::new(noise(&mut rng, 10 * SR as usize, 0.5), SR);
    let sample = AudioSignal::new(noise(&mut rng, 5 * SR as usize, 1.0), SR);
    let sample = SampleRecord::new("s", sample);
    let out = SearchController::new(config(BackendKind::Sequential))
        .unwrap()
        .search(&long, &sample)
        .unwrap();
    assert!(!out.result.is_found());
}

#[test]
fn silent_long_signal_scores_zero_without_nan() {
    let mut rng = StdRng::seed_from_u64(3);
    let long = AudioSignal::new(vec![0.0; 10 * SR as usize], SR);
    let sample = AudioSignal::new(noise(&mut rng, SR as usize, 1.0), SR);
    let sample = SampleRecord::new("s", sample);
    let out = SearchController::new(config(BackendKind::Sequential))
        .unwrap()
        .search(&long, &sample)
        .unwrap();
    assert!(out.result.score.is_finite());
    assert_abs_diff_eq!(out.result.score, 0.0, epsilon = 1e-6);
}

#[test]
fn digital_silence_does_not_outrank_the_real_match() {
    let (long, sample) = fixture(31, 14.125);
    let mut long = long.samples().to_vec();
    // Exact zeros from 5 s to 10 s, as left by a decoder's silent gap.
    long[5 * SR as usize..10 * SR as usize]
        .iter_mut()
        .for_each(|s| *s = 0.0);
    let long = AudioSignal::new(long, SR);

    for backend in ALL_BACKENDS {
        let cfg = MatchConfig {
            stop_confidence: 2.0,
            ..config(backend)
        };
        let out = SearchController::new(cfg)
            .unwrap()
            .search(&long, &sample)
            .unwrap();
        assert_abs_diff_eq!(out.result.offset_seconds, 14.125, epsilon = 1.0 / SR as f64);
        assert!(
            out.result.score > 0.99 && out.result.score < 1.0 + 1e-6,
            "{backend}: {:?}",
            out.result
        );
    }
}

#[test]
fn invalid_config_fails_before_search() {
    let cfg = MatchConfig {
        overlap: 4.0,
        ..config(BackendKind::Sequential)
    };
    assert!(matches!(SearchController::new(cfg), Err(ClipseekError::Config(_))));
}
