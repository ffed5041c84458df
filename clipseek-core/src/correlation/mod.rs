//! Correlation engine: per-chunk normalized cross-correlation behind
//! interchangeable execution backends.
//!
//! The math lives in one place, [`evaluate_chunk`]:
//!
//! ```text
//! corr[k]      = Σ chunk[k+j]·sample[j]          (FFT, valid mode)
//! energy[k]    = ‖chunk[k..k+M]‖                  (prefix sums)
//! corr_norm[k] = corr[k] / (energy[k]·‖sample‖ + ε)   (0 if energy[k] ≤ floor)
//! best         = argmax corr_norm  → (score, (start_index + k) / sr)
//! ```
//!
//! Backends only decide *where* that runs and in which order results reach
//! the caller's reducer:
//!
//! | backend | where | early stop |
//! |---------|-------|------------|
//! | [`SequentialBackend`] | calling thread, chunk order | yes |
//! | [`ThreadedBackend`] | fixed worker pool, completion order | no |
//! | [`DeviceBackend`] | compute device command queue | no |

pub mod device;
pub mod sequential;
pub mod threaded;

pub use device::DeviceBackend;
pub use sequential::SequentialBackend;
pub use threaded::ThreadedBackend;

use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{
    audio::{AudioSignal, SampleRecord},
    chunking::{Chunk, ChunkPlan},
    dsp::{energy::sliding_energy, xcorr::TemplateCorrelator},
    error::Result,
};

/// Guards the normalization divide against silent windows and silent samples.
pub const NCC_EPS: f64 = 1e-12;

/// Windows whose RMS is at or below this are digital silence and score 0.
pub const SILENCE_RMS: f64 = 1e-6;

/// Which execution strategy runs the per-chunk correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Sequential,
    Threaded,
    Device,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Sequential => "sequential",
            BackendKind::Threaded => "threaded",
            BackendKind::Device => "device",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" | "single" => Ok(BackendKind::Sequential),
            "threaded" | "threads" | "mt" | "parallel" => Ok(BackendKind::Threaded),
            "device" | "gpu" => Ok(BackendKind::Device),
            other => Err(format!("unknown backend: {other}")),
        }
    }
}

/// What a backend can promise about the work it performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendCapabilities {
    /// Whether the backend stops evaluating chunks once the reducer asks it
    /// to. Backends without it always evaluate the whole plan.
    pub early_stop: bool,
}

/// Best alignment inside a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocalMatch {
    pub chunk_index: usize,
    pub score: f64,
    pub offset_seconds: f64,
}

/// Everything a backend needs for one long/sample search.
#[derive(Debug, Clone, Copy)]
pub struct SearchJob<'a> {
    pub long: &'a AudioSignal,
    pub sample: &'a SampleRecord,
    pub plan: &'a ChunkPlan,
}

/// Contract for correlation execution strategies.
///
/// `run` evaluates the job's chunks and hands each [`LocalMatch`] to `sink`.
/// A backend whose capabilities include `early_stop` must stop as soon as
/// `sink` returns `ControlFlow::Break`; others may ignore it. Returns the
/// number of chunks actually evaluated.
pub trait CorrelationBackend: Send {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> BackendCapabilities;

    /// # Errors
    /// Device backends surface device faults; host backends are infallible
    /// apart from worker spawn failures.
    fn run(
        &mut self,
        job: &SearchJob<'_>,
        sink: &mut dyn FnMut(LocalMatch) -> ControlFlow<()>,
    ) -> Result<usize>;
}

/// Index and value of the largest normalized score (first one on ties).
///
/// `window` is the sample length the energies were taken over; alignments
/// whose energy is under the silence floor for that length score 0.
pub fn normalized_peak(
    corr: &[f64],
    energy: &[f64],
    sample_norm: f64,
    window: usize,
) -> Option<(usize, f64)> {
    let floor = SILENCE_RMS * (window as f64).sqrt();
    let mut best: Option<(usize, f64)> = None;
    for (k, (&c, &e)) in corr.iter().zip(energy).enumerate() {
        let v = if e <= floor {
            0.0
        } else {
            c / (e * sample_norm + NCC_EPS)
        };
        if v.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((k, v));
        }
    }
    best
}

/// Normalized cross-correlation of one chunk against the sample.
///
/// `None` only when the chunk is shorter than the sample, which the planner
/// never produces.
pub fn evaluate_chunk(
    correlator: &TemplateCorrelator,
    long: &[f32],
    chunk: &Chunk,
    sample_norm: f64,
    sample_rate: u32,
) -> Option<LocalMatch> {
    let window = &long[chunk.range()];
    let corr = correlator.correlate_valid(window);
    let energy = sliding_energy(window, correlator.template_len());
    let (idx, score) = normalized_peak(&corr, &energy, sample_norm, correlator.template_len())?;
    Some(LocalMatch {
        chunk_index: chunk.index,
        score,
        offset_seconds: (chunk.start_index + idx) as f64 / sample_rate as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn backend_aliases_parse() {
        assert_eq!("seq".parse::<BackendKind>().unwrap(), BackendKind::Sequential);
        assert_eq!("MT".parse::<BackendKind>().unwrap(), BackendKind::Threaded);
        assert_eq!("gpu".parse::<BackendKind>().unwrap(), BackendKind::Device);
        assert!("quantum".parse::<BackendKind>().is_err());
    }

    #[test]
    fn peak_prefers_first_maximum() {
        let corr = [1.0, 3.0, 3.0, 2.0];
        let energy = [1.0; 4];
        let (idx, v) = normalized_peak(&corr, &energy, 1.0, 4).unwrap();
        assert_eq!(idx, 1);
        assert_relative_eq!(v, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn zero_energy_does_not_blow_up() {
        let (_, v) = normalized_peak(&[0.0], &[0.0], 0.0, 1).unwrap();
        assert_eq!(v, 0.0);
    }

    #[test]
    fn silent_alignment_scores_zero_despite_residue() {
        // Round-off left in a silent window must not outrank a real match.
        let corr = [3.0e-6, 0.9];
        let energy = [0.0, 1.0];
        let (idx, v) = normalized_peak(&corr, &energy, 1.0, 100).unwrap();
        assert_eq!(idx, 1);
        assert_relative_eq!(v, 0.9, epsilon = 1e-9);

        let (_, quiet) = normalized_peak(&[1e-9], &[5e-6], 1.0, 100).unwrap();
        assert_eq!(quiet, 0.0);
    }

    #[test]
    fn clip_beside_silent_gap_is_found() {
        let sample: Vec<f32> = (0..200)
            .map(|i| ((i * 29 % 31) as f32 - 15.0) / 15.0)
            .collect();
        let mut long: Vec<f32> = (0..3_000)
            .map(|i| ((i as f32) * 1.3).sin() * 0.05)
            .collect();
        long[500..1_500].iter_mut().for_each(|s| *s = 0.0);
        long[2_100..2_300].copy_from_slice(&sample);
        let rec = SampleRecord::new("s", AudioSignal::new(sample.clone(), 1_000));
        let chunk = Chunk {
            index: 0,
            start_index: 0,
            end_index: 3_000,
            start_time: 0.0,
        };
        let m = evaluate_chunk(&TemplateCorrelator::new(&sample), &long, &chunk, rec.norm, 1_000)
            .unwrap();
        assert_relative_eq!(m.offset_seconds, 2.1, epsilon = 1e-9);
        assert!(m.score <= 1.0 + 1e-6 && m.score > 0.999, "score={}", m.score);
    }

    #[test]
    fn exact_copy_scores_one() {
        let sample: Vec<f32> = (0..64).map(|i| ((i * 7 % 13) as f32 - 6.0) / 6.0).collect();
        let mut long = vec![0.0f32; 256];
        long[100..164].copy_from_slice(&sample);
        let rec = SampleRecord::new("s", AudioSignal::new(sample.clone(), 1_000));
        let chunk = Chunk {
            index: 0,
            start_index: 50,
            end_index: 250,
            start_time: 0.05,
        };
        let m = evaluate_chunk(&TemplateCorrelator::new(&sample), &long, &chunk, rec.norm, 1_000)
            .unwrap();
        assert_relative_eq!(m.offset_seconds, 0.100, epsilon = 1e-9);
        assert!((m.score - 1.0).abs() < 1e-3, "score={}", m.score);
    }
}
