//! Decoded audio signals and the sample records searched against them.
//!
//! Every signal entering the search is mono f32 at a single fixed sample rate
//! and has been peak-normalized. Nothing downstream mutates a signal after
//! normalization; the search components only ever borrow it.

pub mod decode;
pub mod resample;

use std::sync::Arc;

/// Added to the peak before dividing so silent input stays silent instead of
/// becoming NaN.
pub const NORMALIZE_EPS: f32 = 1e-12;

/// Scale `samples` in place so the largest absolute value is ~1.0.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    let scale = 1.0 / (peak + NORMALIZE_EPS);
    for s in samples.iter_mut() {
        *s *= scale;
    }
}

/// Immutable mono signal at a known sample rate. Clones share the samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSignal {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl AudioSignal {
    /// Wrap samples as-is. Use [`AudioSignal::normalized`] for raw decoder output.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Peak-normalize `samples` and wrap them.
    pub fn normalized(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        normalize_peak(&mut samples);
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// True when both signals share one sample buffer.
    pub fn shares_samples(&self, other: &AudioSignal) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Euclidean norm, accumulated in f64.
    pub fn norm(&self) -> f64 {
        self.samples
            .iter()
            .map(|&s| f64::from(s) * f64::from(s))
            .sum::<f64>()
            .sqrt()
    }

    /// Largest absolute sample value.
    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
    }
}

/// A named sample with its norm computed once and reused for every chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub name: String,
    pub signal: AudioSignal,
    pub norm: f64,
}

impl SampleRecord {
    /// Build a record from an already-normalized signal.
    pub fn new(name: impl Into<String>, signal: AudioSignal) -> Self {
        let norm = signal.norm();
        Self {
            name: name.into(),
            signal,
            norm,
        }
    }

    /// Rebuild a record from persisted parts without recomputing the norm.
    pub fn from_parts(name: impl Into<String>, signal: AudioSignal, norm: f64) -> Self {
        Self {
            name: name.into(),
            signal,
            norm,
        }
    }

    pub fn len(&self) -> usize {
        self.signal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signal.is_empty()
    }
}
