//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! The search runs at one fixed rate (44.1 kHz by default). The ffmpeg
//! decoder resamples on its own; WAV files read natively may be at any rate,
//! so `RateConverter` bridges that gap before normalization.
//!
//! When source rate == target rate, `RateConverter` is a passthrough and no
//! rubato session is created at all.
//!
//! ## Usage
//!
//! ```ignore
//! let out = resample(&samples, 48_000, 44_100)?;
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{ClipseekError, Result};

/// Input frame count per rubato call.
pub const DEFAULT_CHUNK: usize = 1024;

/// Converts f32 mono audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == target rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Accumulation buffer, holds partial input chunks between calls.
    input_buf: Vec<f32>,
    /// How many input samples rubato expects per process call.
    chunk_size: usize,
    /// Pre-allocated output buffer: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a new converter.
    ///
    /// # Errors
    /// Returns `ClipseekError::Resample` if rubato fails to initialise.
    pub fn new(source_rate: u32, target_rate: u32, chunk_size: usize) -> Result<Self> {
        if source_rate == target_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }
        if source_rate == 0 || target_rate == 0 {
            return Err(ClipseekError::Resample(format!(
                "cannot convert {source_rate} Hz to {target_rate} Hz"
            )));
        }

        let ratio = target_rate as f64 / source_rate as f64;

        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio, no dynamic adjustment
            PolynomialDegree::Cubic,
            chunk_size,
            1, // mono
        )
        .map_err(|e| ClipseekError::Resample(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let output_buf = vec![vec![0f32; max_out]; 1];

        tracing::debug!(source_rate, target_rate, chunk_size, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Process incoming samples, returning resampled output (may be empty).
    ///
    /// Samples are accumulated internally until a full `chunk_size` block is
    /// available for rubato. Any remainder is kept for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let Some(ref mut resampler) = self.resampler else {
            return Ok(samples.to_vec());
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let input_slice = &self.input_buf[..self.chunk_size];
            let (_consumed, produced) = resampler
                .process_into_buffer(&[input_slice], &mut self.output_buf, None)
                .map_err(|e| ClipseekError::Resample(e.to_string()))?;
            result.extend_from_slice(&self.output_buf[0][..produced]);
            self.input_buf.drain(..self.chunk_size);
        }

        Ok(result)
    }

    /// Output frames the resampler lags behind its input.
    pub fn output_delay(&self) -> usize {
        self.resampler.as_ref().map_or(0, |r| r.output_delay())
    }

    /// Returns `true` when source rate == target rate (no resampling occurs).
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

/// Resample a whole signal, compensating for the resampler delay so the
/// output is time-aligned with the input and has `round(len * ratio)` frames.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Result<Vec<f32>> {
    let mut rc = RateConverter::new(source_rate, target_rate, DEFAULT_CHUNK)?;
    if rc.is_passthrough() {
        return Ok(samples.to_vec());
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = rc.output_delay();

    let mut out = rc.process(samples)?;
    // Flush with silence until the delayed tail has been produced.
    let silence = vec![0f32; DEFAULT_CHUNK];
    while out.len() < expected + delay {
        let more = rc.process(&silence)?;
        if more.is_empty() && rc.input_buf.is_empty() {
            break;
        }
        out.extend(more);
    }

    let end = (delay + expected).min(out.len());
    Ok(out.get(delay..end).map(<[f32]>::to_vec).unwrap_or_default())
}
