//! Splits a long signal into overlapping, fixed-duration search windows.
//!
//! Start times run `0, step, 2·step, …` with `step = chunk_duration − overlap`
//! while `start < total_duration − chunk_duration`. Each start time maps to
//! the index range `[floor(start·sr), floor(start·sr) + chunk_samples)`,
//! clipped to the signal end. The first window shorter than the sample ends
//! the plan; short windows are never padded.
//!
//! A plan is a plain value: iterating it is lazy and every call to
//! [`ChunkPlan::iter`] starts over from the first chunk.

use serde::Serialize;

use crate::error::{ClipseekError, Result};

/// One search window over the long signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Chunk {
    /// Position of this chunk in the plan.
    pub index: usize,
    /// First sample (inclusive).
    pub start_index: usize,
    /// One past the last sample.
    pub end_index: usize,
    /// `start_index / sample_rate`.
    pub start_time: f64,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.end_index == self.start_index
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.start_index..self.end_index
    }
}

/// Chunk layout for one long/sample pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    sample_rate: u32,
    chunk_duration: f64,
    step: f64,
    chunk_samples: usize,
    signal_len: usize,
    sample_len: usize,
}

impl ChunkPlan {
    /// # Errors
    /// `ClipseekError::Config` when the step would not advance or a chunk
    /// would hold no samples.
    pub fn new(
        sample_rate: u32,
        chunk_duration: f64,
        overlap: f64,
        signal_len: usize,
        sample_len: usize,
    ) -> Result<Self> {
        let step = chunk_duration - overlap;
        if !(step.is_finite() && step > 0.0) {
            return Err(ClipseekError::Config(format!(
                "chunk step must be positive (chunk {chunk_duration}s, overlap {overlap}s)"
            )));
        }
        let chunk_samples = (chunk_duration * sample_rate as f64) as usize;
        if chunk_samples == 0 {
            return Err(ClipseekError::Config(format!(
                "chunk of {chunk_duration}s holds no samples at {sample_rate} Hz"
            )));
        }
        Ok(Self {
            sample_rate,
            chunk_duration,
            step,
            chunk_samples,
            signal_len,
            sample_len,
        })
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    pub fn sample_len(&self) -> usize {
        self.sample_len
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_duration(&self) -> f64 {
        self.signal_len as f64 / self.sample_rate as f64
    }

    pub fn iter(&self) -> ChunkIter<'_> {
        ChunkIter {
            plan: self,
            next: 0,
            done: false,
        }
    }

    /// Materialize every chunk up front.
    pub fn to_vec(&self) -> Vec<Chunk> {
        self.iter().collect()
    }

    /// Chunk count without keeping the chunks.
    pub fn count(&self) -> usize {
        self.iter().count()
    }
}

impl<'a> IntoIterator for &'a ChunkPlan {
    type Item = Chunk;
    type IntoIter = ChunkIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Lazy iterator over a [`ChunkPlan`].
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    plan: &'a ChunkPlan,
    next: usize,
    done: bool,
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let plan = self.plan;
        // Multiply rather than accumulate so start times do not drift.
        let start = self.next as f64 * plan.step;
        if start >= plan.total_duration() - plan.chunk_duration {
            self.done = true;
            return None;
        }

        let start_index = (start * plan.sample_rate as f64) as usize;
        let end_index = (start_index + plan.chunk_samples).min(plan.signal_len);
        if end_index.saturating_sub(start_index) < plan.sample_len {
            self.done = true;
            return None;
        }

        let chunk = Chunk {
            index: self.next,
            start_index,
            end_index,
            start_time: start_index as f64 / plan.sample_rate as f64,
        };
        self.next += 1;
        Some(chunk)
    }
}

impl std::iter::FusedIterator for ChunkIter<'_> {}
