//! # clipseek-core
//!
//! Locate short audio samples inside a long recording.
//!
//! ## Architecture
//!
//! ```text
//! Decoder ──► AudioSignal (mono f32, fixed rate, peak-normalized)
//!                 │
//!            ChunkPlan (overlapping windows, lazy)
//!                 │
//!   CorrelationBackend::run ── sequential | threaded | device
//!                 │  LocalMatch per chunk
//!            SearchController (max-reduce, early stop)
//!                 │
//!            MatchResult { score, offset, confidence }
//! ```
//!
//! `BatchMatcher` runs every record of a [`store::SampleDatabase`] against
//! one long signal with the long signal held resident on a compute device.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod chunking;
pub mod clips;
pub mod correlation;
pub mod device;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod report;
pub mod store;

// Convenience re-exports for downstream crates
pub use audio::decode::{AutoDecoder, Decoder, FfmpegDecoder, WavDecoder};
pub use audio::{AudioSignal, SampleRecord};
pub use chunking::{Chunk, ChunkPlan};
pub use clips::{plan_clips, ClipExtractor, ClipManifest, ClipSpec};
pub use correlation::{BackendCapabilities, BackendKind, CorrelationBackend, LocalMatch};
pub use device::ComputeDevice;
pub use engine::batch::{BatchEntry, BatchMatcher, BatchResult};
pub use engine::{MatchConfig, MatchResult, SearchController, SearchOutcome, SearchStats};
pub use error::ClipseekError;
pub use report::{BatchReport, MatchReport};
pub use store::SampleDatabase;
