//! `SearchController`: drives the chunk plan through a correlation backend
//! and reduces local matches to the best one.
//!
//! ## Reduction
//!
//! ```text
//! best = (score −1.0, offset 0.0)
//! for each LocalMatch m (in whatever order the backend delivers):
//!     if m.score > best.score (or equal with an earlier offset): best = m
//!     if backend.early_stop && best.score ≥ stop_confidence: Break
//! confidence_percent = min(best.score·100, 100)
//! ```
//!
//! The max is commutative, and ties go to the earlier offset, so completion
//! order in the parallel backends cannot change the answer. Only the
//! sequential backend honours the break; the others always evaluate every
//! chunk. `SearchStats` records the difference.

pub mod batch;

use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::{
    audio::{AudioSignal, SampleRecord},
    chunking::ChunkPlan,
    correlation::{
        BackendCapabilities, BackendKind, CorrelationBackend, DeviceBackend, LocalMatch,
        SearchJob, SequentialBackend, ThreadedBackend,
    },
    device::ComputeDevice,
    error::{ClipseekError, Result},
};

/// Score before any chunk has been evaluated.
pub const NO_MATCH_SCORE: f64 = -1.0;

/// Configuration for a search run. Validated once, before any work starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConfig {
    /// Rate every signal must be decoded at (Hz). Default: 44100.
    pub sample_rate: u32,
    /// Length of each search window (seconds). Default: 120.
    pub chunk_duration: f64,
    /// Overlap between consecutive windows (seconds). Must be smaller than
    /// `chunk_duration` and should be at least the sample length so no
    /// alignment straddles a window boundary unseen. Default: 5.
    pub overlap: f64,
    /// Sequential backend only: stop once the best score reaches this.
    /// Anything above ~1.0 disables early stop. Default: 0.99.
    pub stop_confidence: f64,
    /// Threaded backend only: worker pool size. Default: available cores.
    pub workers: usize,
    /// Execution strategy. Default: sequential.
    pub backend: BackendKind,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            chunk_duration: 120.0,
            overlap: 5.0,
            stop_confidence: 0.99,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            backend: BackendKind::Sequential,
        }
    }
}

impl MatchConfig {
    /// # Errors
    /// `ClipseekError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ClipseekError::Config("sample rate must be positive".into()));
        }
        if !(self.chunk_duration.is_finite() && self.chunk_duration > 0.0) {
            return Err(ClipseekError::Config(format!(
                "chunk duration must be a positive number of seconds, got {}",
                self.chunk_duration
            )));
        }
        if !(self.overlap.is_finite() && self.overlap >= 0.0) {
            return Err(ClipseekError::Config(format!(
                "overlap must be a non-negative number of seconds, got {}",
                self.overlap
            )));
        }
        if self.overlap >= self.chunk_duration {
            return Err(ClipseekError::Config(format!(
                "overlap ({}s) must be shorter than the chunk ({}s)",
                self.overlap, self.chunk_duration
            )));
        }
        if (self.chunk_duration * self.sample_rate as f64) < 1.0 {
            return Err(ClipseekError::Config(format!(
                "chunk of {}s holds no samples at {} Hz",
                self.chunk_duration, self.sample_rate
            )));
        }
        if !self.stop_confidence.is_finite() {
            return Err(ClipseekError::Config(
                "stop confidence must be a finite number".into(),
            ));
        }
        if self.workers == 0 {
            return Err(ClipseekError::Config("worker count must be at least 1".into()));
        }
        Ok(())
    }

    /// Seconds between consecutive chunk starts.
    pub fn step(&self) -> f64 {
        self.chunk_duration - self.overlap
    }
}

/// Final answer for one long/sample pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// Normalized correlation. Not clamped; may slightly exceed 1.0.
    pub score: f64,
    pub offset_seconds: f64,
    /// `min(score·100, 100)`.
    pub confidence_percent: f64,
}

impl MatchResult {
    pub fn new(score: f64, offset_seconds: f64) -> Self {
        Self {
            score,
            offset_seconds,
            confidence_percent: (score * 100.0).min(100.0),
        }
    }

    /// Result of a search that evaluated no chunks.
    pub fn not_found() -> Self {
        Self::new(NO_MATCH_SCORE, 0.0)
    }

    /// False when no chunk was ever evaluated.
    pub fn is_found(&self) -> bool {
        self.score > NO_MATCH_SCORE
    }
}

/// How much work a search did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchStats {
    pub backend: BackendKind,
    pub chunks_planned: usize,
    pub chunks_evaluated: usize,
    pub early_stopped: bool,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOutcome {
    pub result: MatchResult,
    pub stats: SearchStats,
}

/// Running best used by the reducer.
#[derive(Debug, Clone, Copy)]
struct Best {
    score: f64,
    offset: f64,
}

impl Best {
    fn new() -> Self {
        Self {
            score: NO_MATCH_SCORE,
            offset: 0.0,
        }
    }

    fn offer(&mut self, m: &LocalMatch) {
        let better = m.score > self.score
            || (m.score == self.score && m.offset_seconds < self.offset);
        if better {
            self.score = m.score;
            self.offset = m.offset_seconds;
        }
    }
}

/// Runs searches with one backend under one configuration.
pub struct SearchController {
    config: MatchConfig,
    backend: Box<dyn CorrelationBackend>,
}

impl SearchController {
    /// Validate `config` and build the backend it names. The device backend
    /// opens its own [`ComputeDevice`].
    ///
    /// # Errors
    /// `ClipseekError::Config` for invalid settings, `ClipseekError::Device`
    /// if the device cannot start.
    pub fn new(config: MatchConfig) -> Result<Self> {
        config.validate()?;
        let backend: Box<dyn CorrelationBackend> = match config.backend {
            BackendKind::Sequential => Box::new(SequentialBackend::new()),
            BackendKind::Threaded => Box::new(ThreadedBackend::new(config.workers)),
            BackendKind::Device => Box::new(DeviceBackend::new(ComputeDevice::open()?)),
        };
        Ok(Self { config, backend })
    }

    /// Use a caller-supplied backend; `config.backend` is ignored.
    pub fn with_backend(config: MatchConfig, backend: Box<dyn CorrelationBackend>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, backend })
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        self.backend.capabilities()
    }

    /// Locate `sample` inside `long`.
    ///
    /// A long signal shorter than one chunk, or a sample longer than a
    /// chunk, is not an error: no chunks are planned and the result reports
    /// no match.
    ///
    /// # Errors
    /// `ClipseekError::Config` if either signal is at a different rate than
    /// configured; backend errors are passed through.
    pub fn search(&mut self, long: &AudioSignal, sample: &SampleRecord) -> Result<SearchOutcome> {
        let cfg = &self.config;
        for (what, rate) in [
            ("long signal", long.sample_rate()),
            ("sample", sample.signal.sample_rate()),
        ] {
            if rate != cfg.sample_rate {
                return Err(ClipseekError::Config(format!(
                    "{what} is at {rate} Hz but the search runs at {} Hz",
                    cfg.sample_rate
                )));
            }
        }

        let plan = ChunkPlan::new(
            cfg.sample_rate,
            cfg.chunk_duration,
            cfg.overlap,
            long.len(),
            sample.len(),
        )?;
        let chunks_planned = plan.count();
        let backend_kind = self.backend.kind();
        let early_stop = self.backend.capabilities().early_stop;
        let stop_confidence = cfg.stop_confidence;

        let span = info_span!("search", sample = %sample.name, backend = %backend_kind);
        let _enter = span.enter();
        debug!(
            chunks = chunks_planned,
            long_seconds = long.duration_secs(),
            sample_seconds = sample.signal.duration_secs(),
            "search started"
        );

        let started = Instant::now();
        let mut best = Best::new();
        let mut early_stopped = false;
        let job = SearchJob {
            long,
            sample,
            plan: &plan,
        };
        let chunks_evaluated = self.backend.run(&job, &mut |local: LocalMatch| {
            best.offer(&local);
            if early_stop && best.score >= stop_confidence {
                early_stopped = true;
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        let elapsed = started.elapsed();

        let result = MatchResult::new(best.score, best.offset);
        info!(
            offset = result.offset_seconds,
            confidence = result.confidence_percent,
            evaluated = chunks_evaluated,
            planned = chunks_planned,
            early_stopped,
            elapsed_ms = elapsed.as_millis() as u64,
            "search finished"
        );

        Ok(SearchOutcome {
            result,
            stats: SearchStats {
                backend: backend_kind,
                chunks_planned,
                chunks_evaluated,
                early_stopped,
                elapsed,
            },
        })
    }
}

impl std::fmt::Debug for SearchController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchController")
            .field("config", &self.config)
            .field("backend", &self.backend.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        MatchConfig::default().validate().unwrap();
    }

    #[test]
    fn overlap_not_shorter_than_chunk_is_rejected() {
        let mut cfg = MatchConfig::default();
        cfg.overlap = cfg.chunk_duration;
        assert!(matches!(cfg.validate(), Err(ClipseekError::Config(_))));
        cfg.overlap = cfg.chunk_duration + 1.0;
        assert!(SearchController::new(cfg).is_err());
    }

    #[test]
    fn nonsense_values_are_rejected() {
        let base = MatchConfig::default();
        let cases = [
            MatchConfig {
                sample_rate: 0,
                ..base.clone()
            },
            MatchConfig {
                chunk_duration: f64::NAN,
                ..base.clone()
            },
            MatchConfig {
                chunk_duration: -3.0,
                ..base.clone()
            },
            MatchConfig {
                overlap: -1.0,
                ..base.clone()
            },
            MatchConfig {
                workers: 0,
                ..base.clone()
            },
            MatchConfig {
                stop_confidence: f64::INFINITY,
                ..base.clone()
            },
        ];
        for cfg in cases {
            assert!(cfg.validate().is_err(), "{cfg:?} should be rejected");
        }
    }

    #[test]
    fn confidence_is_clamped_only_for_reporting() {
        let r = MatchResult::new(1.0004, 12.5);
        assert_eq!(r.score, 1.0004);
        assert_eq!(r.confidence_percent, 100.0);
        assert!(MatchResult::new(0.42, 0.0).confidence_percent < 42.0 + 1e-9);
    }

    #[test]
    fn not_found_keeps_sentinel() {
        let r = MatchResult::not_found();
        assert_eq!(r.score, NO_MATCH_SCORE);
        assert!(!r.is_found());
    }

    #[test]
    fn ties_prefer_earlier_offset() {
        let mut best = Best::new();
        best.offer(&LocalMatch {
            chunk_index: 3,
            score: 0.5,
            offset_seconds: 9.0,
        });
        best.offer(&LocalMatch {
            chunk_index: 1,
            score: 0.5,
            offset_seconds: 2.0,
        });
        best.offer(&LocalMatch {
            chunk_index: 2,
            score: 0.4,
            offset_seconds: 1.0,
        });
        assert_eq!(best.offset, 2.0);
    }

    #[test]
    fn mismatched_rate_is_config_error() {
        let mut ctl = SearchController::new(MatchConfig {
            sample_rate: 8_000,
            chunk_duration: 1.0,
            overlap: 0.5,
            ..MatchConfig::default()
        })
        .unwrap();
        let long = AudioSignal::new(vec![0.0; 16_000], 16_000);
        let sample = SampleRecord::new("s", AudioSignal::new(vec![0.0; 100], 8_000));
        assert!(matches!(ctl.search(&long, &sample), Err(ClipseekError::Config(_))));
    }
}
