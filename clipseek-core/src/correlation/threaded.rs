//! `ThreadedBackend`: fixed-size worker pool over an up-front chunk list.
//!
//! ## Threading
//!
//! The plan is materialized before any work starts; overlapping chunks share
//! no state, so each is an independent job. Jobs go into a crossbeam channel,
//! `workers` scoped threads drain it, and local results come back on a second
//! channel in completion order. The long signal and the template correlator
//! are borrowed read-only by every worker.
//!
//! There is no cancellation: every submitted chunk runs to completion even if
//! the reducer has already seen a perfect match.

use std::ops::ControlFlow;
use std::thread;

use crossbeam_channel::unbounded;
use tracing::debug;

use super::{
    evaluate_chunk, BackendCapabilities, BackendKind, CorrelationBackend, LocalMatch, SearchJob,
};
use crate::{
    chunking::Chunk,
    dsp::xcorr::TemplateCorrelator,
    error::{ClipseekError, Result},
};

#[derive(Debug, Clone, Copy)]
pub struct ThreadedBackend {
    workers: usize,
}

impl ThreadedBackend {
    /// `workers` is clamped to at least one.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl CorrelationBackend for ThreadedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Threaded
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities { early_stop: false }
    }

    fn run(
        &mut self,
        job: &SearchJob<'_>,
        sink: &mut dyn FnMut(LocalMatch) -> ControlFlow<()>,
    ) -> Result<usize> {
        let chunks: Vec<Chunk> = job.plan.to_vec();
        if chunks.is_empty() {
            return Ok(0);
        }

        let correlator = TemplateCorrelator::new(job.sample.signal.samples());
        let long = job.long.samples();
        let sample_rate = job.long.sample_rate();
        let sample_norm = job.sample.norm;
        let pool_size = self.workers.min(chunks.len());

        debug!(
            chunks = chunks.len(),
            workers = pool_size,
            "dispatching chunks to worker pool"
        );

        let (job_tx, job_rx) = unbounded::<Chunk>();
        let (result_tx, result_rx) = unbounded::<Option<LocalMatch>>();
        for chunk in &chunks {
            // Receiver is alive in this scope; send cannot fail.
            let _ = job_tx.send(*chunk);
        }
        drop(job_tx);

        let correlator = &correlator;
        thread::scope(|scope| -> Result<usize> {
            for worker in 0..pool_size {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                thread::Builder::new()
                    .name(format!("clipseek-worker-{worker}"))
                    .spawn_scoped(scope, move || {
                        for chunk in job_rx.iter() {
                            let local =
                                evaluate_chunk(correlator, long, &chunk, sample_norm, sample_rate);
                            if result_tx.send(local).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(ClipseekError::Io)?;
            }
            drop(result_tx);

            let mut evaluated = 0usize;
            for local in result_rx.iter().flatten() {
                evaluated += 1;
                // No cancellation: the reducer's verdict is ignored.
                let _ = sink(local);
            }
            Ok(evaluated)
        })
    }
}
