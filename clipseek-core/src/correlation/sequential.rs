//! `SequentialBackend`: evaluates chunks one at a time on the calling thread,
//! in plan order, and stops as soon as the reducer breaks.

use std::ops::ControlFlow;

use tracing::debug;

use super::{
    evaluate_chunk, BackendCapabilities, BackendKind, CorrelationBackend, LocalMatch, SearchJob,
};
use crate::{dsp::xcorr::TemplateCorrelator, error::Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialBackend;

impl SequentialBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CorrelationBackend for SequentialBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sequential
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities { early_stop: true }
    }

    fn run(
        &mut self,
        job: &SearchJob<'_>,
        sink: &mut dyn FnMut(LocalMatch) -> ControlFlow<()>,
    ) -> Result<usize> {
        let correlator = TemplateCorrelator::new(job.sample.signal.samples());
        let long = job.long.samples();
        let sample_rate = job.long.sample_rate();

        let mut evaluated = 0usize;
        for chunk in job.plan {
            let Some(local) =
                evaluate_chunk(&correlator, long, &chunk, job.sample.norm, sample_rate)
            else {
                continue;
            };
            evaluated += 1;
            debug!(
                chunk = chunk.index,
                score = local.score,
                offset = local.offset_seconds,
                "chunk evaluated"
            );
            if sink(local).is_break() {
                debug!(chunk = chunk.index, "early stop");
                break;
            }
        }
        Ok(evaluated)
    }
}
