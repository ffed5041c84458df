//! `BatchMatcher`: every sample in a database against one long signal.
//!
//! ## Residency
//!
//! ```text
//! run()
//!  ├─ DeviceBackend::bind(long)       ── 1 upload, resident until run() returns
//!  ├─ for record in records (database order):
//!  │    search(long, record)          ── 1 upload per sample, freed after it
//!  ├─ device.synchronize()            ── barrier before reporting
//!  └─ sort entries by sample name
//! ```
//!
//! Samples are always searched in full; there is no early stop across or
//! within samples on the device backend.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, info_span};

use super::{MatchConfig, MatchResult, SearchController, SearchStats};
use crate::{
    audio::{AudioSignal, SampleRecord},
    correlation::DeviceBackend,
    device::{ComputeDevice, DeviceCountersSnapshot},
    error::{ClipseekError, Result},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub sample_name: String,
    pub result: MatchResult,
    pub stats: SearchStats,
}

/// Name-sorted results of one batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub entries: Vec<BatchEntry>,
    pub elapsed: Duration,
    /// Uploads performed during this run only.
    pub uploads: u64,
    pub bytes_uploaded: u64,
}

impl BatchResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, sample_name: &str) -> Option<&BatchEntry> {
        self.entries.iter().find(|e| e.sample_name == sample_name)
    }
}

pub struct BatchMatcher {
    config: MatchConfig,
    device: ComputeDevice,
}

impl BatchMatcher {
    /// # Errors
    /// `ClipseekError::Config` for invalid settings.
    pub fn new(config: MatchConfig, device: ComputeDevice) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, device })
    }

    /// Like [`BatchMatcher::new`] with a freshly opened device.
    pub fn open(config: MatchConfig) -> Result<Self> {
        let device = ComputeDevice::open()?;
        Self::new(config, device)
    }

    pub fn device(&self) -> &ComputeDevice {
        &self.device
    }

    /// Search every record against `long`.
    ///
    /// # Errors
    /// `ClipseekError::Config` before any work if a signal is at the wrong
    /// rate; the first device fault aborts the run.
    pub fn run(&self, long: &AudioSignal, records: &[SampleRecord]) -> Result<BatchResult> {
        let rate = self.config.sample_rate;
        if long.sample_rate() != rate {
            return Err(ClipseekError::Config(format!(
                "long signal is at {} Hz but the batch runs at {rate} Hz",
                long.sample_rate()
            )));
        }
        if let Some(bad) = records.iter().find(|r| r.signal.sample_rate() != rate) {
            return Err(ClipseekError::Config(format!(
                "sample {} is at {} Hz but the batch runs at {rate} Hz",
                bad.name,
                bad.signal.sample_rate()
            )));
        }

        info!(
            samples = records.len(),
            long_seconds = long.duration_secs(),
            "batch started"
        );
        let started = Instant::now();
        let before = self.device.counters();

        let backend = DeviceBackend::bind(self.device.clone(), long)?;
        let mut controller =
            SearchController::with_backend(self.config.clone(), Box::new(backend))?;

        let mut entries = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let span = info_span!("batch_entry", index = i + 1, sample = %record.name);
            let _enter = span.enter();
            let outcome = controller.search(long, record)?;
            entries.push(BatchEntry {
                sample_name: record.name.clone(),
                result: outcome.result,
                stats: outcome.stats,
            });
        }

        self.device.synchronize()?;
        // Releases the resident long signal.
        drop(controller);

        entries.sort_by(|a, b| a.sample_name.cmp(&b.sample_name));
        let after = self.device.counters();
        let elapsed = started.elapsed();
        info!(
            samples = entries.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "batch complete"
        );

        Ok(BatchResult {
            entries,
            elapsed,
            uploads: after.uploads - before.uploads,
            bytes_uploaded: after.bytes_uploaded - before.bytes_uploaded,
        })
    }

    pub fn counters(&self) -> DeviceCountersSnapshot {
        self.device.counters()
    }
}
