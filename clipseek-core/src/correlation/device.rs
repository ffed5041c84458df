//! `DeviceBackend`: runs every chunk kernel on a [`ComputeDevice`].
//!
//! The long signal is uploaded once and stays resident for as long as the
//! backend is bound to it; a batch reuses one backend for every sample, so
//! the per-sample transfer is just the sample itself. The sample buffer is
//! scoped to one `run` and freed when it returns.
//!
//! Kernels are queued in chunk order without waiting; a single barrier
//! precedes the readback. Every chunk is always evaluated.

use std::ops::ControlFlow;

use tracing::{debug, info};

use super::{BackendCapabilities, BackendKind, CorrelationBackend, LocalMatch, SearchJob};
use crate::{
    audio::AudioSignal,
    device::{ComputeDevice, DeviceBuffer},
    error::{ClipseekError, Result},
};

/// Long signal held in device memory plus the host signal it was uploaded
/// from. The host handle shares its samples with the caller's signal.
struct ResidentSignal {
    buffer: DeviceBuffer,
    host: AudioSignal,
}

impl ResidentSignal {
    fn holds(&self, signal: &AudioSignal) -> bool {
        self.host.shares_samples(signal) || self.host == *signal
    }
}

pub struct DeviceBackend {
    device: ComputeDevice,
    resident: Option<ResidentSignal>,
}

impl DeviceBackend {
    /// Backend with nothing resident; the first `run` uploads its long signal.
    pub fn new(device: ComputeDevice) -> Self {
        Self {
            device,
            resident: None,
        }
    }

    /// Backend with `long` already resident.
    pub fn bind(device: ComputeDevice, long: &AudioSignal) -> Result<Self> {
        let mut backend = Self::new(device);
        backend.make_resident(long)?;
        Ok(backend)
    }

    pub fn device(&self) -> &ComputeDevice {
        &self.device
    }

    /// Upload `long` unless it is already the resident signal.
    fn make_resident(&mut self, long: &AudioSignal) -> Result<()> {
        if self.resident.as_ref().is_some_and(|r| r.holds(long)) {
            return Ok(());
        }
        // Replacing the resident drops (frees) the previous upload.
        self.resident = None;
        let buffer = self.device.upload(long.samples())?;
        info!(
            samples = long.len(),
            seconds = long.duration_secs(),
            "long signal resident on device"
        );
        self.resident = Some(ResidentSignal {
            buffer,
            host: long.clone(),
        });
        Ok(())
    }
}

impl CorrelationBackend for DeviceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities { early_stop: false }
    }

    fn run(
        &mut self,
        job: &SearchJob<'_>,
        sink: &mut dyn FnMut(LocalMatch) -> ControlFlow<()>,
    ) -> Result<usize> {
        let sample_rate = job.long.sample_rate();
        self.make_resident(job.long)?;
        let device = self.device.clone();
        let Some(long_buf) = self.resident.as_ref().map(|r| &r.buffer) else {
            return Err(ClipseekError::Device("long signal is not resident".into()));
        };

        let sample_buf = device.upload(job.sample.signal.samples())?;
        let mut queued = 0usize;
        for chunk in job.plan {
            device.enqueue_correlate(long_buf, &sample_buf, job.sample.norm, chunk, sample_rate)?;
            queued += 1;
        }

        if let Err(e) = device.synchronize() {
            // Discard whatever the faulted run left behind.
            let _ = device.read_results();
            return Err(e);
        }
        let mut results = device.read_results()?;
        drop(sample_buf);
        debug!(queued, returned = results.len(), "device readback");

        results.sort_by_key(|m| m.chunk_index);
        let evaluated = results.len();
        for local in results {
            // No cancellation: every kernel has already run.
            let _ = sink(local);
        }
        Ok(evaluated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{audio::SampleRecord, chunking::ChunkPlan};

    fn run_once(backend: &mut DeviceBackend, long: &AudioSignal, sample: &SampleRecord) {
        let plan = ChunkPlan::new(8_000, 0.05, 0.0125, long.len(), sample.len()).unwrap();
        let job = SearchJob {
            long,
            sample,
            plan: &plan,
        };
        let evaluated = backend
            .run(&job, &mut |_| ControlFlow::Continue(()))
            .unwrap();
        assert!(evaluated > 0);
    }

    #[test]
    fn resident_signal_is_reused_for_equal_content() {
        let device = ComputeDevice::open().unwrap();
        let samples: Vec<f32> = (0..2_000).map(|i| (i as f32 * 0.01).sin()).collect();
        let long = AudioSignal::new(samples.clone(), 8_000);
        let clip = AudioSignal::new(samples[300..400].to_vec(), 8_000);
        let sample = SampleRecord::new("s", clip);

        let mut backend = DeviceBackend::bind(device.clone(), &long).unwrap();
        run_once(&mut backend, &long, &sample);
        run_once(&mut backend, &long.clone(), &sample);
        // Separate allocation, same content.
        run_once(&mut backend, &AudioSignal::new(samples, 8_000), &sample);
        // One long upload plus one per run for the sample.
        assert_eq!(device.counters().uploads, 4);
    }

    #[test]
    fn different_signal_of_same_length_is_uploaded() {
        let device = ComputeDevice::open().unwrap();
        let a: Vec<f32> = (0..2_000).map(|i| (i as f32 * 0.01).sin()).collect();
        let mut b = a.clone();
        b[1_999] = -b[1_999] + 0.5;
        let first = AudioSignal::new(a.clone(), 8_000);
        let second = AudioSignal::new(b, 8_000);
        let clip = AudioSignal::new(a[300..400].to_vec(), 8_000);
        let sample = SampleRecord::new("s", clip);

        let mut backend = DeviceBackend::new(device.clone());
        run_once(&mut backend, &first, &sample);
        run_once(&mut backend, &second, &sample);
        run_once(&mut backend, &AudioSignal::new(a, 16_000), &sample);
        // Every run re-uploads the long signal and uploads the sample.
        assert_eq!(device.counters().uploads, 6);
    }
}
