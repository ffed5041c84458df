//! Compute device: device-resident buffers and an asynchronous command queue.
//!
//! ## Model
//!
//! ```text
//! host thread                         device thread ("clipseek-device")
//! ───────────                         ─────────────────────────────────
//! upload(data)      ──Upload──────►   buffers[id] = data
//! enqueue_correlate ──Correlate───►   evaluate chunk → results.push(..)
//! synchronize()     ──Barrier─────►   ack (all earlier commands done)
//! read_results()    ──ReadResults─►   drain results
//! DeviceBuffer drop ──Free────────►   buffers.remove(id)
//! ```
//!
//! Commands execute strictly in submission order, so a barrier acknowledges
//! only after every earlier kernel has finished. Kernel faults (bad handle,
//! out-of-range window) are sticky and reported by the next `synchronize()`,
//! the same way asynchronous GPU errors surface at the next sync point.
//!
//! Buffers are owned by RAII [`DeviceBuffer`] handles; dropping a handle
//! frees the device allocation. Dropping the last [`ComputeDevice`] clone
//! shuts the device thread down and joins it.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    chunking::Chunk,
    correlation::{evaluate_chunk, LocalMatch},
    dsp::xcorr::TemplateCorrelator,
    error::{ClipseekError, Result},
};

type BufferId = u64;

enum Command {
    Upload {
        id: BufferId,
        data: Vec<f32>,
    },
    Free {
        id: BufferId,
    },
    Correlate(CorrelateKernel),
    Barrier {
        ack: Sender<Option<String>>,
    },
    ReadResults {
        reply: Sender<Vec<LocalMatch>>,
    },
    Shutdown,
}

struct CorrelateKernel {
    signal: BufferId,
    template: BufferId,
    chunk: Chunk,
    template_norm: f64,
    sample_rate: u32,
}

/// Monotonic transfer and launch counters.
#[derive(Default)]
pub struct DeviceCounters {
    pub uploads: AtomicU64,
    pub bytes_uploaded: AtomicU64,
    pub kernels_launched: AtomicU64,
    pub synchronizations: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCountersSnapshot {
    pub uploads: u64,
    pub bytes_uploaded: u64,
    pub kernels_launched: u64,
    pub synchronizations: u64,
}

impl DeviceCounters {
    pub fn snapshot(&self) -> DeviceCountersSnapshot {
        DeviceCountersSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            kernels_launched: self.kernels_launched.load(Ordering::Relaxed),
            synchronizations: self.synchronizations.load(Ordering::Relaxed),
        }
    }
}

struct DeviceShared {
    queue: Sender<Command>,
    next_id: AtomicU64,
    counters: DeviceCounters,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        let _ = self.queue.send(Command::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!("compute device thread panicked during shutdown");
            }
        }
    }
}

/// Cloneable handle to a running compute device.
#[derive(Clone)]
pub struct ComputeDevice {
    shared: Arc<DeviceShared>,
}

impl ComputeDevice {
    /// Start the device thread.
    ///
    /// # Errors
    /// `ClipseekError::Device` if the device thread cannot be spawned.
    pub fn open() -> Result<Self> {
        let (queue, commands) = unbounded::<Command>();
        let worker = std::thread::Builder::new()
            .name("clipseek-device".into())
            .spawn(move || {
                let mut state = DeviceState::default();
                for command in commands.iter() {
                    if !state.execute(command) {
                        break;
                    }
                }
                debug!("compute device stopped");
            })
            .map_err(|e| ClipseekError::Device(format!("failed to start device thread: {e}")))?;

        info!("compute device ready");
        Ok(Self {
            shared: Arc::new(DeviceShared {
                queue,
                next_id: AtomicU64::new(1),
                counters: DeviceCounters::default(),
                worker: Mutex::new(Some(worker)),
            }),
        })
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.shared
            .queue
            .send(command)
            .map_err(|_| ClipseekError::Device("device queue closed".into()))
    }

    /// Copy `data` into device memory. Asynchronous: returns once queued.
    pub fn upload(&self, data: &[f32]) -> Result<DeviceBuffer> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.submit(Command::Upload {
            id,
            data: data.to_vec(),
        })?;
        let counters = &self.shared.counters;
        counters.uploads.fetch_add(1, Ordering::Relaxed);
        counters
            .bytes_uploaded
            .fetch_add((data.len() * std::mem::size_of::<f32>()) as u64, Ordering::Relaxed);
        Ok(DeviceBuffer {
            id,
            len: data.len(),
            queue: self.shared.queue.clone(),
        })
    }

    /// Queue one normalized-correlation kernel over `signal[chunk.range()]`.
    /// The chunk's local match is appended to the device result list.
    pub fn enqueue_correlate(
        &self,
        signal: &DeviceBuffer,
        template: &DeviceBuffer,
        template_norm: f64,
        chunk: Chunk,
        sample_rate: u32,
    ) -> Result<()> {
        self.submit(Command::Correlate(CorrelateKernel {
            signal: signal.id,
            template: template.id,
            chunk,
            template_norm,
            sample_rate,
        }))?;
        self.shared
            .counters
            .kernels_launched
            .fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Block until every previously queued command has completed.
    ///
    /// # Errors
    /// `ClipseekError::Device` carrying the first kernel fault since the last
    /// barrier, or if the device thread is gone.
    pub fn synchronize(&self) -> Result<()> {
        let (ack, done) = bounded(1);
        self.submit(Command::Barrier { ack })?;
        let fault = done
            .recv()
            .map_err(|_| ClipseekError::Device("device thread exited before barrier".into()))?;
        self.shared
            .counters
            .synchronizations
            .fetch_add(1, Ordering::Relaxed);
        match fault {
            Some(detail) => Err(ClipseekError::Device(detail)),
            None => Ok(()),
        }
    }

    /// Drain the device result list. Call after [`ComputeDevice::synchronize`].
    pub fn read_results(&self) -> Result<Vec<LocalMatch>> {
        let (reply, results) = bounded(1);
        self.submit(Command::ReadResults { reply })?;
        results
            .recv()
            .map_err(|_| ClipseekError::Device("device thread exited before readback".into()))
    }

    pub fn counters(&self) -> DeviceCountersSnapshot {
        self.shared.counters.snapshot()
    }
}

impl std::fmt::Debug for ComputeDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeDevice")
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

/// Handle to a device allocation; freed on drop.
#[derive(Debug)]
pub struct DeviceBuffer {
    id: BufferId,
    len: usize,
    queue: Sender<Command>,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        // Device already shut down means the memory is gone anyway.
        let _ = self.queue.send(Command::Free { id: self.id });
    }
}

/// Memory and scratch owned by the device thread.
#[derive(Default)]
struct DeviceState {
    buffers: HashMap<BufferId, Vec<f32>>,
    /// Template spectra cached per template buffer.
    correlators: HashMap<BufferId, TemplateCorrelator>,
    results: Vec<LocalMatch>,
    fault: Option<String>,
}

impl DeviceState {
    /// Returns `false` on shutdown.
    fn execute(&mut self, command: Command) -> bool {
        match command {
            Command::Upload { id, data } => {
                self.buffers.insert(id, data);
            }
            Command::Free { id } => {
                self.buffers.remove(&id);
                self.correlators.remove(&id);
            }
            Command::Correlate(kernel) => {
                if let Err(detail) = self.correlate(&kernel) {
                    self.fault.get_or_insert(detail);
                }
            }
            Command::Barrier { ack } => {
                let _ = ack.send(self.fault.take());
            }
            Command::ReadResults { reply } => {
                let _ = reply.send(std::mem::take(&mut self.results));
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn correlate(&mut self, kernel: &CorrelateKernel) -> std::result::Result<(), String> {
        let Self {
            buffers,
            correlators,
            results,
            ..
        } = self;

        let signal = buffers
            .get(&kernel.signal)
            .ok_or_else(|| format!("unknown signal buffer {}", kernel.signal))?;
        let template = buffers
            .get(&kernel.template)
            .ok_or_else(|| format!("unknown template buffer {}", kernel.template))?;
        let range: Range<usize> = kernel.chunk.range();
        if range.end > signal.len() {
            return Err(format!(
                "chunk {} [{}, {}) exceeds signal buffer of {} samples",
                kernel.chunk.index,
                range.start,
                range.end,
                signal.len()
            ));
        }

        let correlator = correlators
            .entry(kernel.template)
            .or_insert_with(|| TemplateCorrelator::new(template));
        if let Some(local) = evaluate_chunk(
            correlator,
            signal,
            &kernel.chunk,
            kernel.template_norm,
            kernel.sample_rate,
        ) {
            results.push(local);
        }
        Ok(())
    }
}
