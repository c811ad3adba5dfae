//! The host driver: a CPU "device" with its own memory and an asynchronous stream.
//!
//! Device memory is allocated separately from the caller's host regions, so every transfer
//! is a real copy. Operations run on a dedicated worker thread in submission order; the
//! worker publishes progress through a [`CpuTimelineSignal`] and records failures by
//! sequence number so they surface when the corresponding event is waited on.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use snafu::ensure;
use tessel_dtype::{DeviceClass, ScalarValue};

use crate::driver::{DeviceEvent, Function, LaunchArg, Module};
use crate::error::{DriverStatus, Error, Result, SizeMismatchSnafu, StreamClosedSnafu};
use crate::info::DeviceInfo;
use crate::memory::{AlignedBytes, DeviceMemory, Lease, SharedBytes};
use crate::queue::{EventStatus, WorkSize};
use crate::registry::{HostKernel, HostKernelRegistry, HostLaunch, HostSlot};
use crate::source::scan_entry_points;
use crate::sync::{CpuTimelineSignal, TimelineSignal};

/// Limits the host driver enforces and reports as its device info.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    pub compute_units: u32,
    pub global_mem_size: u64,
    pub local_mem_size: u64,
    pub max_alloc_size: u64,
    pub max_work_group_size: usize,
}

impl Default for HostOptions {
    fn default() -> Self {
        let compute_units = std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(1);
        Self {
            compute_units,
            global_mem_size: 1 << 30,
            local_mem_size: 32 << 10,
            max_alloc_size: 256 << 20,
            max_work_group_size: 1024,
        }
    }
}

pub(crate) enum HostArg {
    Scalar(ScalarValue),
    Memory(SharedBytes),
}

pub(crate) enum HostOp {
    Copy { dst: SharedBytes, src: SharedBytes },
    Launch { name: Arc<str>, kernel: HostKernel, args: SmallVec<[HostArg; 8]>, work: WorkSize },
    Marker { stamp: Arc<OnceLock<Instant>> },
    /// A launch rejected at enqueue time; fails in stream order.
    Fail { status: DriverStatus, message: String },
}

impl HostOp {
    fn execute(self) -> Result<()> {
        match self {
            HostOp::Copy { dst, src } => {
                let src = src.lock();
                let mut dst = dst.lock();
                let (expected, actual) = (dst.len(), src.len());
                ensure!(expected == actual, SizeMismatchSnafu { expected, actual });
                dst.as_bytes_mut().copy_from_slice(src.as_bytes());
                Ok(())
            }
            HostOp::Launch { name, kernel, args, work } => {
                let mut unique: SmallVec<[&SharedBytes; 8]> = SmallVec::new();
                let slots = args
                    .iter()
                    .map(|arg| match arg {
                        HostArg::Scalar(value) => HostSlot::Scalar(*value),
                        HostArg::Memory(bytes) => {
                            let index = match unique.iter().position(|seen| Arc::ptr_eq(seen, bytes)) {
                                Some(index) => index,
                                None => {
                                    unique.push(bytes);
                                    unique.len() - 1
                                }
                            };
                            HostSlot::Memory(index)
                        }
                    })
                    .collect();
                let memory = unique.iter().map(|bytes| bytes.lock()).collect();

                let mut launch = HostLaunch { name: &name, work, slots, memory };
                match catch_unwind(AssertUnwindSafe(|| kernel.call(&mut launch))) {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(message)) => Err(Error::driver(DriverStatus::ExecStatusError, message)),
                    Err(_) => Err(Error::driver(DriverStatus::ExecStatusError, format!("kernel `{name}` panicked"))),
                }
            }
            HostOp::Marker { stamp } => {
                let _ = stamp.set(Instant::now());
                Ok(())
            }
            HostOp::Fail { status, message } => Err(Error::driver(status, message)),
        }
    }
}

#[derive(Default)]
struct StreamState {
    ops: VecDeque<(u64, HostOp)>,
    next_seq: u64,
    errors: HashMap<u64, Error>,
    shutdown: bool,
}

/// In-order operation stream drained by one worker thread.
pub(crate) struct HostStream {
    state: Mutex<StreamState>,
    ready: Condvar,
    signal: CpuTimelineSignal,
}

impl HostStream {
    fn new() -> Self {
        Self {
            state: Mutex::new(StreamState { next_seq: 1, ..StreamState::default() }),
            ready: Condvar::new(),
            signal: CpuTimelineSignal::new(),
        }
    }

    fn submit(&self, op: HostOp) -> Result<u64> {
        let mut state = self.state.lock();
        ensure!(!state.shutdown, StreamClosedSnafu);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.ops.push_back((seq, op));
        self.ready.notify_one();
        Ok(seq)
    }

    fn run(&self) {
        loop {
            let (seq, op) = {
                let mut state = self.state.lock();
                while state.ops.is_empty() && !state.shutdown {
                    self.ready.wait(&mut state);
                }
                match state.ops.pop_front() {
                    Some(next) => next,
                    None => return,
                }
            };

            if let Err(error) = op.execute() {
                self.state.lock().errors.insert(seq, error);
            }
            self.signal.set(seq);
        }
    }

    fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.ready.notify_all();
    }

    pub(crate) fn status(&self, seq: u64) -> EventStatus {
        if !self.signal.is_reached(seq) {
            EventStatus::Pending
        } else if self.state.lock().errors.contains_key(&seq) {
            EventStatus::Error
        } else {
            EventStatus::Complete
        }
    }

    /// Block until `seq` ran; its failure, if any, is handed out once.
    pub(crate) fn wait(&self, seq: u64) -> Result<()> {
        self.signal.wait(seq, None)?;
        match self.state.lock().errors.remove(&seq) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Driver for the host CPU.
pub struct HostDriver {
    info: DeviceInfo,
    options: HostOptions,
    kernels: Arc<HostKernelRegistry>,
    stream: Arc<HostStream>,
    in_use: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for HostDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDriver").field("options", &self.options).field("kernels", &self.kernels.len()).finish()
    }
}

impl HostDriver {
    pub fn new(options: HostOptions, kernels: Arc<HostKernelRegistry>) -> Result<Self> {
        let stream = Arc::new(HostStream::new());
        let worker = {
            let stream = Arc::clone(&stream);
            std::thread::Builder::new()
                .name("tessel-host-stream".into())
                .spawn(move || stream.run())
                .map_err(|error| Error::driver(DriverStatus::DeviceNotAvailable, error.to_string()))?
        };

        let info = DeviceInfo {
            class: DeviceClass::Cpu,
            name: "host".into(),
            vendor: "tessel".into(),
            version: "tessel host 1.0".into(),
            driver_version: env!("CARGO_PKG_VERSION").into(),
            compute_units: options.compute_units,
            global_mem_size: options.global_mem_size,
            local_mem_size: options.local_mem_size,
            max_alloc_size: options.max_alloc_size,
            max_work_group_size: options.max_work_group_size,
        };

        tracing::debug!(compute_units = options.compute_units, "host driver started");
        Ok(Self { info, options, kernels, stream, in_use: Arc::new(AtomicU64::new(0)), worker: Some(worker) })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn kernels(&self) -> &Arc<HostKernelRegistry> {
        &self.kernels
    }

    /// Bytes currently allocated on this device.
    pub fn memory_in_use(&self) -> u64 {
        self.in_use.load(Ordering::Acquire)
    }

    /// Bind every declared entry point to its registered native implementation.
    pub fn build(&self, source: &str) -> Result<Module> {
        let build_failure = |message: String| Error::driver(DriverStatus::BuildProgramFailure, message);

        let entries = scan_entry_points(source).map_err(|diagnostic| build_failure(diagnostic.to_string()))?;
        let mut functions = HashMap::with_capacity(entries.len());
        for entry in &entries {
            let Some(kernel) = self.kernels.get(&entry.name) else {
                return Err(build_failure(format!(
                    "line {}: no host implementation registered for kernel `{}`",
                    entry.line, entry.name
                )));
            };
            if kernel.arity() != entry.arity {
                return Err(build_failure(format!(
                    "line {}: kernel `{}` declares {} parameters but its host implementation takes {}",
                    entry.line,
                    entry.name,
                    entry.arity,
                    kernel.arity()
                )));
            }
            functions.insert(entry.name.clone(), kernel);
        }

        Ok(Module::host(entries, functions))
    }

    pub fn alloc(&self, size: usize) -> Result<DeviceMemory> {
        if size == 0 || size as u64 > self.options.max_alloc_size {
            return Err(Error::driver(
                DriverStatus::InvalidBufferSize,
                format!("{size} bytes (max allocation {})", self.options.max_alloc_size),
            ));
        }
        let Some(lease) = Lease::acquire(&self.in_use, size as u64, self.options.global_mem_size) else {
            return Err(Error::driver(
                DriverStatus::MemObjectAllocationFailure,
                format!("{size} bytes requested, {} of {} in use", self.memory_in_use(), self.options.global_mem_size),
            ));
        };
        Ok(DeviceMemory::host(AlignedBytes::zeroed(size), lease))
    }

    fn host_bytes(memory: &DeviceMemory) -> Result<&SharedBytes> {
        match memory {
            DeviceMemory::Host { bytes, .. } => Ok(bytes),
            #[cfg(feature = "cuda")]
            _ => Err(Error::driver(DriverStatus::InvalidValue, "memory does not belong to the host driver")),
        }
    }

    fn event(&self, seq: u64, stamp: Option<Arc<OnceLock<Instant>>>) -> DeviceEvent {
        DeviceEvent::host(Arc::clone(&self.stream), seq, stamp)
    }

    pub fn enqueue_write(&self, dst: &DeviceMemory, src: &SharedBytes) -> Result<DeviceEvent> {
        let (expected, actual) = (dst.len(), src.lock().len());
        ensure!(expected == actual, SizeMismatchSnafu { expected, actual });

        let dst = Arc::clone(Self::host_bytes(dst)?);
        let seq = self.stream.submit(HostOp::Copy { dst, src: Arc::clone(src) })?;
        Ok(self.event(seq, None))
    }

    pub fn enqueue_read(&self, dst: &SharedBytes, src: &DeviceMemory) -> Result<DeviceEvent> {
        let (expected, actual) = (dst.lock().len(), src.len());
        ensure!(expected == actual, SizeMismatchSnafu { expected, actual });

        let src = Arc::clone(Self::host_bytes(src)?);
        let seq = self.stream.submit(HostOp::Copy { dst: Arc::clone(dst), src })?;
        Ok(self.event(seq, None))
    }

    pub fn enqueue_launch(&self, function: &Function, args: &[LaunchArg], work: &WorkSize) -> Result<DeviceEvent> {
        let kernel = function.host_kernel()?;
        if args.len() != kernel.arity() {
            return Err(Error::driver(
                DriverStatus::InvalidKernelArgs,
                format!("kernel `{}` takes {} arguments, got {}", function.name(), kernel.arity(), args.len()),
            ));
        }

        let op = match work.validate(self.options.max_work_group_size) {
            Err((status, message)) => HostOp::Fail { status, message: format!("kernel `{}`: {message}", function.name()) },
            Ok(()) => {
                let args = args
                    .iter()
                    .map(|arg| match arg {
                        LaunchArg::Scalar(value) => Ok(HostArg::Scalar(*value)),
                        LaunchArg::Memory(memory) => Self::host_bytes(memory).map(|bytes| HostArg::Memory(Arc::clone(bytes))),
                    })
                    .collect::<Result<_>>()?;
                HostOp::Launch { name: Arc::clone(function.name_arc()), kernel: kernel.clone(), args, work: work.clone() }
            }
        };

        let seq = self.stream.submit(op)?;
        Ok(self.event(seq, None))
    }

    pub fn enqueue_marker(&self) -> Result<DeviceEvent> {
        let stamp = Arc::new(OnceLock::new());
        let seq = self.stream.submit(HostOp::Marker { stamp: Arc::clone(&stamp) })?;
        Ok(self.event(seq, Some(stamp)))
    }
}

impl Drop for HostDriver {
    fn drop(&mut self) {
        self.stream.shutdown();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            tracing::error!("host stream worker panicked");
        }
    }
}
