//! The closed set of compute drivers and the handles they hand out.
//!
//! A backend picks one [`Driver`] at construction time. Every driver offers the same
//! operations (build, allocate, enqueue transfers, launches and markers) and the enum
//! forwards each call to the selected variant.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use smallvec::SmallVec;
use tessel_dtype::{DeviceClass, ScalarValue};

use crate::error::{DriverStatus, Error, Result};
use crate::host::{HostDriver, HostOptions, HostStream};
use crate::info::DeviceInfo;
use crate::memory::{DeviceMemory, SharedBytes};
use crate::queue::{EventStatus, WorkSize};
use crate::registry::{HostKernel, HostKernelRegistry};
use crate::source::EntryPoint;

#[cfg(feature = "cuda")]
use crate::cuda::CudaDriver;

/// A value passed to one kernel parameter at launch.
#[derive(Debug, Clone)]
pub enum LaunchArg {
    Scalar(ScalarValue),
    Memory(DeviceMemory),
}

#[derive(Debug)]
enum ModuleInner {
    Host(HashMap<String, HostKernel>),
    #[cfg(feature = "cuda")]
    Cuda(Arc<cudarc::driver::CudaModule>),
}

/// A built program: the entry points it exports plus the driver's handle to it.
#[derive(Debug)]
pub struct Module {
    entries: SmallVec<[EntryPoint; 4]>,
    inner: ModuleInner,
}

impl Module {
    pub(crate) fn host(entries: SmallVec<[EntryPoint; 4]>, functions: HashMap<String, HostKernel>) -> Self {
        Self { entries, inner: ModuleInner::Host(functions) }
    }

    #[cfg(feature = "cuda")]
    pub(crate) fn cuda(entries: SmallVec<[EntryPoint; 4]>, module: Arc<cudarc::driver::CudaModule>) -> Self {
        Self { entries, inner: ModuleInner::Cuda(module) }
    }

    pub fn entries(&self) -> &[EntryPoint] {
        &self.entries
    }

    /// Look up an exported kernel by name.
    pub fn function(&self, name: &str) -> Result<Function> {
        let Some(entry) = self.entries.iter().find(|entry| entry.name == name) else {
            return Err(Error::driver(DriverStatus::InvalidKernelName, format!("no kernel named `{name}` in module")));
        };

        let inner = match &self.inner {
            ModuleInner::Host(functions) => match functions.get(name) {
                Some(kernel) => FunctionInner::Host(kernel.clone()),
                None => {
                    return Err(Error::driver(DriverStatus::InvalidKernelName, format!("`{name}` has no host implementation")));
                }
            },
            #[cfg(feature = "cuda")]
            ModuleInner::Cuda(module) => FunctionInner::Cuda(crate::cuda::load_function(module, name)?),
        };

        Ok(Function { name: Arc::from(name), arity: entry.arity, inner })
    }
}

#[derive(Debug, Clone)]
enum FunctionInner {
    Host(HostKernel),
    #[cfg(feature = "cuda")]
    Cuda(cudarc::driver::CudaFunction),
}

/// A launchable kernel entry point resolved from a [`Module`].
#[derive(Debug, Clone)]
pub struct Function {
    name: Arc<str>,
    arity: usize,
    inner: FunctionInner,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Number of parameters in the kernel signature.
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub(crate) fn host_kernel(&self) -> Result<&HostKernel> {
        match &self.inner {
            FunctionInner::Host(kernel) => Ok(kernel),
            #[cfg(feature = "cuda")]
            _ => Err(Error::driver(DriverStatus::InvalidProgramExecutable, "function was not built by the host driver")),
        }
    }

    #[cfg(feature = "cuda")]
    pub(crate) fn cuda_function(&self) -> Result<&cudarc::driver::CudaFunction> {
        match &self.inner {
            FunctionInner::Cuda(function) => Ok(function),
            _ => Err(Error::driver(DriverStatus::InvalidProgramExecutable, "function was not built by the CUDA driver")),
        }
    }
}

#[derive(Clone)]
enum EventInner {
    Host { stream: Arc<HostStream>, seq: u64, stamp: Option<Arc<OnceLock<Instant>>> },
    #[cfg(feature = "cuda")]
    Cuda(Arc<cudarc::driver::CudaEvent>),
    /// Rejected before it reached the device; already terminal.
    Failed { status: DriverStatus, message: Arc<str> },
}

/// Completion handle of one enqueued operation.
#[derive(Clone)]
pub struct DeviceEvent {
    inner: EventInner,
}

impl std::fmt::Debug for DeviceEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            EventInner::Host { seq, .. } => write!(f, "DeviceEvent(host #{seq})"),
            #[cfg(feature = "cuda")]
            EventInner::Cuda(_) => write!(f, "DeviceEvent(cuda)"),
            EventInner::Failed { status, .. } => write!(f, "DeviceEvent(failed {status})"),
        }
    }
}

impl DeviceEvent {
    pub(crate) fn host(stream: Arc<HostStream>, seq: u64, stamp: Option<Arc<OnceLock<Instant>>>) -> Self {
        Self { inner: EventInner::Host { stream, seq, stamp } }
    }

    #[cfg(feature = "cuda")]
    pub(crate) fn cuda(event: cudarc::driver::CudaEvent) -> Self {
        Self { inner: EventInner::Cuda(Arc::new(event)) }
    }

    pub fn failed(status: DriverStatus, message: impl Into<String>) -> Self {
        Self { inner: EventInner::Failed { status, message: Arc::from(message.into()) } }
    }

    /// Current state, without blocking.
    pub fn status(&self) -> EventStatus {
        match &self.inner {
            EventInner::Host { stream, seq, .. } => stream.status(*seq),
            #[cfg(feature = "cuda")]
            EventInner::Cuda(event) => {
                if event.is_complete() {
                    EventStatus::Complete
                } else {
                    EventStatus::Pending
                }
            }
            EventInner::Failed { .. } => EventStatus::Error,
        }
    }

    /// Block until the operation finished and report how it ended.
    pub fn wait(&self) -> Result<()> {
        match &self.inner {
            EventInner::Host { stream, seq, .. } => stream.wait(*seq),
            #[cfg(feature = "cuda")]
            EventInner::Cuda(event) => event.synchronize().map_err(crate::cuda::translate),
            EventInner::Failed { status, message } => Err(Error::driver(*status, &**message)),
        }
    }

    /// Device time between two retired markers.
    pub fn elapsed(start: &Self, end: &Self) -> Option<Duration> {
        match (&start.inner, &end.inner) {
            (EventInner::Host { stamp: Some(start), .. }, EventInner::Host { stamp: Some(end), .. }) => {
                Some(end.get()?.saturating_duration_since(*start.get()?))
            }
            #[cfg(feature = "cuda")]
            (EventInner::Cuda(start), EventInner::Cuda(end)) => {
                start.elapsed_ms(end).ok().map(|ms| Duration::from_secs_f64(ms.max(0.0) as f64 / 1000.0))
            }
            _ => None,
        }
    }
}

/// The compute driver a backend runs on.
#[derive(Debug)]
pub enum Driver {
    Host(HostDriver),
    #[cfg(feature = "cuda")]
    Cuda(CudaDriver),
}

impl Driver {
    pub fn host(options: HostOptions, kernels: Arc<HostKernelRegistry>) -> Result<Self> {
        Ok(Self::Host(HostDriver::new(options, kernels)?))
    }

    /// Open the driver for `class`. GPUs need the `cuda` feature.
    pub fn open(class: DeviceClass, ordinal: usize, options: HostOptions, kernels: Arc<HostKernelRegistry>) -> Result<Self> {
        match class {
            DeviceClass::Cpu => Self::host(options, kernels),
            #[cfg(feature = "cuda")]
            DeviceClass::Gpu => Ok(Self::Cuda(CudaDriver::new(ordinal)?)),
            #[cfg(not(feature = "cuda"))]
            DeviceClass::Gpu => {
                let _ = ordinal;
                crate::error::NotAvailableSnafu { class }.fail()
            }
        }
    }

    pub fn class(&self) -> DeviceClass {
        self.info().class
    }

    pub fn info(&self) -> &DeviceInfo {
        match self {
            Self::Host(driver) => driver.info(),
            #[cfg(feature = "cuda")]
            Self::Cuda(driver) => driver.info(),
        }
    }

    pub fn build(&self, source: &str) -> Result<Module> {
        match self {
            Self::Host(driver) => driver.build(source),
            #[cfg(feature = "cuda")]
            Self::Cuda(driver) => driver.build(source),
        }
    }

    pub fn alloc(&self, size: usize) -> Result<DeviceMemory> {
        match self {
            Self::Host(driver) => driver.alloc(size),
            #[cfg(feature = "cuda")]
            Self::Cuda(driver) => driver.alloc(size),
        }
    }

    pub fn enqueue_write(&self, dst: &DeviceMemory, src: &SharedBytes) -> Result<DeviceEvent> {
        match self {
            Self::Host(driver) => driver.enqueue_write(dst, src),
            #[cfg(feature = "cuda")]
            Self::Cuda(driver) => driver.enqueue_write(dst, src),
        }
    }

    pub fn enqueue_read(&self, dst: &SharedBytes, src: &DeviceMemory) -> Result<DeviceEvent> {
        match self {
            Self::Host(driver) => driver.enqueue_read(dst, src),
            #[cfg(feature = "cuda")]
            Self::Cuda(driver) => driver.enqueue_read(dst, src),
        }
    }

    pub fn enqueue_launch(&self, function: &Function, args: &[LaunchArg], work: &WorkSize) -> Result<DeviceEvent> {
        match self {
            Self::Host(driver) => driver.enqueue_launch(function, args, work),
            #[cfg(feature = "cuda")]
            Self::Cuda(driver) => driver.enqueue_launch(function, args, work),
        }
    }

    pub fn enqueue_marker(&self) -> Result<DeviceEvent> {
        match self {
            Self::Host(driver) => driver.enqueue_marker(),
            #[cfg(feature = "cuda")]
            Self::Cuda(driver) => driver.enqueue_marker(),
        }
    }
}
