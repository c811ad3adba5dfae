//! Device layer: compute drivers, device memory and the ordered command queue.
//!
//! Nothing here knows about handles or argument binding. A [`Driver`] builds programs,
//! allocates memory and enqueues work; a [`CommandQueue`] sequences that work, tracks
//! completion in a bounded event ring and counts transfers.

pub mod buffer;
pub mod driver;
pub mod error;
pub mod host;
pub mod info;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod source;
pub mod sync;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(test)]
pub mod test;

pub use buffer::DeviceBuffer;
pub use driver::{DeviceEvent, Driver, Function, LaunchArg, Module};
pub use error::{DriverStatus, Error, Result};
pub use host::{HostDriver, HostOptions};
pub use info::{DeviceInfo, NumberQuery, StringQuery};
pub use memory::{AlignedBytes, DeviceMemory, SharedBytes, shared_bytes};
pub use queue::{CommandQueue, EventId, EventKind, EventStatus, QueueStats, WorkSize};
pub use registry::{HostKernel, HostKernelRegistry, HostLaunch, registry};
pub use source::{Diagnostic, EntryPoint, scan_entry_points};
pub use sync::{CpuTimelineSignal, TimelineSignal};
