//! Handle-based dispatch of precompiled kernels.
//!
//! A [`Backend`] wraps one device. Callers compile source into programs, resolve kernels by
//! name, bind scalars and buffers to argument slots and dispatch. Every object is named by an
//! opaque `u64` handle; buffers track which side holds the newest data so transfers are only
//! enqueued when needed.
//!
//! The host device runs native kernels registered under the names the source declares:
//!
//! ```
//! use tessel_device::WorkSize;
//! use tessel_runtime::{Access, ArgArray, Backend, BackendOptions};
//!
//! # fn main() -> tessel_runtime::Result<()> {
//! tessel_device::registry().register("add", 2, |launch| {
//!     let k = launch.scalar_as::<i32>(0)?;
//!     launch.slice_mut::<i32>(1)?.iter_mut().for_each(|x| *x += k);
//!     Ok(())
//! });
//!
//! let mut backend = Backend::new(BackendOptions::default())?;
//! let program = backend.compile("__kernel void add(int k, __global int* buf) { }")?;
//! let kernel = backend.get_kernel(program, "add")?;
//! let buffer = backend.create_buffer_from(&[1i32, 2, 3])?;
//!
//! backend.set_arg_buffer(kernel, 1, buffer, Access::ReadWrite)?;
//! backend.dispatch(kernel, &ArgArray::new().scalar(0, 42i32), &WorkSize::new_1d(3))?;
//! backend.wait()?;
//!
//! let out: Vec<i32> = backend.read_buffer_as(buffer)?;
//! assert_eq!(out, [43, 44, 45]);
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod error;
pub mod handle;
pub mod kernel;
pub mod program;

#[cfg(test)]
pub mod test;

pub use args::{ArgArray, KIND_BUFFER_RO, KIND_BUFFER_RW};
pub use backend::Backend;
pub use buffer::DirtyState;
pub use config::{BackendOptions, Config, ConfigBit};
pub use error::{Error, ErrorKind, ExecutionFailure, Result};
pub use handle::{BufferHandle, Handle, HandleFault, KernelHandle, ProgramHandle};
pub use kernel::{Access, ArgBinding};
pub use program::ProgramState;

pub use tessel_device::{HostKernelRegistry, HostLaunch, NumberQuery, QueueStats, StringQuery, WorkSize};
pub use tessel_dtype::{DeviceClass, ScalarDType, ScalarValue};
