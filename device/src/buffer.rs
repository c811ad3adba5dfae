use std::sync::OnceLock;

use crate::driver::Driver;
use crate::error::Result;
use crate::memory::DeviceMemory;

/// Device side of a buffer: a size and an allocation realized on first use.
#[derive(Debug)]
pub struct DeviceBuffer {
    /// Lazily-initialized allocation.
    memory: OnceLock<DeviceMemory>,
    size: usize,
}

impl DeviceBuffer {
    pub fn new(size: usize) -> Self {
        Self { memory: OnceLock::new(), size }
    }

    /// Allocate on `driver` unless already allocated.
    ///
    /// A failed allocation leaves the buffer unallocated so a later call can retry.
    pub fn ensure_allocated(&self, driver: &Driver) -> Result<&DeviceMemory> {
        if let Some(memory) = self.memory.get() {
            return Ok(memory);
        }

        let memory = driver.alloc(self.size)?;
        tracing::trace!(size = self.size, address = format_args!("{:#x}", memory.address()), "device allocation");
        Ok(self.memory.get_or_init(|| memory))
    }

    pub fn is_allocated(&self) -> bool {
        self.memory.get().is_some()
    }

    pub fn memory(&self) -> Option<&DeviceMemory> {
        self.memory.get()
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}
