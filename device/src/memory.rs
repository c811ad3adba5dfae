//! Host-side byte storage and device memory handles.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

#[cfg(feature = "cuda")]
use cudarc::driver::CudaSlice;

/// Heap bytes with 8-byte alignment, so any scalar type can be viewed in place.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AlignedBytes {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBytes {
    pub fn zeroed(len: usize) -> Self {
        Self { words: vec![0; len.div_ceil(8)], len }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut this = Self::zeroed(bytes.len());
        this.as_bytes_mut().copy_from_slice(bytes);
        this
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }

    /// Typed view; `None` when the length is not a multiple of `size_of::<T>()`.
    pub fn as_slice_of<T: bytemuck::Pod>(&self) -> Option<&[T]> {
        bytemuck::try_cast_slice(self.as_bytes()).ok()
    }

    pub fn as_mut_slice_of<T: bytemuck::Pod>(&mut self) -> Option<&mut [T]> {
        bytemuck::try_cast_slice_mut(self.as_bytes_mut()).ok()
    }

    pub(crate) fn address(&self) -> usize {
        self.words.as_ptr() as usize
    }
}

impl fmt::Debug for AlignedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBytes").field("len", &self.len).finish()
    }
}

/// Bytes shared between the caller and operations in flight on a stream.
pub type SharedBytes = Arc<Mutex<AlignedBytes>>;

pub fn shared_bytes(bytes: AlignedBytes) -> SharedBytes {
    Arc::new(Mutex::new(bytes))
}

/// A realized device allocation.
///
/// Cloning shares the allocation; it is released when the last clone (including the ones
/// held by queued operations) is dropped.
#[derive(Clone)]
pub enum DeviceMemory {
    /// Memory owned by the host driver, separate from the caller's host region.
    Host { bytes: SharedBytes, len: usize, address: usize, lease: Arc<Lease> },
    #[cfg(feature = "cuda")]
    Cuda { slice: Arc<Mutex<CudaSlice<u8>>>, len: usize },
}

impl DeviceMemory {
    pub(crate) fn host(bytes: AlignedBytes, lease: Lease) -> Self {
        let (len, address) = (bytes.len(), bytes.address());
        Self::Host { bytes: shared_bytes(bytes), len, address, lease: Arc::new(lease) }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Host { len, .. } => *len,
            #[cfg(feature = "cuda")]
            Self::Cuda { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether both handles refer to the same allocation.
    pub fn same_allocation(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Host { bytes: a, .. }, Self::Host { bytes: b, .. }) => Arc::ptr_eq(a, b),
            #[cfg(feature = "cuda")]
            (Self::Cuda { slice: a, .. }, Self::Cuda { slice: b, .. }) => Arc::ptr_eq(a, b),
            #[cfg(feature = "cuda")]
            _ => false,
        }
    }

    /// Address of the allocation as seen by the driver, for diagnostics.
    pub fn address(&self) -> usize {
        match self {
            Self::Host { address, .. } => *address,
            #[cfg(feature = "cuda")]
            Self::Cuda { slice, .. } => Arc::as_ptr(slice) as usize,
        }
    }
}

impl fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Host { .. } => "host",
            #[cfg(feature = "cuda")]
            Self::Cuda { .. } => "cuda",
        };
        write!(f, "DeviceMemory({kind}, {} bytes @ {:#x})", self.len(), self.address())
    }
}

/// Accounts an allocation against a driver's memory budget until dropped.
#[derive(Debug)]
pub struct Lease {
    in_use: Arc<AtomicU64>,
    bytes: u64,
}

impl Lease {
    /// Reserve `bytes` if the budget allows it.
    pub(crate) fn acquire(in_use: &Arc<AtomicU64>, bytes: u64, budget: u64) -> Option<Self> {
        in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| used.checked_add(bytes).filter(|&total| total <= budget))
            .ok()
            .map(|_| Self { in_use: Arc::clone(in_use), bytes })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}
