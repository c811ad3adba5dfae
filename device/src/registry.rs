//! Native kernel implementations for the host driver.
//!
//! The host driver does not compile kernel source to machine code. Instead every entry point
//! a program declares is bound, by name, to a Rust function registered here. The declared
//! parameter count must match the registered arity.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::{MutexGuard, RwLock};
use smallvec::SmallVec;
use tessel_dtype::{HasDType, ScalarValue};

use crate::memory::AlignedBytes;
use crate::queue::WorkSize;

/// Signature of a native host kernel.
pub type HostKernelFn = dyn Fn(&mut HostLaunch<'_>) -> Result<(), String> + Send + Sync;

/// A registered native kernel.
#[derive(Clone)]
pub struct HostKernel {
    arity: usize,
    func: Arc<HostKernelFn>,
}

impl HostKernel {
    pub fn new<F>(arity: usize, func: F) -> Self
    where
        F: Fn(&mut HostLaunch<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        Self { arity, func: Arc::new(func) }
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub(crate) fn call(&self, launch: &mut HostLaunch<'_>) -> Result<(), String> {
        (self.func)(launch)
    }
}

impl fmt::Debug for HostKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostKernel").field("arity", &self.arity).finish_non_exhaustive()
    }
}

/// Name to implementation map consulted when the host driver builds a program.
#[derive(Debug, Default)]
pub struct HostKernelRegistry {
    kernels: RwLock<HashMap<String, HostKernel>>,
}

impl HostKernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `func` under `name`, replacing any previous implementation.
    pub fn register<F>(&self, name: impl Into<String>, arity: usize, func: F) -> &Self
    where
        F: Fn(&mut HostLaunch<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.kernels.write().insert(name.into(), HostKernel::new(arity, func));
        self
    }

    pub fn get(&self, name: &str) -> Option<HostKernel> {
        self.kernels.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kernels.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.kernels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static REGISTRY: Lazy<Arc<HostKernelRegistry>> = Lazy::new(|| Arc::new(HostKernelRegistry::new()));

/// Process-wide registry used by backends that are not given one explicitly.
pub fn registry() -> Arc<HostKernelRegistry> {
    Arc::clone(&REGISTRY)
}

pub(crate) enum HostSlot {
    Scalar(ScalarValue),
    /// Index into the launch's locked allocations.
    Memory(usize),
}

/// View of one kernel invocation handed to a native kernel.
///
/// The same allocation may be bound to several slots; it is locked once and every slot that
/// names it sees the same bytes.
pub struct HostLaunch<'a> {
    pub(crate) name: &'a str,
    pub(crate) work: WorkSize,
    pub(crate) slots: SmallVec<[HostSlot; 8]>,
    pub(crate) memory: SmallVec<[MutexGuard<'a, AlignedBytes>; 8]>,
}

impl HostLaunch<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn work(&self) -> &WorkSize {
        &self.work
    }

    /// Total number of work items; the usual loop bound for a 1-D host kernel.
    pub fn global_items(&self) -> usize {
        // Launches only reach a kernel after their geometry validated.
        self.work.global_items().unwrap_or_default()
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn scalar(&self, slot: usize) -> Result<ScalarValue, String> {
        match self.slots.get(slot) {
            Some(HostSlot::Scalar(value)) => Ok(*value),
            Some(HostSlot::Memory(_)) => Err(format!("{}: slot {slot} is a buffer, expected a scalar", self.name)),
            None => Err(format!("{}: slot {slot} out of range", self.name)),
        }
    }

    /// Scalar payload as `T`, failing on a dtype mismatch.
    pub fn scalar_as<T: HasDType>(&self, slot: usize) -> Result<T, String> {
        let value = self.scalar(slot)?;
        T::from_scalar(value)
            .ok_or_else(|| format!("{}: slot {slot} holds {}, expected {}", self.name, value.dtype(), T::DTYPE))
    }

    fn memory_index(&self, slot: usize) -> Result<usize, String> {
        match self.slots.get(slot) {
            Some(HostSlot::Memory(index)) => Ok(*index),
            Some(HostSlot::Scalar(_)) => Err(format!("{}: slot {slot} is a scalar, expected a buffer", self.name)),
            None => Err(format!("{}: slot {slot} out of range", self.name)),
        }
    }

    pub fn bytes(&self, slot: usize) -> Result<&[u8], String> {
        let index = self.memory_index(slot)?;
        Ok(self.memory[index].as_bytes())
    }

    pub fn bytes_mut(&mut self, slot: usize) -> Result<&mut [u8], String> {
        let index = self.memory_index(slot)?;
        Ok(self.memory[index].as_bytes_mut())
    }

    pub fn slice<T: bytemuck::Pod>(&self, slot: usize) -> Result<&[T], String> {
        let index = self.memory_index(slot)?;
        let name = self.name;
        self.memory[index].as_slice_of().ok_or_else(|| format!("{name}: slot {slot} is not a whole number of elements"))
    }

    pub fn slice_mut<T: bytemuck::Pod>(&mut self, slot: usize) -> Result<&mut [T], String> {
        let index = self.memory_index(slot)?;
        let name = self.name;
        self.memory[index]
            .as_mut_slice_of()
            .ok_or_else(|| format!("{name}: slot {slot} is not a whole number of elements"))
    }
}
