//! Kernels and their argument slots.

use std::fmt;

use smallvec::SmallVec;
use snafu::ensure;
use tessel_device::Function;
use tessel_dtype::ScalarValue;

use crate::error::{Result, SlotOutOfRangeSnafu, UnboundSlotSnafu};
use crate::handle::{BufferHandle, ProgramHandle};

/// How a launch uses a bound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Access {
    /// The kernel may write it; the buffer is device dirty after launch.
    #[default]
    ReadWrite,
    /// The kernel only reads it.
    ReadOnly,
}

impl Access {
    pub fn writes(self) -> bool {
        self == Self::ReadWrite
    }
}

/// What one slot holds.
///
/// Buffers are bound by handle; the device pointer is looked up at launch because the
/// allocation may not exist when the binding is made.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgBinding {
    Scalar(ScalarValue),
    Buffer { buffer: BufferHandle, access: Access },
}

impl From<ScalarValue> for ArgBinding {
    fn from(value: ScalarValue) -> Self {
        Self::Scalar(value)
    }
}

impl fmt::Display for ArgBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(value) => write!(f, "{value}"),
            Self::Buffer { buffer, access } => write!(f, "{buffer} ({access})"),
        }
    }
}

/// A launchable entry point of a program together with its current bindings.
///
/// Name, arity and owning program never change after creation.
#[derive(Debug)]
pub struct Kernel {
    program: ProgramHandle,
    function: Function,
    args: SmallVec<[Option<ArgBinding>; 8]>,
}

impl Kernel {
    pub(crate) fn new(program: ProgramHandle, function: Function) -> Self {
        let args = SmallVec::from_elem(None, function.arity());
        Self { program, function, args }
    }

    pub fn name(&self) -> &str {
        self.function.name()
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn program(&self) -> ProgramHandle {
        self.program
    }

    pub(crate) fn function(&self) -> &Function {
        &self.function
    }

    /// Bind `slot`, replacing whatever was there.
    pub fn set_arg(&mut self, slot: usize, binding: impl Into<ArgBinding>) -> Result<()> {
        let arity = self.arity();
        ensure!(slot < arity, SlotOutOfRangeSnafu { kernel: self.name(), slot, arity });
        self.args[slot] = Some(binding.into());
        Ok(())
    }

    pub fn arg(&self, slot: usize) -> Option<&ArgBinding> {
        self.args.get(slot)?.as_ref()
    }

    /// Every slot's binding, failing on the first unbound one.
    pub fn bindings(&self) -> Result<SmallVec<[ArgBinding; 8]>> {
        self.args
            .iter()
            .enumerate()
            .map(|(slot, binding)| binding.ok_or_else(|| UnboundSlotSnafu { kernel: self.name(), slot }.build()))
            .collect()
    }
}
