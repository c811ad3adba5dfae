//! Error taxonomy of the backend façade.
//!
//! Checks the façade performs itself produce dedicated variants. Everything a driver reports
//! arrives as a [`tessel_device::Error`] and is classified by [`classify`] on the way in, so
//! driver status codes never reach the caller unclassified.

use std::fmt;

use snafu::Snafu;
use tessel_device::DriverStatus;
use tessel_dtype::DeviceClass;

use crate::handle::{HandleFault, ProgramHandle};
use crate::program::ProgramState;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse class of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorKind {
    /// Source did not compile, or a program is not usable.
    Compile,
    /// A kernel name is missing from a compiled program.
    Resolution,
    /// Device memory could not be obtained.
    Allocation,
    /// Arguments could not be bound or passed.
    Binding,
    /// Enqueued work failed on the device.
    Execution,
    /// A handle is null, foreign or stale.
    Handle,
    /// The requested device cannot be opened.
    Device,
    /// Broken invariant between host and device state.
    Fatal,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("{program}: build failed: {diagnostic}"))]
    Compile { program: ProgramHandle, diagnostic: String },

    #[snafu(display("{program} is not ready ({state})"))]
    ProgramNotReady { program: ProgramHandle, state: ProgramState },

    #[snafu(display("{program}: no kernel named `{name}`"))]
    KernelNotFound { program: ProgramHandle, name: String },

    #[snafu(display("buffers must not be empty"))]
    EmptyBuffer,

    #[snafu(display("no free {kind} handles"))]
    ArenaFull { kind: &'static str },

    #[snafu(display("kernel `{kernel}`: slot {slot} out of range for arity {arity}"))]
    SlotOutOfRange { kernel: String, slot: usize, arity: usize },

    #[snafu(display("kernel `{kernel}`: slot {slot} is unbound"))]
    UnboundSlot { kernel: String, slot: usize },

    #[snafu(display("kernel `{kernel}`: slot {slot} refers to released buffer {buffer:#x}"))]
    DeadBuffer { kernel: String, slot: usize, buffer: u64 },

    #[snafu(display("malformed argument array: {reason}"))]
    MalformedArgs { reason: String },

    #[snafu(display("write of {len} bytes at offset {offset} exceeds buffer of {size} bytes"))]
    OutOfBounds { offset: usize, len: usize, size: usize },

    #[snafu(display("invalid {kind} handle {handle:#x}: {fault}"))]
    InvalidHandle { kind: &'static str, handle: u64, fault: HandleFault },

    #[snafu(display("no driver for {class} devices in this build"))]
    UnsupportedDevice { class: DeviceClass },

    #[snafu(display("host region of {actual} bytes does not match device allocation of {expected} bytes"))]
    SizeMismatch { expected: usize, actual: usize },

    /// A driver failure, classified by [`classify`].
    #[snafu(display("{kind} failure: {source}"))]
    Driver { kind: ErrorKind, source: tessel_device::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Compile { .. } | Self::ProgramNotReady { .. } => ErrorKind::Compile,
            Self::KernelNotFound { .. } => ErrorKind::Resolution,
            Self::EmptyBuffer | Self::ArenaFull { .. } => ErrorKind::Allocation,
            Self::SlotOutOfRange { .. }
            | Self::UnboundSlot { .. }
            | Self::DeadBuffer { .. }
            | Self::MalformedArgs { .. }
            | Self::OutOfBounds { .. } => ErrorKind::Binding,
            Self::InvalidHandle { .. } => ErrorKind::Handle,
            Self::UnsupportedDevice { .. } => ErrorKind::Device,
            Self::SizeMismatch { .. } => ErrorKind::Fatal,
            Self::Driver { kind, .. } => *kind,
        }
    }

    /// Driver status code behind this error, if any.
    pub fn status(&self) -> Option<DriverStatus> {
        match self {
            Self::Driver { source, .. } => source.status(),
            _ => None,
        }
    }
}

/// Map a driver failure onto the taxonomy.
pub fn classify(error: &tessel_device::Error) -> ErrorKind {
    use tessel_device::Error as DeviceError;

    match error {
        DeviceError::Driver { status, .. } => match status {
            DriverStatus::BuildProgramFailure | DriverStatus::CompilerNotAvailable | DriverStatus::InvalidBinary => {
                ErrorKind::Compile
            }
            DriverStatus::InvalidKernelName => ErrorKind::Resolution,
            DriverStatus::MemObjectAllocationFailure
            | DriverStatus::OutOfResources
            | DriverStatus::OutOfHostMemory
            | DriverStatus::InvalidBufferSize => ErrorKind::Allocation,
            DriverStatus::InvalidArgIndex
            | DriverStatus::InvalidArgValue
            | DriverStatus::InvalidArgSize
            | DriverStatus::InvalidKernelArgs => ErrorKind::Binding,
            DriverStatus::ExecStatusError
            | DriverStatus::InvalidProgramExecutable
            | DriverStatus::InvalidWorkDimension
            | DriverStatus::InvalidWorkGroupSize
            | DriverStatus::InvalidGlobalWorkSize => ErrorKind::Execution,
            DriverStatus::DeviceNotAvailable | DriverStatus::InvalidDevice => ErrorKind::Device,
            DriverStatus::InvalidValue => ErrorKind::Fatal,
        },
        DeviceError::Timeout { .. } => ErrorKind::Execution,
        DeviceError::NotAvailable { .. } => ErrorKind::Device,
        DeviceError::SizeMismatch { .. } | DeviceError::UnbalancedCompute | DeviceError::StreamClosed => {
            ErrorKind::Fatal
        }
    }
}

impl From<tessel_device::Error> for Error {
    fn from(source: tessel_device::Error) -> Self {
        match source {
            tessel_device::Error::NotAvailable { class } => Self::UnsupportedDevice { class },
            tessel_device::Error::SizeMismatch { expected, actual } => Self::SizeMismatch { expected, actual },
            source => Self::Driver { kind: classify(&source), source },
        }
    }
}

/// Last execution failure seen by `wait`, kept for the status side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub kind: ErrorKind,
    pub status: Option<DriverStatus>,
    pub message: String,
}

impl From<&Error> for ExecutionFailure {
    fn from(error: &Error) -> Self {
        Self { kind: error.kind(), status: error.status(), message: error.to_string() }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} [{status} ({})]", self.message, status.code()),
            None => write!(f, "{}", self.message),
        }
    }
}
