use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Status codes reported by compute drivers.
///
/// Values follow the OpenCL status convention so codes read the same in logs regardless of
/// which driver produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::FromRepr, strum::EnumIter)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(i32)]
pub enum DriverStatus {
    DeviceNotAvailable = -2,
    CompilerNotAvailable = -3,
    MemObjectAllocationFailure = -4,
    OutOfResources = -5,
    OutOfHostMemory = -6,
    BuildProgramFailure = -11,
    ExecStatusError = -14,
    InvalidValue = -30,
    InvalidDevice = -33,
    InvalidBinary = -42,
    InvalidProgramExecutable = -45,
    InvalidKernelName = -46,
    InvalidArgIndex = -49,
    InvalidArgValue = -50,
    InvalidArgSize = -51,
    InvalidKernelArgs = -52,
    InvalidWorkDimension = -53,
    InvalidWorkGroupSize = -54,
    InvalidBufferSize = -61,
    InvalidGlobalWorkSize = -63,
}

impl DriverStatus {
    pub const fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A driver call failed with a native status code.
    #[snafu(display("{status} ({code}): {message}", code = status.code()))]
    Driver { status: DriverStatus, message: String },

    /// Host region and device allocation disagree on size.
    #[snafu(display("size mismatch: expected {expected} bytes, got {actual}"))]
    SizeMismatch { expected: usize, actual: usize },

    /// A timeline wait gave up before the target value was reached.
    #[snafu(display("timeline wait timed out after {waited_ms}ms: target {target}, current {current}"))]
    Timeout { waited_ms: u64, target: u64, current: u64 },

    /// `compute_end` without a matching `compute_start`.
    #[snafu(display("compute_end called outside of a compute session"))]
    UnbalancedCompute,

    /// The device class was requested but no driver for it is compiled in.
    #[snafu(display("no driver available for {class} devices"))]
    NotAvailable { class: tessel_dtype::DeviceClass },

    /// The host stream worker is gone.
    #[snafu(display("host stream worker stopped"))]
    StreamClosed,
}

impl Error {
    /// Driver status carried by this error, if it came from a driver call.
    pub fn status(&self) -> Option<DriverStatus> {
        match self {
            Self::Driver { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn driver(status: DriverStatus, message: impl Into<String>) -> Self {
        Self::Driver { status, message: message.into() }
    }
}
