//! Backend configuration.
//!
//! The calling runtime hands the backend a single integer mode word; each bit switches one
//! behavior. [`Config`] is the typed view of that word and [`BackendOptions`] bundles it
//! with the tunables that have no bit of their own.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bon::bon;
use enumset::{EnumSet, EnumSetType};
use tessel_device::{HostKernelRegistry, HostOptions};
use tessel_dtype::DeviceClass;

/// One bit of the mode word. Discriminants are bit positions.
#[derive(EnumSetType, Debug, Hash, strum::Display, strum::EnumString, strum::EnumIter)]
#[enumset(repr = "u32")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ConfigBit {
    /// Run on a GPU.
    Gpu = 1,
    /// Run on a CPU device.
    Cpu = 2,
    /// Leave written buffers on the device until the caller pulls them.
    MinimizeCopies = 3,
    /// Log every queue operation.
    Trace = 4,
    /// Time compute sessions.
    Profile = 5,
    /// Log kernel source at compile time.
    ShowCode = 6,
    /// Log the argument list of every dispatch.
    ShowKernelModel = 7,
    /// Log compute session bracketing.
    ShowComputeModel = 8,
    /// Log the device report at startup.
    Info = 9,
    /// Log every host/device transfer.
    TraceCopies = 10,
}

/// Typed view of the mode word. Unknown bits are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Config {
    bits: EnumSet<ConfigBit>,
}

impl Config {
    /// Environment variable read by [`Config::from_env`].
    pub const ENV: &'static str = "TESSEL_MODE";

    pub fn from_mode(mode: u32) -> Self {
        Self { bits: EnumSet::from_u32_truncated(mode) }
    }

    pub fn from_bits(bits: impl IntoIterator<Item = ConfigBit>) -> Self {
        Self { bits: bits.into_iter().collect() }
    }

    /// Read `TESSEL_MODE`, either a number (decimal or `0x` hex) or a comma separated list
    /// of bit names such as `GPU,MINIMIZE_COPIES`. Unset or unparsable means no bits.
    pub fn from_env() -> Self {
        std::env::var(Self::ENV).ok().and_then(|value| value.parse().ok()).unwrap_or_default()
    }

    pub fn mode(&self) -> u32 {
        self.bits.as_u32()
    }

    pub fn bits(&self) -> EnumSet<ConfigBit> {
        self.bits
    }

    pub fn contains(&self, bit: ConfigBit) -> bool {
        self.bits.contains(bit)
    }

    pub fn with(mut self, bit: ConfigBit) -> Self {
        self.bits.insert(bit);
        self
    }

    /// GPU when the GPU bit is set, otherwise CPU.
    pub fn device_class(&self) -> DeviceClass {
        if self.contains(ConfigBit::Gpu) { DeviceClass::Gpu } else { DeviceClass::Cpu }
    }

    pub fn minimize_copies(&self) -> bool {
        self.contains(ConfigBit::MinimizeCopies)
    }

    pub fn trace(&self) -> bool {
        self.contains(ConfigBit::Trace)
    }

    pub fn trace_copies(&self) -> bool {
        self.contains(ConfigBit::TraceCopies)
    }

    pub fn profile(&self) -> bool {
        self.contains(ConfigBit::Profile)
    }

    pub fn show_code(&self) -> bool {
        self.contains(ConfigBit::ShowCode)
    }

    pub fn show_kernel_model(&self) -> bool {
        self.contains(ConfigBit::ShowKernelModel)
    }

    pub fn show_compute_model(&self) -> bool {
        self.contains(ConfigBit::ShowComputeModel)
    }

    pub fn info(&self) -> bool {
        self.contains(ConfigBit::Info)
    }
}

impl FromStr for Config {
    type Err = strum::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let number = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => s.parse::<u32>().ok(),
        };
        if let Some(mode) = number {
            return Ok(Self::from_mode(mode));
        }

        s.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ConfigBit::from_str)
            .collect::<Result<EnumSet<_>, _>>()
            .map(|bits| Self { bits })
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.bits.iter().map(|bit| bit.to_string()).collect();
        write!(f, "{:#x} [{}]", self.mode(), names.join(","))
    }
}

/// Everything a backend needs at construction.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub config: Config,
    /// Events the command queue keeps in flight before waiting on the oldest.
    pub event_capacity: usize,
    /// GPU ordinal when the GPU bit is set.
    pub device_ordinal: usize,
    /// Limits of the host driver.
    pub host: HostOptions,
    /// Native kernels available to the host driver.
    pub kernels: Arc<HostKernelRegistry>,
}

#[bon]
impl BackendOptions {
    #[builder]
    pub fn new(
        #[builder(default)] config: Config,
        #[builder(default = 1024)] event_capacity: usize,
        #[builder(default = 0)] device_ordinal: usize,
        #[builder(default)] host: HostOptions,
        #[builder(default = tessel_device::registry())] kernels: Arc<HostKernelRegistry>,
    ) -> Self {
        Self { config, event_capacity: event_capacity.max(1), device_ordinal, host, kernels }
    }

    /// Options with the mode word taken from `TESSEL_MODE`.
    pub fn from_env() -> Self {
        Self::builder().config(Config::from_env()).build()
    }
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
