//! Read-only device capability queries.

use std::fmt;

use tessel_dtype::DeviceClass;

/// String-valued device queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum StringQuery {
    Name,
    Vendor,
    Version,
    DriverVersion,
}

/// Numeric device queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(strum::Display, strum::EnumString, strum::EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum NumberQuery {
    ComputeUnits,
    GlobalMemSize,
    LocalMemSize,
    MaxAllocSize,
    MaxWorkGroupSize,
}

/// Capabilities of the device a driver is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub class: DeviceClass,
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub driver_version: String,
    pub compute_units: u32,
    pub global_mem_size: u64,
    pub local_mem_size: u64,
    pub max_alloc_size: u64,
    pub max_work_group_size: usize,
}

impl DeviceInfo {
    pub fn string(&self, query: StringQuery) -> &str {
        match query {
            StringQuery::Name => &self.name,
            StringQuery::Vendor => &self.vendor,
            StringQuery::Version => &self.version,
            StringQuery::DriverVersion => &self.driver_version,
        }
    }

    pub fn number(&self, query: NumberQuery) -> u64 {
        match query {
            NumberQuery::ComputeUnits => self.compute_units as u64,
            NumberQuery::GlobalMemSize => self.global_mem_size,
            NumberQuery::LocalMemSize => self.local_mem_size,
            NumberQuery::MaxAllocSize => self.max_alloc_size,
            NumberQuery::MaxWorkGroupSize => self.max_work_group_size as u64,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} device \"{}\" ({})", self.class, self.name, self.vendor)?;
        writeln!(f, "  version          {} (driver {})", self.version, self.driver_version)?;
        writeln!(f, "  compute units    {}", self.compute_units)?;
        writeln!(f, "  global memory    {} bytes", self.global_mem_size)?;
        writeln!(f, "  local memory     {} bytes", self.local_mem_size)?;
        writeln!(f, "  max allocation   {} bytes", self.max_alloc_size)?;
        write!(f, "  max work group   {}", self.max_work_group_size)
    }
}
