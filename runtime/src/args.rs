//! Argument arrays handed to `dispatch`.
//!
//! Callers that cannot build an [`ArgArray`] in Rust pass its serialized form. The layout is
//! little-endian: a `u32` argument count, then one 16-byte record per argument holding a
//! `u32` slot, a `u8` kind, three padding bytes and a `u64` payload. A kind below
//! [`KIND_BUFFER_RW`] is a scalar dtype code whose payload is the zero-extended value; the
//! two buffer kinds carry a buffer handle.

use std::fmt;

use smallvec::SmallVec;
use snafu::ensure;
use tessel_dtype::{ScalarDType, ScalarValue};

use crate::error::{MalformedArgsSnafu, Result};
use crate::handle::{BufferHandle, Handle};
use crate::kernel::{Access, ArgBinding};

pub const KIND_BUFFER_RW: u8 = 0x80;
pub const KIND_BUFFER_RO: u8 = 0x81;

const HEADER_LEN: usize = 4;
const RECORD_LEN: usize = 16;

/// Slot bindings applied to a kernel right before it is launched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgArray {
    entries: SmallVec<[(usize, ArgBinding); 8]>,
}

impl ArgArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, slot: usize, binding: impl Into<ArgBinding>) -> &mut Self {
        self.entries.push((slot, binding.into()));
        self
    }

    pub fn scalar(mut self, slot: usize, value: impl Into<ScalarValue>) -> Self {
        self.push(slot, value.into());
        self
    }

    pub fn buffer(mut self, slot: usize, buffer: BufferHandle) -> Self {
        self.push(slot, ArgBinding::Buffer { buffer, access: Access::ReadWrite });
        self
    }

    pub fn buffer_read_only(mut self, slot: usize, buffer: BufferHandle) -> Self {
        self.push(slot, ArgBinding::Buffer { buffer, access: Access::ReadOnly });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bindings in the order they will be applied; a later entry for the same slot wins.
    pub fn iter(&self) -> impl Iterator<Item = (usize, ArgBinding)> + '_ {
        self.entries.iter().copied()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.entries.len() * RECORD_LEN);
        bytes.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());

        for (slot, binding) in &self.entries {
            let (kind, payload) = match binding {
                ArgBinding::Scalar(value) => (value.dtype().code(), value.to_bits()),
                ArgBinding::Buffer { buffer, access: Access::ReadWrite } => (KIND_BUFFER_RW, buffer.raw()),
                ArgBinding::Buffer { buffer, access: Access::ReadOnly } => (KIND_BUFFER_RO, buffer.raw()),
            };
            bytes.extend_from_slice(&(*slot as u32).to_le_bytes());
            bytes.extend_from_slice(&[kind, 0, 0, 0]);
            bytes.extend_from_slice(&payload.to_le_bytes());
        }
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ensure!(
            bytes.len() >= HEADER_LEN,
            MalformedArgsSnafu { reason: format!("{} bytes is shorter than the header", bytes.len()) }
        );
        let (header, body) = bytes.split_at(HEADER_LEN);
        let count = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;

        let expected = count.checked_mul(RECORD_LEN).unwrap_or(usize::MAX);
        ensure!(
            body.len() >= expected,
            MalformedArgsSnafu { reason: format!("{count} arguments need {expected} bytes, got {}", body.len()) }
        );
        ensure!(
            body.len() == expected,
            MalformedArgsSnafu { reason: format!("{} trailing bytes after {count} arguments", body.len() - expected) }
        );

        let mut args = Self::new();
        for (index, record) in body.chunks_exact(RECORD_LEN).enumerate() {
            let mut slot = [0u8; 4];
            slot.copy_from_slice(&record[0..4]);
            let slot = u32::from_le_bytes(slot) as usize;
            let kind = record[4];
            let mut payload = [0u8; 8];
            payload.copy_from_slice(&record[8..16]);
            let payload = u64::from_le_bytes(payload);

            let binding = match kind {
                KIND_BUFFER_RW | KIND_BUFFER_RO => {
                    let access = if kind == KIND_BUFFER_RO { Access::ReadOnly } else { Access::ReadWrite };
                    ArgBinding::Buffer { buffer: BufferHandle::from_raw(payload), access }
                }
                code => {
                    let Some(dtype) = ScalarDType::from_code(code) else {
                        let reason = format!("argument {index}: unknown kind {code:#04x}");
                        return MalformedArgsSnafu { reason }.fail();
                    };
                    let Some(value) = ScalarValue::from_bits(dtype, payload) else {
                        return MalformedArgsSnafu {
                            reason: format!("argument {index}: payload {payload:#x} does not fit {dtype}"),
                        }
                        .fail();
                    };
                    ArgBinding::Scalar(value)
                }
            };
            args.push(slot, binding);
        }
        Ok(args)
    }
}

impl FromIterator<(usize, ArgBinding)> for ArgArray {
    fn from_iter<I: IntoIterator<Item = (usize, ArgBinding)>>(iter: I) -> Self {
        Self { entries: iter.into_iter().collect() }
    }
}

impl fmt::Display for ArgArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (index, (slot, binding)) in self.entries.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{slot}: {binding}")?;
        }
        write!(f, "]")
    }
}
