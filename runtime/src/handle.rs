//! Generation-checked arenas behind the opaque `u64` handles.
//!
//! A handle packs three fields: the arena tag in the top 16 bits, the slot generation in
//! the next 24 and the slot index plus one in the low 24. Zero is never produced. Each
//! arena draws its tag from a process-wide counter, so a handle presented to an arena
//! other than the one that issued it is rejected instead of aliasing an unrelated object.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU16, Ordering};

use snafu::ensure;

use crate::error::{ArenaFullSnafu, Error, InvalidHandleSnafu, Result};

const INDEX_BITS: u32 = 24;
const GENERATION_BITS: u32 = 24;
const TAG_SHIFT: u32 = INDEX_BITS + GENERATION_BITS;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const GENERATION_MASK: u64 = (1 << GENERATION_BITS) - 1;

/// Largest number of slots one arena can hand out.
pub const MAX_SLOTS: usize = INDEX_MASK as usize;
const MAX_GENERATION: u32 = GENERATION_MASK as u32;

static NEXT_TAG: AtomicU16 = AtomicU16::new(1);

fn next_tag() -> u16 {
    loop {
        let tag = NEXT_TAG.fetch_add(1, Ordering::Relaxed);
        if tag != 0 {
            return tag;
        }
    }
}

/// Why a handle was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum HandleFault {
    /// The zero handle.
    Null,
    /// Issued by a different arena.
    Foreign,
    /// Index never handed out.
    Unknown,
    /// The object it named was released.
    Stale,
}

/// A typed view of a raw handle.
pub trait Handle: Copy + Eq + fmt::Debug {
    /// Object kind, used in error messages.
    const KIND: &'static str;

    fn from_raw(raw: u64) -> Self;

    fn raw(self) -> u64;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl Handle for $name {
            const KIND: &'static str = $kind;

            fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            fn raw(self) -> u64 {
                self.0
            }
        }

        impl From<$name> for u64 {
            fn from(handle: $name) -> u64 {
                handle.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}#{:#018x}", $kind, self.0)
            }
        }
    };
}

define_handle!(
    /// Names a compiled (or failed) program.
    ProgramHandle,
    "program"
);
define_handle!(
    /// Names a kernel resolved from a program.
    KernelHandle,
    "kernel"
);
define_handle!(
    /// Names a host/device buffer pair.
    BufferHandle,
    "buffer"
);

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage addressed by handles of type `H`.
pub struct Arena<H, T> {
    tag: u16,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _handle: PhantomData<fn() -> H>,
}

impl<H, T> fmt::Debug for Arena<H, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("tag", &self.tag)
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl<H: Handle, T> Default for Arena<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Handle, T> Arena<H, T> {
    pub fn new() -> Self {
        Self { tag: next_tag(), slots: Vec::new(), free: Vec::new(), len: 0, _handle: PhantomData }
    }

    pub fn tag(&self) -> u16 {
        self.tag
    }

    /// Live objects.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn encode(&self, index: u32, generation: u32) -> H {
        let raw = ((self.tag as u64) << TAG_SHIFT) | ((generation as u64) << INDEX_BITS) | (index as u64 + 1);
        H::from_raw(raw)
    }

    fn decode(&self, handle: H) -> Result<(usize, u32)> {
        let raw = handle.raw();
        let fault = |fault: HandleFault| InvalidHandleSnafu { kind: H::KIND, handle: raw, fault };

        ensure!(raw != 0, fault(HandleFault::Null));
        ensure!((raw >> TAG_SHIFT) as u16 == self.tag, fault(HandleFault::Foreign));

        let index = raw & INDEX_MASK;
        ensure!(index != 0 && (index as usize) <= self.slots.len(), fault(HandleFault::Unknown));

        let generation = ((raw >> INDEX_BITS) & GENERATION_MASK) as u32;
        Ok((index as usize - 1, generation))
    }

    fn stale(handle: H) -> Error {
        InvalidHandleSnafu { kind: H::KIND, handle: handle.raw(), fault: HandleFault::Stale }.build()
    }

    /// Store `value` and hand out its handle.
    pub fn insert(&mut self, value: T) -> Result<H> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            let generation = slot.generation;
            self.len += 1;
            return Ok(self.encode(index, generation));
        }

        ensure!(self.slots.len() < MAX_SLOTS, ArenaFullSnafu { kind: H::KIND });
        let index = self.slots.len() as u32;
        self.slots.push(Slot { generation: 0, value: Some(value) });
        self.len += 1;
        Ok(self.encode(index, 0))
    }

    pub fn get(&self, handle: H) -> Result<&T> {
        let (index, generation) = self.decode(handle)?;
        match &self.slots[index] {
            Slot { generation: current, value: Some(value) } if *current == generation => Ok(value),
            _ => Err(Self::stale(handle)),
        }
    }

    pub fn get_mut(&mut self, handle: H) -> Result<&mut T> {
        let (index, generation) = self.decode(handle)?;
        match &mut self.slots[index] {
            Slot { generation: current, value: Some(value) } if *current == generation => Ok(value),
            _ => Err(Self::stale(handle)),
        }
    }

    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_ok()
    }

    /// Take the object out and invalidate every copy of its handle.
    ///
    /// A slot whose generation counter is exhausted is retired rather than reused.
    pub fn remove(&mut self, handle: H) -> Result<T> {
        let (index, generation) = self.decode(handle)?;
        let slot = &mut self.slots[index];
        if slot.generation != generation {
            return Err(Self::stale(handle));
        }
        let Some(value) = slot.value.take() else { return Err(Self::stale(handle)) };
        self.len -= 1;

        if slot.generation < MAX_GENERATION {
            slot.generation += 1;
            self.free.push(index as u32);
        } else {
            tracing::debug!(kind = H::KIND, index, "handle slot retired");
        }
        Ok(value)
    }

    /// Live objects with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| (self.encode(index as u32, slot.generation), value))
        })
    }

    #[cfg(test)]
    pub(crate) fn force_generation(&mut self, handle: H, generation: u32) {
        if let Ok((index, _)) = self.decode(handle) {
            self.slots[index].generation = generation;
        }
    }
}
