//! The ordered command queue.
//!
//! Every copy, launch and marker a backend issues goes through one [`CommandQueue`]. Each
//! operation is recorded as an event in a bounded ring. Events retire strictly in
//! submission order. When the ring is full the oldest event is waited on before its slot is
//! reused, so the queue never forgets an operation that is still running; a failure seen
//! while retiring that way is held back and reported by the next [`CommandQueue::wait`].

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use snafu::ensure;

use crate::driver::{DeviceEvent, Driver, Function, LaunchArg};
use crate::error::{DriverStatus, Error, Result, UnbalancedComputeSnafu};
use crate::memory::{DeviceMemory, SharedBytes};

/// Launch geometry: global and optional local (work-group) sizes, in 1 to 3 dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkSize {
    /// Number of meaningful dimensions.
    pub dims: usize,
    /// Global work size (total number of work items per dimension).
    pub global: [usize; 3],
    /// Work-group size; `None` lets the driver choose.
    pub local: Option<[usize; 3]>,
}

impl WorkSize {
    pub fn new_1d(global: usize) -> Self {
        Self { dims: 1, global: [global, 1, 1], local: None }
    }

    pub fn new_2d(global: [usize; 2]) -> Self {
        Self { dims: 2, global: [global[0], global[1], 1], local: None }
    }

    pub fn new_3d(global: [usize; 3]) -> Self {
        Self { dims: 3, global, local: None }
    }

    /// Geometry from caller-provided slices. Nothing is validated here; a bad geometry
    /// fails the launch, not the call.
    pub fn from_slices(global: &[usize], local: Option<&[usize]>) -> Self {
        let pad = |values: &[usize]| {
            let mut out = [1; 3];
            for (dst, src) in out.iter_mut().zip(values) {
                *dst = *src;
            }
            out
        };
        Self { dims: global.len(), global: pad(global), local: local.map(pad) }
    }

    pub fn with_local(mut self, local: [usize; 3]) -> Self {
        self.local = Some(local);
        self
    }

    /// Total number of work items; `None` when the product overflows `usize`.
    pub fn global_items(&self) -> Option<usize> {
        checked_product(&self.global)
    }

    /// Check the geometry against a device limit.
    pub fn validate(&self, max_work_group_size: usize) -> Result<(), (DriverStatus, String)> {
        if !(1..=3).contains(&self.dims) {
            return Err((DriverStatus::InvalidWorkDimension, format!("{} work dimensions", self.dims)));
        }
        if self.global.contains(&0) {
            return Err((DriverStatus::InvalidGlobalWorkSize, format!("global size {:?} has a zero extent", self.global)));
        }
        if self.global_items().is_none() {
            return Err((DriverStatus::InvalidGlobalWorkSize, format!("global size {:?} overflows", self.global)));
        }
        if let Some(local) = self.local {
            if local.contains(&0) {
                return Err((DriverStatus::InvalidWorkGroupSize, format!("local size {local:?} has a zero extent")));
            }
            if self.global.iter().zip(local).any(|(global, local)| global % local != 0) {
                return Err((
                    DriverStatus::InvalidWorkGroupSize,
                    format!("global size {:?} is not a multiple of local size {local:?}", self.global),
                ));
            }
            let Some(group) = checked_product(&local) else {
                return Err((DriverStatus::InvalidWorkGroupSize, format!("local size {local:?} overflows")));
            };
            if group > max_work_group_size {
                return Err((
                    DriverStatus::InvalidWorkGroupSize,
                    format!("work group of {group} items exceeds the device limit of {max_work_group_size}"),
                ));
            }
        }
        Ok(())
    }
}

fn checked_product(extents: &[usize]) -> Option<usize> {
    extents.iter().try_fold(1usize, |acc, &extent| acc.checked_mul(extent))
}

impl Default for WorkSize {
    fn default() -> Self {
        Self::new_1d(1)
    }
}

/// Sequence number of an enqueued operation; starts at 1.
pub type EventId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum EventStatus {
    Pending,
    Complete,
    Error,
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    CopyIn,
    CopyOut,
    Launch,
    Marker,
}

/// Transfer and launch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub copies_to_device: u64,
    pub copies_from_device: u64,
    pub bytes_to_device: u64,
    pub bytes_from_device: u64,
    pub launches: u64,
    pub markers: u64,
    /// Enqueues that had to wait for the oldest event because the ring was full.
    pub ring_stalls: u64,
}

struct InFlight {
    id: EventId,
    kind: EventKind,
    event: DeviceEvent,
}

#[derive(Default)]
struct ComputeClock {
    depth: usize,
    start: Option<DeviceEvent>,
    finished: Vec<(DeviceEvent, DeviceEvent)>,
    total: Duration,
    last: Option<Duration>,
    sessions: u64,
}

/// Ordered execution stream with a bounded event ring.
pub struct CommandQueue {
    driver: Arc<Driver>,
    ring: VecDeque<InFlight>,
    capacity: usize,
    submitted: EventId,
    retired: EventId,
    failed: BTreeSet<EventId>,
    deferred: Option<Error>,
    stats: QueueStats,
    clock: ComputeClock,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("in_flight", &self.ring.len())
            .field("capacity", &self.capacity)
            .field("submitted", &self.submitted)
            .field("retired", &self.retired)
            .finish()
    }
}

impl CommandQueue {
    /// Create a queue whose ring holds at most `capacity` events (at least one).
    pub fn new(driver: Arc<Driver>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            driver,
            ring: VecDeque::with_capacity(capacity),
            capacity,
            submitted: 0,
            retired: 0,
            failed: BTreeSet::new(),
            deferred: None,
            stats: QueueStats::default(),
            clock: ComputeClock::default(),
        }
    }

    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Events enqueued and not yet retired.
    pub fn in_flight(&self) -> usize {
        self.ring.len()
    }

    /// Id of the most recently enqueued event (0 before the first).
    pub fn submitted(&self) -> EventId {
        self.submitted
    }

    /// Every event with an id up to this one has retired.
    pub fn retired(&self) -> EventId {
        self.retired
    }

    /// Enqueue a host to device transfer of `src` into `dst`.
    pub fn copy_in(&mut self, dst: &DeviceMemory, src: &SharedBytes) -> Result<EventId> {
        let event = self.driver.enqueue_write(dst, src)?;
        self.stats.copies_to_device += 1;
        self.stats.bytes_to_device += dst.len() as u64;
        Ok(self.push(EventKind::CopyIn, event))
    }

    /// Enqueue a device to host transfer of `src` into `dst`.
    pub fn copy_out(&mut self, dst: &SharedBytes, src: &DeviceMemory) -> Result<EventId> {
        let event = self.driver.enqueue_read(dst, src)?;
        self.stats.copies_from_device += 1;
        self.stats.bytes_from_device += src.len() as u64;
        Ok(self.push(EventKind::CopyOut, event))
    }

    /// Enqueue a kernel launch. A bad geometry or a device fault is not reported here but
    /// by the [`CommandQueue::wait`] that retires the launch.
    pub fn launch(&mut self, function: &Function, args: &[LaunchArg], work: &WorkSize) -> Result<EventId> {
        let event = self.driver.enqueue_launch(function, args, work)?;
        self.stats.launches += 1;
        Ok(self.push(EventKind::Launch, event))
    }

    fn marker(&mut self) -> Result<DeviceEvent> {
        let event = self.driver.enqueue_marker()?;
        self.stats.markers += 1;
        self.push(EventKind::Marker, event.clone());
        Ok(event)
    }

    fn push(&mut self, kind: EventKind, event: DeviceEvent) -> EventId {
        if self.ring.len() == self.capacity {
            self.stats.ring_stalls += 1;
            self.retire_oldest();
        }

        self.submitted += 1;
        let id = self.submitted;
        tracing::trace!(event.id = id, event.kind = %kind, in_flight = self.ring.len() + 1, "enqueued");
        self.ring.push_back(InFlight { id, kind, event });
        id
    }

    fn retire_oldest(&mut self) {
        let Some(slot) = self.ring.pop_front() else { return };
        let result = slot.event.wait();
        self.retired = slot.id;

        if let Err(error) = result {
            tracing::debug!(event.id = slot.id, event.kind = %slot.kind, %error, "event failed");
            self.failed.insert(slot.id);
            match self.deferred {
                None => self.deferred = Some(error),
                Some(_) => tracing::warn!(event.id = slot.id, %error, "additional failure before wait"),
            }
        }
    }

    /// Retire events that already finished, without blocking.
    pub fn poll(&mut self) {
        while self.ring.front().is_some_and(|slot| slot.event.status().is_terminal()) {
            self.retire_oldest();
        }
    }

    /// Whether the event `id` has retired.
    pub fn is_retired(&mut self, id: EventId) -> bool {
        if id > self.retired {
            self.poll();
        }
        id <= self.retired
    }

    /// Status of a previously enqueued event; `None` for ids never handed out.
    pub fn status(&self, id: EventId) -> Option<EventStatus> {
        if id == 0 || id > self.submitted {
            return None;
        }
        if id <= self.retired {
            return Some(if self.failed.contains(&id) { EventStatus::Error } else { EventStatus::Complete });
        }
        self.ring.iter().find(|slot| slot.id == id).map(|slot| slot.event.status())
    }

    /// Block until every enqueued event has retired.
    ///
    /// Returns the first failure observed since the previous `wait`, including failures
    /// seen while making room in a full ring.
    pub fn wait(&mut self) -> Result<()> {
        while !self.ring.is_empty() {
            self.retire_oldest();
        }
        self.settle_clock();

        match self.deferred.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Block until event `id` and everything before it has retired.
    ///
    /// Unlike [`CommandQueue::wait`] this leaves any failure in place for the next `wait`.
    pub fn wait_for(&mut self, id: EventId) {
        while self.retired < id && !self.ring.is_empty() {
            self.retire_oldest();
        }
    }

    /// Open a compute session. Sessions nest; only the outermost one is timed.
    pub fn compute_start(&mut self) -> Result<()> {
        self.clock.depth += 1;
        if self.clock.depth == 1 {
            let start = self.marker()?;
            self.clock.start = Some(start);
        }
        Ok(())
    }

    /// Close the innermost compute session.
    pub fn compute_end(&mut self) -> Result<()> {
        ensure!(self.clock.depth > 0, UnbalancedComputeSnafu);
        self.clock.depth -= 1;
        if self.clock.depth == 0 {
            let end = self.marker()?;
            if let Some(start) = self.clock.start.take() {
                self.clock.finished.push((start, end));
            }
        }
        Ok(())
    }

    pub fn compute_depth(&self) -> usize {
        self.clock.depth
    }

    /// Device time accumulated by sessions that closed before the last `wait`.
    pub fn compute_time(&self) -> Duration {
        self.clock.total
    }

    pub fn last_compute_time(&self) -> Option<Duration> {
        self.clock.last
    }

    pub fn compute_sessions(&self) -> u64 {
        self.clock.sessions
    }

    fn settle_clock(&mut self) {
        for (start, end) in self.clock.finished.drain(..) {
            if let Some(elapsed) = DeviceEvent::elapsed(&start, &end) {
                self.clock.total += elapsed;
                self.clock.last = Some(elapsed);
                self.clock.sessions += 1;
            }
        }
    }
}
