//! Host/device buffer pairs and their dirty state.

use tessel_device::{AlignedBytes, DeviceBuffer, EventId, SharedBytes, shared_bytes};

/// Which side of a buffer holds the newest data.
///
/// At most one side is ever ahead; `Clean` means both copies are identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DirtyState {
    HostDirty,
    DeviceDirty,
    Clean,
}

impl DirtyState {
    /// The host copy changed.
    #[must_use]
    pub fn host_written(self) -> Self {
        Self::HostDirty
    }

    /// A launch may have changed the device copy.
    #[must_use]
    pub fn device_written(self) -> Self {
        Self::DeviceDirty
    }

    /// A transfer made both copies equal.
    #[must_use]
    pub fn synced(self) -> Self {
        Self::Clean
    }

    pub fn needs_copy_in(self) -> bool {
        self == Self::HostDirty
    }

    pub fn needs_copy_out(self) -> bool {
        self == Self::DeviceDirty
    }
}

/// A host region mirrored by a lazily allocated device region.
#[derive(Debug)]
pub struct Buffer {
    host: SharedBytes,
    device: DeviceBuffer,
    state: DirtyState,
    /// Last transfer that touched the host region.
    last_transfer: Option<EventId>,
}

impl Buffer {
    /// New buffers start host dirty: nothing is on the device yet.
    pub(crate) fn new(bytes: AlignedBytes) -> Self {
        let size = bytes.len();
        Self {
            host: shared_bytes(bytes),
            device: DeviceBuffer::new(size),
            state: DirtyState::HostDirty,
            last_transfer: None,
        }
    }

    pub fn len(&self) -> usize {
        self.device.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> DirtyState {
        self.state
    }

    pub(crate) fn host(&self) -> &SharedBytes {
        &self.host
    }

    pub(crate) fn device(&self) -> &DeviceBuffer {
        &self.device
    }

    pub(crate) fn last_transfer(&self) -> Option<EventId> {
        self.last_transfer
    }

    pub(crate) fn record_transfer(&mut self, event: EventId) {
        self.last_transfer = Some(event);
    }

    pub(crate) fn host_written(&mut self) {
        self.state = self.state.host_written();
    }

    pub(crate) fn device_written(&mut self) {
        self.state = self.state.device_written();
    }

    pub(crate) fn synced(&mut self) {
        self.state = self.state.synced();
    }
}
