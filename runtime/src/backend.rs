//! The handle-based façade over one device.
//!
//! A [`Backend`] owns the driver, the command queue and three arenas (programs, kernels,
//! buffers). Callers only ever see handles; every call validates its handles before touching
//! the object behind them. All mutating calls take `&mut self`, so a backend is driven by one
//! caller at a time while the device runs asynchronously behind the queue.

use std::sync::Arc;
use std::time::Duration;

use smallvec::SmallVec;
use snafu::ensure;
use tessel_device::{
    AlignedBytes, CommandQueue, DeviceInfo, DeviceMemory, Driver, DriverStatus, EventId, LaunchArg, NumberQuery,
    QueueStats, StringQuery, WorkSize,
};
use tessel_dtype::{DeviceClass, ScalarValue};

use crate::args::ArgArray;
use crate::buffer::{Buffer, DirtyState};
use crate::config::{BackendOptions, Config};
use crate::error::{
    CompileSnafu, DeadBufferSnafu, EmptyBufferSnafu, Error, ExecutionFailure, KernelNotFoundSnafu, OutOfBoundsSnafu,
    ProgramNotReadySnafu, Result, SlotOutOfRangeSnafu,
};
use crate::handle::{Arena, BufferHandle, Handle, KernelHandle, ProgramHandle};
use crate::kernel::{Access, ArgBinding, Kernel};
use crate::program::{Program, ProgramState};

/// Top-level device context.
#[derive(Debug)]
pub struct Backend {
    config: Config,
    queue: CommandQueue,
    programs: Arena<ProgramHandle, Program>,
    kernels: Arena<KernelHandle, Kernel>,
    buffers: Arena<BufferHandle, Buffer>,
    last_failure: Option<ExecutionFailure>,
    reported_sessions: u64,
}

impl Backend {
    /// Open the device selected by `options.config` and create its queue.
    pub fn new(options: BackendOptions) -> Result<Self> {
        let BackendOptions { config, event_capacity, device_ordinal, host, kernels } = options;
        let class = config.device_class();
        let driver = Driver::open(class, device_ordinal, host, kernels)?;

        if config.info() {
            tracing::info!(device.class = %class, "device report\n{}", driver.info());
        }
        tracing::debug!(
            device.class = %class,
            device.name = %driver.info().name,
            config = %config,
            event_capacity,
            "backend created"
        );

        Ok(Self {
            config,
            queue: CommandQueue::new(Arc::new(driver), event_capacity),
            programs: Arena::new(),
            kernels: Arena::new(),
            buffers: Arena::new(),
            last_failure: None,
            reported_sessions: 0,
        })
    }

    /// Backend configured from `TESSEL_MODE`.
    pub fn from_env() -> Result<Self> {
        Self::new(BackendOptions::from_env())
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn device_class(&self) -> DeviceClass {
        self.queue.driver().class()
    }

    // =========================================================================
    // Programs
    // =========================================================================

    /// Build `source` into a program.
    ///
    /// A failed build still occupies a handle in `COMPILE_FAILED` state; the returned
    /// [`Error::Compile`] carries it so the caller can fetch the [`Backend::build_log`].
    pub fn compile(&mut self, source: &str) -> Result<ProgramHandle> {
        if self.config.show_code() {
            tracing::info!(source.len = source.len(), "compiling program\n{source}");
        }

        let mut program = Program::new();
        program.begin();
        let handle = self.programs.insert(program)?;

        let built = self.queue.driver().build(source);
        let program = self.programs.get_mut(handle)?;
        match built {
            Ok(module) => {
                let entries = module.entries().len();
                program.succeed(module);
                if self.config.trace() {
                    tracing::debug!(program = %handle, entries, "program compiled");
                }
                Ok(handle)
            }
            Err(error) => {
                let diagnostic = match error {
                    tessel_device::Error::Driver { message, .. } => message,
                    other => other.to_string(),
                };
                tracing::warn!(program = %handle, %diagnostic, "program build failed");
                program.fail(diagnostic.clone());
                CompileSnafu { program: handle, diagnostic }.fail()
            }
        }
    }

    pub fn program_state(&self, program: ProgramHandle) -> Result<ProgramState> {
        Ok(self.programs.get(program)?.state())
    }

    pub fn program_ok(&self, program: ProgramHandle) -> Result<bool> {
        Ok(self.programs.get(program)?.is_compiled())
    }

    /// Diagnostic text of a failed build; `None` for programs that compiled.
    pub fn build_log(&self, program: ProgramHandle) -> Result<Option<&str>> {
        Ok(self.programs.get(program)?.diagnostic())
    }

    /// Entry points a compiled program exports; empty for a failed build.
    pub fn kernel_names(&self, program: ProgramHandle) -> Result<Vec<&str>> {
        Ok(self.programs.get(program)?.entry_names().collect())
    }

    /// Destroy a program and every kernel resolved from it.
    pub fn unload_program(&mut self, program: ProgramHandle) -> Result<()> {
        let removed = self.programs.remove(program)?;
        let mut kernels = 0usize;
        for kernel in removed.kernels() {
            match self.kernels.remove(kernel) {
                Ok(_) => kernels += 1,
                Err(error) => tracing::debug!(%kernel, %error, "kernel already gone"),
            }
        }
        if self.config.trace() {
            tracing::debug!(%program, kernels, "program unloaded");
        }
        Ok(())
    }

    // =========================================================================
    // Kernels
    // =========================================================================

    /// Resolve `name` in a compiled program. Repeated lookups return the same handle.
    pub fn get_kernel(&mut self, program: ProgramHandle, name: &str) -> Result<KernelHandle> {
        let entry = self.programs.get(program)?;
        ensure!(entry.is_compiled(), ProgramNotReadySnafu { program, state: entry.state() });
        if let Some(kernel) = entry.cached_kernel(name) {
            return Ok(kernel);
        }

        let Some(module) = entry.module() else {
            return ProgramNotReadySnafu { program, state: entry.state() }.fail();
        };
        let function = match module.function(name) {
            Ok(function) => function,
            Err(error) if error.status() == Some(DriverStatus::InvalidKernelName) => {
                return KernelNotFoundSnafu { program, name }.fail();
            }
            Err(error) => return Err(error.into()),
        };

        let arity = function.arity();
        let kernel = self.kernels.insert(Kernel::new(program, function))?;
        self.programs.get_mut(program)?.cache_kernel(name, kernel);
        if self.config.trace() {
            tracing::debug!(%program, %kernel, kernel.name = name, kernel.arity = arity, "kernel resolved");
        }
        Ok(kernel)
    }

    pub fn kernel_arity(&self, kernel: KernelHandle) -> Result<usize> {
        Ok(self.kernels.get(kernel)?.arity())
    }

    pub fn kernel_name(&self, kernel: KernelHandle) -> Result<&str> {
        Ok(self.kernels.get(kernel)?.name())
    }

    /// Program the kernel was resolved from.
    pub fn kernel_program(&self, kernel: KernelHandle) -> Result<ProgramHandle> {
        Ok(self.kernels.get(kernel)?.program())
    }

    /// Current binding of one slot.
    pub fn kernel_arg(&self, kernel: KernelHandle, slot: usize) -> Result<Option<ArgBinding>> {
        Ok(self.kernels.get(kernel)?.arg(slot).copied())
    }

    /// Bind a scalar to `slot`, replacing any previous binding.
    pub fn set_arg(&mut self, kernel: KernelHandle, slot: usize, value: impl Into<ScalarValue>) -> Result<()> {
        self.kernels.get_mut(kernel)?.set_arg(slot, value.into())
    }

    /// Bind a buffer to `slot`. Its device address is looked up at dispatch.
    pub fn set_arg_buffer(
        &mut self,
        kernel: KernelHandle,
        slot: usize,
        buffer: BufferHandle,
        access: Access,
    ) -> Result<()> {
        self.buffers.get(buffer)?;
        self.kernels.get_mut(kernel)?.set_arg(slot, ArgBinding::Buffer { buffer, access })
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Apply `args` to the kernel, then enqueue copy-in of host dirty buffers, the launch, and
    /// (unless copies are minimized) copy-out of every buffer the launch may write.
    ///
    /// Binding problems are reported here and nothing is enqueued. Failures of the launch
    /// itself, including an invalid work size, surface at the next [`Backend::wait`].
    pub fn dispatch(&mut self, kernel: KernelHandle, args: &ArgArray, work: &WorkSize) -> Result<()> {
        let entry = self.kernels.get_mut(kernel)?;
        let arity = entry.arity();
        for (slot, _) in args.iter() {
            ensure!(slot < arity, SlotOutOfRangeSnafu { kernel: entry.name(), slot, arity });
        }
        for (slot, binding) in args.iter() {
            entry.set_arg(slot, binding)?;
        }

        let bindings = entry.bindings()?;
        let function = entry.function().clone();

        if self.config.show_kernel_model() {
            let model: ArgArray = bindings.iter().copied().enumerate().collect();
            tracing::info!(kernel.name = function.name(), kernel.arity = arity, ?work, args = %model, "kernel model");
        }

        // Each buffer once, remembering whether any slot may write it.
        let mut touched: SmallVec<[(BufferHandle, bool); 8]> = SmallVec::new();
        for (slot, binding) in bindings.iter().enumerate() {
            let ArgBinding::Buffer { buffer, access } = *binding else { continue };
            ensure!(
                self.buffers.contains(buffer),
                DeadBufferSnafu { kernel: function.name(), slot, buffer: buffer.raw() }
            );
            match touched.iter_mut().find(|(seen, _)| *seen == buffer) {
                Some((_, written)) => *written |= access.writes(),
                None => touched.push((buffer, access.writes())),
            }
        }

        for &(handle, _) in &touched {
            let buffer = self.buffers.get_mut(handle)?;
            upload(&mut self.queue, self.config, handle, buffer)?;
        }

        let mut launch_args: SmallVec<[LaunchArg; 8]> = SmallVec::with_capacity(arity);
        for binding in &bindings {
            let arg = match *binding {
                ArgBinding::Scalar(value) => LaunchArg::Scalar(value),
                ArgBinding::Buffer { buffer, .. } => {
                    let memory = self.buffers.get(buffer)?.device().ensure_allocated(self.queue.driver())?;
                    LaunchArg::Memory(memory.clone())
                }
            };
            launch_args.push(arg);
        }

        let event = self.queue.launch(&function, &launch_args, work)?;
        if self.config.trace() {
            let global = work.global_items();
            tracing::debug!(%kernel, kernel.name = function.name(), event, global = ?global, "launch enqueued");
        }

        for &(handle, written) in &touched {
            if !written {
                continue;
            }
            let buffer = self.buffers.get_mut(handle)?;
            buffer.device_written();
            if !self.config.minimize_copies() {
                download(&mut self.queue, self.config, handle, buffer)?;
            }
        }
        Ok(())
    }

    /// Decode a serialized argument array and dispatch with it.
    pub fn dispatch_serialized(&mut self, kernel: KernelHandle, args: &[u8], work: &WorkSize) -> Result<()> {
        let args = ArgArray::decode(args)?;
        self.dispatch(kernel, &args, work)
    }

    // =========================================================================
    // Buffers
    // =========================================================================

    /// Create a buffer holding a copy of `bytes`. Nothing is allocated on the device yet.
    pub fn create_buffer(&mut self, bytes: &[u8]) -> Result<BufferHandle> {
        ensure!(!bytes.is_empty(), EmptyBufferSnafu);
        self.insert_buffer(AlignedBytes::from_bytes(bytes))
    }

    pub fn create_buffer_zeroed(&mut self, len: usize) -> Result<BufferHandle> {
        ensure!(len > 0, EmptyBufferSnafu);
        self.insert_buffer(AlignedBytes::zeroed(len))
    }

    /// Create a buffer from a typed slice.
    pub fn create_buffer_from<T: bytemuck::Pod>(&mut self, values: &[T]) -> Result<BufferHandle> {
        self.create_buffer(bytemuck::cast_slice(values))
    }

    fn insert_buffer(&mut self, bytes: AlignedBytes) -> Result<BufferHandle> {
        let len = bytes.len();
        let handle = self.buffers.insert(Buffer::new(bytes))?;
        if self.config.trace() {
            tracing::debug!(buffer = %handle, len, "buffer created");
        }
        Ok(handle)
    }

    /// Drop a buffer. Transfers still in flight keep its memory alive until they retire;
    /// kernels still bound to it fail their next dispatch.
    pub fn release_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        let released = self.buffers.remove(buffer)?;
        if self.config.trace() {
            tracing::debug!(%buffer, len = released.len(), state = %released.state(), "buffer released");
        }
        Ok(())
    }

    pub fn buffer_len(&self, buffer: BufferHandle) -> Result<usize> {
        Ok(self.buffers.get(buffer)?.len())
    }

    pub fn buffer_state(&self, buffer: BufferHandle) -> Result<DirtyState> {
        Ok(self.buffers.get(buffer)?.state())
    }

    /// Overwrite `bytes.len()` bytes of the host copy starting at `offset`.
    ///
    /// A partial write into a device dirty buffer pulls the device copy first so the bytes
    /// outside the written range keep the kernel's results.
    pub fn write_buffer(&mut self, buffer: BufferHandle, offset: usize, bytes: &[u8]) -> Result<()> {
        let entry = self.buffers.get(buffer)?;
        let size = entry.len();
        let len = bytes.len();
        ensure!(offset.checked_add(len).is_some_and(|end| end <= size), OutOfBoundsSnafu { offset, len, size });

        let whole = offset == 0 && len == size;
        if entry.state().needs_copy_out() && !whole {
            self.copy_from_device(buffer)?;
        }
        self.sync_host(buffer)?;

        let entry = self.buffers.get_mut(buffer)?;
        entry.host().lock().as_bytes_mut()[offset..offset + len].copy_from_slice(bytes);
        entry.host_written();
        Ok(())
    }

    /// Current contents, pulling from the device when it holds newer data.
    pub fn read_buffer(&mut self, buffer: BufferHandle) -> Result<Vec<u8>> {
        self.get_buffer_from_device_if_dirty(buffer)?;
        self.sync_host(buffer)?;
        Ok(self.buffers.get(buffer)?.host().lock().as_bytes().to_vec())
    }

    /// Typed view of [`Backend::read_buffer`].
    pub fn read_buffer_as<T: bytemuck::Pod>(&mut self, buffer: BufferHandle) -> Result<Vec<T>> {
        let bytes = self.read_buffer(buffer)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Enqueue a host to device transfer if the host copy is newer. Returns whether a
    /// transfer was enqueued.
    pub fn copy_to_device(&mut self, buffer: BufferHandle) -> Result<bool> {
        let entry = self.buffers.get_mut(buffer)?;
        upload(&mut self.queue, self.config, buffer, entry)
    }

    /// Enqueue a device to host transfer if the device copy is newer. Returns whether a
    /// transfer was enqueued; the host copy is valid once the queue has drained.
    pub fn copy_from_device(&mut self, buffer: BufferHandle) -> Result<bool> {
        let entry = self.buffers.get_mut(buffer)?;
        download(&mut self.queue, self.config, buffer, entry)
    }

    /// Pull the device copy if it is newer and wait for it to land. Returns whether a
    /// transfer happened.
    pub fn get_buffer_from_device_if_dirty(&mut self, buffer: BufferHandle) -> Result<bool> {
        let pulled = self.copy_from_device(buffer)?;
        if pulled {
            self.sync_host(buffer)?;
        }
        Ok(pulled)
    }

    /// Wait for the last transfer that touched the host copy of `buffer`.
    fn sync_host(&mut self, buffer: BufferHandle) -> Result<()> {
        let last = self.buffers.get(buffer)?.last_transfer();
        if let Some(event) = last {
            self.queue.wait_for(event);
        }
        Ok(())
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Block until everything enqueued so far has finished.
    ///
    /// Reports the first execution failure since the previous `wait` and keeps it for
    /// [`Backend::status`].
    pub fn wait(&mut self) -> Result<()> {
        let result = self.queue.wait();

        if self.config.profile() && self.queue.compute_sessions() > self.reported_sessions {
            self.reported_sessions = self.queue.compute_sessions();
            tracing::info!(
                sessions = self.reported_sessions,
                last = ?self.queue.last_compute_time(),
                total = ?self.queue.compute_time(),
                "compute time"
            );
        }

        match result {
            Ok(()) => {
                if self.config.trace() {
                    tracing::debug!(retired = self.queue.retired(), "queue drained");
                }
                Ok(())
            }
            Err(error) => {
                let error = Error::from(error);
                tracing::warn!(%error, kind = %error.kind(), "queued work failed");
                self.last_failure = Some(ExecutionFailure::from(&error));
                Err(error)
            }
        }
    }

    /// Open a compute session. Sessions nest; only the outermost one is timed.
    pub fn compute_start(&mut self) -> Result<()> {
        self.queue.compute_start()?;
        if self.config.show_compute_model() {
            tracing::info!(depth = self.queue.compute_depth(), "compute start");
        }
        Ok(())
    }

    pub fn compute_end(&mut self) -> Result<()> {
        self.queue.compute_end()?;
        if self.config.show_compute_model() {
            tracing::info!(depth = self.queue.compute_depth(), "compute end");
        }
        Ok(())
    }

    /// Device time of all compute sessions retired by a `wait`.
    pub fn compute_time(&self) -> Duration {
        self.queue.compute_time()
    }

    pub fn last_compute_time(&self) -> Option<Duration> {
        self.queue.last_compute_time()
    }

    /// Last execution failure reported by [`Backend::wait`].
    pub fn status(&self) -> Result<(), ExecutionFailure> {
        match &self.last_failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }

    pub fn clear_status(&mut self) {
        self.last_failure = None;
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Event id of the most recently enqueued operation.
    pub fn last_event(&self) -> EventId {
        self.queue.submitted()
    }

    // =========================================================================
    // Device Queries
    // =========================================================================

    pub fn info(&self) -> &DeviceInfo {
        self.queue.driver().info()
    }

    pub fn max_compute_units(&self) -> u32 {
        self.info().compute_units
    }

    pub fn device_string(&self, query: StringQuery) -> &str {
        self.info().string(query)
    }

    pub fn device_number(&self, query: NumberQuery) -> u64 {
        self.info().number(query)
    }
}

impl Drop for Backend {
    fn drop(&mut self) {
        if let Err(error) = self.queue.wait() {
            tracing::warn!(%error, "queued work failed while shutting down");
        }
        tracing::debug!(
            programs = self.programs.len(),
            kernels = self.kernels.len(),
            buffers = self.buffers.len(),
            "backend dropped"
        );
    }
}

fn device_memory<'a>(queue: &CommandQueue, buffer: &'a Buffer) -> Result<&'a DeviceMemory> {
    Ok(buffer.device().ensure_allocated(queue.driver())?)
}

/// Copy-in when the host copy is ahead.
fn upload(queue: &mut CommandQueue, config: Config, handle: BufferHandle, buffer: &mut Buffer) -> Result<bool> {
    if !buffer.state().needs_copy_in() {
        return Ok(false);
    }

    let memory = device_memory(queue, buffer)?.clone();
    let event = queue.copy_in(&memory, buffer.host())?;
    buffer.record_transfer(event);
    buffer.synced();

    if config.trace_copies() {
        tracing::debug!(buffer = %handle, bytes = memory.len(), event, "copy to device");
    }
    Ok(true)
}

/// Copy-out when the device copy is ahead.
fn download(queue: &mut CommandQueue, config: Config, handle: BufferHandle, buffer: &mut Buffer) -> Result<bool> {
    if !buffer.state().needs_copy_out() {
        return Ok(false);
    }

    let memory = device_memory(queue, buffer)?.clone();
    let event = queue.copy_out(buffer.host(), &memory)?;
    buffer.record_transfer(event);
    buffer.synced();

    if config.trace_copies() {
        tracing::debug!(buffer = %handle, bytes = memory.len(), event, "copy from device");
    }
    Ok(true)
}
