//! CUDA driver built on cudarc: NVRTC compilation, module loading and one stream per
//! backend. Completion is tracked with events recorded on that stream.

use std::sync::Arc;

use cudarc::driver::sys::{CUdevice_attribute, CUresult};
use cudarc::driver::{CudaContext, CudaFunction, CudaModule, CudaStream, DevicePtr, DriverError, LaunchConfig, PushKernelArg};
use cudarc::nvrtc::compile_ptx;
use parking_lot::Mutex;
use smallvec::SmallVec;
use snafu::ensure;
use tessel_dtype::{DeviceClass, ScalarValue};

use crate::driver::{DeviceEvent, Function, LaunchArg, Module};
use crate::error::{DriverStatus, Error, Result, SizeMismatchSnafu};
use crate::info::DeviceInfo;
use crate::memory::{DeviceMemory, SharedBytes};
use crate::queue::WorkSize;
use crate::source::scan_entry_points;

/// Threads per block when the caller leaves the local size to the driver.
const DEFAULT_BLOCK: usize = 256;

/// Map a CUDA driver failure onto the shared status codes.
pub(crate) fn translate(error: DriverError) -> Error {
    let status = match error.0 {
        CUresult::CUDA_ERROR_OUT_OF_MEMORY => DriverStatus::MemObjectAllocationFailure,
        CUresult::CUDA_ERROR_NOT_FOUND => DriverStatus::InvalidKernelName,
        CUresult::CUDA_ERROR_INVALID_VALUE => DriverStatus::InvalidValue,
        CUresult::CUDA_ERROR_INVALID_IMAGE | CUresult::CUDA_ERROR_INVALID_PTX => DriverStatus::InvalidBinary,
        CUresult::CUDA_ERROR_LAUNCH_OUT_OF_RESOURCES => DriverStatus::OutOfResources,
        CUresult::CUDA_ERROR_NO_DEVICE | CUresult::CUDA_ERROR_INVALID_DEVICE => DriverStatus::DeviceNotAvailable,
        _ => DriverStatus::ExecStatusError,
    };
    Error::driver(status, format!("{error:?}"))
}

/// Grid and block extents are 32-bit on the device side.
fn dim3(extents: [usize; 3]) -> Option<(u32, u32, u32)> {
    let [x, y, z] = extents.map(|extent| u32::try_from(extent).ok());
    Some((x?, y?, z?))
}

pub(crate) fn load_function(module: &Arc<CudaModule>, name: &str) -> Result<CudaFunction> {
    module.load_function(name).map_err(translate)
}

#[derive(Debug)]
pub struct CudaDriver {
    context: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    info: DeviceInfo,
}

impl CudaDriver {
    pub fn new(ordinal: usize) -> Result<Self> {
        let context = CudaContext::new(ordinal).map_err(translate)?;
        let stream = context.default_stream();

        let attribute = |attribute| context.attribute(attribute).map_err(translate);
        let (_, total_mem) = context.mem_get_info().map_err(translate)?;
        let info = DeviceInfo {
            class: DeviceClass::Gpu,
            name: context.name().map_err(translate)?,
            vendor: "NVIDIA Corporation".into(),
            version: format!(
                "CUDA {}.{}",
                attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)?,
                attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)?
            ),
            driver_version: "cudarc".into(),
            compute_units: attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MULTIPROCESSOR_COUNT)? as u32,
            global_mem_size: total_mem as u64,
            local_mem_size: attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_SHARED_MEMORY_PER_BLOCK)? as u64,
            max_alloc_size: total_mem as u64,
            max_work_group_size: attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)? as usize,
        };

        tracing::debug!(ordinal, device.name = %info.name, "CUDA driver opened");
        Ok(Self { context, stream, info })
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn build(&self, source: &str) -> Result<Module> {
        let build_failure = |message: String| Error::driver(DriverStatus::BuildProgramFailure, message);

        let entries = scan_entry_points(source).map_err(|diagnostic| build_failure(diagnostic.to_string()))?;
        let ptx = compile_ptx(source).map_err(|error| build_failure(format!("{error:?}")))?;
        let module = self.context.load_module(ptx).map_err(translate)?;
        Ok(Module::cuda(entries, module))
    }

    pub fn alloc(&self, size: usize) -> Result<DeviceMemory> {
        if size == 0 {
            return Err(Error::driver(DriverStatus::InvalidBufferSize, "zero-sized allocation"));
        }
        let slice = self.stream.alloc_zeros::<u8>(size).map_err(translate)?;
        Ok(DeviceMemory::Cuda { slice: Arc::new(Mutex::new(slice)), len: size })
    }

    fn record(&self) -> Result<DeviceEvent> {
        let event = self.stream.record_event(None).map_err(translate)?;
        Ok(DeviceEvent::cuda(event))
    }

    fn slice(memory: &DeviceMemory) -> Result<&Arc<Mutex<cudarc::driver::CudaSlice<u8>>>> {
        match memory {
            DeviceMemory::Cuda { slice, .. } => Ok(slice),
            _ => Err(Error::driver(DriverStatus::InvalidValue, "memory does not belong to the CUDA driver")),
        }
    }

    pub fn enqueue_write(&self, dst: &DeviceMemory, src: &SharedBytes) -> Result<DeviceEvent> {
        let src = src.lock();
        let (expected, actual) = (dst.len(), src.len());
        ensure!(expected == actual, SizeMismatchSnafu { expected, actual });

        let mut slice = Self::slice(dst)?.lock();
        self.stream.memcpy_htod(src.as_bytes(), &mut *slice).map_err(translate)?;
        self.record()
    }

    pub fn enqueue_read(&self, dst: &SharedBytes, src: &DeviceMemory) -> Result<DeviceEvent> {
        let mut dst = dst.lock();
        let (expected, actual) = (dst.len(), src.len());
        ensure!(expected == actual, SizeMismatchSnafu { expected, actual });

        let slice = Self::slice(src)?.lock();
        self.stream.memcpy_dtoh(&*slice, dst.as_bytes_mut()).map_err(translate)?;
        self.record()
    }

    pub fn enqueue_launch(&self, function: &Function, args: &[LaunchArg], work: &WorkSize) -> Result<DeviceEvent> {
        let cuda_function = function.cuda_function()?;
        if args.len() != function.arity() {
            return Err(Error::driver(
                DriverStatus::InvalidKernelArgs,
                format!("kernel `{}` takes {} arguments, got {}", function.name(), function.arity(), args.len()),
            ));
        }
        if let Err((status, message)) = work.validate(self.info.max_work_group_size) {
            return Ok(DeviceEvent::failed(status, format!("kernel `{}`: {message}", function.name())));
        }

        let block = work.local.unwrap_or([work.global[0].min(DEFAULT_BLOCK), 1, 1]);
        let grid: [usize; 3] = std::array::from_fn(|axis| work.global[axis].div_ceil(block[axis]));
        let (Some(grid_dim), Some(block_dim)) = (dim3(grid), dim3(block)) else {
            return Ok(DeviceEvent::failed(
                DriverStatus::InvalidGlobalWorkSize,
                format!("kernel `{}`: grid {grid:?} or block {block:?} exceeds 32-bit extents", function.name()),
            ));
        };
        let config = LaunchConfig { grid_dim, block_dim, shared_mem_bytes: 0 };

        // Device pointers are resolved now, while the allocations are locked.
        let guards = args
            .iter()
            .map(|arg| match arg {
                LaunchArg::Memory(memory) => Self::slice(memory).map(|slice| Some(slice.lock())),
                LaunchArg::Scalar(_) => Ok(None),
            })
            .collect::<Result<SmallVec<[_; 8]>>>()?;
        let mut pointers: SmallVec<[u64; 8]> = SmallVec::new();
        let mut syncs = Vec::new();
        for guard in guards.iter().flatten() {
            let (pointer, sync) = guard.device_ptr(&self.stream);
            pointers.push(pointer);
            syncs.push(sync);
        }

        let mut builder = self.stream.launch_builder(cuda_function);
        let mut next_pointer = pointers.iter();
        for arg in args {
            match arg {
                LaunchArg::Memory(_) => {
                    if let Some(pointer) = next_pointer.next() {
                        builder.arg(pointer);
                    }
                }
                LaunchArg::Scalar(ScalarValue::Bool(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::Int8(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::UInt8(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::Int16(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::UInt16(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::Int32(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::UInt32(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::Int64(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::UInt64(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::Float32(v)) => {
                    builder.arg(v);
                }
                LaunchArg::Scalar(ScalarValue::Float64(v)) => {
                    builder.arg(v);
                }
            }
        }

        // SAFETY: argument count matches the signature and every pointer refers to a live,
        // locked allocation of this context.
        let launched = unsafe { builder.launch(config) };
        drop(syncs);
        match launched {
            Ok(_) => self.record(),
            Err(error) => {
                let error = translate(error);
                let status = error.status().unwrap_or(DriverStatus::ExecStatusError);
                Ok(DeviceEvent::failed(status, error.to_string()))
            }
        }
    }

    pub fn enqueue_marker(&self) -> Result<DeviceEvent> {
        self.record()
    }
}
