use std::time::Duration;

use tessel_device::{HostOptions, NumberQuery, StringQuery, WorkSize};
use test_case::test_case;

use crate::test::{SOURCE, backend, backend_with, backend_with_host, kernels};
use crate::{ArgArray, Backend, BackendOptions, Config, ConfigBit, DeviceClass, ErrorKind};

#[test]
fn test_nested_compute_sessions() {
    let mut backend = backend_with(&[ConfigBit::Profile, ConfigBit::ShowComputeModel]);
    let program = backend.compile(SOURCE).unwrap();
    let sleepy = backend.get_kernel(program, "sleepy").unwrap();

    backend.compute_start().unwrap();
    backend.compute_start().unwrap();
    backend.dispatch(sleepy, &ArgArray::new().scalar(0, 5i32), &WorkSize::new_1d(1)).unwrap();
    backend.compute_end().unwrap();
    backend.compute_end().unwrap();
    backend.wait().unwrap();

    // Only the outer pair records markers.
    assert_eq!(backend.stats().markers, 2);
    assert!(backend.compute_time() >= Duration::from_millis(5));
    assert_eq!(backend.last_compute_time(), Some(backend.compute_time()));

    let err = backend.compute_end().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Fatal);
}

#[test]
fn test_full_ring_keeps_failures() {
    let options = BackendOptions::builder().event_capacity(2).kernels(kernels()).build();
    let mut backend = Backend::new(options).unwrap();
    let program = backend.compile(SOURCE).unwrap();
    let fail = backend.get_kernel(program, "fail").unwrap();
    let sleepy = backend.get_kernel(program, "sleepy").unwrap();

    backend.dispatch(fail, &ArgArray::new(), &WorkSize::new_1d(1)).unwrap();
    for _ in 0..4 {
        backend.dispatch(sleepy, &ArgArray::new().scalar(0, 1i32), &WorkSize::new_1d(1)).unwrap();
    }

    assert!(backend.stats().ring_stalls >= 3);
    assert_eq!(backend.wait().unwrap_err().kind(), ErrorKind::Execution);
    backend.wait().unwrap();
}

#[test]
fn test_device_queries() {
    let host = HostOptions { compute_units: 3, max_alloc_size: 1 << 20, ..HostOptions::default() };
    let backend = backend_with_host(host);

    assert_eq!(backend.device_class(), DeviceClass::Cpu);
    assert_eq!(backend.max_compute_units(), 3);
    assert_eq!(backend.device_number(NumberQuery::MaxAllocSize), 1 << 20);
    assert_eq!(backend.device_number(NumberQuery::ComputeUnits), 3);
    assert!(!backend.device_string(StringQuery::Name).is_empty());
}

#[test_case(&[] ; "no device bit")]
#[test_case(&[ConfigBit::Cpu] ; "cpu bit")]
#[test_case(&[ConfigBit::Cpu, ConfigBit::Trace, ConfigBit::TraceCopies, ConfigBit::Info] ; "cpu with logging")]
fn test_host_device_selected(bits: &[ConfigBit]) {
    let backend = backend_with(bits);
    assert_eq!(backend.device_class(), DeviceClass::Cpu);
    assert_eq!(backend.config(), Config::from_bits(bits.iter().copied()));
}

#[cfg(not(feature = "cuda"))]
#[test]
fn test_gpu_without_driver_is_unsupported() {
    let options = BackendOptions::builder().config(Config::from_mode(1 << 1)).kernels(kernels()).build();
    let err = Backend::new(options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Device);
}

#[test]
fn test_drop_drains_queue() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let sleepy = backend.get_kernel(program, "sleepy").unwrap();
    backend.dispatch(sleepy, &ArgArray::new().scalar(0, 5i32), &WorkSize::new_1d(1)).unwrap();
    assert!(backend.last_event() > 0);
    drop(backend);
}
