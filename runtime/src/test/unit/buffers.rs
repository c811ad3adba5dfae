use tessel_device::{HostOptions, WorkSize};

use crate::test::{SOURCE, backend, backend_with, backend_with_host};
use crate::{ArgArray, ConfigBit, DirtyState, Error, ErrorKind, HandleFault};

#[test]
fn test_copy_to_device_is_idempotent() {
    let mut backend = backend();
    let buffer = backend.create_buffer(&[1, 2, 3, 4]).unwrap();

    assert_eq!(backend.buffer_state(buffer).unwrap(), DirtyState::HostDirty);
    assert!(backend.copy_to_device(buffer).unwrap());
    assert!(!backend.copy_to_device(buffer).unwrap());
    backend.wait().unwrap();

    assert_eq!(backend.buffer_state(buffer).unwrap(), DirtyState::Clean);
    assert_eq!(backend.stats().copies_to_device, 1);
    assert!(!backend.copy_from_device(buffer).unwrap());
    assert_eq!(backend.stats().copies_from_device, 0);
}

#[test]
fn test_host_write_marks_host_dirty() {
    let mut backend = backend();
    let buffer = backend.create_buffer_zeroed(4).unwrap();
    backend.copy_to_device(buffer).unwrap();

    backend.write_buffer(buffer, 2, &[9, 9]).unwrap();
    assert_eq!(backend.buffer_state(buffer).unwrap(), DirtyState::HostDirty);
    assert_eq!(backend.read_buffer(buffer).unwrap(), vec![0, 0, 9, 9]);
    assert!(backend.copy_to_device(buffer).unwrap());
}

#[test]
fn test_partial_write_keeps_device_results() {
    let mut backend = backend_with(&[ConfigBit::MinimizeCopies]);
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let buffer = backend.create_buffer_from(&[1i32, 2, 3]).unwrap();

    backend.dispatch(add, &ArgArray::new().scalar(0, 42i32).buffer(1, buffer), &WorkSize::new_1d(3)).unwrap();
    backend.write_buffer(buffer, 0, &0i32.to_ne_bytes()).unwrap();

    assert_eq!(backend.buffer_state(buffer).unwrap(), DirtyState::HostDirty);
    assert_eq!(backend.read_buffer_as::<i32>(buffer).unwrap(), vec![0, 44, 45]);
    assert_eq!(backend.stats().copies_from_device, 1);
}

#[test]
fn test_whole_write_discards_device_copy() {
    let mut backend = backend_with(&[ConfigBit::MinimizeCopies]);
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let buffer = backend.create_buffer_from(&[1i32]).unwrap();

    backend.dispatch(add, &ArgArray::new().scalar(0, 1i32).buffer(1, buffer), &WorkSize::new_1d(1)).unwrap();
    backend.write_buffer(buffer, 0, &7i32.to_ne_bytes()).unwrap();

    assert_eq!(backend.read_buffer_as::<i32>(buffer).unwrap(), vec![7]);
    assert_eq!(backend.stats().copies_from_device, 0);
}

#[test]
fn test_write_out_of_bounds() {
    let mut backend = backend();
    let buffer = backend.create_buffer_zeroed(4).unwrap();

    let err = backend.write_buffer(buffer, 3, &[1, 2]).unwrap_err();
    assert!(matches!(err, Error::OutOfBounds { offset: 3, len: 2, size: 4 }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Binding);

    let err = backend.write_buffer(buffer, usize::MAX, &[1]).unwrap_err();
    assert!(matches!(err, Error::OutOfBounds { .. }), "{err}");
}

#[test]
fn test_empty_buffers_are_rejected() {
    let mut backend = backend();
    assert_eq!(backend.create_buffer(&[]).unwrap_err().kind(), ErrorKind::Allocation);
    assert_eq!(backend.create_buffer_zeroed(0).unwrap_err().kind(), ErrorKind::Allocation);
}

#[test]
fn test_allocation_is_lazy() {
    let mut backend = backend_with_host(HostOptions { max_alloc_size: 16, ..HostOptions::default() });

    // Too large for the device, but nothing is allocated yet.
    let buffer = backend.create_buffer_zeroed(64).unwrap();
    assert_eq!(backend.buffer_len(buffer).unwrap(), 64);

    let err = backend.copy_to_device(buffer).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert_eq!(backend.buffer_state(buffer).unwrap(), DirtyState::HostDirty);
}

#[test]
fn test_device_memory_budget() {
    let mut backend = backend_with_host(HostOptions { global_mem_size: 96, ..HostOptions::default() });
    let first = backend.create_buffer_zeroed(64).unwrap();
    let second = backend.create_buffer_zeroed(64).unwrap();

    backend.copy_to_device(first).unwrap();
    let err = backend.copy_to_device(second).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);

    // Releasing the first buffer returns its memory once its transfer retired.
    backend.wait().unwrap();
    backend.release_buffer(first).unwrap();
    backend.copy_to_device(second).unwrap();
    backend.wait().unwrap();
}

#[test]
fn test_released_handle_is_stale() {
    let mut backend = backend();
    let buffer = backend.create_buffer(&[1]).unwrap();
    backend.release_buffer(buffer).unwrap();

    for err in [
        backend.buffer_len(buffer).unwrap_err(),
        backend.release_buffer(buffer).unwrap_err(),
        backend.read_buffer(buffer).unwrap_err(),
    ] {
        assert!(matches!(err, Error::InvalidHandle { fault: HandleFault::Stale, .. }), "{err}");
    }

    // The slot is reused under a new handle.
    let again = backend.create_buffer(&[2]).unwrap();
    assert_ne!(again, buffer);
    assert_eq!(backend.read_buffer(again).unwrap(), vec![2]);
}

#[test]
fn test_release_with_transfer_in_flight() {
    let mut backend = backend();
    let buffer = backend.create_buffer(&[5; 1024]).unwrap();
    backend.copy_to_device(buffer).unwrap();
    backend.release_buffer(buffer).unwrap();
    backend.wait().unwrap();
}

#[test]
fn test_host_access_leaves_unrelated_failure_for_wait() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let fail = backend.get_kernel(program, "fail").unwrap();
    let buffer = backend.create_buffer_from(&[1i32, 2, 3]).unwrap();

    backend.dispatch(add, &ArgArray::new().scalar(0, 1i32).buffer(1, buffer), &WorkSize::new_1d(3)).unwrap();
    backend.dispatch(fail, &ArgArray::new(), &WorkSize::new_1d(1)).unwrap();
    backend.write_buffer(buffer, 0, &9i32.to_ne_bytes()).unwrap();
    assert_eq!(backend.read_buffer_as::<i32>(buffer).unwrap(), vec![9, 3, 4]);

    let err = backend.wait().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(backend.read_buffer_as::<i32>(buffer).unwrap(), vec![9, 3, 4]);
}
