use tessel_device::{DriverStatus, WorkSize};
use test_case::test_case;

use crate::test::{SOURCE, backend, backend_with};
use crate::{Access, ArgArray, ArgBinding, ConfigBit, DirtyState, Error, ErrorKind, ScalarValue};

#[test]
fn test_add_scalar_to_buffer() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let buffer = backend.create_buffer_from(&[1i32, 2, 3]).unwrap();

    backend.set_arg(add, 0, 42i32).unwrap();
    backend.set_arg_buffer(add, 1, buffer, Access::ReadWrite).unwrap();
    backend.dispatch(add, &ArgArray::new(), &WorkSize::new_1d(3)).unwrap();
    backend.wait().unwrap();

    assert_eq!(backend.buffer_state(buffer).unwrap(), DirtyState::Clean);
    assert_eq!(backend.read_buffer_as::<i32>(buffer).unwrap(), vec![43, 44, 45]);

    let stats = backend.stats();
    assert_eq!((stats.copies_to_device, stats.launches, stats.copies_from_device), (1, 1, 1));
    assert_eq!(stats.bytes_to_device, 12);
    assert!(backend.status().is_ok());
}

#[test]
fn test_minimized_copies_stay_on_device() {
    let mut backend = backend_with(&[ConfigBit::MinimizeCopies]);
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let buffer = backend.create_buffer_from(&[1i32, 2, 3]).unwrap();

    let args = ArgArray::new().scalar(0, 42i32).buffer(1, buffer);
    backend.dispatch(add, &args, &WorkSize::new_1d(3)).unwrap();
    backend.wait().unwrap();

    assert_eq!(backend.buffer_state(buffer).unwrap(), DirtyState::DeviceDirty);
    assert_eq!(backend.stats().copies_from_device, 0);

    assert!(backend.get_buffer_from_device_if_dirty(buffer).unwrap());
    assert_eq!(backend.buffer_state(buffer).unwrap(), DirtyState::Clean);
    assert!(!backend.get_buffer_from_device_if_dirty(buffer).unwrap());
    assert_eq!(backend.stats().copies_from_device, 1);
    assert_eq!(backend.read_buffer_as::<i32>(buffer).unwrap(), vec![43, 44, 45]);
}

#[test]
fn test_clean_buffer_is_not_copied_in_again() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let buffer = backend.create_buffer_from(&[0i32; 4]).unwrap();
    let args = ArgArray::new().scalar(0, 1i32).buffer(1, buffer);

    backend.dispatch(add, &args, &WorkSize::new_1d(4)).unwrap();
    let after_first = backend.stats();
    backend.dispatch(add, &args, &WorkSize::new_1d(4)).unwrap();
    backend.wait().unwrap();
    let after_second = backend.stats();

    assert_eq!(after_first.copies_to_device, 1);
    assert_eq!(after_second.copies_to_device, 1);
    assert_eq!(after_second.launches, 2);
    assert_eq!(backend.read_buffer_as::<i32>(buffer).unwrap(), vec![2; 4]);
}

#[test]
fn test_last_binding_wins() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let first = backend.create_buffer_from(&[0i32]).unwrap();
    let second = backend.create_buffer_from(&[100i32]).unwrap();

    backend.set_arg(add, 0, 1i32).unwrap();
    backend.set_arg(add, 0, 5i32).unwrap();
    backend.set_arg_buffer(add, 1, first, Access::ReadWrite).unwrap();
    backend.set_arg_buffer(add, 1, second, Access::ReadWrite).unwrap();
    backend.dispatch(add, &ArgArray::new(), &WorkSize::new_1d(1)).unwrap();
    backend.wait().unwrap();

    assert_eq!(backend.read_buffer_as::<i32>(first).unwrap(), vec![0]);
    assert_eq!(backend.read_buffer_as::<i32>(second).unwrap(), vec![105]);
    assert_eq!(backend.kernel_arg(add, 0).unwrap(), Some(ArgBinding::Scalar(ScalarValue::Int32(5))));
}

#[test]
fn test_arg_array_updates_bindings() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let buffer = backend.create_buffer_from(&[0i32]).unwrap();

    backend.set_arg(add, 0, 1i32).unwrap();
    let args = ArgArray::new().scalar(0, 2i32).scalar(0, 3i32).buffer(1, buffer);
    backend.dispatch(add, &args, &WorkSize::new_1d(1)).unwrap();
    // Bindings from the array persist for later dispatches.
    backend.dispatch(add, &ArgArray::new(), &WorkSize::new_1d(1)).unwrap();
    backend.wait().unwrap();

    assert_eq!(backend.read_buffer_as::<i32>(buffer).unwrap(), vec![6]);
}

#[test]
fn test_unbound_slot_enqueues_nothing() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();

    backend.set_arg(add, 0, 1i32).unwrap();
    let err = backend.dispatch(add, &ArgArray::new(), &WorkSize::new_1d(1)).unwrap_err();

    assert!(matches!(err, Error::UnboundSlot { slot: 1, .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Binding);
    assert_eq!(backend.stats().launches, 0);
}

#[test]
fn test_out_of_range_entry_applies_nothing() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();

    let args = ArgArray::new().scalar(0, 7i32).scalar(2, 1i32);
    let err = backend.dispatch(add, &args, &WorkSize::new_1d(1)).unwrap_err();

    assert!(matches!(err, Error::SlotOutOfRange { slot: 2, arity: 2, .. }), "{err}");
    assert_eq!(backend.kernel_arg(add, 0).unwrap(), None);
}

#[test]
fn test_released_buffer_is_a_dead_binding() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let buffer = backend.create_buffer_from(&[0i32]).unwrap();

    backend.set_arg(add, 0, 1i32).unwrap();
    backend.set_arg_buffer(add, 1, buffer, Access::ReadWrite).unwrap();
    backend.release_buffer(buffer).unwrap();

    let err = backend.dispatch(add, &ArgArray::new(), &WorkSize::new_1d(1)).unwrap_err();
    assert!(matches!(err, Error::DeadBuffer { slot: 1, .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Binding);

    // Binding a released handle is refused up front.
    let err = backend.set_arg_buffer(add, 1, buffer, Access::ReadWrite).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Handle);
}

#[test]
fn test_read_only_buffer_stays_clean() {
    let mut backend = backend_with(&[ConfigBit::MinimizeCopies]);
    let program = backend.compile(SOURCE).unwrap();
    let mirror = backend.get_kernel(program, "mirror").unwrap();
    let src = backend.create_buffer_from(&[7i32, 8]).unwrap();
    let dst = backend.create_buffer_zeroed(8).unwrap();

    let args = ArgArray::new().buffer_read_only(0, src).buffer(1, dst);
    backend.dispatch(mirror, &args, &WorkSize::new_1d(2)).unwrap();
    backend.wait().unwrap();

    assert_eq!(backend.buffer_state(src).unwrap(), DirtyState::Clean);
    assert_eq!(backend.buffer_state(dst).unwrap(), DirtyState::DeviceDirty);
    assert_eq!(backend.read_buffer_as::<i32>(dst).unwrap(), vec![7, 8]);
}

#[test]
fn test_dispatch_serialized() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let store = backend.get_kernel(program, "store").unwrap();
    let out = backend.create_buffer_zeroed(8).unwrap();

    let bytes = ArgArray::new().scalar(0, -9i64).buffer(1, out).encode();
    backend.dispatch_serialized(store, &bytes, &WorkSize::new_1d(1)).unwrap();
    backend.wait().unwrap();

    assert_eq!(backend.read_buffer_as::<i64>(out).unwrap(), vec![-9]);
}

#[test]
fn test_malformed_serialized_args() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let store = backend.get_kernel(program, "store").unwrap();

    let mut bytes = ArgArray::new().scalar(0, 1i64).encode();
    bytes.truncate(bytes.len() - 1);
    let err = backend.dispatch_serialized(store, &bytes, &WorkSize::new_1d(1)).unwrap_err();

    assert!(matches!(err, Error::MalformedArgs { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::Binding);
    assert_eq!(backend.kernel_arg(store, 0).unwrap(), None);
}

#[test]
fn test_device_fault_surfaces_at_wait() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let fail = backend.get_kernel(program, "fail").unwrap();

    backend.dispatch(fail, &ArgArray::new(), &WorkSize::new_1d(1)).unwrap();
    let err = backend.wait().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(err.status(), Some(DriverStatus::ExecStatusError));

    let failure = backend.status().unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Execution);
    assert_eq!(failure.status, Some(DriverStatus::ExecStatusError));

    // Reported once by wait, kept by status until cleared.
    backend.wait().unwrap();
    assert!(backend.status().is_err());
    backend.clear_status();
    assert!(backend.status().is_ok());
}

#[test]
fn test_bad_work_size_surfaces_at_wait() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let buffer = backend.create_buffer_from(&[0i32; 6]).unwrap();

    let args = ArgArray::new().scalar(0, 1i32).buffer(1, buffer);
    backend.dispatch(add, &args, &WorkSize::new_1d(6).with_local([4, 1, 1])).unwrap();
    let err = backend.wait().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(backend.status().unwrap_err().status, Some(DriverStatus::InvalidWorkGroupSize));
}

#[test_case(&[], WorkSize::new_3d([usize::MAX, 2, 1]).with_local([usize::MAX, 2, 1]), DriverStatus::InvalidGlobalWorkSize ; "overflowing global size")]
#[test_case(&[], WorkSize::new_3d([usize::MAX, 1, 1]).with_local([usize::MAX, 1, 1]), DriverStatus::InvalidWorkGroupSize ; "oversized group")]
#[test_case(&[ConfigBit::Trace], WorkSize::new_3d([usize::MAX, 2, 0]), DriverStatus::InvalidGlobalWorkSize ; "traced zero extent")]
#[test_case(&[ConfigBit::Trace], WorkSize::new_3d([usize::MAX, 2, 1]), DriverStatus::InvalidGlobalWorkSize ; "traced overflow")]
fn test_huge_work_size_surfaces_at_wait(bits: &[ConfigBit], work: WorkSize, status: DriverStatus) {
    let mut backend = backend_with(bits);
    let program = backend.compile(SOURCE).unwrap();
    let fail = backend.get_kernel(program, "fail").unwrap();

    backend.dispatch(fail, &ArgArray::new(), &work).unwrap();
    let err = backend.wait().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(backend.status().unwrap_err().status, Some(status));
}
