use tessel_device::WorkSize;

use crate::test::{SOURCE, backend};
use crate::{ArgArray, Error, ErrorKind, HandleFault, ProgramState};

#[test]
fn test_kernel_lookup_is_cached() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();

    let first = backend.get_kernel(program, "add").unwrap();
    let second = backend.get_kernel(program, "add").unwrap();
    let store = backend.get_kernel(program, "store").unwrap();

    assert_eq!(first, second);
    assert_ne!(first, store);
    assert_eq!(backend.kernel_name(first).unwrap(), "add");
    assert_eq!(backend.kernel_arity(first).unwrap(), 2);
    assert_eq!(backend.kernel_program(first).unwrap(), program);
    let fail = backend.get_kernel(program, "fail").unwrap();
    assert_eq!(backend.kernel_arity(fail).unwrap(), 0);
}

#[test]
fn test_missing_kernel_leaves_program_usable() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();

    let err = backend.get_kernel(program, "subtract").unwrap_err();
    assert!(matches!(&err, Error::KernelNotFound { name, .. } if name == "subtract"), "{err}");
    assert_eq!(err.kind(), ErrorKind::Resolution);

    assert_eq!(backend.program_state(program).unwrap(), ProgramState::Compiled);
    assert!(backend.program_ok(program).unwrap());
    assert!(backend.get_kernel(program, "add").is_ok());
}

#[test]
fn test_failed_build_is_kept_with_its_log() {
    let mut backend = backend();
    let err = backend.compile("__kernel void unknown(int x) { }").unwrap_err();

    let Error::Compile { program, diagnostic } = &err else { panic!("unexpected error: {err}") };
    let program = *program;
    assert_eq!(err.kind(), ErrorKind::Compile);
    assert!(diagnostic.contains("unknown"), "{diagnostic}");

    assert_eq!(backend.program_state(program).unwrap(), ProgramState::CompileFailed);
    assert!(!backend.program_ok(program).unwrap());
    assert_eq!(backend.build_log(program).unwrap(), Some(diagnostic.as_str()));
    assert!(backend.kernel_names(program).unwrap().is_empty());

    let err = backend.get_kernel(program, "unknown").unwrap_err();
    assert!(matches!(err, Error::ProgramNotReady { state: ProgramState::CompileFailed, .. }), "{err}");
}

#[test]
fn test_unbalanced_source_names_the_line() {
    let mut backend = backend();
    let err = backend.compile("\n\n__kernel void add(int k, __global int *buf {\n}").unwrap_err();

    let Error::Compile { diagnostic, .. } = &err else { panic!("unexpected error: {err}") };
    assert!(diagnostic.contains("line"), "{diagnostic}");
}

#[test]
fn test_compiled_program_has_no_log() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    assert_eq!(backend.build_log(program).unwrap(), None);
    assert_eq!(backend.kernel_names(program).unwrap(), ["add", "store", "mirror", "sleepy", "fail"]);
}

#[test]
fn test_unload_invalidates_kernels() {
    let mut backend = backend();
    let program = backend.compile(SOURCE).unwrap();
    let add = backend.get_kernel(program, "add").unwrap();
    let buffer = backend.create_buffer_from(&[0i32]).unwrap();

    backend.unload_program(program).unwrap();

    let args = ArgArray::new().scalar(0, 1i32).buffer(1, buffer);
    let err = backend.dispatch(add, &args, &WorkSize::new_1d(1)).unwrap_err();
    assert!(matches!(err, Error::InvalidHandle { fault: HandleFault::Stale, .. }), "{err}");
    assert_eq!(backend.program_state(program).unwrap_err().kind(), ErrorKind::Handle);
    assert_eq!(backend.unload_program(program).unwrap_err().kind(), ErrorKind::Handle);

    // Buffers are independent of programs.
    assert_eq!(backend.read_buffer_as::<i32>(buffer).unwrap(), vec![0]);
}

#[test]
fn test_handles_from_another_backend_are_foreign() {
    let mut ours = backend();
    let mut theirs = backend();
    ours.compile(SOURCE).unwrap();
    let program = theirs.compile(SOURCE).unwrap();
    let kernel = theirs.get_kernel(program, "add").unwrap();
    let buffer = theirs.create_buffer(&[0; 4]).unwrap();
    ours.create_buffer(&[0; 4]).unwrap();

    for err in [
        ours.program_state(program).unwrap_err(),
        ours.kernel_arity(kernel).unwrap_err(),
        ours.buffer_len(buffer).unwrap_err(),
    ] {
        assert!(matches!(err, Error::InvalidHandle { fault: HandleFault::Foreign, .. }), "{err}");
    }
}
