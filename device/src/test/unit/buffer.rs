use crate::DeviceBuffer;
use crate::test::driver;

#[test]
fn test_lazy_allocation() {
    let driver = driver();
    let buffer = DeviceBuffer::new(40);

    assert!(!buffer.is_allocated());
    let first = buffer.ensure_allocated(&driver).unwrap().clone();
    assert!(buffer.is_allocated());

    // Second call reuses the allocation.
    let second = buffer.ensure_allocated(&driver).unwrap();
    assert!(second.same_allocation(&first));
    assert_eq!(second.address(), first.address());
    assert!(!second.same_allocation(&driver.alloc(40).unwrap()));
    assert_eq!(buffer.memory().unwrap().len(), 40);
}

#[test]
fn test_failed_allocation_stays_unallocated() {
    let driver = driver();
    let buffer = DeviceBuffer::new(0);

    let err = buffer.ensure_allocated(&driver).unwrap_err();
    assert_eq!(err.status(), Some(crate::DriverStatus::InvalidBufferSize));
    assert!(!buffer.is_allocated());
}
