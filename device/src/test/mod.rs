mod unit;

use std::sync::Arc;
use std::time::Duration;

use crate::{AlignedBytes, CommandQueue, Driver, HostKernelRegistry, HostOptions, SharedBytes, shared_bytes};

pub(crate) const SOURCE: &str = r#"
    __kernel void add(int k, __global int *buf) {
        buf[get_global_id(0)] += k;
    }
    __kernel void sleepy(int ms) { }
    __kernel void fail(void) { }
    __kernel void boom(void) { }
    __kernel void mirror(__global int *a, __global int *b) { }
"#;

/// Registry with the kernels `SOURCE` declares.
pub(crate) fn kernels() -> Arc<HostKernelRegistry> {
    let registry = HostKernelRegistry::new();
    registry
        .register("add", 2, |launch| {
            let k = launch.scalar_as::<i32>(0)?;
            let n = launch.global_items();
            let buf = launch.slice_mut::<i32>(1)?;
            buf.iter_mut().take(n).for_each(|x| *x += k);
            Ok(())
        })
        .register("sleepy", 1, |launch| {
            let ms = launch.scalar_as::<i32>(0)?;
            std::thread::sleep(Duration::from_millis(ms as u64));
            Ok(())
        })
        .register("fail", 0, |_| Err("device fault".into()))
        .register("boom", 0, |_| panic!("kernel exploded"))
        .register("mirror", 2, |launch| {
            let first = launch.slice::<i32>(0)?.to_vec();
            launch.slice_mut::<i32>(1)?.copy_from_slice(&first);
            Ok(())
        });
    Arc::new(registry)
}

pub(crate) fn driver() -> Arc<Driver> {
    Arc::new(Driver::host(HostOptions::default(), kernels()).unwrap())
}

pub(crate) fn queue(capacity: usize) -> CommandQueue {
    CommandQueue::new(driver(), capacity)
}

pub(crate) fn ints(values: &[i32]) -> SharedBytes {
    shared_bytes(AlignedBytes::from_bytes(bytemuck::cast_slice(values)))
}

pub(crate) fn read_ints(bytes: &SharedBytes) -> Vec<i32> {
    bytes.lock().as_slice_of::<i32>().unwrap().to_vec()
}
