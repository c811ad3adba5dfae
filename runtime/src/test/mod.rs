mod unit;

use std::sync::Arc;
use std::time::Duration;

use tessel_device::{HostKernelRegistry, HostOptions};

use crate::{Backend, BackendOptions, Config, ConfigBit};

pub(crate) const SOURCE: &str = r#"
    __kernel void add(int k, __global int *buf) {
        buf[get_global_id(0)] += k;
    }

    // out[0] = v
    __kernel void store(long v, __global long *out) { out[0] = v; }

    __kernel void mirror(__global const int *src, __global int *dst) {
        dst[get_global_id(0)] = src[get_global_id(0)];
    }

    __kernel void sleepy(int ms) { }
    __kernel void fail(void) { }
"#;

pub(crate) fn kernels() -> Arc<HostKernelRegistry> {
    let registry = HostKernelRegistry::new();
    registry
        .register("add", 2, |launch| {
            let k = launch.scalar_as::<i32>(0)?;
            let n = launch.global_items();
            launch.slice_mut::<i32>(1)?.iter_mut().take(n).for_each(|x| *x += k);
            Ok(())
        })
        .register("store", 2, |launch| {
            let v = launch.scalar_as::<i64>(0)?;
            launch.slice_mut::<i64>(1)?[0] = v;
            Ok(())
        })
        .register("mirror", 2, |launch| {
            let src = launch.slice::<i32>(0)?.to_vec();
            launch.slice_mut::<i32>(1)?.copy_from_slice(&src);
            Ok(())
        })
        .register("sleepy", 1, |launch| {
            let ms = launch.scalar_as::<i32>(0)?;
            std::thread::sleep(Duration::from_millis(ms as u64));
            Ok(())
        })
        .register("fail", 0, |_| Err("device fault".into()));
    Arc::new(registry)
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().with_max_level(tracing::Level::DEBUG).try_init();
}

pub(crate) fn backend_with(bits: &[ConfigBit]) -> Backend {
    init_tracing();
    let options = BackendOptions::builder().config(Config::from_bits(bits.iter().copied())).kernels(kernels()).build();
    Backend::new(options).unwrap()
}

pub(crate) fn backend() -> Backend {
    backend_with(&[])
}

pub(crate) fn backend_with_host(host: HostOptions) -> Backend {
    init_tracing();
    Backend::new(BackendOptions::builder().host(host).kernels(kernels()).build()).unwrap()
}
