#![allow(dead_code)]

use std::time::Duration;

use futures::executor::block_on;
use gpgpu_core::{DeviceConfig, DeviceHandle, GpuFuture, Timeout};
use lazy_static::lazy_static;

lazy_static! {
    static ref DEVICE: Option<DeviceHandle> = {
        let _ = pretty_env_logger::try_init();
        let device = block_on(DeviceHandle::from_env()).or_else(|e| {
            eprintln!("no hardware adapter ({e}), trying a software one");
            block_on(DeviceHandle::new(DeviceConfig::fallback()))
        });
        match device {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("no adapter at all, device tests will be skipped: {e}");
                None
            }
        }
    };
}

/// Shared device for the whole test binary, or `None` on machines without an adapter.
///
/// Set `GPGPU_REQUIRE_DEVICE` to turn a missing adapter into a failure instead of a skip.
#[track_caller]
pub fn device() -> Option<&'static DeviceHandle> {
    let device = DEVICE.as_ref();
    if device.is_none() {
        let at = std::panic::Location::caller();
        if std::env::var_os("GPGPU_REQUIRE_DEVICE").is_some() {
            panic!("no adapter for the device test at {at}");
        }
        eprintln!("SKIPPED (no adapter): {at}");
    }
    device
}

pub const WAIT: Timeout = Timeout::After(Duration::from_secs(10));

pub fn resolve<T>(device: &DeviceHandle, mut fut: GpuFuture<T>) -> T {
    device.wait_any(&mut fut, WAIT).expect("device operation failed")
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}
