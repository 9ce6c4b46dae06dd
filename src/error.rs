use std::time::Duration;

use thiserror::Error;

use crate::{usage::BufferUsage, TransferDirection};

pub type GpuResult<T> = Result<T, GpuError>;

#[derive(Error, Debug)]
pub enum GpuError {
    #[error("no suitable GPU adapter found")]
    AdapterNotFound,
    #[error(transparent)]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("{op}: device rejected the request: {source}")]
    Device {
        op: &'static str,
        #[source]
        source: wgpu::Error,
    },
    #[error("{op}: {len} bytes at offset {offset} exceed size {size}")]
    OutOfBounds {
        op: &'static str,
        offset: u64,
        len: u64,
        size: u64,
    },
    #[error("{op}: {size} bytes cannot be allocated")]
    TooLarge { op: &'static str, size: u64 },
    #[error("{op}: offset {offset} and length {len} must be multiples of {align}")]
    Misaligned {
        op: &'static str,
        offset: u64,
        len: u64,
        align: u64,
    },
    #[error("{op}: buffer `{label}` was not created with {required:?}")]
    MissingUsage {
        op: &'static str,
        label: String,
        required: BufferUsage,
    },
    #[error("{op}: buffer `{label}` is mapped on the host")]
    AlreadyMapped { op: &'static str, label: String },
    #[error("{op}: buffer `{label}` is not mapped on the host")]
    NotMapped { op: &'static str, label: String },
    #[error("MapMode::None cannot be mapped")]
    InvalidMapMode,
    #[error(transparent)]
    AsyncMap(#[from] wgpu::BufferAsyncError),
    #[error("completion was dropped before the operation resolved")]
    CompletionDropped,
    #[error("wait timed out after {0:?}")]
    Timeout(Duration),
    #[error("staging handle refers to a purged or recycled slot")]
    StaleHandle,
    #[error("staging handle is for {found:?}, expected {expected:?}")]
    WrongDirection {
        expected: TransferDirection,
        found: TransferDirection,
    },
    #[error("staging pool is in use by another thread")]
    PoolContended,
    #[error("a compute pass is already open")]
    PassAlreadyOpen,
    #[error("no compute pass is open")]
    NoActivePass,
    #[error("command list still has an open compute pass")]
    PassStillOpen,
    #[error("pipeline `{label}` was built for a different parameter layout")]
    LayoutMismatch { label: String },
    #[error("binding {index}: {reason}")]
    InvalidBinding { index: u32, reason: &'static str },
    #[error("dispatch of ({x}, {y}, {z}) workgroups exceeds the per-dimension limit {limit}")]
    DispatchTooLarge { x: u32, y: u32, z: u32, limit: u32 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Logs a rejected operation and hands the error back for propagation.
pub(crate) fn report(err: GpuError) -> GpuError {
    log::error!("{err}");
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_message_names_operation() {
        let err = GpuError::OutOfBounds {
            op: "write_immediate",
            offset: 8,
            len: 64,
            size: 32,
        };
        assert_eq!(
            err.to_string(),
            "write_immediate: 64 bytes at offset 8 exceed size 32"
        );
    }

    #[test]
    fn map_errors_convert() {
        let err: GpuError = wgpu::BufferAsyncError.into();
        assert!(matches!(err, GpuError::AsyncMap(_)));
    }
}
