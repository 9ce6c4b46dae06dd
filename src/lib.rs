//! Buffer transfer and compute dispatch on top of [`wgpu`].
//!
//! A [`DeviceHandle`] is created first; every other primitive borrows it.
//! Asynchronous work (reads, maps, staging completion) only advances while the
//! caller pumps the device with [`DeviceHandle::process_events`] or
//! [`DeviceHandle::wait_any`].

use std::sync::{atomic::AtomicU8, Arc};

pub mod buffer;
pub mod commands;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod parameters;
pub mod pipeline;
pub mod shader;
pub mod staging;
pub mod usage;

pub use commands::Submission;
pub use config::{DeviceConfig, StagingPoolConfig};
pub use error::{GpuError, GpuResult};
pub use event::{GpuFuture, Timeout};
pub use parameters::{ParameterEntry, ParameterSetBuilder};
pub use pipeline::workgroups_for;
pub use staging::{PoolStats, StagingHandle, StagingPool, TransferDirection};
pub use usage::{BindingKind, BufferUsage, MapMode};

/// Represents a compiled compute program.
///
/// It's just a wrapper around [`wgpu::ShaderModule`].
pub struct Shader(wgpu::ShaderModule);

/// Entry point of the crate. A [`DeviceHandle`] must be created
/// first as all GPU primitives borrow it.
pub struct DeviceHandle {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter: wgpu::Adapter,
    events: event::EventLoop,
}

/// Fixed-size allocation in device memory.
///
/// Size and [`BufferUsage`] are fixed at construction and decide which
/// operations are legal on the buffer.
pub struct Buffer<'dev> {
    device: &'dev DeviceHandle,
    // shared with pending map continuations so the allocation outlives them
    buf: Arc<wgpu::Buffer>,
    size: u64,
    usage: BufferUsage,
    label: String,
    // one of the `buffer::MAP_*` states
    map_state: Arc<AtomicU8>,
}

/// Ordered buffer bindings compiled into a bind group layout and a bind group.
///
/// The binding index of an entry is its position in the entry list.
pub struct ParameterSet<'a> {
    device: &'a DeviceHandle,
    entries: Vec<ParameterEntry<'a>>,
    layout_entries: Vec<wgpu::BindGroupLayoutEntry>,
    layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
}

/// Compute pipeline built against one [`ParameterSet`] layout.
pub struct Pipeline {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::PipelineLayout,
    // snapshot of the parameter layout the pipeline was built with
    layout_entries: Vec<wgpu::BindGroupLayoutEntry>,
    entry_point: String,
    label: String,
}

/// Records compute passes and buffer copies into one submission.
pub struct CommandList<'a> {
    device: &'a DeviceHandle,
    encoder: wgpu::CommandEncoder,
    pass: Option<commands::PassRecording<'a>>,
    label: String,
}
