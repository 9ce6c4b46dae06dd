//! Buffer capability flags and the small enums that select binding and map behaviour.

use std::num::NonZeroU64;

/// Alignment of uniform bindings and of staging allocations.
pub const UNIFORM_ALIGNMENT: u64 = 256;
/// Alignment of copy sizes and offsets.
pub const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;
/// Alignment of map offsets.
pub const MAP_ALIGNMENT: u64 = wgpu::MAP_ALIGNMENT;

bitflags::bitflags! {
    /// Capabilities of a [`Buffer`](crate::Buffer). Bit values match [`wgpu::BufferUsages`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const MAP_READ = 1 << 0;
        const MAP_WRITE = 1 << 1;
        const COPY_SRC = 1 << 2;
        const COPY_DST = 1 << 3;
        const INDEX = 1 << 4;
        const VERTEX = 1 << 5;
        const UNIFORM = 1 << 6;
        const STORAGE = 1 << 7;
        const INDIRECT = 1 << 8;
        const QUERY_RESOLVE = 1 << 9;
    }
}

impl BufferUsage {
    pub const NONE: Self = Self::empty();

    pub(crate) fn to_wgpu(self) -> wgpu::BufferUsages {
        wgpu::BufferUsages::from_bits_truncate(self.bits())
    }
}

/// How a buffer is exposed to the compute program at its binding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Reserves the index without creating a binding.
    NotUsed,
    /// ### Example WGSL syntax:
    /// ```ignore
    /// @group(0) @binding(0) var<storage, read> input: array<f32>;
    /// ```
    ReadOnlyStorage,
    /// ### Example WGSL syntax:
    /// ```ignore
    /// @group(0) @binding(0) var<storage, read_write> output: array<f32>;
    /// ```
    Storage,
    /// ### Example WGSL syntax:
    /// ```ignore
    /// @group(0) @binding(0) var<uniform> params: Params;
    /// ```
    Uniform,
}

impl BindingKind {
    /// Usage a buffer must carry to be bound with this kind.
    pub fn required_usage(self) -> BufferUsage {
        match self {
            BindingKind::NotUsed => BufferUsage::NONE,
            BindingKind::ReadOnlyStorage | BindingKind::Storage => BufferUsage::STORAGE,
            BindingKind::Uniform => BufferUsage::UNIFORM,
        }
    }

    /// Layout entry for a buffer of `size` bytes at `binding`, or `None` for reserved slots.
    pub(crate) fn layout_entry(self, binding: u32, size: u64) -> Option<wgpu::BindGroupLayoutEntry> {
        let (ty, min_size) = match self {
            BindingKind::NotUsed => return None,
            BindingKind::ReadOnlyStorage => {
                (wgpu::BufferBindingType::Storage { read_only: true }, size)
            }
            BindingKind::Storage => (wgpu::BufferBindingType::Storage { read_only: false }, size),
            BindingKind::Uniform => (wgpu::BufferBindingType::Uniform, align_up(size, UNIFORM_ALIGNMENT)),
        };
        Some(wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: NonZeroU64::new(min_size),
            },
            count: None,
        })
    }
}

/// Host access requested when mapping a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapMode {
    None,
    Read,
    Write,
}

impl MapMode {
    pub(crate) fn to_wgpu(self) -> Option<wgpu::MapMode> {
        match self {
            MapMode::None => None,
            MapMode::Read => Some(wgpu::MapMode::Read),
            MapMode::Write => Some(wgpu::MapMode::Write),
        }
    }

    pub(crate) fn required_usage(self) -> BufferUsage {
        match self {
            MapMode::None => BufferUsage::NONE,
            MapMode::Read => BufferUsage::MAP_READ,
            MapMode::Write => BufferUsage::MAP_WRITE,
        }
    }
}

/// Rounds `value` up to the next multiple of `align` (a power of two).
pub(crate) const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// [`align_up`] that yields `None` instead of overflowing.
pub(crate) const fn checked_align_up(value: u64, align: u64) -> Option<u64> {
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

pub(crate) const fn is_aligned(value: u64, align: u64) -> bool {
    value & (align - 1) == 0
}
