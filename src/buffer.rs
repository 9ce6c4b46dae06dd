use std::{
    num::NonZeroU64,
    ops::Range,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use crate::{
    error::{report, GpuError, GpuResult},
    event::{EventLoop, GpuFuture, MapRequest},
    usage::{
        align_up, checked_align_up, is_aligned, BindingKind, BufferUsage, MapMode, COPY_ALIGNMENT,
        MAP_ALIGNMENT, UNIFORM_ALIGNMENT,
    },
    Buffer, DeviceHandle,
};

pub(crate) const MAP_NONE: u8 = 0;
// host may write through the mapping
pub(crate) const MAP_HOST: u8 = 1;
// map requested, waiting for the device
pub(crate) const MAP_PENDING: u8 = 2;

/// Fails with [`GpuError::OutOfBounds`] unless `offset + len <= size`.
pub(crate) fn check_range(op: &'static str, offset: u64, len: u64, size: u64) -> GpuResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(report(GpuError::OutOfBounds {
            op,
            offset,
            len,
            size,
        })),
    }
}

pub(crate) fn check_aligned(op: &'static str, offset: u64, len: u64, align: u64) -> GpuResult<()> {
    if is_aligned(offset, align) && is_aligned(len, align) {
        Ok(())
    } else {
        Err(report(GpuError::Misaligned {
            op,
            offset,
            len,
            align,
        }))
    }
}

/// Byte view of `slice`; zero-sized element types have no bytes.
fn pod_bytes<T: bytemuck::Pod>(slice: &[T]) -> &[u8] {
    if std::mem::size_of::<T>() == 0 {
        &[]
    } else {
        bytemuck::cast_slice(slice)
    }
}

/// `size` rounded up to `align`, or [`GpuError::TooLarge`] when that is not representable.
pub(crate) fn padded_size(op: &'static str, size: u64, align: u64) -> GpuResult<u64> {
    checked_align_up(size, align).ok_or_else(|| report(GpuError::TooLarge { op, size }))
}

impl<'dev> Buffer<'dev> {
    /// Creates a buffer of exactly `size` usable bytes.
    ///
    /// With `mapped_at_creation` the buffer starts host-mapped: fill it with
    /// [`Buffer::write_mapped`] and release it with [`Buffer::unmap`] before any GPU use.
    pub fn new(
        device: &'dev DeviceHandle,
        size: u64,
        usage: BufferUsage,
        label: impl Into<String>,
        mapped_at_creation: bool,
    ) -> GpuResult<Self> {
        let label = label.into();
        // the allocation is padded so full-size copies and uniform bindings stay legal
        let align = if usage.contains(BufferUsage::UNIFORM) {
            UNIFORM_ALIGNMENT
        } else {
            COPY_ALIGNMENT
        };
        let native_size = padded_size("Buffer::new", size, align)?.max(COPY_ALIGNMENT);

        let buf = device.scoped("Buffer::new", || {
            device.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size: native_size,
                usage: usage.to_wgpu(),
                mapped_at_creation,
            })
        })?;
        log::debug!("buffer `{label}`: {size} bytes, {usage:?}");

        let state = if mapped_at_creation { MAP_HOST } else { MAP_NONE };
        Ok(Self {
            device,
            buf: Arc::new(buf),
            size,
            usage,
            label,
            map_state: Arc::new(AtomicU8::new(state)),
        })
    }

    /// Creates a buffer holding a copy of `slice`.
    pub fn from_slice<T: bytemuck::Pod>(
        device: &'dev DeviceHandle,
        slice: &[T],
        usage: BufferUsage,
        label: impl Into<String>,
    ) -> GpuResult<Self> {
        let bytes = pod_bytes(slice);
        let buffer = Self::new(device, bytes.len() as u64, usage, label, true)?;
        buffer.write_mapped(0, bytes)?;
        buffer.unmap()?;
        Ok(buffer)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the number of `T` elements the buffer can hold, 0 for zero-sized `T`.
    pub fn capacity<T>(&self) -> u64 {
        self.size
            .checked_div(std::mem::size_of::<T>() as u64)
            .unwrap_or(0)
    }

    /// Size rounded up to the 256-byte boundary required for uniform bindings.
    pub fn size_aligned_to_uniform(&self) -> u64 {
        align_up(self.size, UNIFORM_ALIGNMENT)
    }

    pub fn is_host_mapped(&self) -> bool {
        self.map_state.load(Ordering::Acquire) == MAP_HOST
    }

    pub fn as_native(&self) -> &wgpu::Buffer {
        &self.buf
    }

    /// Enqueues a direct queue write of `data` at `dst_offset`.
    ///
    /// Nothing is written when the range exceeds the buffer or is not 4-byte aligned.
    pub fn write_immediate(&self, data: &[u8], dst_offset: u64) -> GpuResult<()> {
        const OP: &str = "write_immediate";
        self.require(OP, BufferUsage::COPY_DST)?;
        self.require_unmapped(OP)?;
        check_range(OP, dst_offset, data.len() as u64, self.size)?;
        check_aligned(OP, dst_offset, data.len() as u64, COPY_ALIGNMENT)?;
        if data.is_empty() {
            return Ok(());
        }
        self.device.queue().write_buffer(&self.buf, dst_offset, data);
        Ok(())
    }

    /// Typed [`Buffer::write_immediate`].
    pub fn write<T: bytemuck::Pod>(&self, data: &[T], dst_offset: u64) -> GpuResult<()> {
        self.write_immediate(pod_bytes(data), dst_offset)
    }

    /// Copies `data` into a fresh transfer buffer and submits a device-side
    /// copy into the start of this buffer.
    ///
    /// `data` is copied before returning. The returned future resolves once
    /// the device has consumed the transfer buffer.
    pub fn write_via_staging(&self, data: &[u8]) -> GpuResult<GpuFuture<()>> {
        const OP: &str = "write_via_staging";
        let len = data.len() as u64;
        self.require(OP, BufferUsage::COPY_DST)?;
        self.require_unmapped(OP)?;
        check_range(OP, 0, len, self.size)?;
        check_aligned(OP, 0, len, COPY_ALIGNMENT)?;
        if len == 0 {
            return Ok(GpuFuture::ready(()));
        }

        let device = self.device.device();
        let staging = self.device.scoped(OP, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{}: staging upload", self.label)),
                size: len,
                usage: wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: true,
            })
        })?;
        staging.slice(..).get_mapped_range_mut().copy_from_slice(data);
        staging.unmap();

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("staging upload"),
        });
        encoder.copy_buffer_to_buffer(&staging, 0, &self.buf, 0, len);
        self.device.queue().submit(Some(encoder.finish()));

        // the transfer buffer maps again only after the copy has executed
        let (done, fut) = GpuFuture::pair();
        let request = EventLoop::request_map(&staging, 0..len, wgpu::MapMode::Write);
        self.device.events().schedule(
            request,
            Box::new(move |status| {
                drop(staging);
                done.resolve(status.map_err(GpuError::from));
            }),
        );
        Ok(fut)
    }

    /// Reads the whole buffer through a transfer buffer.
    ///
    /// `callback` receives exactly [`Buffer::size`] bytes while the device is
    /// being pumped; the transfer buffer is unmapped right after it returns.
    pub fn read_async(
        &self,
        callback: impl FnOnce(&[u8]) + Send + 'static,
    ) -> GpuResult<GpuFuture<()>> {
        self.read_with("read_async", callback)
    }

    /// Pulls the whole buffer into a byte vector.
    pub fn read_to_vec(&self) -> GpuResult<GpuFuture<Vec<u8>>> {
        self.read_with("read_to_vec", |bytes| bytes.to_vec())
    }

    /// Pulls all the elements of the buffer into a [`Vec`]. Zero-sized `T` reads as empty.
    pub fn read_vec<T: bytemuck::Pod + Send>(&self) -> GpuResult<GpuFuture<Vec<T>>> {
        self.read_with("read_vec", |bytes| {
            let width = std::mem::size_of::<T>();
            if width == 0 {
                return Vec::new();
            }
            let mut out = vec![T::zeroed(); bytes.len() / width];
            let filled = bytemuck::cast_slice_mut::<T, u8>(&mut out);
            let len = filled.len();
            filled.copy_from_slice(&bytes[..len]);
            out
        })
    }

    fn read_with<R, F>(&self, op: &'static str, f: F) -> GpuResult<GpuFuture<R>>
    where
        R: Send + 'static,
        F: FnOnce(&[u8]) -> R + Send + 'static,
    {
        self.require(op, BufferUsage::COPY_SRC)?;
        self.require_unmapped(op)?;
        if self.size == 0 {
            let (done, fut) = GpuFuture::pair();
            self.device.events().schedule(
                MapRequest::resolved(),
                Box::new(move |_| done.resolve(Ok(f(&[])))),
            );
            return Ok(fut);
        }

        let copy_len = align_up(self.size, COPY_ALIGNMENT);
        let device = self.device.device();
        let staging = self.device.scoped(op, || {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("{}: staging read", self.label)),
                size: copy_len,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })?;

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("staging read"),
        });
        encoder.copy_buffer_to_buffer(&self.buf, 0, &staging, 0, copy_len);
        self.device.queue().submit(Some(encoder.finish()));

        let size = self.size as usize;
        let label = self.label.clone();
        let (done, fut) = GpuFuture::pair();
        let request = EventLoop::request_map(&staging, 0..copy_len, wgpu::MapMode::Read);
        self.device.events().schedule(
            request,
            Box::new(move |status| match status {
                Ok(()) => {
                    let value = {
                        let view = staging.slice(..).get_mapped_range();
                        f(&view[..size])
                    };
                    staging.unmap();
                    done.resolve(Ok(value));
                }
                Err(e) => {
                    log::error!("{op}: mapping the read-back of `{label}` failed");
                    done.resolve(Err(e.into()));
                }
            }),
        );
        Ok(fut)
    }

    /// Maps `size` bytes at `offset` of this buffer and resolves to a copy of them.
    ///
    /// Read mode needs [`BufferUsage::MAP_READ`], write mode [`BufferUsage::MAP_WRITE`].
    /// The buffer is unmapped once the bytes are copied out.
    pub fn map_async(&self, mode: MapMode, offset: u64, size: u64) -> GpuResult<GpuFuture<Vec<u8>>> {
        const OP: &str = "map_async";
        let native_mode = mode.to_wgpu().ok_or_else(|| report(GpuError::InvalidMapMode))?;
        self.require(OP, mode.required_usage())?;
        let range = self.map_range(OP, offset, size)?;
        if size == 0 {
            return Ok(GpuFuture::ready(Vec::new()));
        }
        self.begin_map(OP)?;

        let buf = Arc::clone(&self.buf);
        let state = Arc::clone(&self.map_state);
        let (done, fut) = GpuFuture::pair();
        let request = EventLoop::request_map(&self.buf, range.clone(), native_mode);
        self.device.events().schedule(
            request,
            Box::new(move |status| {
                let result = status.map(|()| {
                    let bytes = buf.slice(range).get_mapped_range().to_vec();
                    buf.unmap();
                    bytes
                });
                state.store(MAP_NONE, Ordering::Release);
                done.resolve(result.map_err(GpuError::from));
            }),
        );
        Ok(fut)
    }

    /// Maps the buffer for writing, copies `data` to `offset`, and unmaps it.
    pub fn write_mapped_async(&self, offset: u64, data: Vec<u8>) -> GpuResult<GpuFuture<()>> {
        const OP: &str = "write_mapped_async";
        self.require(OP, BufferUsage::MAP_WRITE)?;
        let range = self.map_range(OP, offset, data.len() as u64)?;
        if data.is_empty() {
            return Ok(GpuFuture::ready(()));
        }
        self.begin_map(OP)?;

        let buf = Arc::clone(&self.buf);
        let state = Arc::clone(&self.map_state);
        let (done, fut) = GpuFuture::pair();
        let request = EventLoop::request_map(&self.buf, range.clone(), wgpu::MapMode::Write);
        self.device.events().schedule(
            request,
            Box::new(move |status| {
                let result = status.map(|()| {
                    buf.slice(range).get_mapped_range_mut().copy_from_slice(&data);
                    buf.unmap();
                });
                state.store(MAP_NONE, Ordering::Release);
                done.resolve(result.map_err(GpuError::from));
            }),
        );
        Ok(fut)
    }

    /// Writes into the host mapping of a buffer created with `mapped_at_creation`.
    pub fn write_mapped(&self, offset: u64, data: &[u8]) -> GpuResult<()> {
        const OP: &str = "write_mapped";
        if !self.is_host_mapped() {
            return Err(report(GpuError::NotMapped {
                op: OP,
                label: self.label.clone(),
            }));
        }
        check_range(OP, offset, data.len() as u64, self.size)?;
        let start = offset as usize;
        self.buf.slice(..).get_mapped_range_mut()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Releases the host mapping; the buffer becomes usable by the device.
    pub fn unmap(&self) -> GpuResult<()> {
        match self
            .map_state
            .compare_exchange(MAP_HOST, MAP_NONE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.buf.unmap();
                Ok(())
            }
            Err(_) => Err(report(GpuError::NotMapped {
                op: "unmap",
                label: self.label.clone(),
            })),
        }
    }

    pub(crate) fn binding_resource(&self, kind: BindingKind) -> wgpu::BindingResource<'_> {
        let size = match kind {
            BindingKind::Uniform => self.size_aligned_to_uniform(),
            _ => self.size,
        };
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buf,
            offset: 0,
            size: NonZeroU64::new(size),
        })
    }

    pub(crate) fn native(&self) -> &wgpu::Buffer {
        &self.buf
    }

    pub(crate) fn require(&self, op: &'static str, required: BufferUsage) -> GpuResult<()> {
        if self.usage.contains(required) {
            Ok(())
        } else {
            Err(report(GpuError::MissingUsage {
                op,
                label: self.label.clone(),
                required,
            }))
        }
    }

    pub(crate) fn require_unmapped(&self, op: &'static str) -> GpuResult<()> {
        if self.map_state.load(Ordering::Acquire) == MAP_NONE {
            Ok(())
        } else {
            Err(report(GpuError::AlreadyMapped {
                op,
                label: self.label.clone(),
            }))
        }
    }

    fn map_range(&self, op: &'static str, offset: u64, size: u64) -> GpuResult<Range<u64>> {
        check_range(op, offset, size, self.size)?;
        check_aligned(op, offset, 0, MAP_ALIGNMENT)?;
        check_aligned(op, 0, size, COPY_ALIGNMENT)?;
        Ok(offset..offset + size)
    }

    fn begin_map(&self, op: &'static str) -> GpuResult<()> {
        self.map_state
            .compare_exchange(MAP_NONE, MAP_PENDING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                report(GpuError::AlreadyMapped {
                    op,
                    label: self.label.clone(),
                })
            })
    }
}
