//! Pool of host-visible transfer buffers for uploads and readbacks.
//!
//! Slots move `Ready -> InUse -> InFlight -> Ready`. A submitted slot is
//! mapped again right after its copy; the map only resolves once the device
//! is done with the buffer, which is what returns the slot to `Ready`.
//! Surplus slots above `max_pool_size` are destroyed at that point instead.

mod policy;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};

use crate::{
    buffer::{check_aligned, check_range, padded_size},
    config::StagingPoolConfig,
    error::{report, GpuError, GpuResult},
    event::{EventLoop, GpuFuture, MapRequest, MapStatus},
    usage::{align_up, BufferUsage, COPY_ALIGNMENT, UNIFORM_ALIGNMENT},
    Buffer, DeviceHandle,
};

use policy::{plan_allocation, plan_replacement, should_retire, Plan, SlotState, SlotSummary};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Generational key of a staging slot; stale once the slot is removed.
    pub(crate) struct SlotId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferDirection {
    /// Host writes, device copies out (`MAP_WRITE | COPY_SRC`).
    Upload,
    /// Device copies in, host reads (`MAP_READ | COPY_DST`).
    Readback,
}

/// Slot counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub ready: usize,
    pub in_use: usize,
    pub in_flight: usize,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.ready + self.in_use + self.in_flight
    }
}

struct StagingSlot {
    buffer: Arc<wgpu::Buffer>,
    capacity: u64,
    direction: TransferDirection,
    state: SlotState,
}

type SharedSlots = Arc<Mutex<SlotMap<SlotId, StagingSlot>>>;

/// Exclusive claim on one staging slot.
///
/// Upload handles come mapped; write through [`StagingPool::write`] or
/// [`StagingPool::with_mapped`]. Submitting consumes the handle, so the host
/// mapping cannot be reached after the unmap. Dropping an unsubmitted handle
/// returns its slot to the pool, or destroys it while the pool is over its cap.
pub struct StagingHandle {
    id: SlotId,
    capacity: u64,
    direction: TransferDirection,
    max_pool_size: usize,
    slots: Weak<Mutex<SlotMap<SlotId, StagingSlot>>>,
}

impl StagingHandle {
    /// Usable bytes; at least the size requested from the pool.
    pub fn size(&self) -> u64 {
        self.capacity
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }
}

impl Drop for StagingHandle {
    fn drop(&mut self) {
        let Some(slots) = self.slots.upgrade() else {
            return;
        };
        let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
        let held = slots
            .get(self.id)
            .is_some_and(|s| s.state == SlotState::InUse);
        if !held {
            return;
        }
        if should_retire(slots.len(), self.max_pool_size) {
            log::debug!("staging slot returned above the pool cap; destroying it");
            slots.remove(self.id);
        } else if let Some(slot) = slots.get_mut(self.id) {
            slot.state = SlotState::Ready;
        }
    }
}

pub struct StagingPool<'dev> {
    device: &'dev DeviceHandle,
    config: StagingPoolConfig,
    slots: SharedSlots,
}

impl<'dev> StagingPool<'dev> {
    pub fn new(device: &'dev DeviceHandle, config: StagingPoolConfig) -> Self {
        let config = config.sanitized();
        log::debug!(
            "staging pool `{}`: max {} slots, thread_safe={}",
            config.label_prefix,
            config.max_pool_size,
            config.thread_safe
        );
        Self {
            device,
            config,
            slots: Arc::new(Mutex::new(SlotMap::with_key())),
        }
    }

    pub fn config(&self) -> &StagingPoolConfig {
        &self.config
    }

    /// Hands out a mapped upload handle of at least `size` bytes. Never blocks.
    pub fn allocate(&self, size: u64) -> GpuResult<StagingHandle> {
        self.allocate_slot(size, TransferDirection::Upload)
    }

    /// Hands out a readback handle of at least `size` bytes.
    pub fn allocate_for_readback(&self, size: u64) -> GpuResult<StagingHandle> {
        self.allocate_slot(size, TransferDirection::Readback)
    }

    /// Copies `data` into the mapping of an upload handle at `offset`.
    pub fn write(&self, handle: &StagingHandle, offset: u64, data: &[u8]) -> GpuResult<()> {
        check_range("StagingPool::write", offset, data.len() as u64, handle.capacity)?;
        self.with_mapped(handle, |mapped| {
            let start = offset as usize;
            mapped[start..start + data.len()].copy_from_slice(data);
        })
    }

    /// Runs `f` over the whole host mapping of an upload handle.
    ///
    /// The pool stays locked while `f` runs.
    pub fn with_mapped<R>(&self, handle: &StagingHandle, f: impl FnOnce(&mut [u8]) -> R) -> GpuResult<R> {
        expect_direction(handle, TransferDirection::Upload)?;
        let slots = self.lock()?;
        let slot = slots
            .get(handle.id)
            .filter(|s| s.state == SlotState::InUse)
            .ok_or_else(|| report(GpuError::StaleHandle))?;
        let mut view = slot.buffer.slice(..).get_mapped_range_mut();
        Ok(f(&mut view[..handle.capacity as usize]))
    }

    /// Unmaps the handle, submits a copy of its first `bytes` bytes into `dst`
    /// at `dst_offset`, and hands back a mapped replacement of the same size
    /// when pool occupancy allows.
    ///
    /// Once the copy is submitted the call succeeds; a replacement that cannot
    /// be created is logged and reported as `None`.
    /// An upload of zero bytes submits nothing and returns the same handle.
    pub fn submit_upload(
        &self,
        handle: StagingHandle,
        dst: &Buffer<'_>,
        bytes: u64,
        dst_offset: u64,
    ) -> GpuResult<Option<StagingHandle>> {
        const OP: &str = "submit_upload";
        expect_direction(&handle, TransferDirection::Upload)?;
        check_range(OP, 0, bytes, handle.capacity)?;
        dst.require(OP, BufferUsage::COPY_DST)?;
        dst.require_unmapped(OP)?;
        check_range(OP, dst_offset, bytes, dst.size())?;
        check_aligned(OP, dst_offset, bytes, COPY_ALIGNMENT)?;
        if bytes == 0 {
            return Ok(Some(handle));
        }

        let mut slots = self.lock()?;
        let slot = slots
            .get_mut(handle.id)
            .filter(|s| s.state == SlotState::InUse)
            .ok_or_else(|| report(GpuError::StaleHandle))?;

        slot.buffer.unmap();
        let mut encoder = self
            .device
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&self.label(TransferDirection::Upload)),
            });
        encoder.copy_buffer_to_buffer(&slot.buffer, 0, dst.native(), dst_offset, bytes);
        self.device.queue().submit(Some(encoder.finish()));
        slot.state = SlotState::InFlight;

        let request = EventLoop::request_map(&slot.buffer, 0..slot.capacity, wgpu::MapMode::Write);
        let shared = Arc::clone(&self.slots);
        let (id, max) = (handle.id, self.config.max_pool_size);
        self.device
            .events()
            .schedule(request, Box::new(move |status| settle(&shared, id, status, max)));

        let replacement = self.replacement(&mut slots, handle.capacity);
        drop(slots);
        Ok(keep_submitted(replacement, &self.config.label_prefix))
    }

    /// Copies `bytes` bytes of `src` from `src_offset` into the readback
    /// handle and maps it. `callback` receives exactly `bytes` bytes while the
    /// device is pumped; the slot returns to the pool afterwards.
    pub fn readback_into(
        &self,
        handle: StagingHandle,
        src: &Buffer<'_>,
        bytes: u64,
        src_offset: u64,
        callback: impl FnOnce(&[u8]) + Send + 'static,
    ) -> GpuResult<GpuFuture<()>> {
        const OP: &str = "readback_into";
        expect_direction(&handle, TransferDirection::Readback)?;
        check_range(OP, 0, bytes, handle.capacity)?;
        src.require(OP, BufferUsage::COPY_SRC)?;
        src.require_unmapped(OP)?;
        check_range(OP, src_offset, bytes, src.size())?;
        check_aligned(OP, src_offset, 0, COPY_ALIGNMENT)?;
        if bytes == 0 {
            let (done, fut) = GpuFuture::pair();
            self.device.events().schedule(
                MapRequest::resolved(),
                Box::new(move |_| {
                    callback(&[]);
                    done.resolve(Ok(()));
                }),
            );
            return Ok(fut);
        }

        // the source allocation is padded, so rounding the copy up stays in range
        let copy_len = align_up(bytes, COPY_ALIGNMENT);
        let buffer = {
            let mut slots = self.lock()?;
            let slot = slots
                .get_mut(handle.id)
                .filter(|s| s.state == SlotState::InUse)
                .ok_or_else(|| report(GpuError::StaleHandle))?;
            slot.state = SlotState::InFlight;
            Arc::clone(&slot.buffer)
        };

        let mut encoder = self
            .device
            .device()
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&self.label(TransferDirection::Readback)),
            });
        encoder.copy_buffer_to_buffer(src.native(), src_offset, &buffer, 0, copy_len);
        self.device.queue().submit(Some(encoder.finish()));

        let request = EventLoop::request_map(&buffer, 0..copy_len, wgpu::MapMode::Read);
        let shared = Arc::clone(&self.slots);
        let (id, max) = (handle.id, self.config.max_pool_size);
        let (done, fut) = GpuFuture::pair();
        self.device.events().schedule(
            request,
            Box::new(move |status| {
                let result = status.map(|()| {
                    {
                        let view = buffer.slice(0..copy_len).get_mapped_range();
                        callback(&view[..bytes as usize]);
                    }
                    buffer.unmap();
                });
                if result.is_err() {
                    log::error!("{OP}: mapping the readback slot failed");
                }
                settle(&shared, id, result.clone(), max);
                done.resolve(result.map_err(GpuError::from));
            }),
        );
        Ok(fut)
    }

    /// [`StagingPool::allocate_for_readback`] followed by [`StagingPool::readback_into`].
    pub fn readback(
        &self,
        src: &Buffer<'_>,
        bytes: u64,
        src_offset: u64,
        callback: impl FnOnce(&[u8]) + Send + 'static,
    ) -> GpuResult<GpuFuture<()>> {
        let handle = self.allocate_for_readback(bytes)?;
        self.readback_into(handle, src, bytes, src_offset, callback)
    }

    /// Drops every slot, ready or not. Outstanding handles go stale.
    ///
    /// The caller guarantees that no device work still references a purged slot.
    pub fn purge(&self) {
        let dropped = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .count();
        if dropped > 0 {
            log::debug!(
                "staging pool `{}`: purged {dropped} slots",
                self.config.label_prefix
            );
        }
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.iter().fold(PoolStats::default(), |mut stats, (_, slot)| {
            match slot.state {
                SlotState::Ready => stats.ready += 1,
                SlotState::InUse => stats.in_use += 1,
                SlotState::InFlight => stats.in_flight += 1,
            }
            stats
        })
    }

    fn allocate_slot(&self, size: u64, direction: TransferDirection) -> GpuResult<StagingHandle> {
        let mut slots = self.lock()?;
        let plan = plan_allocation(&summaries(&slots), size, direction, self.config.max_pool_size);
        let id = match plan {
            Plan::Reuse(id) => {
                if let Some(slot) = slots.get_mut(id) {
                    slot.state = SlotState::InUse;
                }
                id
            }
            Plan::Create => slots.insert(self.create_slot(size, direction)?),
            Plan::Evict(victim) => {
                log::warn!(
                    "staging pool `{}` saturated; evicting its smallest ready slot",
                    self.config.label_prefix
                );
                let slot = self.create_slot(size, direction)?;
                slots.remove(victim);
                slots.insert(slot)
            }
            Plan::Overflow => {
                log::warn!(
                    "staging pool `{}` saturated with nothing ready; allocating past {} slots",
                    self.config.label_prefix,
                    self.config.max_pool_size
                );
                slots.insert(self.create_slot(size, direction)?)
            }
        };
        Ok(self.handle(&slots, id))
    }

    fn replacement(
        &self,
        slots: &mut SlotMap<SlotId, StagingSlot>,
        capacity: u64,
    ) -> GpuResult<Option<StagingHandle>> {
        let id = match plan_replacement(&summaries(slots), capacity, self.config.max_pool_size) {
            Some(Plan::Reuse(id)) => {
                if let Some(slot) = slots.get_mut(id) {
                    slot.state = SlotState::InUse;
                }
                id
            }
            Some(_) => slots.insert(self.create_slot(capacity, TransferDirection::Upload)?),
            None => {
                log::warn!(
                    "staging pool `{}` saturated; no replacement created",
                    self.config.label_prefix
                );
                return Ok(None);
            }
        };
        Ok(Some(self.handle(slots, id)))
    }

    fn create_slot(&self, size: u64, direction: TransferDirection) -> GpuResult<StagingSlot> {
        // round up to reduce fragmentation; zero-byte requests still get a slot
        let capacity = padded_size("StagingPool::allocate", size, UNIFORM_ALIGNMENT)?
            .max(UNIFORM_ALIGNMENT);
        let (usage, mapped_at_creation) = match direction {
            TransferDirection::Upload => (
                wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC,
                true,
            ),
            TransferDirection::Readback => (
                wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                false,
            ),
        };
        let label = self.label(direction);
        let buffer = self.device.scoped("StagingPool::create_slot", || {
            self.device.device().create_buffer(&wgpu::BufferDescriptor {
                label: Some(&label),
                size: capacity,
                usage,
                mapped_at_creation,
            })
        })?;
        log::debug!("{label}: new slot of {capacity} bytes");
        Ok(StagingSlot {
            buffer: Arc::new(buffer),
            capacity,
            direction,
            state: SlotState::InUse,
        })
    }

    fn handle(&self, slots: &SlotMap<SlotId, StagingSlot>, id: SlotId) -> StagingHandle {
        let (capacity, direction) = slots
            .get(id)
            .map_or((0, TransferDirection::Upload), |s| (s.capacity, s.direction));
        StagingHandle {
            id,
            capacity,
            direction,
            max_pool_size: self.config.max_pool_size,
            slots: Arc::downgrade(&self.slots),
        }
    }

    fn label(&self, direction: TransferDirection) -> String {
        match direction {
            TransferDirection::Upload => format!("{}_upload", self.config.label_prefix),
            TransferDirection::Readback => format!("{}_readback", self.config.label_prefix),
        }
    }

    fn lock(&self) -> GpuResult<MutexGuard<'_, SlotMap<SlotId, StagingSlot>>> {
        if self.config.thread_safe {
            return Ok(self.slots.lock().unwrap_or_else(PoisonError::into_inner));
        }
        match self.slots.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => Err(report(GpuError::PoolContended)),
        }
    }
}

impl Drop for StagingPool<'_> {
    fn drop(&mut self) {
        self.purge();
    }
}

fn summaries(slots: &SlotMap<SlotId, StagingSlot>) -> Vec<SlotSummary> {
    slots
        .iter()
        .map(|(id, slot)| SlotSummary {
            id,
            capacity: slot.capacity,
            direction: slot.direction,
            state: slot.state,
        })
        .collect()
}

/// A submitted upload stands even when its replacement could not be made.
fn keep_submitted<T>(replacement: GpuResult<Option<T>>, pool: &str) -> Option<T> {
    replacement.unwrap_or_else(|e| {
        log::warn!("staging pool `{pool}`: upload submitted, no replacement: {e}");
        None
    })
}

fn expect_direction(handle: &StagingHandle, expected: TransferDirection) -> GpuResult<()> {
    if handle.direction == expected {
        Ok(())
    } else {
        Err(report(GpuError::WrongDirection {
            expected,
            found: handle.direction,
        }))
    }
}

/// Completion of an in-flight slot: back to `Ready`, or destroyed when the
/// pool is over its cap or the map failed.
fn settle(
    slots: &Mutex<SlotMap<SlotId, StagingSlot>>,
    id: SlotId,
    status: MapStatus,
    max: usize,
) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    let over_cap = should_retire(slots.len(), max);
    match slots.get_mut(id) {
        Some(slot) if status.is_ok() && !over_cap => slot.state = SlotState::Ready,
        Some(_) => {
            if status.is_err() {
                log::warn!("staging slot lost its mapping; destroying it");
            }
            slots.remove(id);
        }
        // purged while in flight
        None => {}
    }
}
