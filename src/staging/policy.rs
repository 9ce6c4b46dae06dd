//! Slot selection for the staging pool, kept free of device calls.

use super::{SlotId, TransferDirection};

/// Extra slots a replacement may create beyond `max_pool_size`.
pub(crate) const REPLACEMENT_HEADROOM: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Idle and reusable. Upload slots are host-mapped in this state.
    Ready,
    /// Held through a `StagingHandle`.
    InUse,
    /// Copy submitted; waiting for the device to release the buffer.
    InFlight,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotSummary {
    pub(crate) id: SlotId,
    pub(crate) capacity: u64,
    pub(crate) direction: TransferDirection,
    pub(crate) state: SlotState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
    /// Hand out this ready slot as is.
    Reuse(SlotId),
    /// Room under the cap for a new slot.
    Create,
    /// Saturated: drop this ready slot and allocate in its place.
    Evict(SlotId),
    /// Saturated with nothing ready: allocate past the cap.
    Overflow,
}

/// Smallest ready slot of `direction` that holds `size` bytes.
fn best_fit(slots: &[SlotSummary], size: u64, direction: TransferDirection) -> Option<SlotId> {
    slots
        .iter()
        .filter(|s| s.state == SlotState::Ready && s.direction == direction && s.capacity >= size)
        .min_by_key(|s| s.capacity)
        .map(|s| s.id)
}

pub(crate) fn plan_allocation(
    slots: &[SlotSummary],
    size: u64,
    direction: TransferDirection,
    max_pool_size: usize,
) -> Plan {
    if let Some(id) = best_fit(slots, size, direction) {
        return Plan::Reuse(id);
    }
    if slots.len() < max_pool_size {
        return Plan::Create;
    }
    slots
        .iter()
        .filter(|s| s.state == SlotState::Ready)
        .min_by_key(|s| s.capacity)
        .map_or(Plan::Overflow, |s| Plan::Evict(s.id))
}

/// Where the replacement handed back by an upload comes from, if anywhere.
pub(crate) fn plan_replacement(
    slots: &[SlotSummary],
    size: u64,
    max_pool_size: usize,
) -> Option<Plan> {
    if let Some(id) = best_fit(slots, size, TransferDirection::Upload) {
        return Some(Plan::Reuse(id));
    }
    (slots.len() < max_pool_size + REPLACEMENT_HEADROOM).then_some(Plan::Create)
}

/// Whether a slot finishing its transfer should be destroyed instead of kept.
pub(crate) fn should_retire(live_slots: usize, max_pool_size: usize) -> bool {
    live_slots > max_pool_size
}
