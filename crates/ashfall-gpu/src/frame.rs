//! Frame slot ring.
//!
//! A fixed ring of [`FrameSlot`]s decouples the CPU from the GPU by at most
//! [`FRAMES_IN_FLIGHT`] frames. Reusing a slot first waits on its fence, so
//! everything the slot's previous frame submitted has provably retired before
//! its command pools are reset. That same bound is what the deferred
//! destruction queue in [`crate::deferred`] relies on.

use crate::command::CommandPool;
use crate::error::Result;
use crate::queue::{QueueClass, QueueFamilies};
use crate::sync::{create_fence, create_semaphore, reset_fence, wait_for_fence};
use ash::vk;

/// Frames that may be in flight simultaneously.
pub const FRAMES_IN_FLIGHT: usize = 3;

/// Ring position a frame counter maps to.
pub const fn slot_index(frame_count: u64) -> usize {
    (frame_count % FRAMES_IN_FLIGHT as u64) as usize
}

/// Whether the slot for `frame_count` has been used before.
///
/// During the first cycle through the ring every slot is fresh and there is
/// nothing to wait for; its fence has never been submitted.
pub const fn slot_was_used(frame_count: u64) -> bool {
    frame_count >= FRAMES_IN_FLIGHT as u64
}

/// Per-frame GPU state: completion fence, inter-queue and presentation
/// semaphores, and one command pool per queue class.
pub struct FrameSlot {
    pub(crate) fence: vk::Fence,
    pub(crate) copy_done_semaphore: vk::Semaphore,
    pub(crate) acquire_semaphore: vk::Semaphore,
    pub(crate) release_semaphore: vk::Semaphore,
    pools: [CommandPool; QueueClass::COUNT],
}

impl FrameSlot {
    /// Create the slot's sync primitives and command pools, and open
    /// buffer 0 of every pool for recording.
    ///
    /// # Safety
    /// The device must be valid and the family indices must exist on it.
    unsafe fn new(device: &ash::Device, families: QueueFamilies) -> Result<Self> {
        let fence = create_fence(device)?;
        let copy_done_semaphore = create_semaphore(device)?;
        let acquire_semaphore = create_semaphore(device)?;
        let release_semaphore = create_semaphore(device)?;

        let mut pools = [
            CommandPool::new(device, families.copy, QueueClass::Copy)?,
            CommandPool::new(device, families.graphics, QueueClass::Graphics)?,
        ];
        for pool in &mut pools {
            pool.reset(device)?;
        }

        Ok(Self {
            fence,
            copy_done_semaphore,
            acquire_semaphore,
            release_semaphore,
            pools,
        })
    }

    /// Command pool for a queue class.
    pub fn pool(&self, class: QueueClass) -> &CommandPool {
        &self.pools[class.index()]
    }

    /// Mutable command pool for a queue class.
    pub fn pool_mut(&mut self, class: QueueClass) -> &mut CommandPool {
        &mut self.pools[class.index()]
    }

    /// Semaphore the swapchain collaborator signals on image acquisition.
    ///
    /// Reserved here so it recycles with the slot; this crate never waits on
    /// or signals it.
    pub fn acquire_semaphore(&self) -> vk::Semaphore {
        self.acquire_semaphore
    }

    /// Semaphore signaled by the frame's graphics submission, waited on by
    /// presentation.
    pub fn release_semaphore(&self) -> vk::Semaphore {
        self.release_semaphore
    }

    /// # Safety
    /// The device must be valid and none of the slot's work may be pending.
    unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_fence(self.fence, None);
        device.destroy_semaphore(self.copy_done_semaphore, None);
        device.destroy_semaphore(self.acquire_semaphore, None);
        device.destroy_semaphore(self.release_semaphore, None);
        for pool in &self.pools {
            pool.destroy(device);
        }
    }
}

/// Fixed ring of frame slots plus the global frame counter.
///
/// Owned and mutated by a single frame-advancing thread.
pub struct FrameRing {
    slots: [FrameSlot; FRAMES_IN_FLIGHT],
    frame_count: u64,
}

impl FrameRing {
    /// Build the ring. Buffer 0 of every pool in slot 0 is open for
    /// recording on return.
    ///
    /// # Safety
    /// The device must be valid and the family indices must exist on it.
    pub unsafe fn new(device: &ash::Device, families: QueueFamilies) -> Result<Self> {
        let slots = [
            FrameSlot::new(device, families)?,
            FrameSlot::new(device, families)?,
            FrameSlot::new(device, families)?,
        ];

        tracing::info!(
            frames_in_flight = FRAMES_IN_FLIGHT,
            copy_aliases_graphics = families.copy_aliases_graphics(),
            "frame ring initialized"
        );

        Ok(Self {
            slots,
            frame_count: 0,
        })
    }

    /// Monotonic frame counter; incremented once per completed frame.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Slot for the frame currently being recorded.
    pub fn current(&self) -> &FrameSlot {
        &self.slots[slot_index(self.frame_count)]
    }

    /// Mutable slot for the frame currently being recorded.
    pub fn current_mut(&mut self) -> &mut FrameSlot {
        &mut self.slots[slot_index(self.frame_count)]
    }

    /// Advance to the next frame slot after the current frame's submissions
    /// have been issued.
    ///
    /// Increments the counter, then prepares the newly selected slot: if the
    /// ring has completed a full cycle the slot is in flight, so block on its
    /// fence (this is the one deliberate backpressure point in the crate) and
    /// recycle the fence; then reset every command pool, which reopens
    /// buffer 0.
    ///
    /// # Safety
    /// The device must be valid and the current slot's submissions must have
    /// been issued with the slot fence attached.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn advance(&mut self, device: &ash::Device) -> Result<()> {
        self.frame_count += 1;

        let slot = &mut self.slots[slot_index(self.frame_count)];
        if slot_was_used(self.frame_count) {
            wait_for_fence(device, slot.fence)?;
            reset_fence(device, slot.fence)?;

            for pool in &mut slot.pools {
                pool.reset(device)?;
            }
        }

        Ok(())
    }

    /// Destroy every slot's fence, semaphores and pools.
    ///
    /// # Safety
    /// The device must be valid and idle.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for slot in &self.slots {
            slot.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_wraps_around_the_ring() {
        for count in 0..10 {
            assert_eq!(slot_index(count), (count % 3) as usize);
        }
    }

    #[test]
    fn first_cycle_slots_need_no_wait() {
        // Slots 0..ring size have never been submitted; waiting on their
        // unsignaled fences would deadlock.
        assert!(!slot_was_used(0));
        assert!(!slot_was_used(1));
        assert!(!slot_was_used(2));
        assert!(slot_was_used(3));
        assert!(slot_was_used(1000));
    }

    #[test]
    fn reused_slot_is_the_one_that_cycled_out() {
        // Frame counter n and n + ring size share a slot; nothing in between
        // does. This is the overlap the fence wait guards against.
        for count in 0..32_u64 {
            assert_eq!(slot_index(count), slot_index(count + 3));
            assert_ne!(slot_index(count), slot_index(count + 1));
            assert_ne!(slot_index(count), slot_index(count + 2));
        }
    }
}
