//! Per-frame command buffer pools.
//!
//! Every frame slot owns one [`CommandPool`] per queue class. Each pool
//! pre-allocates a fixed number of primary command buffers at startup and
//! hands them out through a cursor; nothing is allocated at steady state.
//! After a pool reset, buffer 0 is immediately begun so a caller always has
//! a recordable buffer without an explicit begin step at the frame boundary.

use crate::error::{GpuError, Result};
use crate::queue::QueueClass;
use ash::vk;

/// Command buffers pre-allocated per pool.
///
/// Sized for the worst-case number of buffers a single frame records on one
/// queue class; running out is a configuration error, not a runtime one.
pub const MAX_COMMAND_BUFFERS: usize = 8;

/// A fixed-capacity pool of reusable primary command buffers.
pub struct CommandPool {
    handle: vk::CommandPool,
    buffers: [vk::CommandBuffer; MAX_COMMAND_BUFFERS],
    cursor: usize,
    class: QueueClass,
}

impl CommandPool {
    /// Create the pool and pre-allocate all of its command buffers.
    ///
    /// The pool is TRANSIENT: buffers are recorded once per frame and bulk
    /// recycled with a pool reset, never reset individually.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist on it.
    pub unsafe fn new(device: &ash::Device, queue_family: u32, class: QueueClass) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);

        let handle = device.create_command_pool(&create_info, None)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(MAX_COMMAND_BUFFERS as u32);

        let allocated = device.allocate_command_buffers(&alloc_info)?;
        let mut buffers = [vk::CommandBuffer::null(); MAX_COMMAND_BUFFERS];
        buffers.copy_from_slice(&allocated);

        Ok(Self {
            handle,
            buffers,
            cursor: 0,
            class,
        })
    }

    /// The buffer currently open for recording.
    ///
    /// The handle is only valid for the current frame; callers must not
    /// cache it across a submit.
    pub fn current(&self) -> vk::CommandBuffer {
        self.buffers[self.cursor]
    }

    /// All buffers recorded this frame, oldest first.
    pub fn recorded(&self) -> &[vk::CommandBuffer] {
        &self.buffers[..=self.cursor]
    }

    /// Move the cursor to a fresh buffer and begin recording on it.
    ///
    /// The previous buffer stays open; every recorded buffer is ended in one
    /// pass at submission time.
    ///
    /// # Safety
    /// The device must be valid and the pool must have been reset this frame
    /// cycle.
    pub unsafe fn advance(&mut self, device: &ash::Device) -> Result<()> {
        self.bump_cursor()?;
        begin_command_buffer(device, self.buffers[self.cursor])?;
        Ok(())
    }

    /// Bounds-checked cursor increment.
    fn bump_cursor(&mut self) -> Result<()> {
        if self.cursor + 1 >= MAX_COMMAND_BUFFERS {
            return Err(GpuError::CommandPoolExhausted {
                class: self.class,
                capacity: MAX_COMMAND_BUFFERS,
            });
        }
        self.cursor += 1;
        Ok(())
    }

    /// End every buffer recorded this frame.
    ///
    /// # Safety
    /// The device must be valid and all recorded buffers must be in the
    /// recording state.
    pub unsafe fn end_recorded(&self, device: &ash::Device) -> Result<()> {
        for &cmd in self.recorded() {
            device.end_command_buffer(cmd)?;
        }
        Ok(())
    }

    /// Recycle the pool for a new frame.
    ///
    /// Resets the underlying pool storage, rewinds the cursor and reopens
    /// buffer 0 for recording.
    ///
    /// # Safety
    /// The device must be valid and the GPU must have finished with every
    /// buffer in the pool (the owning frame slot's fence has signaled).
    pub unsafe fn reset(&mut self, device: &ash::Device) -> Result<()> {
        device.reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())?;
        self.cursor = 0;
        begin_command_buffer(device, self.buffers[0])?;
        Ok(())
    }

    /// Destroy the pool; its buffers are freed with it.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.handle, None);
    }
}

/// Begin recording a command buffer for one-time submission.
///
/// # Safety
/// The device and command buffer must be valid, and the buffer must be in
/// the initial state.
pub unsafe fn begin_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    device.begin_command_buffer(cmd, &begin_info)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn pool_with_cursor(cursor: usize) -> CommandPool {
        let mut buffers = [vk::CommandBuffer::null(); MAX_COMMAND_BUFFERS];
        for (i, buffer) in buffers.iter_mut().enumerate() {
            *buffer = vk::CommandBuffer::from_raw(0x1000 + i as u64);
        }
        CommandPool {
            handle: vk::CommandPool::null(),
            buffers,
            cursor,
            class: QueueClass::Graphics,
        }
    }

    #[test]
    fn current_follows_cursor() {
        let pool = pool_with_cursor(3);
        assert_eq!(pool.current(), pool.buffers[3]);
    }

    #[test]
    fn recorded_spans_zero_through_cursor() {
        let pool = pool_with_cursor(0);
        assert_eq!(pool.recorded().len(), 1);

        let pool = pool_with_cursor(5);
        assert_eq!(pool.recorded().len(), 6);
        assert_eq!(pool.recorded()[0], pool.buffers[0]);
        assert_eq!(pool.recorded()[5], pool.buffers[5]);
    }

    #[test]
    fn cursor_advances_up_to_capacity() {
        let mut pool = pool_with_cursor(0);
        for expected in 1..MAX_COMMAND_BUFFERS {
            pool.bump_cursor().unwrap();
            assert_eq!(pool.cursor, expected);
        }
    }

    #[test]
    fn cursor_never_exceeds_capacity() {
        // Exhaustion must surface as a detectable error, not an out-of-bounds
        // index into the buffer array.
        let mut pool = pool_with_cursor(MAX_COMMAND_BUFFERS - 1);
        let result = pool.bump_cursor();
        assert!(matches!(
            result,
            Err(GpuError::CommandPoolExhausted {
                capacity: MAX_COMMAND_BUFFERS,
                ..
            })
        ));
        assert_eq!(pool.cursor, MAX_COMMAND_BUFFERS - 1);
    }
}
