//! Render context: the owning handle for the frame-lifetime core.
//!
//! Device and instance setup live elsewhere; the setup collaborator opens
//! the device, picks queues and builds the allocator, then hands everything
//! over as [`DeviceHandles`]. The context owns the frame ring and the
//! retirement queues for the span between [`RenderContext::startup`] and
//! shutdown, with no ambient global state.

use crate::deferred::{Retired, RetirementQueues};
use crate::error::{fatal, Result};
use crate::frame::{FrameRing, FrameSlot};
use crate::queue::{QueueClass, QueueFamilies};
use crate::submit::submit_frame;
use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;
use std::sync::Arc;

/// Capability flags the setup collaborator resolved during device creation.
///
/// Carried for allocator-related decisions only; the frame core itself does
/// not branch on them.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceCapabilities {
    /// Device addresses enabled on the allocator.
    pub buffer_device_address: bool,
}

/// Everything the setup collaborator hands to this core.
pub struct DeviceHandles {
    /// Opened logical device.
    pub device: Arc<ash::Device>,
    /// Physical device the logical device was created from.
    pub physical_device: vk::PhysicalDevice,
    /// One queue per class, indexed by [`QueueClass::index`].
    pub queues: [vk::Queue; QueueClass::COUNT],
    /// Family assignment behind `queues`, from
    /// [`crate::queue::select_queue_families`].
    pub queue_families: QueueFamilies,
    /// Allocator built against the same device.
    pub allocator: Mutex<Allocator>,
    /// Capability flags resolved at device creation.
    pub capabilities: DeviceCapabilities,
    /// KHR loader for acceleration structure destruction, when the extension
    /// is enabled.
    pub acceleration_structures: Option<ash::khr::acceleration_structure::Device>,
}

/// Owner of the frame ring, retirement queues and handed-in device handles.
///
/// Single-threaded by design: one frame-advancing thread records, submits
/// and releases. The context never destroys the device or instance; those
/// return to the setup collaborator when it is dropped.
pub struct RenderContext {
    device: Arc<ash::Device>,
    physical_device: vk::PhysicalDevice,
    queues: [vk::Queue; QueueClass::COUNT],
    queue_families: QueueFamilies,
    allocator: Mutex<Allocator>,
    capabilities: DeviceCapabilities,
    accel_loader: Option<ash::khr::acceleration_structure::Device>,
    ring: FrameRing,
    retirement: RetirementQueues,
}

impl RenderContext {
    /// Build the frame ring and retirement queues over the handed-in device.
    ///
    /// On return, buffer 0 of every pool in slot 0 is open for recording.
    ///
    /// # Safety
    /// Every handle in `handles` must be valid, belong to the same device,
    /// and outlive the context. The queues must match the family assignment.
    pub unsafe fn startup(handles: DeviceHandles) -> Result<Self> {
        let ring = FrameRing::new(&handles.device, handles.queue_families)?;

        tracing::info!(
            buffer_device_address = handles.capabilities.buffer_device_address,
            "render context started"
        );

        Ok(Self {
            device: handles.device,
            physical_device: handles.physical_device,
            queues: handles.queues,
            queue_families: handles.queue_families,
            allocator: handles.allocator,
            capabilities: handles.capabilities,
            accel_loader: handles.acceleration_structures,
            ring,
            retirement: RetirementQueues::new(),
        })
    }

    /// Tear the context down.
    ///
    /// Waits for all in-flight work, destroys every queued resource and the
    /// ring's fences, semaphores and pools. Dropping the context does the
    /// same; this spelling just makes the point explicit at call sites.
    pub fn shutdown(self) {
        drop(self);
    }

    /// The command buffer currently open for recording on a queue class.
    ///
    /// Valid for this frame only; never cache the handle across
    /// [`Self::submit`].
    pub fn command_buffer(&self, class: QueueClass) -> vk::CommandBuffer {
        self.ring.current().pool(class).current()
    }

    /// Switch a queue class to a fresh command buffer.
    ///
    /// The previous buffer stays open and is ended at submission; the new
    /// buffer is begun immediately. Exhausting the pool's fixed capacity is
    /// a configuration error and fatal.
    pub fn next_command_buffer(&mut self, class: QueueClass) {
        let result = unsafe {
            self.ring
                .current_mut()
                .pool_mut(class)
                .advance(&self.device)
        };
        if let Err(err) = result {
            fatal(&err);
        }
    }

    /// Submit the frame and open the next one.
    ///
    /// Issues both queue submissions for the current slot (Copy before
    /// Graphics, with the cross-queue dependency attached), advances the
    /// frame counter, prepares the next slot (waiting on its fence if it is
    /// still in flight) and destroys every released resource that has
    /// matured. Any device failure here is unrecoverable and aborts.
    pub fn submit(&mut self) {
        if let Err(err) = unsafe { self.submit_inner() } {
            fatal(&err);
        }
    }

    unsafe fn submit_inner(&mut self) -> Result<()> {
        submit_frame(&self.device, &self.queues, self.ring.current())?;
        self.ring.advance(&self.device)?;

        let mut allocator = self.allocator.lock();
        self.retirement.collect(
            &self.device,
            &mut allocator,
            self.accel_loader.as_ref(),
            self.ring.frame_count(),
        )
    }

    /// Queue a resource for deferred destruction.
    ///
    /// The handle is tagged with the current frame counter and destroyed
    /// once the counter has advanced a full ring cycle past it.
    pub fn release(&mut self, resource: Retired) {
        self.retirement.release(resource, self.ring.frame_count());
    }

    /// Global frame counter; increments once per [`Self::submit`].
    pub fn frame_count(&self) -> u64 {
        self.ring.frame_count()
    }

    /// Slot for the frame currently being recorded.
    ///
    /// The swapchain collaborator reads the acquire and release semaphores
    /// from here.
    pub fn current_slot(&self) -> &FrameSlot {
        self.ring.current()
    }

    /// Resources queued but not yet destroyed.
    pub fn pending_retirements(&self) -> usize {
        self.retirement.pending()
    }

    /// The Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// The physical device handle.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The queue backing a class.
    pub fn queue(&self, class: QueueClass) -> vk::Queue {
        self.queues[class.index()]
    }

    /// The family assignment behind the queues.
    pub fn queue_families(&self) -> QueueFamilies {
        self.queue_families
    }

    /// Capability flags resolved at device creation.
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    /// Access to the GPU allocator.
    pub fn allocator(&self) -> &Mutex<Allocator> {
        &self.allocator
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            {
                let mut allocator = self.allocator.lock();
                if let Err(err) =
                    self.retirement
                        .flush(&self.device, &mut allocator, self.accel_loader.as_ref())
                {
                    tracing::error!("retirement flush failed during shutdown: {err}");
                }
            }

            self.ring.destroy(&self.device);
        }

        tracing::info!("render context shut down");
    }
}
