//! Deferred destruction of GPU resources.
//!
//! With multiple frames in flight a released resource may still be read by a
//! frame the GPU has not finished, so destruction is deferred: a release
//! appends the handle to a per-kind queue tagged with the global frame
//! counter, and the entry is only destroyed once the counter has advanced by
//! the ring size past its tag. By then the slot that was current at release
//! time has been reused, which required observing its fence signaled, so no
//! submitted work can still reference the resource.
//!
//! Each resource kind keeps its own homogeneous queue because the device
//! call that destroys it differs per kind; type-erasing them into one queue
//! would bury that.

use crate::error::{GpuError, Result};
use crate::frame::FRAMES_IN_FLIGHT;
use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};
use std::collections::VecDeque;

/// A resource released by the renderer, awaiting retirement.
///
/// Buffers and images carry their memory allocation so handle and backing
/// memory are freed together; an allocation outliving its handle would leak
/// silently, with nothing left to observe it through.
pub enum Retired {
    /// Image plus its backing allocation.
    Image(vk::Image, Option<Allocation>),
    /// Image view.
    ImageView(vk::ImageView),
    /// Buffer plus its backing allocation.
    Buffer(vk::Buffer, Option<Allocation>),
    /// Sampler.
    Sampler(vk::Sampler),
    /// Descriptor pool; frees its sets with it.
    DescriptorPool(vk::DescriptorPool),
    /// Descriptor set layout.
    DescriptorSetLayout(vk::DescriptorSetLayout),
    /// Descriptor update template.
    DescriptorUpdateTemplate(vk::DescriptorUpdateTemplate),
    /// Shader module.
    ShaderModule(vk::ShaderModule),
    /// Pipeline layout.
    PipelineLayout(vk::PipelineLayout),
    /// Pipeline.
    Pipeline(vk::Pipeline),
    /// Query pool.
    QueryPool(vk::QueryPool),
    /// Acceleration structure (destroyed through the KHR loader).
    AccelerationStructure(vk::AccelerationStructureKHR),
}

/// FIFO of `(resource, release frame)` entries for one resource kind.
///
/// Tags are non-decreasing because releases always use the current, monotonic
/// frame counter, so the front entry is always the first to mature and
/// draining never needs to scan past it.
struct RetireQueue<T> {
    entries: VecDeque<(T, u64)>,
}

impl<T> RetireQueue<T> {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    fn release(&mut self, resource: T, frame: u64) {
        debug_assert!(
            self.entries.back().map_or(true, |&(_, tag)| tag <= frame),
            "retirement tags must be non-decreasing"
        );
        self.entries.push_back((resource, frame));
    }

    /// Pop the front entry if it has matured.
    ///
    /// `current_frame == None` drains unconditionally (shutdown, after the
    /// device has gone idle). Otherwise an entry tagged `t` matures once
    /// `t + FRAMES_IN_FLIGHT <= current_frame`.
    fn pop_mature(&mut self, current_frame: Option<u64>) -> Option<T> {
        let mature = match (self.entries.front(), current_frame) {
            (Some(_), None) => true,
            (Some(&(_, tag)), Some(frame)) => tag + FRAMES_IN_FLIGHT as u64 <= frame,
            (None, _) => false,
        };

        if mature {
            self.entries.pop_front().map(|(resource, _)| resource)
        } else {
            None
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Per-kind retirement queues for every deferred-destroyable resource kind.
///
/// Single-writer: the frame-advancing thread owns this; concurrent releases
/// from other threads must be funneled or serialized by the caller.
pub struct RetirementQueues {
    images: RetireQueue<(vk::Image, Option<Allocation>)>,
    image_views: RetireQueue<vk::ImageView>,
    buffers: RetireQueue<(vk::Buffer, Option<Allocation>)>,
    samplers: RetireQueue<vk::Sampler>,
    descriptor_pools: RetireQueue<vk::DescriptorPool>,
    descriptor_set_layouts: RetireQueue<vk::DescriptorSetLayout>,
    descriptor_update_templates: RetireQueue<vk::DescriptorUpdateTemplate>,
    shader_modules: RetireQueue<vk::ShaderModule>,
    pipeline_layouts: RetireQueue<vk::PipelineLayout>,
    pipelines: RetireQueue<vk::Pipeline>,
    query_pools: RetireQueue<vk::QueryPool>,
    acceleration_structures: RetireQueue<vk::AccelerationStructureKHR>,
}

impl RetirementQueues {
    /// Create empty queues.
    pub fn new() -> Self {
        Self {
            images: RetireQueue::new(),
            image_views: RetireQueue::new(),
            buffers: RetireQueue::new(),
            samplers: RetireQueue::new(),
            descriptor_pools: RetireQueue::new(),
            descriptor_set_layouts: RetireQueue::new(),
            descriptor_update_templates: RetireQueue::new(),
            shader_modules: RetireQueue::new(),
            pipeline_layouts: RetireQueue::new(),
            pipelines: RetireQueue::new(),
            query_pools: RetireQueue::new(),
            acceleration_structures: RetireQueue::new(),
        }
    }

    /// Queue a resource for destruction, tagged with the current frame.
    ///
    /// No GPU-visible effect and never blocks; the handle stays valid until
    /// a later [`Self::collect`] decides it has matured.
    pub fn release(&mut self, resource: Retired, frame: u64) {
        match resource {
            Retired::Image(image, allocation) => self.images.release((image, allocation), frame),
            Retired::ImageView(view) => self.image_views.release(view, frame),
            Retired::Buffer(buffer, allocation) => {
                self.buffers.release((buffer, allocation), frame);
            }
            Retired::Sampler(sampler) => self.samplers.release(sampler, frame),
            Retired::DescriptorPool(pool) => self.descriptor_pools.release(pool, frame),
            Retired::DescriptorSetLayout(layout) => {
                self.descriptor_set_layouts.release(layout, frame);
            }
            Retired::DescriptorUpdateTemplate(template) => {
                self.descriptor_update_templates.release(template, frame);
            }
            Retired::ShaderModule(module) => self.shader_modules.release(module, frame),
            Retired::PipelineLayout(layout) => self.pipeline_layouts.release(layout, frame),
            Retired::Pipeline(pipeline) => self.pipelines.release(pipeline, frame),
            Retired::QueryPool(pool) => self.query_pools.release(pool, frame),
            Retired::AccelerationStructure(accel) => {
                self.acceleration_structures.release(accel, frame);
            }
        }
    }

    /// Destroy every entry that has matured at `current_frame`.
    ///
    /// Invoked once per frame, after the counter advances. Draining is
    /// front-first per kind and stops at the first entry still in flight.
    ///
    /// # Safety
    /// The device and allocator must be the ones the resources were created
    /// with, and `current_frame` must come from the frame ring that paced
    /// the submissions referencing these resources.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn collect(
        &mut self,
        device: &ash::Device,
        allocator: &mut Allocator,
        accel_loader: Option<&ash::khr::acceleration_structure::Device>,
        current_frame: u64,
    ) -> Result<()> {
        self.destroy_mature(device, allocator, accel_loader, Some(current_frame))
    }

    /// Destroy everything, regardless of age.
    ///
    /// # Safety
    /// Same as [`Self::collect`], and the device must be idle.
    pub unsafe fn flush(
        &mut self,
        device: &ash::Device,
        allocator: &mut Allocator,
        accel_loader: Option<&ash::khr::acceleration_structure::Device>,
    ) -> Result<()> {
        self.destroy_mature(device, allocator, accel_loader, None)
    }

    unsafe fn destroy_mature(
        &mut self,
        device: &ash::Device,
        allocator: &mut Allocator,
        accel_loader: Option<&ash::khr::acceleration_structure::Device>,
        current_frame: Option<u64>,
    ) -> Result<()> {
        let before = self.pending();

        while let Some((image, allocation)) = self.images.pop_mature(current_frame) {
            free_allocation(allocator, allocation)?;
            device.destroy_image(image, None);
        }
        while let Some(view) = self.image_views.pop_mature(current_frame) {
            device.destroy_image_view(view, None);
        }
        while let Some((buffer, allocation)) = self.buffers.pop_mature(current_frame) {
            free_allocation(allocator, allocation)?;
            device.destroy_buffer(buffer, None);
        }
        while let Some(sampler) = self.samplers.pop_mature(current_frame) {
            device.destroy_sampler(sampler, None);
        }
        while let Some(pool) = self.descriptor_pools.pop_mature(current_frame) {
            device.destroy_descriptor_pool(pool, None);
        }
        while let Some(layout) = self.descriptor_set_layouts.pop_mature(current_frame) {
            device.destroy_descriptor_set_layout(layout, None);
        }
        while let Some(template) = self.descriptor_update_templates.pop_mature(current_frame) {
            device.destroy_descriptor_update_template(template, None);
        }
        while let Some(module) = self.shader_modules.pop_mature(current_frame) {
            device.destroy_shader_module(module, None);
        }
        while let Some(layout) = self.pipeline_layouts.pop_mature(current_frame) {
            device.destroy_pipeline_layout(layout, None);
        }
        while let Some(pipeline) = self.pipelines.pop_mature(current_frame) {
            device.destroy_pipeline(pipeline, None);
        }
        while let Some(pool) = self.query_pools.pop_mature(current_frame) {
            device.destroy_query_pool(pool, None);
        }
        while let Some(accel) = self.acceleration_structures.pop_mature(current_frame) {
            let loader = accel_loader.ok_or_else(|| {
                GpuError::InvalidState(
                    "acceleration structure released without a KHR loader".to_string(),
                )
            })?;
            loader.destroy_acceleration_structure(accel, None);
        }

        let destroyed = before - self.pending();
        if destroyed > 0 {
            tracing::debug!(destroyed, remaining = self.pending(), "retired resources");
        }

        Ok(())
    }

    /// Total entries across every kind still awaiting retirement.
    pub fn pending(&self) -> usize {
        self.images.len()
            + self.image_views.len()
            + self.buffers.len()
            + self.samplers.len()
            + self.descriptor_pools.len()
            + self.descriptor_set_layouts.len()
            + self.descriptor_update_templates.len()
            + self.shader_modules.len()
            + self.pipeline_layouts.len()
            + self.pipelines.len()
            + self.query_pools.len()
            + self.acceleration_structures.len()
    }
}

impl Default for RetirementQueues {
    fn default() -> Self {
        Self::new()
    }
}

fn free_allocation(allocator: &mut Allocator, allocation: Option<Allocation>) -> Result<()> {
    if let Some(allocation) = allocation {
        allocator
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn entry_matures_exactly_one_ring_cycle_after_release() {
        // Released at counter 2 with a ring of 3: still in flight through
        // counters 3 and 4, destroyable exactly at 5.
        let mut queue = RetireQueue::new();
        queue.release(vk::Sampler::from_raw(0x1), 2);

        assert!(queue.pop_mature(Some(3)).is_none());
        assert!(queue.pop_mature(Some(4)).is_none());
        assert_eq!(queue.pop_mature(Some(5)), Some(vk::Sampler::from_raw(0x1)));
    }

    #[test]
    fn release_then_collect_same_frame_stays_queued() {
        let mut queue = RetireQueue::new();
        queue.release(vk::Sampler::from_raw(0x1), 7);

        assert!(queue.pop_mature(Some(7)).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn draining_stops_at_first_entry_still_in_flight() {
        let mut queue = RetireQueue::new();
        queue.release(vk::Sampler::from_raw(0x1), 0);
        queue.release(vk::Sampler::from_raw(0x2), 1);
        queue.release(vk::Sampler::from_raw(0x3), 6);

        let mut drained = Vec::new();
        while let Some(sampler) = queue.pop_mature(Some(4)) {
            drained.push(sampler);
        }

        assert_eq!(
            drained,
            [vk::Sampler::from_raw(0x1), vk::Sampler::from_raw(0x2)]
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn unconditional_drain_ignores_tags() {
        let mut queue = RetireQueue::new();
        queue.release(vk::Sampler::from_raw(0x1), 100);
        queue.release(vk::Sampler::from_raw(0x2), 101);

        assert_eq!(queue.pop_mature(None), Some(vk::Sampler::from_raw(0x1)));
        assert_eq!(queue.pop_mature(None), Some(vk::Sampler::from_raw(0x2)));
        assert!(queue.pop_mature(None).is_none());
    }

    #[test]
    fn releases_route_to_their_kind_queue() {
        let mut queues = RetirementQueues::new();
        queues.release(Retired::ImageView(vk::ImageView::from_raw(0x1)), 0);
        queues.release(Retired::Buffer(vk::Buffer::from_raw(0x2), None), 0);
        queues.release(Retired::Pipeline(vk::Pipeline::from_raw(0x3)), 1);
        queues.release(Retired::Pipeline(vk::Pipeline::from_raw(0x4)), 1);

        assert_eq!(queues.image_views.len(), 1);
        assert_eq!(queues.buffers.len(), 1);
        assert_eq!(queues.pipelines.len(), 2);
        assert_eq!(queues.pending(), 4);
    }

    #[test]
    fn kinds_retire_independently() {
        let mut queues = RetirementQueues::new();
        queues.release(Retired::Sampler(vk::Sampler::from_raw(0x1)), 0);
        queues.release(Retired::QueryPool(vk::QueryPool::from_raw(0x2)), 4);

        assert_eq!(
            queues.samplers.pop_mature(Some(4)),
            Some(vk::Sampler::from_raw(0x1))
        );
        assert!(queues.query_pools.pop_mature(Some(4)).is_none());
    }
}
