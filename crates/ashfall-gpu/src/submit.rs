//! Per-frame queue submission.
//!
//! Each frame produces one submission per queue class, issued in the fixed
//! order Copy then Graphics. Graphics waits on the copy-done semaphore at the
//! transfer stage, so any upload recorded this frame is complete from the
//! GPU's point of view before graphics work that might read it begins, with
//! no CPU stall. The plan is built as plain data first so the ordering and
//! semaphore wiring are checkable without a device.

use crate::error::Result;
use crate::frame::FrameSlot;
use crate::queue::QueueClass;
use ash::vk;

/// One queue's submission for the current frame.
#[derive(Debug)]
pub struct QueueSubmission {
    /// Class whose queue receives this submission.
    pub class: QueueClass,
    /// Every command buffer recorded on this class this frame, oldest first.
    pub command_buffers: Vec<vk::CommandBuffer>,
    /// Semaphores this submission waits on before executing.
    pub wait_semaphores: Vec<vk::Semaphore>,
    /// Pipeline stage at which each wait applies, parallel to
    /// `wait_semaphores`.
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    /// Semaphores signaled when this submission completes.
    pub signal_semaphores: Vec<vk::Semaphore>,
    /// Fence signaled when this submission completes, or null.
    pub fence: vk::Fence,
}

/// Build the frame's submissions, in submission order.
///
/// Copy signals `copy_done`. Graphics waits on `copy_done` at the transfer
/// stage, signals `release` for presentation, and signals `frame_fence`.
/// The fence rides the graphics submission because it is issued last: once
/// it signals, every submission of the frame has retired, which is what the
/// frame ring's reuse wait and the retirement queues depend on.
pub fn plan_frame(
    copy_commands: &[vk::CommandBuffer],
    graphics_commands: &[vk::CommandBuffer],
    copy_done: vk::Semaphore,
    release: vk::Semaphore,
    frame_fence: vk::Fence,
) -> [QueueSubmission; QueueClass::COUNT] {
    let copy = QueueSubmission {
        class: QueueClass::Copy,
        command_buffers: copy_commands.to_vec(),
        wait_semaphores: Vec::new(),
        wait_stages: Vec::new(),
        signal_semaphores: vec![copy_done],
        fence: vk::Fence::null(),
    };

    let graphics = QueueSubmission {
        class: QueueClass::Graphics,
        command_buffers: graphics_commands.to_vec(),
        wait_semaphores: vec![copy_done],
        wait_stages: vec![vk::PipelineStageFlags::TRANSFER],
        signal_semaphores: vec![release],
        fence: frame_fence,
    };

    [copy, graphics]
}

/// End the slot's recorded command buffers and submit both queue classes.
///
/// Submission order follows [`QueueClass::SUBMIT_ORDER`]; issuing the
/// producer before the consumer is what gives the graphics wait semaphore
/// something to pair with. When Copy aliases the Graphics queue the
/// dependency degenerates to a same-queue signal/wait, which is still valid.
///
/// # Safety
/// All handles must be valid, every recorded buffer must be in the recording
/// state, and the queues must match the classes they are indexed by.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn submit_frame(
    device: &ash::Device,
    queues: &[vk::Queue; QueueClass::COUNT],
    slot: &FrameSlot,
) -> Result<()> {
    for class in QueueClass::SUBMIT_ORDER {
        slot.pool(class).end_recorded(device)?;
    }

    let plan = plan_frame(
        slot.pool(QueueClass::Copy).recorded(),
        slot.pool(QueueClass::Graphics).recorded(),
        slot.copy_done_semaphore,
        slot.release_semaphore,
        slot.fence,
    );

    for submission in &plan {
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&submission.command_buffers)
            .wait_semaphores(&submission.wait_semaphores)
            .wait_dst_stage_mask(&submission.wait_stages)
            .signal_semaphores(&submission.signal_semaphores);

        device.queue_submit(
            queues[submission.class.index()],
            &[submit_info],
            submission.fence,
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const COPY_DONE: u64 = 0x10;
    const RELEASE: u64 = 0x20;
    const FENCE: u64 = 0x30;

    fn plan() -> [QueueSubmission; QueueClass::COUNT] {
        let copy_cmds = [
            vk::CommandBuffer::from_raw(0x100),
            vk::CommandBuffer::from_raw(0x101),
        ];
        let gfx_cmds = [vk::CommandBuffer::from_raw(0x200)];
        plan_frame(
            &copy_cmds,
            &gfx_cmds,
            vk::Semaphore::from_raw(COPY_DONE),
            vk::Semaphore::from_raw(RELEASE),
            vk::Fence::from_raw(FENCE),
        )
    }

    #[test]
    fn copy_is_submitted_before_graphics() {
        let [first, second] = plan();
        assert_eq!(first.class, QueueClass::Copy);
        assert_eq!(second.class, QueueClass::Graphics);
    }

    #[test]
    fn graphics_waits_on_copy_done_at_transfer_stage() {
        let [copy, graphics] = plan();
        assert_eq!(copy.signal_semaphores, graphics.wait_semaphores);
        assert_eq!(graphics.wait_stages, [vk::PipelineStageFlags::TRANSFER]);
    }

    #[test]
    fn copy_has_no_waits_and_no_fence() {
        let [copy, _] = plan();
        assert!(copy.wait_semaphores.is_empty());
        assert!(copy.wait_stages.is_empty());
        assert_eq!(copy.fence, vk::Fence::null());
    }

    #[test]
    fn graphics_signals_release_and_the_frame_fence() {
        let [_, graphics] = plan();
        assert_eq!(graphics.signal_semaphores, [vk::Semaphore::from_raw(RELEASE)]);
        assert_eq!(graphics.fence, vk::Fence::from_raw(FENCE));
    }

    #[test]
    fn every_recorded_buffer_is_submitted_in_order() {
        let [copy, graphics] = plan();
        assert_eq!(
            copy.command_buffers,
            [
                vk::CommandBuffer::from_raw(0x100),
                vk::CommandBuffer::from_raw(0x101),
            ]
        );
        assert_eq!(
            graphics.command_buffers,
            [vk::CommandBuffer::from_raw(0x200)]
        );
    }
}
