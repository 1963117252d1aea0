//! Fence and semaphore helpers.
//!
//! Frame slot fences are created unsignaled: the ring only waits on a slot
//! once the frame counter has completed a full cycle, and by then the slot's
//! graphics submission has been given the fence to signal.

use crate::error::Result;
use ash::vk;

/// Create a binary semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create an unsignaled fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device) -> Result<vk::Fence> {
    let create_info = vk::FenceCreateInfo::default();
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Block until a fence signals.
///
/// The timeout is unbounded: a fence that never signals means the device has
/// stopped responding, which this layer treats as device loss, not as a
/// recoverable timeout.
///
/// # Safety
/// The device and fence must be valid.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn wait_for_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.wait_for_fences(&[fence], true, u64::MAX)?;
    Ok(())
}

/// Return a fence to the unsignaled state.
///
/// # Safety
/// The device and fence must be valid, and no submitted work may still be
/// pending on the fence.
#[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
pub unsafe fn reset_fence(device: &ash::Device, fence: vk::Fence) -> Result<()> {
    device.reset_fences(&[fence])?;
    Ok(())
}
