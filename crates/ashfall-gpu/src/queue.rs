//! Queue classes and queue family selection.
//!
//! The rest of the crate is indexed by logical queue *class*, never by raw
//! family index. Mapping classes onto the families a device actually exposes
//! happens once, here, so hardware without a dedicated transfer queue is
//! indistinguishable from hardware with one everywhere else.

use crate::error::{GpuError, Result};
use ash::vk;

/// Logical role of a hardware queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueClass {
    /// Transfer work: staging uploads, buffer/image copies.
    Copy,
    /// Graphics (and everything a graphics family implies).
    Graphics,
}

impl QueueClass {
    /// Number of queue classes.
    pub const COUNT: usize = 2;

    /// All classes, in per-frame submission order.
    ///
    /// Copy is submitted strictly before Graphics each frame; Graphics waits
    /// on the copy-done semaphore, and that wait is only meaningful if the
    /// producer submission is already queued.
    pub const SUBMIT_ORDER: [Self; Self::COUNT] = [Self::Copy, Self::Graphics];

    /// Stable index for class-keyed arrays.
    pub const fn index(self) -> usize {
        match self {
            Self::Copy => 0,
            Self::Graphics => 1,
        }
    }
}

/// Queue family index per class, as selected by [`select_queue_families`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    /// Family backing the Copy class.
    pub copy: u32,
    /// Family backing the Graphics class.
    pub graphics: u32,
}

impl QueueFamilies {
    /// Family index for a class.
    pub const fn for_class(&self, class: QueueClass) -> u32 {
        match class {
            QueueClass::Copy => self.copy,
            QueueClass::Graphics => self.graphics,
        }
    }

    /// Whether Copy shares the Graphics family (no dedicated transfer queue).
    pub const fn copy_aliases_graphics(&self) -> bool {
        self.copy == self.graphics
    }
}

/// Map queue classes onto a device's queue families.
///
/// Copy prefers a dedicated transfer-only family (transfer set, graphics and
/// compute clear) so uploads run beside graphics work instead of behind it.
/// When no such family exists, Copy aliases the Graphics family and the
/// cross-queue semaphore dependency degenerates to a same-queue one, which
/// remains correct.
///
/// Called by the device-setup collaborator before handing queues to
/// [`crate::context::RenderContext`].
pub fn select_queue_families(families: &[vk::QueueFamilyProperties]) -> Result<QueueFamilies> {
    let mut graphics = None;
    let mut copy = None;

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        let flags = family.queue_flags;

        if copy.is_none()
            && flags.contains(vk::QueueFlags::TRANSFER)
            && !flags.contains(vk::QueueFlags::GRAPHICS)
            && !flags.contains(vk::QueueFlags::COMPUTE)
        {
            copy = Some(i);
        }

        if graphics.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(i);
        }

        if graphics.is_some() && copy.is_some() {
            break;
        }
    }

    let graphics = graphics.ok_or(GpuError::NoGraphicsQueue)?;
    let copy = copy.unwrap_or(graphics);

    Ok(QueueFamilies { copy, graphics })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn dedicated_transfer_family_backs_copy() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];

        let selected = select_queue_families(&families).unwrap();
        assert_eq!(selected.graphics, 0);
        assert_eq!(selected.copy, 1);
        assert!(!selected.copy_aliases_graphics());
    }

    #[test]
    fn copy_aliases_graphics_without_transfer_only_family() {
        // Transfer capability folded into the graphics and compute families,
        // as on most desktop GPUs with no DMA queue exposed.
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];

        let selected = select_queue_families(&families).unwrap();
        assert_eq!(selected.copy, selected.graphics);
        assert!(selected.copy_aliases_graphics());
    }

    #[test]
    fn missing_graphics_family_is_an_error() {
        let families = [family(vk::QueueFlags::TRANSFER)];
        assert!(matches!(
            select_queue_families(&families),
            Err(GpuError::NoGraphicsQueue)
        ));
    }

    #[test]
    fn submit_order_is_copy_then_graphics() {
        assert_eq!(
            QueueClass::SUBMIT_ORDER,
            [QueueClass::Copy, QueueClass::Graphics]
        );
    }
}
