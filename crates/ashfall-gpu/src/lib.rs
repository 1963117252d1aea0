//! Frame-lifetime core of the Ashfall renderer.
//!
//! This crate provides:
//! - A fixed ring of in-flight frame slots with fence-paced reuse
//! - Pre-allocated per-frame command buffer pools, one per queue class
//! - Copy-then-Graphics queue submission with cross-queue semaphores
//! - Deferred, per-kind destruction of GPU resources
//!
//! Device and instance creation are out of scope; a setup collaborator hands
//! the opened device, queues and allocator to
//! [`RenderContext::startup`](context::RenderContext::startup).

pub mod command;
pub mod context;
pub mod deferred;
pub mod error;
pub mod frame;
pub mod queue;
pub mod submit;
pub mod sync;

pub use command::{CommandPool, MAX_COMMAND_BUFFERS};
pub use context::{DeviceCapabilities, DeviceHandles, RenderContext};
pub use deferred::{Retired, RetirementQueues};
pub use error::{GpuError, Result};
pub use frame::{FrameRing, FrameSlot, FRAMES_IN_FLIGHT};
pub use queue::{select_queue_families, QueueClass, QueueFamilies};
pub use submit::QueueSubmission;
