//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No queue family with graphics support.
    #[error("No queue family with graphics support")]
    NoGraphicsQueue,

    /// A frame asked for more command buffers than a pool pre-allocates.
    #[error("Command pool for {class:?} exhausted ({capacity} buffers per frame)")]
    CommandPoolExhausted {
        /// Queue class whose pool ran out.
        class: crate::queue::QueueClass,
        /// Fixed per-frame buffer capacity.
        capacity: usize,
    },

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

/// Abort the process on an unrecoverable device error.
///
/// A half-submitted frame cannot be rolled back, so any unexpected device
/// result on the frame path terminates the process after logging the
/// triggering call site. Retry policy, if any, lives above this layer.
#[track_caller]
pub(crate) fn fatal(err: &GpuError) -> ! {
    let site = std::panic::Location::caller();
    tracing::error!("fatal device error at {}:{}: {err}", site.file(), site.line());
    std::process::abort();
}
