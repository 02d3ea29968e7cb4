// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! Vulkan context, swapchain, per-frame resources and the frame loop that
//! drives them from a [`hotair_render::WindowAdapter`].

pub mod commands;
pub mod context;
pub mod error;
pub mod frame_loop;
pub mod gpu;
pub mod owned;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod mock;

pub use context::{ContextOptions, GraphicsContext};
pub use error::GpuError;
pub use frame_loop::{
    FrameLoop, FrameLoopOptions, FrameResources, FrameTick, LoopError, LoopState, OutOfDatePolicy,
    CLEAR_COLOR,
};
pub use gpu::Gpu;
