// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("failed to find GPUs with Vulkan support")]
    NoDevices,

    #[error("failed to find a suitable GPU (need a discrete or integrated GPU with geometry shaders)")]
    NoSuitableDevice,

    #[error("no queue families for graphics, transfer, present and compute on {device}")]
    IncompleteQueueFamilies { device: String },

    #[error("failed to find suitable surface format (B8G8R8A8_SRGB, SRGB_NONLINEAR)")]
    NoSurfaceFormat,

    #[error("failed to find suitable present mode (FIFO)")]
    NoPresentMode,

    #[error("swapchain has no images")]
    NoSwapchainImages,

    #[error("acquired image {index} but the swapchain has {len}")]
    ImageIndexOutOfRange { index: u32, len: usize },

    #[error("{op} returned a null handle")]
    NullHandle { op: &'static str },

    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },

    #[error("{op}: swapchain is out of date")]
    OutOfDate { op: &'static str },

    #[error("{op}: swapchain is suboptimal")]
    Suboptimal { op: &'static str },

    #[error("window handle unavailable: {0}")]
    Handle(#[from] raw_window_handle::HandleError),

    #[error("no graphics context has been created")]
    NoContext,
}

/// Attaches the failing entry point to a raw Vulkan result.
pub(crate) trait VkResultExt<T> {
    fn op(self, op: &'static str) -> Result<T, GpuError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn op(self, op: &'static str) -> Result<T, GpuError> {
        self.map_err(|result| GpuError::Vulkan { op, result })
    }
}

pub(crate) fn non_null<H: vk::Handle + Copy>(handle: H, op: &'static str) -> Result<H, GpuError> {
    if handle.as_raw() == 0 {
        Err(GpuError::NullHandle { op })
    } else {
        Ok(handle)
    }
}
