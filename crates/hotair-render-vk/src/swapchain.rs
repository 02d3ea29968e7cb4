// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;

use ash::vk;
use hotair_render::Geometry;
use tracing::{debug, info};

use crate::error::GpuError;
use crate::gpu::{Gpu, QueueFamilies, SwapchainDesc};
use crate::owned::Owned;

pub const SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

pub const PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;

/// Upper bound used when the surface reports no maximum image count.
pub const UNBOUNDED_IMAGE_CAP: u32 = 3;

/// The surface's current extent when it dictates one, otherwise the window
/// geometry clamped into the supported range.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: Geometry) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width.max(caps.min_image_extent.width)),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height.max(caps.min_image_extent.height)),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded).
pub fn choose_image_count(min: u32, max: u32) -> u32 {
    let cap = if max == 0 { UNBOUNDED_IMAGE_CAP } else { max };
    (min + 1).clamp(min, cap.max(min))
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR, GpuError> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == SURFACE_FORMAT.format && f.color_space == SURFACE_FORMAT.color_space)
        .ok_or(GpuError::NoSurfaceFormat)
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> Result<vk::PresentModeKHR, GpuError> {
    modes
        .iter()
        .copied()
        .find(|&m| m == PRESENT_MODE)
        .ok_or(GpuError::NoPresentMode)
}

/// Images are shared between graphics and present when those differ.
pub fn sharing_mode(families: QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics != families.present {
        (vk::SharingMode::CONCURRENT, vec![families.graphics, families.present])
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

/// The swapchain and everything derived from its images.
///
/// Fields drop top to bottom: framebuffers, render pass, image views, then
/// the swapchain that owns the images.
pub struct SwapchainResources {
    framebuffers: Vec<Owned<vk::Framebuffer>>,
    render_pass: Owned<vk::RenderPass>,
    image_views: Vec<Owned<vk::ImageView>>,
    swapchain: Owned<vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
}

impl SwapchainResources {
    pub fn new(gpu: &Rc<dyn Gpu>, window: Geometry) -> Result<Self, GpuError> {
        let support = gpu.surface_support()?;
        let caps = &support.capabilities;
        debug!(
            "surface: images {}..{}, current {}x{}, extent {}x{}..{}x{}",
            caps.min_image_count,
            caps.max_image_count,
            caps.current_extent.width,
            caps.current_extent.height,
            caps.min_image_extent.width,
            caps.min_image_extent.height,
            caps.max_image_extent.width,
            caps.max_image_extent.height,
        );
        for f in &support.formats {
            debug!("surface format {:?} / {:?}", f.format, f.color_space);
        }
        for m in &support.present_modes {
            debug!("present mode {m:?}");
        }

        let extent = choose_extent(caps, window);
        let format = choose_surface_format(&support.formats)?;
        let present_mode = choose_present_mode(&support.present_modes)?;
        let (sharing_mode, queue_family_indices) = sharing_mode(gpu.queue_families());

        let desc = SwapchainDesc {
            min_image_count: choose_image_count(caps.min_image_count, caps.max_image_count),
            format,
            extent,
            present_mode,
            pre_transform: caps.current_transform,
            sharing_mode,
            queue_family_indices,
        };
        let swapchain = Owned::new(gpu, gpu.create_swapchain(&desc)?);

        let images = gpu.swapchain_images(swapchain.raw())?;
        if images.is_empty() {
            return Err(GpuError::NoSwapchainImages);
        }

        let image_views = images
            .iter()
            .map(|&image| Ok(Owned::new(gpu, gpu.create_image_view(image, format.format)?)))
            .collect::<Result<Vec<_>, GpuError>>()?;

        let render_pass = Owned::new(gpu, gpu.create_render_pass(format.format)?);

        let framebuffers = image_views
            .iter()
            .map(|view| {
                let fb = gpu.create_framebuffer(render_pass.raw(), view.raw(), extent)?;
                Ok(Owned::new(gpu, fb))
            })
            .collect::<Result<Vec<_>, GpuError>>()?;

        info!(
            "swapchain ready ({}x{}, {} images, fmt 0x{:x})",
            extent.width,
            extent.height,
            images.len(),
            format.format.as_raw()
        );

        Ok(SwapchainResources {
            framebuffers,
            render_pass,
            image_views,
            swapchain,
            images,
            format,
            extent,
        })
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain.raw()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.raw()
    }

    pub fn framebuffer(&self, index: usize) -> Option<vk::Framebuffer> {
        self.framebuffers.get(index).map(Owned::raw)
    }

    pub fn framebuffers(&self) -> impl Iterator<Item = vk::Framebuffer> + '_ {
        self.framebuffers.iter().map(Owned::raw)
    }

    pub fn image_views(&self) -> impl Iterator<Item = vk::ImageView> + '_ {
        self.image_views.iter().map(Owned::raw)
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
