// SPDX-License-Identifier: CEPL-1.0
//! The device-level operations the swapchain, command and sync layers are
//! built on. [`crate::GraphicsContext`] implements them with Vulkan; tests
//! substitute a recording fake.

use ash::vk;

use crate::error::GpuError;

/// The four queue capabilities the context resolves at device creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Transfer,
    Present,
    Compute,
}

impl QueueRole {
    /// Creation order; teardown walks it backwards.
    pub const ALL: [QueueRole; 4] = [
        QueueRole::Graphics,
        QueueRole::Transfer,
        QueueRole::Present,
        QueueRole::Compute,
    ];

    pub fn name(self) -> &'static str {
        match self {
            QueueRole::Graphics => "graphics",
            QueueRole::Transfer => "transfer",
            QueueRole::Present => "present",
            QueueRole::Compute => "compute",
        }
    }
}

/// Resolved queue family index per role. Roles may share a family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub transfer: u32,
    pub present: u32,
    pub compute: u32,
}

impl QueueFamilies {
    pub fn get(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Transfer => self.transfer,
            QueueRole::Present => self.present,
            QueueRole::Compute => self.compute,
        }
    }

    /// Distinct family indices in role order, one device queue each.
    pub fn distinct(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(4);
        for role in QueueRole::ALL {
            let family = self.get(role);
            if !out.contains(&family) {
                out.push(family);
            }
        }
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Queues {
    pub graphics: vk::Queue,
    pub transfer: vk::Queue,
    pub present: vk::Queue,
    pub compute: vk::Queue,
}

impl Queues {
    pub fn get(&self, role: QueueRole) -> vk::Queue {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Transfer => self.transfer,
            QueueRole::Present => self.present,
            QueueRole::Compute => self.compute,
        }
    }
}

/// Surface properties queried fresh for every swapchain build.
#[derive(Clone, Debug)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

#[derive(Clone, Debug)]
pub struct SwapchainDesc {
    pub min_image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    pub sharing_mode: vk::SharingMode,
    /// Empty unless `sharing_mode` is concurrent.
    pub queue_family_indices: Vec<u32>,
}

#[derive(Clone, Copy, Debug)]
pub struct ClearPass {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

#[derive(Clone, Copy, Debug)]
pub struct Submission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquired {
    Ready(u32),
    /// Usable, but the swapchain no longer matches the surface exactly.
    Suboptimal(u32),
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Presented {
    Done,
    Suboptimal,
    OutOfDate,
}

/// A device-owned object destroyed with a single call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceObject {
    Swapchain(vk::SwapchainKHR),
    ImageView(vk::ImageView),
    RenderPass(vk::RenderPass),
    Framebuffer(vk::Framebuffer),
    CommandPool(vk::CommandPool),
    Semaphore(vk::Semaphore),
    Fence(vk::Fence),
}

impl DeviceObject {
    pub fn kind(&self) -> &'static str {
        match self {
            DeviceObject::Swapchain(_) => "swapchain",
            DeviceObject::ImageView(_) => "image view",
            DeviceObject::RenderPass(_) => "render pass",
            DeviceObject::Framebuffer(_) => "framebuffer",
            DeviceObject::CommandPool(_) => "command pool",
            DeviceObject::Semaphore(_) => "semaphore",
            DeviceObject::Fence(_) => "fence",
        }
    }

    pub fn as_raw(&self) -> u64 {
        use ash::vk::Handle;
        match *self {
            DeviceObject::Swapchain(h) => h.as_raw(),
            DeviceObject::ImageView(h) => h.as_raw(),
            DeviceObject::RenderPass(h) => h.as_raw(),
            DeviceObject::Framebuffer(h) => h.as_raw(),
            DeviceObject::CommandPool(h) => h.as_raw(),
            DeviceObject::Semaphore(h) => h.as_raw(),
            DeviceObject::Fence(h) => h.as_raw(),
        }
    }
}

/// Logical device plus the queues and surface it presents to.
///
/// Every method is single-threaded and every handle passed in must have been
/// created through the same implementor. Creation methods never return a null
/// handle; they fail with [`GpuError::NullHandle`] instead.
pub trait Gpu {
    fn device(&self) -> vk::Device;
    fn queues(&self) -> Queues;
    fn queue_families(&self) -> QueueFamilies;

    fn surface_support(&self) -> Result<SurfaceSupport, GpuError>;

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR, GpuError>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>, GpuError>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView, GpuError>;
    fn create_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass, GpuError>;
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError>;

    fn create_command_pool(&self, family: u32) -> Result<vk::CommandPool, GpuError>;
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, GpuError>;
    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError>;
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, GpuError>;

    /// # Safety
    /// `object` must not be referenced by pending GPU work or by a live child
    /// object, and must not be used again.
    unsafe fn destroy(&self, object: DeviceObject);

    /// # Safety
    /// `buffers` must come from `pool`, must not be pending, and must not be
    /// used again.
    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);

    fn wait_idle(&self) -> Result<(), GpuError>;
    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<(), GpuError>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError>;

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<Acquired, GpuError>;

    /// Resets `command_buffer` and records one render pass that only clears.
    fn record_clear_pass(&self, command_buffer: vk::CommandBuffer, pass: &ClearPass) -> Result<(), GpuError>;

    fn submit(&self, role: QueueRole, submission: &Submission) -> Result<(), GpuError>;

    /// Presents on the present queue.
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<Presented, GpuError>;
}
