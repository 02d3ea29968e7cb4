// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_void, CStr};
use std::fmt::Write as _;
use std::rc::Rc;

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use tracing::{debug, error, info, trace, warn};

use crate::error::{non_null, GpuError, VkResultExt};
use crate::gpu::{
    Acquired, ClearPass, DeviceObject, Gpu, Presented, QueueFamilies, QueueRole, Queues,
    Submission, SurfaceSupport, SwapchainDesc,
};

const APP_NAME: &CStr = c"HotAir";
const ENGINE_NAME: &CStr = c"Baloon";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[derive(Clone, Copy, Debug, Default)]
pub struct ContextOptions {
    /// Enables the Khronos validation layer and routes its messages to tracing.
    pub validation: bool,
}

/// Queue family per capability while resolution is in progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub transfer: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.transfer.is_some() && self.present.is_some() && self.compute.is_some()
    }

    /// Scans the families once. The first family exposing a capability wins
    /// it; present support is probed per family. Stops as soon as all four
    /// are known.
    pub fn resolve<E>(
        families: &[vk::QueueFamilyProperties],
        mut present_support: impl FnMut(u32) -> Result<bool, E>,
    ) -> Result<Self, E> {
        let mut out = QueueFamilyIndices::default();
        for (i, props) in families.iter().enumerate() {
            let i = i as u32;
            let flags = props.queue_flags;
            if out.graphics.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) {
                out.graphics = Some(i);
            }
            if out.present.is_none() && present_support(i)? {
                out.present = Some(i);
            }
            if out.transfer.is_none() && flags.contains(vk::QueueFlags::TRANSFER) {
                out.transfer = Some(i);
            }
            if out.compute.is_none() && flags.contains(vk::QueueFlags::COMPUTE) {
                out.compute = Some(i);
            }
            if out.is_complete() {
                break;
            }
        }
        Ok(out)
    }

    pub fn complete(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            transfer: self.transfer?,
            present: self.present?,
            compute: self.compute?,
        })
    }
}

pub fn is_suitable_device(device_type: vk::PhysicalDeviceType, features: &vk::PhysicalDeviceFeatures) -> bool {
    matches!(
        device_type,
        vk::PhysicalDeviceType::DISCRETE_GPU | vk::PhysicalDeviceType::INTEGRATED_GPU
    ) && features.geometry_shader == vk::TRUE
}

/// First device accepted by `suitable`, no scoring.
pub fn select_physical_device<T>(
    devices: impl IntoIterator<Item = T>,
    mut suitable: impl FnMut(&T) -> bool,
) -> Result<T, GpuError> {
    let mut any = false;
    for device in devices {
        any = true;
        if suitable(&device) {
            return Ok(device);
        }
    }
    Err(if any { GpuError::NoSuitableDevice } else { GpuError::NoDevices })
}

/// Holds the one graphics context of the process.
#[derive(Default)]
pub struct ContextSlot {
    gpu: Option<Rc<dyn Gpu>>,
}

impl ContextSlot {
    pub fn get(&self) -> Option<&Rc<dyn Gpu>> {
        self.gpu.as_ref()
    }

    /// Runs `create` only when the slot is empty; a second call is a logged
    /// no-op returning the existing context.
    pub fn get_or_try_init(
        &mut self,
        create: impl FnOnce() -> Result<Rc<dyn Gpu>, GpuError>,
    ) -> Result<Rc<dyn Gpu>, GpuError> {
        if let Some(gpu) = &self.gpu {
            debug!("skipping graphics context creation: already created");
            return Ok(Rc::clone(gpu));
        }
        let gpu = create()?;
        self.gpu = Some(Rc::clone(&gpu));
        Ok(gpu)
    }
}

fn hex_bytes(b: &[u8]) -> String {
    let mut s = String::with_capacity(b.len() * 2);
    for x in b {
        let _ = write!(&mut s, "{:02x}", x);
    }
    s
}

fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    props
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| String::from("<unnamed>"))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    // SAFETY: the loader hands us either null or valid callback data.
    let Some(data) = (unsafe { data.as_ref() }) else {
        return vk::FALSE;
    };
    if data.p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(data.p_message) }.to_string_lossy();

    use vk::DebugUtilsMessageSeverityFlagsEXT as Sev;
    if severity.contains(Sev::ERROR) {
        error!("[vulkan {types:?}] {msg}");
    } else if severity.contains(Sev::WARNING) {
        warn!("[vulkan {types:?}] {msg}");
    } else if severity.contains(Sev::INFO) {
        debug!("[vulkan {types:?}] {msg}");
    } else {
        trace!("[vulkan {types:?}] {msg}");
    }
    vk::FALSE
}

/// Instance plus the optional debug messenger hanging off it.
struct InstanceOwner {
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    instance: Instance,
    entry: Entry,
}

impl InstanceOwner {
    fn new(display: RawDisplayHandle, options: &ContextOptions) -> Result<Self, GpuError> {
        let entry = Entry::linked();

        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .op("vkEnumerateInstanceExtensionProperties")?;
        for ext in &available {
            if let Ok(name) = ext.extension_name_as_c_str() {
                trace!("instance extension {}", name.to_string_lossy());
            }
        }

        let mut extensions = ash_window::enumerate_required_extensions(display)
            .op("enumerate_required_extensions")?
            .to_vec();
        let mut layers = Vec::new();
        if options.validation {
            extensions.push(debug_utils::NAME.as_ptr());
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let app_info = vk::ApplicationInfo {
            s_type: vk::StructureType::APPLICATION_INFO,
            p_application_name: APP_NAME.as_ptr(),
            application_version: vk::make_api_version(0, 1, 0, 0),
            p_engine_name: ENGINE_NAME.as_ptr(),
            engine_version: vk::make_api_version(0, 1, 0, 0),
            api_version: vk::API_VERSION_1_0,
            ..Default::default()
        };

        let create_info = vk::InstanceCreateInfo {
            s_type: vk::StructureType::INSTANCE_CREATE_INFO,
            p_application_info: &app_info,
            enabled_layer_count: layers.len() as u32,
            pp_enabled_layer_names: layers.as_ptr(),
            enabled_extension_count: extensions.len() as u32,
            pp_enabled_extension_names: extensions.as_ptr(),
            ..Default::default()
        };

        let instance = unsafe { entry.create_instance(&create_info, None) }.op("vkCreateInstance")?;
        info!("Vulkan instance created");

        let mut owner = InstanceOwner { debug: None, instance, entry };
        if options.validation {
            owner.debug = Some(owner.create_messenger()?);
            info!("validation layer enabled");
        }
        Ok(owner)
    }

    fn create_messenger(&self) -> Result<(debug_utils::Instance, vk::DebugUtilsMessengerEXT), GpuError> {
        let loader = debug_utils::Instance::new(&self.entry, &self.instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
            .op("vkCreateDebugUtilsMessengerEXT")?;
        Ok((loader, messenger))
    }

    fn pick_physical_device(&self) -> Result<(vk::PhysicalDevice, String), GpuError> {
        let devices = unsafe { self.instance.enumerate_physical_devices() }.op("vkEnumeratePhysicalDevices")?;
        debug!("{} physical device(s)", devices.len());

        let picked = select_physical_device(devices, |&pd| {
            let props = unsafe { self.instance.get_physical_device_properties(pd) };
            let features = unsafe { self.instance.get_physical_device_features(pd) };
            debug!(
                "device {}: {:?}, api {}.{}.{}, driver 0x{:08x}, vendor 0x{:04x}, id 0x{:04x}, cache {}, geometryShader {}",
                device_name(&props),
                props.device_type,
                vk::api_version_major(props.api_version),
                vk::api_version_minor(props.api_version),
                vk::api_version_patch(props.api_version),
                props.driver_version,
                props.vendor_id,
                props.device_id,
                hex_bytes(&props.pipeline_cache_uuid),
                features.geometry_shader,
            );
            is_suitable_device(props.device_type, &features)
        })?;

        let props = unsafe { self.instance.get_physical_device_properties(picked) };
        Ok((picked, device_name(&props)))
    }
}

impl Drop for InstanceOwner {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

struct SurfaceOwner {
    loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl SurfaceOwner {
    /// # Safety
    /// Both handles must stay valid until the surface is dropped.
    unsafe fn new(owner: &InstanceOwner, display: RawDisplayHandle, window: RawWindowHandle) -> Result<Self, GpuError> {
        let surface = unsafe { ash_window::create_surface(&owner.entry, &owner.instance, display, window, None) }
            .op("create_surface")?;
        let loader = surface::Instance::new(&owner.entry, &owner.instance);
        let out = SurfaceOwner { loader, surface };
        non_null(out.surface, "create_surface")?;
        Ok(out)
    }
}

impl Drop for SurfaceOwner {
    fn drop(&mut self) {
        if self.surface != vk::SurfaceKHR::null() {
            unsafe { self.loader.destroy_surface(self.surface, None) };
        }
    }
}

/// Instance, surface, physical and logical device, and the four role queues.
/// Lives for the whole process; swapchains come and go underneath it.
pub struct GraphicsContext {
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    queues: Queues,
    families: QueueFamilies,
    physical_device: vk::PhysicalDevice,
    device_name: String,
    surface: SurfaceOwner,
    _instance: InstanceOwner,
}

impl GraphicsContext {
    /// # Safety
    /// `display` and `window` must stay valid until the context is dropped.
    pub unsafe fn new(
        display: RawDisplayHandle,
        window: RawWindowHandle,
        options: &ContextOptions,
    ) -> Result<Self, GpuError> {
        let instance = InstanceOwner::new(display, options)?;
        let (physical_device, device_name) = instance.pick_physical_device()?;
        info!("using GPU: {device_name}");

        let surface = unsafe { SurfaceOwner::new(&instance, display, window)? };

        let props = unsafe {
            instance
                .instance
                .get_physical_device_queue_family_properties(physical_device)
        };
        for (i, p) in props.iter().enumerate() {
            debug!(
                "queue family {i}: {} queue(s), {:?}, timestamp bits {}, granularity {}x{}x{}",
                p.queue_count,
                p.queue_flags,
                p.timestamp_valid_bits,
                p.min_image_transfer_granularity.width,
                p.min_image_transfer_granularity.height,
                p.min_image_transfer_granularity.depth,
            );
        }

        let indices = QueueFamilyIndices::resolve(&props, |i| {
            unsafe {
                surface
                    .loader
                    .get_physical_device_surface_support(physical_device, i, surface.surface)
            }
            .op("vkGetPhysicalDeviceSurfaceSupportKHR")
        })?;
        let families = indices
            .complete()
            .ok_or_else(|| GpuError::IncompleteQueueFamilies { device: device_name.clone() })?;
        debug!(
            "queue families: graphics {}, transfer {}, present {}, compute {}",
            families.graphics, families.transfer, families.present, families.compute
        );

        let priorities = [1.0_f32];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .distinct()
            .into_iter()
            .map(|family| vk::DeviceQueueCreateInfo {
                s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                queue_family_index: family,
                queue_count: 1,
                p_queue_priorities: priorities.as_ptr(),
                ..Default::default()
            })
            .collect();

        let device_exts = [swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let dinfo = vk::DeviceCreateInfo {
            s_type: vk::StructureType::DEVICE_CREATE_INFO,
            queue_create_info_count: queue_infos.len() as u32,
            p_queue_create_infos: queue_infos.as_ptr(),
            enabled_extension_count: device_exts.len() as u32,
            pp_enabled_extension_names: device_exts.as_ptr(),
            p_enabled_features: &features,
            ..Default::default()
        };

        let device = unsafe { instance.instance.create_device(physical_device, &dinfo, None) }
            .op("vkCreateDevice")?;

        let queues = match fetch_queues(&device, families) {
            Ok(queues) => queues,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };
        info!("logical device created with {} distinct queue families", queue_infos.len());

        let swapchain_loader = swapchain::Device::new(&instance.instance, &device);

        Ok(GraphicsContext {
            device,
            swapchain_loader,
            queues,
            families,
            physical_device,
            device_name,
            surface,
            _instance: instance,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

fn fetch_queues(device: &ash::Device, families: QueueFamilies) -> Result<Queues, GpuError> {
    let fetch = |role: QueueRole| {
        let queue = unsafe { device.get_device_queue(families.get(role), 0) };
        non_null(queue, "vkGetDeviceQueue")
    };
    Ok(Queues {
        graphics: fetch(QueueRole::Graphics)?,
        transfer: fetch(QueueRole::Transfer)?,
        present: fetch(QueueRole::Present)?,
        compute: fetch(QueueRole::Compute)?,
    })
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("device wait idle before teardown failed: {e}");
            }
            self.device.destroy_device(None);
        }
        debug!("logical device destroyed");
    }
}

impl Gpu for GraphicsContext {
    fn device(&self) -> vk::Device {
        self.device.handle()
    }

    fn queues(&self) -> Queues {
        self.queues
    }

    fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    fn surface_support(&self) -> Result<SurfaceSupport, GpuError> {
        let (loader, pd, sf) = (&self.surface.loader, self.physical_device, self.surface.surface);
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(pd, sf)
                    .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: loader
                    .get_physical_device_surface_formats(pd, sf)
                    .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(pd, sf)
                    .op("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR, GpuError> {
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface.surface,
            min_image_count: desc.min_image_count,
            image_format: desc.format.format,
            image_color_space: desc.format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: desc.sharing_mode,
            queue_family_index_count: desc.queue_family_indices.len() as u32,
            p_queue_family_indices: desc.queue_family_indices.as_ptr(),
            pre_transform: desc.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&info, None) }
            .op("vkCreateSwapchainKHR")?;
        non_null(swapchain, "vkCreateSwapchainKHR")
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>, GpuError> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }.op("vkGetSwapchainImagesKHR")
    }

    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView, GpuError> {
        let info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            },
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = unsafe { self.device.create_image_view(&info, None) }.op("vkCreateImageView")?;
        non_null(view, "vkCreateImageView")
    }

    fn create_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass, GpuError> {
        let color = vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
            ..Default::default()
        };
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            ..Default::default()
        };
        let dependency = vk::SubpassDependency {
            src_subpass: vk::SUBPASS_EXTERNAL,
            dst_subpass: 0,
            src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            src_access_mask: vk::AccessFlags::empty(),
            dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ..Default::default()
        };
        let info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        let rp = unsafe { self.device.create_render_pass(&info, None) }.op("vkCreateRenderPass")?;
        non_null(rp, "vkCreateRenderPass")
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError> {
        let info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: &view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        let fb = unsafe { self.device.create_framebuffer(&info, None) }.op("vkCreateFramebuffer")?;
        non_null(fb, "vkCreateFramebuffer")
    }

    fn create_command_pool(&self, family: u32) -> Result<vk::CommandPool, GpuError> {
        let info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: family,
            ..Default::default()
        };
        let pool = unsafe { self.device.create_command_pool(&info, None) }.op("vkCreateCommandPool")?;
        non_null(pool, "vkCreateCommandPool")
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, GpuError> {
        let info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&info) }.op("vkAllocateCommandBuffers")
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError> {
        let info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        let sem = unsafe { self.device.create_semaphore(&info, None) }.op("vkCreateSemaphore")?;
        non_null(sem, "vkCreateSemaphore")
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, GpuError> {
        let info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() },
            ..Default::default()
        };
        let fence = unsafe { self.device.create_fence(&info, None) }.op("vkCreateFence")?;
        non_null(fence, "vkCreateFence")
    }

    unsafe fn destroy(&self, object: DeviceObject) {
        let d = &self.device;
        unsafe {
            match object {
                DeviceObject::Swapchain(h) => self.swapchain_loader.destroy_swapchain(h, None),
                DeviceObject::ImageView(h) => d.destroy_image_view(h, None),
                DeviceObject::RenderPass(h) => d.destroy_render_pass(h, None),
                DeviceObject::Framebuffer(h) => d.destroy_framebuffer(h, None),
                DeviceObject::CommandPool(h) => d.destroy_command_pool(h, None),
                DeviceObject::Semaphore(h) => d.destroy_semaphore(h, None),
                DeviceObject::Fence(h) => d.destroy_fence(h, None),
            }
        }
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(pool, buffers) }
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        unsafe { self.device.device_wait_idle() }.op("vkDeviceWaitIdle")
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> Result<(), GpuError> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) }.op("vkWaitForFences")
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        unsafe { self.device.reset_fences(&[fence]) }.op("vkResetFences")
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<Acquired, GpuError> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        };
        match result {
            Ok((index, false)) => Ok(Acquired::Ready(index)),
            Ok((index, true)) => Ok(Acquired::Suboptimal(index)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(result) => Err(GpuError::Vulkan { op: "vkAcquireNextImageKHR", result }),
        }
    }

    fn record_clear_pass(&self, command_buffer: vk::CommandBuffer, pass: &ClearPass) -> Result<(), GpuError> {
        let d = &self.device;
        unsafe {
            d.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .op("vkResetCommandBuffer")?;

            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            d.begin_command_buffer(command_buffer, &begin).op("vkBeginCommandBuffer")?;

            let clears = [vk::ClearValue {
                color: vk::ClearColorValue { float32: pass.clear_color },
            }];
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: pass.render_pass,
                framebuffer: pass.framebuffer,
                render_area: vk::Rect2D { offset: vk::Offset2D { x: 0, y: 0 }, extent: pass.extent },
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            d.cmd_begin_render_pass(command_buffer, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_end_render_pass(command_buffer);

            d.end_command_buffer(command_buffer).op("vkEndCommandBuffer")
        }
    }

    fn submit(&self, role: QueueRole, submission: &Submission) -> Result<(), GpuError> {
        let wait = [submission.wait_semaphore];
        let stages = [submission.wait_stage];
        let cmds = [submission.command_buffer];
        let signal = [submission.signal_semaphore];
        let info = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: wait.len() as u32,
            p_wait_semaphores: wait.as_ptr(),
            p_wait_dst_stage_mask: stages.as_ptr(),
            command_buffer_count: cmds.len() as u32,
            p_command_buffers: cmds.as_ptr(),
            signal_semaphore_count: signal.len() as u32,
            p_signal_semaphores: signal.as_ptr(),
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queues.get(role), std::slice::from_ref(&info), submission.fence)
        }
        .op("vkQueueSubmit")
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<Presented, GpuError> {
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.queues.present, &info) } {
            Ok(false) => Ok(Presented::Done),
            Ok(true) => Ok(Presented::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Presented::OutOfDate),
            Err(result) => Err(GpuError::Vulkan { op: "vkQueuePresentKHR", result }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::convert::Infallible;

    use super::*;
    use crate::mock::{self, MockGpu};

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties { queue_flags: flags, queue_count: 1, ..Default::default() }
    }

    #[test]
    fn first_matching_family_wins() {
        use vk::QueueFlags as F;
        let props = [
            family(F::TRANSFER),
            family(F::GRAPHICS | F::COMPUTE | F::TRANSFER),
            family(F::COMPUTE),
        ];
        let present = [false, true, true];

        let resolve = || QueueFamilyIndices::resolve::<Infallible>(&props, |i| Ok(present[i as usize]));
        let a = resolve().unwrap();
        assert_eq!(
            a,
            QueueFamilyIndices { graphics: Some(1), transfer: Some(0), present: Some(1), compute: Some(1) }
        );
        assert_eq!(resolve().unwrap(), a);
        assert!(a.is_complete());
    }

    #[test]
    fn stops_probing_once_complete() {
        use vk::QueueFlags as F;
        let props = [family(F::GRAPHICS | F::COMPUTE | F::TRANSFER), family(F::GRAPHICS)];
        let probes = Cell::new(0);
        let idx = QueueFamilyIndices::resolve::<Infallible>(&props, |_| {
            probes.set(probes.get() + 1);
            Ok(true)
        })
        .unwrap();
        assert!(idx.is_complete());
        assert_eq!(probes.get(), 1);
    }

    #[test]
    fn missing_capability_is_incomplete() {
        use vk::QueueFlags as F;
        let props = [family(F::GRAPHICS | F::TRANSFER), family(F::TRANSFER)];
        let idx = QueueFamilyIndices::resolve::<Infallible>(&props, |_| Ok(true)).unwrap();
        assert!(!idx.is_complete());
        assert_eq!(idx.compute, None);
        assert!(idx.complete().is_none());

        let idx = QueueFamilyIndices::resolve::<Infallible>(&[family(F::GRAPHICS | F::COMPUTE | F::TRANSFER)], |_| Ok(false))
            .unwrap();
        assert_eq!(idx.present, None);
        assert!(!idx.is_complete());
    }

    #[test]
    fn present_probe_errors_propagate() {
        let props = [family(vk::QueueFlags::GRAPHICS)];
        let res = QueueFamilyIndices::resolve(&props, |_| Err("lost"));
        assert_eq!(res, Err("lost"));
    }

    #[test]
    fn picks_first_suitable_device() {
        let yes = vk::PhysicalDeviceFeatures { geometry_shader: vk::TRUE, ..Default::default() };
        let no = vk::PhysicalDeviceFeatures::default();
        let devices = [
            ("cpu", vk::PhysicalDeviceType::CPU, yes),
            ("igpu-no-gs", vk::PhysicalDeviceType::INTEGRATED_GPU, no),
            ("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU, yes),
            ("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU, yes),
        ];
        let picked = select_physical_device(devices, |(_, ty, f)| is_suitable_device(*ty, f)).unwrap();
        assert_eq!(picked.0, "igpu");
    }

    #[test]
    fn device_selection_failures() {
        let none: [u32; 0] = [];
        assert!(matches!(select_physical_device(none, |_| true), Err(GpuError::NoDevices)));
        assert!(matches!(select_physical_device([1, 2], |_| false), Err(GpuError::NoSuitableDevice)));
    }

    #[test]
    fn context_slot_creates_once() {
        let journal = mock::journal();
        let mut slot = ContextSlot::default();
        let calls = Cell::new(0);
        let make = || {
            calls.set(calls.get() + 1);
            Ok(mock::as_gpu(&MockGpu::new(&journal)))
        };

        let a = slot.get_or_try_init(make).unwrap();
        let b = slot.get_or_try_init(make).unwrap();
        assert_eq!(calls.get(), 1);
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn failed_creation_leaves_slot_empty() {
        let mut slot = ContextSlot::default();
        assert!(slot.get_or_try_init(|| Err(GpuError::NoDevices)).is_err());
        assert!(slot.get().is_none());
    }

    #[test]
    fn hex_is_lowercase_and_padded() {
        assert_eq!(hex_bytes(&[0x0a, 0xff, 0x00]), "0aff00");
    }
}
