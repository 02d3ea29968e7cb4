// SPDX-License-Identifier: CEPL-1.0
//! Recording stand-ins for the device, the window and the config store.
//!
//! `MockGpu` tracks every object it hands out and panics on the misuse a
//! validation layer would report: destroying a parent before its children,
//! touching a destroyed handle, waiting on a fence nothing will signal,
//! resetting a fence that was never waited on, or re-recording a command
//! buffer while its fence is still pending.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use ash::vk::{self, Handle};
use hotair_core::{ConfigError, ConfigStore, Key, TomlConfig, Value};
use hotair_render::{DispatchError, Geometry, PlatformEvent, WindowAdapter};
use raw_window_handle::{HandleError, RawDisplayHandle, RawWindowHandle};

use crate::error::GpuError;
use crate::gpu::{
    Acquired, ClearPass, DeviceObject, Gpu, Presented, QueueFamilies, QueueRole, Queues,
    Submission, SurfaceSupport, SwapchainDesc,
};

#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    Create(&'static str, u64),
    Destroy(&'static str, u64),
    Allocate { pool: u64, buffers: Vec<u64> },
    Free { pool: u64, buffers: Vec<u64> },
    WaitIdle,
    WaitFence(u64),
    ResetFence(u64),
    Acquire { swapchain: u64 },
    Record { command_buffer: u64, framebuffer: u64 },
    Submit { role: QueueRole, command_buffer: u64, fence: u64 },
    Present { swapchain: u64, image_index: u32 },
    ConfigSet(Key, Value),
    Dispatch,
    RequestFrame,
    PrePresent,
}

/// One ordered log shared by every fake in a test.
pub type Journal = Rc<RefCell<Vec<Call>>>;

pub fn journal() -> Journal {
    Rc::new(RefCell::new(Vec::new()))
}

pub fn position(journal: &Journal, pred: impl Fn(&Call) -> bool) -> Option<usize> {
    journal.borrow().iter().position(pred)
}

struct Object {
    kind: &'static str,
    parents: Vec<u64>,
}

#[derive(Clone, Copy)]
struct FenceState {
    signaled: bool,
    waited: bool,
}

pub struct MockGpu {
    journal: Journal,
    next_handle: Cell<u64>,
    live: RefCell<HashMap<u64, Object>>,
    fences: RefCell<HashMap<u64, FenceState>>,
    images: RefCell<HashMap<u64, Vec<u64>>>,
    next_image: Cell<u32>,
    support: RefCell<SurfaceSupport>,
    families: QueueFamilies,
    queues: Queues,
    acquire_script: RefCell<VecDeque<Acquired>>,
    present_script: RefCell<VecDeque<Presented>>,
    fail_at: RefCell<Option<(&'static str, usize)>>,
    descs: RefCell<Vec<SwapchainDesc>>,
}

pub fn default_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            max_image_array_layers: 1,
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ],
        present_modes: vec![vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO],
    }
}

impl MockGpu {
    pub fn new(journal: &Journal) -> Rc<Self> {
        Self::with_families(journal, QueueFamilies { graphics: 0, transfer: 1, present: 0, compute: 2 })
    }

    pub fn with_families(journal: &Journal, families: QueueFamilies) -> Rc<Self> {
        Rc::new(MockGpu {
            journal: Rc::clone(journal),
            next_handle: Cell::new(0x1000),
            live: RefCell::default(),
            fences: RefCell::default(),
            images: RefCell::default(),
            next_image: Cell::new(0),
            support: RefCell::new(default_support()),
            families,
            queues: Queues {
                graphics: vk::Queue::from_raw(0x100 + u64::from(families.graphics)),
                transfer: vk::Queue::from_raw(0x100 + u64::from(families.transfer)),
                present: vk::Queue::from_raw(0x100 + u64::from(families.present)),
                compute: vk::Queue::from_raw(0x100 + u64::from(families.compute)),
            },
            acquire_script: RefCell::default(),
            present_script: RefCell::default(),
            fail_at: RefCell::new(None),
            descs: RefCell::default(),
        })
    }

    pub fn set_support(&self, support: SurfaceSupport) {
        *self.support.borrow_mut() = support;
    }

    pub fn script_acquire(&self, results: impl IntoIterator<Item = Acquired>) {
        self.acquire_script.borrow_mut().extend(results);
    }

    pub fn script_present(&self, results: impl IntoIterator<Item = Presented>) {
        self.present_script.borrow_mut().extend(results);
    }

    /// Lets `op` succeed `after` more times, then fails it once.
    pub fn fail_on(&self, op: &'static str, after: usize) {
        *self.fail_at.borrow_mut() = Some((op, after));
    }

    pub fn live_objects(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn is_live(&self, raw: u64) -> bool {
        self.live.borrow().contains_key(&raw)
    }

    pub fn swapchain_descs(&self) -> Vec<SwapchainDesc> {
        self.descs.borrow().clone()
    }

    fn log(&self, call: Call) {
        self.journal.borrow_mut().push(call);
    }

    fn fail_point(&self, op: &'static str) -> Result<(), GpuError> {
        let mut slot = self.fail_at.borrow_mut();
        let current = *slot;
        match current {
            Some((target, 0)) if target == op => {
                *slot = None;
                Err(GpuError::Vulkan { op, result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY })
            }
            Some((target, n)) if target == op => {
                *slot = Some((target, n - 1));
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn expect_live(&self, raw: u64, kind: &'static str) {
        match self.live.borrow().get(&raw) {
            Some(obj) if obj.kind == kind => {}
            Some(obj) => panic!("{raw:#x} is a {}, expected a {kind}", obj.kind),
            None => panic!("use of destroyed or unknown {kind} {raw:#x}"),
        }
    }

    fn insert(&self, kind: &'static str, parents: Vec<u64>) -> u64 {
        for &parent in &parents {
            assert!(self.is_live(parent), "creating a {kind} from dead parent {parent:#x}");
        }
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        self.live.borrow_mut().insert(raw, Object { kind, parents });
        raw
    }

    fn mint(&self, kind: &'static str, parents: Vec<u64>) -> u64 {
        let raw = self.insert(kind, parents);
        self.log(Call::Create(kind, raw));
        raw
    }

    fn swapchain_of(&self, image: u64) -> Option<u64> {
        self.images
            .borrow()
            .iter()
            .find(|(_, images)| images.contains(&image))
            .map(|(&swapchain, _)| swapchain)
    }

    fn pending_fence(&self) -> Option<u64> {
        self.fences
            .borrow()
            .iter()
            .find(|(_, state)| state.signaled)
            .map(|(&raw, _)| raw)
    }
}

impl Gpu for MockGpu {
    fn device(&self) -> vk::Device {
        vk::Device::from_raw(0xD0)
    }

    fn queues(&self) -> Queues {
        self.queues
    }

    fn queue_families(&self) -> QueueFamilies {
        self.families
    }

    fn surface_support(&self) -> Result<SurfaceSupport, GpuError> {
        self.fail_point("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        Ok(self.support.borrow().clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> Result<vk::SwapchainKHR, GpuError> {
        self.fail_point("vkCreateSwapchainKHR")?;
        let raw = self.mint("swapchain", Vec::new());
        let images = (0..desc.min_image_count)
            .map(|_| {
                let image = self.next_handle.get();
                self.next_handle.set(image + 1);
                image
            })
            .collect();
        self.images.borrow_mut().insert(raw, images);
        self.descs.borrow_mut().push(desc.clone());
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>, GpuError> {
        self.expect_live(swapchain.as_raw(), "swapchain");
        let images = self.images.borrow();
        let list = images.get(&swapchain.as_raw()).map(Vec::as_slice).unwrap_or_default();
        Ok(list.iter().map(|&raw| vk::Image::from_raw(raw)).collect())
    }

    fn create_image_view(&self, image: vk::Image, _format: vk::Format) -> Result<vk::ImageView, GpuError> {
        self.fail_point("vkCreateImageView")?;
        let swapchain = self
            .swapchain_of(image.as_raw())
            .unwrap_or_else(|| panic!("image {:#x} belongs to no swapchain", image.as_raw()));
        Ok(vk::ImageView::from_raw(self.mint("image view", vec![swapchain])))
    }

    fn create_render_pass(&self, _format: vk::Format) -> Result<vk::RenderPass, GpuError> {
        self.fail_point("vkCreateRenderPass")?;
        Ok(vk::RenderPass::from_raw(self.mint("render pass", Vec::new())))
    }

    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        _extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer, GpuError> {
        self.fail_point("vkCreateFramebuffer")?;
        self.expect_live(render_pass.as_raw(), "render pass");
        self.expect_live(view.as_raw(), "image view");
        let raw = self.mint("framebuffer", vec![render_pass.as_raw(), view.as_raw()]);
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn create_command_pool(&self, _family: u32) -> Result<vk::CommandPool, GpuError> {
        self.fail_point("vkCreateCommandPool")?;
        Ok(vk::CommandPool::from_raw(self.mint("command pool", Vec::new())))
    }

    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>, GpuError> {
        self.fail_point("vkAllocateCommandBuffers")?;
        self.expect_live(pool.as_raw(), "command pool");
        let buffers: Vec<u64> = (0..count)
            .map(|_| self.insert("command buffer", vec![pool.as_raw()]))
            .collect();
        self.log(Call::Allocate { pool: pool.as_raw(), buffers: buffers.clone() });
        Ok(buffers.into_iter().map(vk::CommandBuffer::from_raw).collect())
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore, GpuError> {
        self.fail_point("vkCreateSemaphore")?;
        Ok(vk::Semaphore::from_raw(self.mint("semaphore", Vec::new())))
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence, GpuError> {
        self.fail_point("vkCreateFence")?;
        let raw = self.mint("fence", Vec::new());
        self.fences.borrow_mut().insert(raw, FenceState { signaled, waited: false });
        Ok(vk::Fence::from_raw(raw))
    }

    unsafe fn destroy(&self, object: DeviceObject) {
        let raw = object.as_raw();
        self.expect_live(raw, object.kind());
        {
            let live = self.live.borrow();
            if let Some((child, obj)) = live.iter().find(|(_, obj)| obj.parents.contains(&raw)) {
                panic!(
                    "destroying {} {raw:#x} while {} {child:#x} still uses it",
                    object.kind(),
                    obj.kind
                );
            }
        }
        self.live.borrow_mut().remove(&raw);
        match object {
            DeviceObject::Swapchain(_) => {
                self.images.borrow_mut().remove(&raw);
            }
            DeviceObject::Fence(_) => {
                self.fences.borrow_mut().remove(&raw);
            }
            _ => {}
        }
        self.log(Call::Destroy(object.kind(), raw));
    }

    unsafe fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
        self.expect_live(pool.as_raw(), "command pool");
        let mut freed = Vec::with_capacity(buffers.len());
        for cb in buffers {
            self.expect_live(cb.as_raw(), "command buffer");
            let removed = self.live.borrow_mut().remove(&cb.as_raw());
            if let Some(obj) = removed {
                assert_eq!(obj.parents, vec![pool.as_raw()], "command buffer freed to a foreign pool");
            }
            freed.push(cb.as_raw());
        }
        self.log(Call::Free { pool: pool.as_raw(), buffers: freed });
    }

    fn wait_idle(&self) -> Result<(), GpuError> {
        self.log(Call::WaitIdle);
        Ok(())
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> Result<(), GpuError> {
        self.expect_live(fence.as_raw(), "fence");
        let mut fences = self.fences.borrow_mut();
        let state = fences.entry(fence.as_raw()).or_insert(FenceState { signaled: false, waited: false });
        assert!(state.signaled, "waiting on fence {:#x} that nothing will signal", fence.as_raw());
        state.waited = true;
        drop(fences);
        self.log(Call::WaitFence(fence.as_raw()));
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<(), GpuError> {
        self.expect_live(fence.as_raw(), "fence");
        let mut fences = self.fences.borrow_mut();
        let state = fences.entry(fence.as_raw()).or_insert(FenceState { signaled: false, waited: false });
        assert!(state.waited, "fence {:#x} reset before it was waited on", fence.as_raw());
        *state = FenceState { signaled: false, waited: false };
        drop(fences);
        self.log(Call::ResetFence(fence.as_raw()));
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
        _timeout_ns: u64,
    ) -> Result<Acquired, GpuError> {
        self.fail_point("vkAcquireNextImageKHR")?;
        self.expect_live(swapchain.as_raw(), "swapchain");
        self.expect_live(signal.as_raw(), "semaphore");
        self.log(Call::Acquire { swapchain: swapchain.as_raw() });
        if let Some(scripted) = self.acquire_script.borrow_mut().pop_front() {
            return Ok(scripted);
        }
        let count = self.images.borrow().get(&swapchain.as_raw()).map_or(1, Vec::len) as u32;
        let index = self.next_image.get() % count.max(1);
        self.next_image.set(self.next_image.get().wrapping_add(1));
        Ok(Acquired::Ready(index))
    }

    fn record_clear_pass(&self, command_buffer: vk::CommandBuffer, pass: &ClearPass) -> Result<(), GpuError> {
        self.expect_live(command_buffer.as_raw(), "command buffer");
        self.expect_live(pass.render_pass.as_raw(), "render pass");
        self.expect_live(pass.framebuffer.as_raw(), "framebuffer");
        if let Some(fence) = self.pending_fence() {
            panic!("re-recording {:#x} while fence {fence:#x} is pending", command_buffer.as_raw());
        }
        self.log(Call::Record {
            command_buffer: command_buffer.as_raw(),
            framebuffer: pass.framebuffer.as_raw(),
        });
        Ok(())
    }

    fn submit(&self, role: QueueRole, submission: &Submission) -> Result<(), GpuError> {
        self.fail_point("vkQueueSubmit")?;
        self.expect_live(submission.command_buffer.as_raw(), "command buffer");
        self.expect_live(submission.wait_semaphore.as_raw(), "semaphore");
        self.expect_live(submission.signal_semaphore.as_raw(), "semaphore");
        self.expect_live(submission.fence.as_raw(), "fence");
        let mut fences = self.fences.borrow_mut();
        let state = fences
            .get_mut(&submission.fence.as_raw())
            .unwrap_or_else(|| panic!("unknown fence {:#x}", submission.fence.as_raw()));
        assert!(!state.signaled, "submitting with already signaled fence");
        // Work completes instantly.
        *state = FenceState { signaled: true, waited: false };
        drop(fences);
        self.log(Call::Submit {
            role,
            command_buffer: submission.command_buffer.as_raw(),
            fence: submission.fence.as_raw(),
        });
        Ok(())
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<Presented, GpuError> {
        self.fail_point("vkQueuePresentKHR")?;
        self.expect_live(swapchain.as_raw(), "swapchain");
        self.expect_live(wait.as_raw(), "semaphore");
        self.log(Call::Present { swapchain: swapchain.as_raw(), image_index });
        Ok(self.present_script.borrow_mut().pop_front().unwrap_or(Presented::Done))
    }
}

pub fn as_gpu(mock: &Rc<MockGpu>) -> Rc<dyn Gpu> {
    Rc::clone(mock) as Rc<dyn Gpu>
}

/// Window whose dispatches replay a script. An exhausted script reads as a
/// close. `Frame` events are only delivered while a callback is armed.
pub struct MockWindow {
    journal: Journal,
    geometry: Geometry,
    script: VecDeque<Result<Vec<PlatformEvent>, DispatchError>>,
    armed: bool,
}

impl MockWindow {
    pub fn new(journal: &Journal, geometry: Geometry) -> Self {
        MockWindow {
            journal: Rc::clone(journal),
            geometry,
            script: VecDeque::new(),
            armed: false,
        }
    }

    pub fn then(mut self, events: impl Into<Vec<PlatformEvent>>) -> Self {
        self.script.push_back(Ok(events.into()));
        self
    }

    pub fn then_fail(mut self, err: DispatchError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

impl WindowAdapter for MockWindow {
    fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn dispatch(&mut self) -> Result<Vec<PlatformEvent>, DispatchError> {
        self.journal.borrow_mut().push(Call::Dispatch);
        let batch = match self.script.pop_front() {
            None => return Ok(vec![PlatformEvent::Closed]),
            Some(batch) => batch?,
        };
        let mut out = Vec::with_capacity(batch.len());
        for event in batch {
            match event {
                PlatformEvent::Frame if !self.armed => {}
                PlatformEvent::Frame => {
                    self.armed = false;
                    out.push(event);
                }
                PlatformEvent::Resized(geometry) => {
                    self.geometry = geometry;
                    out.push(event);
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn request_frame(&mut self) {
        assert!(!self.armed, "frame callback armed twice");
        self.armed = true;
        self.journal.borrow_mut().push(Call::RequestFrame);
    }

    fn pre_present(&self) {
        self.journal.borrow_mut().push(Call::PrePresent);
    }

    fn raw_handles(&self) -> Result<(RawDisplayHandle, RawWindowHandle), HandleError> {
        Err(HandleError::Unavailable)
    }
}

/// In-memory config that journals every write.
pub struct RecordingConfig {
    inner: TomlConfig,
    journal: Journal,
}

impl RecordingConfig {
    pub fn new(journal: &Journal) -> Self {
        RecordingConfig { inner: TomlConfig::in_memory(), journal: Rc::clone(journal) }
    }
}

impl ConfigStore for RecordingConfig {
    fn get(&mut self, key: Key) -> Result<Value, ConfigError> {
        self.inner.get(key)
    }

    fn set(&mut self, key: Key, value: Value) -> Result<(), ConfigError> {
        self.journal.borrow_mut().push(Call::ConfigSet(key, value.clone()));
        self.inner.set(key, value)
    }
}
