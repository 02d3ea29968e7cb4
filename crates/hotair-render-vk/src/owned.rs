// SPDX-License-Identifier: CEPL-1.0
use std::fmt;
use std::rc::Rc;

use ash::vk;
use tracing::trace;

use crate::error::GpuError;
use crate::gpu::{DeviceObject, Gpu};

pub trait OwnedHandle: Copy + fmt::Debug {
    fn into_object(self) -> DeviceObject;
}

macro_rules! owned_handles {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl OwnedHandle for $ty {
            fn into_object(self) -> DeviceObject {
                DeviceObject::$variant(self)
            }
        })*
    };
}

owned_handles! {
    vk::SwapchainKHR => Swapchain,
    vk::ImageView => ImageView,
    vk::RenderPass => RenderPass,
    vk::Framebuffer => Framebuffer,
    vk::CommandPool => CommandPool,
    vk::Semaphore => Semaphore,
    vk::Fence => Fence,
}

/// Sole owner of one device object. Destroyed when dropped, so a struct of
/// these tears down in field declaration order.
pub struct Owned<H: OwnedHandle> {
    handle: H,
    gpu: Rc<dyn Gpu>,
}

impl<H: OwnedHandle> Owned<H> {
    /// `handle` must be freshly created by `gpu` and not owned elsewhere.
    pub(crate) fn new(gpu: &Rc<dyn Gpu>, handle: H) -> Self {
        Owned { handle, gpu: Rc::clone(gpu) }
    }

    pub fn raw(&self) -> H {
        self.handle
    }
}

impl<H: OwnedHandle> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.handle).finish()
    }
}

impl<H: OwnedHandle> Drop for Owned<H> {
    fn drop(&mut self) {
        let object = self.handle.into_object();
        trace!("destroying {} {:#x}", object.kind(), object.as_raw());
        // SAFETY: sole owner; holders drop after their children and after
        // the device went idle.
        unsafe { self.gpu.destroy(object) }
    }
}

/// Primary command buffers from one pool, freed back to it on drop.
pub struct CommandBuffers {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    gpu: Rc<dyn Gpu>,
}

impl CommandBuffers {
    pub(crate) fn allocate(
        gpu: &Rc<dyn Gpu>,
        pool: &Owned<vk::CommandPool>,
        count: u32,
    ) -> Result<Self, GpuError> {
        let buffers = gpu.allocate_command_buffers(pool.raw(), count)?;
        let out = CommandBuffers { pool: pool.raw(), buffers, gpu: Rc::clone(gpu) };
        if out.buffers.len() != count as usize {
            return Err(GpuError::NullHandle { op: "vkAllocateCommandBuffers" });
        }
        Ok(out)
    }

    pub fn get(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(index).copied()
    }

    pub fn as_slice(&self) -> &[vk::CommandBuffer] {
        &self.buffers
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Drop for CommandBuffers {
    fn drop(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        trace!("freeing {} command buffers", self.buffers.len());
        // SAFETY: allocated from `pool`, which outlives this value.
        unsafe { self.gpu.free_command_buffers(self.pool, &self.buffers) }
    }
}
