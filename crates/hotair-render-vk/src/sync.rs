// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;

use ash::vk;

use crate::error::GpuError;
use crate::gpu::Gpu;
use crate::owned::Owned;

/// Per-frame synchronization. The fence starts signaled so the first frame
/// does not wait on work that was never submitted.
pub struct FrameSync {
    in_flight: Owned<vk::Fence>,
    render_finished: Owned<vk::Semaphore>,
    image_available: Owned<vk::Semaphore>,
}

impl FrameSync {
    pub fn new(gpu: &Rc<dyn Gpu>) -> Result<Self, GpuError> {
        let image_available = Owned::new(gpu, gpu.create_semaphore()?);
        let render_finished = Owned::new(gpu, gpu.create_semaphore()?);
        let in_flight = Owned::new(gpu, gpu.create_fence(true)?);
        Ok(FrameSync { in_flight, render_finished, image_available })
    }

    pub fn image_available(&self) -> vk::Semaphore {
        self.image_available.raw()
    }

    pub fn render_finished(&self) -> vk::Semaphore {
        self.render_finished.raw()
    }

    pub fn in_flight(&self) -> vk::Fence {
        self.in_flight.raw()
    }
}
