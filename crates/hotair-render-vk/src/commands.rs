// SPDX-License-Identifier: CEPL-1.0
use std::rc::Rc;

use ash::vk;
use tracing::debug;

use crate::error::GpuError;
use crate::gpu::{Gpu, QueueRole};
use crate::owned::{CommandBuffers, Owned};

/// A pool and the buffers allocated from it. Buffers are freed before the
/// pool is destroyed.
pub struct RoleCommands {
    buffers: CommandBuffers,
    pool: Owned<vk::CommandPool>,
}

impl RoleCommands {
    pub fn pool(&self) -> vk::CommandPool {
        self.pool.raw()
    }

    pub fn buffers(&self) -> &[vk::CommandBuffer] {
        self.buffers.as_slice()
    }
}

/// One resettable pool per queue role. Graphics gets a buffer per
/// framebuffer, the other roles a single buffer each.
pub struct CommandResources {
    graphics: RoleCommands,
    transfer: RoleCommands,
    present: RoleCommands,
    compute: RoleCommands,
}

impl CommandResources {
    pub fn new(gpu: &Rc<dyn Gpu>, framebuffers: usize) -> Result<Self, GpuError> {
        let families = gpu.queue_families();
        let pool = |role: QueueRole| -> Result<Owned<vk::CommandPool>, GpuError> {
            let family = families.get(role);
            let pool = Owned::new(gpu, gpu.create_command_pool(family)?);
            debug!("{} command pool on family {family}", role.name());
            Ok(pool)
        };
        let [graphics, transfer, present, compute] = [
            pool(QueueRole::Graphics)?,
            pool(QueueRole::Transfer)?,
            pool(QueueRole::Present)?,
            pool(QueueRole::Compute)?,
        ];

        let with_buffers = |pool: Owned<vk::CommandPool>, count: u32| -> Result<RoleCommands, GpuError> {
            let buffers = CommandBuffers::allocate(gpu, &pool, count)?;
            Ok(RoleCommands { buffers, pool })
        };
        Ok(CommandResources {
            graphics: with_buffers(graphics, framebuffers as u32)?,
            transfer: with_buffers(transfer, 1)?,
            present: with_buffers(present, 1)?,
            compute: with_buffers(compute, 1)?,
        })
    }

    pub fn role(&self, role: QueueRole) -> &RoleCommands {
        match role {
            QueueRole::Graphics => &self.graphics,
            QueueRole::Transfer => &self.transfer,
            QueueRole::Present => &self.present,
            QueueRole::Compute => &self.compute,
        }
    }

    /// Graphics command buffer paired with framebuffer `index`.
    pub fn graphics(&self, index: usize) -> Option<vk::CommandBuffer> {
        self.graphics.buffers.get(index)
    }
}
