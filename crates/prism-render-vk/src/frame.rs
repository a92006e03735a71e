// SPDX-License-Identifier: CEPL-1.0
//! Per-slot synchronization objects for frames in flight.

use anyhow::Result;
use ash::vk;

use crate::error::VkResultExt;

pub struct FrameSlot {
    pub cmd: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_done: vk::Semaphore,
    /// Created signaled so the first wait on every slot returns at once.
    pub cmd_ready: vk::Fence,
}

pub struct FrameSlots {
    pool: vk::CommandPool,
    pub slots: Vec<FrameSlot>,
}

impl FrameSlots {
    pub unsafe fn new(device: &ash::Device, graphics_family: u32, count: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: graphics_family,
            ..Default::default()
        };
        let pool = device.create_command_pool(&pool_info, None).check("vkCreateCommandPool")?;
        let mut out = Self {
            pool,
            slots: Vec::with_capacity(count),
        };
        if let Err(e) = out.fill(device, count) {
            out.destroy(device);
            return Err(e);
        }
        Ok(out)
    }

    unsafe fn fill(&mut self, device: &ash::Device, count: usize) -> Result<()> {
        let alloc = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        let cmds = device.allocate_command_buffers(&alloc).check("vkAllocateCommandBuffers")?;

        let sem_info = vk::SemaphoreCreateInfo {
            s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
            ..Default::default()
        };
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        for cmd in cmds {
            // push as soon as each handle exists so destroy() sees it on failure
            let mut slot = FrameSlot {
                cmd,
                image_available: vk::Semaphore::null(),
                render_done: vk::Semaphore::null(),
                cmd_ready: vk::Fence::null(),
            };
            let made = (|| -> Result<()> {
                slot.image_available = device.create_semaphore(&sem_info, None).check("vkCreateSemaphore")?;
                slot.render_done = device.create_semaphore(&sem_info, None).check("vkCreateSemaphore")?;
                slot.cmd_ready = device.create_fence(&fence_info, None).check("vkCreateFence")?;
                Ok(())
            })();
            self.slots.push(slot);
            made?;
        }
        Ok(())
    }

    /// Caller must have drained the device. Null handles are skipped.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for s in self.slots.drain(..) {
            if s.cmd_ready != vk::Fence::null() {
                device.destroy_fence(s.cmd_ready, None);
            }
            if s.render_done != vk::Semaphore::null() {
                device.destroy_semaphore(s.render_done, None);
            }
            if s.image_available != vk::Semaphore::null() {
                device.destroy_semaphore(s.image_available, None);
            }
        }
        if self.pool != vk::CommandPool::null() {
            device.destroy_command_pool(self.pool, None);
            self.pool = vk::CommandPool::null();
        }
    }
}
