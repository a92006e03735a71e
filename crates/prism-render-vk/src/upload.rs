// SPDX-License-Identifier: CEPL-1.0
//! Synchronous host -> device transfers through host-visible staging buffers.
//!
//! Every call records a one-shot command buffer from a transient pool,
//! submits it with its own fence and blocks until that fence signals.
//! Nothing here overlaps with frame rendering; it is load-time work.

use anyhow::{bail, Context, Result};
use ash::vk;
use tracing::debug;

use crate::context::DeviceContext;
use crate::error::{VkError, VkResultExt};
use crate::mipmap::{ensure_linear_blit, mip_level_count, plan_mip_chain, record_mip_chain};
use crate::resource::{GpuBuffer, GpuImage, ImageDesc};

const STAGING_FLAGS: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Command buffer from a transient pool plus the fence that guards it.
/// Dropping it destroys the fence and the pool.
pub struct OneShot<'a> {
    device: &'a ash::Device,
    pool: vk::CommandPool,
    pub cmd: vk::CommandBuffer,
    fence: vk::Fence,
}

impl<'a> OneShot<'a> {
    pub unsafe fn begin(device: &'a ash::Device, queue_family: u32) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            queue_family_index: queue_family,
            ..Default::default()
        };
        let pool = device.create_command_pool(&pool_info, None).check("vkCreateCommandPool")?;
        let mut shot = Self {
            device,
            pool,
            cmd: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
        };

        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        shot.cmd = device
            .allocate_command_buffers(&alloc_info)
            .check("vkAllocateCommandBuffers")?[0];
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        device
            .begin_command_buffer(shot.cmd, &begin)
            .check("vkBeginCommandBuffer")?;
        Ok(shot)
    }

    /// Ends recording, submits with a dedicated fence and waits on it.
    pub unsafe fn submit_and_wait(mut self, queue: vk::Queue) -> Result<()> {
        self.device.end_command_buffer(self.cmd).check("vkEndCommandBuffer")?;
        let fence_info = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            ..Default::default()
        };
        self.fence = self.device.create_fence(&fence_info, None).check("vkCreateFence")?;
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            command_buffer_count: 1,
            p_command_buffers: &self.cmd,
            ..Default::default()
        };
        self.device
            .queue_submit(queue, std::slice::from_ref(&submit), self.fence)
            .check("vkQueueSubmit")?;
        self.device
            .wait_for_fences(&[self.fence], true, u64::MAX)
            .check("vkWaitForFences")?;
        Ok(())
    }
}

impl Drop for OneShot<'_> {
    fn drop(&mut self) {
        unsafe {
            if self.fence != vk::Fence::null() {
                self.device.destroy_fence(self.fence, None);
            }
            // frees the command buffer with it
            self.device.destroy_command_pool(self.pool, None);
        }
    }
}

unsafe fn staging_buffer(ctx: &DeviceContext, bytes: &[u8]) -> Result<GpuBuffer> {
    let staging = GpuBuffer::new(
        &ctx.device,
        &ctx.mem_props,
        bytes.len() as vk::DeviceSize,
        vk::BufferUsageFlags::TRANSFER_SRC,
        STAGING_FLAGS,
        (vk::SharingMode::EXCLUSIVE, &[]),
    )
    .context("staging buffer")?;
    // coherent memory, no flush needed
    staging.write(bytes)?;
    Ok(staging)
}

/// Copies `bytes` into a new device-local buffer on the transfer queue.
pub unsafe fn upload_buffer(ctx: &DeviceContext, usage: vk::BufferUsageFlags, bytes: &[u8]) -> Result<GpuBuffer> {
    if bytes.is_empty() {
        return Err(VkError::EmptyUpload.into());
    }
    let size = bytes.len() as vk::DeviceSize;
    let staging = staging_buffer(ctx, bytes)?;

    let (mode, families) = ctx.buffer_sharing();
    let dst = GpuBuffer::new(
        &ctx.device,
        &ctx.mem_props,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
        (mode, &families),
    )
    .context("device-local buffer")?;

    let shot = OneShot::begin(&ctx.device, ctx.families.transfer)?;
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size,
    };
    ctx.device
        .cmd_copy_buffer(shot.cmd, staging.buffer, dst.buffer, std::slice::from_ref(&region));
    shot.submit_and_wait(ctx.transfer_queue)?;

    debug!("uploaded {} bytes ({:?})", size, usage);
    Ok(dst)
}

/// Uploads tightly packed RGBA8 pixels and builds the full mip chain.
/// Runs on the graphics queue because of the blits.
pub unsafe fn upload_image(
    ctx: &DeviceContext,
    pixels: &[u8],
    width: u32,
    height: u32,
    format: vk::Format,
) -> Result<GpuImage> {
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected || expected == 0 {
        return Err(VkError::PixelSizeMismatch {
            expected,
            actual: pixels.len(),
        }
        .into());
    }
    ensure_linear_blit(&ctx.instance, ctx.phys, format)?;

    let levels = mip_level_count(width, height);
    let staging = staging_buffer(ctx, pixels)?;
    let image = GpuImage::new(
        &ctx.device,
        &ctx.mem_props,
        ImageDesc {
            width,
            height,
            format,
            mip_levels: levels,
            samples: vk::SampleCountFlags::TYPE_1,
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
        },
    )
    .context("texture image")?;

    let d = &ctx.device;
    let shot = OneShot::begin(d, ctx.families.graphics)?;

    // 1) whole chain UNDEFINED -> TRANSFER_DST
    let to_dst = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::TRANSFER_WRITE,
        old_layout: vk::ImageLayout::UNDEFINED,
        new_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image: image.image,
        subresource_range: vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: levels,
            base_array_layer: 0,
            layer_count: 1,
        },
        ..Default::default()
    };
    d.cmd_pipeline_barrier(
        shot.cmd,
        vk::PipelineStageFlags::TOP_OF_PIPE,
        vk::PipelineStageFlags::TRANSFER,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        std::slice::from_ref(&to_dst),
    );

    // 2) staging -> level 0
    let region = vk::BufferImageCopy {
        buffer_offset: 0,
        buffer_row_length: 0,
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D::default(),
        image_extent: vk::Extent3D {
            width,
            height,
            depth: 1,
        },
    };
    d.cmd_copy_buffer_to_image(
        shot.cmd,
        staging.buffer,
        image.image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        std::slice::from_ref(&region),
    );

    // 3) blit chain, every level ends SHADER_READ_ONLY
    record_mip_chain(d, shot.cmd, image.image, &plan_mip_chain(width, height, levels));

    shot.submit_and_wait(ctx.graphics_queue)?;
    debug!("uploaded {}x{} texture, {} mip levels", width, height, levels);
    Ok(image)
}

/// Copies a device-local buffer into host memory. The source needs
/// TRANSFER_SRC usage.
pub unsafe fn read_back_buffer(ctx: &DeviceContext, src: &GpuBuffer) -> Result<Vec<u8>> {
    if !src.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC) {
        bail!("buffer was not created with TRANSFER_SRC usage");
    }
    let host = GpuBuffer::new(
        &ctx.device,
        &ctx.mem_props,
        src.size,
        vk::BufferUsageFlags::TRANSFER_DST,
        STAGING_FLAGS,
        (vk::SharingMode::EXCLUSIVE, &[]),
    )
    .context("read-back buffer")?;

    let shot = OneShot::begin(&ctx.device, ctx.families.transfer)?;
    let region = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: src.size,
    };
    ctx.device
        .cmd_copy_buffer(shot.cmd, src.buffer, host.buffer, std::slice::from_ref(&region));
    shot.submit_and_wait(ctx.transfer_queue)?;

    host.read(src.size as usize)
}
