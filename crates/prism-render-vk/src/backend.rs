// SPDX-License-Identifier: CEPL-1.0
//! Vulkan implementation of the per-frame GPU calls driven by the scheduler.

use anyhow::{Context, Result};
use ash::khr::push_descriptor;
use ash::vk;
use prism_render::{Acquire, FrameBackend, Present, PresentModePref, RenderSize, RendererSettings, SceneData};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

use crate::context::{DeviceContext, GeometryPath};
use crate::error::VkResultExt;
use crate::frame::FrameSlots;
use crate::pipeline::GraphicsPipeline;
use crate::scene::SceneResources;
use crate::swapchain::{
    create_render_pass, pick_depth_format, rebuild_swapchain, Swapchain, SwapchainRebuild, SwapchainTargets,
};
use crate::timing::TimestampQueries;

pub struct VkFrameBackend {
    clear: [f32; 4],
    present_mode: PresentModePref,
    shader_dir: PathBuf,
    size: RenderSize,
    started: Instant,
    push: push_descriptor::Device,

    slots: FrameSlots,
    timestamps: Option<TimestampQueries>,
    scene: SceneResources,
    pipeline: GraphicsPipeline,
    render_pass: vk::RenderPass,
    depth_format: vk::Format,
    targets: SwapchainTargets,
    swapchain: Swapchain,
    // dropped last; every handle above belongs to its device
    ctx: DeviceContext,
}

impl VkFrameBackend {
    /// STRICT ORDER:
    /// 1) Instance, surface, device and queues
    /// 2) Swapchain, then the render pass for its format
    /// 3) Pipeline against that render pass
    /// 4) Extent-sized targets and framebuffers
    /// 5) Scene uploads, descriptor sets, per-slot sync, timestamp pool
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RendererSettings,
        scene: &SceneData,
    ) -> Result<Self> {
        let ctx = DeviceContext::new(window, display, settings).context("device context")?;
        let push = ctx.push_descriptor()?.clone();
        let frames = settings.frames_in_flight.max(1);
        unsafe {
            let mut swapchain = Swapchain::new(&ctx, size, settings.present_mode)?;
            // Each partially built stage is unwound by hand; nothing owns it yet.
            let depth_format = match pick_depth_format(&ctx.instance, ctx.phys) {
                Ok(f) => f,
                Err(e) => {
                    swapchain.destroy(&ctx.device);
                    return Err(e);
                }
            };
            let render_pass = match create_render_pass(&ctx.device, swapchain.format.format, depth_format, ctx.samples) {
                Ok(rp) => rp,
                Err(e) => {
                    swapchain.destroy(&ctx.device);
                    return Err(e);
                }
            };
            let unwind_pass = |sc: &mut Swapchain| {
                ctx.device.destroy_render_pass(render_pass, None);
                sc.destroy(&ctx.device);
            };
            let mut pipeline = match GraphicsPipeline::new(&ctx, render_pass, &settings.shader_dir) {
                Ok(p) => p,
                Err(e) => {
                    unwind_pass(&mut swapchain);
                    return Err(e);
                }
            };
            let mut targets = match SwapchainTargets::new(&ctx, &swapchain, render_pass, depth_format) {
                Ok(t) => t,
                Err(e) => {
                    pipeline.destroy(&ctx.device);
                    unwind_pass(&mut swapchain);
                    return Err(e);
                }
            };
            let rest = (|| -> Result<_> {
                let mut scene = SceneResources::new(&ctx, scene, &pipeline, frames)?;
                let mut timestamps = match TimestampQueries::new(&ctx, frames) {
                    Ok(ts) => ts,
                    Err(e) => {
                        scene.destroy(&ctx.device);
                        return Err(e);
                    }
                };
                match FrameSlots::new(&ctx.device, ctx.families.graphics, frames) {
                    Ok(slots) => Ok((scene, timestamps, slots)),
                    Err(e) => {
                        if let Some(ts) = timestamps.as_mut() {
                            ts.destroy(&ctx.device);
                        }
                        scene.destroy(&ctx.device);
                        Err(e)
                    }
                }
            })();
            let (scene, timestamps, slots) = match rest {
                Ok(parts) => parts,
                Err(e) => {
                    targets.release(&ctx.device);
                    pipeline.destroy(&ctx.device);
                    unwind_pass(&mut swapchain);
                    return Err(e);
                }
            };

            info!(
                "vulkan renderer ready ({}x{}, {:?}, {} frames in flight)",
                swapchain.extent.width, swapchain.extent.height, swapchain.format.format, frames
            );
            Ok(Self {
                clear: settings.clear_color,
                present_mode: settings.present_mode,
                shader_dir: settings.shader_dir.clone(),
                size,
                started: Instant::now(),
                push,
                slots,
                timestamps,
                scene,
                pipeline,
                render_pass,
                depth_format,
                targets,
                swapchain,
                ctx,
            })
        }
    }

    pub fn set_size(&mut self, size: RenderSize) {
        self.size = size;
    }

    /// True while the surface reports a zero-area extent (minimised window).
    pub fn surface_is_zero_area(&self) -> Result<bool> {
        let extent = unsafe { Swapchain::surface_extent(&self.ctx, self.size)? };
        Ok(extent.width == 0 || extent.height == 0)
    }

    unsafe fn record(&self, slot: usize, image_index: u32) -> Result<()> {
        let d = &self.ctx.device;
        let cmd = self.slots.slots[slot].cmd;
        let extent = self.swapchain.extent;

        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &begin).check("vkBeginCommandBuffer")?;

        if let Some(ts) = &self.timestamps {
            ts.record_begin(d, cmd, slot);
        }

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: self.clear },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass,
            framebuffer: self.targets.framebuffers[image_index as usize],
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
        d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
        d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));

        self.scene
            .update_uniforms(slot, extent, self.started.elapsed().as_secs_f32());

        let buffers = self.scene.geometry_buffers();
        let writes: Vec<_> = buffers
            .iter()
            .enumerate()
            .map(|(binding, info)| vk::WriteDescriptorSet {
                s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                dst_binding: binding as u32,
                descriptor_count: 1,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                p_buffer_info: info,
                ..Default::default()
            })
            .collect();
        self.push.cmd_push_descriptor_set(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline.layout,
            1,
            &writes,
        );
        d.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            self.pipeline.layout,
            0,
            &[self.scene.descriptor_sets[slot]],
            &[],
        );

        match &self.ctx.geometry {
            GeometryPath::VertexPulling => {
                d.cmd_bind_index_buffer(cmd, self.scene.indices.buffer, 0, vk::IndexType::UINT32);
                d.cmd_draw_indexed(cmd, self.scene.index_count, 1, 0, 0, 0);
            }
            GeometryPath::MeshShading(mesh) => {
                mesh.cmd_draw_mesh_tasks(cmd, self.scene.meshlet_count, 1, 1);
            }
        }

        d.cmd_end_render_pass(cmd);
        if let Some(ts) = &self.timestamps {
            ts.record_end(d, cmd, slot);
        }
        d.end_command_buffer(cmd).check("vkEndCommandBuffer")?;
        Ok(())
    }
}

impl FrameBackend for VkFrameBackend {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.slots.slots[slot].cmd_ready;
        unsafe { self.ctx.device.wait_for_fences(&[fence], true, u64::MAX) }.check("vkWaitForFences")?;
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquire> {
        unsafe { self.swapchain.acquire(self.slots.slots[slot].image_available) }
    }

    fn record_frame(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let s = &self.slots.slots[slot];
        unsafe {
            self.ctx.device.reset_fences(&[s.cmd_ready]).check("vkResetFences")?;
            self.ctx
                .device
                .reset_command_buffer(s.cmd, vk::CommandBufferResetFlags::empty())
                .check("vkResetCommandBuffer")?;
            self.record(slot, image_index)
        }
    }

    fn submit_frame(&mut self, slot: usize) -> Result<()> {
        let s = &self.slots.slots[slot];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &s.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.render_done,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device
                .queue_submit(self.ctx.graphics_queue, std::slice::from_ref(&submit), s.cmd_ready)
        }
        .check("vkQueueSubmit")?;
        Ok(())
    }

    fn present_frame(&mut self, slot: usize, image_index: u32) -> Result<Present> {
        let render_done = self.slots.slots[slot].render_done;
        unsafe {
            self.swapchain
                .present(self.ctx.present_queue, render_done, image_index)
        }
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        rebuild_swapchain(self)?;
        Ok(())
    }

    fn poll_gpu_time(&mut self, slot: usize) -> Result<Option<f64>> {
        match &self.timestamps {
            Some(ts) => unsafe { ts.poll(&self.ctx.device, slot) },
            None => Ok(None),
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.ctx.device.queue_wait_idle(self.ctx.graphics_queue) }.check("vkQueueWaitIdle")?;
        Ok(())
    }
}

impl SwapchainRebuild for VkFrameBackend {
    fn surface_is_minimised(&self) -> Result<bool> {
        self.surface_is_zero_area()
    }

    fn current_format(&self) -> vk::Format {
        self.swapchain.format.format
    }

    fn wait_device_idle(&mut self) -> Result<()> {
        self.ctx.wait_idle()
    }

    fn release_targets(&mut self) {
        unsafe { self.targets.release(&self.ctx.device) }
    }

    fn destroy_swapchain(&mut self) {
        unsafe { self.swapchain.destroy(&self.ctx.device) }
    }

    fn create_swapchain(&mut self) -> Result<vk::Format> {
        self.swapchain = unsafe { Swapchain::new(&self.ctx, self.size, self.present_mode)? };
        Ok(self.swapchain.format.format)
    }

    fn rebuild_pass_and_pipeline(&mut self, format: vk::Format) -> Result<()> {
        let d = &self.ctx.device;
        unsafe {
            d.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
            self.render_pass = create_render_pass(d, format, self.depth_format, self.ctx.samples)?;
            self.pipeline.rebuild(&self.ctx, self.render_pass, &self.shader_dir)
        }
    }

    fn create_targets(&mut self) -> Result<()> {
        self.targets =
            unsafe { SwapchainTargets::new(&self.ctx, &self.swapchain, self.render_pass, self.depth_format)? };
        Ok(())
    }
}

// STRICT TEARDOWN ORDER:
// - device_wait_idle()
// - Per-slot fences/semaphores, then their command pool
// - Query pool
// - Descriptor pool, sampler (scene buffers drop with the struct)
// - Pipeline, layouts, render pass
// - Framebuffers and targets BEFORE swapchain views, views BEFORE swapchain
// - Device context last (device, surface, messenger, instance)
impl Drop for VkFrameBackend {
    fn drop(&mut self) {
        unsafe {
            let d = &self.ctx.device;
            d.device_wait_idle().ok();

            self.slots.destroy(d);
            if let Some(ts) = self.timestamps.as_mut() {
                ts.destroy(d);
            }
            self.scene.destroy(d);
            self.pipeline.destroy(d);
            if self.render_pass != vk::RenderPass::null() {
                d.destroy_render_pass(self.render_pass, None);
            }
            self.targets.release(d);
            self.swapchain.destroy(d);
        }
        debug!("vulkan frame backend torn down");
    }
}
