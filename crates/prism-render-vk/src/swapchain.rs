// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::khr::swapchain;
use ash::vk;
use prism_render::{Acquire, PresentModePref, Present, RenderSize};
use tracing::{debug, info};

use crate::context::DeviceContext;
use crate::error::{VkError, VkResultExt};
use crate::resource::{GpuImage, ImageDesc};

/// 8-bit sRGB with the standard nonlinear color space, else whatever comes first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            matches!(f.format, vk::Format::R8G8B8A8_SRGB | vk::Format::B8G8R8A8_SRGB)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Requested mode if offered, otherwise FIFO (always available).
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], want: PresentModePref) -> vk::PresentModeKHR {
    let want = match want {
        PresentModePref::Immediate => vk::PresentModeKHR::IMMEDIATE,
        PresentModePref::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentModePref::Fifo => vk::PresentModeKHR::FIFO,
    };
    if modes.contains(&want) {
        want
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// `min + 1`, clamped to `max` when the surface reports one.
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

/// Surface extent, or the framebuffer size clamped into the allowed range
/// when the surface leaves it to us (`u32::MAX` sentinel).
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

fn choose_composite_alpha(caps: &vk::SurfaceCapabilitiesKHR) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::INHERIT,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ]
    .into_iter()
    .find(|&a| caps.supported_composite_alpha.contains(a))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

pub struct Swapchain {
    loader: swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Current surface extent, used to detect a minimised window before
    /// tearing anything down.
    pub unsafe fn surface_extent(ctx: &DeviceContext, framebuffer: RenderSize) -> Result<vk::Extent2D> {
        let surf = ctx.surface().ok_or_else(|| anyhow!("swapchain requires a surface"))?;
        let caps = surf
            .loader
            .get_physical_device_surface_capabilities(ctx.phys, surf.surface)
            .check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        Ok(choose_extent(&caps, framebuffer))
    }

    pub unsafe fn new(ctx: &DeviceContext, framebuffer: RenderSize, want: PresentModePref) -> Result<Self> {
        let surf = ctx.surface().ok_or_else(|| anyhow!("swapchain requires a surface"))?;
        let caps = surf
            .loader
            .get_physical_device_surface_capabilities(ctx.phys, surf.surface)
            .check("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;
        let formats = surf
            .loader
            .get_physical_device_surface_formats(ctx.phys, surf.surface)
            .check("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let modes = surf
            .loader
            .get_physical_device_surface_present_modes(ctx.phys, surf.surface)
            .check("vkGetPhysicalDeviceSurfacePresentModesKHR")?;

        let format = choose_surface_format(&formats).ok_or_else(|| anyhow!("surface reports no formats"))?;
        let present_mode = choose_present_mode(&modes, want);
        let extent = choose_extent(&caps, framebuffer);
        let image_count = choose_image_count(&caps);

        let family_indices = [ctx.families.graphics, ctx.families.present];
        let (sharing_mode, index_count) = if ctx.families.graphics != ctx.families.present {
            (vk::SharingMode::CONCURRENT, 2)
        } else {
            (vk::SharingMode::EXCLUSIVE, 0)
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surf.surface,
            min_image_count: image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: index_count,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: choose_composite_alpha(&caps),
            present_mode,
            clipped: vk::TRUE,
            ..Default::default()
        };

        let loader = swapchain::Device::new(&ctx.instance, &ctx.device);
        let handle = loader.create_swapchain(&info, None).check("vkCreateSwapchainKHR")?;
        let mut sc = Self {
            loader,
            handle,
            format,
            extent,
            present_mode,
            images: Vec::new(),
            views: Vec::new(),
        };
        if let Err(e) = sc.create_views(&ctx.device) {
            sc.destroy(&ctx.device);
            return Err(e);
        }

        info!(
            "swapchain {}x{} {:?}/{:?} {:?}, {} images",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            sc.images.len()
        );
        Ok(sc)
    }

    unsafe fn create_views(&mut self, device: &ash::Device) -> Result<()> {
        self.images = self
            .loader
            .get_swapchain_images(self.handle)
            .check("vkGetSwapchainImagesKHR")?;
        for &image in &self.images {
            let info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            self.views
                .push(device.create_image_view(&info, None).check("vkCreateImageView")?);
        }
        Ok(())
    }

    /// Unbounded wait; `image_available` is signaled when the image is ready.
    pub unsafe fn acquire(&self, image_available: vk::Semaphore) -> Result<Acquire> {
        match self
            .loader
            .acquire_next_image(self.handle, u64::MAX, image_available, vk::Fence::null())
        {
            Ok((index, suboptimal)) => Ok(Acquire::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquire::Stale),
            Err(e) => Err(VkError::call("vkAcquireNextImageKHR", e).into()),
        }
    }

    pub unsafe fn present(&self, queue: vk::Queue, render_done: vk::Semaphore, index: u32) -> Result<Present> {
        let info = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &render_done,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &index,
            ..Default::default()
        };
        match self.loader.queue_present(queue, &info) {
            Ok(suboptimal) => Ok(Present::Done { suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::Stale),
            Err(e) => Err(VkError::call("vkQueuePresentKHR", e).into()),
        }
    }

    /// Views first, then the swapchain itself.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for view in self.views.drain(..) {
            device.destroy_image_view(view, None);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
    }
}

/// The individual steps of a swapchain rebuild. [`rebuild_swapchain`] owns
/// their order; implementors only perform each step.
pub trait SwapchainRebuild {
    fn surface_is_minimised(&self) -> Result<bool>;
    fn current_format(&self) -> vk::Format;
    fn wait_device_idle(&mut self) -> Result<()>;
    /// Framebuffers and the extent-sized color/depth targets.
    fn release_targets(&mut self);
    /// Image views, then the swapchain handle.
    fn destroy_swapchain(&mut self);
    /// Returns the format the new swapchain ended up with.
    fn create_swapchain(&mut self) -> Result<vk::Format>;
    fn rebuild_pass_and_pipeline(&mut self, format: vk::Format) -> Result<()>;
    fn create_targets(&mut self) -> Result<()>;
}

/// STRICT ORDER (recreate):
/// 1) device idle: nothing may still reference the old images
/// 2) framebuffers and extent-sized targets
/// 3) swapchain image views, then the swapchain
/// 4) new swapchain + views
/// 5) render pass + pipeline ONLY if the surface format changed
/// 6) new targets and framebuffers
///
/// A minimised surface skips all of it. Returns whether a rebuild happened.
pub fn rebuild_swapchain<R: SwapchainRebuild + ?Sized>(r: &mut R) -> Result<bool> {
    if r.surface_is_minimised()? {
        debug!("surface is 0x0, swapchain recreation deferred");
        return Ok(false);
    }
    r.wait_device_idle()?;
    let old_format = r.current_format();
    r.release_targets();
    r.destroy_swapchain();

    let format = r.create_swapchain()?;
    if format != old_format {
        info!("surface format changed {:?} -> {:?}, rebuilding pipeline", old_format, format);
        r.rebuild_pass_and_pipeline(format)?;
    }
    r.create_targets()?;
    Ok(true)
}

/// First candidate usable as an optimal-tiling depth attachment.
pub unsafe fn pick_depth_format(instance: &ash::Instance, phys: vk::PhysicalDevice) -> Result<vk::Format> {
    [
        vk::Format::D32_SFLOAT,
        vk::Format::D32_SFLOAT_S8_UINT,
        vk::Format::D24_UNORM_S8_UINT,
    ]
    .into_iter()
    .find(|&fmt| {
        instance
            .get_physical_device_format_properties(phys, fmt)
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
    .ok_or_else(|| anyhow!("no supported depth attachment format"))
}

/// Single subpass. With MSAA the multisampled color attachment resolves
/// into the swapchain image; without it the swapchain image is drawn directly.
pub unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
) -> Result<vk::RenderPass> {
    let msaa = samples != vk::SampleCountFlags::TYPE_1;
    let color = vk::AttachmentDescription {
        format: color_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: if msaa {
            vk::AttachmentStoreOp::DONT_CARE
        } else {
            vk::AttachmentStoreOp::STORE
        },
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: if msaa {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        },
        ..Default::default()
    };
    let depth = vk::AttachmentDescription {
        format: depth_format,
        samples,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::DONT_CARE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ..Default::default()
    };
    let resolve = vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::DONT_CARE,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let attachments: Vec<_> = if msaa {
        vec![color, depth, resolve]
    } else {
        vec![color, depth]
    };

    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let resolve_ref = vk::AttachmentReference {
        attachment: 2,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_resolve_attachments: if msaa { &resolve_ref } else { std::ptr::null() },
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        dst_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    Ok(device.create_render_pass(&info, None).check("vkCreateRenderPass")?)
}

/// Everything sized to the swapchain extent: color (MSAA only) and depth
/// attachments plus one framebuffer per swapchain image.
pub struct SwapchainTargets {
    color: Option<GpuImage>,
    depth: Option<GpuImage>,
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl SwapchainTargets {
    pub unsafe fn new(
        ctx: &DeviceContext,
        sc: &Swapchain,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let mut targets = Self {
            color: None,
            depth: None,
            framebuffers: Vec::with_capacity(sc.views.len()),
        };
        if let Err(e) = targets.build(ctx, sc, render_pass, depth_format) {
            targets.release(&ctx.device);
            return Err(e);
        }
        Ok(targets)
    }

    unsafe fn build(
        &mut self,
        ctx: &DeviceContext,
        sc: &Swapchain,
        render_pass: vk::RenderPass,
        depth_format: vk::Format,
    ) -> Result<()> {
        let msaa = ctx.samples != vk::SampleCountFlags::TYPE_1;
        if msaa {
            self.color = Some(
                GpuImage::new(
                    &ctx.device,
                    &ctx.mem_props,
                    ImageDesc {
                        width: sc.extent.width,
                        height: sc.extent.height,
                        format: sc.format.format,
                        mip_levels: 1,
                        samples: ctx.samples,
                        usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                        aspect: vk::ImageAspectFlags::COLOR,
                    },
                )
                .context("msaa color target")?,
            );
        }
        let depth = GpuImage::new(
            &ctx.device,
            &ctx.mem_props,
            ImageDesc {
                width: sc.extent.width,
                height: sc.extent.height,
                format: depth_format,
                mip_levels: 1,
                samples: ctx.samples,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect: vk::ImageAspectFlags::DEPTH,
            },
        )
        .context("depth target")?;
        let depth_view = depth.view;
        self.depth = Some(depth);

        for &view in &sc.views {
            let attachments: Vec<vk::ImageView> = match &self.color {
                Some(color) => vec![color.view, depth_view, view],
                None => vec![view, depth_view],
            };
            let info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: sc.extent.width,
                height: sc.extent.height,
                layers: 1,
                ..Default::default()
            };
            self.framebuffers
                .push(ctx.device.create_framebuffer(&info, None).check("vkCreateFramebuffer")?);
        }
        Ok(())
    }

    /// Framebuffers, then color, then depth.
    pub unsafe fn release(&mut self, device: &ash::Device) {
        for fb in self.framebuffers.drain(..) {
            device.destroy_framebuffer(fb, None);
        }
        self.color.take();
        self.depth.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [fmt(vk::Format::B8G8R8A8_UNORM), fmt(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::B8G8R8A8_SRGB
        );
    }

    #[test]
    fn test_choose_surface_format_falls_back_to_first() {
        let formats = [fmt(vk::Format::A2B10G10R10_UNORM_PACK32), fmt(vk::Format::B8G8R8A8_UNORM)];
        assert_eq!(
            choose_surface_format(&formats).unwrap().format,
            vk::Format::A2B10G10R10_UNORM_PACK32
        );
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn test_choose_present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, PresentModePref::Mailbox),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&modes, PresentModePref::Immediate),
            vk::PresentModeKHR::FIFO
        );
    }

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_image_count_clamps_to_max() {
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn test_extent_uses_current_when_fixed() {
        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let e = choose_extent(&c, RenderSize {
            width: 1,
            height: 1,
        });
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn test_extent_clamps_framebuffer_size() {
        let e = choose_extent(&caps(2, 3), RenderSize {
            width: 5000,
            height: 0,
        });
        assert_eq!((e.width, e.height), (4096, 1));
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Idle,
        ReleaseTargets,
        DestroySwapchain,
        CreateSwapchain,
        RebuildPipeline(vk::Format),
        CreateTargets,
    }

    struct ScriptedRebuild {
        minimised: bool,
        format: vk::Format,
        next_format: vk::Format,
        fail_create: bool,
        steps: Vec<Step>,
    }

    impl ScriptedRebuild {
        fn new(format: vk::Format, next_format: vk::Format) -> Self {
            Self {
                minimised: false,
                format,
                next_format,
                fail_create: false,
                steps: Vec::new(),
            }
        }
    }

    impl SwapchainRebuild for ScriptedRebuild {
        fn surface_is_minimised(&self) -> Result<bool> {
            Ok(self.minimised)
        }
        fn current_format(&self) -> vk::Format {
            self.format
        }
        fn wait_device_idle(&mut self) -> Result<()> {
            self.steps.push(Step::Idle);
            Ok(())
        }
        fn release_targets(&mut self) {
            self.steps.push(Step::ReleaseTargets);
        }
        fn destroy_swapchain(&mut self) {
            self.steps.push(Step::DestroySwapchain);
        }
        fn create_swapchain(&mut self) -> Result<vk::Format> {
            self.steps.push(Step::CreateSwapchain);
            if self.fail_create {
                return Err(VkError::call("vkCreateSwapchainKHR", vk::Result::ERROR_SURFACE_LOST_KHR).into());
            }
            self.format = self.next_format;
            Ok(self.format)
        }
        fn rebuild_pass_and_pipeline(&mut self, format: vk::Format) -> Result<()> {
            self.steps.push(Step::RebuildPipeline(format));
            Ok(())
        }
        fn create_targets(&mut self) -> Result<()> {
            self.steps.push(Step::CreateTargets);
            Ok(())
        }
    }

    #[test]
    fn test_rebuild_drains_then_destroys_then_creates() {
        let mut r = ScriptedRebuild::new(vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_SRGB);
        assert!(rebuild_swapchain(&mut r).unwrap());
        assert_eq!(
            r.steps,
            vec![
                Step::Idle,
                Step::ReleaseTargets,
                Step::DestroySwapchain,
                Step::CreateSwapchain,
                Step::CreateTargets,
            ]
        );
    }

    #[test]
    fn test_rebuild_recreates_pipeline_on_format_change() {
        let mut r = ScriptedRebuild::new(vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_SRGB);
        rebuild_swapchain(&mut r).unwrap();
        assert_eq!(
            r.steps[3..],
            [
                Step::CreateSwapchain,
                Step::RebuildPipeline(vk::Format::R8G8B8A8_SRGB),
                Step::CreateTargets,
            ]
        );
    }

    #[test]
    fn test_minimised_surface_touches_nothing() {
        let mut r = ScriptedRebuild::new(vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_SRGB);
        r.minimised = true;
        assert!(!rebuild_swapchain(&mut r).unwrap());
        assert!(r.steps.is_empty());
    }

    #[test]
    fn test_failed_create_stops_before_targets() {
        let mut r = ScriptedRebuild::new(vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_SRGB);
        r.fail_create = true;
        assert!(rebuild_swapchain(&mut r).is_err());
        assert_eq!(r.steps.last(), Some(&Step::CreateSwapchain));
        assert!(!r.steps.contains(&Step::CreateTargets));
    }
}
