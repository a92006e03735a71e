// SPDX-License-Identifier: CEPL-1.0
//! Mip chain generation by successive linear blits.
//!
//! The chain is planned as plain data first and then recorded, so the
//! barrier ordering can be checked without a device.

use anyhow::Result;
use ash::vk;

use crate::error::VkError;

/// `floor(log2(max(w, h))) + 1`; never less than one.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Size of `level`, each axis halved per level with a floor of one.
pub fn mip_extent(width: u32, height: u32, level: u32) -> (u32, u32) {
    ((width >> level).max(1), (height >> level).max(1))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelBarrier {
    pub level: u32,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MipStep {
    Barrier(LevelBarrier),
    Blit {
        src_level: u32,
        dst_level: u32,
        src_size: (u32, u32),
        dst_size: (u32, u32),
    },
}

fn to_transfer_src(level: u32) -> MipStep {
    MipStep::Barrier(LevelBarrier {
        level,
        old_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        new_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        src_access: vk::AccessFlags::TRANSFER_WRITE,
        dst_access: vk::AccessFlags::TRANSFER_READ,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::TRANSFER,
    })
}

fn to_shader_read(level: u32, from: vk::ImageLayout) -> MipStep {
    let src_access = if from == vk::ImageLayout::TRANSFER_SRC_OPTIMAL {
        vk::AccessFlags::TRANSFER_READ
    } else {
        vk::AccessFlags::TRANSFER_WRITE
    };
    MipStep::Barrier(LevelBarrier {
        level,
        old_layout: from,
        new_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        src_access,
        dst_access: vk::AccessFlags::SHADER_READ,
        src_stage: vk::PipelineStageFlags::TRANSFER,
        dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
    })
}

/// Every level starts in TRANSFER_DST_OPTIMAL with level 0 already written.
/// Every level ends in SHADER_READ_ONLY_OPTIMAL.
pub fn plan_mip_chain(width: u32, height: u32, levels: u32) -> Vec<MipStep> {
    let levels = levels.max(1);
    let mut steps = Vec::with_capacity(levels as usize * 3);
    for level in 1..levels {
        let src = level - 1;
        steps.push(to_transfer_src(src));
        steps.push(MipStep::Blit {
            src_level: src,
            dst_level: level,
            src_size: mip_extent(width, height, src),
            dst_size: mip_extent(width, height, level),
        });
        steps.push(to_shader_read(src, vk::ImageLayout::TRANSFER_SRC_OPTIMAL));
    }
    // last level was only ever a blit destination
    steps.push(to_shader_read(levels - 1, vk::ImageLayout::TRANSFER_DST_OPTIMAL));
    steps
}

/// Mip generation needs linear filtering on blits from optimal tiling.
pub unsafe fn ensure_linear_blit(instance: &ash::Instance, phys: vk::PhysicalDevice, format: vk::Format) -> Result<(), VkError> {
    let props = instance.get_physical_device_format_properties(phys, format);
    if props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
    {
        Ok(())
    } else {
        Err(VkError::BlitUnsupported(format))
    }
}

pub unsafe fn record_mip_chain(device: &ash::Device, cmd: vk::CommandBuffer, image: vk::Image, steps: &[MipStep]) {
    for step in steps {
        match *step {
            MipStep::Barrier(b) => {
                let barrier = vk::ImageMemoryBarrier {
                    s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
                    src_access_mask: b.src_access,
                    dst_access_mask: b.dst_access,
                    old_layout: b.old_layout,
                    new_layout: b.new_layout,
                    src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                    dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                    image,
                    subresource_range: color_level(b.level),
                    ..Default::default()
                };
                device.cmd_pipeline_barrier(
                    cmd,
                    b.src_stage,
                    b.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    std::slice::from_ref(&barrier),
                );
            }
            MipStep::Blit {
                src_level,
                dst_level,
                src_size,
                dst_size,
            } => {
                let blit = vk::ImageBlit {
                    src_subresource: color_layer(src_level),
                    src_offsets: [vk::Offset3D::default(), corner(src_size)],
                    dst_subresource: color_layer(dst_level),
                    dst_offsets: [vk::Offset3D::default(), corner(dst_size)],
                };
                device.cmd_blit_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&blit),
                    vk::Filter::LINEAR,
                );
            }
        }
    }
}

fn corner((w, h): (u32, u32)) -> vk::Offset3D {
    vk::Offset3D {
        x: w as i32,
        y: h as i32,
        z: 1,
    }
}

fn color_level(level: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: level,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn color_layer(level: u32) -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: level,
        base_array_layer: 0,
        layer_count: 1,
    }
}
