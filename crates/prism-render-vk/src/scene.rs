// SPDX-License-Identifier: CEPL-1.0
//! GPU copies of the scene: geometry buffers, the mipmapped texture and
//! one persistently mapped uniform buffer per frame slot.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use prism_render::SceneData;
use tracing::info;

use crate::context::DeviceContext;
use crate::error::VkResultExt;
use crate::pipeline::GraphicsPipeline;
use crate::resource::{GpuBuffer, GpuImage};
use crate::upload::{upload_buffer, upload_image};

/// Matches the uniform block at set 0, binding 0.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct SceneUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
}

/// Model spins a quarter turn per second around +Z, camera at (2, 2, 2)
/// looking at the origin. Clip space Y points down, so the projection's Y
/// axis is flipped.
pub fn scene_uniforms(extent: vk::Extent2D, seconds: f32) -> SceneUniforms {
    let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
    let model = Mat4::from_rotation_z(seconds * std::f32::consts::FRAC_PI_2);
    let view = Mat4::look_at_rh(Vec3::splat(2.0), Vec3::ZERO, Vec3::Z);
    let mut proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 10.0);
    proj.y_axis.y *= -1.0;
    SceneUniforms {
        model: model.to_cols_array_2d(),
        view: view.to_cols_array_2d(),
        proj: proj.to_cols_array_2d(),
    }
}

struct MappedUniforms {
    buffer: GpuBuffer,
    ptr: *mut u8,
}

pub struct SceneResources {
    pub vertices: GpuBuffer,
    pub indices: GpuBuffer,
    /// Present only on the mesh-shading path.
    pub meshlets: Option<GpuBuffer>,
    pub index_count: u32,
    pub meshlet_count: u32,
    texture: GpuImage,
    sampler: vk::Sampler,
    uniforms: Vec<MappedUniforms>,
    descriptor_pool: vk::DescriptorPool,
    pub descriptor_sets: Vec<vk::DescriptorSet>,
}

impl SceneResources {
    pub unsafe fn new(
        ctx: &DeviceContext,
        scene: &SceneData,
        pipeline: &GraphicsPipeline,
        frames: usize,
    ) -> Result<Self> {
        let vertices = upload_buffer(
            ctx,
            vk::BufferUsageFlags::STORAGE_BUFFER,
            bytemuck::cast_slice(&scene.vertices),
        )
        .context("vertex buffer")?;
        let indices = upload_buffer(
            ctx,
            vk::BufferUsageFlags::INDEX_BUFFER,
            bytemuck::cast_slice(&scene.indices),
        )
        .context("index buffer")?;
        let meshlets = if ctx.geometry.is_mesh() {
            Some(
                upload_buffer(
                    ctx,
                    vk::BufferUsageFlags::STORAGE_BUFFER,
                    bytemuck::cast_slice(&scene.meshlets),
                )
                .context("meshlet buffer")?,
            )
        } else {
            None
        };

        let tex = &scene.texture;
        let texture = upload_image(ctx, &tex.rgba, tex.width, tex.height, vk::Format::R8G8B8A8_SRGB)
            .context("texture")?;
        let sampler = create_sampler(ctx, texture.desc.mip_levels)?;

        let mut res = Self {
            vertices,
            indices,
            meshlets,
            index_count: scene.indices.len() as u32,
            meshlet_count: scene.meshlets.len() as u32,
            texture,
            sampler,
            uniforms: Vec::with_capacity(frames),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
        };
        if let Err(e) = res.create_frame_data(ctx, pipeline, frames) {
            res.destroy(&ctx.device);
            return Err(e);
        }

        info!(
            "scene resident: {} vertices, {} triangles, {} meshlets, {}x{} texture ({} mips)",
            scene.vertices.len(),
            scene.triangle_count(),
            res.meshlet_count,
            tex.width,
            tex.height,
            res.texture.desc.mip_levels
        );
        Ok(res)
    }

    unsafe fn create_frame_data(&mut self, ctx: &DeviceContext, pipeline: &GraphicsPipeline, frames: usize) -> Result<()> {
        let d = &ctx.device;
        let ubo_size = std::mem::size_of::<SceneUniforms>() as vk::DeviceSize;
        for _ in 0..frames {
            let buffer = GpuBuffer::new(
                d,
                &ctx.mem_props,
                ubo_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                (vk::SharingMode::EXCLUSIVE, &[]),
            )
            .context("uniform buffer")?;
            let ptr = buffer.map_persistent()?;
            self.uniforms.push(MappedUniforms { buffer, ptr });
        }

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: frames as u32,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: frames as u32,
            },
        ];
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: frames as u32,
            pool_size_count: pool_sizes.len() as u32,
            p_pool_sizes: pool_sizes.as_ptr(),
            ..Default::default()
        };
        self.descriptor_pool = d.create_descriptor_pool(&pool_info, None).check("vkCreateDescriptorPool")?;

        let layouts = vec![pipeline.scene_set_layout; frames];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.descriptor_pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.descriptor_sets = d.allocate_descriptor_sets(&alloc).check("vkAllocateDescriptorSets")?;

        let image_info = vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.texture.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        };
        for (set, ubo) in self.descriptor_sets.iter().zip(&self.uniforms) {
            let buffer_info = vk::DescriptorBufferInfo {
                buffer: ubo.buffer.buffer,
                offset: 0,
                range: ubo_size,
            };
            let writes = [
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &buffer_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: *set,
                    dst_binding: 1,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &image_info,
                    ..Default::default()
                },
            ];
            d.update_descriptor_sets(&writes, &[]);
        }
        Ok(())
    }

    /// Writes the slot's uniforms. The slot's fence must have been waited on.
    pub unsafe fn update_uniforms(&self, slot: usize, extent: vk::Extent2D, seconds: f32) {
        let data = scene_uniforms(extent, seconds);
        let bytes = bytemuck::bytes_of(&data);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.uniforms[slot].ptr, bytes.len());
    }

    /// Buffer infos for the push-descriptor set: vertices, then meshlets.
    pub fn geometry_buffers(&self) -> Vec<vk::DescriptorBufferInfo> {
        std::iter::once(&self.vertices)
            .chain(self.meshlets.as_ref())
            .map(|b| vk::DescriptorBufferInfo {
                buffer: b.buffer,
                offset: 0,
                range: vk::WHOLE_SIZE,
            })
            .collect()
    }

    /// Descriptor pool and sampler; buffers and the texture free themselves
    /// when dropped.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.descriptor_pool != vk::DescriptorPool::null() {
            device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.descriptor_pool = vk::DescriptorPool::null();
        }
        self.descriptor_sets.clear();
        self.uniforms.clear();
        if self.sampler != vk::Sampler::null() {
            device.destroy_sampler(self.sampler, None);
            self.sampler = vk::Sampler::null();
        }
    }
}

unsafe fn create_sampler(ctx: &DeviceContext, mip_levels: u32) -> Result<vk::Sampler> {
    let info = vk::SamplerCreateInfo {
        s_type: vk::StructureType::SAMPLER_CREATE_INFO,
        mag_filter: vk::Filter::LINEAR,
        min_filter: vk::Filter::LINEAR,
        mipmap_mode: vk::SamplerMipmapMode::LINEAR,
        address_mode_u: vk::SamplerAddressMode::REPEAT,
        address_mode_v: vk::SamplerAddressMode::REPEAT,
        address_mode_w: vk::SamplerAddressMode::REPEAT,
        anisotropy_enable: ctx.anisotropy as vk::Bool32,
        max_anisotropy: if ctx.anisotropy {
            ctx.limits.max_sampler_anisotropy
        } else {
            1.0
        },
        compare_op: vk::CompareOp::ALWAYS,
        min_lod: 0.0,
        max_lod: mip_levels as f32,
        border_color: vk::BorderColor::INT_OPAQUE_BLACK,
        ..Default::default()
    };
    Ok(ctx.device.create_sampler(&info, None).check("vkCreateSampler")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_uniforms_layout() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 3 * 64);
    }

    #[test]
    fn test_projection_flips_y() {
        let u = scene_uniforms(vk::Extent2D { width: 800, height: 600 }, 0.0);
        assert!(u.proj[1][1] < 0.0);
        assert_eq!(Mat4::from_cols_array_2d(&u.model), Mat4::IDENTITY);
    }

    #[test]
    fn test_model_quarter_turn_per_second() {
        let u = scene_uniforms(vk::Extent2D { width: 1, height: 1 }, 1.0);
        let x = Mat4::from_cols_array_2d(&u.model) * Vec4::X;
        assert!((x - Vec4::Y).length() < 1e-5);
    }

    #[test]
    fn test_zero_extent_does_not_divide_by_zero() {
        let u = scene_uniforms(vk::Extent2D { width: 0, height: 0 }, 0.0);
        assert!(u.proj.iter().flatten().all(|v| v.is_finite()));
    }
}
