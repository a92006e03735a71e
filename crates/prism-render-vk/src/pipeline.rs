// SPDX-License-Identifier: CEPL-1.0
//! Descriptor layouts and the graphics pipeline for either geometry path.
//!
//! Set 0 holds per-frame uniforms and the texture. Set 1 is a push
//! descriptor set carrying the geometry storage buffers, so nothing has to
//! be allocated for it.

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use std::borrow::Cow;
use std::io::{Cursor, ErrorKind};
use std::path::Path;
use tracing::debug;

use crate::context::DeviceContext;
use crate::error::{VkError, VkResultExt};

pub const VERTEX_SHADER: &str = "shader.vert.spv";
pub const MESH_SHADER: &str = "shader.mesh.spv";
pub const FRAGMENT_SHADER: &str = "shader.frag.spv";

/// SPIR-V compiled from `shaders/` by the build script.
const BUILTIN_SHADERS: [(&str, &[u8]); 3] = [
    (VERTEX_SHADER, include_bytes!(concat!(env!("OUT_DIR"), "/shader.vert.spv"))),
    (MESH_SHADER, include_bytes!(concat!(env!("OUT_DIR"), "/shader.mesh.spv"))),
    (FRAGMENT_SHADER, include_bytes!(concat!(env!("OUT_DIR"), "/shader.frag.spv"))),
];

/// Geometry stage first, fragment second.
pub fn shader_names(mesh: bool) -> [&'static str; 2] {
    let geometry = if mesh { MESH_SHADER } else { VERTEX_SHADER };
    [geometry, FRAGMENT_SHADER]
}

pub fn builtin_shader(name: &str) -> Option<&'static [u8]> {
    BUILTIN_SHADERS.iter().find(|(n, _)| *n == name).map(|(_, bytes)| *bytes)
}

/// A file named `name` in `dir` overrides the built-in copy.
pub fn shader_bytes(dir: &Path, name: &str) -> Result<Cow<'static, [u8]>> {
    let path = dir.join(name);
    match std::fs::read(&path) {
        Ok(bytes) => {
            debug!("shader {} loaded from disk", path.display());
            Ok(Cow::Owned(bytes))
        }
        Err(e) if e.kind() == ErrorKind::NotFound => builtin_shader(name)
            .map(Cow::Borrowed)
            .ok_or_else(|| anyhow!("no built-in shader named {name}")),
        Err(e) => Err(e).with_context(|| format!("reading shader {}", path.display())),
    }
}

fn geometry_stage(mesh: bool) -> vk::ShaderStageFlags {
    if mesh {
        vk::ShaderStageFlags::MESH_EXT
    } else {
        vk::ShaderStageFlags::VERTEX
    }
}

/// Set 0: uniform buffer at binding 0, sampled texture at binding 1.
pub fn scene_bindings(mesh: bool) -> [vk::DescriptorSetLayoutBinding<'static>; 2] {
    [
        vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: 1,
            stage_flags: geometry_stage(mesh),
            ..Default::default()
        },
        vk::DescriptorSetLayoutBinding {
            binding: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        },
    ]
}

/// Set 1: vertex storage buffer, plus the meshlet buffer on the mesh path.
pub fn geometry_bindings(mesh: bool) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    let count = if mesh { 2 } else { 1 };
    (0..count)
        .map(|binding| vk::DescriptorSetLayoutBinding {
            binding,
            descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: 1,
            stage_flags: geometry_stage(mesh),
            ..Default::default()
        })
        .collect()
}

pub unsafe fn load_shader_module(device: &ash::Device, dir: &Path, name: &str) -> Result<vk::ShaderModule> {
    let bytes = shader_bytes(dir, name)?;
    let code = read_spv(&mut Cursor::new(&bytes[..])).with_context(|| format!("parsing SPIR-V {name}"))?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(device.create_shader_module(&ci, None).check("vkCreateShaderModule")?)
}

pub struct GraphicsPipeline {
    pub scene_set_layout: vk::DescriptorSetLayout,
    pub geometry_set_layout: vk::DescriptorSetLayout,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    mesh: bool,
}

impl GraphicsPipeline {
    pub unsafe fn new(ctx: &DeviceContext, render_pass: vk::RenderPass, shader_dir: &Path) -> Result<Self> {
        let mut gp = Self {
            scene_set_layout: vk::DescriptorSetLayout::null(),
            geometry_set_layout: vk::DescriptorSetLayout::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            mesh: ctx.geometry.is_mesh(),
        };
        let built = gp
            .create_layouts(&ctx.device)
            .and_then(|_| gp.rebuild(ctx, render_pass, shader_dir));
        if let Err(e) = built {
            gp.destroy(&ctx.device);
            return Err(e);
        }
        Ok(gp)
    }

    unsafe fn create_layouts(&mut self, device: &ash::Device) -> Result<()> {
        let scene = scene_bindings(self.mesh);
        let info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: scene.len() as u32,
            p_bindings: scene.as_ptr(),
            ..Default::default()
        };
        self.scene_set_layout = device
            .create_descriptor_set_layout(&info, None)
            .check("vkCreateDescriptorSetLayout")?;

        let geometry = geometry_bindings(self.mesh);
        let info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            flags: vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR,
            binding_count: geometry.len() as u32,
            p_bindings: geometry.as_ptr(),
            ..Default::default()
        };
        self.geometry_set_layout = device
            .create_descriptor_set_layout(&info, None)
            .check("vkCreateDescriptorSetLayout")?;

        let set_layouts = [self.scene_set_layout, self.geometry_set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            set_layout_count: set_layouts.len() as u32,
            p_set_layouts: set_layouts.as_ptr(),
            ..Default::default()
        };
        self.layout = device
            .create_pipeline_layout(&layout_info, None)
            .check("vkCreatePipelineLayout")?;
        Ok(())
    }

    /// Replaces the pipeline object only; layouts survive. Needed whenever the
    /// render pass is recreated against a different color format.
    pub unsafe fn rebuild(&mut self, ctx: &DeviceContext, render_pass: vk::RenderPass, shader_dir: &Path) -> Result<()> {
        let device = &ctx.device;
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }

        let [geom_name, frag_name] = shader_names(self.mesh);
        let geom = load_shader_module(device, shader_dir, geom_name)?;
        let frag = match load_shader_module(device, shader_dir, frag_name) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_shader_module(geom, None);
                return Err(e);
            }
        };

        let result = self.create_pipeline(ctx, render_pass, geom, frag);
        device.destroy_shader_module(geom, None);
        device.destroy_shader_module(frag, None);
        self.pipeline = result?;
        debug!(
            "graphics pipeline built ({} path, {:?})",
            if self.mesh { "mesh" } else { "vertex" },
            ctx.samples
        );
        Ok(())
    }

    unsafe fn create_pipeline(
        &self,
        ctx: &DeviceContext,
        render_pass: vk::RenderPass,
        geom: vk::ShaderModule,
        frag: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: geometry_stage(self.mesh),
                module: geom,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: frag,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        // Vertices are pulled from set 1, so no fixed-function vertex input.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let msaa = ctx.samples != vk::SampleCountFlags::TYPE_1;
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: ctx.samples,
            sample_shading_enable: msaa as vk::Bool32,
            min_sample_shading: if msaa { 0.2 } else { 0.0 },
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: vk::TRUE,
            depth_write_enable: vk::TRUE,
            depth_compare_op: vk::CompareOp::LESS,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        // mesh pipelines must leave both vertex-stage states unset
        let (p_vertex_input_state, p_input_assembly_state) = if self.mesh {
            (std::ptr::null(), std::ptr::null())
        } else {
            (&vertex_input as *const _, &input_assembly as *const _)
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state,
            p_input_assembly_state,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: self.layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };

        let pipelines = ctx
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_info), None)
            .map_err(|(_, err)| VkError::call("vkCreateGraphicsPipelines", err))?;
        Ok(pipelines[0])
    }

    /// Pipeline, then layout, then set layouts.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }
        if self.layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.layout, None);
            self.layout = vk::PipelineLayout::null();
        }
        for set_layout in [&mut self.geometry_set_layout, &mut self.scene_set_layout] {
            if *set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(*set_layout, None);
                *set_layout = vk::DescriptorSetLayout::null();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_names_follow_geometry_path() {
        assert_eq!(shader_names(false), ["shader.vert.spv", "shader.frag.spv"]);
        assert_eq!(shader_names(true)[0], "shader.mesh.spv");
    }

    #[test]
    fn test_builtin_shaders_are_spirv() {
        for name in [VERTEX_SHADER, MESH_SHADER, FRAGMENT_SHADER] {
            let bytes = builtin_shader(name).unwrap();
            let words = read_spv(&mut Cursor::new(bytes)).unwrap();
            assert_eq!(words[0], 0x0723_0203, "{name}");
        }
        assert!(builtin_shader("shader.geom.spv").is_none());
    }

    #[test]
    fn test_missing_shader_dir_uses_builtin() {
        let bytes = shader_bytes(Path::new("no/such/shader/dir"), VERTEX_SHADER).unwrap();
        assert!(matches!(bytes, Cow::Borrowed(_)));
        assert_eq!(&bytes[..], builtin_shader(VERTEX_SHADER).unwrap());
    }

    #[test]
    fn test_shader_file_on_disk_wins() {
        let dir = std::env::temp_dir().join(format!("prism-shaders-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(FRAGMENT_SHADER), [3u8, 2, 35, 7, 0, 0, 1, 0]).unwrap();
        let bytes = shader_bytes(&dir, FRAGMENT_SHADER).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        assert_eq!(&bytes[..], &[3u8, 2, 35, 7, 0, 0, 1, 0]);
    }

    #[test]
    fn test_geometry_set_has_meshlets_only_on_mesh_path() {
        let vertex = geometry_bindings(false);
        assert_eq!(vertex.len(), 1);
        assert_eq!(vertex[0].stage_flags, vk::ShaderStageFlags::VERTEX);

        let mesh = geometry_bindings(true);
        assert_eq!(mesh.len(), 2);
        assert_eq!(mesh[1].binding, 1);
        assert!(mesh
            .iter()
            .all(|b| b.descriptor_type == vk::DescriptorType::STORAGE_BUFFER
                && b.stage_flags == vk::ShaderStageFlags::MESH_EXT));
    }

    #[test]
    fn test_scene_set_texture_is_fragment_only() {
        let b = scene_bindings(true);
        assert_eq!(b[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(b[0].stage_flags, vk::ShaderStageFlags::MESH_EXT);
        assert_eq!(b[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
    }
}
