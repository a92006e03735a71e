// SPDX-License-Identifier: CEPL-1.0
use std::error::Error;
use std::{env, fs, path::PathBuf};

// (source file, stage, minimum Vulkan environment)
const SHADERS: [(&str, shaderc::ShaderKind, shaderc::EnvVersion); 3] = [
    ("shader.vert", shaderc::ShaderKind::Vertex, shaderc::EnvVersion::Vulkan1_0),
    ("shader.frag", shaderc::ShaderKind::Fragment, shaderc::EnvVersion::Vulkan1_0),
    // EXT mesh shaders need SPIR-V 1.4
    ("shader.mesh", shaderc::ShaderKind::Mesh, shaderc::EnvVersion::Vulkan1_2),
];

fn main() -> Result<(), Box<dyn Error>> {
    let out = PathBuf::from(env::var("OUT_DIR")?);
    let src_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?).join("../../shaders");

    let comp = shaderc::Compiler::new().ok_or("shaderc compiler unavailable")?;
    for (name, kind, env_version) in SHADERS {
        let path = src_dir.join(name);
        println!("cargo:rerun-if-changed={}", path.display());
        let src = fs::read_to_string(&path)?;

        let mut opts = shaderc::CompileOptions::new().ok_or("shaderc options unavailable")?;
        opts.set_target_env(shaderc::TargetEnv::Vulkan, env_version as u32);
        if kind == shaderc::ShaderKind::Mesh {
            opts.set_target_spirv(shaderc::SpirvVersion::V1_4);
        }
        opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

        let spv = comp.compile_into_spirv(&src, kind, name, "main", Some(&opts))?;
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())?;
    }

    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
