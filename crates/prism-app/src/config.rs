// SPDX-License-Identifier: CEPL-1.0
use clap::Parser;
use prism_render::{PresentModePref, RendererSettings};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_CONFIG: &str = "prism.toml";

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file; defaults apply when it does not exist
    #[arg(long, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,
    /// OBJ model to display (overrides [assets].model)
    #[arg(long)]
    pub model: Option<PathBuf>,
    /// Texture image (overrides [assets].texture)
    #[arg(long)]
    pub texture: Option<PathBuf>,
    /// Directory whose `*.spv` files override the built-in shaders
    #[arg(long)]
    pub shaders: Option<PathBuf>,
    #[arg(long)]
    pub no_validation: bool,
    /// Accept integrated or software devices
    #[arg(long)]
    pub allow_integrated: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Immediate,
    Mailbox,
    Fifo,
}

impl From<PresentModeCfg> for PresentModePref {
    fn from(m: PresentModeCfg) -> Self {
        match m {
            PresentModeCfg::Immediate => PresentModePref::Immediate,
            PresentModeCfg::Mailbox => PresentModePref::Mailbox,
            PresentModeCfg::Fifo => PresentModePref::Fifo,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowCfg {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_title")]
    pub title: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderCfg {
    #[serde(default = "default_clear")]
    pub clear_color: [f32; 4],
    #[serde(default)]
    pub present_mode: PresentModeCfg,
    #[serde(default = "default_msaa")]
    pub max_msaa_samples: u32,
    /// Unset means on in debug builds.
    #[serde(default)]
    pub validation: Option<bool>,
    #[serde(default = "default_true")]
    pub require_discrete_gpu: bool,
    #[serde(default)]
    pub mesh_shading: bool,
    #[serde(default = "default_shader_dir")]
    pub shader_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AssetsCfg {
    #[serde(default)]
    pub model: Option<PathBuf>,
    #[serde(default)]
    pub texture: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppCfg {
    #[serde(default)]
    pub window: WindowCfg,
    #[serde(default)]
    pub render: RenderCfg,
    #[serde(default)]
    pub assets: AssetsCfg,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            present_mode: PresentModeCfg::default(),
            max_msaa_samples: default_msaa(),
            validation: None,
            require_discrete_gpu: true,
            mesh_shading: false,
            shader_dir: default_shader_dir(),
        }
    }
}

fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_title() -> String {
    "prism".into()
}
fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}
fn default_msaa() -> u32 {
    8
}
fn default_true() -> bool {
    true
}
fn default_shader_dir() -> PathBuf {
    PathBuf::from("shaders")
}

impl AppCfg {
    /// Command-line values win over the file.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(m) = &args.model {
            self.assets.model = Some(m.clone());
        }
        if let Some(t) = &args.texture {
            self.assets.texture = Some(t.clone());
        }
        if let Some(s) = &args.shaders {
            self.render.shader_dir = s.clone();
        }
        if args.no_validation {
            self.render.validation = Some(false);
        }
        if args.allow_integrated {
            self.render.require_discrete_gpu = false;
        }
    }

    pub fn renderer_settings(&self) -> RendererSettings {
        let r = &self.render;
        RendererSettings {
            clear_color: r.clear_color,
            present_mode: r.present_mode.into(),
            max_msaa_samples: r.max_msaa_samples.max(1),
            validation: r.validation.unwrap_or(cfg!(debug_assertions)),
            require_discrete_gpu: r.require_discrete_gpu,
            prefer_mesh_shading: r.mesh_shading,
            shader_dir: r.shader_dir.clone(),
            ..RendererSettings::default()
        }
    }
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

/// Missing file yields defaults; a malformed one is reported and ignored.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("ignoring {}: {e}", path.display());
            AppCfg::default()
        }),
        Err(_) => {
            debug!("{} not found, using defaults", path.display());
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg = parse_cfg("").unwrap();
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Immediate);
        assert_eq!(cfg.render.max_msaa_samples, 8);
        assert!(cfg.render.require_discrete_gpu);
        assert!(cfg.assets.model.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let cfg = parse_cfg(
            r#"
            [render]
            present_mode = "mailbox"
            clear_color = [1.0, 0.0, 0.0, 1.0]
            mesh_shading = true

            [assets]
            model = "models/bunny.obj"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.render.present_mode, PresentModeCfg::Mailbox);
        assert_eq!(cfg.render.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(cfg.window.title, "prism");
        assert_eq!(cfg.assets.model.as_deref(), Some(Path::new("models/bunny.obj")));

        let s = cfg.renderer_settings();
        assert_eq!(s.present_mode, PresentModePref::Mailbox);
        assert!(s.prefer_mesh_shading);
        assert_eq!(s.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(s.frames_in_flight, prism_render::FRAMES_IN_FLIGHT);
    }

    #[test]
    fn test_unknown_present_mode_is_an_error() {
        assert!(parse_cfg("[render]\npresent_mode = \"vsync\"").is_err());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let cfg = load_cfg(Path::new("definitely/not/here/prism.toml"));
        assert_eq!(cfg.window.height, 720);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut cfg = parse_cfg("[render]\nvalidation = true\nshader_dir = \"a\"").unwrap();
        let args = Args::parse_from([
            "prism",
            "--shaders",
            "b",
            "--no-validation",
            "--allow-integrated",
            "--texture",
            "t.png",
        ]);
        cfg.apply_args(&args);
        let s = cfg.renderer_settings();
        assert_eq!(s.shader_dir, PathBuf::from("b"));
        assert!(!s.validation);
        assert!(!s.require_discrete_gpu);
        assert_eq!(cfg.assets.texture.as_deref(), Some(Path::new("t.png")));
        assert_eq!(args.config, PathBuf::from(DEFAULT_CONFIG));
    }
}
