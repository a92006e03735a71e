// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

pub mod mesh;
pub mod scheduler;
pub mod timing;

pub use mesh::{Meshlet, SceneData, TextureData, Vertex};
pub use scheduler::{Acquire, FrameBackend, FrameOutcome, FrameScheduler, Present, SlotState};
pub use timing::{FrameReport, FrameStats, GpuTimings};

/// Number of frames the CPU may record ahead of the GPU.
pub const FRAMES_IN_FLIGHT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_zero_area(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Requested presentation mode. The backend falls back to FIFO when the
/// surface does not offer the requested one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentModePref {
    #[default]
    Immediate,
    Mailbox,
    Fifo,
}

#[derive(Clone, Debug)]
pub struct RendererSettings {
    pub clear_color: [f32; 4],
    pub present_mode: PresentModePref,
    /// Upper bound on the MSAA sample count; the device limit still applies.
    pub max_msaa_samples: u32,
    pub validation: bool,
    pub require_discrete_gpu: bool,
    /// Use the mesh-shading geometry path when the device supports it.
    pub prefer_mesh_shading: bool,
    pub shader_dir: PathBuf,
    pub frames_in_flight: usize,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            present_mode: PresentModePref::default(),
            max_msaa_samples: 8,
            validation: cfg!(debug_assertions),
            require_discrete_gpu: true,
            prefer_mesh_shading: false,
            shader_dir: PathBuf::from("shaders"),
            frames_in_flight: FRAMES_IN_FLIGHT,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RendererSettings,
        scene: &SceneData,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;

    /// Runs one scheduler iteration. Returns a report roughly every two seconds.
    fn render(&mut self) -> Result<Option<FrameReport>>;

    fn triangle_count(&self) -> usize;

    /// Drains outstanding GPU work before teardown.
    fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Window title line shown while running.
pub fn format_title(report: &FrameReport, triangles: usize) -> String {
    match report.gpu_ms {
        Some(ms) => format!(
            "CPU: {:.1} FPS, GPU: {:.3}ms (avg {} frames), Triangles: {}",
            report.cpu_fps, ms, report.gpu_samples, triangles
        ),
        None => format!("CPU: {:.1} FPS, GPU: n/a, Triangles: {}", report.cpu_fps, triangles),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_format() {
        let report = FrameReport {
            cpu_fps: 143.26,
            gpu_ms: Some(1.23456),
            gpu_samples: 30,
        };
        assert_eq!(
            format_title(&report, 1000),
            "CPU: 143.3 FPS, GPU: 1.235ms (avg 30 frames), Triangles: 1000"
        );
    }

    #[test]
    fn test_title_without_gpu_samples() {
        let report = FrameReport {
            cpu_fps: 60.0,
            gpu_ms: None,
            gpu_samples: 0,
        };
        assert_eq!(format_title(&report, 12), "CPU: 60.0 FPS, GPU: n/a, Triangles: 12");
    }

    #[test]
    fn test_zero_area() {
        assert!(RenderSize { width: 0, height: 5 }.is_zero_area());
        assert!(!RenderSize { width: 5, height: 5 }.is_zero_area());
    }
}
