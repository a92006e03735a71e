// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use std::time::Instant;
use tracing::{info, trace};

use prism_render::{
    FrameBackend, FrameOutcome, FrameReport, FrameScheduler, RenderSize, Renderer, RendererSettings, SceneData,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod backend;
pub mod context;
pub mod error;
pub mod frame;
pub mod mipmap;
pub mod pipeline;
pub mod resource;
pub mod scene;
pub mod swapchain;
pub mod timing;
pub mod upload;

pub use backend::VkFrameBackend;
pub use context::{DeviceContext, GeometryPath, QueueFamilies};
pub use error::{VkError, VkResultExt};
pub use resource::{GpuBuffer, GpuImage};
pub use upload::{read_back_buffer, upload_buffer, upload_image};

pub struct VkRenderer {
    scheduler: FrameScheduler,
    backend: VkFrameBackend,
    triangles: usize,
    paused: bool,
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: &RendererSettings,
        scene: &SceneData,
    ) -> Result<Self> {
        let backend = VkFrameBackend::new(window, display, size, settings, scene)?;
        Ok(Self {
            scheduler: FrameScheduler::new(settings.frames_in_flight, Instant::now()),
            backend,
            triangles: scene.triangle_count(),
            paused: size.is_zero_area(),
        })
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        self.backend.set_size(size);
        if size.is_zero_area() {
            if !self.paused {
                info!("vk: resize to 0x0 → paused=true");
            }
            self.paused = true;
            return Ok(());
        }
        if self.paused {
            info!("vk: resize to {}x{} → paused=false", size.width, size.height);
        }
        self.paused = false;
        self.backend.recreate_swapchain()
    }

    // STRICT PER-FRAME ORDER (see FrameScheduler::run_frame):
    // wait slot fence -> acquire -> reset + record -> submit -> present -> advance -> poll timestamps
    fn render(&mut self) -> Result<Option<FrameReport>> {
        if self.paused {
            return Ok(None);
        }
        // minimised without a resize event; skip until the surface has area again
        if self.backend.surface_is_zero_area()? {
            trace!("vk: current_extent is 0x0, frame skipped");
            return Ok(None);
        }
        match self.scheduler.run_frame(&mut self.backend, Instant::now())? {
            FrameOutcome::Presented { report, .. } => Ok(report),
            FrameOutcome::Abandoned { .. } => Ok(None),
        }
    }

    fn triangle_count(&self) -> usize {
        self.triangles
    }

    fn shutdown(&mut self) -> Result<()> {
        self.scheduler.shutdown(&mut self.backend)
    }
}
