// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use prism_core::init_tracing;
use prism_render::{format_title, RenderSize, Renderer, RendererSettings, SceneData};
use prism_render_vk::VkRenderer;
use tracing::{error, info};

use prism_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    raw_window_handle::{HasDisplayHandle, HasWindowHandle},
    window::{Window, WindowId},
};

mod assets;
mod config;

use config::{load_cfg, AppCfg, Args};

struct App {
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,

    cfg: AppCfg,
    settings: RendererSettings,
    scene: SceneData,
    exiting: bool,
    paused: bool,
    /// First fatal error; returned from main after the loop exits.
    failure: Option<anyhow::Error>,
}

impl App {
    fn fail(&mut self, event_loop: &ActiveEventLoop, e: anyhow::Error) {
        error!("{e:#}");
        self.shutdown();
        self.failure.get_or_insert(e);
        event_loop.exit();
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let w = &self.cfg.window;
        let window = prism_platform::create_window(event_loop, &w.title, w.width, w.height)?;
        let (width, height) = prism_platform::framebuffer_size(&window);
        self.render_size = RenderSize { width, height };

        let wh = window.window_handle().map_err(|e| anyhow::anyhow!("{e}"))?;
        let dh = window.display_handle().map_err(|e| anyhow::anyhow!("{e}"))?;
        let renderer = VkRenderer::new(&wh, &dh, self.render_size, &self.settings, &self.scene)?;
        info!("renderer up, {} triangles", renderer.triangle_count());

        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Drains the GPU, then drops the renderer before the window it draws into.
    fn shutdown(&mut self) {
        self.exiting = true;
        if let Some(r) = self.renderer.as_mut() {
            if let Err(e) = r.shutdown() {
                error!("shutdown: {e:#}");
            }
        }
        self.renderer = None;
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init(event_loop) {
                self.fail(event_loop, e.context("renderer init"));
                return;
            }
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        self.paused = self.render_size.is_zero_area();
        info!("resumed → paused={}", self.paused);

        if !self.paused {
            if let Some(w) = &self.window {
                w.request_redraw();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                let now_paused = self.render_size.is_zero_area();
                if self.paused != now_paused {
                    self.paused = now_paused;
                    info!(
                        "Resized → {}x{} (paused={})",
                        self.render_size.width, self.render_size.height, self.paused
                    );
                }

                let size = self.render_size;
                if let Some(r) = self.renderer.as_mut() {
                    if let Err(e) = r.resize(size) {
                        self.fail(event_loop, e.context("resize"));
                        return;
                    }
                }
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting || self.paused {
                    return;
                }
                let Some(r) = self.renderer.as_mut() else { return };
                match r.render() {
                    Ok(Some(report)) => {
                        let title = format_title(&report, r.triangle_count());
                        info!("{title}");
                        if let Some(w) = &self.window {
                            w.set_title(&title);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => self.fail(event_loop, e.context("render")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        if self.paused {
            // minimised → sleep until the next event
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let mut cfg = load_cfg(&args.config);
    cfg.apply_args(&args);

    let scene = assets::load_scene(cfg.assets.model.as_deref(), cfg.assets.texture.as_deref())?;
    let settings = cfg.renderer_settings();
    info!(
        "present mode {:?}, msaa cap {}, validation {}, shaders {}",
        settings.present_mode,
        settings.max_msaa_samples,
        settings.validation,
        settings.shader_dir.display()
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        window: None,
        renderer: None,
        render_size: RenderSize { width: 1, height: 1 },
        cfg,
        settings,
        scene,
        exiting: false,
        paused: false,
        failure: None,
    };

    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
