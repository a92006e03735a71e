// SPDX-License-Identifier: CEPL-1.0
//! Window-system glue. Everything the app needs from winit goes through here.

pub use winit;

use anyhow::{Context, Result};
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

/// Creates the main window at the requested physical size.
pub fn create_window(event_loop: &ActiveEventLoop, title: &str, width: u32, height: u32) -> Result<Window> {
    let attrs = Window::default_attributes()
        .with_title(title)
        .with_inner_size(PhysicalSize::new(width.max(1), height.max(1)));
    let window = event_loop.create_window(attrs).context("create_window")?;
    tracing::info!("window created ({}x{})", width, height);
    Ok(window)
}

/// Pixel size of the drawable area. Zero on either axis while minimised.
pub fn framebuffer_size(window: &Window) -> (u32, u32) {
    let size = window.inner_size();
    (size.width, size.height)
}
