// SPDX-License-Identifier: CEPL-1.0
//! Needs a Vulkan driver; every test returns early when none is present.

use ash::vk;
use prism_render_vk::{read_back_buffer, upload_buffer, upload_image, DeviceContext, VkError};

fn device() -> Option<DeviceContext> {
    match DeviceContext::headless(false) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping: no usable Vulkan device ({e:#})");
            None
        }
    }
}

#[test]
fn buffer_contents_survive_staging_and_read_back() {
    let Some(ctx) = device() else { return };
    let data: Vec<u8> = (0..4096u32).map(|i| (i * 7 % 251) as u8).collect();
    let usage = vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_SRC;

    let buffer = unsafe { upload_buffer(&ctx, usage, &data) }.unwrap();
    assert_eq!(buffer.size, data.len() as u64);
    let back = unsafe { read_back_buffer(&ctx, &buffer) }.unwrap();
    assert_eq!(back, data);
}

#[test]
fn empty_upload_is_rejected() {
    let Some(ctx) = device() else { return };
    let err = unsafe { upload_buffer(&ctx, vk::BufferUsageFlags::STORAGE_BUFFER, &[]) }.err().unwrap();
    assert!(matches!(err.downcast_ref::<VkError>(), Some(VkError::EmptyUpload)));
}

#[test]
fn read_back_requires_transfer_src() {
    let Some(ctx) = device() else { return };
    let buffer = unsafe { upload_buffer(&ctx, vk::BufferUsageFlags::STORAGE_BUFFER, &[1, 2, 3, 4]) }.unwrap();
    assert!(unsafe { read_back_buffer(&ctx, &buffer) }.is_err());
}

#[test]
fn texture_upload_builds_full_mip_chain() {
    let Some(ctx) = device() else { return };
    let pixels = vec![200u8; 64 * 32 * 4];
    match unsafe { upload_image(&ctx, &pixels, 64, 32, vk::Format::R8G8B8A8_SRGB) } {
        Ok(image) => {
            assert_eq!(image.desc.mip_levels, 7);
            assert_eq!(image.extent(), vk::Extent2D { width: 64, height: 32 });
        }
        Err(e) => assert!(
            matches!(e.downcast_ref::<VkError>(), Some(VkError::BlitUnsupported(_))),
            "unexpected error: {e:#}"
        ),
    }
}

#[test]
fn texture_size_mismatch_is_rejected() {
    let Some(ctx) = device() else { return };
    let err = unsafe { upload_image(&ctx, &[0u8; 15], 2, 2, vk::Format::R8G8B8A8_SRGB) }.err().unwrap();
    assert!(matches!(
        err.downcast_ref::<VkError>(),
        Some(VkError::PixelSizeMismatch { expected: 16, actual: 15 })
    ));
}

#[test]
fn headless_context_has_no_push_descriptor_loader() {
    let Some(ctx) = device() else { return };
    let err = ctx.push_descriptor().err().unwrap();
    assert!(matches!(err.downcast_ref::<VkError>(), Some(VkError::MissingExtension(_))));
}
