// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use std::panic::Location;
use thiserror::Error;

/// Fatal Vulkan-side failures. Surface staleness is not represented here;
/// it is reported through the scheduler's `Acquire`/`Present` outcomes.
#[derive(Debug, Error)]
pub enum VkError {
    #[error("{op} failed with {code:?} ({raw}) at {location}", raw = .code.as_raw())]
    Call {
        op: &'static str,
        code: vk::Result,
        location: &'static Location<'static>,
    },
    #[error("vulkan loader unavailable: {0}")]
    Loader(#[from] ash::LoadingError),
    #[error("no physical device satisfies the renderer requirements")]
    NoSuitableDevice,
    #[error("required instance layer not available: {0}")]
    MissingLayer(String),
    #[error("required instance extension not available: {0}")]
    MissingExtension(String),
    #[error("no memory type matches bits {type_bits:#b} with {flags:?}")]
    NoMemoryType {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },
    #[error("format {0:?} does not support linear-filtered blits")]
    BlitUnsupported(vk::Format),
    #[error("refusing to upload an empty buffer")]
    EmptyUpload,
    #[error("pixel data is {actual} bytes, expected {expected}")]
    PixelSizeMismatch { expected: usize, actual: usize },
}

impl VkError {
    #[track_caller]
    pub fn call(op: &'static str, code: vk::Result) -> Self {
        VkError::Call {
            op,
            code,
            location: Location::caller(),
        }
    }
}

pub trait VkResultExt<T> {
    /// Tags a raw Vulkan result with the call name and the caller's location.
    fn check(self, op: &'static str) -> Result<T, VkError>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    #[track_caller]
    fn check(self, op: &'static str) -> Result<T, VkError> {
        match self {
            Ok(v) => Ok(v),
            Err(code) => Err(VkError::call(op, code)),
        }
    }
}
