// SPDX-License-Identifier: CEPL-1.0
//! Buffer and image owners. Each one frees its handles on drop in the
//! order view -> image/buffer -> memory, so the device must outlive them.

use anyhow::Result;
use ash::vk;

use crate::error::{VkError, VkResultExt};

/// First memory type allowed by `type_bits` whose flags contain `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, VkError> {
    (0..props.memory_type_count)
        .find(|&i| type_bits & (1 << i) != 0 && props.memory_types[i as usize].property_flags.contains(flags))
        .ok_or(VkError::NoMemoryType { type_bits, flags })
}

pub struct GpuBuffer {
    device: ash::Device,
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub usage: vk::BufferUsageFlags,
}

impl GpuBuffer {
    /// `queue_families` is only read for concurrent sharing.
    pub unsafe fn new(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        flags: vk::MemoryPropertyFlags,
        sharing: (vk::SharingMode, &[u32]),
    ) -> Result<Self> {
        let (sharing_mode, queue_families) = sharing;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode,
            queue_family_index_count: queue_families.len() as u32,
            p_queue_family_indices: queue_families.as_ptr(),
            ..Default::default()
        };
        let buffer = device.create_buffer(&bci, None).check("vkCreateBuffer")?;
        // From here on, drop cleans up whatever got created.
        let mut owned = Self {
            device: device.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
            usage,
        };

        let req = device.get_buffer_memory_requirements(buffer);
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: find_memory_type(mem_props, req.memory_type_bits, flags)?,
            ..Default::default()
        };
        owned.memory = device.allocate_memory(&alloc, None).check("vkAllocateMemory")?;
        device
            .bind_buffer_memory(buffer, owned.memory, 0)
            .check("vkBindBufferMemory")?;
        Ok(owned)
    }

    /// Copies `bytes` into host-visible memory at offset 0.
    pub unsafe fn write(&self, bytes: &[u8]) -> Result<()> {
        let ptr = self
            .device
            .map_memory(self.memory, 0, bytes.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
            .check("vkMapMemory")?;
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr as *mut u8, bytes.len());
        self.device.unmap_memory(self.memory);
        Ok(())
    }

    /// Reads `len` bytes from host-visible memory.
    pub unsafe fn read(&self, len: usize) -> Result<Vec<u8>> {
        let ptr = self
            .device
            .map_memory(self.memory, 0, len as vk::DeviceSize, vk::MemoryMapFlags::empty())
            .check("vkMapMemory")?;
        let out = std::slice::from_raw_parts(ptr as *const u8, len).to_vec();
        self.device.unmap_memory(self.memory);
        Ok(out)
    }

    /// Keeps host-visible memory mapped for the buffer's lifetime.
    pub unsafe fn map_persistent(&self) -> Result<*mut u8> {
        let ptr = self
            .device
            .map_memory(self.memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            .check("vkMapMemory")?;
        Ok(ptr as *mut u8)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_buffer(self.buffer, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

pub struct GpuImage {
    device: ash::Device,
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub desc: ImageDesc,
}

impl GpuImage {
    /// Device-local 2D image with a view covering every mip level.
    pub unsafe fn new(
        device: &ash::Device,
        mem_props: &vk::PhysicalDeviceMemoryProperties,
        desc: ImageDesc,
    ) -> Result<Self> {
        let ici = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: desc.format,
            extent: vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            },
            mip_levels: desc.mip_levels,
            array_layers: 1,
            samples: desc.samples,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: desc.usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = device.create_image(&ici, None).check("vkCreateImage")?;
        let mut owned = Self {
            device: device.clone(),
            image,
            memory: vk::DeviceMemory::null(),
            view: vk::ImageView::null(),
            desc,
        };

        let req = device.get_image_memory_requirements(image);
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: find_memory_type(
                mem_props,
                req.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?,
            ..Default::default()
        };
        owned.memory = device.allocate_memory(&alloc, None).check("vkAllocateMemory")?;
        device
            .bind_image_memory(image, owned.memory, 0)
            .check("vkBindImageMemory")?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: desc.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: desc.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        owned.view = device.create_image_view(&view_ci, None).check("vkCreateImageView")?;
        Ok(owned)
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.desc.width,
            height: self.desc.height,
        }
    }
}

impl Drop for GpuImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            if self.memory != vk::DeviceMemory::null() {
                self.device.free_memory(self.memory, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            p.memory_types[i].property_flags = flags;
        }
        p
    }

    #[test]
    fn test_find_memory_type_respects_type_bits() {
        let p = props(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&p, 0b111, host).unwrap(), 1);
        assert_eq!(
            find_memory_type(&p, 0b100, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            2
        );
        assert_eq!(
            find_memory_type(&p, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn test_missing_memory_type_is_fatal() {
        let p = props(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&p, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap_err();
        assert!(matches!(err, VkError::NoMemoryType { type_bits: 1, .. }));
    }
}
