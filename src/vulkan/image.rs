use std::sync::{Arc, PoisonError};

use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};

use crate::{device::TextureDesc, error::Result};

use super::{buffer::SharedAllocator, context::Context};

/// A single mip, single layer 2D image in device memory.
pub struct Image {
    pub inner: vk::Image,
    pub format: vk::Format,
    pub extent: vk::Extent3D,
    allocation: Option<Allocation>,
    allocator: SharedAllocator,
    context: Arc<Context>,
}

impl Image {
    pub fn new(context: Arc<Context>, allocator: SharedAllocator, desc: &TextureDesc) -> Result<Self> {
        let device = &context.device;
        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        };

        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::STORAGE
                    | vk::ImageUsageFlags::SAMPLED
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&create_info, None) }?;
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name: &desc.name,
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_image(image, None) };
                return Err(err.into());
            }
        };

        unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }?;

        Ok(Self {
            inner: image,
            format: desc.format,
            extent,
            allocation: Some(allocation),
            allocator,
            context,
        })
    }

    pub fn full_subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_image(self.inner, None) };
        if let Some(allocation) = self.allocation.take() {
            let result = self
                .allocator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .free(allocation);
            if let Err(err) = result {
                log::error!("Could not free image memory: {err}");
            }
        }
    }
}
