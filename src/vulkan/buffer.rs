use std::sync::{Arc, Mutex, PoisonError};

use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator},
    MemoryLocation,
};

use crate::{
    arena::ResourceHandle,
    device,
    error::{CoreError, Result},
};

use super::context::Context;

pub type SharedAllocator = Arc<Mutex<Allocator>>;

pub struct Buffer {
    pub inner: vk::Buffer,
    pub usage: vk::BufferUsageFlags,
    pub size: vk::DeviceSize,
    pub device_address: vk::DeviceAddress,
    allocation: Option<Allocation>,
    allocator: SharedAllocator,
    context: Arc<Context>,
}

impl Buffer {
    /// `alignment` raises the allocation's alignment above what the driver asks for, which
    /// scratch memory needs.
    pub fn new(
        context: Arc<Context>,
        allocator: SharedAllocator,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: device::MemoryLocation,
        alignment: u64,
    ) -> Result<Self> {
        let device = &context.device;
        let usage = usage | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.create_buffer(&create_info, None) }?;

        let mut requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        requirements.alignment = requirements.alignment.max(alignment);

        let allocation = allocator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: match location {
                    device::MemoryLocation::Device => MemoryLocation::GpuOnly,
                    device::MemoryLocation::Upload => MemoryLocation::CpuToGpu,
                    device::MemoryLocation::Readback => MemoryLocation::GpuToCpu,
                },
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(err) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err.into());
            }
        };

        unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }?;

        let info = vk::BufferDeviceAddressInfo::builder().buffer(buffer);
        let device_address = unsafe { device.get_buffer_device_address(&info) };

        Ok(Self {
            inner: buffer,
            usage,
            size,
            device_address,
            allocation: Some(allocation),
            allocator,
            context,
        })
    }

    pub fn write(&mut self, handle: ResourceHandle, offset: u64, data: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|a| a.mapped_slice_mut())
            .ok_or(CoreError::NotHostVisible(handle))?;
        let start = offset as usize;
        mapped[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, handle: ResourceHandle, offset: u64, out: &mut [u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_slice())
            .ok_or(CoreError::NotHostVisible(handle))?;
        let start = offset as usize;
        out.copy_from_slice(&mapped[start..start + out.len()]);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_buffer(self.inner, None) };
        if let Some(allocation) = self.allocation.take() {
            let result = self
                .allocator
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .free(allocation);
            if let Err(err) = result {
                log::error!("Could not free buffer memory: {err}");
            }
        }
    }
}
