use std::sync::Arc;

use ash::vk;

use crate::{
    device::{AccelStructureLevel, TriangleGeometry},
    error::Result,
};

use super::{buffer::Buffer, context::Context};

/// The structure object only. Its backing buffer is owned by the device's buffer table, so the
/// registry can track it like any other buffer.
pub struct AccelerationStructure {
    pub inner: vk::AccelerationStructureKHR,
    pub device_address: vk::DeviceAddress,
    context: Arc<Context>,
}

impl AccelerationStructure {
    // See https://github.com/SaschaWillems/Vulkan/blob/a467d941599a2cef5bd0eff696999bca8d75ee23/base/VulkanRaytracingSample.cpp#L149
    pub fn new(
        context: Arc<Context>,
        buffer: &Buffer,
        level: AccelStructureLevel,
        size: vk::DeviceSize,
    ) -> Result<Self> {
        let create_info = vk::AccelerationStructureCreateInfoKHR::builder()
            .buffer(buffer.inner)
            .size(size)
            .ty(structure_type(level));

        let inner = unsafe {
            context
                .acceleration_structure()
                .create_acceleration_structure(&create_info, None)
        }?;

        let device_address = {
            let acceleration_structure_device_address_info =
                vk::AccelerationStructureDeviceAddressInfoKHR::builder()
                    .acceleration_structure(inner);

            unsafe {
                context
                    .acceleration_structure()
                    .get_acceleration_structure_device_address(
                        &acceleration_structure_device_address_info,
                    )
            }
        };

        Ok(Self {
            inner,
            device_address,
            context,
        })
    }
}

impl Drop for AccelerationStructure {
    fn drop(&mut self) {
        unsafe {
            self.context
                .acceleration_structure()
                .destroy_acceleration_structure(self.inner, None);
        }
    }
}

pub fn structure_type(level: AccelStructureLevel) -> vk::AccelerationStructureTypeKHR {
    match level {
        AccelStructureLevel::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        AccelStructureLevel::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
    }
}

/// Device addresses of the buffers a triangle geometry reads. All zero when only querying sizes.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryAddresses {
    pub vertices: vk::DeviceAddress,
    pub indices: vk::DeviceAddress,
    pub transform: vk::DeviceAddress,
}

pub fn triangles(
    geometry: &TriangleGeometry,
    addresses: GeometryAddresses,
) -> vk::AccelerationStructureGeometryKHR {
    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::builder()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: addresses.vertices,
        })
        .vertex_stride(geometry.vertex_stride)
        .max_vertex(geometry.vertex_count.saturating_sub(1))
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: addresses.indices,
        })
        .transform_data(vk::DeviceOrHostAddressConstKHR {
            device_address: addresses.transform,
        })
        .build();

    let flags = if geometry.opaque {
        vk::GeometryFlagsKHR::OPAQUE
    } else {
        vk::GeometryFlagsKHR::NO_DUPLICATE_ANY_HIT_INVOCATION
    };

    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
        .flags(flags)
        .build()
}

pub fn instances(address: vk::DeviceAddress) -> vk::AccelerationStructureGeometryKHR {
    let instances = vk::AccelerationStructureGeometryInstancesDataKHR::builder()
        .array_of_pointers(false)
        .data(vk::DeviceOrHostAddressConstKHR {
            device_address: address,
        })
        .build();

    vk::AccelerationStructureGeometryKHR::builder()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
        .build()
}
