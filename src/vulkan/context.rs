use std::ffi::CStr;

use ash::{
    extensions::khr::{
        AccelerationStructure, BufferDeviceAddress, DeferredHostOperations, RayTracingPipeline,
        Synchronization2,
    },
    vk::{self, ApplicationInfo, DeviceCreateInfo, DeviceQueueCreateInfo, InstanceCreateInfo},
};
use log::info;

use crate::error::{CoreError, Result};

/// Instance, device and queue. Headless, nothing is ever presented.
pub struct Context {
    _entry: ash::Entry,
    pub instance: ash::Instance,

    pub context_raytracing: ContextRaytracing,
    pub synchronisation2_loader: Synchronization2,

    pub physical_device: vk::PhysicalDevice,
    pub queue_family_index: u32,

    pub device: ash::Device,
    pub queue: vk::Queue,
}

pub struct ContextRaytracing {
    pub acceleration_structure: AccelerationStructure,
    pub physical_device_acceleration_structure_properties_khr:
        vk::PhysicalDeviceAccelerationStructurePropertiesKHR,
}

impl Context {
    pub fn new() -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| CoreError::NoDevice(format!("could not load vulkan library: {e}")))?;

        let instance = {
            let app_info = ApplicationInfo::builder().api_version(vk::API_VERSION_1_3);
            let create_info = InstanceCreateInfo::builder().application_info(&app_info);
            unsafe { entry.create_instance(&create_info, None) }?
        };

        let (physical_device, queue_family_index) = find_physical_device(&instance)?;
        let device = create_logical_device(&instance, physical_device, queue_family_index)?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let synchronisation2_loader = Synchronization2::new(&instance, &device);
        let acceleration_structure = AccelerationStructure::new(&instance, &device);
        let physical_device_acceleration_structure_properties_khr =
            unsafe { AccelerationStructure::get_properties(&instance, physical_device) };

        let name = unsafe {
            CStr::from_ptr(
                instance
                    .get_physical_device_properties(physical_device)
                    .device_name
                    .as_ptr(),
            )
        };
        info!("Using {:?}, queue family {}", name, queue_family_index);

        Ok(Self {
            _entry: entry,
            instance,
            context_raytracing: ContextRaytracing {
                acceleration_structure,
                physical_device_acceleration_structure_properties_khr,
            },
            synchronisation2_loader,
            physical_device,
            queue_family_index,
            device,
            queue,
        })
    }

    pub fn acceleration_structure(&self) -> &AccelerationStructure {
        &self.context_raytracing.acceleration_structure
    }

    pub fn min_scratch_offset_alignment(&self) -> u64 {
        u64::from(
            self.context_raytracing
                .physical_device_acceleration_structure_properties_khr
                .min_acceleration_structure_scratch_offset_alignment,
        )
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe { self.device.destroy_device(None) };

        unsafe { self.instance.destroy_instance(None) };
    }
}

fn required_extensions() -> [&'static CStr; 5] {
    [
        Synchronization2::name(),
        AccelerationStructure::name(),
        RayTracingPipeline::name(),
        DeferredHostOperations::name(),
        BufferDeviceAddress::name(),
    ]
}

fn find_physical_device(instance: &ash::Instance) -> Result<(vk::PhysicalDevice, u32)> {
    let physical_devices = unsafe { instance.enumerate_physical_devices() }?;

    physical_devices
        .into_iter()
        .filter(|pd| {
            let Ok(extension_properties) =
                (unsafe { instance.enumerate_device_extension_properties(*pd) })
            else {
                return false;
            };
            let supported: Vec<_> = extension_properties
                .iter()
                .map(|property| unsafe { CStr::from_ptr(property.extension_name.as_ptr()) })
                .collect();

            required_extensions()
                .iter()
                .all(|required| supported.contains(required))
        })
        .filter_map(|pd| {
            unsafe { instance.get_physical_device_queue_family_properties(pd) }
                .iter()
                .position(|info| info.queue_flags.contains(vk::QueueFlags::COMPUTE))
                .map(|i| (pd, i as u32))
        })
        .min_by_key(|(pd, _)| {
            let device_type = unsafe { instance.get_physical_device_properties(*pd) }.device_type;

            match device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                vk::PhysicalDeviceType::CPU => 3,
                vk::PhysicalDeviceType::OTHER => 4,
                _ => 5,
            }
        })
        .ok_or_else(|| CoreError::NoDevice("no device supports acceleration structures".into()))
}

fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family_index: u32,
) -> Result<ash::Device> {
    let device_extensions = required_extensions().map(|name| name.as_ptr());

    let queue_priorities = [1.0];
    let queue_create_info = DeviceQueueCreateInfo::builder()
        .queue_family_index(queue_family_index)
        .queue_priorities(&queue_priorities);

    let mut physical_device_vulkan13_features = vk::PhysicalDeviceVulkan13Features {
        synchronization2: vk::TRUE,
        ..vk::PhysicalDeviceVulkan13Features::default()
    };

    let mut enabled_buffer_device_address_features =
        vk::PhysicalDeviceBufferDeviceAddressFeatures {
            buffer_device_address: vk::TRUE,
            ..vk::PhysicalDeviceBufferDeviceAddressFeatures::default()
        };

    let mut enabled_acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR {
            acceleration_structure: vk::TRUE,
            ..vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default()
        };

    // Barriers name the ray tracing stages that consume the structures.
    let mut enabled_ray_tracing_pipeline_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR {
            ray_tracing_pipeline: vk::TRUE,
            ..vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default()
        };

    let create_info = DeviceCreateInfo::builder()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&device_extensions)
        .push_next(&mut physical_device_vulkan13_features)
        .push_next(&mut enabled_buffer_device_address_features)
        .push_next(&mut enabled_acceleration_structure_features)
        .push_next(&mut enabled_ray_tracing_pipeline_features);

    Ok(unsafe { instance.create_device(physical_device, &create_info, None) }?)
}
