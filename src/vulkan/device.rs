use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use log::{debug, info};

use crate::{
    arena::{AccelStructureId, Arena, PipelineId, QueryPoolId, ResourceHandle},
    device::{
        AccelStructure, AccelStructureLevel, BufferDesc, BufferSlice, BuildSizes,
        CommandList, ComputePipelineDesc, Device, DeviceLimits, GeometryInput, MemoryLocation,
        TextureDesc,
    },
    error::Result,
    vulkan::sync_manager::{
        resource_access::{ResourceKind, ResourceState},
        ResourceStateRegistry,
    },
};

use super::{
    acceleration_structure::{instances, structure_type, triangles, AccelerationStructure},
    buffer::{Buffer, SharedAllocator},
    command_buffer::CommandBuffer,
    command_pool::CommandPool,
    compute_pipeline::ComputePipeline,
    context::Context,
    frame_ring::FrameRing,
    image::Image,
    query_pool::QueryPool,
};

/// Structure buffers must start at a multiple of 256 bytes.
const STRUCTURE_ALIGNMENT: u64 = 256;

/// Every live Vulkan object the core refers to by handle.
///
/// Looking up a handle that is not live panics, like the registry does.
pub struct Resources {
    buffers: HashMap<ResourceHandle, Buffer>,
    images: HashMap<ResourceHandle, Image>,
    structures: Arena<AccelStructureId, AccelerationStructure>,
    query_pools: Arena<QueryPoolId, QueryPool>,
    pipelines: Arena<PipelineId, ComputePipeline>,
}

impl Resources {
    fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            images: HashMap::new(),
            structures: Arena::new(),
            query_pools: Arena::new(),
            pipelines: Arena::new(),
        }
    }

    pub fn buffer(&self, handle: ResourceHandle) -> &Buffer {
        match self.buffers.get(&handle) {
            Some(buffer) => buffer,
            None => panic!("{handle:?} is not a live buffer"),
        }
    }

    pub fn image(&self, handle: ResourceHandle) -> Option<&Image> {
        self.images.get(&handle)
    }

    pub fn structure(&self, id: AccelStructureId) -> &AccelerationStructure {
        match self.structures.get(id) {
            Some(structure) => structure,
            None => panic!("{id:?} is not a live acceleration structure"),
        }
    }

    pub fn query_pool(&self, id: QueryPoolId) -> &QueryPool {
        match self.query_pools.get(id) {
            Some(pool) => pool,
            None => panic!("{id:?} is not a live query pool"),
        }
    }

    pub fn pipeline(&self, id: PipelineId) -> &ComputePipeline {
        match self.pipelines.get(id) {
            Some(pipeline) => pipeline,
            None => panic!("{id:?} is not a live pipeline"),
        }
    }

    pub fn address(&self, slice: BufferSlice) -> vk::DeviceAddress {
        self.buffer(slice.buffer).device_address + slice.offset
    }

    fn buffer_mut(&mut self, handle: ResourceHandle) -> &mut Buffer {
        match self.buffers.get_mut(&handle) {
            Some(buffer) => buffer,
            None => panic!("{handle:?} is not a live buffer"),
        }
    }
}

/// [`Device`] on top of a headless Vulkan 1.3 context.
pub struct VulkanDevice {
    // Dropped in declaration order: every object before the allocator, the allocator before the
    // context.
    resources: Resources,
    frame_ring: FrameRing,
    command_pool: CommandPool,
    allocator: SharedAllocator,
    context: Arc<Context>,
}

impl VulkanDevice {
    pub fn new(queued_frames: u32) -> Result<Self> {
        let context = Arc::new(Context::new()?);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: context.instance.clone(),
            device: context.device.clone(),
            physical_device: context.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        })?;
        let allocator = Arc::new(Mutex::new(allocator));

        let command_pool = CommandPool::new(context.clone())?;
        let frame_ring = FrameRing::new(command_pool.clone(), queued_frames)?;

        info!(
            "Vulkan device ready, scratch alignment {}, {} queued frames",
            context.min_scratch_offset_alignment(),
            queued_frames
        );
        Ok(Self {
            resources: Resources::new(),
            frame_ring,
            command_pool,
            allocator,
            context,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    fn new_buffer(
        &self,
        name: &str,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        alignment: u64,
    ) -> Result<Buffer> {
        Buffer::new(
            self.context.clone(),
            self.allocator.clone(),
            name,
            size.max(4),
            usage,
            location,
            alignment,
        )
    }
}

impl Device for VulkanDevice {
    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            scratch_offset_alignment: self.context.min_scratch_offset_alignment(),
        }
    }

    fn create_buffer(
        &mut self,
        registry: &mut ResourceStateRegistry,
        desc: &BufferDesc,
    ) -> Result<ResourceHandle> {
        let alignment = if desc.usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
            self.context.min_scratch_offset_alignment()
        } else {
            1
        };
        let buffer = self.new_buffer(&desc.name, desc.size, desc.usage, desc.location, alignment)?;
        let handle = registry.register(
            ResourceKind::Buffer,
            desc.name.clone(),
            ResourceState::buffer(desc.initial_access),
        );
        self.resources.buffers.insert(handle, buffer);
        Ok(handle)
    }

    fn destroy_buffer(&mut self, registry: &mut ResourceStateRegistry, buffer: ResourceHandle) {
        registry.unregister(buffer);
        self.resources.buffers.remove(&buffer);
    }

    fn write_buffer(&mut self, buffer: ResourceHandle, offset: u64, data: &[u8]) -> Result<()> {
        self.resources.buffer_mut(buffer).write(buffer, offset, data)
    }

    fn read_buffer(&self, buffer: ResourceHandle, offset: u64, out: &mut [u8]) -> Result<()> {
        self.resources.buffer(buffer).read(buffer, offset, out)
    }

    fn buffer_address(&self, buffer: ResourceHandle) -> u64 {
        self.resources.buffer(buffer).device_address
    }

    fn create_texture(
        &mut self,
        registry: &mut ResourceStateRegistry,
        desc: &TextureDesc,
    ) -> Result<ResourceHandle> {
        let image = Image::new(self.context.clone(), self.allocator.clone(), desc)?;
        let handle = registry.register(ResourceKind::Texture, desc.name.clone(), ResourceState::UNUSED);
        self.resources.images.insert(handle, image);
        Ok(handle)
    }

    fn destroy_texture(&mut self, registry: &mut ResourceStateRegistry, texture: ResourceHandle) {
        registry.unregister(texture);
        self.resources.images.remove(&texture);
    }

    fn acceleration_structure_sizes(
        &self,
        level: AccelStructureLevel,
        flags: vk::BuildAccelerationStructureFlagsKHR,
        input: GeometryInput<'_>,
    ) -> BuildSizes {
        let (geometries, max_primitive_counts): (Vec<_>, Vec<_>) = match input {
            GeometryInput::Triangles(triangle_geometries) => triangle_geometries
                .iter()
                .map(|g| (triangles(g, Default::default()), g.primitive_count()))
                .unzip(),
            GeometryInput::Instances { count } => (vec![instances(0)], vec![count]),
        };

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::builder()
            .ty(structure_type(level))
            .flags(flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let sizes = unsafe {
            self.context
                .acceleration_structure()
                .get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &max_primitive_counts,
                )
        };
        BuildSizes {
            structure: sizes.acceleration_structure_size,
            build_scratch: sizes.build_scratch_size,
            update_scratch: sizes.update_scratch_size,
        }
    }

    fn create_acceleration_structure(
        &mut self,
        registry: &mut ResourceStateRegistry,
        name: &str,
        level: AccelStructureLevel,
        size: u64,
    ) -> Result<AccelStructure> {
        let buffer = self.new_buffer(
            name,
            size,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
            MemoryLocation::Device,
            STRUCTURE_ALIGNMENT,
        )?;
        let structure = AccelerationStructure::new(self.context.clone(), &buffer, level, size)?;

        let buffer_handle = registry.register(ResourceKind::Buffer, name, ResourceState::UNUSED);
        self.resources.buffers.insert(buffer_handle, buffer);
        let id = self.resources.structures.insert(structure);
        debug!("Created {level:?} structure {name} of {size} bytes");

        Ok(AccelStructure {
            id,
            buffer: buffer_handle,
            size,
        })
    }

    fn destroy_acceleration_structure(
        &mut self,
        registry: &mut ResourceStateRegistry,
        structure: AccelStructure,
    ) {
        // The structure must go before the memory it lives in.
        self.resources.structures.remove(structure.id);
        self.destroy_buffer(registry, structure.buffer);
    }

    fn acceleration_structure_address(&self, structure: AccelStructureId) -> u64 {
        self.resources.structure(structure).device_address
    }

    fn create_query_pool(&mut self, count: u32) -> Result<QueryPoolId> {
        let pool = QueryPool::new(self.context.clone(), count)?;
        Ok(self.resources.query_pools.insert(pool))
    }

    fn destroy_query_pool(&mut self, pool: QueryPoolId) {
        self.resources.query_pools.remove(pool);
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<PipelineId> {
        let pipeline = ComputePipeline::new(self.context.clone(), desc)?;
        Ok(self.resources.pipelines.insert(pipeline))
    }

    fn destroy_compute_pipeline(&mut self, pipeline: PipelineId) {
        self.resources.pipelines.remove(pipeline);
    }

    fn submit_and_wait(&mut self, commands: CommandList) -> Result<()> {
        let command_buffer = CommandBuffer::allocate(self.command_pool.clone())?;
        command_buffer.record(&self.resources, commands)?;
        command_buffer.submit(vk::Fence::null())?;
        unsafe { self.context.device.queue_wait_idle(self.context.queue) }?;
        Ok(())
    }

    fn begin_frame(&mut self, frame_index: u64) -> Result<()> {
        self.frame_ring.begin(frame_index)
    }

    fn submit_frame(&mut self, commands: CommandList) -> Result<()> {
        let (command_buffer, fence) = self.frame_ring.current();
        command_buffer.record(&self.resources, commands)?;
        command_buffer.submit(fence)?;
        self.frame_ring.mark_submitted();
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.context.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.context.device.device_wait_idle() } {
            log::error!("Could not wait for the device before teardown: {err}");
        }
    }
}
