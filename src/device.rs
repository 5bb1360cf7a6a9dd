//! The seam between the scheduling core and the GPU.
//!
//! Passes record [`Command`]s into a [`CommandList`]; a [`Device`] allocates the resources they
//! reference and turns the list into API calls on submission.

use ash::vk;

use crate::{
    arena::{AccelStructureId, PipelineId, QueryPoolId, ResourceHandle},
    error::Result,
    vulkan::sync_manager::{
        resource_access::AccessKind, transition_batcher::BarrierBatch, ResourceStateRegistry,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// `minAccelerationStructureScratchOffsetAlignment`
    pub scratch_offset_alignment: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device local, never mapped.
    Device,
    /// Host visible, written by the CPU every frame or once at load.
    Upload,
    /// Host visible, read back by the CPU.
    Readback,
}

#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub name: String,
    pub size: u64,
    /// `SHADER_DEVICE_ADDRESS` is always added. `STORAGE_BUFFER` buffers are aligned for use as
    /// build scratch memory.
    pub usage: vk::BufferUsageFlags,
    pub location: MemoryLocation,
    /// The state the buffer is registered with.
    pub initial_access: AccessKind,
}

#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub name: String,
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelStructureLevel {
    Bottom,
    Top,
}

/// A buffer plus offset. Used for every GPU address the core hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSlice {
    pub buffer: ResourceHandle,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TriangleGeometry {
    pub vertices: BufferSlice,
    pub vertex_stride: u64,
    pub vertex_count: u32,
    /// `u32` indices.
    pub indices: BufferSlice,
    pub index_count: u32,
    /// A row-major 3x4 object-to-world matrix.
    pub transform: Option<BufferSlice>,
    pub opaque: bool,
}

impl TriangleGeometry {
    pub fn primitive_count(&self) -> u32 {
        self.index_count / 3
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GeometryInput<'a> {
    Triangles(&'a [TriangleGeometry]),
    Instances { count: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildSizes {
    pub structure: u64,
    pub build_scratch: u64,
    pub update_scratch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccelStructure {
    pub id: AccelStructureId,
    /// The backing buffer. Its registry state is the structure's state.
    pub buffer: ResourceHandle,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    pub name: String,
    pub spirv: Vec<u32>,
    pub push_constant_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BottomLevelBuild {
    pub dst: AccelStructureId,
    /// `Some(dst)` refits in place instead of building from scratch.
    pub src: Option<AccelStructureId>,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    pub geometries: Vec<TriangleGeometry>,
    pub scratch: BufferSlice,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopLevelBuild {
    pub dst: AccelStructureId,
    pub flags: vk::BuildAccelerationStructureFlagsKHR,
    pub instances: BufferSlice,
    pub instance_count: u32,
    pub scratch: BufferSlice,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Barrier(BarrierBatch),
    /// All builds are issued in one call and must not share scratch memory.
    BuildBottomLevel(Vec<BottomLevelBuild>),
    BuildTopLevel(Vec<TopLevelBuild>),
    ResetQueries {
        pool: QueryPoolId,
        first: u32,
        count: u32,
    },
    /// Writes each structure's compacted size into consecutive queries starting at 0.
    WriteCompactedSizes {
        pool: QueryPoolId,
        structures: Vec<AccelStructureId>,
    },
    /// Copies `count` 64 bit query results into `dst`.
    CopyQueryResults {
        pool: QueryPoolId,
        count: u32,
        dst: BufferSlice,
    },
    CompactCopy {
        src: AccelStructureId,
        dst: AccelStructureId,
    },
    CopyBuffer {
        src: BufferSlice,
        dst: BufferSlice,
        size: u64,
    },
    Dispatch {
        pipeline: PipelineId,
        push_constants: Vec<u8>,
        groups: [u32; 3],
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn barrier_count(&self) -> usize {
        self.commands
            .iter()
            .map(|c| match c {
                Command::Barrier(batch) => batch.len(),
                _ => 0,
            })
            .sum()
    }
}

impl IntoIterator for CommandList {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

/// Everything the core needs from a GPU. Every created buffer, texture and acceleration
/// structure is registered in the registry it is created with, and unregistered on destroy.
/// Textures are registered unused, in `UNDEFINED` layout.
pub trait Device {
    fn limits(&self) -> DeviceLimits;

    fn create_buffer(
        &mut self,
        registry: &mut ResourceStateRegistry,
        desc: &BufferDesc,
    ) -> Result<ResourceHandle>;
    fn destroy_buffer(&mut self, registry: &mut ResourceStateRegistry, buffer: ResourceHandle);
    /// Only valid for [`MemoryLocation::Upload`] buffers.
    fn write_buffer(&mut self, buffer: ResourceHandle, offset: u64, data: &[u8]) -> Result<()>;
    /// Only valid for [`MemoryLocation::Readback`] buffers.
    fn read_buffer(&self, buffer: ResourceHandle, offset: u64, out: &mut [u8]) -> Result<()>;
    fn buffer_address(&self, buffer: ResourceHandle) -> u64;

    fn create_texture(
        &mut self,
        registry: &mut ResourceStateRegistry,
        desc: &TextureDesc,
    ) -> Result<ResourceHandle>;
    fn destroy_texture(&mut self, registry: &mut ResourceStateRegistry, texture: ResourceHandle);

    fn acceleration_structure_sizes(
        &self,
        level: AccelStructureLevel,
        flags: vk::BuildAccelerationStructureFlagsKHR,
        input: GeometryInput<'_>,
    ) -> BuildSizes;
    fn create_acceleration_structure(
        &mut self,
        registry: &mut ResourceStateRegistry,
        name: &str,
        level: AccelStructureLevel,
        size: u64,
    ) -> Result<AccelStructure>;
    fn destroy_acceleration_structure(
        &mut self,
        registry: &mut ResourceStateRegistry,
        structure: AccelStructure,
    );
    /// The reference top-level instances store.
    fn acceleration_structure_address(&self, structure: AccelStructureId) -> u64;

    fn create_query_pool(&mut self, count: u32) -> Result<QueryPoolId>;
    fn destroy_query_pool(&mut self, pool: QueryPoolId);

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<PipelineId>;
    fn destroy_compute_pipeline(&mut self, pipeline: PipelineId);

    /// Submits and blocks until the queue is idle. Load time only.
    fn submit_and_wait(&mut self, commands: CommandList) -> Result<()>;

    /// Waits for the frame that last used this frame's slot.
    fn begin_frame(&mut self, frame_index: u64) -> Result<()>;
    /// Submits without waiting. The frame's slot is fenced.
    fn submit_frame(&mut self, commands: CommandList) -> Result<()>;
    fn wait_idle(&mut self) -> Result<()>;
}
