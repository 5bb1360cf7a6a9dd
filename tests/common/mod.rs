#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use ash::vk;
use ultraviolet::Vec3;

use rt_scheduler::{
    arena::{AccelStructureId, Arena, PipelineId, QueryPoolId, ResourceHandle},
    device::{
        AccelStructure, AccelStructureLevel, BufferDesc, BuildSizes, Command, CommandList,
        ComputePipelineDesc, Device, DeviceLimits, GeometryInput, MemoryLocation, TextureDesc,
    },
    error::{CoreError, Result},
    scene::{Instance, Material, Mesh, Scene},
    transform::Transform,
    vulkan::sync_manager::{
        resource_access::{AccessKind, ResourceKind, ResourceState},
        ResourceStateRegistry,
    },
};

pub const SCRATCH_ALIGNMENT: u64 = 128;

pub struct MockBuffer {
    pub desc: BufferDesc,
    pub bytes: Vec<u8>,
}

pub struct MockStructure {
    pub level: AccelStructureLevel,
    pub size: u64,
    pub buffer: ResourceHandle,
}

/// Records everything and executes nothing, except for compacted size queries which report
/// three quarters of each structure's size, or twice it with `oversized_compaction`.
#[derive(Default)]
pub struct MockDevice {
    pub buffers: HashMap<ResourceHandle, MockBuffer>,
    pub textures: HashSet<ResourceHandle>,
    pub structures: Arena<AccelStructureId, MockStructure>,
    pub query_pools: Arena<QueryPoolId, Vec<u64>>,
    pub pipelines: Arena<PipelineId, String>,
    pub submitted: Vec<CommandList>,
    pub frames: Vec<CommandList>,
    pub begun_frames: Vec<u64>,
    pub destroyed_structures: usize,
    pub oversized_compaction: bool,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_structures(&self) -> usize {
        self.structures.len()
    }

    pub fn structure_size(&self, id: AccelStructureId) -> u64 {
        self.structures.get(id).expect("live structure").size
    }

    pub fn compacted_size(size: u64) -> u64 {
        size * 3 / 4
    }

    fn execute(&mut self, commands: &CommandList) {
        for command in commands.commands() {
            match command {
                Command::ResetQueries { pool, first, count } => {
                    let results = self.query_pools.get_mut(*pool).expect("live query pool");
                    for r in &mut results[*first as usize..(*first + *count) as usize] {
                        *r = 0;
                    }
                }
                Command::WriteCompactedSizes { pool, structures } => {
                    let sizes: Vec<u64> = structures
                        .iter()
                        .map(|id| {
                            let size = self.structure_size(*id);
                            if self.oversized_compaction {
                                size * 2
                            } else {
                                Self::compacted_size(size)
                            }
                        })
                        .collect();
                    let results = self.query_pools.get_mut(*pool).expect("live query pool");
                    results[..sizes.len()].copy_from_slice(&sizes);
                }
                Command::CopyQueryResults { pool, count, dst } => {
                    let results = self.query_pools.get(*pool).expect("live query pool");
                    let bytes: Vec<u8> = results[..*count as usize]
                        .iter()
                        .flat_map(|r| r.to_le_bytes())
                        .collect();
                    let buffer = self.buffers.get_mut(&dst.buffer).expect("live buffer");
                    let start = dst.offset as usize;
                    buffer.bytes[start..start + bytes.len()].copy_from_slice(&bytes);
                }
                Command::CompactCopy { src, dst } => {
                    assert!(self.structures.contains(*src), "compacting a dead structure");
                    assert!(self.structures.contains(*dst), "compacting into a dead structure");
                }
                _ => {}
            }
        }
    }
}

impl Device for MockDevice {
    fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            scratch_offset_alignment: SCRATCH_ALIGNMENT,
        }
    }

    fn create_buffer(
        &mut self,
        registry: &mut ResourceStateRegistry,
        desc: &BufferDesc,
    ) -> Result<ResourceHandle> {
        let handle = registry.register(
            ResourceKind::Buffer,
            desc.name.clone(),
            ResourceState::buffer(desc.initial_access),
        );
        self.buffers.insert(
            handle,
            MockBuffer {
                desc: desc.clone(),
                bytes: vec![0; desc.size as usize],
            },
        );
        Ok(handle)
    }

    fn destroy_buffer(&mut self, registry: &mut ResourceStateRegistry, buffer: ResourceHandle) {
        registry.unregister(buffer);
        assert!(self.buffers.remove(&buffer).is_some(), "destroying a dead buffer");
    }

    fn write_buffer(&mut self, buffer: ResourceHandle, offset: u64, data: &[u8]) -> Result<()> {
        let mock = self.buffers.get_mut(&buffer).expect("live buffer");
        if mock.desc.location != MemoryLocation::Upload {
            return Err(CoreError::NotHostVisible(buffer));
        }
        let start = offset as usize;
        mock.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: ResourceHandle, offset: u64, out: &mut [u8]) -> Result<()> {
        let mock = self.buffers.get(&buffer).expect("live buffer");
        if mock.desc.location != MemoryLocation::Readback {
            return Err(CoreError::NotHostVisible(buffer));
        }
        let start = offset as usize;
        out.copy_from_slice(&mock.bytes[start..start + out.len()]);
        Ok(())
    }

    fn buffer_address(&self, buffer: ResourceHandle) -> u64 {
        0x1000_0000 * u64::from(buffer_index(buffer) + 1)
    }

    fn create_texture(
        &mut self,
        registry: &mut ResourceStateRegistry,
        desc: &TextureDesc,
    ) -> Result<ResourceHandle> {
        let handle = registry.register(ResourceKind::Texture, desc.name.clone(), ResourceState::UNUSED);
        self.textures.insert(handle);
        Ok(handle)
    }

    fn destroy_texture(&mut self, registry: &mut ResourceStateRegistry, texture: ResourceHandle) {
        registry.unregister(texture);
        assert!(self.textures.remove(&texture), "destroying a dead texture");
    }

    fn acceleration_structure_sizes(
        &self,
        _level: AccelStructureLevel,
        _flags: vk::BuildAccelerationStructureFlagsKHR,
        input: GeometryInput<'_>,
    ) -> BuildSizes {
        let primitives = match input {
            GeometryInput::Triangles(geometries) => geometries
                .iter()
                .map(|g| u64::from(g.primitive_count()))
                .sum(),
            GeometryInput::Instances { count } => u64::from(count),
        };
        BuildSizes {
            structure: 1024 + 128 * primitives,
            build_scratch: 200 + 64 * primitives,
            update_scratch: 100 + 16 * primitives,
        }
    }

    fn create_acceleration_structure(
        &mut self,
        registry: &mut ResourceStateRegistry,
        name: &str,
        level: AccelStructureLevel,
        size: u64,
    ) -> Result<AccelStructure> {
        let buffer = self.create_buffer(
            registry,
            &BufferDesc {
                name: name.into(),
                size,
                usage: vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
                location: MemoryLocation::Device,
                initial_access: AccessKind::None,
            },
        )?;
        let id = self.structures.insert(MockStructure {
            level,
            size,
            buffer,
        });
        Ok(AccelStructure { id, buffer, size })
    }

    fn destroy_acceleration_structure(
        &mut self,
        registry: &mut ResourceStateRegistry,
        structure: AccelStructure,
    ) {
        assert!(
            self.structures.remove(structure.id).is_some(),
            "destroying a dead structure"
        );
        self.destroyed_structures += 1;
        self.destroy_buffer(registry, structure.buffer);
    }

    fn acceleration_structure_address(&self, structure: AccelStructureId) -> u64 {
        assert!(self.structures.contains(structure), "address of a dead structure");
        0xA000_0000 + 0x10_0000 * u64::from(structure_index(structure))
    }

    fn create_query_pool(&mut self, count: u32) -> Result<QueryPoolId> {
        Ok(self.query_pools.insert(vec![0; count as usize]))
    }

    fn destroy_query_pool(&mut self, pool: QueryPoolId) {
        assert!(self.query_pools.remove(pool).is_some());
    }

    fn create_compute_pipeline(&mut self, desc: &ComputePipelineDesc) -> Result<PipelineId> {
        Ok(self.pipelines.insert(desc.name.clone()))
    }

    fn destroy_compute_pipeline(&mut self, pipeline: PipelineId) {
        assert!(self.pipelines.remove(pipeline).is_some());
    }

    fn submit_and_wait(&mut self, commands: CommandList) -> Result<()> {
        self.execute(&commands);
        self.submitted.push(commands);
        Ok(())
    }

    fn begin_frame(&mut self, frame_index: u64) -> Result<()> {
        self.begun_frames.push(frame_index);
        Ok(())
    }

    fn submit_frame(&mut self, commands: CommandList) -> Result<()> {
        self.execute(&commands);
        self.frames.push(commands);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        Ok(())
    }
}

fn buffer_index(handle: ResourceHandle) -> u32 {
    use rt_scheduler::arena::Handle;
    handle.raw().index()
}

fn structure_index(id: AccelStructureId) -> u32 {
    use rt_scheduler::arena::Handle;
    id.raw().index()
}

pub fn cube() -> Mesh {
    let positions = (0..8)
        .map(|i| {
            Vec3::new(
                if i & 1 == 0 { -0.5 } else { 0.5 },
                if i & 2 == 0 { -0.5 } else { 0.5 },
                if i & 4 == 0 { -0.5 } else { 0.5 },
            )
        })
        .collect();
    let indices = vec![
        0, 2, 1, 1, 2, 3, 4, 5, 6, 5, 7, 6, 0, 1, 4, 1, 5, 4, 2, 6, 3, 3, 6, 7, 0, 4, 2, 2, 4, 6,
        1, 3, 5, 3, 7, 5,
    ];
    Mesh::new(positions, indices)
}

pub fn triangle() -> Mesh {
    Mesh::new(
        vec![Vec3::zero(), Vec3::unit_x(), Vec3::unit_y()],
        vec![0, 1, 2],
    )
}

pub fn at(x: f32) -> Transform {
    Transform::from_position(Vec3::new(x, 0.0, 0.0))
}

/// Ten opaque and two glass static instances, plus one spinning prop.
pub fn mixed_scene() -> Scene {
    let mut scene = Scene::default();
    let opaque = scene.add_material(Material::opaque());
    let glass = scene.add_material(Material::transparent());
    let mesh = scene.add_mesh(cube());
    let prop = scene.add_mesh(triangle());

    for i in 0..10 {
        scene.add_instance(Instance::new(mesh, opaque, at(i as f32 * 2.0)));
    }
    for i in 0..2 {
        scene.add_instance(Instance::new(mesh, glass, at(-5.0 - i as f32 * 2.0)));
    }
    scene.add_instance(Instance::new(prop, opaque, at(30.0)).dynamic());
    scene
}

/// One updatable instance of a morphing triangle, plus a static floor.
pub fn deformable_scene() -> Scene {
    let mut scene = Scene::default();
    let opaque = scene.add_material(Material::opaque());
    let floor = scene.add_mesh(cube());
    let base = triangle();
    let raised: Vec<Vec3> = base.positions.iter().map(|p| *p + Vec3::unit_z()).collect();
    let cloth = scene.add_mesh(base.with_morph_targets(vec![raised]));

    scene.add_instance(Instance::new(floor, opaque, at(0.0)));
    scene.add_instance(Instance::new(cloth, opaque, at(3.0)).dynamic());
    scene
}
