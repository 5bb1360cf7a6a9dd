use ash::vk;
use bytemuck::{Pod, Zeroable};
use log::debug;
use ultraviolet::Vec3;

use crate::{
    arena::ResourceHandle,
    device::{
        AccelStructure, AccelStructureLevel, BufferDesc, BufferSlice, BuildSizes, Command, Device,
        GeometryInput, MemoryLocation, TopLevelBuild,
    },
    error::{CoreError, Result},
    pass::PassContext,
    scene::Scene,
    streamer::Streamer,
    utility::transform_3x4,
    vulkan::sync_manager::{resource_access::AccessKind, transition_batcher::PendingTransition},
};

use super::{
    bottom_level::{BlasTable, LogicalBlas},
    classify::Classification,
    INSTANCE_ALIGNMENT, TOP_LEVEL_BUILD_FLAGS,
};

/// Instance mask bits, also stored in [`InstanceData::flags`].
pub mod instance_flags {
    pub const NON_TRANSPARENT: u32 = 1 << 0;
    pub const TRANSPARENT: u32 = 1 << 1;
    pub const FORCED_EMISSION: u32 = 1 << 2;
    pub const STATIC: u32 = 1 << 3;
    pub const DEFORMABLE: u32 = 1 << 4;
}

/// `VkAccelerationStructureInstanceKHR`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TopLevelInstance {
    pub transform: [f32; 12],
    /// Custom index in the low 24 bits, mask in the high 8.
    pub instance_custom_index_and_mask: u32,
    /// Hit group offset in the low 24 bits, `VkGeometryInstanceFlagsKHR` in the high 8.
    pub sbt_offset_and_flags: u32,
    pub acceleration_structure_reference: u64,
}

impl TopLevelInstance {
    pub fn new(
        transform: [f32; 12],
        custom_index: u32,
        mask: u32,
        flags: vk::GeometryInstanceFlagsKHR,
        reference: u64,
    ) -> Self {
        Self {
            transform,
            instance_custom_index_and_mask: (custom_index & 0x00ff_ffff) | ((mask & 0xff) << 24),
            sbt_offset_and_flags: (flags.as_raw() & 0xff) << 24,
            acceleration_structure_reference: reference,
        }
    }

    pub fn custom_index(&self) -> u32 {
        self.instance_custom_index_and_mask & 0x00ff_ffff
    }

    pub fn mask(&self) -> u32 {
        self.instance_custom_index_and_mask >> 24
    }

    pub fn flags(&self) -> vk::GeometryInstanceFlagsKHR {
        vk::GeometryInstanceFlagsKHR::from_raw(self.sbt_offset_and_flags >> 24)
    }
}

/// Per id data for shaders: one entry per merged geometry object and per dynamic instance.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    pub transform: [f32; 12],
    pub previous_transform: [f32; 12],
    pub material: u32,
    pub mesh: u32,
    pub flags: u32,
    pub _pad: u32,
}

#[derive(Debug, Clone, Default)]
pub struct GatheredInstances {
    pub world: Vec<TopLevelInstance>,
    pub light: Vec<TopLevelInstance>,
    pub data: Vec<InstanceData>,
}

/// Walks the buckets and emits this frame's instance records, camera relative.
///
/// Merged buckets take one record each, with the custom index advanced by the bucket size so
/// that `custom index + geometry index` finds the instance data. Dynamic instances take one
/// record and one id each. Advances every instance's previous transform.
pub fn gather_instances(
    scene: &mut Scene,
    classes: &Classification,
    table: &BlasTable,
    device: &dyn Device,
    camera: Vec3,
    emission: bool,
) -> Result<GatheredInstances> {
    let mut gathered = GatheredInstances::default();
    let mut next_id = 0u32;
    let camera_relative = transform_3x4(&ultraviolet::Mat4::from_translation(-camera));

    let merged = [
        (LogicalBlas::MergedOpaque, &classes.opaque, instance_flags::NON_TRANSPARENT),
        (LogicalBlas::MergedTransparent, &classes.transparent, instance_flags::TRANSPARENT),
        (LogicalBlas::MergedEmissive, &classes.emissive, instance_flags::NON_TRANSPARENT),
    ];
    for (logical, bucket, mask) in merged {
        let Some(structure) = table.structure(logical) else {
            continue;
        };
        let record = TopLevelInstance::new(
            camera_relative,
            next_id,
            mask | instance_flags::STATIC,
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
            device.acceleration_structure_address(structure.id),
        );
        if logical == LogicalBlas::MergedEmissive {
            gathered.light.push(record);
        } else {
            gathered.world.push(record);
        }

        for &index in bucket.iter() {
            let instance = &scene.instances[index];
            let pivot = scene.mesh_of(instance).aabb.center();
            let matrix = transform_3x4(&instance.transform.matrix_around(pivot, camera));
            gathered.data.push(InstanceData {
                transform: matrix,
                previous_transform: matrix,
                material: instance.material as u32,
                mesh: instance.mesh as u32,
                flags: mask | instance_flags::STATIC,
                _pad: 0,
            });
        }
        next_id += bucket.len() as u32;
    }

    for &index in &classes.dynamic {
        let instance = &scene.instances[index];
        let mesh = scene.mesh_of(instance);
        let material = scene.material_of(instance);
        let entry = table
            .for_mesh(instance.mesh)
            .ok_or(CoreError::MissingStructure(instance.mesh))?;

        let forced_emission = instance.forced_emission || (emission && index % 3 == 0);
        let mut mask = if material.is_transparent() {
            instance_flags::TRANSPARENT
        } else {
            instance_flags::NON_TRANSPARENT
        };
        if mesh.is_deformable() {
            mask |= instance_flags::DEFORMABLE;
        }
        if forced_emission {
            mask |= instance_flags::FORCED_EMISSION;
        }
        let mut flags = vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE;
        if !material.is_masked() {
            flags |= vk::GeometryInstanceFlagsKHR::FORCE_OPAQUE;
        }

        let pivot = mesh.aabb.center();
        let matrix = transform_3x4(&instance.transform.matrix_around(pivot, camera));
        let previous = instance
            .previous_transform
            .as_ref()
            .map(|t| transform_3x4(&t.matrix_around(pivot, camera)))
            .unwrap_or(matrix);

        let record = TopLevelInstance::new(
            matrix,
            next_id,
            mask,
            flags,
            device.acceleration_structure_address(entry.structure.id),
        );
        gathered.world.push(record);
        if material.emissive || forced_emission {
            gathered.light.push(record);
        }
        gathered.data.push(InstanceData {
            transform: matrix,
            previous_transform: previous,
            material: instance.material as u32,
            mesh: instance.mesh as u32,
            flags: mask,
            _pad: 0,
        });
        next_id += 1;
    }

    for instance in &mut scene.instances {
        instance.previous_transform = Some(instance.transform.clone());
    }
    Ok(gathered)
}

/// The world and light structures plus their persistent scratch and instance data buffers.
pub struct TopLevelPipeline {
    pub world: AccelStructure,
    pub light: AccelStructure,
    world_scratch: ResourceHandle,
    light_scratch: ResourceHandle,
    instance_data: ResourceHandle,
    world_capacity: u32,
    light_capacity: u32,
    data_capacity: u32,
}

impl TopLevelPipeline {
    pub fn new(
        device: &mut dyn Device,
        ctx: &mut PassContext,
        table: &BlasTable,
        classes: &Classification,
    ) -> Result<Self> {
        let merged = |logical| u32::from(table.get(logical).is_some());
        let dynamic = classes.dynamic.len() as u32;
        let world_capacity = merged(LogicalBlas::MergedOpaque)
            + merged(LogicalBlas::MergedTransparent)
            + dynamic;
        let light_capacity = merged(LogicalBlas::MergedEmissive) + dynamic;
        let data_capacity = classes.id_count() as u32;

        let (world, world_scratch) = create_top_level(device, ctx, "world", world_capacity)?;
        let (light, light_scratch) = create_top_level(device, ctx, "light", light_capacity)?;
        let instance_data = device.create_buffer(
            ctx.registry_mut(),
            &BufferDesc {
                name: "instance data".into(),
                size: (data_capacity.max(1) as usize * std::mem::size_of::<InstanceData>()) as u64,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                location: MemoryLocation::Device,
                initial_access: AccessKind::None,
            },
        )?;

        Ok(Self {
            world,
            light,
            world_scratch,
            light_scratch,
            instance_data,
            world_capacity,
            light_capacity,
            data_capacity,
        })
    }

    pub fn instance_data(&self) -> ResourceHandle {
        self.instance_data
    }

    /// Streams the instance arrays and rebuilds both structures from scratch.
    pub fn record(
        &self,
        device: &mut dyn Device,
        ctx: &mut PassContext,
        streamer: &mut dyn Streamer,
        gathered: &GatheredInstances,
    ) -> Result<()> {
        assert!(
            gathered.world.len() <= self.world_capacity as usize
                && gathered.light.len() <= self.light_capacity as usize
                && gathered.data.len() <= self.data_capacity as usize,
            "Instance count changed after load"
        );

        let world = streamer.stream(device, bytemuck::cast_slice(&gathered.world), INSTANCE_ALIGNMENT)?;
        let light = streamer.stream(device, bytemuck::cast_slice(&gathered.light), INSTANCE_ALIGNMENT)?;

        if !gathered.data.is_empty() {
            let bytes: &[u8] = bytemuck::cast_slice(&gathered.data);
            let data = streamer.stream(device, bytes, INSTANCE_ALIGNMENT)?;
            ctx.transition(&[PendingTransition::buffer(
                self.instance_data,
                AccessKind::CopyDestination,
            )])?;
            ctx.record(Command::CopyBuffer {
                src: data.slice(),
                dst: BufferSlice {
                    buffer: self.instance_data,
                    offset: 0,
                },
                size: bytes.len() as u64,
            });
        }

        ctx.transition(&[
            PendingTransition::buffer(self.world.buffer, AccessKind::AccelerationStructureBuild),
            PendingTransition::buffer(self.light.buffer, AccessKind::AccelerationStructureBuild),
            PendingTransition::buffer(self.world_scratch, AccessKind::AccelerationStructureBuild),
            PendingTransition::buffer(self.light_scratch, AccessKind::AccelerationStructureBuild),
            PendingTransition::buffer(self.instance_data, AccessKind::ShaderRead),
        ])?;

        ctx.record(Command::BuildTopLevel(vec![
            TopLevelBuild {
                dst: self.world.id,
                flags: TOP_LEVEL_BUILD_FLAGS,
                instances: world.slice(),
                instance_count: gathered.world.len() as u32,
                scratch: BufferSlice {
                    buffer: self.world_scratch,
                    offset: 0,
                },
            },
            TopLevelBuild {
                dst: self.light.id,
                flags: TOP_LEVEL_BUILD_FLAGS,
                instances: light.slice(),
                instance_count: gathered.light.len() as u32,
                scratch: BufferSlice {
                    buffer: self.light_scratch,
                    offset: 0,
                },
            },
        ]));

        ctx.transition(&[
            PendingTransition::buffer(self.world.buffer, AccessKind::ShaderRead),
            PendingTransition::buffer(self.light.buffer, AccessKind::ShaderRead),
        ])?;
        debug!(
            "Rebuilt TLAS with {} world and {} light instances",
            gathered.world.len(),
            gathered.light.len()
        );
        Ok(())
    }

    pub fn destroy(self, device: &mut dyn Device, ctx: &mut PassContext) {
        device.destroy_acceleration_structure(ctx.registry_mut(), self.world);
        device.destroy_acceleration_structure(ctx.registry_mut(), self.light);
        device.destroy_buffer(ctx.registry_mut(), self.world_scratch);
        device.destroy_buffer(ctx.registry_mut(), self.light_scratch);
        device.destroy_buffer(ctx.registry_mut(), self.instance_data);
    }
}

fn create_top_level(
    device: &mut dyn Device,
    ctx: &mut PassContext,
    name: &str,
    capacity: u32,
) -> Result<(AccelStructure, ResourceHandle)> {
    let sizes: BuildSizes = device.acceleration_structure_sizes(
        AccelStructureLevel::Top,
        TOP_LEVEL_BUILD_FLAGS,
        GeometryInput::Instances { count: capacity },
    );
    let structure = device.create_acceleration_structure(
        ctx.registry_mut(),
        &format!("tlas {name}"),
        AccelStructureLevel::Top,
        sizes.structure,
    )?;
    let scratch = device.create_buffer(
        ctx.registry_mut(),
        &BufferDesc {
            name: format!("tlas {name} scratch"),
            size: sizes.build_scratch.max(1),
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            location: MemoryLocation::Device,
            initial_access: AccessKind::None,
        },
    )?;
    Ok((structure, scratch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_record_matches_vulkan_layout() {
        assert_eq!(std::mem::size_of::<TopLevelInstance>(), 64);
        assert_eq!(std::mem::size_of::<InstanceData>(), 112);
    }

    #[test]
    fn packed_fields_round_trip() {
        let record = TopLevelInstance::new(
            [0.0; 12],
            0x12_3456,
            instance_flags::TRANSPARENT | instance_flags::DEFORMABLE,
            vk::GeometryInstanceFlagsKHR::FORCE_OPAQUE,
            0xdead_beef,
        );
        assert_eq!(record.custom_index(), 0x12_3456);
        assert_eq!(record.mask(), 0b10010);
        assert_eq!(record.flags(), vk::GeometryInstanceFlagsKHR::FORCE_OPAQUE);
    }
}
