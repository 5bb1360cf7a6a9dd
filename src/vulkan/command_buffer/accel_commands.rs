use ash::vk;

use crate::{
    arena::{AccelStructureId, QueryPoolId},
    device::{BottomLevelBuild, BufferSlice, TopLevelBuild, TriangleGeometry},
    vulkan::{
        acceleration_structure::{instances, triangles, GeometryAddresses},
        context::Context,
        device::Resources,
    },
};

const QUERY_RESULT_STRIDE: vk::DeviceSize = std::mem::size_of::<u64>() as vk::DeviceSize;

fn geometry_addresses(resources: &Resources, geometry: &TriangleGeometry) -> GeometryAddresses {
    GeometryAddresses {
        vertices: resources.address(geometry.vertices),
        indices: resources.address(geometry.indices),
        transform: geometry
            .transform
            .map(|t| resources.address(t))
            .unwrap_or_default(),
    }
}

pub fn cmd_build_bottom_level(
    command_buffer: vk::CommandBuffer,
    context: &Context,
    resources: &Resources,
    builds: &[BottomLevelBuild],
) {
    if builds.is_empty() {
        return;
    }

    let geometries: Vec<Vec<vk::AccelerationStructureGeometryKHR>> = builds
        .iter()
        .map(|build| {
            build
                .geometries
                .iter()
                .map(|g| triangles(g, geometry_addresses(resources, g)))
                .collect()
        })
        .collect();

    let ranges: Vec<Vec<vk::AccelerationStructureBuildRangeInfoKHR>> = builds
        .iter()
        .map(|build| {
            build
                .geometries
                .iter()
                .map(|g| {
                    vk::AccelerationStructureBuildRangeInfoKHR::builder()
                        .primitive_count(g.primitive_count())
                        .build()
                })
                .collect()
        })
        .collect();

    let infos: Vec<_> = builds
        .iter()
        .zip(&geometries)
        .map(|(build, geometries)| {
            let (mode, src) = match build.src {
                Some(src) => (
                    vk::BuildAccelerationStructureModeKHR::UPDATE,
                    resources.structure(src).inner,
                ),
                None => (
                    vk::BuildAccelerationStructureModeKHR::BUILD,
                    vk::AccelerationStructureKHR::null(),
                ),
            };
            vk::AccelerationStructureBuildGeometryInfoKHR::builder()
                .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
                .flags(build.flags)
                .mode(mode)
                .src_acceleration_structure(src)
                .dst_acceleration_structure(resources.structure(build.dst).inner)
                .geometries(geometries)
                .scratch_data(vk::DeviceOrHostAddressKHR {
                    device_address: resources.address(build.scratch),
                })
                .build()
        })
        .collect();

    let range_refs: Vec<&[vk::AccelerationStructureBuildRangeInfoKHR]> =
        ranges.iter().map(Vec::as_slice).collect();

    unsafe {
        context
            .acceleration_structure()
            .cmd_build_acceleration_structures(command_buffer, &infos, &range_refs)
    };
}

pub fn cmd_build_top_level(
    command_buffer: vk::CommandBuffer,
    context: &Context,
    resources: &Resources,
    builds: &[TopLevelBuild],
) {
    if builds.is_empty() {
        return;
    }

    let geometries: Vec<_> = builds
        .iter()
        .map(|build| instances(resources.address(build.instances)))
        .collect();
    let ranges: Vec<_> = builds
        .iter()
        .map(|build| {
            vk::AccelerationStructureBuildRangeInfoKHR::builder()
                .primitive_count(build.instance_count)
                .build()
        })
        .collect();

    let infos: Vec<_> = builds
        .iter()
        .zip(&geometries)
        .map(|(build, geometry)| {
            vk::AccelerationStructureBuildGeometryInfoKHR::builder()
                .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
                .flags(build.flags)
                .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                .dst_acceleration_structure(resources.structure(build.dst).inner)
                .geometries(std::slice::from_ref(geometry))
                .scratch_data(vk::DeviceOrHostAddressKHR {
                    device_address: resources.address(build.scratch),
                })
                .build()
        })
        .collect();

    let range_refs: Vec<&[vk::AccelerationStructureBuildRangeInfoKHR]> =
        ranges.iter().map(std::slice::from_ref).collect();

    unsafe {
        context
            .acceleration_structure()
            .cmd_build_acceleration_structures(command_buffer, &infos, &range_refs)
    };
}

pub fn cmd_reset_queries(
    command_buffer: vk::CommandBuffer,
    context: &Context,
    resources: &Resources,
    pool: QueryPoolId,
    first: u32,
    count: u32,
) {
    let pool = resources.query_pool(pool);
    unsafe {
        context
            .device
            .cmd_reset_query_pool(command_buffer, pool.inner, first, count)
    };
}

pub fn cmd_write_compacted_sizes(
    command_buffer: vk::CommandBuffer,
    context: &Context,
    resources: &Resources,
    pool: QueryPoolId,
    structures: &[AccelStructureId],
) {
    if structures.is_empty() {
        return;
    }
    let handles: Vec<_> = structures
        .iter()
        .map(|id| resources.structure(*id).inner)
        .collect();
    unsafe {
        context
            .acceleration_structure()
            .cmd_write_acceleration_structures_properties(
                command_buffer,
                &handles,
                vk::QueryType::ACCELERATION_STRUCTURE_COMPACTED_SIZE_KHR,
                resources.query_pool(pool).inner,
                0,
            )
    };
}

pub fn cmd_copy_query_results(
    command_buffer: vk::CommandBuffer,
    context: &Context,
    resources: &Resources,
    pool: QueryPoolId,
    count: u32,
    dst: BufferSlice,
) {
    unsafe {
        context.device.cmd_copy_query_pool_results(
            command_buffer,
            resources.query_pool(pool).inner,
            0,
            count,
            resources.buffer(dst.buffer).inner,
            dst.offset,
            QUERY_RESULT_STRIDE,
            vk::QueryResultFlags::TYPE_64 | vk::QueryResultFlags::WAIT,
        )
    };
}

pub fn cmd_compact_copy(
    command_buffer: vk::CommandBuffer,
    context: &Context,
    resources: &Resources,
    src: AccelStructureId,
    dst: AccelStructureId,
) {
    let copy_info = vk::CopyAccelerationStructureInfoKHR::builder()
        .src(resources.structure(src).inner)
        .dst(resources.structure(dst).inner)
        .mode(vk::CopyAccelerationStructureModeKHR::COMPACT);
    unsafe {
        context
            .acceleration_structure()
            .cmd_copy_acceleration_structure(command_buffer, &copy_info)
    };
}
