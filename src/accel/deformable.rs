//! Per-frame morph target blending and refit of the deformable bottom-level structures.

use ash::vk;
use bytemuck::{Pod, Zeroable};
use log::debug;

use crate::{
    arena::{PipelineId, ResourceHandle},
    config_loader::MorphShaderPaths,
    device::{
        BottomLevelBuild, BufferDesc, BufferSlice, Command, ComputePipelineDesc, Device,
        MemoryLocation, TriangleGeometry,
    },
    error::Result,
    pass::PassContext,
    scene::Scene,
    utility::div_ceil,
    vulkan::{
        compute_pipeline::read_spirv,
        sync_manager::{resource_access::AccessKind, transition_batcher::PendingTransition},
    },
};

use super::{
    bottom_level::{BlasKind, BlasTable, LogicalBlas},
    classify::Classification,
    scratch::ScratchBudget,
    staging::{dynamic_mesh_opaque, DEFORMABLE_VERTEX_STRIDE},
    DEFORMABLE_BUILD_FLAGS,
};

pub const MAX_ACTIVE_MORPH_TARGETS: usize = 8;
const WORKGROUP_SIZE: u32 = 64;
/// Normal, tangent and previous frame face center per primitive, `vec4` each, plus padding.
const PRIMITIVE_STRIDE: u64 = 64;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MorphVerticesConstants {
    pub targets_address: u64,
    pub positions_address: u64,
    pub target_offset: u32,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub active_count: u32,
    pub target_indices: [u32; MAX_ACTIVE_MORPH_TARGETS],
    pub weights: [f32; MAX_ACTIVE_MORPH_TARGETS],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MorphPrimitivesConstants {
    pub positions_address: u64,
    pub indices_address: u64,
    pub primitives_address: u64,
    pub current_vertex_offset: u32,
    pub previous_vertex_offset: u32,
    pub index_offset: u32,
    pub primitive_offset: u32,
    pub primitive_count: u32,
    pub _pad: u32,
}

/// SPIR-V of the two compute passes.
#[derive(Debug, Clone)]
pub struct MorphShaderCode {
    pub update_vertices: Vec<u32>,
    pub update_primitives: Vec<u32>,
}

impl MorphShaderCode {
    pub fn load(paths: &MorphShaderPaths) -> Result<Self> {
        Ok(Self {
            update_vertices: read_spirv(&paths.update_vertices)?,
            update_primitives: read_spirv(&paths.update_primitives)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlasRefresh {
    Skipped,
    Updated,
    Rebuilt,
}

/// Where one deformable mesh lives in the shared morph buffers. Offsets count elements.
#[derive(Debug, Clone)]
struct MorphedMesh {
    mesh: usize,
    target_offset: u32,
    vertex_offset: u32,
    vertex_count: u32,
    index_offset: u32,
    index_count: u32,
    primitive_offset: u32,
    opaque: bool,
    scratch_offset: u64,
}

pub fn should_run(paused: bool, prev_paused: bool, frame_index: u64) -> bool {
    !paused || !prev_paused || frame_index == 0
}

/// Ping-pong slots of the morphed positions, `(current, previous)`.
pub fn frame_slots(frame_index: u64) -> (u32, u32) {
    let current = (frame_index & 1) as u32;
    let previous = if frame_index == 0 { current } else { 1 - current };
    (current, previous)
}

/// Picks the heaviest targets and renormalises their weights. Index 0 is the base pose,
/// which is used alone while every weight is zero.
pub fn active_targets(
    weights: &[f32],
) -> ([u32; MAX_ACTIVE_MORPH_TARGETS], [f32; MAX_ACTIVE_MORPH_TARGETS], u32) {
    let mut ranked: Vec<(usize, f32)> = weights
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, w)| *w > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(MAX_ACTIVE_MORPH_TARGETS);

    let mut indices = [0; MAX_ACTIVE_MORPH_TARGETS];
    let mut active = [0.0; MAX_ACTIVE_MORPH_TARGETS];
    let total: f32 = ranked.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        active[0] = 1.0;
        return (indices, active, 1);
    }
    for (slot, (target, weight)) in ranked.iter().enumerate() {
        indices[slot] = *target as u32 + 1;
        active[slot] = weight / total;
    }
    (indices, active, ranked.len() as u32)
}

pub struct DeformableUpdater {
    meshes: Vec<MorphedMesh>,
    targets: ResourceHandle,
    positions: ResourceHandle,
    indices: ResourceHandle,
    primitives: ResourceHandle,
    scratch: ResourceHandle,
    total_vertices: u32,
    update_vertices: PipelineId,
    update_primitives: PipelineId,
    prev_paused: bool,
}

impl DeformableUpdater {
    /// Returns `None` when no dynamic instance uses a deformable mesh.
    pub fn new(
        device: &mut dyn Device,
        ctx: &mut PassContext,
        scene: &Scene,
        classes: &Classification,
        table: &BlasTable,
        shaders: &MorphShaderCode,
    ) -> Result<Option<Self>> {
        let mut budget = ScratchBudget::new(device.limits().scratch_offset_alignment);
        let mut meshes = Vec::new();
        let mut targets: Vec<[f32; 4]> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let (mut vertex_offset, mut primitive_offset) = (0u32, 0u32);

        for entry in table.iter().filter(|e| e.kind == BlasKind::Deformable) {
            let LogicalBlas::Dynamic { mesh } = entry.logical else {
                continue;
            };
            let source = &scene.meshes[mesh];
            let Some(morph) = &source.morph_targets else {
                continue;
            };

            let target_offset = targets.len() as u32;
            for pose in std::iter::once(&source.positions).chain(&morph.targets) {
                targets.extend(pose.iter().map(|p| [p.x, p.y, p.z, 0.0]));
            }
            let index_offset = indices.len() as u32;
            indices.extend_from_slice(&source.indices);

            meshes.push(MorphedMesh {
                mesh,
                target_offset,
                vertex_offset,
                vertex_count: source.vertex_count(),
                index_offset,
                index_count: source.index_count(),
                primitive_offset,
                opaque: dynamic_mesh_opaque(scene, classes, mesh),
                scratch_offset: budget.push_deformable(entry.sizes),
            });
            vertex_offset += source.vertex_count();
            primitive_offset += source.primitive_count();
        }
        if meshes.is_empty() {
            return Ok(None);
        }

        let targets_buffer = upload(device, ctx, "morph targets", bytemuck::cast_slice(&targets))?;
        let indices_buffer = upload(device, ctx, "morph indices", bytemuck::cast_slice(&indices))?;
        let positions = device.create_buffer(
            ctx.registry_mut(),
            &BufferDesc {
                name: "morphed positions".into(),
                size: 2 * u64::from(vertex_offset) * DEFORMABLE_VERTEX_STRIDE,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER
                    | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
                location: MemoryLocation::Device,
                initial_access: AccessKind::None,
            },
        )?;
        let primitives = device.create_buffer(
            ctx.registry_mut(),
            &BufferDesc {
                name: "morphed primitives".into(),
                size: u64::from(primitive_offset.max(1)) * PRIMITIVE_STRIDE,
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                location: MemoryLocation::Device,
                initial_access: AccessKind::None,
            },
        )?;
        let scratch = device.create_buffer(
            ctx.registry_mut(),
            &BufferDesc {
                name: "deformable scratch".into(),
                size: budget.deformable_total(),
                usage: vk::BufferUsageFlags::STORAGE_BUFFER,
                location: MemoryLocation::Device,
                initial_access: AccessKind::None,
            },
        )?;

        let update_vertices = device.create_compute_pipeline(&ComputePipelineDesc {
            name: "morph vertices".into(),
            spirv: shaders.update_vertices.clone(),
            push_constant_size: std::mem::size_of::<MorphVerticesConstants>() as u32,
        })?;
        let update_primitives = device.create_compute_pipeline(&ComputePipelineDesc {
            name: "morph primitives".into(),
            spirv: shaders.update_primitives.clone(),
            push_constant_size: std::mem::size_of::<MorphPrimitivesConstants>() as u32,
        })?;

        debug!(
            "{} deformable meshes, {} vertices, {} bytes of update scratch",
            meshes.len(),
            vertex_offset,
            budget.deformable_total()
        );
        Ok(Some(Self {
            meshes,
            targets: targets_buffer,
            positions,
            indices: indices_buffer,
            primitives,
            scratch,
            total_vertices: vertex_offset,
            update_vertices,
            update_primitives,
            // A run that starts paused has no pause edge to rebuild on.
            prev_paused: true,
        }))
    }

    pub fn positions(&self) -> ResourceHandle {
        self.positions
    }

    pub fn primitives(&self) -> ResourceHandle {
        self.primitives
    }

    /// Records the morph passes and the structure refresh. Refits in place every running
    /// frame, and rebuilds from scratch on the frame the animation gets paused.
    pub fn record(
        &mut self,
        device: &dyn Device,
        ctx: &mut PassContext,
        scene: &Scene,
        table: &BlasTable,
        paused: bool,
        frame_index: u64,
    ) -> Result<BlasRefresh> {
        let prev_paused = std::mem::replace(&mut self.prev_paused, paused);
        if !should_run(paused, prev_paused, frame_index) {
            return Ok(BlasRefresh::Skipped);
        }
        let rebuild = paused && !prev_paused;
        let (current, previous) = frame_slots(frame_index);

        let targets_address = device.buffer_address(self.targets);
        let positions_address = device.buffer_address(self.positions);
        let indices_address = device.buffer_address(self.indices);
        let primitives_address = device.buffer_address(self.primitives);

        ctx.transition(&[
            PendingTransition::buffer(self.positions, AccessKind::Storage),
            PendingTransition::buffer(self.primitives, AccessKind::Storage),
        ])?;
        for morphed in &self.meshes {
            let weights = scene.meshes[morphed.mesh]
                .morph_targets
                .as_ref()
                .map(|m| m.weights.as_slice())
                .unwrap_or_default();
            let (target_indices, weights, active_count) = active_targets(weights);
            let constants = MorphVerticesConstants {
                targets_address,
                positions_address,
                target_offset: morphed.target_offset,
                vertex_offset: current * self.total_vertices + morphed.vertex_offset,
                vertex_count: morphed.vertex_count,
                active_count,
                target_indices,
                weights,
            };
            ctx.record(Command::Dispatch {
                pipeline: self.update_vertices,
                push_constants: bytemuck::bytes_of(&constants).to_vec(),
                groups: [div_ceil(morphed.vertex_count, WORKGROUP_SIZE), 1, 1],
            });
        }

        // Primitives stay in storage, the second pass writes them again.
        ctx.transition(&[
            PendingTransition::buffer(self.positions, AccessKind::ShaderRead),
            PendingTransition::buffer(self.primitives, AccessKind::Storage),
        ])?;
        for morphed in &self.meshes {
            let constants = MorphPrimitivesConstants {
                positions_address,
                indices_address,
                primitives_address,
                current_vertex_offset: current * self.total_vertices + morphed.vertex_offset,
                previous_vertex_offset: previous * self.total_vertices + morphed.vertex_offset,
                index_offset: morphed.index_offset,
                primitive_offset: morphed.primitive_offset,
                primitive_count: morphed.index_count / 3,
                _pad: 0,
            };
            ctx.record(Command::Dispatch {
                pipeline: self.update_primitives,
                push_constants: bytemuck::bytes_of(&constants).to_vec(),
                groups: [div_ceil(morphed.index_count / 3, WORKGROUP_SIZE), 1, 1],
            });
        }

        let mut builds = Vec::with_capacity(self.meshes.len());
        let mut to_build = Vec::with_capacity(self.meshes.len() + 1);
        let mut to_read = Vec::with_capacity(self.meshes.len() + 1);
        for morphed in &self.meshes {
            let Some(entry) = table.for_mesh(morphed.mesh) else {
                continue;
            };
            let structure = entry.structure;
            to_build.push(PendingTransition::buffer(
                structure.buffer,
                AccessKind::AccelerationStructureBuild,
            ));
            to_read.push(PendingTransition::buffer(structure.buffer, AccessKind::ShaderRead));
            builds.push(BottomLevelBuild {
                dst: structure.id,
                src: (!rebuild).then_some(structure.id),
                flags: DEFORMABLE_BUILD_FLAGS,
                geometries: vec![TriangleGeometry {
                    vertices: BufferSlice {
                        buffer: self.positions,
                        offset: u64::from(current * self.total_vertices + morphed.vertex_offset)
                            * DEFORMABLE_VERTEX_STRIDE,
                    },
                    vertex_stride: DEFORMABLE_VERTEX_STRIDE,
                    vertex_count: morphed.vertex_count,
                    indices: BufferSlice {
                        buffer: self.indices,
                        offset: u64::from(morphed.index_offset) * 4,
                    },
                    index_count: morphed.index_count,
                    transform: None,
                    opaque: morphed.opaque,
                }],
                scratch: BufferSlice {
                    buffer: self.scratch,
                    offset: morphed.scratch_offset,
                },
            });
        }
        to_build.push(PendingTransition::buffer(
            self.scratch,
            AccessKind::AccelerationStructureBuild,
        ));
        to_read.push(PendingTransition::buffer(self.primitives, AccessKind::ShaderRead));

        ctx.transition_all(&to_build)?;
        ctx.record(Command::BuildBottomLevel(builds));
        ctx.transition_all(&to_read)?;

        let refresh = if rebuild {
            BlasRefresh::Rebuilt
        } else {
            BlasRefresh::Updated
        };
        debug!("Deformable meshes {:?} on frame {}", refresh, frame_index);
        Ok(refresh)
    }

    pub fn destroy(self, device: &mut dyn Device, ctx: &mut PassContext) {
        for buffer in [
            self.targets,
            self.positions,
            self.indices,
            self.primitives,
            self.scratch,
        ] {
            device.destroy_buffer(ctx.registry_mut(), buffer);
        }
        device.destroy_compute_pipeline(self.update_vertices);
        device.destroy_compute_pipeline(self.update_primitives);
    }
}

fn upload(
    device: &mut dyn Device,
    ctx: &mut PassContext,
    name: &str,
    bytes: &[u8],
) -> Result<ResourceHandle> {
    let buffer = device.create_buffer(
        ctx.registry_mut(),
        &BufferDesc {
            name: name.into(),
            size: bytes.len().max(4) as u64,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            location: MemoryLocation::Upload,
            initial_access: AccessKind::ShaderRead,
        },
    )?;
    device.write_buffer(buffer, 0, bytes)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_until_the_second_paused_frame() {
        assert!(should_run(false, false, 5));
        assert!(should_run(true, false, 5));
        assert!(!should_run(true, true, 5));
        assert!(should_run(true, true, 0));
        assert!(should_run(false, true, 5));
    }

    #[test]
    fn slots_alternate_and_start_on_themselves() {
        assert_eq!(frame_slots(0), (0, 0));
        assert_eq!(frame_slots(1), (1, 0));
        assert_eq!(frame_slots(2), (0, 1));
        assert_eq!(frame_slots(7), (1, 0));
    }

    #[test]
    fn active_targets_are_capped_and_renormalised() {
        let weights: Vec<f32> = (0..12).map(|i| i as f32).collect();
        let (indices, active, count) = active_targets(&weights);
        assert_eq!(count, MAX_ACTIVE_MORPH_TARGETS as u32);
        assert_eq!(indices[0], 12);
        assert!(!indices.contains(&1));
        let sum: f32 = active.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_weights_fall_back_to_the_base_pose() {
        let (indices, active, count) = active_targets(&[0.0, 0.0]);
        assert_eq!(count, 1);
        assert_eq!(indices[0], 0);
        assert_eq!(active[0], 1.0);
    }

    #[test]
    fn push_constants_have_no_padding() {
        assert_eq!(std::mem::size_of::<MorphVerticesConstants>(), 96);
        assert_eq!(std::mem::size_of::<MorphPrimitivesConstants>(), 48);
    }
}
