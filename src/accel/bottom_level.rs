//! One-time build of every bottom-level structure of a scene.
//!
//! Builds run uncompacted into temporary structures while their compacted sizes are queried.
//! Rigid structures are then copied into exactly sized ones and the temporaries retired.
//! Deformable structures keep their full size, since a later rebuild needs it.

use std::{collections::HashMap, time::Instant};

use ash::vk;
use log::{debug, info};

use crate::{
    device::{
        AccelStructure, AccelStructureLevel, BottomLevelBuild, BufferDesc, BufferSlice, BuildSizes,
        Command, Device, GeometryInput, MemoryLocation, TriangleGeometry,
    },
    error::Result,
    pass::PassContext,
    scene::Scene,
    vulkan::sync_manager::{resource_access::AccessKind, transition_batcher::PendingTransition},
};

use super::{
    classify::Classification, scratch::ScratchBudget, staging::StagedScene,
    DEFORMABLE_BUILD_FLAGS, RIGID_BUILD_FLAGS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlasKind {
    /// Merged static geometry, immutable after the build.
    RigidStatic,
    /// One mesh that moves as a whole. Its transform lives in the top-level instance.
    RigidDynamic,
    /// Vertices are rewritten every frame, so the structure is refit in place.
    Deformable,
}

impl BlasKind {
    pub fn build_flags(self) -> vk::BuildAccelerationStructureFlagsKHR {
        match self {
            BlasKind::RigidStatic | BlasKind::RigidDynamic => RIGID_BUILD_FLAGS,
            BlasKind::Deformable => DEFORMABLE_BUILD_FLAGS,
        }
    }

    pub fn is_compacted(self) -> bool {
        self != BlasKind::Deformable
    }
}

/// What a bottom-level structure stands for, independent of the structure currently backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalBlas {
    MergedOpaque,
    MergedTransparent,
    MergedEmissive,
    Dynamic { mesh: usize },
}

#[derive(Debug, Clone)]
pub struct BlasEntry {
    pub logical: LogicalBlas,
    pub kind: BlasKind,
    pub structure: AccelStructure,
    /// Sizes of the full, uncompacted structure.
    pub sizes: BuildSizes,
    pub geometry_count: usize,
    pub primitive_count: u64,
}

/// Maps logical structures to the physical structures backing them.
#[derive(Debug, Default)]
pub struct BlasTable {
    entries: Vec<BlasEntry>,
    lookup: HashMap<LogicalBlas, usize>,
}

impl BlasTable {
    fn insert(&mut self, entry: BlasEntry) {
        self.lookup.insert(entry.logical, self.entries.len());
        self.entries.push(entry);
    }

    pub fn get(&self, logical: LogicalBlas) -> Option<&BlasEntry> {
        self.lookup.get(&logical).map(|&i| &self.entries[i])
    }

    pub fn structure(&self, logical: LogicalBlas) -> Option<AccelStructure> {
        self.get(logical).map(|entry| entry.structure)
    }

    pub fn for_mesh(&self, mesh: usize) -> Option<&BlasEntry> {
        self.get(LogicalBlas::Dynamic { mesh })
    }

    /// Swaps in a new physical structure and returns the one it replaces.
    pub fn repoint(&mut self, logical: LogicalBlas, structure: AccelStructure) -> AccelStructure {
        let index = self.lookup[&logical];
        std::mem::replace(&mut self.entries[index].structure, structure)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BlasEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn destroy(&mut self, device: &mut dyn Device, ctx: &mut PassContext) {
        self.lookup.clear();
        for entry in self.entries.drain(..) {
            device.destroy_acceleration_structure(ctx.registry_mut(), entry.structure);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub instances: usize,
    pub blas_count: usize,
    pub geometries: usize,
    pub primitives: u64,
    pub scratch_bytes: u64,
    pub uncompacted_bytes: u64,
    pub compacted_bytes: u64,
    pub build_millis: u128,
    pub total_millis: u128,
}

/// Temporary state shared by the build and compact phases.
struct PendingBlas {
    logical: LogicalBlas,
    kind: BlasKind,
    structure: AccelStructure,
    sizes: BuildSizes,
    geometries: Vec<TriangleGeometry>,
    scratch_offset: u64,
}

/// Builds every bottom-level structure the scene needs. Blocks on the queue twice.
pub fn build_bottom_level(
    device: &mut dyn Device,
    ctx: &mut PassContext,
    scene: &Scene,
    classes: &Classification,
) -> Result<(BlasTable, BuildStats)> {
    let start = Instant::now();
    let staged = StagedScene::stage(scene, classes);
    let mut table = BlasTable::default();
    let mut stats = BuildStats {
        instances: classes.traced_count(),
        ..Default::default()
    };
    if staged.blases.is_empty() {
        info!("Scene has no traced geometry, skipping bottom-level builds");
        return Ok((table, stats));
    }

    let upload = device.create_buffer(
        ctx.registry_mut(),
        &BufferDesc {
            name: "blas upload".into(),
            size: staged.bytes.len() as u64,
            usage: vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
            location: MemoryLocation::Upload,
            initial_access: AccessKind::ShaderRead,
        },
    )?;
    device.write_buffer(upload, 0, &staged.bytes)?;

    let mut budget = ScratchBudget::new(device.limits().scratch_offset_alignment);
    let mut pending = Vec::with_capacity(staged.blases.len());
    for (i, blas) in staged.blases.iter().enumerate() {
        let geometries: Vec<_> = blas.geometries.iter().map(|g| g.resolve(upload)).collect();
        let sizes = device.acceleration_structure_sizes(
            AccelStructureLevel::Bottom,
            blas.kind.build_flags(),
            GeometryInput::Triangles(&geometries),
        );
        let structure = device.create_acceleration_structure(
            ctx.registry_mut(),
            &format!("blas {i} {:?}", blas.logical),
            AccelStructureLevel::Bottom,
            sizes.structure,
        )?;
        let scratch_offset = budget.push_build(sizes.build_scratch);

        stats.geometries += geometries.len();
        stats.primitives += geometries
            .iter()
            .map(|g| g.primitive_count() as u64)
            .sum::<u64>();
        stats.uncompacted_bytes += sizes.structure;
        pending.push(PendingBlas {
            logical: blas.logical,
            kind: blas.kind,
            structure,
            sizes,
            geometries,
            scratch_offset,
        });
    }
    stats.scratch_bytes = budget.build_total();

    let scratch = device.create_buffer(
        ctx.registry_mut(),
        &BufferDesc {
            name: "blas build scratch".into(),
            size: budget.build_total(),
            usage: vk::BufferUsageFlags::STORAGE_BUFFER,
            location: MemoryLocation::Device,
            initial_access: AccessKind::None,
        },
    )?;

    let compacted_count = pending.iter().filter(|p| p.kind.is_compacted()).count() as u32;
    let readback = device.create_buffer(
        ctx.registry_mut(),
        &BufferDesc {
            name: "blas compacted sizes".into(),
            size: 8 * u64::from(compacted_count.max(1)),
            usage: vk::BufferUsageFlags::TRANSFER_DST,
            location: MemoryLocation::Readback,
            initial_access: AccessKind::None,
        },
    )?;
    let query_pool = device.create_query_pool(compacted_count.max(1))?;

    // Phase 1: uncompacted builds plus size queries.
    let mut to_build: Vec<_> = pending
        .iter()
        .map(|p| PendingTransition::buffer(p.structure.buffer, AccessKind::AccelerationStructureBuild))
        .collect();
    to_build.push(PendingTransition::buffer(scratch, AccessKind::AccelerationStructureBuild));
    ctx.transition_all(&to_build)?;

    ctx.record(Command::BuildBottomLevel(
        pending
            .iter()
            .map(|p| BottomLevelBuild {
                dst: p.structure.id,
                src: None,
                flags: p.kind.build_flags(),
                geometries: p.geometries.clone(),
                scratch: BufferSlice {
                    buffer: scratch,
                    offset: p.scratch_offset,
                },
            })
            .collect(),
    ));

    let to_read: Vec<_> = pending
        .iter()
        .map(|p| PendingTransition::buffer(p.structure.buffer, AccessKind::ShaderRead))
        .collect();
    ctx.transition_all(&to_read)?;

    if compacted_count > 0 {
        ctx.transition(&[PendingTransition::buffer(readback, AccessKind::CopyDestination)])?;
        ctx.record(Command::ResetQueries {
            pool: query_pool,
            first: 0,
            count: compacted_count,
        });
        ctx.record(Command::WriteCompactedSizes {
            pool: query_pool,
            structures: pending
                .iter()
                .filter(|p| p.kind.is_compacted())
                .map(|p| p.structure.id)
                .collect(),
        });
        ctx.record(Command::CopyQueryResults {
            pool: query_pool,
            count: compacted_count,
            dst: BufferSlice {
                buffer: readback,
                offset: 0,
            },
        });
        ctx.transition(&[PendingTransition::buffer(readback, AccessKind::HostRead)])?;
    }

    let build_start = Instant::now();
    device.submit_and_wait(ctx.finish())?;
    stats.build_millis = build_start.elapsed().as_millis();

    // Phase 2: copy rigid structures into exactly sized ones.
    let mut compacted_sizes = vec![0u64; compacted_count as usize];
    device.read_buffer(readback, 0, bytemuck::cast_slice_mut(&mut compacted_sizes))?;

    let mut compacted = Vec::with_capacity(compacted_sizes.len());
    for (p, &size) in pending.iter().filter(|p| p.kind.is_compacted()).zip(&compacted_sizes) {
        debug_assert!(
            size <= p.sizes.structure,
            "{:?} reports a compacted size of {} above its {} byte allocation",
            p.logical,
            size,
            p.sizes.structure
        );
        debug!(
            "{:?} compacts from {} to {} bytes",
            p.logical, p.sizes.structure, size
        );
        let structure = device.create_acceleration_structure(
            ctx.registry_mut(),
            &format!("blas {:?} compacted", p.logical),
            AccelStructureLevel::Bottom,
            size,
        )?;
        compacted.push((p.logical, structure));
    }

    if !compacted.is_empty() {
        let to_copy: Vec<_> = compacted
            .iter()
            .map(|(_, s)| PendingTransition::buffer(s.buffer, AccessKind::AccelerationStructureBuild))
            .collect();
        ctx.transition_all(&to_copy)?;
        for (p, (_, dst)) in pending.iter().filter(|p| p.kind.is_compacted()).zip(&compacted) {
            ctx.record(Command::CompactCopy {
                src: p.structure.id,
                dst: dst.id,
            });
        }
        let to_read: Vec<_> = compacted
            .iter()
            .map(|(_, s)| PendingTransition::buffer(s.buffer, AccessKind::ShaderRead))
            .collect();
        ctx.transition_all(&to_read)?;
        device.submit_and_wait(ctx.finish())?;
    }

    // Retire: everything points at the final structures before the temporaries go away.
    for p in &pending {
        table.insert(BlasEntry {
            logical: p.logical,
            kind: p.kind,
            structure: p.structure,
            sizes: p.sizes,
            geometry_count: p.geometries.len(),
            primitive_count: p.geometries.iter().map(|g| g.primitive_count() as u64).sum(),
        });
    }
    for (logical, structure) in compacted {
        let temporary = table.repoint(logical, structure);
        device.destroy_acceleration_structure(ctx.registry_mut(), temporary);
    }
    stats.compacted_bytes = table.iter().map(|e| e.structure.size).sum();
    stats.blas_count = table.len();

    device.destroy_query_pool(query_pool);
    device.destroy_buffer(ctx.registry_mut(), readback);
    device.destroy_buffer(ctx.registry_mut(), scratch);
    device.destroy_buffer(ctx.registry_mut(), upload);

    stats.total_millis = start.elapsed().as_millis();
    info!(
        "BVH: {} instances in {} BLAS, {} geometries, {} primitives",
        stats.instances, stats.blas_count, stats.geometries, stats.primitives
    );
    info!(
        "BVH: {:.2} MiB scratch, {:.2} MiB -> {:.2} MiB after compaction, build {} ms, total {} ms",
        mib(stats.scratch_bytes),
        mib(stats.uncompacted_bytes),
        mib(stats.compacted_bytes),
        stats.build_millis,
        stats.total_millis
    );
    Ok((table, stats))
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
