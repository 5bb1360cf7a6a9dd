mod common;

use common::{mixed_scene, MockDevice, SCRATCH_ALIGNMENT};
use rt_scheduler::{
    accel::{
        bottom_level::{build_bottom_level, BlasKind, BlasTable, BuildStats, LogicalBlas},
        classify::Classification,
    },
    device::Command,
    pass::PassContext,
    scene::Scene,
    utility::aligned_size,
    vulkan::sync_manager::{resource_access::AccessKind, transition_batcher::TransitionBatcher},
};

fn build() -> (MockDevice, PassContext, BlasTable, BuildStats) {
    let scene = mixed_scene();
    let classes = Classification::classify(&scene);
    let mut device = MockDevice::new();
    let mut ctx = PassContext::new(TransitionBatcher::default());
    let (table, stats) = build_bottom_level(&mut device, &mut ctx, &scene, &classes).unwrap();
    (device, ctx, table, stats)
}

#[test]
fn merged_buckets_and_dynamic_meshes_get_one_structure_each() {
    let (_, _, table, stats) = build();

    assert_eq!(table.len(), 3);
    let opaque = table.get(LogicalBlas::MergedOpaque).unwrap();
    let transparent = table.get(LogicalBlas::MergedTransparent).unwrap();
    let dynamic = table.for_mesh(1).unwrap();
    assert_eq!(opaque.geometry_count, 10);
    assert_eq!(transparent.geometry_count, 2);
    assert_eq!(dynamic.geometry_count, 1);
    assert_eq!(opaque.kind, BlasKind::RigidStatic);
    assert_eq!(dynamic.kind, BlasKind::RigidDynamic);
    assert!(table.get(LogicalBlas::MergedEmissive).is_none());

    assert_eq!(stats.instances, 13);
    assert_eq!(stats.blas_count, 3);
    assert_eq!(stats.geometries, 13);
    assert_eq!(stats.primitives, 10 * 12 + 2 * 12 + 1);
}

#[test]
fn compacted_structures_replace_the_temporaries() {
    let (device, ctx, table, stats) = build();

    for entry in table.iter() {
        assert_eq!(entry.structure.size, MockDevice::compacted_size(entry.sizes.structure));
        assert!(entry.structure.size <= entry.sizes.structure);
        assert_eq!(device.structure_size(entry.structure.id), entry.structure.size);
        assert_eq!(
            ctx.registry().get(entry.structure.buffer).access,
            AccessKind::ShaderRead
        );
    }
    assert!(stats.compacted_bytes < stats.uncompacted_bytes);

    // Only the final structures survive, every upload, scratch and readback buffer is gone.
    assert_eq!(device.live_structures(), 3);
    assert_eq!(device.destroyed_structures, 3);
    assert_eq!(device.buffers.len(), 3);
    assert_eq!(ctx.registry().len(), 3);
    assert!(device.query_pools.is_empty());
    assert_eq!(device.submitted.len(), 2);
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "above its")]
fn compacted_sizes_above_the_allocation_are_rejected() {
    let scene = mixed_scene();
    let classes = Classification::classify(&scene);
    let mut device = MockDevice {
        oversized_compaction: true,
        ..Default::default()
    };
    let mut ctx = PassContext::new(TransitionBatcher::default());
    let _ = build_bottom_level(&mut device, &mut ctx, &scene, &classes);
}

#[test]
fn builds_get_disjoint_aligned_scratch_ranges() {
    let (device, _, table, stats) = build();

    let expected: u64 = table
        .iter()
        .map(|e| aligned_size(e.sizes.build_scratch, SCRATCH_ALIGNMENT))
        .sum();
    assert_eq!(stats.scratch_bytes, expected);

    let builds = device.submitted[0]
        .commands()
        .iter()
        .find_map(|c| match c {
            Command::BuildBottomLevel(builds) => Some(builds.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(builds.len(), 3);

    let mut ranges: Vec<_> = builds
        .iter()
        .zip(table.iter())
        .map(|(b, e)| (b.scratch.offset, b.scratch.offset + e.sizes.build_scratch))
        .collect();
    ranges.sort_unstable();
    for window in ranges.windows(2) {
        assert!(window[0].1 <= window[1].0, "scratch ranges overlap: {ranges:?}");
    }
    assert!(ranges.iter().all(|(start, _)| start % SCRATCH_ALIGNMENT == 0));
}

#[test]
fn compaction_sizes_are_queried_for_every_rigid_structure() {
    let (device, _, _, _) = build();

    let commands = device.submitted[0].commands();
    let written = commands.iter().find_map(|c| match c {
        Command::WriteCompactedSizes { structures, .. } => Some(structures.len()),
        _ => None,
    });
    assert_eq!(written, Some(3));

    let copies = device.submitted[1]
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::CompactCopy { .. }))
        .count();
    assert_eq!(copies, 3);
}

#[test]
fn empty_scene_builds_nothing() {
    let scene = Scene::default();
    let classes = Classification::classify(&scene);
    let mut device = MockDevice::new();
    let mut ctx = PassContext::new(TransitionBatcher::default());
    let (table, stats) = build_bottom_level(&mut device, &mut ctx, &scene, &classes).unwrap();
    assert!(table.is_empty());
    assert_eq!(stats.blas_count, 0);
    assert!(device.submitted.is_empty());
}
