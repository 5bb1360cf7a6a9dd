//! Bottom- and top-level acceleration structures over a [`crate::scene::Scene`].
//!
//! Bottom-level structures are built once at load ([`bottom_level`]), with deformable ones
//! refreshed every frame ([`deformable`]). Both top-level structures are rebuilt every frame
//! ([`top_level`]).

pub mod bottom_level;
pub mod classify;
pub mod deformable;
pub mod scratch;
pub mod staging;
pub mod top_level;

use ash::vk;

/// Placement alignment of top-level instance arrays.
pub const INSTANCE_ALIGNMENT: u64 = 16;

pub const RIGID_BUILD_FLAGS: vk::BuildAccelerationStructureFlagsKHR =
    vk::BuildAccelerationStructureFlagsKHR::from_raw(
        vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE.as_raw()
            | vk::BuildAccelerationStructureFlagsKHR::ALLOW_COMPACTION.as_raw(),
    );

/// Deformable structures are refitted and rebuilt in place, never compacted.
pub const DEFORMABLE_BUILD_FLAGS: vk::BuildAccelerationStructureFlagsKHR =
    vk::BuildAccelerationStructureFlagsKHR::from_raw(
        vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_BUILD.as_raw()
            | vk::BuildAccelerationStructureFlagsKHR::ALLOW_UPDATE.as_raw(),
    );

pub const TOP_LEVEL_BUILD_FLAGS: vk::BuildAccelerationStructureFlagsKHR =
    vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;
