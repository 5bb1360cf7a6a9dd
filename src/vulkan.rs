//! The Vulkan backend: a headless context and a [`crate::device::Device`] implementation.

pub mod acceleration_structure;
pub mod buffer;
pub mod command_buffer;
pub mod command_pool;
pub mod compute_pipeline;
pub mod context;
pub mod device;
pub mod frame_ring;
pub mod image;
pub mod query_pool;
pub mod sync_manager;
