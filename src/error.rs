use ash::vk;
use thiserror::Error;

use crate::arena::ResourceHandle;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("vulkan call failed: {0}")]
    Vulkan(#[from] vk::Result),

    #[error("gpu allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("barrier batch overflow, raise the capacity above {capacity}")]
    BarrierOverflow { capacity: usize },

    #[error("resource {0:?} appears twice in one barrier batch")]
    DuplicateTransition(ResourceHandle),

    #[error("stream region of {capacity} bytes exhausted by a {requested} byte request")]
    StreamOverflow { requested: u64, capacity: u64 },

    #[error("mesh {0} has no bottom-level structure")]
    MissingStructure(usize),

    #[error("buffer {0:?} is not host visible")]
    NotHostVisible(ResourceHandle),

    #[error("no usable vulkan device: {0}")]
    NoDevice(String),

    #[error("could not load shader {path}: {source}")]
    Shader {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
