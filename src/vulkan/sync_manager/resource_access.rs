use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    None,
    /// Sampled, read through a storage view, or consumed as build input.
    ShaderRead,
    /// Read-write storage access.
    Storage,
    CopySource,
    CopyDestination,
    /// Written (and read) by acceleration structure builds, updates and copies.
    AccelerationStructureBuild,
    HostRead,
}

impl AccessKind {
    /// Accesses that can write. Two of these in a row always need a barrier.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            AccessKind::Storage | AccessKind::CopyDestination | AccessKind::AccelerationStructureBuild
        )
    }

    pub fn stage(self) -> vk::PipelineStageFlags2 {
        match self {
            AccessKind::None => vk::PipelineStageFlags2::NONE,
            AccessKind::ShaderRead => {
                vk::PipelineStageFlags2::COMPUTE_SHADER
                    | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
                    | vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
            }
            AccessKind::Storage => {
                vk::PipelineStageFlags2::COMPUTE_SHADER
                    | vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR
            }
            AccessKind::CopySource | AccessKind::CopyDestination => {
                vk::PipelineStageFlags2::TRANSFER
            }
            AccessKind::AccelerationStructureBuild => {
                vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR
            }
            AccessKind::HostRead => vk::PipelineStageFlags2::HOST,
        }
    }

    pub fn access(self) -> vk::AccessFlags2 {
        match self {
            AccessKind::None => vk::AccessFlags2::NONE,
            AccessKind::ShaderRead => {
                vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
            }
            AccessKind::Storage => {
                vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE
            }
            AccessKind::CopySource => vk::AccessFlags2::TRANSFER_READ,
            AccessKind::CopyDestination => vk::AccessFlags2::TRANSFER_WRITE,
            AccessKind::AccelerationStructureBuild => {
                vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                    | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR
            }
            AccessKind::HostRead => vk::AccessFlags2::HOST_READ,
        }
    }

    /// The layout an image takes for this access.
    pub fn image_layout(self) -> vk::ImageLayout {
        match self {
            AccessKind::None => vk::ImageLayout::UNDEFINED,
            AccessKind::ShaderRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            AccessKind::Storage | AccessKind::HostRead => vk::ImageLayout::GENERAL,
            AccessKind::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            AccessKind::CopyDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            AccessKind::AccelerationStructureBuild => vk::ImageLayout::UNDEFINED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Buffer,
    Texture,
}

/// Last known access of a resource. Buffers always carry `UNDEFINED` as layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceState {
    pub access: AccessKind,
    pub layout: vk::ImageLayout,
}

impl ResourceState {
    pub const UNUSED: ResourceState = ResourceState {
        access: AccessKind::None,
        layout: vk::ImageLayout::UNDEFINED,
    };

    pub fn buffer(access: AccessKind) -> Self {
        Self {
            access,
            layout: vk::ImageLayout::UNDEFINED,
        }
    }

    pub fn texture(access: AccessKind) -> Self {
        Self {
            access,
            layout: access.image_layout(),
        }
    }

    pub fn for_kind(kind: ResourceKind, access: AccessKind) -> Self {
        match kind {
            ResourceKind::Buffer => Self::buffer(access),
            ResourceKind::Texture => Self::texture(access),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_layout_follows_access() {
        assert_eq!(
            ResourceState::texture(AccessKind::Storage).layout,
            vk::ImageLayout::GENERAL
        );
        assert_eq!(
            ResourceState::texture(AccessKind::CopyDestination).layout,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(
            ResourceState::buffer(AccessKind::Storage).layout,
            vk::ImageLayout::UNDEFINED
        );
    }

    #[test]
    fn only_writing_accesses_count_as_writes() {
        assert!(AccessKind::Storage.is_write());
        assert!(AccessKind::AccelerationStructureBuild.is_write());
        assert!(!AccessKind::ShaderRead.is_write());
        assert!(!AccessKind::CopySource.is_write());
        assert!(!AccessKind::None.is_write());
    }
}
