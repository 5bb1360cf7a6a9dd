use ash::vk;
use log::trace;

use crate::{
    arena::ResourceHandle,
    device::{BufferDesc, BufferSlice, Device, MemoryLocation},
    error::{CoreError, Result},
    pass::PassContext,
    utility::aligned_size,
    vulkan::sync_manager::resource_access::AccessKind,
};

/// Where streamed bytes ended up. Valid until the frame's slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLocation {
    pub buffer: ResourceHandle,
    pub offset: u64,
    pub alignment: u64,
}

impl StreamLocation {
    pub fn slice(&self) -> BufferSlice {
        BufferSlice {
            buffer: self.buffer,
            offset: self.offset,
        }
    }
}

/// Per-frame upload of small, transient data.
pub trait Streamer {
    fn stream(
        &mut self,
        device: &mut dyn Device,
        bytes: &[u8],
        alignment: u64,
    ) -> Result<StreamLocation>;
}

/// One host visible buffer, split into a region per queued frame. A region is only reused
/// once the frame that wrote it has been waited for.
pub struct FrameStreamer {
    buffer: ResourceHandle,
    region_size: u64,
    region_count: u64,
    region: u64,
    cursor: u64,
}

const REGION_ALIGNMENT: u64 = 256;

impl FrameStreamer {
    pub fn new(
        device: &mut dyn Device,
        ctx: &mut PassContext,
        region_size: u64,
        queued_frames: u32,
    ) -> Result<Self> {
        let region_size = aligned_size(region_size.max(1), REGION_ALIGNMENT);
        let region_count = u64::from(queued_frames.max(1));
        let buffer = device.create_buffer(
            ctx.registry_mut(),
            &BufferDesc {
                name: "frame streamer".into(),
                size: region_size * region_count,
                usage: vk::BufferUsageFlags::TRANSFER_SRC
                    | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
                location: MemoryLocation::Upload,
                initial_access: AccessKind::ShaderRead,
            },
        )?;
        Ok(Self {
            buffer,
            region_size,
            region_count,
            region: 0,
            cursor: 0,
        })
    }

    pub fn begin_frame(&mut self, frame_index: u64) {
        self.region = frame_index % self.region_count;
        self.cursor = 0;
    }

    pub fn buffer(&self) -> ResourceHandle {
        self.buffer
    }

    pub fn used(&self) -> u64 {
        self.cursor
    }

    pub fn destroy(self, device: &mut dyn Device, ctx: &mut PassContext) {
        device.destroy_buffer(ctx.registry_mut(), self.buffer);
    }
}

impl Streamer for FrameStreamer {
    fn stream(
        &mut self,
        device: &mut dyn Device,
        bytes: &[u8],
        alignment: u64,
    ) -> Result<StreamLocation> {
        let start = aligned_size(self.cursor, alignment);
        let end = start + bytes.len() as u64;
        if end > self.region_size {
            return Err(CoreError::StreamOverflow {
                requested: bytes.len() as u64,
                capacity: self.region_size,
            });
        }

        let offset = self.region * self.region_size + start;
        if !bytes.is_empty() {
            device.write_buffer(self.buffer, offset, bytes)?;
        }
        trace!("Streamed {} bytes to offset {}", bytes.len(), offset);
        self.cursor = end;
        Ok(StreamLocation {
            buffer: self.buffer,
            offset,
            alignment,
        })
    }
}
