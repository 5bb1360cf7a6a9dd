use log::trace;

use ash::vk;

use crate::error::Result;

use super::{command_buffer::CommandBuffer, command_pool::CommandPool};

struct FrameSlot {
    command_buffer: CommandBuffer,
    fence: vk::Fence,
    submitted: bool,
}

/// One command buffer and fence per queued frame. A slot is reused once the GPU has signalled
/// its fence.
pub struct FrameRing {
    slots: Vec<FrameSlot>,
    current: usize,
    command_pool: CommandPool,
}

impl FrameRing {
    pub fn new(command_pool: CommandPool, queued_frames: u32) -> Result<Self> {
        let device = &command_pool.context().device;
        let mut slots = Vec::with_capacity(queued_frames as usize);
        for _ in 0..queued_frames.max(1) {
            let command_buffer = CommandBuffer::allocate(command_pool.clone())?;
            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }?;
            slots.push(FrameSlot {
                command_buffer,
                fence,
                submitted: false,
            });
        }
        Ok(Self {
            slots,
            current: 0,
            command_pool,
        })
    }

    /// Blocks until the frame that last used this index's slot has finished.
    pub fn begin(&mut self, frame_index: u64) -> Result<()> {
        let device = &self.command_pool.context().device;
        self.current = (frame_index % self.slots.len() as u64) as usize;
        let slot = &mut self.slots[self.current];
        if slot.submitted {
            trace!("Waiting for frame slot {}", self.current);
            unsafe {
                device.wait_for_fences(std::slice::from_ref(&slot.fence), true, u64::MAX)?;
                device.reset_fences(std::slice::from_ref(&slot.fence))?;
            }
            slot.submitted = false;
        }
        Ok(())
    }

    pub fn current(&self) -> (&CommandBuffer, vk::Fence) {
        let slot = &self.slots[self.current];
        (&slot.command_buffer, slot.fence)
    }

    pub fn mark_submitted(&mut self) {
        self.slots[self.current].submitted = true;
    }
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        let device = &self.command_pool.context().device;
        for slot in &self.slots {
            unsafe { device.destroy_fence(slot.fence, None) };
        }
    }
}
