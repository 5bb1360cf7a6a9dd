mod accel_commands;
mod commands;
mod sync_commands;

use ash::vk::{self};
use log::trace;

use crate::{device::Command, device::CommandList, error::Result};

use super::{command_pool::CommandPool, device::Resources};

/// A primary command buffer that is re-recorded from a [`CommandList`] before every submission.
///
/// Has to be kept alive as long as the GPU is still executing it.
pub struct CommandBuffer {
    pub inner: vk::CommandBuffer,
    command_pool: CommandPool,
}

impl CommandBuffer {
    pub fn allocate(command_pool: CommandPool) -> Result<Self> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(1)
            .command_pool(*command_pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        let inner =
            unsafe { command_pool.context().device.allocate_command_buffers(&allocate_info) }?[0];

        Ok(Self {
            inner,
            command_pool,
        })
    }

    /// Resets the buffer and records every command in order.
    pub fn record(&self, resources: &Resources, commands: CommandList) -> Result<()> {
        let context = self.command_pool.context();
        let device = &context.device;

        unsafe {
            device.reset_command_buffer(self.inner, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(self.inner, &begin_info)?;
        }

        trace!("Recording {} commands", commands.len());
        for command in commands {
            let cb = self.inner;
            match command {
                Command::Barrier(batch) => {
                    sync_commands::cmd_barrier_batch(cb, context, resources, &batch)
                }
                Command::BuildBottomLevel(builds) => {
                    accel_commands::cmd_build_bottom_level(cb, context, resources, &builds)
                }
                Command::BuildTopLevel(builds) => {
                    accel_commands::cmd_build_top_level(cb, context, resources, &builds)
                }
                Command::ResetQueries { pool, first, count } => {
                    accel_commands::cmd_reset_queries(cb, context, resources, pool, first, count)
                }
                Command::WriteCompactedSizes { pool, structures } => {
                    accel_commands::cmd_write_compacted_sizes(
                        cb,
                        context,
                        resources,
                        pool,
                        &structures,
                    )
                }
                Command::CopyQueryResults { pool, count, dst } => {
                    accel_commands::cmd_copy_query_results(cb, context, resources, pool, count, dst)
                }
                Command::CompactCopy { src, dst } => {
                    accel_commands::cmd_compact_copy(cb, context, resources, src, dst)
                }
                Command::CopyBuffer { src, dst, size } => {
                    commands::cmd_copy_buffer(cb, context, resources, src, dst, size)
                }
                Command::Dispatch {
                    pipeline,
                    push_constants,
                    groups,
                } => commands::cmd_dispatch(cb, context, resources, pipeline, &push_constants, groups),
            }
        }

        unsafe { device.end_command_buffer(self.inner) }?;
        Ok(())
    }

    pub fn submit(&self, fence: vk::Fence) -> Result<()> {
        let context = self.command_pool.context();
        let submit_info =
            vk::SubmitInfo::builder().command_buffers(std::slice::from_ref(&self.inner));

        unsafe {
            context
                .device
                .queue_submit(context.queue, std::slice::from_ref(&submit_info), fence)
        }?;
        Ok(())
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.command_pool.context().device.free_command_buffers(
                *self.command_pool,
                std::slice::from_ref(&self.inner),
            )
        }
    }
}
