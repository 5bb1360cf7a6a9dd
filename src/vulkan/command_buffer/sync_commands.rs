use ash::vk;

use crate::vulkan::{
    buffer::Buffer,
    context::Context,
    device::Resources,
    image::Image,
    sync_manager::{resource_access::ResourceState, transition_batcher::BarrierBatch},
};

pub struct CmdPipelineBarrier<'resources> {
    pub dependency_flags: vk::DependencyFlags,
    pub buffer_memory_barriers: Vec<BufferMemoryBarrier<'resources>>,
    pub image_memory_barriers: Vec<ImageMemoryBarrier<'resources>>,
}

#[derive(Clone)]
pub struct BufferMemoryBarrier<'a> {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub buffer: &'a Buffer,
    pub offset: vk::DeviceSize,
    pub size: vk::DeviceSize,
}

#[derive(Clone)]
pub struct ImageMemoryBarrier<'a> {
    pub src_stage_mask: vk::PipelineStageFlags2,
    pub src_access_mask: vk::AccessFlags2,
    pub dst_stage_mask: vk::PipelineStageFlags2,
    pub dst_access_mask: vk::AccessFlags2,
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub image: &'a Image,
    pub subresource_range: vk::ImageSubresourceRange,
}

impl<'resources> CmdPipelineBarrier<'resources> {
    pub fn execute(self, command_buffer: vk::CommandBuffer, context: &Context) {
        let buffer_memory_barriers: Vec<_> = self
            .buffer_memory_barriers
            .into_iter()
            .map(|v| {
                vk::BufferMemoryBarrier2::builder()
                    .src_stage_mask(v.src_stage_mask)
                    .src_access_mask(v.src_access_mask)
                    .dst_stage_mask(v.dst_stage_mask)
                    .dst_access_mask(v.dst_access_mask)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(v.buffer.inner)
                    .offset(v.offset)
                    .size(v.size)
                    .build() // Calling build is legal here
            })
            .collect();

        let image_memory_barriers: Vec<_> = self
            .image_memory_barriers
            .into_iter()
            .map(|v| {
                vk::ImageMemoryBarrier2::builder()
                    .src_stage_mask(v.src_stage_mask)
                    .src_access_mask(v.src_access_mask)
                    .dst_stage_mask(v.dst_stage_mask)
                    .dst_access_mask(v.dst_access_mask)
                    .old_layout(v.old_layout)
                    .new_layout(v.new_layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(v.image.inner)
                    .subresource_range(v.subresource_range)
                    .build()
            })
            .collect();
        unsafe {
            context.synchronisation2_loader.cmd_pipeline_barrier2(
                command_buffer,
                &vk::DependencyInfo::builder()
                    .dependency_flags(self.dependency_flags)
                    .buffer_memory_barriers(&buffer_memory_barriers)
                    .image_memory_barriers(&image_memory_barriers),
            );
        };
    }
}

/// Translates one batch into a single `vkCmdPipelineBarrier2`. Whether a barrier is for a buffer
/// or an image follows from which table owns the handle.
pub fn cmd_barrier_batch(
    command_buffer: vk::CommandBuffer,
    context: &Context,
    resources: &Resources,
    batch: &BarrierBatch,
) {
    if batch.is_empty() {
        return;
    }

    let mut barrier = CmdPipelineBarrier {
        dependency_flags: vk::DependencyFlags::empty(),
        buffer_memory_barriers: Vec::new(),
        image_memory_barriers: Vec::new(),
    };

    for b in batch.iter() {
        let (src_stage_mask, src_access_mask) = masks(b.before);
        let (dst_stage_mask, dst_access_mask) = masks(b.after);

        if let Some(image) = resources.image(b.resource) {
            barrier.image_memory_barriers.push(ImageMemoryBarrier {
                src_stage_mask,
                src_access_mask,
                dst_stage_mask,
                dst_access_mask,
                old_layout: b.before.layout,
                new_layout: b.after.layout,
                image,
                subresource_range: image.full_subresource_range(),
            });
        } else {
            barrier.buffer_memory_barriers.push(BufferMemoryBarrier {
                src_stage_mask,
                src_access_mask,
                dst_stage_mask,
                dst_access_mask,
                buffer: resources.buffer(b.resource),
                offset: 0,
                size: vk::WHOLE_SIZE,
            });
        }
    }

    barrier.execute(command_buffer, context);
}

fn masks(state: ResourceState) -> (vk::PipelineStageFlags2, vk::AccessFlags2) {
    (state.access.stage(), state.access.access())
}
