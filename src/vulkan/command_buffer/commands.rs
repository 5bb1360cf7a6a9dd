use ash::vk;

use crate::{
    arena::PipelineId,
    device::BufferSlice,
    vulkan::{context::Context, device::Resources},
};

pub fn cmd_copy_buffer(
    command_buffer: vk::CommandBuffer,
    context: &Context,
    resources: &Resources,
    src: BufferSlice,
    dst: BufferSlice,
    size: u64,
) {
    let region = vk::BufferCopy {
        src_offset: src.offset,
        dst_offset: dst.offset,
        size,
    };
    unsafe {
        context.device.cmd_copy_buffer(
            command_buffer,
            resources.buffer(src.buffer).inner,
            resources.buffer(dst.buffer).inner,
            std::slice::from_ref(&region),
        )
    }
}

pub fn cmd_dispatch(
    command_buffer: vk::CommandBuffer,
    context: &Context,
    resources: &Resources,
    pipeline: PipelineId,
    push_constants: &[u8],
    groups: [u32; 3],
) {
    let pipeline = resources.pipeline(pipeline);
    let device = &context.device;
    unsafe {
        device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline.inner);
        if !push_constants.is_empty() {
            device.cmd_push_constants(
                command_buffer,
                pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                push_constants,
            );
        }
        device.cmd_dispatch(command_buffer, groups[0], groups[1], groups[2]);
    }
}
