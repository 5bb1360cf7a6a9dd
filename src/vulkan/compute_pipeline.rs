use std::{ffi::CStr, fs::File, path::Path, sync::Arc};

use ash::vk;

use crate::{
    device::ComputePipelineDesc,
    error::{CoreError, Result},
};

use super::context::Context;

const SHADER_ENTRY_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let shader_error = |source| CoreError::Shader {
        path: path.display().to_string(),
        source,
    };
    let mut file = File::open(path).map_err(shader_error)?;
    ash::util::read_spv(&mut file).map_err(shader_error)
}

/// A compute pipeline with push constants and nothing else. Shaders reach their buffers through
/// device addresses passed as push constants.
pub struct ComputePipeline {
    pub inner: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub push_constant_size: u32,
    context: Arc<Context>,
}

impl ComputePipeline {
    pub fn new(context: Arc<Context>, desc: &ComputePipelineDesc) -> Result<Self> {
        let device = &context.device;

        let push_constant_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(desc.push_constant_size);
        let ranges: &[vk::PushConstantRange] = if desc.push_constant_size > 0 {
            std::slice::from_ref(&push_constant_range)
        } else {
            &[]
        };
        let layout_info = vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(ranges);
        let layout = unsafe { device.create_pipeline_layout(&layout_info, None) }?;

        let shader_module = {
            let create_info = vk::ShaderModuleCreateInfo::builder().code(&desc.spirv);
            match unsafe { device.create_shader_module(&create_info, None) } {
                Ok(module) => module,
                Err(err) => {
                    unsafe { device.destroy_pipeline_layout(layout, None) };
                    return Err(err.into());
                }
            }
        };

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .module(shader_module)
            .name(SHADER_ENTRY_NAME)
            .stage(vk::ShaderStageFlags::COMPUTE);
        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(*stage)
            .layout(layout);

        let result = unsafe {
            device.create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&create_info),
                None,
            )
        };
        // The module is only needed while creating the pipeline.
        unsafe { device.destroy_shader_module(shader_module, None) };

        let inner = match result {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(err.into());
            }
        };

        log::debug!("Created compute pipeline {}", desc.name);
        Ok(Self {
            inner,
            layout,
            push_constant_size: desc.push_constant_size,
            context,
        })
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.context.device.destroy_pipeline(self.inner, None);
            self.context
                .device
                .destroy_pipeline_layout(self.layout, None);
        }
    }
}
