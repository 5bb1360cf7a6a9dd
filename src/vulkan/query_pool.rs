use std::sync::Arc;

use ash::vk;

use crate::error::Result;

use super::context::Context;

/// Compacted size queries, one per structure.
pub struct QueryPool {
    pub inner: vk::QueryPool,
    pub count: u32,
    context: Arc<Context>,
}

impl QueryPool {
    pub fn new(context: Arc<Context>, count: u32) -> Result<Self> {
        let create_info = vk::QueryPoolCreateInfo::builder()
            .query_type(vk::QueryType::ACCELERATION_STRUCTURE_COMPACTED_SIZE_KHR)
            .query_count(count.max(1));

        let inner = unsafe { context.device.create_query_pool(&create_info, None) }?;
        Ok(Self {
            inner,
            count,
            context,
        })
    }
}

impl Drop for QueryPool {
    fn drop(&mut self) {
        unsafe { self.context.device.destroy_query_pool(self.inner, None) };
    }
}
