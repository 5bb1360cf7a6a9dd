use log::debug;

use crate::{
    arena::ResourceHandle,
    device::{Command, CommandList},
    error::Result,
    vulkan::sync_manager::{
        resource_access::ResourceState,
        transition_batcher::{PendingTransition, TransitionBatcher},
        ResourceStateRegistry,
    },
};

/// Handed to every pass-recording function: the registry, the batcher that guards it, and the
/// command list being recorded.
pub struct PassContext {
    registry: ResourceStateRegistry,
    batcher: TransitionBatcher,
    commands: CommandList,
}

impl PassContext {
    pub fn new(batcher: TransitionBatcher) -> Self {
        Self {
            registry: ResourceStateRegistry::new(),
            batcher,
            commands: CommandList::new(),
        }
    }

    pub fn registry(&self) -> &ResourceStateRegistry {
        &self.registry
    }

    /// For devices registering and unregistering resources.
    pub fn registry_mut(&mut self) -> &mut ResourceStateRegistry {
        &mut self.registry
    }

    pub fn batcher(&self) -> &TransitionBatcher {
        &self.batcher
    }

    /// Records the barriers needed to reach `desired`. Returns how many were recorded.
    pub fn transition(&mut self, desired: &[PendingTransition]) -> Result<usize> {
        let batch = self.batcher.batch(&mut self.registry, desired)?;
        let count = batch.len();
        if count > 0 {
            self.commands.push(Command::Barrier(batch));
        }
        Ok(count)
    }

    /// Like [`Self::transition`], but splits lists of arbitrary length into consecutive
    /// batches. Meant for load-time work over every structure of a scene.
    pub fn transition_all(&mut self, desired: &[PendingTransition]) -> Result<usize> {
        let mut count = 0;
        for chunk in desired.chunks(self.batcher.capacity()) {
            count += self.transition(chunk)?;
        }
        Ok(count)
    }

    pub fn fold_external(&mut self, reported: &[(ResourceHandle, ResourceState)]) {
        debug!("Folding {} externally established states", reported.len());
        self.batcher.fold_external(&mut self.registry, reported);
    }

    pub fn record(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn commands(&self) -> &CommandList {
        &self.commands
    }

    /// Mutable access for collaborators that record their own commands.
    pub fn commands_mut(&mut self) -> &mut CommandList {
        &mut self.commands
    }

    /// Hands over everything recorded so far. States stay, only commands are taken.
    #[must_use]
    pub fn finish(&mut self) -> CommandList {
        std::mem::take(&mut self.commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::sync_manager::resource_access::{AccessKind, ResourceKind};

    #[test]
    fn transition_all_splits_by_capacity() {
        let mut ctx = PassContext::new(TransitionBatcher::new(4));
        let desired: Vec<_> = (0..10)
            .map(|i| {
                let handle = ctx.registry_mut().register(
                    ResourceKind::Buffer,
                    format!("blas {i}"),
                    ResourceState::UNUSED,
                );
                PendingTransition::buffer(handle, AccessKind::AccelerationStructureBuild)
            })
            .collect();

        assert_eq!(ctx.transition_all(&desired).unwrap(), 10);
        let commands = ctx.finish();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands.barrier_count(), 10);
        assert!(ctx.commands().is_empty());
    }

    #[test]
    fn redundant_transition_records_nothing() {
        let mut ctx = PassContext::new(TransitionBatcher::default());
        let handle = ctx.registry_mut().register(
            ResourceKind::Buffer,
            "instances",
            ResourceState::buffer(AccessKind::ShaderRead),
        );
        let count = ctx
            .transition(&[PendingTransition::buffer(handle, AccessKind::ShaderRead)])
            .unwrap();
        assert_eq!(count, 0);
        assert!(ctx.commands().is_empty());
    }
}
