use log::trace;
use smallvec::SmallVec;

use crate::{
    arena::ResourceHandle,
    error::{CoreError, Result},
};

use super::{
    resource_access::{AccessKind, ResourceState},
    ResourceStateRegistry,
};

pub const DEFAULT_BATCH_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransition {
    pub resource: ResourceHandle,
    pub state: ResourceState,
}

impl PendingTransition {
    pub fn buffer(resource: ResourceHandle, access: AccessKind) -> Self {
        Self {
            resource,
            state: ResourceState::buffer(access),
        }
    }

    pub fn texture(resource: ResourceHandle, access: AccessKind) -> Self {
        Self {
            resource,
            state: ResourceState::texture(access),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Barrier {
    pub resource: ResourceHandle,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Barriers that are applied together. Never holds two barriers for the same resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BarrierBatch {
    pub barriers: SmallVec<[Barrier; DEFAULT_BATCH_CAPACITY]>,
}

impl BarrierBatch {
    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Barrier> {
        self.barriers.iter()
    }
}

/// Turns desired states into the barriers that are actually needed.
#[derive(Debug, Clone)]
pub struct TransitionBatcher {
    capacity: usize,
}

impl TransitionBatcher {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "A barrier batch needs room for at least one barrier");
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Emits a barrier for every entry whose state differs from the registered one, and for
    /// every write followed by another write. The registry is updated for emitted barriers only.
    /// Output order follows input order.
    ///
    /// Running out of capacity is a configuration error and leaves the registry untouched.
    pub fn batch(
        &self,
        registry: &mut ResourceStateRegistry,
        desired: &[PendingTransition],
    ) -> Result<BarrierBatch> {
        for (i, transition) in desired.iter().enumerate() {
            if desired[..i]
                .iter()
                .any(|other| other.resource == transition.resource)
            {
                return Err(CoreError::DuplicateTransition(transition.resource));
            }
        }

        let mut batch = BarrierBatch::default();
        for transition in desired {
            let current = registry.get(transition.resource);
            if !needs_barrier(current, transition.state) {
                continue;
            }
            if batch.len() == self.capacity {
                return Err(CoreError::BarrierOverflow {
                    capacity: self.capacity,
                });
            }
            batch.barriers.push(Barrier {
                resource: transition.resource,
                before: current,
                after: transition.state,
            });
        }

        for barrier in batch.iter() {
            trace!(
                "{} {:?} -> {:?}",
                registry.name(barrier.resource),
                barrier.before.access,
                barrier.after.access
            );
            registry.set(barrier.resource, barrier.after);
        }
        Ok(batch)
    }

    /// Records states that an external pass established with its own barriers.
    pub fn fold_external(
        &self,
        registry: &mut ResourceStateRegistry,
        reported: &[(ResourceHandle, ResourceState)],
    ) {
        for (resource, state) in reported {
            registry.set(*resource, *state);
        }
    }
}

impl Default for TransitionBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_CAPACITY)
    }
}

fn needs_barrier(current: ResourceState, desired: ResourceState) -> bool {
    current != desired || (current.access.is_write() && desired.access.is_write())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::sync_manager::resource_access::ResourceKind;

    fn registry_with(count: usize, kind: ResourceKind) -> (ResourceStateRegistry, Vec<ResourceHandle>) {
        let mut registry = ResourceStateRegistry::new();
        let handles = (0..count)
            .map(|i| registry.register(kind, format!("resource {i}"), ResourceState::UNUSED))
            .collect();
        (registry, handles)
    }

    #[test]
    fn equal_read_states_emit_nothing_the_second_time() {
        let batcher = TransitionBatcher::default();
        let (mut registry, handles) = registry_with(1, ResourceKind::Texture);
        let read = [PendingTransition::texture(handles[0], AccessKind::ShaderRead)];

        assert_eq!(batcher.batch(&mut registry, &read).unwrap().len(), 1);
        assert!(batcher.batch(&mut registry, &read).unwrap().is_empty());
        assert!(batcher.batch(&mut registry, &read).unwrap().is_empty());
    }

    #[test]
    fn consecutive_storage_writes_are_serialised() {
        let batcher = TransitionBatcher::default();
        let (mut registry, handles) = registry_with(1, ResourceKind::Texture);
        let storage = [PendingTransition::texture(handles[0], AccessKind::Storage)];

        batcher.batch(&mut registry, &storage).unwrap();
        let second = batcher.batch(&mut registry, &storage).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.barriers[0].before, second.barriers[0].after);
    }

    #[test]
    fn registry_reflects_last_desired_state() {
        let batcher = TransitionBatcher::default();
        let (mut registry, handles) = registry_with(3, ResourceKind::Buffer);
        let accesses = [
            AccessKind::CopyDestination,
            AccessKind::ShaderRead,
            AccessKind::AccelerationStructureBuild,
        ];
        let desired: Vec<_> = handles
            .iter()
            .zip(accesses)
            .map(|(h, a)| PendingTransition::buffer(*h, a))
            .collect();

        let batch = batcher.batch(&mut registry, &desired).unwrap();
        assert_eq!(batch.len(), 3);
        for (transition, barrier) in desired.iter().zip(batch.iter()) {
            assert_eq!(barrier.resource, transition.resource);
            assert_eq!(registry.get(transition.resource), transition.state);
        }
    }

    #[test]
    fn mixed_sequences_keep_order_and_skip_redundant_entries() {
        let batcher = TransitionBatcher::default();
        let (mut registry, handles) = registry_with(4, ResourceKind::Texture);
        batcher
            .batch(
                &mut registry,
                &[PendingTransition::texture(handles[1], AccessKind::ShaderRead)],
            )
            .unwrap();

        let desired: Vec<_> = handles
            .iter()
            .map(|h| PendingTransition::texture(*h, AccessKind::ShaderRead))
            .collect();
        let batch = batcher.batch(&mut registry, &desired).unwrap();
        let emitted: Vec<_> = batch.iter().map(|b| b.resource).collect();
        assert_eq!(emitted, vec![handles[0], handles[2], handles[3]]);
    }

    #[test]
    fn layout_change_alone_needs_a_barrier() {
        let batcher = TransitionBatcher::default();
        let (mut registry, handles) = registry_with(1, ResourceKind::Texture);
        let general = ResourceState {
            access: AccessKind::ShaderRead,
            layout: ash::vk::ImageLayout::GENERAL,
        };
        batcher
            .batch(
                &mut registry,
                &[PendingTransition::texture(handles[0], AccessKind::ShaderRead)],
            )
            .unwrap();
        let batch = batcher
            .batch(
                &mut registry,
                &[PendingTransition {
                    resource: handles[0],
                    state: general,
                }],
            )
            .unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn overflow_is_an_error_and_changes_nothing() {
        let batcher = TransitionBatcher::new(2);
        let (mut registry, handles) = registry_with(3, ResourceKind::Buffer);
        let desired: Vec<_> = handles
            .iter()
            .map(|h| PendingTransition::buffer(*h, AccessKind::Storage))
            .collect();

        let error = batcher.batch(&mut registry, &desired).unwrap_err();
        assert!(matches!(error, CoreError::BarrierOverflow { capacity: 2 }));
        assert!(handles
            .iter()
            .all(|h| registry.get(*h) == ResourceState::UNUSED));
    }

    #[test]
    fn duplicate_resource_in_one_batch_is_rejected() {
        let batcher = TransitionBatcher::default();
        let (mut registry, handles) = registry_with(1, ResourceKind::Buffer);
        let desired = [
            PendingTransition::buffer(handles[0], AccessKind::CopyDestination),
            PendingTransition::buffer(handles[0], AccessKind::ShaderRead),
        ];
        assert!(matches!(
            batcher.batch(&mut registry, &desired),
            Err(CoreError::DuplicateTransition(_))
        ));
    }

    #[test]
    fn folded_states_are_the_new_baseline() {
        let batcher = TransitionBatcher::default();
        let (mut registry, handles) = registry_with(1, ResourceKind::Texture);
        batcher.fold_external(
            &mut registry,
            &[(handles[0], ResourceState::texture(AccessKind::ShaderRead))],
        );
        let batch = batcher
            .batch(
                &mut registry,
                &[PendingTransition::texture(handles[0], AccessKind::ShaderRead)],
            )
            .unwrap();
        assert!(batch.is_empty());
    }
}
