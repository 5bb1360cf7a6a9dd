pub mod resource_access;
pub mod transition_batcher;

use std::fmt;

use crate::arena::{Arena, ResourceHandle};

use self::resource_access::{ResourceKind, ResourceState};

struct RegistryEntry {
    kind: ResourceKind,
    name: String,
    state: ResourceState,
}

/// Last known state of every live buffer and texture.
///
/// Does not directly correspond to a Vulkan object. There is exactly one per device and it is
/// handed to every pass explicitly. Only the transition batcher changes states, so every state
/// stored here is the state the last recorded barrier left the resource in.
///
/// Not synchronised: all recording happens on one timeline. Using a handle after
/// [`ResourceStateRegistry::unregister`] panics.
pub struct ResourceStateRegistry {
    entries: Arena<ResourceHandle, RegistryEntry>,
}

impl ResourceStateRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arena::new(),
        }
    }

    /// Called by the device when it allocates a resource.
    #[must_use]
    pub fn register(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        initial: ResourceState,
    ) -> ResourceHandle {
        self.entries.insert(RegistryEntry {
            kind,
            name: name.into(),
            state: initial,
        })
    }

    /// Called by the device when it destroys a resource.
    pub fn unregister(&mut self, resource: ResourceHandle) {
        if self.entries.remove(resource).is_none() {
            panic!("{resource:?} unregistered twice or never registered");
        }
    }

    pub fn get(&self, resource: ResourceHandle) -> ResourceState {
        self.entry(resource).state
    }

    pub(crate) fn set(&mut self, resource: ResourceHandle, state: ResourceState) {
        match self.entries.get_mut(resource) {
            Some(entry) => entry.state = state,
            None => panic!("{resource:?} is not a live resource"),
        }
    }

    pub fn kind(&self, resource: ResourceHandle) -> ResourceKind {
        self.entry(resource).kind
    }

    pub fn name(&self, resource: ResourceHandle) -> &str {
        &self.entry(resource).name
    }

    pub fn contains(&self, resource: ResourceHandle) -> bool {
        self.entries.contains(resource)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, resource: ResourceHandle) -> &RegistryEntry {
        match self.entries.get(resource) {
            Some(entry) => entry,
            None => panic!("{resource:?} is not a live resource"),
        }
    }
}

impl Default for ResourceStateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResourceStateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.entries
                    .iter()
                    .map(|(handle, entry)| ((handle, &entry.name), entry.state)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::resource_access::AccessKind;
    use super::*;

    #[test]
    fn register_get_set_round_trip() {
        let mut registry = ResourceStateRegistry::new();
        let buffer = registry.register(
            ResourceKind::Buffer,
            "vertices",
            ResourceState::buffer(AccessKind::ShaderRead),
        );
        assert_eq!(registry.get(buffer).access, AccessKind::ShaderRead);
        assert_eq!(registry.name(buffer), "vertices");

        registry.set(buffer, ResourceState::buffer(AccessKind::Storage));
        assert_eq!(registry.get(buffer), ResourceState::buffer(AccessKind::Storage));
        assert_eq!(registry.kind(buffer), ResourceKind::Buffer);
    }

    #[test]
    #[should_panic(expected = "is not a live resource")]
    fn stale_handle_fails_loudly() {
        let mut registry = ResourceStateRegistry::new();
        let texture = registry.register(
            ResourceKind::Texture,
            "history",
            ResourceState::UNUSED,
        );
        registry.unregister(texture);
        let _ = registry.get(texture);
    }

    #[test]
    #[should_panic(expected = "unregistered twice")]
    fn double_unregister_fails_loudly() {
        let mut registry = ResourceStateRegistry::new();
        let buffer = registry.register(ResourceKind::Buffer, "scratch", ResourceState::UNUSED);
        registry.unregister(buffer);
        registry.unregister(buffer);
    }
}
