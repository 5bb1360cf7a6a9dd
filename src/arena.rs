use std::{fmt, marker::PhantomData};

/// Index plus generation. A slot's generation is bumped every time its value is removed,
/// so handles to destroyed values stop resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawHandle {
    index: u32,
    generation: u32,
}

impl RawHandle {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

pub trait Handle: Copy + Eq + fmt::Debug {
    fn from_raw(raw: RawHandle) -> Self;
    fn raw(self) -> RawHandle;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name($crate::arena::RawHandle);

        impl $crate::arena::Handle for $name {
            fn from_raw(raw: $crate::arena::RawHandle) -> Self {
                Self(raw)
            }

            fn raw(self) -> $crate::arena::RawHandle {
                self.0
            }
        }
    };
}

define_handle!(
    /// A buffer or texture known to the resource state registry.
    ResourceHandle
);
define_handle!(AccelStructureId);
define_handle!(QueryPoolId);
define_handle!(PipelineId);

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<H: Handle, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _marker: PhantomData<H>,
}

impl<H: Handle, T> Arena<H, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _marker: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> H {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return H::from_raw(RawHandle {
                index,
                generation: slot.generation,
            });
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        H::from_raw(RawHandle {
            index,
            generation: 0,
        })
    }

    pub fn get(&self, handle: H) -> Option<&T> {
        let raw = handle.raw();
        self.slots
            .get(raw.index as usize)
            .filter(|slot| slot.generation == raw.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        let raw = handle.raw();
        self.slots
            .get_mut(raw.index as usize)
            .filter(|slot| slot.generation == raw.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    pub fn remove(&mut self, handle: H) -> Option<T> {
        let raw = handle.raw();
        let slot = self.slots.get_mut(raw.index as usize)?;
        if slot.generation != raw.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(raw.index);
        self.len -= 1;
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    H::from_raw(RawHandle {
                        index: index as u32,
                        generation: slot.generation,
                    }),
                    value,
                )
            })
        })
    }

    /// Removes every value, keeping generations so that old handles stay invalid.
    pub fn drain(&mut self) -> Vec<(H, T)> {
        let mut drained = Vec::with_capacity(self.len);
        for index in 0..self.slots.len() {
            let slot = &mut self.slots[index];
            if let Some(value) = slot.value.take() {
                let handle = H::from_raw(RawHandle {
                    index: index as u32,
                    generation: slot.generation,
                });
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                drained.push((handle, value));
            }
        }
        self.len = 0;
        drained
    }
}

impl<H: Handle, T> Default for Arena<H, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_does_not_resolve_after_reuse() {
        let mut arena: Arena<ResourceHandle, &str> = Arena::new();
        let first = arena.insert("first");
        assert_eq!(arena.remove(first), Some("first"));

        let second = arena.insert("second");
        assert_eq!(first.raw().index(), second.raw().index());
        assert_ne!(first, second);
        assert!(arena.get(first).is_none());
        assert_eq!(arena.get(second), Some(&"second"));
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn drain_invalidates_everything() {
        let mut arena: Arena<PipelineId, u32> = Arena::new();
        let handles: Vec<_> = (0..4).map(|i| arena.insert(i)).collect();
        let drained = arena.drain();
        assert_eq!(drained.len(), 4);
        assert!(arena.is_empty());
        assert!(handles.iter().all(|h| !arena.contains(*h)));
    }
}
