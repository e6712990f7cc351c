use std::collections::HashMap;

/// Opaque handle naming a bound controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControllerHandle(u64);

/// Owns every bound controller, keyed by handle. Handles are never reused.
#[derive(Debug)]
pub struct ControllerRegistry<T> {
    entries: HashMap<ControllerHandle, T>,
    next: u64,
}

impl<T> Default for ControllerRegistry<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next: 1,
        }
    }
}

impl<T> ControllerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: T) -> ControllerHandle {
        let handle = ControllerHandle(self.next);
        self.next += 1;
        self.entries.insert(handle, entry);
        handle
    }

    pub fn get(&self, handle: ControllerHandle) -> Option<&T> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ControllerHandle) -> Option<&mut T> {
        self.entries.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: ControllerHandle) -> Option<T> {
        self.entries.remove(&handle)
    }

    pub fn handles(&self) -> impl Iterator<Item = ControllerHandle> + '_ {
        self.entries.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
