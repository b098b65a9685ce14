//! Slot allocator handing out stable handles to stored objects.
//!
//! The databases need references to relations and members that stay valid
//! while other storage compacts. Offsets do not survive compaction; handles
//! from this stash do, because slots never move. Removed slots go on a free
//! list and get reused by later adds.

use std::mem;

use crate::osm::Object;

/// Stable, opaque reference to an object held in an [`ItemStash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemHandle(u32);

#[derive(Debug)]
enum Slot {
    Occupied(Object),
    Vacant { next_free: Option<u32> },
}

#[derive(Debug, Default)]
pub struct ItemStash {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    occupied: usize,
}

impl ItemStash {
    pub fn new() -> Self {
        Default::default()
    }

    /// Stores an object and returns a handle to it. O(1).
    pub fn add(&mut self, object: Object) -> ItemHandle {
        self.occupied += 1;
        match self.free_head {
            Some(index) => {
                self.free_head = match self.slots[index as usize] {
                    Slot::Vacant { next_free } => next_free,
                    Slot::Occupied(_) => panic!("corrupt free list in item stash"),
                };
                self.slots[index as usize] = Slot::Occupied(object);
                ItemHandle(index)
            }
            None => {
                let index = self.slots.len();
                assert!(index < u32::MAX as usize, "item stash overflow");
                self.slots.push(Slot::Occupied(object));
                ItemHandle(index as u32)
            }
        }
    }

    /// O(1). Panics if the handle was removed.
    pub fn get(&self, handle: ItemHandle) -> &Object {
        match &self.slots[handle.0 as usize] {
            Slot::Occupied(object) => object,
            Slot::Vacant { .. } => panic!("access to removed stash item {}", handle.0),
        }
    }

    /// O(1). Panics if the handle was removed.
    pub fn get_mut(&mut self, handle: ItemHandle) -> &mut Object {
        match &mut self.slots[handle.0 as usize] {
            Slot::Occupied(object) => object,
            Slot::Vacant { .. } => panic!("access to removed stash item {}", handle.0),
        }
    }

    /// Releases the slot for reuse. O(1). Panics on double remove.
    pub fn remove(&mut self, handle: ItemHandle) {
        match self.slots[handle.0 as usize] {
            Slot::Occupied(_) => {
                self.slots[handle.0 as usize] = Slot::Vacant {
                    next_free: self.free_head,
                };
                self.free_head = Some(handle.0);
                self.occupied -= 1;
            }
            Slot::Vacant { .. } => panic!("double remove of stash item {}", handle.0),
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.occupied
    }

    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Drops all objects and forgets the free list.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.occupied = 0;
    }

    /// Approximate memory footprint in bytes. Observability only.
    pub fn used_memory(&self) -> usize {
        self.slots.capacity() * mem::size_of::<Slot>()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::osm::{Node, Way};

    #[test]
    fn test_add_get_remove() {
        let mut stash = ItemStash::new();
        assert!(stash.is_empty());

        let a = stash.add(Object::Way(Way::new(10)));
        let b = stash.add(Object::Node(Node::new(11)));
        assert_eq!(stash.len(), 2);
        assert_eq!(stash.get(a).id(), 10);
        assert_eq!(stash.get(b).id(), 11);

        stash.remove(a);
        assert_eq!(stash.len(), 1);
        assert_eq!(stash.get(b).id(), 11);
    }

    #[test]
    fn test_slots_are_reused() {
        let mut stash = ItemStash::new();
        let a = stash.add(Object::Way(Way::new(1)));
        let b = stash.add(Object::Way(Way::new(2)));
        stash.remove(a);
        stash.remove(b);

        // the free list hands back the most recently removed slot first
        let c = stash.add(Object::Way(Way::new(3)));
        assert_eq!(c, b);
        let d = stash.add(Object::Way(Way::new(4)));
        assert_eq!(d, a);
        assert_eq!(stash.get(c).id(), 3);
        assert_eq!(stash.get(d).id(), 4);
    }

    #[test]
    #[should_panic(expected = "access to removed stash item")]
    fn test_get_after_remove_panics() {
        let mut stash = ItemStash::new();
        let handle = stash.add(Object::Way(Way::new(1)));
        stash.remove(handle);
        stash.get(handle);
    }

    #[test]
    fn test_used_memory_grows() {
        let mut stash = ItemStash::new();
        let before = stash.used_memory();
        for id in 0..100 {
            stash.add(Object::Way(Way::new(id)));
        }
        assert!(stash.used_memory() > before);
    }
}
