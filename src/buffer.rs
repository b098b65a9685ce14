//! Append-only arena for decoded OSM objects.
//!
//! Objects are addressed by offset (their position in the buffer). Offsets
//! stay valid until the next `purge_removed`; the purge reports every
//! surviving object that moves through a relocation callback, so an index
//! built on offsets can be patched up.

use std::mem;

use log::trace;

use crate::osm::Object;

/// Default initial capacity, in bytes.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024 * 1024;

#[derive(Debug)]
struct Entry {
    object: Object,
    removed: bool,
}

/// Growable object storage with a committed/pending boundary.
///
/// An appended object stays pending until `commit`; `rollback` discards it.
/// This lets a caller copy an object in, inspect and mutate the copy, and
/// still change its mind.
#[derive(Debug, Default)]
pub struct ObjectBuffer {
    entries: Vec<Entry>,
    committed: usize,
}

impl ObjectBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_CAPACITY)
    }

    /// Creates a buffer with roughly `bytes` of entry storage preallocated.
    /// The buffer grows automatically beyond that.
    pub fn with_capacity(bytes: usize) -> Self {
        ObjectBuffer {
            entries: Vec::with_capacity(bytes / mem::size_of::<Entry>()),
            committed: 0,
        }
    }

    /// Appends an object without committing it and returns its offset.
    pub fn add_item(&mut self, object: Object) -> usize {
        let offset = self.entries.len();
        self.entries.push(Entry {
            object,
            removed: false,
        });
        offset
    }

    /// Commits all pending appends. Returns the offset of the first entry
    /// committed by this call (the current boundary if nothing was pending).
    pub fn commit(&mut self) -> usize {
        let first = self.committed;
        self.committed = self.entries.len();
        first
    }

    /// Discards all pending appends.
    pub fn rollback(&mut self) {
        self.entries.truncate(self.committed);
    }

    /// Number of committed entries. Purged entries no longer count.
    pub fn committed(&self) -> usize {
        self.committed
    }

    pub fn get(&self, offset: usize) -> &Object {
        &self.entries[offset].object
    }

    pub fn get_mut(&mut self, offset: usize) -> &mut Object {
        &mut self.entries[offset].object
    }

    /// Flags the entry at `offset` for removal by the next purge.
    pub fn set_removed(&mut self, offset: usize) {
        self.entries[offset].removed = true;
    }

    pub fn is_removed(&self, offset: usize) -> bool {
        self.entries[offset].removed
    }

    /// Iterates committed entries that are not flagged as removed.
    pub fn iter(&self) -> impl Iterator<Item = &Object> {
        self.entries[..self.committed]
            .iter()
            .filter(|entry| !entry.removed)
            .map(|entry| &entry.object)
    }

    /// Compacts away all entries flagged as removed, preserving the relative
    /// order of survivors. For every survivor that changes offset,
    /// `on_move(object, old_offset, new_offset)` is called before the purge
    /// finishes.
    ///
    /// Must not be called with pending (uncommitted) appends.
    pub fn purge_removed<F>(&mut self, mut on_move: F)
    where
        F: FnMut(&Object, usize, usize),
    {
        debug_assert_eq!(
            self.committed,
            self.entries.len(),
            "purge_removed with pending append"
        );

        let before = self.entries.len();
        let mut write = 0;
        for read in 0..self.entries.len() {
            if self.entries[read].removed {
                continue;
            }
            if read != write {
                self.entries.swap(write, read);
                on_move(&self.entries[write].object, read, write);
            }
            write += 1;
        }
        self.entries.truncate(write);
        self.committed = write;

        trace!("purged object buffer: {} -> {} entries", before, write);
    }

    /// Approximate memory footprint in bytes. Observability only.
    pub fn used_memory(&self) -> usize {
        self.entries.capacity() * mem::size_of::<Entry>()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::osm::Way;

    fn way(id: i64) -> Object {
        Object::Way(Way::new(id))
    }

    #[test]
    fn test_commit_and_rollback() {
        let mut buffer = ObjectBuffer::with_capacity(1024);
        assert_eq!(buffer.committed(), 0);

        let offset = buffer.add_item(way(1));
        assert_eq!(offset, 0);
        assert_eq!(buffer.committed(), 0);
        assert_eq!(buffer.commit(), 0);
        assert_eq!(buffer.committed(), 1);

        let offset = buffer.add_item(way(2));
        assert_eq!(offset, 1);
        buffer.rollback();
        assert_eq!(buffer.committed(), 1);

        let offset = buffer.add_item(way(3));
        assert_eq!(buffer.commit(), offset);
        assert_eq!(buffer.get(offset).id(), 3);
        assert_eq!(buffer.iter().count(), 2);
    }

    #[test]
    fn test_purge_preserves_order_and_reports_moves() {
        let mut buffer = ObjectBuffer::with_capacity(1024);
        for id in 0..6 {
            buffer.add_item(way(id));
        }
        buffer.commit();

        buffer.set_removed(1);
        buffer.set_removed(2);
        buffer.set_removed(5);

        let mut moves = Vec::new();
        buffer.purge_removed(|object, old, new| moves.push((object.id(), old, new)));

        assert_eq!(moves, vec![(3, 3, 1), (4, 4, 2)]);
        assert_eq!(buffer.committed(), 3);
        let ids: Vec<i64> = buffer.iter().map(|object| object.id()).collect();
        assert_eq!(ids, vec![0, 3, 4]);
    }

    #[test]
    fn test_purge_without_removals_is_a_no_op() {
        let mut buffer = ObjectBuffer::with_capacity(1024);
        for id in 0..3 {
            buffer.add_item(way(id));
        }
        buffer.commit();

        buffer.purge_removed(|_, _, _| panic!("nothing moved"));
        assert_eq!(buffer.committed(), 3);
    }
}
