//! Database of relations whose members are being tracked.
//!
//! Every kept relation lives in an [`ItemStash`] owned by this database and
//! is addressed by a [`RelationHandle`]. The database keeps one counter per
//! relation: the number of tracked members that have not arrived yet. The
//! members database drives that counter down as objects come in.

use std::mem;

use crate::osm::Relation;
use crate::stash::{ItemHandle, ItemStash};

/// Stable reference to a relation held in a [`RelationsDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelationHandle(u32);

impl RelationHandle {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct RelationState {
    item: ItemHandle,
    need_members: u32,
    removed: bool,
}

#[derive(Debug, Default)]
pub struct RelationsDatabase {
    stash: ItemStash,
    states: Vec<RelationState>,
}

impl RelationsDatabase {
    pub fn new() -> Self {
        Default::default()
    }

    /// Copies `relation` into the database and returns its handle. The
    /// outstanding-member counter starts at zero; call [`track_member`]
    /// once per member reference that should be waited for.
    ///
    /// [`track_member`]: RelationsDatabase::track_member
    pub fn add(&mut self, relation: Relation) -> RelationHandle {
        let item = self.stash.add(relation.into());
        assert!(self.states.len() < u32::MAX as usize, "too many relations");
        self.states.push(RelationState {
            item,
            need_members: 0,
            removed: false,
        });
        RelationHandle((self.states.len() - 1) as u32)
    }

    /// Reads the stored relation. Panics if it was removed.
    pub fn get(&self, handle: RelationHandle) -> &Relation {
        let state = &self.states[handle.index()];
        debug_assert!(!state.removed, "access to removed relation");
        self.stash.get(state.item).relation()
    }

    /// Records one more member reference the relation is waiting for.
    pub fn track_member(&mut self, handle: RelationHandle) {
        let state = &mut self.states[handle.index()];
        debug_assert!(!state.removed, "track_member on removed relation");
        state.need_members += 1;
    }

    /// One tracked member arrived. Returns true if that was the last
    /// outstanding one, i.e. the relation is now complete.
    pub(crate) fn member_found(&mut self, handle: RelationHandle) -> bool {
        let state = &mut self.states[handle.index()];
        debug_assert!(!state.removed, "member_found on removed relation");
        debug_assert!(state.need_members > 0, "member_found on complete relation");
        state.need_members -= 1;
        state.need_members == 0
    }

    /// Releases the relation, typically after the completion callback has
    /// processed it.
    pub fn remove(&mut self, handle: RelationHandle) {
        let state = &mut self.states[handle.index()];
        debug_assert!(!state.removed, "double remove of relation");
        state.removed = true;
        self.stash.remove(state.item);
    }

    /// Number of live (not removed) relations.
    pub fn size(&self) -> usize {
        self.states.iter().filter(|state| !state.removed).count()
    }

    /// Live relations still waiting for at least one member.
    pub fn incomplete(&self) -> impl Iterator<Item = &Relation> {
        self.states
            .iter()
            .filter(|state| !state.removed && state.need_members > 0)
            .map(move |state| self.stash.get(state.item).relation())
    }

    /// Approximate memory footprint in bytes. Observability only.
    pub fn used_memory(&self) -> usize {
        self.stash.used_memory() + self.states.capacity() * mem::size_of::<RelationState>()
    }
}
