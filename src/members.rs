//! Database of tracked member references for one object kind.
//!
//! Holds one entry per interesting member reference, sorted by member id so
//! arriving objects can be matched with a binary search. Arrived objects are
//! copied once into an [`ItemStash`]; every entry referencing the same id
//! shares that copy. When the last outstanding member of a relation arrives,
//! a completion callback fires.
//!
//! Lookup is always done within a known object kind, so a typical setup has
//! three of these, one per kind, sharing one [`RelationsDatabase`].

use std::fmt;
use std::mem;
use std::ops::{AddAssign, Range};

use log::debug;
use smallvec::SmallVec;

use crate::osm::{Object, ObjectId, ObjectType};
use crate::relations::{RelationHandle, RelationsDatabase};
use crate::stash::{ItemHandle, ItemStash};

/// Observability counts over the entries of a [`MembersDatabase`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemberCounts {
    /// Tracked and still waiting for the object.
    pub tracked: usize,
    /// Object has arrived and is available.
    pub available: usize,
    /// Tombstoned.
    pub removed: usize,
}

impl AddAssign for MemberCounts {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.tracked += other.tracked;
        self.available += other.available;
        self.removed += other.removed;
    }
}

impl fmt::Display for MemberCounts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "tracked: {} available: {} removed: {}",
            self.tracked, self.available, self.removed
        )
    }
}

#[derive(Debug)]
struct MemberEntry {
    member_id: ObjectId,
    relation: RelationHandle,
    member_pos: u32,
    /// Set once the object has arrived and been stored.
    object: Option<ItemHandle>,
    removed: bool,
}

#[derive(Debug)]
pub struct MembersDatabase {
    kind: ObjectType,
    stash: ItemStash,
    entries: Vec<MemberEntry>,
    prepared: bool,
}

fn equal_range(entries: &[MemberEntry], id: ObjectId) -> Range<usize> {
    let begin = entries.partition_point(|entry| entry.member_id < id);
    let end = entries.partition_point(|entry| entry.member_id <= id);
    begin..end
}

impl MembersDatabase {
    /// Creates a database for members of the given kind.
    pub fn new(kind: ObjectType) -> Self {
        MembersDatabase {
            kind,
            stash: ItemStash::new(),
            entries: Vec::new(),
            prepared: false,
        }
    }

    /// Records that `relations.get(handle)` references the object with id
    /// `member_id` at position `member_pos` of its member list, and bumps the
    /// relation's outstanding-member counter.
    ///
    /// All tracking must happen before [`prepare`](MembersDatabase::prepare).
    pub fn track(
        &mut self,
        relations: &mut RelationsDatabase,
        handle: RelationHandle,
        member_id: ObjectId,
        member_pos: usize,
    ) {
        debug_assert!(!self.prepared, "track called after prepare");
        self.entries.push(MemberEntry {
            member_id,
            relation: handle,
            member_pos: member_pos as u32,
            object: None,
            removed: false,
        });
        relations.track_member(handle);
    }

    /// Sorts the entries so [`add`](MembersDatabase::add) can binary-search
    /// them. Entries with equal member ids order by relation insertion, then
    /// member position. Idempotent; no `track` calls are accepted afterwards.
    pub fn prepare(&mut self) {
        if self.prepared {
            return;
        }
        self.entries
            .sort_unstable_by_key(|entry| (entry.member_id, entry.relation.index(), entry.member_pos));
        self.prepared = true;
        debug!(
            "prepared {} member index with {} entries",
            self.kind,
            self.entries.len()
        );
    }

    /// Offers an arriving object to the database.
    ///
    /// Returns false if no live entry references its id; the caller may then
    /// treat the object as uninteresting. Otherwise the object is stored
    /// (once; a duplicate arrival keeps the first copy) and every waiting
    /// entry is satisfied. For each relation whose last outstanding member
    /// this was, `on_complete` is invoked, in entry order. The callback gets
    /// this database and the relations database back, so it may release
    /// members and the relation.
    pub fn add<F>(
        &mut self,
        object: Object,
        relations: &mut RelationsDatabase,
        mut on_complete: F,
    ) -> bool
    where
        F: FnMut(&mut MembersDatabase, &mut RelationsDatabase, RelationHandle),
    {
        debug_assert!(self.prepared, "add called before prepare");
        debug_assert_eq!(object.object_type(), self.kind, "object of wrong kind");

        let range = equal_range(&self.entries, object.id());
        if self.entries[range.clone()].iter().all(|entry| entry.removed) {
            return false;
        }
        if !self.entries[range.clone()]
            .iter()
            .any(|entry| !entry.removed && entry.object.is_none())
        {
            // all live entries already satisfied; first copy wins
            return true;
        }

        let stored = self.stash.add(object);
        let mut completed: SmallVec<[RelationHandle; 4]> = SmallVec::new();
        for entry in &mut self.entries[range] {
            if entry.removed || entry.object.is_some() {
                continue;
            }
            entry.object = Some(stored);
            if relations.member_found(entry.relation) {
                completed.push(entry.relation);
            }
        }

        for handle in completed {
            on_complete(&mut *self, &mut *relations, handle);
        }
        true
    }

    /// Looks up an arrived member by id. O(log n).
    pub fn get(&self, member_id: ObjectId) -> Option<&Object> {
        let range = equal_range(&self.entries, member_id);
        self.entries[range]
            .iter()
            .find(|entry| !entry.removed && entry.object.is_some())
            .and_then(|entry| entry.object)
            .map(|handle| self.stash.get(handle))
    }

    /// Tombstones the single entry matching `(member_id, relation_id)`. When
    /// the last live entry referencing a stored object goes away, the object
    /// is released.
    pub fn remove(
        &mut self,
        relations: &RelationsDatabase,
        member_id: ObjectId,
        relation_id: ObjectId,
    ) {
        let range = equal_range(&self.entries, member_id);
        for i in range.clone() {
            let entry = &self.entries[i];
            if entry.removed || relations.get(entry.relation).id != relation_id {
                continue;
            }
            let stored = entry.object;
            self.entries[i].removed = true;
            if let Some(handle) = stored {
                let still_referenced = self.entries[range.clone()]
                    .iter()
                    .any(|entry| !entry.removed && entry.object == Some(handle));
                if !still_referenced {
                    self.stash.remove(handle);
                }
            }
            return;
        }
        debug_assert!(
            false,
            "no tracked member {} for relation {}",
            member_id, relation_id
        );
    }

    /// Entry counts by state. Observability only.
    pub fn count(&self) -> MemberCounts {
        let mut counts = MemberCounts::default();
        for entry in &self.entries {
            if entry.removed {
                counts.removed += 1;
            } else if entry.object.is_some() {
                counts.available += 1;
            } else {
                counts.tracked += 1;
            }
        }
        counts
    }

    /// Total number of entries, including tombstoned ones.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Approximate memory footprint in bytes. Observability only.
    pub fn used_memory(&self) -> usize {
        self.stash.used_memory() + self.entries.capacity() * mem::size_of::<MemberEntry>()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::osm::{Relation, RelationMember, Way};

    fn relation(id: ObjectId, way_refs: &[(ObjectId, &str)]) -> Relation {
        let mut relation = Relation::new(id);
        for &(r, role) in way_refs {
            relation
                .members
                .push(RelationMember::new(ObjectType::Way, r, role));
        }
        relation
    }

    fn track_all(
        mdb: &mut MembersDatabase,
        rdb: &mut RelationsDatabase,
        relations: Vec<Relation>,
    ) -> Vec<RelationHandle> {
        let mut handles = Vec::new();
        for rel in relations {
            let members = rel.members.clone();
            let handle = rdb.add(rel);
            for (pos, member) in members.iter().enumerate() {
                mdb.track(rdb, handle, member.member_ref, pos);
            }
            handles.push(handle);
        }
        handles
    }

    #[test]
    fn test_fill_member_database() {
        let mut rdb = RelationsDatabase::new();
        let mut mdb = MembersDatabase::new(ObjectType::Way);

        let baseline = mdb.used_memory();

        track_all(
            &mut mdb,
            &mut rdb,
            vec![
                relation(20, &[(10, "outer")]),
                relation(21, &[(11, "outer"), (12, "outer")]),
                relation(22, &[(13, "outer"), (10, "inner"), (14, "inner")]),
            ],
        );
        mdb.prepare();

        let mut completions = Vec::new();
        for way_id in [10, 11, 12, 13, 14, 15] {
            let added = mdb.add(
                Object::Way(Way::new(way_id)),
                &mut rdb,
                |_mdb, rdb, handle| {
                    completions.push((way_id, rdb.get(handle).id));
                },
            );
            assert_eq!(added, way_id != 15);

            if way_id == 11 {
                assert_eq!(mdb.get(11).map(|object| object.id()), Some(11));
            }
        }

        assert_eq!(completions, vec![(10, 20), (12, 21), (14, 22)]);
        assert!(mdb.used_memory() > baseline);
    }

    #[test]
    fn test_duplicate_member_in_relation() {
        let mut rdb = RelationsDatabase::new();
        let mut mdb = MembersDatabase::new(ObjectType::Way);

        track_all(
            &mut mdb,
            &mut rdb,
            vec![relation(
                20,
                &[(10, "outer"), (11, "inner"), (12, "inner"), (11, "inner")],
            )],
        );
        mdb.prepare();

        assert_eq!(mdb.size(), 4);
        assert_eq!(
            mdb.count(),
            MemberCounts {
                tracked: 4,
                available: 0,
                removed: 0
            }
        );

        let mut fired = 0;
        for way_id in [10, 11, 12] {
            mdb.add(Object::Way(Way::new(way_id)), &mut rdb, |mdb, rdb, handle| {
                fired += 1;
                let relation = rdb.get(handle);
                assert_eq!(relation.id, 20);
                assert_eq!(
                    mdb.count(),
                    MemberCounts {
                        tracked: 0,
                        available: 4,
                        removed: 0
                    }
                );

                // relation is complete here; release everything
                let relation_id = relation.id;
                let member_refs: Vec<ObjectId> = relation
                    .members
                    .iter()
                    .map(|member| member.member_ref)
                    .collect();
                for member_ref in member_refs {
                    mdb.remove(rdb, member_ref, relation_id);
                }
                rdb.remove(handle);
            });
        }

        assert_eq!(fired, 1);
        assert_eq!(rdb.size(), 0);
        assert_eq!(rdb.incomplete().count(), 0);
        assert_eq!(mdb.size(), 4);
        assert_eq!(
            mdb.count(),
            MemberCounts {
                tracked: 0,
                available: 0,
                removed: 4
            }
        );
        assert!(mdb.get(11).is_none());
    }

    #[test]
    fn test_missing_member_leaves_relation_incomplete() {
        let mut rdb = RelationsDatabase::new();
        let mut mdb = MembersDatabase::new(ObjectType::Way);

        track_all(
            &mut mdb,
            &mut rdb,
            vec![relation(30, &[(100, ""), (101, "")])],
        );
        mdb.prepare();

        let mut fired = 0;
        mdb.add(Object::Way(Way::new(100)), &mut rdb, |_, _, _| fired += 1);

        assert_eq!(fired, 0);
        let incomplete: Vec<ObjectId> = rdb.incomplete().map(|relation| relation.id).collect();
        assert_eq!(incomplete, vec![30]);
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let mut rdb = RelationsDatabase::new();
        let mut mdb = MembersDatabase::new(ObjectType::Way);

        track_all(&mut mdb, &mut rdb, vec![relation(20, &[(10, "outer")])]);
        mdb.prepare();
        mdb.prepare();

        let mut fired = 0;
        assert!(mdb.add(Object::Way(Way::new(10)), &mut rdb, |_, _, _| fired += 1));
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_duplicate_arrival_keeps_first_copy() {
        let mut rdb = RelationsDatabase::new();
        let mut mdb = MembersDatabase::new(ObjectType::Way);

        track_all(
            &mut mdb,
            &mut rdb,
            vec![relation(20, &[(10, "outer"), (11, "outer")])],
        );
        mdb.prepare();

        let mut first = Way::new(10);
        first.refs = vec![1, 2];
        let mut second = Way::new(10);
        second.refs = vec![3, 4];

        let mut fired = 0;
        mdb.add(Object::Way(first), &mut rdb, |_, _, _| fired += 1);
        assert!(mdb.add(Object::Way(second), &mut rdb, |_, _, _| fired += 1));
        assert_eq!(fired, 0);

        // the first copy won and the relation did not complete early
        let stored = mdb.get(10).and_then(|object| object.as_way()).unwrap();
        assert_eq!(stored.refs, vec![1, 2]);
        assert_eq!(rdb.incomplete().count(), 1);
    }

    #[test]
    fn test_counts_aggregate_across_kinds() {
        let mut node_counts = MemberCounts {
            tracked: 1,
            available: 2,
            removed: 0,
        };
        node_counts += MemberCounts {
            tracked: 3,
            available: 0,
            removed: 4,
        };
        assert_eq!(
            node_counts,
            MemberCounts {
                tracked: 4,
                available: 2,
                removed: 4
            }
        );
        assert_eq!(node_counts.to_string(), "tracked: 4 available: 2 removed: 4");
    }
}
