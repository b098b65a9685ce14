//! Two-pass assembly of relations and their member objects.
//!
//! Pass 1 ([`read_relations`](Collector::read_relations)) runs over the input
//! stream and keeps every relation the handler is interested in, building one
//! index entry per interesting member reference. Pass 2
//! ([`handle_object`](Collector::handle_object) /
//! [`second_pass`](Collector::second_pass)) runs over the stream again,
//! matches each object against the sorted indices, stores a copy of every
//! matched object, and hands each relation to the handler the moment its last
//! outstanding member arrives.
//!
//! Relations and members are copied into two arenas owned by the collector.
//! The member arena is compacted every [`CollectorConfig::purge_interval`]
//! completions; index offsets are rewritten in place, so nothing outside the
//! collector may hold on to them.

use std::mem;
use std::ops::Range;

use itertools::Itertools;
use log::debug;
use smallvec::SmallVec;

use crate::buffer::{ObjectBuffer, DEFAULT_BUFFER_CAPACITY};
use crate::osm::{Node, Object, ObjectId, ObjectType, Relation, RelationMember, Way};

/// Completions between two compactions of the member arena.
pub const DEFAULT_PURGE_INTERVAL: usize = 10_000;

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Initial arena capacity in bytes.
    pub initial_capacity: usize,
    /// Completions between two compactions of the member arena.
    pub purge_interval: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            initial_capacity: DEFAULT_BUFFER_CAPACITY,
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }
}

/// The hooks a collector is driven through.
///
/// Only [`complete_relation`](CollectorHandler::complete_relation) must be
/// implemented; everything else defaults to "keep everything, ignore the
/// rest". Handlers that forward assembled data downstream own their sink
/// (a closure, a channel, an open writer) as ordinary captured state.
pub trait CollectorHandler {
    /// Called for every relation in the first pass. Return false to drop the
    /// relation. Storing relations costs memory, so filter as early as
    /// possible, for instance on a `type` tag.
    fn keep_relation(&mut self, _relation: &Relation) -> bool {
        true
    }

    /// Called for every member of a kept relation. Return false for members
    /// that should not be tracked; their ref is zeroed on the stored copy.
    fn keep_member(&mut self, _relation: &Relation, _member: &RelationMember) -> bool {
        true
    }

    /// Called exactly once per relation, at the moment its last tracked
    /// member has arrived. Note that relations whose members never all show
    /// up are not completed; they are reported by
    /// [`Collector::get_incomplete_relations`] instead.
    fn complete_relation(&mut self, relation: CompletedRelation<'_>);

    /// Called for pass-2 nodes no tracked relation references.
    fn node_not_in_any_relation(&mut self, _node: &Node) {}

    /// Called for pass-2 ways no tracked relation references.
    fn way_not_in_any_relation(&mut self, _way: &Way) {}

    /// Called for pass-2 relations no tracked relation references.
    fn relation_not_in_any_relation(&mut self, _relation: &Relation) {}

    /// Called when the second pass has seen the whole stream. Members can
    /// still be missing at this point.
    fn flush(&mut self) {}
}

/// One tracked member reference. Sorted by `(member_id, relation_pos,
/// member_pos)` after pass 1, per kind.
#[derive(Debug, Clone, Copy)]
struct MemberMeta {
    member_id: ObjectId,
    relation_pos: u32,
    member_pos: u32,
    /// Arena offset of the stored object, once it has arrived.
    buffer_offset: Option<usize>,
    removed: bool,
}

#[derive(Debug, Clone, Copy)]
struct RelationMeta {
    relation_offset: usize,
    need_members: u32,
    complete: bool,
}

#[derive(Debug, Default)]
struct Store {
    relations_buffer: ObjectBuffer,
    members_buffer: ObjectBuffer,
    relations: Vec<RelationMeta>,
    member_meta: [Vec<MemberMeta>; 3],
}

fn equal_range(metas: &[MemberMeta], id: ObjectId) -> Range<usize> {
    let begin = metas.partition_point(|meta| meta.member_id < id);
    let end = metas.partition_point(|meta| meta.member_id <= id);
    begin..end
}

impl Store {
    fn with_capacity(bytes: usize) -> Self {
        Store {
            relations_buffer: ObjectBuffer::with_capacity(bytes),
            members_buffer: ObjectBuffer::with_capacity(bytes),
            relations: Vec::new(),
            member_meta: Default::default(),
        }
    }

    fn relation_at(&self, pos: usize) -> &Relation {
        self.relations_buffer
            .get(self.relations[pos].relation_offset)
            .relation()
    }

    fn find_member(&self, kind: ObjectType, id: ObjectId) -> Option<&Object> {
        let metas = &self.member_meta[kind.index()];
        let range = equal_range(metas, id);
        metas[range]
            .iter()
            .find_map(|meta| meta.buffer_offset)
            .map(|offset| self.members_buffer.get(offset))
    }
}

/// Borrowed view of a relation whose members have all arrived, handed to
/// [`CollectorHandler::complete_relation`].
#[derive(Clone, Copy)]
pub struct CompletedRelation<'a> {
    store: &'a Store,
    pos: usize,
}

impl<'a> CompletedRelation<'a> {
    /// The stored relation. Members the handler declined to track have their
    /// ref zeroed.
    pub fn relation(&self) -> &'a Relation {
        self.store.relation_at(self.pos)
    }

    /// Looks up a stored member object by kind and id.
    pub fn member(&self, kind: ObjectType, id: ObjectId) -> Option<&'a Object> {
        self.store.find_member(kind, id)
    }

    /// The relation's member list, each entry paired with the stored object.
    /// Entries with a zeroed ref yield `None`.
    pub fn members(&self) -> impl Iterator<Item = (&'a RelationMember, Option<&'a Object>)> + 'a {
        let store = self.store;
        self.relation().members.iter().map(move |member| {
            let object = if member.member_ref == 0 {
                None
            } else {
                store.find_member(member.member_type, member.member_ref)
            };
            (member, object)
        })
    }
}

/// Two-pass relation collector.
///
/// The const parameters select which object kinds the second pass reacts to;
/// events of a disabled kind are dropped without any lookup. A multipolygon
/// assembler, for instance, only cares about ways:
///
/// ```text
/// let collector: Collector<MyHandler, false, true, false> = ...;
/// ```
///
/// A collector belongs to a single driver; it has no internal threads and
/// completion hooks run inline on the calling thread.
pub struct Collector<H, const NODES: bool = true, const WAYS: bool = true, const RELATIONS: bool = true>
{
    handler: H,
    store: Store,
    prepared: bool,
    purge_interval: usize,
    completed_since_purge: usize,
}

impl<H, const NODES: bool, const WAYS: bool, const RELATIONS: bool>
    Collector<H, NODES, WAYS, RELATIONS>
where
    H: CollectorHandler,
{
    pub fn new(handler: H) -> Self {
        Self::with_config(handler, CollectorConfig::default())
    }

    pub fn with_config(handler: H, config: CollectorConfig) -> Self {
        Collector {
            handler,
            store: Store::with_capacity(config.initial_capacity),
            prepared: false,
            purge_interval: config.purge_interval,
            completed_since_purge: 0,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    /// First pass: feed the whole input stream (or just its relations).
    /// Relations the handler keeps are copied in and their interesting
    /// members indexed. Sorts the indices afterwards, so the second pass can
    /// binary-search them. References with equal ids sort by relation
    /// insertion order, then member position.
    pub fn read_relations<I>(&mut self, input: I)
    where
        I: IntoIterator<Item = Object>,
    {
        for object in input {
            if let Object::Relation(relation) = object {
                if self.handler.keep_relation(&relation) {
                    self.add_relation(relation);
                }
            }
        }
        for metas in &mut self.store.member_meta {
            metas.sort_unstable_by_key(|meta| (meta.member_id, meta.relation_pos, meta.member_pos));
        }
        self.prepared = true;
        debug!(
            "tracking {} relations with {} node / {} way / {} relation member refs",
            self.store.relations.len(),
            self.store.member_meta[0].len(),
            self.store.member_meta[1].len(),
            self.store.member_meta[2].len()
        );
    }

    fn add_relation(&mut self, relation: Relation) {
        let store = &mut self.store;
        let offset = store.relations_buffer.add_item(Object::Relation(relation));
        let relation_pos = store.relations.len();
        assert!(relation_pos < u32::MAX as usize, "too many relations");

        let mut keep: SmallVec<[bool; 16]> = SmallVec::new();
        {
            let relation = store.relations_buffer.get(offset).relation();
            for member in &relation.members {
                keep.push(self.handler.keep_member(relation, member));
            }
        }

        let mut need_members = 0u32;
        {
            let relation = store.relations_buffer.get_mut(offset).relation_mut();
            for (pos, member) in relation.members.iter_mut().enumerate() {
                if keep[pos] {
                    store.member_meta[member.member_type.index()].push(MemberMeta {
                        member_id: member.member_ref,
                        relation_pos: relation_pos as u32,
                        member_pos: pos as u32,
                        buffer_offset: None,
                        removed: false,
                    });
                    need_members += 1;
                } else {
                    // mark as not wanted
                    member.member_ref = 0;
                }
            }
        }

        if need_members == 0 {
            // kept, but nothing to wait for; no point storing it
            store.relations_buffer.rollback();
        } else {
            store.relations_buffer.commit();
            store.relations.push(RelationMeta {
                relation_offset: offset,
                need_members,
                complete: false,
            });
        }
    }

    /// Second pass: offer one object. Kinds disabled at the type level are
    /// ignored outright. Objects no tracked relation references go to the
    /// matching `*_not_in_any_relation` hook.
    pub fn handle_object(&mut self, object: Object) {
        debug_assert!(self.prepared, "second pass before read_relations");
        match object.object_type() {
            ObjectType::Node if !NODES => return,
            ObjectType::Way if !WAYS => return,
            ObjectType::Relation if !RELATIONS => return,
            _ => {}
        }
        if let Some(object) = self.find_and_add_object(object) {
            match &object {
                Object::Node(node) => self.handler.node_not_in_any_relation(node),
                Object::Way(way) => self.handler.way_not_in_any_relation(way),
                Object::Relation(relation) => self.handler.relation_not_in_any_relation(relation),
            }
        }
    }

    /// Second pass over a whole stream, then [`flush`](Collector::flush).
    pub fn second_pass<I>(&mut self, input: I)
    where
        I: IntoIterator<Item = Object>,
    {
        for object in input {
            self.handle_object(object);
        }
        self.flush();
    }

    /// Matches the object against the member index. Returns the object back
    /// if nothing references it; returns `None` once it has been consumed
    /// (or was already stored by an earlier arrival with the same id).
    fn find_and_add_object(&mut self, object: Object) -> Option<Object> {
        let kind = object.object_type().index();
        let id = object.id();
        let range = equal_range(&self.store.member_meta[kind], id);

        {
            let metas = &self.store.member_meta[kind][range.clone()];
            if metas.iter().all(|meta| meta.removed) {
                return Some(object);
            }
            if !metas
                .iter()
                .any(|meta| !meta.removed && meta.buffer_offset.is_none())
            {
                // every live reference already has its copy; the first
                // arrival won and this duplicate changes nothing
                return None;
            }
        }

        let offset = self.store.members_buffer.add_item(object);
        self.store.members_buffer.commit();

        // Satisfy the whole range before touching any counter. A completion
        // further down must never see a reference in this range that is
        // still waiting for the object we just stored.
        let mut satisfied: SmallVec<[usize; 8]> = SmallVec::new();
        for i in range {
            let meta = &mut self.store.member_meta[kind][i];
            if meta.removed || meta.buffer_offset.is_some() {
                continue;
            }
            meta.buffer_offset = Some(offset);
            satisfied.push(i);
        }

        for &i in &satisfied {
            let relation_pos = {
                let meta = &self.store.member_meta[kind][i];
                if meta.removed {
                    // cleared by a completion earlier in this very call
                    continue;
                }
                meta.relation_pos as usize
            };
            let newly_complete = {
                let meta = &mut self.store.relations[relation_pos];
                debug_assert!(!meta.complete, "member arrived for completed relation");
                meta.need_members -= 1;
                meta.need_members == 0
            };
            if newly_complete {
                self.completed(relation_pos);
            }
        }
        None
    }

    fn completed(&mut self, relation_pos: usize) {
        self.store.relations[relation_pos].complete = true;
        self.clear_member_metas(relation_pos);
        self.handler.complete_relation(CompletedRelation {
            store: &self.store,
            pos: relation_pos,
        });
        self.possibly_purge_removed_members();
    }

    /// Tombstones every index entry of the completed relation. A stored
    /// member whose last live reference goes away is flagged for the next
    /// arena purge; it stays readable until then.
    fn clear_member_metas(&mut self, relation_pos: usize) {
        let Store {
            relations_buffer,
            members_buffer,
            relations,
            member_meta,
        } = &mut self.store;
        let relation = relations_buffer
            .get(relations[relation_pos].relation_offset)
            .relation();

        for member in relation.members.iter().filter(|member| member.member_ref != 0) {
            let metas = &mut member_meta[member.member_type.index()];
            let range = equal_range(metas, member.member_ref);
            debug_assert!(!range.is_empty(), "tracked member without index entry");

            let mut cleared = None;
            for i in range.clone() {
                if !metas[i].removed && metas[i].relation_pos as usize == relation_pos {
                    cleared = Some(i);
                    break;
                }
            }
            let i = match cleared {
                Some(i) => i,
                None => continue,
            };
            let offset = metas[i].buffer_offset;
            metas[i].removed = true;

            if let Some(offset) = offset {
                let still_referenced = metas[range]
                    .iter()
                    .any(|meta| !meta.removed && meta.buffer_offset == Some(offset));
                if !still_referenced {
                    members_buffer.set_removed(offset);
                }
            }
        }
    }

    /// Every `purge_interval` completions, compact the member arena and
    /// rewrite the offsets of everything that moved. Runs only between user
    /// callbacks, never during one.
    fn possibly_purge_removed_members(&mut self) {
        self.completed_since_purge += 1;
        if self.completed_since_purge < self.purge_interval {
            return;
        }
        self.completed_since_purge = 0;

        let Store {
            members_buffer,
            member_meta,
            ..
        } = &mut self.store;

        // drop offsets into entries the purge is about to reclaim, so no
        // tombstoned index entry can end up pointing at a relocated stranger
        for metas in member_meta.iter_mut() {
            for meta in metas.iter_mut() {
                if let Some(offset) = meta.buffer_offset {
                    if members_buffer.is_removed(offset) {
                        meta.buffer_offset = None;
                    }
                }
            }
        }

        let before = members_buffer.committed();
        members_buffer.purge_removed(|object, old, new| {
            let metas = &mut member_meta[object.object_type().index()];
            let range = equal_range(metas, object.id());
            for meta in &mut metas[range] {
                if meta.buffer_offset == Some(old) {
                    meta.buffer_offset = Some(new);
                }
            }
        });
        debug!(
            "compacted members buffer: {} -> {} objects",
            before,
            members_buffer.committed()
        );
    }

    /// Tell the handler the stream has ended. Members of relations listed by
    /// [`get_incomplete_relations`](Collector::get_incomplete_relations)
    /// never arrived.
    pub fn flush(&mut self) {
        self.handler.flush();
        debug!(
            "flush: {} incomplete relations",
            self.store
                .relations
                .iter()
                .filter(|meta| !meta.complete)
                .count()
        );
    }

    /// Looks up a stored member object by kind and id.
    pub fn get_member(&self, kind: ObjectType, id: ObjectId) -> Option<&Object> {
        self.store.find_member(kind, id)
    }

    /// Kept relations for which at least one tracked member is still
    /// missing. Borrows point into the collector's arena.
    pub fn get_incomplete_relations(&self) -> Vec<&Relation> {
        self.store
            .relations
            .iter()
            .filter(|meta| !meta.complete)
            .map(|meta| {
                self.store
                    .relations_buffer
                    .get(meta.relation_offset)
                    .relation()
            })
            .collect_vec()
    }

    /// Approximate memory footprint in bytes. Observability only.
    pub fn used_memory(&self) -> usize {
        let metas: usize = self
            .store
            .member_meta
            .iter()
            .map(|metas| metas.capacity() * mem::size_of::<MemberMeta>())
            .sum();
        let relations = self.store.relations.capacity() * mem::size_of::<RelationMeta>();
        let buffers = self.store.relations_buffer.used_memory() + self.store.members_buffer.used_memory();
        debug!(
            "used memory: member metas {} + relation metas {} + buffers {}",
            metas, relations, buffers
        );
        metas + relations + buffers
    }
}
