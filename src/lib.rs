//! Assemble OSM relations together with full copies of their member objects
//! from a streamed file of heterogeneous OSM objects.
//!
//! An OSM file contains nodes, ways, and relations in no guaranteed order;
//! relations reference their members by numeric id only. Given a forward
//! pass over such a stream, this crate reconstructs each relation of
//! interest together with every member object it references, holding only
//! the necessary working set in memory.
//!
//! Two APIs provide the same "track members, detect completion" semantics:
//!
//! * [`Collector`] drives a two-pass traversal. Pass 1 selects relations via
//!   a [`CollectorHandler`]; pass 2 matches every arriving object against
//!   the member index and calls back the moment a relation is complete.
//! * [`RelationsDatabase`] / [`MembersDatabase`] expose the same machinery
//!   as plain databases over an [`ItemStash`], for drivers that want to wire
//!   up the passes themselves.
//!
//! ```
//! use osmrel::{
//!     Collector, CollectorHandler, CompletedRelation, Object, ObjectType, Relation,
//!     RelationMember, Way,
//! };
//!
//! #[derive(Default)]
//! struct CountMembers {
//!     assembled: Vec<(i64, usize)>,
//! }
//!
//! impl CollectorHandler for CountMembers {
//!     fn complete_relation(&mut self, relation: CompletedRelation<'_>) {
//!         let members = relation
//!             .members()
//!             .filter(|(_, object)| object.is_some())
//!             .count();
//!         self.assembled.push((relation.relation().id, members));
//!     }
//! }
//!
//! let mut boundary = Relation::new(20);
//! boundary
//!     .members
//!     .push(RelationMember::new(ObjectType::Way, 10, "outer"));
//! boundary
//!     .members
//!     .push(RelationMember::new(ObjectType::Way, 11, "inner"));
//! let stream = vec![
//!     Object::Way(Way::new(10)),
//!     Object::Way(Way::new(11)),
//!     Object::Relation(boundary),
//! ];
//!
//! let mut collector: Collector<CountMembers> = Collector::new(CountMembers::default());
//! collector.read_relations(stream.iter().cloned());
//! collector.second_pass(stream);
//!
//! assert_eq!(collector.handler().assembled, vec![(20, 2)]);
//! assert!(collector.get_incomplete_relations().is_empty());
//! ```
//!
//! Relations whose members never show up are not an error; they are reported
//! by [`Collector::get_incomplete_relations`] after the stream ends.

mod buffer;
mod collector;
mod matcher;
mod members;
mod osm;
mod relations;
mod stash;

pub use crate::buffer::{ObjectBuffer, DEFAULT_BUFFER_CAPACITY};
pub use crate::collector::{
    Collector, CollectorConfig, CollectorHandler, CompletedRelation, DEFAULT_PURGE_INTERVAL,
};
pub use crate::matcher::StringMatcher;
pub use crate::members::{MemberCounts, MembersDatabase};
pub use crate::osm::{Node, Object, ObjectId, ObjectType, Relation, RelationMember, Tag, Way};
pub use crate::relations::{RelationHandle, RelationsDatabase};
pub use crate::stash::{ItemHandle, ItemStash};
