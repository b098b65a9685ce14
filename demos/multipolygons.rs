//! Assembles multipolygon relations from a small synthetic stream and
//! prints the result as JSON.
//!
//! A real driver would decode the stream from a file; any source of
//! `osmrel::Object`s works the same way.

use osmrel::{
    Collector, CollectorHandler, CompletedRelation, Object, ObjectType, Relation, RelationMember,
    StringMatcher, Tag, Way,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Ring {
    role: String,
    way: i64,
    nodes: Vec<i64>,
}

#[derive(Debug, Serialize)]
struct Multipolygon {
    id: i64,
    name: Option<String>,
    rings: Vec<Ring>,
}

struct Assembler {
    type_matcher: StringMatcher,
    assembled: Vec<Multipolygon>,
}

impl CollectorHandler for Assembler {
    fn keep_relation(&mut self, relation: &Relation) -> bool {
        relation
            .tag("type")
            .map_or(false, |value| self.type_matcher.matches(value))
    }

    fn keep_member(&mut self, _relation: &Relation, member: &RelationMember) -> bool {
        member.member_type == ObjectType::Way
    }

    fn complete_relation(&mut self, relation: CompletedRelation<'_>) {
        let rings = relation
            .members()
            .filter_map(|(member, object)| {
                let way = object?.as_way()?;
                Some(Ring {
                    role: member.role.clone(),
                    way: way.id,
                    nodes: way.refs.clone(),
                })
            })
            .collect();
        self.assembled.push(Multipolygon {
            id: relation.relation().id,
            name: relation.relation().tag("name").map(str::to_string),
            rings,
        });
    }
}

fn way(id: i64, refs: &[i64]) -> Object {
    let mut way = Way::new(id);
    way.refs = refs.to_vec();
    Object::Way(way)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut lake = Relation::new(20);
    lake.tags.push(Tag::new("type", "multipolygon"));
    lake.tags.push(Tag::new("name", "Lake"));
    lake.members
        .push(RelationMember::new(ObjectType::Way, 10, "outer"));
    lake.members
        .push(RelationMember::new(ObjectType::Way, 11, "inner"));

    let mut bus_route = Relation::new(21);
    bus_route.tags.push(Tag::new("type", "route"));
    bus_route
        .members
        .push(RelationMember::new(ObjectType::Way, 12, ""));

    let stream = vec![
        way(10, &[1, 2, 3, 1]),
        way(11, &[4, 5, 6, 4]),
        way(12, &[7, 8]),
        Object::Relation(lake),
        Object::Relation(bus_route),
    ];

    let handler = Assembler {
        type_matcher: StringMatcher::equal("multipolygon"),
        assembled: Vec::new(),
    };
    let mut collector: Collector<Assembler, false, true, false> = Collector::new(handler);
    collector.read_relations(stream.iter().cloned());
    collector.second_pass(stream);

    let stdout = std::io::stdout();
    serde_json::to_writer_pretty(stdout.lock(), &collector.handler().assembled)?;
    println!();

    Ok(())
}
