//! Flush ordering.
//!
//! Inserts go parent-first: tables are ranked so that every foreign-key
//! target precedes its referrers, and within that order an instance waits
//! for the pending instances it references (its many-to-one targets and the
//! owners of collections it belongs to). Updates run after all inserts in
//! any order.

use crate::attributes::AttrValue;
use crate::mapper::Direction;
use crate::state::Instance;
use ormscope_query::MetaData;
use std::collections::{HashMap, HashSet};

/// Orders pending instances for insertion.
#[derive(Debug, Default)]
pub struct FlushOrderer {
    /// Table name -> position in foreign-key order.
    ranks: HashMap<String, usize>,
}

impl FlushOrderer {
    /// Rank the tables of `metadata` so parents come before the tables
    /// whose foreign keys refer to them.
    pub fn new(metadata: &MetaData) -> Self {
        let ranks = metadata
            .sorted_tables()
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();
        Self { ranks }
    }

    /// Tables the orderer does not know go last.
    pub fn rank(&self, table: &str) -> usize {
        self.ranks.get(table).copied().unwrap_or(usize::MAX)
    }

    /// Order a flush: inserts parent-first, updates as given.
    pub fn order(&self, mut inserts: Vec<Instance>, updates: Vec<Instance>) -> FlushPlan {
        inserts.sort_by_key(|i| self.rank(i.state().mapper().local_table().name()));
        FlushPlan {
            inserts: order_by_dependency(inserts),
            updates,
        }
    }
}

/// Instance-level ordering: each instance after the pending instances it
/// depends on. Cycles fall back to the incoming order.
fn order_by_dependency(instances: Vec<Instance>) -> Vec<Instance> {
    let pending: HashSet<&Instance> = instances.iter().collect();
    let mut depends_on: HashMap<Instance, Vec<Instance>> = HashMap::new();
    for instance in &instances {
        for (prop, value) in instance.state().loaded_relationships() {
            let Some(rel) = prop.as_relationship() else {
                continue;
            };
            match (rel.direction(), value) {
                (Direction::ManyToOne, AttrValue::Object(Some(target))) => {
                    if pending.contains(&target) && target != *instance {
                        depends_on.entry(instance.clone()).or_default().push(target);
                    }
                }
                (Direction::OneToMany, AttrValue::Collection(children)) => {
                    for child in children {
                        if pending.contains(&child) && child != *instance {
                            depends_on.entry(child).or_default().push(instance.clone());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut remaining = instances;
    let mut ordered: Vec<Instance> = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|i| {
            depends_on
                .get(i)
                .is_none_or(|deps| deps.iter().all(|d| ordered.contains(d)))
        });
        ordered.push(remaining.remove(ready.unwrap_or(0)));
    }
    ordered
}

/// The statements a flush will issue, as instances.
#[derive(Debug, Default)]
pub struct FlushPlan {
    /// Pending instances, parent-first.
    pub inserts: Vec<Instance>,
    /// Persistent instances with changes.
    pub updates: Vec<Instance>,
}

impl FlushPlan {
    /// True when the flush has nothing to write.
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }

    /// Number of statements the flush will issue.
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }
}
