//! Relation registry: the join collections each entity type takes part in.
//!
//! Relationship wrappers created through [`Database`](crate::Database)
//! register their [`RelationDef`] here. With
//! [`JoinDiscovery::Registry`](crate::config::JoinDiscovery) the cascade
//! delete reads its collection list from the registry instead of listing and
//! pattern-matching the store's collections, so every relationship must be
//! registered before entities of its types are deleted.

use crate::relation::naming::RelationDef;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct RelationRegistry {
    relations: RwLock<BTreeMap<String, RelationDef>>,
}

impl RelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `def`; returns `false` if its collection was already known
    pub fn register(&self, def: &RelationDef) -> bool {
        let name = def.collection_name();
        let mut relations = self.relations.write();
        if relations.contains_key(&name) {
            return false;
        }
        log::debug!("registered relation {name}");
        relations.insert(name, def.clone());
        true
    }

    /// Join collections mentioning `type_name` on either side, sorted by name
    pub fn collections_for(&self, type_name: &str) -> Vec<String> {
        self.relations
            .read()
            .iter()
            .filter(|(_, def)| def.mentions(type_name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn relations(&self) -> Vec<RelationDef> {
        self.relations.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.relations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.read().is_empty()
    }
}
