//! `Many<P, C, S>` - the relationship wrapper.
//!
//! A `Many` belongs to one owning entity and manages that entity's edges in
//! one join collection. On the normal side the owner is the edge's parent; on
//! the inverse side of a many-to-many relationship it is the child, so the
//! same wrapper serves both directions of a shared collection.
//!
//! Edge writes go through pair-keyed upserts: adding the same child twice
//! leaves one edge, and concurrent adds of the same edge cannot race into
//! duplicates. Removing an edge that does not exist is a no-op.

use crate::entity::{ensure_saved, Entity};
use crate::error::LinkError;
use crate::query::{EntityQuery, MatchIds, Source};
use crate::relation::naming::Side;
use crate::relation::JoinCollection;
use crate::store::{DocumentStore, Filter};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct Many<P: Entity, C: Entity, S: DocumentStore> {
    owner_id: String,
    store: Arc<S>,
    join: JoinCollection<S>,
    side: Side,
    session: Option<S::Session>,
    _types: PhantomData<fn() -> (P, C)>,
}

impl<P: Entity, C: Entity, S: DocumentStore> Clone for Many<P, C, S> {
    fn clone(&self) -> Self {
        Self {
            owner_id: self.owner_id.clone(),
            store: Arc::clone(&self.store),
            join: self.join.clone(),
            side: self.side,
            session: self.session.clone(),
            _types: PhantomData,
        }
    }
}

impl<P: Entity, C: Entity, S: DocumentStore> fmt::Debug for Many<P, C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Many")
            .field("owner", &P::NAME)
            .field("owner_id", &self.owner_id)
            .field("target", &C::NAME)
            .field("collection", &self.join.name())
            .field("side", &self.side)
            .finish()
    }
}

impl<P: Entity, C: Entity, S: DocumentStore> Many<P, C, S> {
    /// Wrapper for `owner`'s edges in `join`
    ///
    /// The owner ID is captured here, so `owner` must already be saved.
    pub fn new(owner: &P, store: Arc<S>, join: JoinCollection<S>, side: Side) -> Result<Self, LinkError> {
        ensure_saved(owner)?;
        Ok(Self {
            owner_id: owner.id().to_string(),
            store,
            join,
            side,
            session: None,
            _types: PhantomData,
        })
    }

    /// Run every following operation on this wrapper inside `session`
    pub fn in_session(mut self, session: S::Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn join_collection(&self) -> &JoinCollection<S> {
        &self.join
    }

    fn session(&self) -> Option<&S::Session> {
        self.session.as_ref()
    }

    fn pairs<'a>(&self, target_ids: impl IntoIterator<Item = &'a str>) -> Vec<(String, String)> {
        target_ids
            .into_iter()
            .map(|id| self.side.pair(&self.owner_id, id))
            .collect()
    }

    pub fn add(&self, child: &C) -> Result<(), LinkError> {
        self.add_many(std::slice::from_ref(child))
    }

    /// Link a child by ID; a bare ID is taken as persisted
    pub fn add_id(&self, child_id: &str) -> Result<(), LinkError> {
        self.add_ids([child_id])
    }

    /// Link every child in one bulk write
    pub fn add_many(&self, children: &[C]) -> Result<(), LinkError> {
        for child in children {
            ensure_saved(child)?;
        }
        let pairs = self.pairs(children.iter().map(|c| c.id()));
        self.join.upsert_many(self.session(), &pairs).map(|_| ())
    }

    /// Link children by ID; an empty ID is an unsaved child
    pub fn add_ids<'a>(&self, child_ids: impl IntoIterator<Item = &'a str>) -> Result<(), LinkError> {
        let child_ids: Vec<&str> = child_ids.into_iter().collect();
        if child_ids.iter().any(|id| id.is_empty()) {
            return Err(LinkError::Unsaved { entity: C::NAME });
        }
        let pairs = self.pairs(child_ids);
        self.join.upsert_many(self.session(), &pairs).map(|_| ())
    }

    /// Unlink a child; returns how many edges were removed (0 or 1)
    pub fn remove(&self, child: &C) -> Result<u64, LinkError> {
        self.remove_many(std::slice::from_ref(child))
    }

    pub fn remove_id(&self, child_id: &str) -> Result<u64, LinkError> {
        self.remove_ids([child_id])
    }

    pub fn remove_many(&self, children: &[C]) -> Result<u64, LinkError> {
        for child in children {
            ensure_saved(child)?;
        }
        let pairs = self.pairs(children.iter().map(|c| c.id()));
        self.join.remove_pairs(self.session(), pairs)
    }

    pub fn remove_ids<'a>(&self, child_ids: impl IntoIterator<Item = &'a str>) -> Result<u64, LinkError> {
        let pairs = self.pairs(child_ids);
        self.join.remove_pairs(self.session(), pairs)
    }

    /// Lazy query over the linked children, in edge insertion order unless sorted
    pub fn children(&self) -> Result<EntityQuery<C, S>, LinkError> {
        Ok(self.linked_query(
            self.side.owner_field(),
            MatchIds::Fixed(vec![self.owner_id.clone()]),
        ))
    }

    /// IDs of the linked children without loading their documents
    pub fn children_ids(&self) -> Result<Vec<String>, LinkError> {
        self.join.linked(
            self.session(),
            self.side.owner_field(),
            std::slice::from_ref(&self.owner_id),
        )
    }

    /// Number of edges; never reads the child collection
    pub fn children_count(&self) -> Result<u64, LinkError> {
        self.join
            .count(self.session(), self.side.owner_field(), &self.owner_id)
    }

    /// Owners linked to the child `child_id`
    pub fn parents_of_id(&self, child_id: &str) -> Result<EntityQuery<P, S>, LinkError> {
        self.parents_of_ids(vec![child_id.to_string()])
    }

    /// Owners linked to any of `child_ids`
    pub fn parents_of_ids(&self, child_ids: Vec<String>) -> Result<EntityQuery<P, S>, LinkError> {
        Ok(self.linked_query(self.side.target_field(), MatchIds::Fixed(child_ids)))
    }

    /// Owners linked to any child matching `filter`
    ///
    /// The children are selected again on every execution of the returned query.
    pub fn parents_matching(&self, filter: Filter) -> Result<EntityQuery<P, S>, LinkError> {
        Ok(self.linked_query(
            self.side.target_field(),
            MatchIds::Matching {
                collection: C::COLLECTION,
                filter,
            },
        ))
    }

    fn linked_query<T: Entity>(
        &self,
        field: crate::store::JoinField,
        ids: MatchIds,
    ) -> EntityQuery<T, S> {
        EntityQuery::new(
            Arc::clone(&self.store),
            self.session.clone(),
            Source::Linked {
                join: self.join.clone(),
                field,
                ids,
            },
        )
    }
}
