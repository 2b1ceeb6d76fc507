//! Lazy, restartable entity queries.
//!
//! An [`EntityQuery`] describes which documents to load; nothing touches the
//! store until one of the executing methods (`all`, `all_as`, `first`, `count`,
//! `ids`) runs, and every execution starts over. Queries produced by
//! relationship wrappers first resolve the linked IDs through the join
//! collection and then look the documents up, a two-step join. Without an
//! explicit sort such results follow the join records' insertion order.

use crate::entity::Entity;
use crate::error::LinkError;
use crate::relation::JoinCollection;
use crate::store::{DocumentStore, Filter, FindOptions, JoinField, Order};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Field every projection keeps so results can still be identified
const ENTITY_ID_FIELD: &str = "id";

/// IDs on the matched side of a join
#[derive(Debug, Clone)]
pub(crate) enum MatchIds {
    Fixed(Vec<String>),
    /// Resolved on each execution from documents of `collection`
    Matching {
        collection: &'static str,
        filter: Filter,
    },
}

pub(crate) enum Source<S: DocumentStore> {
    Collection,
    Linked {
        join: JoinCollection<S>,
        field: JoinField,
        ids: MatchIds,
    },
}

impl<S: DocumentStore> Clone for Source<S> {
    fn clone(&self) -> Self {
        match self {
            Source::Collection => Source::Collection,
            Source::Linked { join, field, ids } => Source::Linked {
                join: join.clone(),
                field: *field,
                ids: ids.clone(),
            },
        }
    }
}

pub struct EntityQuery<T: Entity, S: DocumentStore> {
    store: Arc<S>,
    session: Option<S::Session>,
    source: Source<S>,
    filter: Filter,
    options: FindOptions,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, S: DocumentStore> Clone for EntityQuery<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            session: self.session.clone(),
            source: self.source.clone(),
            filter: self.filter.clone(),
            options: self.options.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, S: DocumentStore> EntityQuery<T, S> {
    pub(crate) fn new(store: Arc<S>, session: Option<S::Session>, source: Source<S>) -> Self {
        Self {
            store,
            session,
            source,
            filter: Filter::All,
            options: FindOptions::default(),
            _entity: PhantomData,
        }
    }

    /// Narrow the result; filters accumulate with AND
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = std::mem::replace(&mut self.filter, Filter::All).and(filter);
        self
    }

    pub fn sort(mut self, field: impl Into<String>, order: Order) -> Self {
        self.options.sort = Some((field.into(), order));
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.options.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.options.limit = Some(n);
        self
    }

    /// Load only these top-level fields (plus `id`); read results with [`all_as`](Self::all_as)
    pub fn project(mut self, fields: &[&str]) -> Self {
        let mut keep: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        if !keep.iter().any(|f| f == ENTITY_ID_FIELD) {
            keep.push(ENTITY_ID_FIELD.to_string());
        }
        self.options.projection = Some(keep);
        self
    }

    pub fn in_session(mut self, session: S::Session) -> Self {
        self.session = Some(session);
        self
    }

    /// IDs the result is restricted to; `None` when unrestricted
    fn resolve(&self) -> Result<Option<Vec<String>>, LinkError> {
        let Source::Linked { join, field, ids } = &self.source else {
            return Ok(None);
        };
        let session = self.session.as_ref();
        let matched = match ids {
            MatchIds::Fixed(ids) => ids.clone(),
            MatchIds::Matching { collection, filter } => {
                let options = FindOptions {
                    projection: Some(Vec::new()),
                    ..FindOptions::default()
                };
                self.store
                    .find_documents(session, collection, filter, &options)?
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect()
            }
        };
        Ok(Some(join.linked(session, *field, &matched)?))
    }

    fn fetch(&self, options: &FindOptions) -> Result<Vec<(String, Value)>, LinkError> {
        let session = self.session.as_ref();
        let restrict = self.resolve()?;
        let Some(ids) = restrict else {
            return Ok(self
                .store
                .find_documents(session, T::COLLECTION, &self.filter, options)?);
        };
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let filter = Filter::ids(ids.iter().cloned()).and(self.filter.clone());
        if options.sort.is_some() {
            return Ok(self
                .store
                .find_documents(session, T::COLLECTION, &filter, options)?);
        }

        // Join order: load unpaged, reorder by the linked IDs, then page
        let unpaged = FindOptions {
            skip: None,
            limit: None,
            ..options.clone()
        };
        let mut by_id: HashMap<String, Value> = self
            .store
            .find_documents(session, T::COLLECTION, &filter, &unpaged)?
            .into_iter()
            .collect();
        let (skip, limit) = options.window();
        Ok(ids
            .into_iter()
            .filter_map(|id| by_id.remove(&id).map(|doc| (id, doc)))
            .skip(skip)
            .take(limit)
            .collect())
    }

    pub fn all(&self) -> Result<Vec<T>, LinkError> {
        self.fetch(&self.options)?
            .into_iter()
            .map(|(id, doc)| {
                let mut entity: T = serde_json::from_value(doc)?;
                entity.set_id(id);
                Ok(entity)
            })
            .collect()
    }

    /// Results deserialized into another shape, typically after [`project`](Self::project)
    pub fn all_as<P: DeserializeOwned>(&self) -> Result<Vec<P>, LinkError> {
        self.fetch(&self.options)?
            .into_iter()
            .map(|(_, doc)| serde_json::from_value(doc).map_err(LinkError::from))
            .collect()
    }

    pub fn first(&self) -> Result<Option<T>, LinkError> {
        Ok(self.clone().limit(1).all()?.into_iter().next())
    }

    /// Matching documents, ignoring `skip` and `limit`
    pub fn count(&self) -> Result<u64, LinkError> {
        let session = self.session.as_ref();
        let filter = match self.resolve()? {
            Some(ids) if ids.is_empty() => return Ok(0),
            Some(ids) => Filter::ids(ids).and(self.filter.clone()),
            None => self.filter.clone(),
        };
        Ok(self.store.count_documents(session, T::COLLECTION, &filter)?)
    }

    pub fn ids(&self) -> Result<Vec<String>, LinkError> {
        let options = FindOptions {
            projection: Some(Vec::new()),
            ..self.options.clone()
        };
        Ok(self.fetch(&options)?.into_iter().map(|(id, _)| id).collect())
    }
}
