//! `Database` - the entry point tying a store to the relationship layer.

use crate::cancel::CancelToken;
use crate::cascade::CascadeDelete;
use crate::config::{LinkConfig, RelationConfig};
use crate::entity::{generate_id, Entity};
use crate::error::LinkError;
use crate::fanout::configure_runtime;
use crate::query::{EntityQuery, Source};
use crate::relation::{JoinCollection, Many, One, RelationDef, RelationRegistry, Side};
use crate::store::{DocumentStore, Filter, FindOptions};
use crate::sweep::{self, SweepReport};
use chrono::Utc;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// A document store plus relationship configuration
///
/// Cheap to clone; clones share the store and the relation registry.
///
/// # Examples
///
/// ```
/// use lifelink::{lifelink_entity, Database, MemoryStore};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct Author {
///     id: String,
///     modified_on: Option<lifelink::chrono::DateTime<lifelink::chrono::Utc>>,
///     name: String,
/// }
/// lifelink_entity!(Author, "authors");
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// struct Book {
///     id: String,
///     modified_on: Option<lifelink::chrono::DateTime<lifelink::chrono::Utc>>,
///     title: String,
/// }
/// lifelink_entity!(Book, "books");
///
/// # fn main() -> Result<(), lifelink::LinkError> {
/// let db = Database::new(MemoryStore::new());
/// let mut author = Author { name: "Herbert".into(), ..Default::default() };
/// let mut book = Book { title: "Dune".into(), ..Default::default() };
/// db.save(&mut author, None)?;
/// db.save(&mut book, None)?;
///
/// let books = db.one_to_many::<Author, Book>(&author, "Books")?;
/// books.add(&book)?;
/// assert_eq!(books.children()?.all()?[0].title, "Dune");
///
/// assert_eq!(db.delete(&author, None)?, 1);
/// assert_eq!(books.children_count()?, 0);
/// # Ok(())
/// # }
/// ```
pub struct Database<S: DocumentStore> {
    store: Arc<S>,
    config: RelationConfig,
    registry: Arc<RelationRegistry>,
}

impl<S: DocumentStore> Clone for Database<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<S: DocumentStore> Database<S> {
    /// Wrap `store` with default relation settings
    pub fn new(store: S) -> Self {
        Self::from_parts(Arc::new(store), RelationConfig::default())
    }

    /// Wrap `store` with explicit relation settings
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::InvalidOperation`] if the settings are out of range.
    pub fn with_config(store: S, config: RelationConfig) -> Result<Self, LinkError> {
        config
            .validate()
            .map_err(|e| LinkError::InvalidOperation(e.to_string()))?;
        Ok(Self::from_parts(Arc::new(store), config))
    }

    /// Share an existing store handle
    pub fn from_arc(store: Arc<S>, config: &LinkConfig) -> Result<Self, LinkError> {
        config
            .relations
            .validate()
            .map_err(|e| LinkError::InvalidOperation(e.to_string()))?;
        Ok(Self::from_parts(store, config.relations.clone()))
    }

    fn from_parts(store: Arc<S>, config: RelationConfig) -> Self {
        configure_runtime(config.coroutine_stack_size);
        Self {
            store,
            config,
            registry: Arc::new(RelationRegistry::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &RelationConfig {
        &self.config
    }

    pub fn registry(&self) -> &RelationRegistry {
        &self.registry
    }

    /// Insert or replace `entity`, assigning an ID on first save
    ///
    /// `ModifiedOn` is stamped on every save. If the write fails, an ID
    /// assigned by this call is taken back.
    pub fn save<T: Entity>(&self, entity: &mut T, session: Option<&S::Session>) -> Result<(), LinkError> {
        let assigned = !entity.is_saved();
        if assigned {
            entity.set_id(generate_id());
        }
        entity.set_modified_on(Utc::now());

        let result = serde_json::to_value(&*entity)
            .map_err(LinkError::from)
            .and_then(|document| {
                let id = entity.id().to_string();
                Ok(self
                    .store
                    .upsert_document(session, T::COLLECTION, &id, document)?)
            });
        if result.is_err() && assigned {
            entity.set_id(String::new());
        }
        result
    }

    pub fn save_many<T: Entity>(&self, entities: &mut [T], session: Option<&S::Session>) -> Result<(), LinkError> {
        entities
            .iter_mut()
            .try_for_each(|entity| self.save(entity, session))
    }

    /// Lazy query over every entity of type `T`
    pub fn find<T: Entity>(&self) -> EntityQuery<T, S> {
        EntityQuery::new(Arc::clone(&self.store), None, Source::Collection)
    }

    pub fn find_by_id<T: Entity>(&self, id: &str, session: Option<&S::Session>) -> Result<Option<T>, LinkError> {
        let found = self.store.find_documents(
            session,
            T::COLLECTION,
            &Filter::ids([id]),
            &FindOptions::default(),
        )?;
        match found.into_iter().next() {
            Some((id, document)) => {
                let mut entity: T = serde_json::from_value(document)?;
                entity.set_id(id);
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    /// Load only `fields` (plus `id`) of one `T` into `P`
    pub fn find_projected<T: Entity, P: DeserializeOwned>(
        &self,
        id: &str,
        fields: &[&str],
        session: Option<&S::Session>,
    ) -> Result<Option<P>, LinkError> {
        let mut query = self.find::<T>().filter(Filter::ids([id])).project(fields);
        if let Some(session) = session {
            query = query.in_session(session.clone());
        }
        Ok(query.all_as::<P>()?.into_iter().next())
    }

    pub fn begin_session(&self) -> Result<S::Session, LinkError> {
        Ok(self.store.begin_session()?)
    }

    pub fn commit(&self, session: S::Session) -> Result<(), LinkError> {
        Ok(self.store.commit_session(session)?)
    }

    pub fn abort(&self, session: S::Session) -> Result<(), LinkError> {
        Ok(self.store.abort_session(session)?)
    }

    /// Run `f` in a new session: commit on `Ok`, abort on `Err`
    pub fn transaction<R>(
        &self,
        f: impl FnOnce(&S::Session) -> Result<R, LinkError>,
    ) -> Result<R, LinkError> {
        let session = self.begin_session()?;
        match f(&session) {
            Ok(value) => {
                self.commit(session)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = self.abort(session) {
                    log::warn!("abort after failed transaction also failed: {abort_err}");
                }
                Err(err)
            }
        }
    }

    fn wrapper<P: Entity, C: Entity>(&self, owner: &P, def: RelationDef, side: Side) -> Result<Many<P, C, S>, LinkError> {
        let join = JoinCollection::new(Arc::clone(&self.store), def.collection_name());
        let many = Many::new(owner, Arc::clone(&self.store), join, side)?;
        self.registry.register(&def);
        Ok(many)
    }

    /// `parent.property` holds many `C`
    ///
    /// # Errors
    ///
    /// [`LinkError::Unsaved`] if `parent` has no ID yet, [`LinkError::InvalidName`]
    /// for a name the collection encoding cannot carry.
    pub fn one_to_many<P: Entity, C: Entity>(&self, parent: &P, property: &str) -> Result<Many<P, C, S>, LinkError> {
        let def = RelationDef::one_to_many(P::NAME, property, C::NAME)?;
        self.wrapper(parent, def, Side::Normal)
    }

    /// Owner side of a many-to-many relationship: `owner.property` <-> `C.inverse_property`
    pub fn many_to_many<P: Entity, C: Entity>(
        &self,
        owner: &P,
        property: &str,
        inverse_property: &str,
    ) -> Result<Many<P, C, S>, LinkError> {
        let def = RelationDef::many_to_many(P::NAME, property, C::NAME, inverse_property)?;
        self.wrapper(owner, def, Side::Normal)
    }

    /// Inverse side of a many-to-many relationship owned by `C.owner_property`
    ///
    /// Shares the join collection of the matching [`many_to_many`](Self::many_to_many).
    pub fn many_to_many_inverse<P: Entity, C: Entity>(
        &self,
        entity: &P,
        property: &str,
        owner_property: &str,
    ) -> Result<Many<P, C, S>, LinkError> {
        let def = RelationDef::many_to_many(C::NAME, owner_property, P::NAME, property)?;
        self.wrapper(entity, def, Side::Inverse)
    }

    /// Reference to a persisted entity
    pub fn one<T: Entity>(&self, entity: &T) -> Result<One<T>, LinkError> {
        One::new(entity)
    }

    /// Cascade delete a single persisted entity
    pub fn delete<T: Entity>(&self, entity: &T, session: Option<&S::Session>) -> Result<u64, LinkError> {
        crate::entity::ensure_saved(entity)?;
        self.delete_cascading::<T>(&[entity.id().to_string()], session, None)
    }

    /// Delete entities of `T` by ID together with every edge that mentions them
    ///
    /// Returns the number of entity documents deleted. A `cancel` token is
    /// only accepted together with a session.
    pub fn delete_cascading<T: Entity>(
        &self,
        ids: &[String],
        session: Option<&S::Session>,
        cancel: Option<&CancelToken>,
    ) -> Result<u64, LinkError> {
        CascadeDelete {
            store: &self.store,
            config: &self.config,
            registry: &self.registry,
        }
        .run::<T>(ids, session, cancel)
    }

    /// Cascade delete every `T` matching `filter`
    pub fn delete_matching<T: Entity>(
        &self,
        filter: Filter,
        session: Option<&S::Session>,
        cancel: Option<&CancelToken>,
    ) -> Result<u64, LinkError> {
        if cancel.is_some() && session.is_none() {
            return Err(LinkError::CancellationUnsupported);
        }
        let mut query = self.find::<T>().filter(filter);
        if let Some(session) = session {
            query = query.in_session(session.clone());
        }
        let ids = query.ids()?;
        self.delete_cascading::<T>(&ids, session, cancel)
    }

    /// Remove edges of `def` whose `P` parent or `C` child no longer exists
    ///
    /// For many-to-many relationships `P` is the owner type.
    pub fn sweep_orphans<P: Entity, C: Entity>(
        &self,
        def: &RelationDef,
        session: Option<&S::Session>,
    ) -> Result<SweepReport, LinkError> {
        if def.parent_type() != P::NAME || def.child_type() != C::NAME {
            return Err(LinkError::InvalidOperation(format!(
                "relation {def} does not link {} to {}",
                P::NAME,
                C::NAME
            )));
        }
        sweep::sweep_orphans::<P, C, S>(
            &self.store,
            session,
            &def.collection_name(),
            self.config.cascade_batch_size,
        )
    }
}
