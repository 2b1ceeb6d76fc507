//! Cascade delete.
//!
//! Deleting entities of type `T` by ID runs, per batch of at most
//! `cascade_batch_size` IDs:
//!
//! 1. **discover** the join collections that mention `T`, by listing the
//!    store's collections against [`discovery_pattern`] or by reading the
//!    relation registry. Listing never runs inside a session.
//! 2. **fan out** one task per join collection deleting every edge whose
//!    parent or child is in the batch, one task deleting the entity documents,
//!    and for file entities one task deleting their chunks.
//! 3. **gather** after every task settled; the first failure in task order is
//!    returned.
//!
//! Without a session the deletes are independent and a failed run can leave
//! some collections cleaned and others not. Every step is an idempotent
//! delete, so the remedy is to run the cascade again.

use crate::cancel::CancelToken;
use crate::config::{JoinDiscovery, RelationConfig};
use crate::entity::{Entity, EntityKind, FILE_CHUNK_COLLECTION, FILE_ID_FIELD};
use crate::error::LinkError;
use crate::fanout::{first_error, scatter_gather};
use crate::relation::{discovery_pattern, RelationRegistry};
use crate::store::{DocumentStore, Filter, JoinFilter};
use std::collections::HashSet;
use std::sync::Arc;

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// One unit of fan-out work
#[derive(Debug, Clone, PartialEq, Eq)]
enum Task {
    JoinRecords(String),
    Entities,
    FileChunks,
}

impl Task {
    fn label(&self) -> &str {
        match self {
            Task::JoinRecords(name) => name,
            Task::Entities => "entities",
            Task::FileChunks => FILE_CHUNK_COLLECTION,
        }
    }
}

enum Outcome {
    JoinRecords(u64),
    Entities(u64),
    FileChunks(u64),
}

pub(crate) struct CascadeDelete<'a, S: DocumentStore> {
    pub store: &'a Arc<S>,
    pub config: &'a RelationConfig,
    pub registry: &'a RelationRegistry,
}

impl<S: DocumentStore> CascadeDelete<'_, S> {
    /// Delete `ids` of `T` with their edges; returns the number of entity documents deleted
    pub fn run<T: Entity>(
        &self,
        ids: &[String],
        session: Option<&S::Session>,
        cancel: Option<&CancelToken>,
    ) -> Result<u64, LinkError> {
        if cancel.is_some() && session.is_none() {
            return Err(LinkError::CancellationUnsupported);
        }

        let mut seen = HashSet::with_capacity(ids.len());
        let ids: Vec<String> = ids
            .iter()
            .filter(|id| !id.is_empty() && seen.insert(id.as_str()))
            .cloned()
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let batch_size = self.config.cascade_batch_size.max(1);
        let batches = ids.len().div_ceil(batch_size);
        let mut deleted = 0;
        for (n, batch) in ids.chunks(batch_size).enumerate() {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                log::info!("cascade delete of {} cancelled before batch {}/{}", T::NAME, n + 1, batches);
                return Err(LinkError::Cancelled);
            }
            deleted += self.run_batch::<T>(batch, session, cancel)?;
        }
        Ok(deleted)
    }

    fn discover<T: Entity>(&self) -> Result<Vec<String>, LinkError> {
        match self.config.discovery {
            JoinDiscovery::Scan => {
                let pattern = discovery_pattern(T::NAME)?;
                Ok(self.store.list_collection_names(&pattern)?)
            }
            JoinDiscovery::Registry => Ok(self.registry.collections_for(T::NAME)),
        }
    }

    fn run_batch<T: Entity>(
        &self,
        batch: &[String],
        session: Option<&S::Session>,
        cancel: Option<&CancelToken>,
    ) -> Result<u64, LinkError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::cascade_delete_span(T::COLLECTION, batch.len()).entered();

        let collections = self.discover::<T>()?;
        let mut tasks: Vec<Task> = collections.into_iter().map(Task::JoinRecords).collect();
        tasks.push(Task::Entities);
        if T::KIND == EntityKind::File {
            tasks.push(Task::FileChunks);
        }
        log::debug!(
            "cascade delete of {} {}: {} task(s)",
            batch.len(),
            T::NAME,
            tasks.len()
        );

        let store = Arc::clone(self.store);
        let session = session.cloned();
        let cancel = cancel.cloned();
        let ids = Arc::new(batch.to_vec());
        let mut results = scatter_gather(tasks, self.config.fan_out_concurrency, move |task: Task| {
            #[cfg(feature = "tracing")]
            let _span = tracing_helpers::fan_out_task_span(task.label()).entered();

            if cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                return Err(LinkError::Cancelled);
            }
            run_task::<T, S>(&store, session.as_ref(), &ids, &task).map_err(|e| {
                log::warn!("cascade delete task {} failed: {}", task.label(), e);
                #[cfg(feature = "metrics")]
                METRICS.record_fan_out_failure();
                e
            })
        });

        if let Some(err) = first_error(&mut results) {
            return Err(err);
        }

        let (mut entities, mut joins, mut chunks) = (0, 0, 0);
        for outcome in results.into_iter().flatten() {
            match outcome {
                Outcome::JoinRecords(n) => joins += n,
                Outcome::Entities(n) => entities += n,
                Outcome::FileChunks(n) => chunks += n,
            }
        }
        log::info!(
            "cascade deleted {} {} document(s), {} join record(s), {} chunk(s)",
            entities,
            T::NAME,
            joins,
            chunks
        );
        #[cfg(feature = "metrics")]
        METRICS.record_cascade_batch(entities, joins);
        Ok(entities)
    }
}

fn run_task<T: Entity, S: DocumentStore>(
    store: &S,
    session: Option<&S::Session>,
    ids: &[String],
    task: &Task,
) -> Result<Outcome, LinkError> {
    Ok(match task {
        Task::JoinRecords(collection) => Outcome::JoinRecords(store.delete_join_records(
            session,
            collection,
            &JoinFilter::EitherIn(ids.to_vec()),
        )?),
        Task::Entities => Outcome::Entities(store.delete_documents(
            session,
            T::COLLECTION,
            &Filter::ids(ids.iter().cloned()),
        )?),
        Task::FileChunks => Outcome::FileChunks(store.delete_documents(
            session,
            FILE_CHUNK_COLLECTION,
            &Filter::is_in(FILE_ID_FIELD, ids.iter().cloned()),
        )?),
    })
}
