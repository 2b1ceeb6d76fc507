//! Orphan sweep: on-demand repair of join collections.
//!
//! A cascade delete that ran without a session and failed part way can leave
//! edges pointing at documents that no longer exist. The sweep reads one join
//! collection, checks both endpoints of every edge against their entity
//! collections and deletes the edges with a missing endpoint.

use crate::entity::Entity;
use crate::error::LinkError;
use crate::store::{DocumentStore, Filter, FindOptions, JoinField, JoinFilter};
use std::collections::HashSet;

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Join records examined
    pub scanned: u64,
    /// Join records removed
    pub removed: u64,
}

/// IDs among `ids` with no document in `collection`
fn missing_ids<S: DocumentStore>(
    store: &S,
    session: Option<&S::Session>,
    collection: &str,
    ids: Vec<String>,
    batch_size: usize,
) -> Result<Vec<String>, LinkError> {
    let options = FindOptions {
        projection: Some(Vec::new()),
        ..FindOptions::default()
    };
    let mut missing = Vec::new();
    for chunk in ids.chunks(batch_size.max(1)) {
        let found: HashSet<String> = store
            .find_documents(session, collection, &Filter::ids(chunk.iter().cloned()), &options)?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        missing.extend(chunk.iter().filter(|id| !found.contains(*id)).cloned());
    }
    Ok(missing)
}

/// Remove edges of `collection` whose `P` parent or `C` child is gone
pub(crate) fn sweep_orphans<P: Entity, C: Entity, S: DocumentStore>(
    store: &S,
    session: Option<&S::Session>,
    collection: &str,
    batch_size: usize,
) -> Result<SweepReport, LinkError> {
    let records = store.find_join_records(session, collection, &JoinFilter::All)?;
    let scanned = records.len() as u64;
    if records.is_empty() {
        return Ok(SweepReport::default());
    }

    let mut parents = Vec::new();
    let mut children = Vec::new();
    let (mut seen_parents, mut seen_children) = (HashSet::new(), HashSet::new());
    for record in &records {
        if seen_parents.insert(record.parent_id.as_str()) {
            parents.push(record.parent_id.clone());
        }
        if seen_children.insert(record.child_id.as_str()) {
            children.push(record.child_id.clone());
        }
    }

    let missing_parents = missing_ids(store, session, P::COLLECTION, parents, batch_size)?;
    let missing_children = missing_ids(store, session, C::COLLECTION, children, batch_size)?;

    let mut removed = 0;
    for chunk in missing_parents.chunks(batch_size.max(1)) {
        removed += store.delete_join_records(
            session,
            collection,
            &JoinFilter::In(JoinField::Parent, chunk.to_vec()),
        )?;
    }
    for chunk in missing_children.chunks(batch_size.max(1)) {
        removed += store.delete_join_records(
            session,
            collection,
            &JoinFilter::In(JoinField::Child, chunk.to_vec()),
        )?;
    }

    if removed > 0 {
        log::warn!("orphan sweep removed {removed} of {scanned} join record(s) from {collection}");
    } else {
        log::debug!("orphan sweep found no orphans among {scanned} join record(s) in {collection}");
    }
    Ok(SweepReport { scanned, removed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::tests::Note;
    use crate::relation::JoinCollection;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_sweep_removes_edges_with_missing_endpoints() {
        let store = Arc::new(MemoryStore::new());
        for id in ["n1", "n2", "n3"] {
            store.upsert_document(None, "notes", id, json!({"id": id})).unwrap();
        }
        let join = JoinCollection::new(Arc::clone(&store), "[Note~Note(Replies)]");
        join.upsert_many(
            None,
            &[
                ("n1".into(), "n2".into()),
                ("n1".into(), "gone".into()),
                ("ghost".into(), "n3".into()),
                ("n2".into(), "n3".into()),
            ],
        )
        .unwrap();

        let report = sweep_orphans::<Note, Note, _>(store.as_ref(), None, join.name(), 2).unwrap();
        assert_eq!(report, SweepReport { scanned: 4, removed: 2 });
        assert_eq!(join.records(None).unwrap().len(), 2);

        let again = sweep_orphans::<Note, Note, _>(store.as_ref(), None, join.name(), 2).unwrap();
        assert_eq!(again.removed, 0);
    }

    #[test]
    fn test_sweep_of_missing_collection() {
        // EDGE CASE: sweeping a collection that was never written is a no-op
        let store = MemoryStore::new();
        let report = sweep_orphans::<Note, Note, _>(&store, None, "[Note~Note(Replies)]", 10).unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
