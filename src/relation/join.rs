//! Handle to one join collection.

use crate::entity::generate_id;
use crate::error::LinkError;
use crate::store::{DocumentStore, JoinField, JoinFilter, JoinRecord};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

/// Edge operations on a single join collection
///
/// Every operation takes an optional session; without one it runs as an
/// independent, non-transactional store call.
pub struct JoinCollection<S: DocumentStore> {
    store: Arc<S>,
    name: String,
}

impl<S: DocumentStore> Clone for JoinCollection<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
        }
    }
}

impl<S: DocumentStore> std::fmt::Debug for JoinCollection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinCollection").field("name", &self.name).finish()
    }
}

impl<S: DocumentStore> JoinCollection<S> {
    pub fn new(store: Arc<S>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Link `parent_id` to `child_id`; re-adding an edge only refreshes its `ModifiedOn`
    pub fn upsert(
        &self,
        session: Option<&S::Session>,
        parent_id: &str,
        child_id: &str,
    ) -> Result<(), LinkError> {
        self.upsert_many(session, &[(parent_id.to_string(), child_id.to_string())])
            .map(|_| ())
    }

    /// Link every `(parent, child)` pair in one bulk write
    pub fn upsert_many(
        &self,
        session: Option<&S::Session>,
        pairs: &[(String, String)],
    ) -> Result<u64, LinkError> {
        if pairs.is_empty() {
            return Ok(0);
        }
        let now = Utc::now();
        let records: Vec<JoinRecord> = pairs
            .iter()
            .map(|(parent_id, child_id)| JoinRecord {
                id: generate_id(),
                parent_id: parent_id.clone(),
                child_id: child_id.clone(),
                modified_on: now,
            })
            .collect();
        let written = self
            .store
            .upsert_join_records(session, &self.name, &records)?;
        log::debug!("upserted {} edge(s) into {}", records.len(), self.name);
        Ok(written)
    }

    /// Delete the given `(parent, child)` pairs; missing pairs are ignored
    pub fn remove_pairs(
        &self,
        session: Option<&S::Session>,
        pairs: Vec<(String, String)>,
    ) -> Result<u64, LinkError> {
        if pairs.is_empty() {
            return Ok(0);
        }
        Ok(self
            .store
            .delete_join_records(session, &self.name, &JoinFilter::Pairs(pairs))?)
    }

    pub fn delete_by_parent(&self, session: Option<&S::Session>, parent_id: &str) -> Result<u64, LinkError> {
        self.delete_where(session, JoinFilter::Eq(JoinField::Parent, parent_id.to_string()))
    }

    pub fn delete_by_child(&self, session: Option<&S::Session>, child_id: &str) -> Result<u64, LinkError> {
        self.delete_where(session, JoinFilter::Eq(JoinField::Child, child_id.to_string()))
    }

    /// Delete every edge whose parent or child is in `ids`
    pub fn delete_by_either_in(&self, session: Option<&S::Session>, ids: &[String]) -> Result<u64, LinkError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.delete_where(session, JoinFilter::EitherIn(ids.to_vec()))
    }

    fn delete_where(&self, session: Option<&S::Session>, filter: JoinFilter) -> Result<u64, LinkError> {
        Ok(self.store.delete_join_records(session, &self.name, &filter)?)
    }

    /// Child IDs linked to `parent_id`, in edge insertion order
    pub fn find_by_parent(&self, session: Option<&S::Session>, parent_id: &str) -> Result<Vec<String>, LinkError> {
        self.linked(session, JoinField::Parent, &[parent_id.to_string()])
    }

    /// Parent IDs linked to `child_id`, in edge insertion order
    pub fn find_by_child(&self, session: Option<&S::Session>, child_id: &str) -> Result<Vec<String>, LinkError> {
        self.linked(session, JoinField::Child, &[child_id.to_string()])
    }

    /// IDs on the opposite side of edges whose `field` is one of `ids`
    ///
    /// Duplicates are dropped, keeping the first occurrence in edge insertion order.
    pub fn linked(
        &self,
        session: Option<&S::Session>,
        field: JoinField,
        ids: &[String],
    ) -> Result<Vec<String>, LinkError> {
        let filter = match ids {
            [] => return Ok(Vec::new()),
            [id] => JoinFilter::Eq(field, id.clone()),
            _ => JoinFilter::In(field, ids.to_vec()),
        };
        let records = self.store.find_join_records(session, &self.name, &filter)?;
        let out = field.opposite();
        let mut seen = HashSet::with_capacity(records.len());
        Ok(records
            .into_iter()
            .map(|record| out.of(&record).to_string())
            .filter(|id| seen.insert(id.clone()))
            .collect())
    }

    pub fn count(&self, session: Option<&S::Session>, field: JoinField, id: &str) -> Result<u64, LinkError> {
        Ok(self.store.count_join_records(
            session,
            &self.name,
            &JoinFilter::Eq(field, id.to_string()),
        )?)
    }

    pub fn records(&self, session: Option<&S::Session>) -> Result<Vec<JoinRecord>, LinkError> {
        Ok(self.store.find_join_records(session, &self.name, &JoinFilter::All)?)
    }
}
