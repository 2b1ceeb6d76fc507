//! Document store abstraction.
//!
//! `DocumentStore` is the seam between the relationship layer and a concrete
//! schemaless store. It resolves collections by name, lists them for cascade
//! discovery, and exposes two families of operations:
//!
//! - **documents**: entity documents addressed by primary key and [`Filter`]
//! - **join records**: `(_id, ParentID, ChildID, ModifiedOn)` edges addressed by [`JoinFilter`]
//!
//! Every data operation takes an optional session. Without one the call runs
//! as an independent, non-transactional operation. Listing collection names
//! never takes a session.
//!
//! Two backends ship with the crate: [`MemoryStore`] and [`PgStore`].

pub mod error;
pub mod filter;
pub mod memory;
pub mod postgres;
mod sql;

#[doc(inline)]
pub use error::StoreError;
#[doc(inline)]
pub use filter::{Filter, FindOptions, Order, ID_FIELD};
#[doc(inline)]
pub use memory::{MemorySession, MemoryStore};
#[doc(inline)]
pub use postgres::{PgSession, PgStore};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One edge of a relationship, as persisted in a join collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRecord {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "ParentID")]
    pub parent_id: String,
    #[serde(rename = "ChildID")]
    pub child_id: String,
    #[serde(rename = "ModifiedOn")]
    pub modified_on: DateTime<Utc>,
}

/// Which ID column of a join record an operation looks at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinField {
    Parent,
    Child,
}

impl JoinField {
    /// Persisted column/field name
    pub fn column(self) -> &'static str {
        match self {
            JoinField::Parent => "ParentID",
            JoinField::Child => "ChildID",
        }
    }

    /// The value of this field on a record
    pub fn of(self, record: &JoinRecord) -> &str {
        match self {
            JoinField::Parent => &record.parent_id,
            JoinField::Child => &record.child_id,
        }
    }

    /// The other ID field
    pub fn opposite(self) -> Self {
        match self {
            JoinField::Parent => JoinField::Child,
            JoinField::Child => JoinField::Parent,
        }
    }
}

/// Selects join records
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinFilter {
    /// Every record
    All,
    /// `field == id`
    Eq(JoinField, String),
    /// `field IN ids`
    In(JoinField, Vec<String>),
    /// `(ParentID, ChildID) IN pairs`
    Pairs(Vec<(String, String)>),
    /// `ParentID IN ids OR ChildID IN ids`
    EitherIn(Vec<String>),
}

impl JoinFilter {
    pub fn matches(&self, record: &JoinRecord) -> bool {
        match self {
            JoinFilter::All => true,
            JoinFilter::Eq(field, id) => field.of(record) == id,
            JoinFilter::In(field, ids) => ids.iter().any(|id| id == field.of(record)),
            JoinFilter::Pairs(pairs) => pairs
                .iter()
                .any(|(p, c)| *p == record.parent_id && *c == record.child_id),
            JoinFilter::EitherIn(ids) => ids
                .iter()
                .any(|id| *id == record.parent_id || *id == record.child_id),
        }
    }
}

/// Store operations consumed by the relationship layer
///
/// Implementations must be safe for concurrent use: the cascade delete fans
/// out over several coroutines that share one store.
///
/// `upsert_join_records` is the concurrency contract of the whole crate: it
/// must be keyed on `(ParentID, ChildID)` and atomic per record, so two
/// writers adding the same edge never produce two records.
pub trait DocumentStore: Send + Sync + 'static {
    /// Transaction handle; clones refer to the same transaction
    type Session: Clone + Send + Sync + 'static;

    fn begin_session(&self) -> Result<Self::Session, StoreError>;

    fn commit_session(&self, session: Self::Session) -> Result<(), StoreError>;

    fn abort_session(&self, session: Self::Session) -> Result<(), StoreError>;

    /// Names of existing collections matching `pattern`; never session-bound
    fn list_collection_names(&self, pattern: &Regex) -> Result<Vec<String>, StoreError>;

    /// Insert or replace the document with primary key `id`
    fn upsert_document(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        id: &str,
        document: Value,
    ) -> Result<(), StoreError>;

    /// Matching documents as `(id, document)` pairs; a missing collection is empty
    fn find_documents(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<(String, Value)>, StoreError>;

    fn count_documents(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError>;

    /// Delete matching documents, returning how many were removed
    fn delete_documents(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError>;

    /// Create the join collection and its `(ParentID, ChildID)` uniqueness if missing
    fn ensure_join_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// One bulk write; existing pairs keep their `_id` and get the new `ModifiedOn`
    ///
    /// Returns the number of records inserted or touched.
    fn upsert_join_records(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        records: &[JoinRecord],
    ) -> Result<u64, StoreError>;

    /// Matching records in insertion order; a missing collection is empty
    fn find_join_records(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &JoinFilter,
    ) -> Result<Vec<JoinRecord>, StoreError>;

    fn count_join_records(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &JoinFilter,
    ) -> Result<u64, StoreError>;

    fn delete_join_records(
        &self,
        session: Option<&Self::Session>,
        collection: &str,
        filter: &JoinFilter,
    ) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(p: &str, c: &str) -> JoinRecord {
        JoinRecord {
            id: format!("{p}-{c}"),
            parent_id: p.to_string(),
            child_id: c.to_string(),
            modified_on: Utc::now(),
        }
    }

    #[test]
    fn test_join_filter_matches() {
        let r = record("a1", "b1");
        assert!(JoinFilter::Eq(JoinField::Parent, "a1".into()).matches(&r));
        assert!(!JoinFilter::Eq(JoinField::Child, "a1".into()).matches(&r));
        assert!(JoinFilter::In(JoinField::Child, vec!["b0".into(), "b1".into()]).matches(&r));
        assert!(JoinFilter::Pairs(vec![("a1".into(), "b1".into())]).matches(&r));
        assert!(!JoinFilter::Pairs(vec![("b1".into(), "a1".into())]).matches(&r));
        assert!(JoinFilter::EitherIn(vec!["b1".into()]).matches(&r));
        assert!(JoinFilter::All.matches(&r));
    }

    #[test]
    fn test_join_field_helpers() {
        let r = record("p", "c");
        assert_eq!(JoinField::Parent.of(&r), "p");
        assert_eq!(JoinField::Parent.opposite(), JoinField::Child);
        assert_eq!(JoinField::Child.column(), "ChildID");
    }

    #[test]
    fn test_join_record_persisted_field_names() {
        let value = serde_json::to_value(record("p", "c")).unwrap();
        for key in ["_id", "ParentID", "ChildID", "ModifiedOn"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }
}
