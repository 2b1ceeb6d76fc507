//! The entity contract.
//!
//! An entity is any serde-serializable struct with a string ID and a
//! last-modified timestamp. The ID is empty until the first save; an entity
//! with an empty ID has never been persisted and cannot take part in a
//! relationship ([`ensure_saved`]).
//!
//! Implement [`Entity`] with [`lifelink_entity!`](crate::lifelink_entity):
//!
//! ```
//! use lifelink::lifelink_entity;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Default, Serialize, Deserialize)]
//! pub struct Author {
//!     pub id: String,
//!     pub modified_on: Option<lifelink::chrono::DateTime<lifelink::chrono::Utc>>,
//!     pub name: String,
//! }
//!
//! lifelink_entity!(Author, "authors");
//! ```

use crate::error::LinkError;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Collection holding the chunks of file entities
pub const FILE_CHUNK_COLLECTION: &str = "FileChunk";

/// Chunk field referencing the owning file entity
pub const FILE_ID_FIELD: &str = "FileID";

/// Storage shape of an entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Document,
    /// Content lives in [`FILE_CHUNK_COLLECTION`]; chunks go with the entity on delete
    File,
}

pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Type name used in relationship collection names
    const NAME: &'static str;
    const COLLECTION: &'static str;
    const KIND: EntityKind = EntityKind::Document;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    fn modified_on(&self) -> Option<DateTime<Utc>>;

    fn set_modified_on(&mut self, at: DateTime<Utc>);

    fn is_saved(&self) -> bool {
        !self.id().is_empty()
    }
}

/// Fail with [`LinkError::Unsaved`] when `entity` has no ID yet
pub fn ensure_saved<T: Entity>(entity: &T) -> Result<(), LinkError> {
    if entity.is_saved() {
        Ok(())
    } else {
        Err(LinkError::Unsaved { entity: T::NAME })
    }
}

/// Fresh entity ID: a UUIDv4 without hyphens
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}
