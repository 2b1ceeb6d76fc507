//! `One<T>` - a reference to a single entity by ID.

use crate::database::Database;
use crate::entity::{ensure_saved, Entity};
use crate::error::LinkError;
use crate::store::DocumentStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;

/// Holds only the referenced entity's ID and persists as that bare string
///
/// ```
/// use lifelink::{lifelink_entity, One};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Publisher {
///     id: String,
///     modified_on: Option<lifelink::chrono::DateTime<lifelink::chrono::Utc>>,
/// }
/// lifelink_entity!(Publisher, "publishers");
///
/// #[derive(Serialize, Deserialize)]
/// struct Book {
///     title: String,
///     publisher: One<Publisher>,
/// }
///
/// let book = Book { title: "Dune".into(), publisher: One::from_id("p1") };
/// let json = serde_json::to_value(&book).unwrap();
/// assert_eq!(json["publisher"], "p1");
/// ```
pub struct One<T: Entity> {
    id: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> One<T> {
    /// Reference a persisted entity
    ///
    /// # Errors
    ///
    /// Returns [`LinkError::Unsaved`] if `entity` has no ID yet.
    pub fn new(entity: &T) -> Result<Self, LinkError> {
        ensure_saved(entity)?;
        Ok(Self::from_id(entity.id()))
    }

    /// Reference an entity by a known ID
    pub fn from_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            _entity: PhantomData,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Load the referenced entity; `None` if it no longer exists
    pub fn to_entity<S: DocumentStore>(
        &self,
        db: &Database<S>,
        session: Option<&S::Session>,
    ) -> Result<Option<T>, LinkError> {
        if self.id.is_empty() {
            return Ok(None);
        }
        db.find_by_id::<T>(&self.id, session)
    }

    /// Load only `fields` of the referenced entity into `P`
    pub fn to_entity_projected<S: DocumentStore, P: DeserializeOwned>(
        &self,
        db: &Database<S>,
        fields: &[&str],
        session: Option<&S::Session>,
    ) -> Result<Option<P>, LinkError> {
        if self.id.is_empty() {
            return Ok(None);
        }
        db.find_projected::<T, P>(&self.id, fields, session)
    }
}

impl<T: Entity> Clone for One<T> {
    fn clone(&self) -> Self {
        Self::from_id(self.id.clone())
    }
}

impl<T: Entity> PartialEq for One<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: Entity> Eq for One<T> {}

impl<T: Entity> fmt::Debug for One<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "One<{}>({})", T::NAME, self.id)
    }
}

impl<T: Entity> TryFrom<&T> for One<T> {
    type Error = LinkError;

    fn try_from(entity: &T) -> Result<Self, LinkError> {
        Self::new(entity)
    }
}

impl<T: Entity> Serialize for One<T> {
    fn serialize<Ser: Serializer>(&self, serializer: Ser) -> Result<Ser::Ok, Ser::Error> {
        serializer.serialize_str(&self.id)
    }
}

impl<'de, T: Entity> Deserialize<'de> for One<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from_id)
    }
}
