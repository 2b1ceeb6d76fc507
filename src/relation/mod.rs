//! Relationship modeling over join collections.
//!
//! - **Naming**: deterministic join collection names and the discovery pattern
//! - **Join**: edge operations on one join collection
//! - **One**: a single-entity reference stored as a bare ID
//! - **Many**: one-to-many and many-to-many wrappers, normal or inverse side
//! - **Registry**: the relations declared so far, per entity type

// Naming scheme
pub mod naming;
#[doc(inline)]
pub use naming::{collection_name, discovery_pattern, RelationDef, RelationKind, Side};

// Join record store
pub mod join;
#[doc(inline)]
pub use join::JoinCollection;

// Reference wrappers
pub mod many;
pub mod one;
#[doc(inline)]
pub use many::Many;
#[doc(inline)]
pub use one::One;

pub mod registry;
#[doc(inline)]
pub use registry::RelationRegistry;
