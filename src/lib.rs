//! # Lifelink
//!
//! Typed relationships over a schemaless document store, on the `may` coroutine runtime.
//!
//! Entities live in their own collections. Relationships are stored as edge
//! records in dedicated join collections whose names encode both endpoint
//! types, so a cascade delete can find every edge of a type by name alone.
//!
//! - [`One`] references a single entity by ID
//! - [`Many`] manages one entity's edges in a one-to-many or many-to-many relationship
//! - [`Database::delete_cascading`] removes entities with every edge that mentions them
//!
//! Stores: [`MemoryStore`] for tests and embedding, [`PgStore`] over PostgreSQL `jsonb`.

pub mod cancel;
mod cascade;
pub mod config;
pub mod connection;
pub mod database;
pub mod entity;
pub mod error;
pub mod executor;
mod fanout;
mod macros;
pub mod metrics;
pub mod query;
pub mod relation;
pub mod store;
pub mod sweep;
pub mod transaction;

pub use cancel::CancelToken;
pub use config::{JoinDiscovery, LinkConfig, RelationConfig};
pub use database::Database;
pub use entity::{Entity, EntityKind};
pub use error::LinkError;
pub use query::EntityQuery;
pub use relation::{JoinCollection, Many, One, RelationDef, RelationKind, Side};
pub use store::{DocumentStore, Filter, MemoryStore, Order, PgStore};
pub use sweep::SweepReport;

pub use chrono;
