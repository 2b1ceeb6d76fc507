//! Declarative macros exported at the crate root.

mod entity;
