//! Declarative SQLite schema definitions shared by the persistent stores.

mod versioned_schema;

pub use versioned_schema::*;
