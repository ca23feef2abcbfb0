mod models;
mod mru_cache;
mod schema;
mod store;
mod trait_def;

pub use models::*;
pub use schema::IDENTITY_VERSIONED_SCHEMAS;
pub use store::SqliteIdentityStore;
pub use trait_def::{IdentityStore, IndexSource, MutationReceiver};
