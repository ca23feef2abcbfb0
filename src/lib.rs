//! Catalog Resolver Library
//!
//! Persistent artist/album/track identities plus an in-memory fuzzy index that
//! resolves loosely specified names to them.

pub mod config;
pub mod context;
pub mod error;
pub mod identity_store;
pub mod index_maintainer;
pub mod normalize;
pub mod resolver;
pub mod search;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use config::{CliConfig, FileConfig, LibraryConfig};
pub use context::LibraryContext;
pub use error::{LibraryError, LibraryResult};
pub use identity_store::{EntityId, EntityKind, IdentityStore, SqliteIdentityStore};
pub use normalize::{normalize, Normalizer};
pub use resolver::{ResolvedTrack, Resolver};
pub use search::{FuzzyIndex, IndexReadiness, ScoredMatch};
