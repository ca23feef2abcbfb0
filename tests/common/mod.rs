//! Common test infrastructure
//!
//! This module provides everything the end-to-end tests need to open an
//! isolated, seeded library. Tests should only import from this module, not
//! from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestLibrary, ARTIST_BEATLES, TRACK_GET_BACK};
//!
//! #[tokio::test]
//! async fn test_exact_resolution() {
//!     let library = TestLibrary::open_ready().await;
//!     let resolved = library
//!         .context
//!         .resolver()
//!         .resolve_track(ARTIST_BEATLES, "", TRACK_GET_BACK)
//!         .unwrap();
//!     assert!(resolved.is_some());
//! }
//! ```

mod constants;
mod fixtures;

pub use constants::*;

use catalog_resolver::{LibraryConfig, LibraryContext};
use fixtures::create_test_library;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

pub const READY_TIMEOUT: Duration = Duration::from_secs(10);

/// A seeded library in its own temporary directory.
///
/// When dropped, the maintainer is told to stop and the directory is removed.
pub struct TestLibrary {
    pub context: LibraryContext,
    pub db_path: PathBuf,

    // Keep the directory alive until drop
    _temp_dir: TempDir,
}

impl TestLibrary {
    /// Seed a fresh library and open a context on it. The index may still be
    /// building when this returns.
    pub fn open() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("library.db");
        create_test_library(&db_path);
        let context = LibraryContext::open(LibraryConfig::new(&db_path))
            .expect("Failed to open library context");
        Self {
            context,
            db_path,
            _temp_dir: temp_dir,
        }
    }

    /// Like `open`, returning once the fuzzy index is ready.
    pub async fn open_ready() -> Self {
        let library = Self::open();
        library.wait_ready().await;
        library
    }

    pub async fn wait_ready(&self) {
        let mut readiness = self.context.readiness();
        let ready = tokio::time::timeout(READY_TIMEOUT, readiness.wait_ready())
            .await
            .expect("Timed out waiting for the fuzzy index");
        assert!(ready, "Readiness signal dropped before firing");
    }

    /// Close the context and open a new one on the same database.
    pub fn reopen(self) -> Self {
        let TestLibrary {
            context,
            db_path,
            _temp_dir,
        } = self;
        context.shutdown().expect("Failed to shut down context");
        drop(context);
        let context = LibraryContext::open(LibraryConfig::new(&db_path))
            .expect("Failed to reopen library context");
        Self {
            context,
            db_path,
            _temp_dir,
        }
    }
}

/// Poll `condition` until it holds or `READY_TIMEOUT` elapses.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = tokio::time::Instant::now() + READY_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
