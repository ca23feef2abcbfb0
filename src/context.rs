//! Single long-lived owner of the identity store, fuzzy index, resolver and
//! index maintainer.
//!
//! Construct one `LibraryContext` at startup and hand out references to it.
//! `shutdown` stops the maintainer; dropping the context does the same without
//! waiting for it.

use crate::config::LibraryConfig;
use crate::error::LibraryResult;
use crate::identity_store::{IdentityStore, SqliteIdentityStore};
use crate::index_maintainer::{IndexMaintainer, MaintainerHandle};
use crate::resolver::Resolver;
use crate::search::{FuzzyIndex, ReadinessListener};
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct LibraryContext {
    config: LibraryConfig,
    store: Arc<SqliteIdentityStore>,
    index: Arc<FuzzyIndex>,
    resolver: Resolver,
    maintainer: Mutex<Option<MaintainerHandle>>,
}

impl LibraryContext {
    /// Open the store, then start building the index in the background.
    ///
    /// Returns as soon as the store is open; until the index is ready the
    /// resolver serves store-side search.
    pub fn open(config: LibraryConfig) -> LibraryResult<Self> {
        config.validate()?;
        info!("Opening library database at {:?}...", config.db_path);
        let store = Arc::new(SqliteIdentityStore::new(&config)?);
        let index = Arc::new(FuzzyIndex::new(config.normalizer(), config.refine_top_k));
        let resolver = Resolver::new(store.clone(), index.clone(), &config);

        #[cfg(not(feature = "no_index"))]
        let maintainer = Some(IndexMaintainer::new(store.clone(), index.clone(), &config).spawn()?);

        #[cfg(feature = "no_index")]
        let maintainer = {
            info!("Fuzzy index disabled, serving store-only search");
            None
        };

        Ok(Self {
            config,
            store,
            index,
            resolver,
            maintainer: Mutex::new(maintainer),
        })
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn IdentityStore> {
        self.store.clone()
    }

    pub fn index(&self) -> Arc<FuzzyIndex> {
        self.index.clone()
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn readiness(&self) -> ReadinessListener {
        self.index.readiness()
    }

    /// Force a synchronous full rebuild of the index from the store.
    pub fn rebuild_index(&self) -> LibraryResult<usize> {
        IndexMaintainer::new(self.store.clone(), self.index.clone(), &self.config).rebuild_now()
    }

    /// Stop the index maintainer and wait for it. Idempotent.
    pub fn shutdown(&self) -> LibraryResult<()> {
        let handle = self.maintainer.lock().unwrap().take();
        match handle {
            Some(mut handle) => handle.shutdown(),
            None => Ok(()),
        }
    }
}
