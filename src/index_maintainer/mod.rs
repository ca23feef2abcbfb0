//! Background worker keeping the fuzzy index in sync with the identity store.
//!
//! The maintainer claims the store's mutation feed, performs the initial full
//! rebuild and then applies mutations in coalesced batches. It runs on its own
//! thread with a single-threaded tokio runtime so that store writers never wait
//! on index maintenance.

use crate::config::LibraryConfig;
use crate::error::{LibraryError, LibraryResult};
use crate::identity_store::{IndexSource, MutationEvent, MutationReceiver};
use crate::search::FuzzyIndex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct IndexMaintainer {
    source: Arc<dyn IndexSource>,
    index: Arc<FuzzyIndex>,
    batch_size: usize,
    coalesce_window: Duration,
}

/// Owned by whoever spawned the maintainer; stops the worker when asked to or
/// when dropped.
pub struct MaintainerHandle {
    shutdown_token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl MaintainerHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(&mut self) -> LibraryResult<()> {
        self.shutdown_token.cancel();
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| LibraryError::Maintainer("index maintainer panicked".to_string()))?;
            info!("Index maintainer stopped");
        }
        Ok(())
    }
}

impl Drop for MaintainerHandle {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

impl IndexMaintainer {
    pub fn new(source: Arc<dyn IndexSource>, index: Arc<FuzzyIndex>, config: &LibraryConfig) -> Self {
        Self {
            source,
            index,
            batch_size: config.maintainer_batch_size.max(1),
            coalesce_window: config.maintainer_coalesce_window(),
        }
    }

    /// Rebuild the whole index from a full scan of the source.
    ///
    /// Safe to call while the worker is running: mutations it applies during
    /// the scan are carried over. On failure the previous index stays in place.
    pub fn rebuild_now(&self) -> LibraryResult<usize> {
        self.index.rebuild_from(|| self.source.enumerate_all_entries())
    }

    /// Start the worker thread.
    ///
    /// The mutation feed is claimed before the initial scan, so writes racing
    /// with the rebuild are replayed on top of it.
    pub fn spawn(self) -> LibraryResult<MaintainerHandle> {
        let feed = self.source.recent_mutations();
        if feed.is_none() {
            warn!("Mutation feed already claimed, the index will not follow store changes");
        }

        let shutdown_token = CancellationToken::new();
        let worker_token = shutdown_token.clone();
        let thread = std::thread::Builder::new()
            .name("index-maintainer".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to start index maintainer runtime: {}", e);
                        return;
                    }
                };
                runtime.block_on(self.run(feed, worker_token));
            })
            .map_err(|e| LibraryError::Maintainer(format!("failed to spawn thread: {}", e)))?;

        Ok(MaintainerHandle {
            shutdown_token,
            thread: Some(thread),
        })
    }

    async fn run(self, feed: Option<MutationReceiver>, shutdown_token: CancellationToken) {
        info!("Index maintainer started");
        if let Err(e) = self.rebuild_now() {
            error!("Initial index rebuild failed, serving store-only search: {}", e);
        }

        let Some(mut feed) = feed else {
            return;
        };

        loop {
            let first = tokio::select! {
                _ = shutdown_token.cancelled() => break,
                event = feed.recv() => match event {
                    Some(event) => event,
                    None => {
                        debug!("Mutation feed closed");
                        break;
                    }
                },
            };

            // Let a burst accumulate before draining it.
            tokio::select! {
                _ = shutdown_token.cancelled() => break,
                _ = tokio::time::sleep(self.coalesce_window) => {}
            }

            let mut batch = vec![first];
            while batch.len() < self.batch_size {
                match feed.try_recv() {
                    Ok(event) => batch.push(event),
                    Err(_) => break,
                }
            }
            self.apply(coalesce(batch));
        }
    }

    fn apply(&self, batch: Vec<MutationEvent>) {
        if !self.index.is_ready() {
            // The initial rebuild failed; a fresh scan already covers the batch.
            match self.rebuild_now() {
                Ok(count) => info!("Index recovered with {} entries", count),
                Err(e) => error!("Index rebuild failed again: {}", e),
            }
            return;
        }
        debug!("Applying batch of {} mutations", batch.len());
        self.index.apply_mutations(&batch);
    }
}

/// Keep only the last event per entity, in the order those last events arrived.
fn coalesce(events: Vec<MutationEvent>) -> Vec<MutationEvent> {
    let total = events.len();
    let mut seen = HashSet::new();
    let mut kept: Vec<MutationEvent> = events
        .into_iter()
        .rev()
        .filter(|event| seen.insert(event.key()))
        .collect();
    kept.reverse();
    if kept.len() < total {
        debug!("Coalesced {} mutations into {}", total, kept.len());
    }
    kept
}
