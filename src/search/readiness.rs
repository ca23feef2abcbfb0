//! One-shot readiness notification for the fuzzy index.

use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status")]
pub enum IndexReadiness {
    /// No full build has completed yet. Callers use store-side search.
    NotReady,
    Ready,
}

/// Sending half, owned by the index.
///
/// The state moves from `NotReady` to `Ready` at most once; later calls to
/// `mark_ready` are no-ops, so rebuilding never re-triggers listeners.
#[derive(Debug)]
pub struct ReadinessSignal {
    tx: watch::Sender<IndexReadiness>,
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(IndexReadiness::NotReady);
        Self { tx }
    }

    /// Returns true only for the call that performed the transition.
    pub fn mark_ready(&self) -> bool {
        let fired = self.tx.send_if_modified(|state| match state {
            IndexReadiness::NotReady => {
                *state = IndexReadiness::Ready;
                true
            }
            IndexReadiness::Ready => false,
        });
        if fired {
            info!("Fuzzy index is ready");
        }
        fired
    }

    pub fn current(&self) -> IndexReadiness {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ReadinessListener {
        ReadinessListener {
            rx: self.tx.subscribe(),
            observed: false,
        }
    }
}

/// Receiving half handed to collaborators.
#[derive(Debug, Clone)]
pub struct ReadinessListener {
    rx: watch::Receiver<IndexReadiness>,
    observed: bool,
}

impl ReadinessListener {
    pub fn is_ready(&self) -> bool {
        *self.rx.borrow() == IndexReadiness::Ready
    }

    /// Wait until the index is ready. Returns false if the index was dropped
    /// before it ever became ready.
    pub async fn wait_ready(&mut self) -> bool {
        self.rx
            .wait_for(|state| *state == IndexReadiness::Ready)
            .await
            .is_ok()
    }

    /// Returns true exactly once per listener: the first time it is called
    /// after the index became ready, whether that happened before or after
    /// the listener subscribed.
    pub fn take_transition(&mut self) -> bool {
        if self.observed {
            return false;
        }
        if *self.rx.borrow_and_update() == IndexReadiness::Ready {
            self.observed = true;
            return true;
        }
        false
    }
}
