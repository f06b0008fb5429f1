// ── Reactive side channels ──
//
// Subscription types for observing loading state and errors of tracked
// requests, plus the stream operators the wrappers are built from.

mod ops;

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tracing::warn;

use crate::error::FetchError;
use crate::track::Activity;

pub(crate) use ops::next_inner;
pub use ops::{pausable, switch_latest, with_latest_from};

/// A subscription to the loading state of a group of tracked requests.
///
/// Loading is `true` while at least one tracked request is in flight.
/// Provides point-in-time access via [`is_loading`](Self::is_loading) and
/// change notification via [`changed`](Self::changed) or by converting to
/// a `Stream`.
#[derive(Debug, Clone)]
pub struct LoadingFlag {
    receiver: watch::Receiver<Activity>,
}

impl LoadingFlag {
    pub(crate) fn new(receiver: watch::Receiver<Activity>) -> Self {
        Self { receiver }
    }

    /// Current loading state.
    pub fn is_loading(&self) -> bool {
        self.receiver.borrow().is_loading()
    }

    /// Number of tracked requests currently in flight.
    pub fn in_flight(&self) -> usize {
        self.receiver.borrow().in_flight
    }

    /// Wait for the next flip of the loading state, returning the new state.
    /// Returns `None` once every tracker has been dropped.
    pub async fn changed(&mut self) -> Option<bool> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().is_loading())
    }

    /// Resolve once nothing is in flight (immediately if already idle).
    pub async fn idle(&mut self) {
        // An error means the trackers are gone, which is idle too.
        let _ = self.receiver.wait_for(|a| !a.is_loading()).await;
    }

    /// Convert into a `Stream` that yields the current state first, then
    /// every flip.
    pub fn into_stream(self) -> impl Stream<Item = bool> + Send + Unpin {
        let mut last = None;
        WatchStream::new(self.receiver).filter_map(move |activity| {
            let loading = activity.is_loading();
            let changed = last != Some(loading);
            last = Some(loading);
            std::future::ready(changed.then_some(loading))
        })
    }
}

/// A subscription to the errors of a group of tracked requests.
///
/// Errors produced before the subscription was created are not replayed.
/// A subscriber that falls more than the channel capacity behind skips the
/// oldest errors (logged at `warn`).
#[derive(Debug)]
pub struct ErrorStream {
    receiver: broadcast::Receiver<FetchError>,
}

impl ErrorStream {
    pub(crate) fn new(receiver: broadcast::Receiver<FetchError>) -> Self {
        Self { receiver }
    }

    /// Wait for the next error. Returns `None` once every tracker has been
    /// dropped and the backlog is drained.
    pub async fn recv(&mut self) -> Option<FetchError> {
        loop {
            match self.receiver.recv().await {
                Ok(err) => return Some(err),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "error subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered error without waiting.
    pub fn try_recv(&mut self) -> Option<FetchError> {
        loop {
            match self.receiver.try_recv() {
                Ok(err) => return Some(err),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "error subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    /// A fresh subscription that sees only errors produced from now on.
    pub fn resubscribe(&self) -> Self {
        Self::new(self.receiver.resubscribe())
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> impl Stream<Item = FetchError> + Send + Unpin {
        BroadcastStream::new(self.receiver).filter_map(|item| {
            std::future::ready(match item {
                Ok(err) => Some(err),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(skipped = n, "error subscriber lagged");
                    None
                }
            })
        })
    }
}
