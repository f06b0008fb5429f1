// ── Activity and error tracking ──
//
// Side channels shared by every request a wrapper drives. Activity is an
// in-flight counter published through `watch`; errors fan out through
// `broadcast`. Neither tracker drives anything: they observe streams that
// the caller polls.

use std::pin::pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace};

use crate::error::FetchError;
use crate::stream::{ErrorStream, LoadingFlag};

/// Buffered errors per [`ErrorStream`] subscriber before it starts lagging.
pub const ERROR_CHANNEL_CAPACITY: usize = 64;

/// Snapshot of a tracker's in-flight work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activity {
    pub in_flight: usize,
}

impl Activity {
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }
}

// ── ActivityTracker ─────────────────────────────────────────────────

/// Counts in-flight operations. Subscribers are only woken when the
/// loading state flips, not on every start or finish.
#[derive(Debug, Clone)]
pub struct ActivityTracker {
    state: Arc<watch::Sender<Activity>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Activity::default());
        Self {
            state: Arc::new(state),
        }
    }

    /// Mark one operation as started. It finishes when the guard drops.
    pub fn start(&self) -> ActivityGuard {
        self.state.send_if_modified(|activity| {
            activity.in_flight += 1;
            activity.in_flight == 1
        });
        ActivityGuard {
            state: Arc::clone(&self.state),
        }
    }

    /// Count `stream` as in flight from now until it ends or is dropped.
    pub fn track<S>(&self, stream: S) -> impl Stream<Item = S::Item> + use<S>
    where
        S: Stream,
    {
        let guard = self.start();
        async_stream::stream! {
            let _guard = guard;
            let mut stream = pin!(stream);
            while let Some(item) = stream.next().await {
                yield item;
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    pub fn subscribe(&self) -> LoadingFlag {
        LoadingFlag::new(self.state.subscribe())
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps one operation counted as in flight.
#[derive(Debug)]
pub struct ActivityGuard {
    state: Arc<watch::Sender<Activity>>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.state.send_if_modified(|activity| {
            activity.in_flight = activity.in_flight.saturating_sub(1);
            activity.in_flight == 0
        });
    }
}

// ── ErrorTracker ────────────────────────────────────────────────────

/// Fans errors out to every [`ErrorStream`] subscriber.
///
/// Errors reported while nobody is subscribed are dropped.
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    tx: broadcast::Sender<FetchError>,
}

impl ErrorTracker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn report(&self, err: FetchError) {
        debug!(error = %err, "request failed");
        if self.tx.send(err).is_err() {
            trace!("no error subscribers");
        }
    }

    /// Forward successes from `stream`; report the first error and end.
    pub fn track<S, T>(&self, stream: S) -> impl Stream<Item = T> + use<S, T>
    where
        S: Stream<Item = Result<T, FetchError>>,
    {
        let tracker = self.clone();
        async_stream::stream! {
            let mut stream = pin!(stream);
            while let Some(item) = stream.next().await {
                match item {
                    Ok(value) => {
                        yield value;
                    }
                    Err(err) => {
                        tracker.report(err);
                        break;
                    }
                }
            }
        }
    }

    pub fn subscribe(&self) -> ErrorStream {
        ErrorStream::new(self.tx.subscribe())
    }
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::new(ERROR_CHANNEL_CAPACITY)
    }
}
