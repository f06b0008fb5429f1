// ── Paginated accumulation ──
//
// A fetch-first trigger starts a session and requests page 1; fetch-next
// triggers request the page after the last one that produced items. Pages
// are concatenated into one growing snapshot per session. Total counts are
// published through a `watch` channel and gate fetch-next: while the total
// is zero, next triggers are dropped.

use std::future::{Future, ready};
use std::pin::pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace};

use crate::error::FetchError;
use crate::stream::{ErrorStream, LoadingFlag, next_inner, pausable};
use crate::track::{ActivityTracker, ERROR_CHANNEL_CAPACITY, ErrorTracker};

// ── Page payloads ───────────────────────────────────────────────────

/// One page of a paginated listing.
///
/// `total` is the server's count of all items across pages; zero means
/// there is nothing (more) to fetch.
pub trait PageList {
    type Item;

    fn total(&self) -> u64;

    fn into_items(self) -> Vec<Self::Item>;
}

/// The common `{ "items": [...], "total": n }` page envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(alias = "data")]
    pub items: Vec<T>,
    #[serde(alias = "totalCount", default)]
    pub total: u64,
}

impl<T> PageList for Page<T> {
    type Item = T;

    fn total(&self) -> u64 {
        self.total
    }

    fn into_items(self) -> Vec<T> {
        self.items
    }
}

// ── Item transforms ─────────────────────────────────────────────────

/// Maps the items of each page before they are accumulated.
pub trait ItemTransform<T>: Clone {
    type Output;

    fn apply(&self, items: Vec<T>) -> impl Future<Output = Result<Vec<Self::Output>, FetchError>> + Send;
}

/// Keep items as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl<T: Send> ItemTransform<T> for Identity {
    type Output = T;

    fn apply(&self, items: Vec<T>) -> impl Future<Output = Result<Vec<T>, FetchError>> + Send {
        ready(Ok(items))
    }
}

/// Run a per-item function on the blocking pool of an injected runtime.
///
/// The accumulating stream waits for the batch, so page order is kept.
pub struct Offload<F> {
    handle: Handle,
    f: Arc<F>,
}

impl<F> Offload<F> {
    pub fn new(handle: Handle, f: F) -> Self {
        Self {
            handle,
            f: Arc::new(f),
        }
    }
}

impl<F> Clone for Offload<F> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            f: Arc::clone(&self.f),
        }
    }
}

impl<F> std::fmt::Debug for Offload<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Offload").finish_non_exhaustive()
    }
}

impl<T, V, F> ItemTransform<T> for Offload<F>
where
    T: Send + 'static,
    V: Send + 'static,
    F: Fn(T) -> V + Send + Sync + 'static,
{
    type Output = V;

    fn apply(&self, items: Vec<T>) -> impl Future<Output = Result<Vec<V>, FetchError>> + Send {
        let f = Arc::clone(&self.f);
        let task = self
            .handle
            .spawn_blocking(move || items.into_iter().map(f.as_ref()).collect::<Vec<V>>());
        async move { task.await.map_err(FetchError::other) }
    }
}

// ── Session outputs ─────────────────────────────────────────────────

/// The outputs of a paginated session.
///
/// `values` emits the accumulated items after every page that added some.
/// It is the only driver; `total`, `loading` and `errors` observe it.
#[derive(Debug)]
pub struct Paged<S> {
    pub values: S,
    pub total: watch::Receiver<u64>,
    pub loading: LoadingFlag,
    pub errors: ErrorStream,
}

/// Accumulate pages without transforming their items.
///
/// `fetch(params, page)` is called with 1-based page numbers.
pub fn paginate<P, R, S, F>(
    first: impl Stream<Item = P>,
    next: impl Stream,
    fetch: F,
) -> Paged<impl Stream<Item = Arc<Vec<R::Item>>>>
where
    P: Clone,
    F: FnMut(P, u64) -> S,
    S: Stream<Item = Result<R, FetchError>>,
    R: PageList,
    R::Item: Clone + PartialEq + Send,
{
    paginate_with(first, next, fetch, Identity)
}

/// Accumulate pages, mapping every item through `transform`.
pub fn paginate_with<P, R, S, F, X>(
    first: impl Stream<Item = P>,
    next: impl Stream,
    fetch: F,
    transform: X,
) -> Paged<impl Stream<Item = Arc<Vec<X::Output>>>>
where
    P: Clone,
    F: FnMut(P, u64) -> S,
    S: Stream<Item = Result<R, FetchError>>,
    R: PageList,
    R::Item: Clone + PartialEq,
    X: ItemTransform<R::Item>,
    X::Output: Clone,
{
    paginate_inner(first, next, fetch, transform, ERROR_CHANNEL_CAPACITY)
}

struct Session<P, V> {
    params: P,
    page: u64,
    items: Arc<Vec<V>>,
}

enum PageStep<P, V> {
    First(Option<P>),
    Page(Option<Vec<V>>),
    Next(bool),
}

pub(crate) fn paginate_inner<P, R, S, F, X>(
    first: impl Stream<Item = P>,
    next: impl Stream,
    mut fetch: F,
    transform: X,
    error_capacity: usize,
) -> Paged<impl Stream<Item = Arc<Vec<X::Output>>>>
where
    P: Clone,
    F: FnMut(P, u64) -> S,
    S: Stream<Item = Result<R, FetchError>>,
    R: PageList,
    R::Item: Clone + PartialEq,
    X: ItemTransform<R::Item>,
    X::Output: Clone,
{
    let (total_tx, total_rx) = watch::channel(0u64);
    let total_tx = Arc::new(total_tx);
    let activity = ActivityTracker::new();
    let errors = ErrorTracker::new(error_capacity);

    let loading = activity.subscribe();
    let error_stream = errors.subscribe();
    let next = pausable(next, total_rx.clone(), |total| *total > 0);

    let values = async_stream::stream! {
        let mut start_page = |params: P, page: u64| {
            debug!(page, "requesting page");
            let fetched = page_results(fetch(params, page), Arc::clone(&total_tx), transform.clone());
            Box::pin(activity.track(errors.track(fetched)))
        };

        let mut first = pin!(first);
        let mut next = pin!(next);
        let mut session: Option<Session<P, X::Output>> = None;
        let mut in_flight = None;
        let mut first_done = false;
        let mut next_done = false;

        loop {
            if next_done && in_flight.is_none() && session.is_some() {
                debug!("next-page triggers ended, closing session");
                session = None;
            }
            if first_done && session.is_none() {
                break;
            }

            let step: PageStep<P, X::Output> = tokio::select! {
                biased;
                params = first.next(), if !first_done => PageStep::First(params),
                items = next_inner(&mut in_flight) => PageStep::Page(items),
                trigger = next.next(), if !next_done => PageStep::Next(trigger.is_some()),
            };

            match step {
                PageStep::First(Some(params)) => {
                    debug!("starting paginated session");
                    total_tx.send_replace(0);
                    in_flight = Some(start_page(params.clone(), 1));
                    session = Some(Session {
                        params,
                        page: 0,
                        items: Arc::default(),
                    });
                }
                PageStep::First(None) => first_done = true,
                PageStep::Next(true) => match session {
                    Some(ref s) => in_flight = Some(start_page(s.params.clone(), s.page + 1)),
                    None => debug!("no active session, dropping next-page trigger"),
                },
                PageStep::Next(false) => next_done = true,
                PageStep::Page(Some(items)) => {
                    if items.is_empty() {
                        debug!("empty page, session complete");
                        session = None;
                        in_flight = None;
                    } else if let Some(ref mut s) = session {
                        Arc::make_mut(&mut s.items).extend(items);
                        s.page += 1;
                        yield Arc::clone(&s.items);
                    }
                }
                PageStep::Page(None) => in_flight = None,
            }
        }
    };

    Paged {
        values,
        total: total_rx,
        loading,
        errors: error_stream,
    }
}

/// The items of one page fetch: totals published, identical consecutive
/// results dropped, items transformed. Ends at the first error.
fn page_results<R, S, X>(
    results: S,
    total: Arc<watch::Sender<u64>>,
    transform: X,
) -> impl Stream<Item = Result<Vec<X::Output>, FetchError>>
where
    S: Stream<Item = Result<R, FetchError>>,
    R: PageList,
    R::Item: Clone + PartialEq,
    X: ItemTransform<R::Item>,
{
    async_stream::stream! {
        let mut results = pin!(results);
        let mut last: Option<Vec<R::Item>> = None;

        while let Some(result) = results.next().await {
            let page = match result {
                Ok(page) => page,
                Err(err) => {
                    yield Err(err);
                    break;
                }
            };

            total.send_replace(page.total());
            let items = page.into_items();
            if last.as_ref() == Some(&items) {
                trace!("page unchanged, skipping");
                continue;
            }
            last = Some(items.clone());

            match transform.apply(items).await {
                Ok(mapped) => {
                    yield Ok(mapped);
                }
                Err(err) => {
                    yield Err(err);
                    break;
                }
            }
        }
    }
}
