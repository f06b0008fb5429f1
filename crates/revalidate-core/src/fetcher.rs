// ── Stale-while-revalidate fetcher ──
//
// Merges a cache lookup and a network call for the same request into one
// stream: the cached response first (when there is one and the network
// hasn't answered yet), then the network response, which ends the stream.
// Cache writes and pending-request parking happen as side effects of the
// network branch, selected by the request's cache capability.

use std::pin::pin;
use std::sync::Arc;

use futures_core::Stream;
use futures_util::StreamExt;
use revalidate_api::{
    CachePolicy, HttpClient, ProgressResponse, RequestDescriptor, Response, Transport,
};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::ClientConfig;
use crate::connectivity::Connectivity;
use crate::error::FetchError;
use crate::page::{Identity, ItemTransform, PageList, Paged, paginate_inner};
use crate::request::{Tracked, track_requests_with_capacity};
use crate::track::ERROR_CHANNEL_CAPACITY;

/// Issues requests through a [`Transport`], merging them with a
/// [`CacheStore`].
///
/// Cheaply cloneable via `Arc`. Every request stream gets its own child of
/// the fetcher's cancellation token: dropping the stream cancels that
/// request, [`shutdown`](Self::shutdown) cancels all of them.
pub struct Fetcher<T> {
    inner: Arc<FetcherInner<T>>,
    error_capacity: usize,
}

struct FetcherInner<T> {
    transport: Arc<T>,
    cache: Arc<dyn CacheStore>,
    connectivity: Arc<dyn Connectivity>,
    cancel: CancellationToken,
}

impl<T> Clone for Fetcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            error_capacity: self.error_capacity,
        }
    }
}

impl<T> std::fmt::Debug for Fetcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("shut_down", &self.inner.cancel.is_cancelled())
            .field("error_capacity", &self.error_capacity)
            .finish_non_exhaustive()
    }
}

enum Merge {
    Cache(Option<Response>),
    Network(Result<Response, FetchError>),
    Cancelled,
}

impl Fetcher<HttpClient> {
    /// Build a reqwest-backed fetcher from runtime configuration.
    pub fn from_config(
        config: &ClientConfig,
        cache: Arc<dyn CacheStore>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, FetchError> {
        let transport = config.build_http_client()?;
        info!(base_url = %config.base_url, "fetcher ready");
        Ok(Self::new(transport, cache, connectivity)
            .with_error_channel_capacity(config.error_channel_capacity))
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn new(
        transport: T,
        cache: Arc<dyn CacheStore>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                transport: Arc::new(transport),
                cache,
                connectivity,
                cancel: CancellationToken::new(),
            }),
            error_capacity: ERROR_CHANNEL_CAPACITY,
        }
    }

    /// Buffered errors per subscriber for pipelines built by this fetcher.
    pub fn with_error_channel_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = capacity;
        self
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.inner.cache
    }

    // ── Merge policy ─────────────────────────────────────────────────

    /// Cached response (if any) followed by the network response.
    ///
    /// Emits at most twice. A network error is emitted last; a cached
    /// response already emitted is never retracted.
    pub fn request(
        &self,
        request: RequestDescriptor,
    ) -> impl Stream<Item = Result<Response, FetchError>> + Send + use<T> {
        let this = self.clone();
        async_stream::stream! {
            let cancel = this.inner.cancel.child_token();
            let _guard = cancel.clone().drop_guard();
            let mut cache = pin!(async { this.lookup(&request) });
            let mut network = pin!(this.network(&request, cancel.clone()));
            let mut cache_done = false;

            loop {
                let step = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Merge::Cancelled,
                    cached = &mut cache, if !cache_done => Merge::Cache(cached),
                    result = &mut network => Merge::Network(result),
                };

                match step {
                    Merge::Cache(cached) => {
                        cache_done = true;
                        if let Some(response) = cached {
                            debug!(path = request.path(), "serving cached response");
                            yield Ok(response);
                        }
                    }
                    Merge::Network(result) => {
                        yield result;
                        break;
                    }
                    Merge::Cancelled => {
                        debug!(path = request.path(), "request cancelled");
                        break;
                    }
                }
            }
        }
    }

    /// The network branch alone, with the same connectivity check and
    /// cache side effects as [`request`](Self::request).
    pub fn request_network(
        &self,
        request: RequestDescriptor,
    ) -> impl Stream<Item = Result<Response, FetchError>> + Send + use<T> {
        let this = self.clone();
        async_stream::stream! {
            let cancel = this.inner.cancel.child_token();
            let _guard = cancel.clone().drop_guard();
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = this.network(&request, cancel.clone()) => Some(result),
            };
            if let Some(result) = result {
                yield result;
            }
        }
    }

    /// The cache branch alone: one response or nothing.
    pub fn request_cache(&self, request: RequestDescriptor) -> impl Stream<Item = Response> + Send + use<T> {
        let this = self.clone();
        async_stream::stream! {
            if let Some(response) = this.lookup(&request) {
                yield response;
            }
        }
    }

    /// Raw transport call reporting download progress. No cache, no
    /// connectivity check.
    pub fn request_with_progress(
        &self,
        request: RequestDescriptor,
    ) -> impl Stream<Item = Result<ProgressResponse, FetchError>> + Send + use<T> {
        let cancel = self.inner.cancel.child_token();
        let guard = cancel.clone().drop_guard();
        let progress =
            revalidate_api::request_with_progress(Arc::clone(&self.inner.transport), request, cancel);
        async_stream::stream! {
            let _guard = guard;
            let mut progress = pin!(progress);
            while let Some(item) = progress.next().await {
                yield item.map_err(FetchError::from);
            }
        }
    }

    /// [`request`](Self::request) with every response body decoded as JSON.
    pub fn request_json<D>(
        &self,
        request: RequestDescriptor,
    ) -> impl Stream<Item = Result<D, FetchError>> + Send + use<T, D>
    where
        D: DeserializeOwned + Send,
    {
        self.request(request)
            .map(|result| result.and_then(|response| Ok(response.json::<D>()?)))
    }

    /// Cancel every in-flight request. Streams created afterwards end
    /// without emitting.
    pub fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            info!("shutting down fetcher");
            self.inner.cancel.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── Pipelines ────────────────────────────────────────────────────

    /// Latest-wins requests, one per trigger, built by `describe`.
    pub fn track<P, St, F>(
        &self,
        start: St,
        mut describe: F,
    ) -> Tracked<impl Stream<Item = Response> + use<T, P, St, F>>
    where
        St: Stream<Item = P>,
        F: FnMut(P) -> RequestDescriptor,
    {
        let this = self.clone();
        track_requests_with_capacity(
            start,
            move |params| this.request(describe(params)),
            self.error_capacity,
        )
    }

    /// Paginated listing of JSON pages; `describe(params, page)` builds the
    /// request for a 1-based page number.
    pub fn paginate<P, R, St, N, F>(
        &self,
        first: St,
        next: N,
        describe: F,
    ) -> Paged<impl Stream<Item = Arc<Vec<R::Item>>> + use<T, P, R, St, N, F>>
    where
        P: Clone,
        St: Stream<Item = P>,
        N: Stream,
        F: FnMut(P, u64) -> RequestDescriptor,
        R: PageList + DeserializeOwned + Send,
        R::Item: Clone + PartialEq + Send,
    {
        self.paginate_with::<P, R, St, N, F, Identity>(first, next, describe, Identity)
    }

    /// [`paginate`](Self::paginate) with an item transform.
    pub fn paginate_with<P, R, St, N, F, X>(
        &self,
        first: St,
        next: N,
        mut describe: F,
        transform: X,
    ) -> Paged<impl Stream<Item = Arc<Vec<X::Output>>> + use<T, P, R, St, N, F, X>>
    where
        P: Clone,
        St: Stream<Item = P>,
        N: Stream,
        F: FnMut(P, u64) -> RequestDescriptor,
        R: PageList + DeserializeOwned + Send,
        R::Item: Clone + PartialEq,
        X: ItemTransform<R::Item>,
        X::Output: Clone,
    {
        let this = self.clone();
        paginate_inner(
            first,
            next,
            move |params, page| this.request_json::<R>(describe(params, page)),
            transform,
            self.error_capacity,
        )
    }

    // ── Branches ─────────────────────────────────────────────────────

    fn lookup(&self, request: &RequestDescriptor) -> Option<Response> {
        request.cache()?;
        self.inner.cache.lookup(request)
    }

    async fn network(
        &self,
        request: &RequestDescriptor,
        cancel: CancellationToken,
    ) -> Result<Response, FetchError> {
        if !self.inner.connectivity.is_network_available() {
            warn!(path = request.path(), "no network available, skipping call");
            return Err(FetchError::NoNetwork);
        }

        match self.inner.transport.call(request, None, cancel).await {
            Ok(response) => {
                debug!(path = request.path(), status = response.status, "network response");
                if request.cache_policy() == CachePolicy::CacheOnSuccess {
                    self.inner.cache.store(request, &response);
                }
                Ok(response)
            }
            Err(revalidate_api::Error::Cancelled) => Err(FetchError::Cancelled),
            Err(err) => {
                if request.cache_policy() == CachePolicy::CacheOnFailure {
                    self.inner.cache.store_pending_request(request);
                }
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::future::Future;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use revalidate_api::{CacheKey, ProgressSink};
    use tokio::sync::{mpsc, oneshot};
    use tokio_stream::wrappers::UnboundedReceiverStream;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    use super::*;
    use crate::cache::MemoryCache;
    use crate::connectivity::ConnectivityFlag;
    use crate::page::Page;

    /// Scripted transport: answers from a queue (default `200 "network"`),
    /// optionally waiting for a release signal first.
    #[derive(Default)]
    struct FakeTransport {
        calls: AtomicUsize,
        responses: Mutex<VecDeque<Result<Response, revalidate_api::Error>>>,
        hold: Mutex<Option<oneshot::Receiver<()>>>,
        tokens: Mutex<Vec<CancellationToken>>,
        paths: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn respond(&self, response: Result<Response, revalidate_api::Error>) {
            self.responses.lock().unwrap().push_back(response);
        }

        fn hold(&self) -> oneshot::Sender<()> {
            let (tx, rx) = oneshot::channel();
            *self.hold.lock().unwrap() = Some(rx);
            tx
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for FakeTransport {
        fn call(
            &self,
            request: &RequestDescriptor,
            _progress: Option<ProgressSink>,
            cancel: CancellationToken,
        ) -> impl Future<Output = Result<Response, revalidate_api::Error>> + Send {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens.lock().unwrap().push(cancel.clone());
            self.paths.lock().unwrap().push(request.path().to_owned());
            let hold = self.hold.lock().unwrap().take();
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Response::new(200, "network")));

            async move {
                if let Some(hold) = hold {
                    tokio::select! {
                        () = cancel.cancelled() => return Err(revalidate_api::Error::Cancelled),
                        _ = hold => {}
                    }
                }
                next
            }
        }
    }

    struct Harness {
        fetcher: Fetcher<Arc<FakeTransport>>,
        transport: Arc<FakeTransport>,
        cache: Arc<MemoryCache>,
        online: Arc<ConnectivityFlag>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(FakeTransport::default());
        let cache = Arc::new(MemoryCache::new());
        let online = Arc::new(ConnectivityFlag::default());
        let fetcher = Fetcher::new(
            Arc::clone(&transport),
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            Arc::clone(&online) as Arc<dyn Connectivity>,
        );
        Harness {
            fetcher,
            transport,
            cache,
            online,
        }
    }

    fn cached_request(policy: CachePolicy) -> RequestDescriptor {
        RequestDescriptor::get("/feed").cached_as(policy, "feed")
    }

    fn body(item: Option<Result<Response, FetchError>>) -> String {
        item.unwrap().unwrap().text()
    }

    #[tokio::test]
    async fn cached_value_precedes_pending_network() {
        let h = harness();
        let req = cached_request(CachePolicy::CacheOnSuccess);
        h.cache.store(&req, &Response::new(200, "cached"));
        let release = h.transport.hold();

        let mut stream = task::spawn(h.fetcher.request(req));
        assert_eq!(body(assert_ready!(stream.poll_next())), "cached");
        assert_pending!(stream.poll_next());

        release.send(()).unwrap();
        assert_eq!(body(assert_ready!(stream.poll_next())), "network");
        assert!(assert_ready!(stream.poll_next()).is_none());
    }

    #[tokio::test]
    async fn cache_miss_emits_once() {
        let h = harness();
        let out: Vec<_> = h
            .fetcher
            .request(cached_request(CachePolicy::None))
            .collect()
            .await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().text(), "network");
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn uncached_requests_skip_the_store() {
        let h = harness();
        let req = RequestDescriptor::get("/feed");
        // Same default key as a cached GET /feed, but no capability.
        h.cache.store(
            &RequestDescriptor::get("/feed").cached(CachePolicy::CacheOnSuccess),
            &Response::new(200, "cached"),
        );

        let out: Vec<_> = h.fetcher.request(req).collect().await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap().text(), "network");
    }

    #[tokio::test]
    async fn success_is_cached_with_cache_on_success() {
        let h = harness();
        let req = cached_request(CachePolicy::CacheOnSuccess);
        let _: Vec<_> = h.fetcher.request(req.clone()).collect().await;

        assert_eq!(h.cache.lookup(&req).unwrap().text(), "network");
        assert!(h.cache.age(&CacheKey::new("feed")).is_some());
    }

    #[tokio::test]
    async fn failure_parks_request_with_cache_on_failure() {
        let h = harness();
        h.transport.respond(Err(revalidate_api::Error::Status {
            status: 500,
            body: "down".into(),
        }));

        let out: Vec<_> = h
            .fetcher
            .request(cached_request(CachePolicy::CacheOnFailure))
            .collect()
            .await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_ref().unwrap_err().status(), Some(500));
        let pending = h.cache.take_pending_requests();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].path(), "/feed");
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn failure_after_cache_hit_emits_both() {
        let h = harness();
        let req = cached_request(CachePolicy::CacheOnSuccess);
        h.cache.store(&req, &Response::new(200, "cached"));
        h.transport.respond(Err(revalidate_api::Error::Status {
            status: 502,
            body: String::new(),
        }));

        let out: Vec<_> = h.fetcher.request(req).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().text(), "cached");
        assert!(out[1].is_err());
    }

    #[tokio::test]
    async fn offline_skips_transport_but_serves_cache() {
        let h = harness();
        h.online.set_available(false);
        let req = cached_request(CachePolicy::CacheOnFailure);
        h.cache.store(&req, &Response::new(200, "cached"));

        let out: Vec<_> = h.fetcher.request(req).collect().await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap().text(), "cached");
        assert!(out[1].as_ref().unwrap_err().is_no_network());
        assert_eq!(h.transport.calls(), 0);
        // No call was attempted, so nothing is parked.
        assert_eq!(h.cache.pending_len(), 0);
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_call() {
        let h = harness();
        let _release = h.transport.hold();

        let mut stream = task::spawn(h.fetcher.request(RequestDescriptor::get("/slow")));
        assert_pending!(stream.poll_next());
        let token = h.transport.tokens.lock().unwrap()[0].clone();
        assert!(!token.is_cancelled());

        drop(stream);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_ends_in_flight_and_future_requests() {
        let h = harness();
        let _release = h.transport.hold();

        let mut stream = task::spawn(h.fetcher.request(RequestDescriptor::get("/slow")));
        assert_pending!(stream.poll_next());

        h.fetcher.shutdown();
        assert!(h.fetcher.is_shut_down());
        assert!(assert_ready!(stream.poll_next()).is_none());

        let out: Vec<_> = h.fetcher.request(RequestDescriptor::get("/later")).collect().await;
        assert!(out.is_empty());
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn branches_run_alone() {
        let h = harness();
        let req = cached_request(CachePolicy::CacheOnSuccess);
        h.cache.store(&req, &Response::new(200, "cached"));

        let cached: Vec<_> = h.fetcher.request_cache(req.clone()).collect().await;
        assert_eq!(cached, vec![Response::new(200, "cached")]);

        let network: Vec<_> = h.fetcher.request_network(req.clone()).collect().await;
        assert_eq!(network.len(), 1);
        assert_eq!(network[0].as_ref().unwrap().text(), "network");

        h.online.set_available(false);
        let offline: Vec<_> = h.fetcher.request_network(req).collect().await;
        assert!(offline[0].as_ref().unwrap_err().is_no_network());
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn progress_stream_ends_with_response() {
        let h = harness();
        let out: Vec<_> = h
            .fetcher
            .request_with_progress(RequestDescriptor::get("/file"))
            .collect()
            .await;

        let last = out.last().unwrap().as_ref().unwrap();
        assert!(last.is_completed());
        assert_eq!(last.response.as_ref().unwrap().text(), "network");
    }

    #[tokio::test]
    async fn json_bodies_decode() {
        let h = harness();
        h.transport.respond(Ok(Response::new(200, r#"{"items":[1,2],"total":2}"#)));
        h.transport.respond(Ok(Response::new(200, "not json")));

        let page: Vec<_> = h
            .fetcher
            .request_json::<Page<u32>>(RequestDescriptor::get("/p"))
            .collect()
            .await;
        assert_eq!(page[0].as_ref().unwrap().items, vec![1, 2]);

        let broken: Vec<_> = h
            .fetcher
            .request_json::<Page<u32>>(RequestDescriptor::get("/p"))
            .collect()
            .await;
        assert!(matches!(broken[0], Err(FetchError::Other(_))));
    }

    #[tokio::test]
    async fn track_cancels_superseded_request() {
        let h = harness();
        let _release = h.transport.hold();
        let (tx, rx) = mpsc::unbounded_channel();

        let tracked = h
            .fetcher
            .track(UnboundedReceiverStream::new(rx), |id: u32| RequestDescriptor::get(format!("/item/{id}")));
        let mut results = task::spawn(tracked.results);

        tx.send(1).unwrap();
        assert_pending!(results.poll_next());
        assert!(tracked.loading.is_loading());

        tx.send(2).unwrap();
        let result = assert_ready!(results.poll_next()).unwrap();
        assert_eq!(result.text(), "network");

        let tokens = h.transport.tokens.lock().unwrap().clone();
        assert!(tokens[0].is_cancelled());
        assert_eq!(*h.transport.paths.lock().unwrap(), vec!["/item/1", "/item/2"]);
    }

    #[tokio::test]
    async fn track_reports_offline_on_error_channel() {
        let h = harness();
        h.online.set_available(false);
        let (tx, rx) = mpsc::unbounded_channel();

        let tracked = h
            .fetcher
            .track(UnboundedReceiverStream::new(rx), |id: u32| RequestDescriptor::get(format!("/item/{id}")));
        let mut errors = tracked.errors;
        let mut results = task::spawn(tracked.results);

        tx.send(1).unwrap();
        assert_pending!(results.poll_next());

        assert!(errors.try_recv().unwrap().is_no_network());
        assert!(errors.try_recv().is_none());
        assert!(!tracked.loading.is_loading());
        assert_eq!(h.transport.calls(), 0);

        // The pipeline survives the error and serves the next trigger.
        h.online.set_available(true);
        tx.send(2).unwrap();
        assert_eq!(assert_ready!(results.poll_next()).unwrap().text(), "network");
        assert_eq!(h.transport.calls(), 1);
    }

    #[tokio::test]
    async fn paginate_decodes_pages() {
        let h = harness();
        h.transport.respond(Ok(Response::new(200, r#"{"data":["a","b"],"totalCount":3}"#)));
        h.transport.respond(Ok(Response::new(200, r#"{"data":["c"],"totalCount":3}"#)));
        let (first_tx, first_rx) = mpsc::unbounded_channel();
        let (next_tx, next_rx) = mpsc::unbounded_channel::<()>();

        let paged = h.fetcher.paginate::<_, Page<String>, _, _, _>(
            UnboundedReceiverStream::new(first_rx),
            UnboundedReceiverStream::new(next_rx),
            |query: &'static str, page| RequestDescriptor::get("/search").query("q", query).query("page", page),
        );
        let mut values = task::spawn(paged.values);

        first_tx.send("rust").unwrap();
        assert_ready_eq!(
            values.poll_next(),
            Some(Arc::new(vec!["a".to_owned(), "b".to_owned()]))
        );
        assert_eq!(*paged.total.borrow(), 3);

        next_tx.send(()).unwrap();
        let all = assert_ready!(values.poll_next()).unwrap();
        assert_eq!(all.len(), 3);
    }
}
