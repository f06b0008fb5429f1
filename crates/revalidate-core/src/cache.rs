// ── Cache store collaborator ──
//
// The merge policy only needs three operations from a cache: look up a
// response, store one, and park a failed request for a later retry.
// `MemoryCache` is a lock-free in-process implementation; persistent
// stores plug in through the same trait.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use revalidate_api::{CacheKey, RequestDescriptor, Response};
use tracing::debug;

/// Storage behind the cache branch of the merge policy.
///
/// Lookups never fail: a miss or an internal error both read as `None`.
pub trait CacheStore: Send + Sync {
    /// Cached response for the request's cache key, if any.
    fn lookup(&self, request: &RequestDescriptor) -> Option<Response>;

    /// Store a fresh network response under the request's cache key.
    fn store(&self, request: &RequestDescriptor, response: &Response);

    /// Remember a request whose network call failed, so it can be retried.
    fn store_pending_request(&self, request: &RequestDescriptor);
}

/// A cache that never holds anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

impl CacheStore for NoCache {
    fn lookup(&self, _request: &RequestDescriptor) -> Option<Response> {
        None
    }

    fn store(&self, _request: &RequestDescriptor, _response: &Response) {}

    fn store_pending_request(&self, _request: &RequestDescriptor) {}
}

#[derive(Debug, Clone)]
struct CachedResponse {
    response: Response,
    stored_at: DateTime<Utc>,
}

/// In-memory [`CacheStore`] keyed by [`CacheKey`].
///
/// Requests without a cache capability are never looked up or stored.
/// Pending requests are kept per key (a newer failure replaces an older
/// one) until drained with [`take_pending_requests`](Self::take_pending_requests).
#[derive(Debug, Default)]
pub struct MemoryCache {
    responses: DashMap<CacheKey, CachedResponse>,
    pending: DashMap<CacheKey, RequestDescriptor>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long ago the response for `key` was stored.
    pub fn age(&self, key: &CacheKey) -> Option<chrono::Duration> {
        self.responses.get(key).map(|r| Utc::now() - r.stored_at)
    }

    /// Remove the cached response for `key`.
    pub fn invalidate(&self, key: &CacheKey) -> Option<Response> {
        self.responses.remove(key).map(|(_, r)| r.response)
    }

    /// Drain every parked request, in no particular order.
    pub fn take_pending_requests(&self) -> Vec<RequestDescriptor> {
        let keys: Vec<CacheKey> = self.pending.iter().map(|r| r.key().clone()).collect();
        keys.iter()
            .filter_map(|k| self.pending.remove(k).map(|(_, req)| req))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl CacheStore for MemoryCache {
    fn lookup(&self, request: &RequestDescriptor) -> Option<Response> {
        let key = request.cache_key()?;
        self.responses.get(key).map(|r| r.response.clone())
    }

    fn store(&self, request: &RequestDescriptor, response: &Response) {
        let Some(key) = request.cache_key() else {
            return;
        };
        debug!(%key, bytes = response.body.len(), "caching response");
        self.responses.insert(
            key.clone(),
            CachedResponse {
                response: response.clone(),
                stored_at: Utc::now(),
            },
        );
    }

    fn store_pending_request(&self, request: &RequestDescriptor) {
        let Some(key) = request.cache_key() else {
            return;
        };
        debug!(%key, "parking failed request for retry");
        self.pending.insert(key.clone(), request.clone());
    }
}
