// ── Request descriptors ──
//
// An immutable description of one HTTP exchange plus the cache capability
// that travels with it. Cache behavior is resolved from `CacheSpec`, never
// by inspecting the descriptor's type at runtime.

use std::fmt;

use reqwest::Method;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// What the merge policy does with the cache around a network call.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CachePolicy {
    /// Never write to the cache (lookups still happen when a key exists).
    #[default]
    None,
    /// Store the response after a successful network call.
    CacheOnSuccess,
    /// Store the request itself after a failed network call, for a later retry.
    CacheOnFailure,
}

/// Key under which a response (or pending request) is cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Cache capability carried alongside a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSpec {
    pub policy: CachePolicy,
    pub key: CacheKey,
}

/// An immutable description of a request: endpoint, parameters and
/// optional cache capability.
///
/// Built with consuming builder methods:
///
/// ```rust,ignore
/// let req = RequestDescriptor::get("/v1/articles")
///     .query("page", "1")
///     .cached(CachePolicy::CacheOnSuccess);
/// ```
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<serde_json::Value>,
    cache: Option<CacheSpec>,
}

impl RequestDescriptor {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            cache: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    // ── Builders ─────────────────────────────────────────────────────

    /// Append a query parameter.
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Append a request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body.
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Enable caching under the default key derived from method, path and query.
    pub fn cached(self, policy: CachePolicy) -> Self {
        let key = self.default_cache_key();
        self.cached_as(policy, key)
    }

    /// Enable caching under an explicit key.
    pub fn cached_as(mut self, policy: CachePolicy, key: impl Into<CacheKey>) -> Self {
        self.cache = Some(CacheSpec {
            policy,
            key: key.into(),
        });
        self
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> Option<&serde_json::Value> {
        self.body.as_ref()
    }

    pub fn cache(&self) -> Option<&CacheSpec> {
        self.cache.as_ref()
    }

    /// The cache policy, `CachePolicy::None` when no capability is attached.
    pub fn cache_policy(&self) -> CachePolicy {
        self.cache.as_ref().map_or(CachePolicy::None, |c| c.policy)
    }

    pub fn cache_key(&self) -> Option<&CacheKey> {
        self.cache.as_ref().map(|c| &c.key)
    }

    /// `"{METHOD} {path}?{sorted query}"`, stable across query insertion order.
    pub fn default_cache_key(&self) -> CacheKey {
        if self.query.is_empty() {
            return CacheKey(format!("{} {}", self.method, self.path));
        }
        let mut pairs: Vec<_> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        pairs.sort();
        CacheKey(format!("{} {}?{}", self.method, self.path, pairs.join("&")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn default_key_ignores_query_order() {
        let a = RequestDescriptor::get("/items").query("b", 2).query("a", 1);
        let b = RequestDescriptor::get("/items").query("a", 1).query("b", 2);
        assert_eq!(a.default_cache_key(), b.default_cache_key());
        assert_eq!(a.default_cache_key().as_str(), "GET /items?a=1&b=2");
    }

    #[test]
    fn uncached_request_has_no_policy() {
        let req = RequestDescriptor::get("/items");
        assert_eq!(req.cache_policy(), CachePolicy::None);
        assert!(req.cache_key().is_none());
    }

    #[test]
    fn cached_request_carries_cache_capability() {
        let req = RequestDescriptor::get("/items").cached_as(CachePolicy::CacheOnFailure, "items");
        assert_eq!(req.cache_policy(), CachePolicy::CacheOnFailure);
        assert_eq!(req.cache_key().unwrap().as_str(), "items");
    }

    #[test]
    fn policy_parses_from_kebab_case() {
        assert_eq!(
            CachePolicy::from_str("cache-on-success").unwrap(),
            CachePolicy::CacheOnSuccess
        );
        assert_eq!(CachePolicy::CacheOnFailure.to_string(), "cache-on-failure");
    }
}
