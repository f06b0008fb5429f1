#![allow(clippy::unwrap_used)]
// End-to-end tests for `Fetcher` over a real `HttpClient`, using wiremock.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use secrecy::SecretString;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use revalidate_api::{CachePolicy, HttpClient, RequestDescriptor};
use revalidate_core::{
    CacheStore, ClientConfig, Connectivity, ConnectivityFlag, FetchError, Fetcher, MemoryCache,
    Page,
};

// ── Helpers ─────────────────────────────────────────────────────────

struct Setup {
    server: MockServer,
    fetcher: Fetcher<HttpClient>,
    cache: Arc<MemoryCache>,
    online: Arc<ConnectivityFlag>,
}

async fn setup() -> Setup {
    let server = MockServer::start().await;
    let mut config = ClientConfig::new(Url::parse(&server.uri()).unwrap());
    config.timeout = Duration::from_secs(5);

    let cache = Arc::new(MemoryCache::new());
    let online = Arc::new(ConnectivityFlag::default());
    let fetcher = Fetcher::from_config(
        &config,
        Arc::clone(&cache) as Arc<dyn CacheStore>,
        Arc::clone(&online) as Arc<dyn Connectivity>,
    )
    .unwrap();

    Setup {
        server,
        fetcher,
        cache,
        online,
    }
}

// ── Merge policy ────────────────────────────────────────────────────

#[tokio::test]
async fn test_revalidates_cached_response() {
    let s = setup().await;

    Mock::given(method("GET"))
        .and(path("/profile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "fresh" })))
        .expect(2)
        .mount(&s.server)
        .await;

    let req = RequestDescriptor::get("/profile").cached(CachePolicy::CacheOnSuccess);

    // Cold cache: network only.
    let first: Vec<_> = s.fetcher.request(req.clone()).collect().await;
    assert_eq!(first.len(), 1);

    // Warm cache: the stored copy, then the revalidated one.
    let second: Vec<_> = s.fetcher.request(req).collect().await;
    assert_eq!(second.len(), 2);
    for response in &second {
        let body: serde_json::Value = response.as_ref().unwrap().json().unwrap();
        assert_eq!(body["name"], "fresh");
    }
}

#[tokio::test]
async fn test_server_error_parks_request() {
    let s = setup().await;

    Mock::given(method("POST"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&s.server)
        .await;

    let req = RequestDescriptor::post("/events")
        .json(json!({ "kind": "open" }))
        .cached(CachePolicy::CacheOnFailure);
    let out: Vec<_> = s.fetcher.request(req).collect().await;

    match &out[..] {
        [Err(FetchError::Transport { status, message })] => {
            assert_eq!(*status, Some(503));
            assert!(message.contains("maintenance"));
        }
        other => panic!("expected one transport error, got {other:?}"),
    }
    assert_eq!(s.cache.take_pending_requests().len(), 1);
}

#[tokio::test]
async fn test_offline_makes_no_request() {
    let s = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&s.server)
        .await;

    s.online.set_available(false);
    let out: Vec<_> = s.fetcher.request(RequestDescriptor::get("/anything")).collect().await;
    assert!(matches!(&out[..], [Err(FetchError::NoNetwork)]));
}

#[tokio::test]
async fn test_bearer_token_is_sent() {
    let server = MockServer::start().await;
    let mut config = ClientConfig::new(Url::parse(&server.uri()).unwrap());
    config.token = Some(SecretString::from("s3cret".to_string()));

    Mock::given(method("GET"))
        .and(path("/me"))
        .and(header("authorization", "Bearer s3cret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let fetcher = Fetcher::from_config(
        &config,
        Arc::new(MemoryCache::new()),
        Arc::new(ConnectivityFlag::default()),
    )
    .unwrap();
    let out: Vec<_> = fetcher.request(RequestDescriptor::get("/me")).collect().await;
    assert_eq!(out[0].as_ref().unwrap().text(), "ok");
}

// ── Pagination ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_paginates_until_empty_page() {
    let s = setup().await;

    for (page, items) in [(1, json!(["a", "b"])), (2, json!(["c", "d"])), (3, json!([]))] {
        Mock::given(method("GET"))
            .and(path("/articles"))
            .and(query_param("page", page.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items, "total": 5 })))
            .expect(1)
            .mount(&s.server)
            .await;
    }

    let (first_tx, first_rx) = mpsc::unbounded_channel();
    let (next_tx, next_rx) = mpsc::unbounded_channel();
    let paged = s.fetcher.paginate::<_, Page<String>, _, _, _>(
        UnboundedReceiverStream::new(first_rx),
        UnboundedReceiverStream::new(next_rx),
        |(): (), page| RequestDescriptor::get("/articles").query("page", page),
    );
    let mut values = Box::pin(paged.values);

    first_tx.send(()).unwrap();
    assert_eq!(*values.next().await.unwrap(), vec!["a", "b"]);
    assert_eq!(*paged.total.borrow(), 5);

    next_tx.send(()).unwrap();
    assert_eq!(*values.next().await.unwrap(), vec!["a", "b", "c", "d"]);

    // Page 3 is empty and ends the session; with no more fetch-first
    // triggers the stream ends too.
    next_tx.send(()).unwrap();
    drop(next_tx);
    drop(first_tx);
    assert!(values.next().await.is_none());
}
