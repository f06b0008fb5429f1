// HTTP client over reqwest
//
// `Transport` is the seam the merge policy talks to; `HttpClient` is the
// reqwest-backed implementation. URL resolution and body streaming live
// here, while TLS and header setup stay in `transport`.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::request::RequestDescriptor;
use crate::response::{Progress, ProgressResponse, Response};
use crate::transport::TransportConfig;

/// Receives incremental download progress while a call is in flight.
pub type ProgressSink = mpsc::UnboundedSender<Progress>;

/// A cancellable request executor.
///
/// Implementations must complete with exactly one `Response` or one error,
/// report progress to the sink when one is given, and stop promptly with
/// [`Error::Cancelled`] once `cancel` fires.
pub trait Transport: Send + Sync + 'static {
    fn call(
        &self,
        request: &RequestDescriptor,
        progress: Option<ProgressSink>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Response, Error>> + Send;
}

impl<T: Transport> Transport for Arc<T> {
    fn call(
        &self,
        request: &RequestDescriptor,
        progress: Option<ProgressSink>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Response, Error>> + Send {
        (**self).call(request, progress, cancel)
    }
}

/// reqwest-backed [`Transport`].
///
/// Request paths are resolved against `base_url`; the body is read in
/// chunks so progress can be reported as it arrives.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The base URL request paths are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build the full URL for a request: `{base}/{path}?{query}`.
    pub(crate) fn url_for(&self, request: &RequestDescriptor) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = request.path().trim_start_matches('/');
        let mut url = Url::parse(&format!("{base}/{path}"))?;
        if !request.query_pairs().is_empty() {
            url.query_pairs_mut().extend_pairs(request.query_pairs());
        }
        Ok(url)
    }

    async fn execute(
        &self,
        request: &RequestDescriptor,
        progress: Option<ProgressSink>,
    ) -> Result<Response, Error> {
        let url = self.url_for(request)?;
        debug!(method = %request.method(), %url, "sending request");

        let mut builder = self.http.request(request.method().clone(), url);
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }

        let mut resp = builder.send().await?;
        let status = resp.status();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
            .collect();
        let total = resp.content_length();

        let mut body = BytesMut::new();
        while let Some(chunk) = resp.chunk().await? {
            body.extend_from_slice(&chunk);
            if let Some(ref sink) = progress {
                // The receiver may be gone; progress is best-effort.
                let _ = sink.send(Progress {
                    completed: u64::try_from(body.len()).unwrap_or(u64::MAX),
                    total,
                });
            }
        }

        if !status.is_success() {
            return Err(Error::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).chars().take(200).collect(),
            });
        }

        debug!(status = status.as_u16(), bytes = body.len(), "request finished");
        Ok(Response {
            status: status.as_u16(),
            headers,
            body: body.freeze(),
        })
    }
}

impl Transport for HttpClient {
    async fn call(
        &self,
        request: &RequestDescriptor,
        progress: Option<ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<Response, Error> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(path = request.path(), "request cancelled");
                Err(Error::Cancelled)
            }
            result = self.execute(request, progress) => result,
        }
    }
}

enum ProgressStep {
    Progress(Progress),
    Done(Result<Response, Error>),
}

/// Run a request and stream its accumulated progress.
///
/// Every emission carries the latest known progress; the final one also
/// carries the response. Errors end the stream.
pub fn request_with_progress<T: Transport>(
    transport: T,
    request: RequestDescriptor,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<ProgressResponse, Error>> + Send {
    async_stream::stream! {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut call = pin!(transport.call(&request, Some(tx), cancel));
        let mut last = ProgressResponse::default();

        loop {
            let step = tokio::select! {
                biased;
                Some(progress) = rx.recv() => ProgressStep::Progress(progress),
                result = &mut call => ProgressStep::Done(result),
            };

            match step {
                ProgressStep::Progress(progress) => {
                    last = last.merge(ProgressResponse { progress: Some(progress), response: None });
                    yield Ok(last.clone());
                }
                ProgressStep::Done(Ok(response)) => {
                    // The call may report its last chunk in the same poll it
                    // completes in.
                    while let Ok(progress) = rx.try_recv() {
                        last = last.merge(ProgressResponse { progress: Some(progress), response: None });
                    }
                    last = last.merge(ProgressResponse { progress: None, response: Some(response) });
                    yield Ok(last);
                    break;
                }
                ProgressStep::Done(Err(e)) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}
