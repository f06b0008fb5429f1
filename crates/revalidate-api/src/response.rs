// ── Responses and progress ──

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// A completed HTTP response.
///
/// Carries no provenance: a response read back from a cache store is
/// indistinguishable from one that just came off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header value matching `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text (lossy).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        serde_json::from_slice(&self.body).map_err(|e| {
            let body = self.text();
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body,
            }
        })
    }
}

/// Download progress of an in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Body bytes received so far.
    pub completed: u64,
    /// Expected body size, when the server sent `Content-Length`.
    pub total: Option<u64>,
}

impl Progress {
    /// Completed fraction in `0.0..=1.0`, `None` when the total is unknown.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.completed as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Running view of a request with progress: the latest progress seen and,
/// once finished, the response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressResponse {
    pub progress: Option<Progress>,
    pub response: Option<Response>,
}

impl ProgressResponse {
    pub fn is_completed(&self) -> bool {
        self.response.is_some()
    }

    /// Fold a newer partial update into this one, keeping older values for
    /// fields the update leaves empty.
    pub fn merge(self, update: Self) -> Self {
        Self {
            progress: update.progress.or(self.progress),
            response: update.response.or(self.response),
        }
    }
}
