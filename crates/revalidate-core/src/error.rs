// ── Core error types ──
//
// Classified errors delivered on the error channels of tracked requests
// and paginated sessions. The `From<revalidate_api::Error>` impl
// translates transport-layer errors into this taxonomy.

use std::sync::Arc;

use thiserror::Error;

/// Classified error for fetches driven by this crate.
///
/// Cheap to clone so one error can fan out to every error-channel
/// subscriber.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The connectivity check failed; no call was attempted.
    #[error("No network available")]
    NoNetwork,

    /// The underlying transport failed. Carries its description and the
    /// HTTP status when there was one.
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    /// The request was cancelled before it completed.
    #[error("Request cancelled")]
    Cancelled,

    /// A collaborator error passed through without classification.
    #[error("{0}")]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl FetchError {
    /// Wrap an arbitrary collaborator error.
    pub fn other(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Other(Arc::new(err))
    }

    pub fn is_no_network(&self) -> bool {
        matches!(self, Self::NoNetwork)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<revalidate_api::Error> for FetchError {
    fn from(err: revalidate_api::Error) -> Self {
        match err {
            revalidate_api::Error::Cancelled => Self::Cancelled,
            revalidate_api::Error::Deserialization { .. } => Self::other(err),
            other => Self::Transport {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}
