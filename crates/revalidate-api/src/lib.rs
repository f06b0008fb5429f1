// revalidate-api: HTTP transport collaborator for the revalidate merge and paging layer

pub mod client;
pub mod error;
pub mod request;
pub mod response;
pub mod transport;

pub use client::{HttpClient, ProgressSink, Transport, request_with_progress};
pub use error::Error;
pub use request::{CacheKey, CachePolicy, CacheSpec, RequestDescriptor};
pub use response::{Progress, ProgressResponse, Response};
pub use transport::{TlsMode, TransportConfig};

// Re-exported so callers can build descriptors without depending on reqwest.
pub use reqwest::Method;
