//! Stale-while-revalidate fetching, request tracking and paginated
//! accumulation over async streams.
//!
//! This crate sits between `revalidate-api` (the HTTP transport) and UI or
//! service code that wants responses as streams:
//!
//! - **[`Fetcher`]**: merges a cache lookup and a network call into one
//!   stream. The cached response (if any) arrives first, the network
//!   response last. Cache writes and parking of failed requests follow the
//!   request's [`CachePolicy`](revalidate_api::CachePolicy).
//!
//! - **[`track_requests`]**: latest-wins request pipeline driven by a
//!   trigger stream, with [`LoadingFlag`] and [`ErrorStream`] side
//!   channels. Errors end only the request that produced them.
//!
//! - **[`paginate`] / [`paginate_with`]**: accumulates pages into growing
//!   snapshots, gated by the last reported total. Item transforms can be
//!   moved onto a runtime's blocking pool with [`Offload`].
//!
//! - **Collaborators**: [`CacheStore`] (with the in-memory [`MemoryCache`])
//!   and [`Connectivity`] (with the settable [`ConnectivityFlag`]).
//!
//! Everything is driven by whoever polls the output streams; dropping a
//! stream cancels the work behind it.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod fetcher;
pub mod page;
pub mod request;
pub mod stream;
pub mod track;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cache::{CacheStore, MemoryCache, NoCache};
pub use config::{ClientConfig, TlsVerification};
pub use connectivity::{Connectivity, ConnectivityFlag};
pub use error::FetchError;
pub use fetcher::Fetcher;
pub use page::{Identity, ItemTransform, Offload, Page, PageList, Paged, paginate, paginate_with};
pub use request::{Tracked, track_requests, track_requests_on, track_requests_with_capacity};
pub use stream::{ErrorStream, LoadingFlag};
pub use track::{ActivityTracker, ERROR_CHANNEL_CAPACITY, ErrorTracker};
