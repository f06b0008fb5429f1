// ── Runtime client configuration ──
//
// These types describe *how* to reach an API and how the fetch layer
// behaves. They carry credentials and tuning, but never touch disk.
// Callers construct a `ClientConfig` (directly or via revalidate-config)
// and hand it in.

use std::time::Duration;

use revalidate_api::{CachePolicy, HttpClient, RequestDescriptor, TlsMode, TransportConfig};
use secrecy::SecretString;
use url::Url;

use crate::error::FetchError;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict). Default.
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed development servers).
    DangerAcceptInvalid,
}

/// Configuration for one API endpoint and the fetch layer on top of it.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL request paths are resolved against.
    pub base_url: Url,
    /// TLS verification strategy.
    pub tls: TlsVerification,
    /// Per-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header.
    pub user_agent: String,
    /// Bearer token sent on every request.
    pub token: Option<SecretString>,
    /// Policy attached by [`ClientConfig::get`].
    pub default_cache_policy: CachePolicy,
    /// Buffered errors per error-channel subscriber before it lags.
    pub error_channel_capacity: usize,
}

impl ClientConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("revalidate/", env!("CARGO_PKG_VERSION")).into(),
            token: None,
            default_cache_policy: CachePolicy::None,
            error_channel_capacity: crate::track::ERROR_CHANNEL_CAPACITY,
        }
    }

    /// Translate into the api-level transport settings.
    pub fn transport(&self) -> TransportConfig {
        let tls = match &self.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            bearer_token: self.token.clone(),
        }
    }

    /// A GET descriptor carrying the configured default cache policy.
    pub fn get(&self, path: impl Into<String>) -> RequestDescriptor {
        let request = RequestDescriptor::get(path);
        match self.default_cache_policy {
            CachePolicy::None => request,
            policy => request.cached(policy),
        }
    }

    /// Build the reqwest-backed transport for this endpoint.
    pub fn build_http_client(&self) -> Result<HttpClient, FetchError> {
        Ok(HttpClient::new(self.base_url.clone(), &self.transport())?)
    }
}
