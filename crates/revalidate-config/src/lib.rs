//! Configuration loading for revalidate clients.
//!
//! TOML profiles merged with `REVALIDATE_` environment overrides, token
//! resolution (env var or plaintext), and translation to
//! `revalidate_core::ClientConfig`. Nothing here talks to the network.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use revalidate_api::CachePolicy;
use revalidate_core::{ClientConfig, ERROR_CHANNEL_CAPACITY, TlsVerification};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Prefix for environment overrides. Nested keys are separated by `__`,
/// e.g. `REVALIDATE_PROFILES__STAGING__TIMEOUT=5`.
pub const ENV_PREFIX: &str = "REVALIDATE_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no profile named '{name}'")]
    UnknownProfile { name: String },

    #[error("profile '{profile}' reads its token from ${var}, which is not set")]
    MissingToken { profile: String, var: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    /// Values profiles fall back to.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named API endpoints.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub insecure: bool,

    pub user_agent: Option<String>,

    #[serde(default)]
    pub cache_policy: CachePolicy,

    #[serde(default = "default_error_channel_capacity")]
    pub error_channel_capacity: usize,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            insecure: false,
            user_agent: None,
            cache_policy: CachePolicy::None,
            error_channel_capacity: default_error_channel_capacity(),
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_error_channel_capacity() -> usize {
    ERROR_CHANNEL_CAPACITY
}

/// A named API endpoint.
#[derive(Debug, Deserialize, Serialize)]
pub struct Profile {
    /// Base URL request paths are resolved against.
    pub base_url: String,

    /// Bearer token (plaintext; prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable holding the bearer token.
    pub token_env: Option<String>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override the default insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override the default timeout.
    pub timeout: Option<u64>,

    /// Override the default `User-Agent`.
    pub user_agent: Option<String>,

    /// Override the default cache policy for GET descriptors.
    pub cache_policy: Option<CachePolicy>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("dev", "revalidate", "revalidate").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("revalidate");
    p
}

// ── Loading and saving ──────────────────────────────────────────────

impl Config {
    /// Load from `path` (or the platform config path) merged with
    /// environment overrides. A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map_or_else(config_path, Path::to_path_buf);

        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        Ok(figment.extract()?)
    }

    /// Serialize to TOML and write to `path` (or the platform config path).
    pub fn save(&self, path: Option<&Path>) -> Result<(), ConfigError> {
        let path = path.map_or_else(config_path, Path::to_path_buf);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(&path, toml_str)?;
        Ok(())
    }

    /// Look up a profile by name, falling back to `default_profile`.
    pub fn profile<'a>(&'a self, name: Option<&'a str>) -> Result<(&'a str, &'a Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get(name)
            .map(|profile| (name, profile))
            .ok_or_else(|| ConfigError::UnknownProfile { name: name.into() })
    }

    /// Resolve a profile and translate it to a `ClientConfig`.
    pub fn client_config(&self, name: Option<&str>) -> Result<ClientConfig, ConfigError> {
        let (name, profile) = self.profile(name)?;
        profile_to_client_config(profile, name, &self.defaults)
    }
}

// ── Translation ─────────────────────────────────────────────────────

/// Resolve the bearer token: `token_env` first, then plaintext `token`.
pub fn resolve_token(profile: &Profile, profile_name: &str) -> Result<Option<SecretString>, ConfigError> {
    if let Some(ref var) = profile.token_env {
        return std::env::var(var)
            .map(|val| Some(SecretString::from(val)))
            .map_err(|_| ConfigError::MissingToken {
                profile: profile_name.into(),
                var: var.clone(),
            });
    }
    Ok(profile.token.clone().map(SecretString::from))
}

/// Build a `ClientConfig` from a profile and the global defaults.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let base_url: Url = profile.base_url.parse().map_err(|_| ConfigError::Validation {
        field: "base_url".into(),
        reason: format!("invalid URL: {}", profile.base_url),
    })?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(ConfigError::Validation {
            field: "base_url".into(),
            reason: format!("unsupported scheme '{}'", base_url.scheme()),
        });
    }

    let timeout = profile.timeout.unwrap_or(defaults.timeout);
    if timeout == 0 {
        return Err(ConfigError::Validation {
            field: "timeout".into(),
            reason: "must be at least one second".into(),
        });
    }

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let mut config = ClientConfig::new(base_url);
    config.tls = tls;
    config.timeout = Duration::from_secs(timeout);
    config.token = resolve_token(profile, profile_name)?;
    config.default_cache_policy = profile.cache_policy.unwrap_or(defaults.cache_policy);
    config.error_channel_capacity = defaults.error_channel_capacity;
    if let Some(agent) = profile.user_agent.as_ref().or(defaults.user_agent.as_ref()) {
        config.user_agent.clone_from(agent);
    }
    Ok(config)
}
