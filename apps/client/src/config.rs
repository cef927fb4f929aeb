use std::path::PathBuf;

use anyhow::{bail, Context, Result};

const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;

/// Client configuration loaded from environment variables.
/// Every value has a default; only malformed numbers fail.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub retries: u32,
    /// Where the auth token is persisted. `None` keeps it in memory only.
    pub auth_store_path: Option<PathBuf>,
    /// Upload limit enforced by callers such as `cvctl`, never by `FetchClient`.
    pub max_upload_bytes: u64,
    pub rust_log: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: 0,
            auth_store_path: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            rust_log: "info".to_string(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let timeout_ms = parse_or("CV_API_TIMEOUT_MS", &lookup, defaults.timeout_ms)?;
        if timeout_ms == 0 {
            bail!("CV_API_TIMEOUT_MS must be greater than zero");
        }

        Ok(ClientConfig {
            base_url: lookup("CV_API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            timeout_ms,
            retries: parse_or("CV_API_RETRIES", &lookup, defaults.retries)?,
            auth_store_path: lookup("CV_AUTH_STORE_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            max_upload_bytes: parse_or("CV_MAX_UPLOAD_BYTES", &lookup, defaults.max_upload_bytes)?,
            rust_log: lookup("RUST_LOG").unwrap_or(defaults.rust_log),
        })
    }
}

fn parse_or<T, F>(key: &str, lookup: &F, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'")),
        None => Ok(default),
    }
}
