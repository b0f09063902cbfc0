//! Client configuration.
//!
//! Values come from the builder, from `LEADBOARD_*` environment variables at
//! runtime, or from the same variables baked in at build time.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::{ClientError, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";
pub const BASE_URL_ENV: &str = "LEADBOARD_API_URL";
pub const GOOGLE_CLIENT_ID_ENV: &str = "LEADBOARD_GOOGLE_CLIENT_ID";
pub const SESSION_FILE_ENV: &str = "LEADBOARD_SESSION_FILE";

const REQUEST_TIMEOUT_SECS: u64 = 30;
const CONNECT_TIMEOUT_SECS: u64 = 8;
const IMPORT_TIMEOUT_SECS: u64 = 300;
const LOGOUT_TIMEOUT_SECS: u64 = 5;
const STALE_TIME_SECS: u64 = 30;
const GC_TIME_SECS: u64 = 300;
const MAX_CACHE_ENTRIES: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    /// OAuth client identifier the login view hands to the identity provider.
    pub google_client_id: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Bulk lead import can take minutes on large files.
    pub import_timeout: Duration,
    /// Upper bound on the best-effort backend logout call.
    pub logout_timeout: Duration,
    /// How long cached reads are served without refetching.
    pub stale_time: Duration,
    /// Inactivity window after which unobserved cache entries are evicted.
    pub gc_time: Duration,
    pub max_cache_entries: usize,
    /// Where the session is persisted. `None` uses the platform data dir.
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            google_client_id: None,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            import_timeout: Duration::from_secs(IMPORT_TIMEOUT_SECS),
            logout_timeout: Duration::from_secs(LOGOUT_TIMEOUT_SECS),
            stale_time: Duration::from_secs(STALE_TIME_SECS),
            gc_time: Duration::from_secs(GC_TIME_SECS),
            max_cache_entries: MAX_CACHE_ENTRIES,
            session_file: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads runtime environment first, then build-time values, then defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(url) = env_or_baked(BASE_URL_ENV, option_env!("LEADBOARD_API_URL")) {
            config.base_url = url;
        }
        config.google_client_id = env_or_baked(
            GOOGLE_CLIENT_ID_ENV,
            option_env!("LEADBOARD_GOOGLE_CLIENT_ID"),
        );
        config.session_file = std::env::var(SESSION_FILE_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        config
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn google_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.google_client_id = Some(client_id.into());
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn import_timeout(mut self, timeout: Duration) -> Self {
        self.import_timeout = timeout;
        self
    }

    pub fn logout_timeout(mut self, timeout: Duration) -> Self {
        self.logout_timeout = timeout;
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }

    pub fn gc_time(mut self, gc_time: Duration) -> Self {
        self.gc_time = gc_time;
        self
    }

    pub fn max_cache_entries(mut self, max: usize) -> Self {
        self.max_cache_entries = max;
        self
    }

    pub fn session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        let trimmed = self.base_url.trim();
        if trimmed.is_empty() {
            return Err(ClientError::Config("base url must not be empty".to_string()));
        }
        let url = Url::parse(trimmed)
            .map_err(|e| ClientError::Config(format!("invalid base url {trimmed:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Config(format!(
                "base url must be http or https, got {}",
                url.scheme()
            )));
        }
        for (name, value) in [
            ("request_timeout", self.request_timeout),
            ("connect_timeout", self.connect_timeout),
            ("import_timeout", self.import_timeout),
            ("logout_timeout", self.logout_timeout),
        ] {
            if value.is_zero() {
                return Err(ClientError::Config(format!("{name} must be non-zero")));
            }
        }
        if self.max_cache_entries == 0 {
            return Err(ClientError::Config(
                "max_cache_entries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn normalized_base_url(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }
}

fn env_or_baked(name: &str, baked: Option<&'static str>) -> Option<String> {
    std::env::var(name)
        .ok()
        .or_else(|| baked.map(str::to_string))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
