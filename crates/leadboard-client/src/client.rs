use std::sync::Arc;

use crate::api::{ChatApi, LeadsApi, TelegramApi, UsersApi};
use crate::config::ClientConfig;
use crate::error::Result;
use crate::http::HttpClient;
use crate::query::QueryCache;
use crate::session::{SessionContext, SessionController};
use crate::token_store::{AuthStateStore, FileAuthStore};

/// Everything a dashboard needs, wired from one [`ClientConfig`].
///
/// Cloning is cheap; clones share the session and the cache.
#[derive(Clone)]
pub struct Leadboard {
    config: Arc<ClientConfig>,
    http: HttpClient,
    cache: QueryCache,
    session: SessionController,
}

impl std::fmt::Debug for Leadboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leadboard")
            .field("base_url", &self.http.base_url())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Leadboard {
    /// Persist the session to `config.session_file`, or the platform data dir.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let path = match &config.session_file {
            Some(path) => path.clone(),
            None => FileAuthStore::default_path()?,
        };
        Self::with_store(config, Arc::new(FileAuthStore::new(path)))
    }

    pub fn with_store(config: ClientConfig, store: Arc<dyn AuthStateStore>) -> Result<Self> {
        config.validate()?;
        let context = SessionContext::open(store)?;
        let http = HttpClient::new(&config, context)?;
        let cache = QueryCache::from_config(&config);
        let session = SessionController::new(http.clone(), cache.clone(), config.logout_timeout);
        tracing::debug!(base_url = %http.base_url(), "leadboard client ready");
        Ok(Self {
            config: Arc::new(config),
            http,
            cache,
            session,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn session(&self) -> &SessionController {
        &self.session
    }

    pub fn leads(&self) -> LeadsApi {
        LeadsApi::new(self.http.clone(), self.cache.clone())
    }

    pub fn users(&self) -> UsersApi {
        UsersApi::new(self.http.clone(), self.cache.clone())
    }

    pub fn chat(&self) -> ChatApi {
        ChatApi::new(self.http.clone(), self.cache.clone())
    }

    pub fn telegram(&self) -> TelegramApi {
        TelegramApi::new(self.http.clone(), self.cache.clone())
    }
}
