use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::http::HttpClient;
use crate::query::{EntityKind, Poller, QueryCache, QueryKey, TELEGRAM_STATUS_POLL};
use crate::types::{TelegramSendRequest, TelegramSendResponse, TelegramStatus};

#[derive(Debug, Clone)]
pub struct TelegramApi {
    http: HttpClient,
    cache: QueryCache,
}

impl TelegramApi {
    pub fn new(http: HttpClient, cache: QueryCache) -> Self {
        Self { http, cache }
    }

    pub fn status_key() -> QueryKey {
        QueryKey::new(EntityKind::TelegramStatus, "status")
    }

    pub async fn status(&self) -> Result<Arc<TelegramStatus>> {
        let http = self.http.clone();
        self.cache
            .fetch(Self::status_key(), move || async move {
                http.get_json::<TelegramStatus>("telegram/status", &[]).await
            })
            .await
    }

    /// Send through the bot. The message lands in a chat session, so chat
    /// queries go stale too.
    pub async fn send(&self, request: &TelegramSendRequest) -> Result<TelegramSendResponse> {
        let response: TelegramSendResponse = self
            .cache
            .mutate(
                &[EntityKind::ChatMessages, EntityKind::ChatSessions],
                self.http.post_json("telegram/send", request),
            )
            .await?;
        tracing::debug!(
            chat_id = %request.chat_id,
            success = response.success,
            message_id = response.message_id,
            "telegram message sent"
        );
        Ok(response)
    }

    pub fn poll_status(&self) -> Poller {
        self.poll_status_every(TELEGRAM_STATUS_POLL)
    }

    pub fn poll_status_every(&self, every: Duration) -> Poller {
        let http = self.http.clone();
        Poller::spawn(self.cache.clone(), Self::status_key(), every, move || {
            let http = http.clone();
            async move { http.get_json::<TelegramStatus>("telegram/status", &[]).await }
        })
    }
}
