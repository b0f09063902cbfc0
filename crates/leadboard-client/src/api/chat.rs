use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::http::HttpClient;
use crate::query::{
    CHAT_MESSAGES_POLL, CHAT_SESSIONS_POLL, EntityKind, Fetched, Poller, QueryCache, QueryKey,
};
use crate::types::{
    ActionResponse, ChatMessage, ChatSession, ChatSessionFilters, Page, SendChatMessageRequest,
    UpdateChatSessionRequest,
};

use super::paging;

/// Chat sessions relayed from the Telegram bot and their messages.
#[derive(Debug, Clone)]
pub struct ChatApi {
    http: HttpClient,
    cache: QueryCache,
}

impl ChatApi {
    pub fn new(http: HttpClient, cache: QueryCache) -> Self {
        Self { http, cache }
    }

    pub fn sessions_key(filters: &ChatSessionFilters, page: u32, page_size: u32) -> QueryKey {
        QueryKey::new(EntityKind::ChatSessions, "list")
            .params(filters.to_query())
            .params(paging(page, page_size))
    }

    pub fn messages_key(session_id: i64, page: u32, page_size: u32) -> QueryKey {
        QueryKey::new(EntityKind::ChatMessages, "list")
            .param("session_id", session_id)
            .params(paging(page, page_size))
    }

    pub async fn sessions(
        &self,
        filters: &ChatSessionFilters,
        page: u32,
        page_size: u32,
    ) -> Result<Arc<Page<ChatSession>>> {
        let key = Self::sessions_key(filters, page, page_size);
        let fetch = sessions_fetcher(self.http.clone(), filters, page, page_size);
        self.cache.fetch(key, fetch).await
    }

    pub async fn session(&self, id: Option<i64>) -> Result<Fetched<ChatSession>> {
        let Some(id) = id else {
            return Ok(Fetched::Disabled);
        };
        let http = self.http.clone();
        let result = self
            .cache
            .fetch(
                QueryKey::new(EntityKind::ChatSessions, "detail").param("id", id),
                move || async move {
                    http.get_json::<ChatSession>(&format!("chat-sessions/{id}"), &[])
                        .await
                },
            )
            .await;
        Fetched::from_result(result)
    }

    pub async fn update_session(
        &self,
        id: i64,
        request: &UpdateChatSessionRequest,
    ) -> Result<ChatSession> {
        let path = format!("chat-sessions/{id}");
        self.cache
            .mutate(
                &[EntityKind::ChatSessions],
                self.http.patch_json(&path, request),
            )
            .await
    }

    pub async fn delete_session(&self, id: i64) -> Result<ActionResponse> {
        let path = format!("chat-sessions/{id}");
        self.cache
            .mutate(
                &[EntityKind::ChatSessions, EntityKind::ChatMessages],
                self.http.delete_action(&path),
            )
            .await
    }

    pub async fn messages(
        &self,
        session_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<Arc<Page<ChatMessage>>> {
        let key = Self::messages_key(session_id, page, page_size);
        let fetch = messages_fetcher(self.http.clone(), session_id, page, page_size);
        self.cache.fetch(key, fetch).await
    }

    /// Sending changes the session's message count, so both kinds go stale.
    pub async fn send_message(&self, request: &SendChatMessageRequest) -> Result<ChatMessage> {
        self.cache
            .mutate(
                &[EntityKind::ChatMessages, EntityKind::ChatSessions],
                self.http.post_json("chat-messages", request),
            )
            .await
    }

    /// Keep a session list fresh while it is on screen.
    pub fn poll_sessions(
        &self,
        filters: &ChatSessionFilters,
        page: u32,
        page_size: u32,
    ) -> Poller {
        self.poll_sessions_every(filters, page, page_size, CHAT_SESSIONS_POLL)
    }

    pub fn poll_sessions_every(
        &self,
        filters: &ChatSessionFilters,
        page: u32,
        page_size: u32,
        every: Duration,
    ) -> Poller {
        let http = self.http.clone();
        let filters = filters.clone();
        Poller::spawn(
            self.cache.clone(),
            Self::sessions_key(&filters, page, page_size),
            every,
            move || sessions_fetcher(http.clone(), &filters, page, page_size)(),
        )
    }

    /// Keep a conversation fresh while it is open.
    pub fn poll_messages(&self, session_id: i64, page: u32, page_size: u32) -> Poller {
        self.poll_messages_every(session_id, page, page_size, CHAT_MESSAGES_POLL)
    }

    pub fn poll_messages_every(
        &self,
        session_id: i64,
        page: u32,
        page_size: u32,
        every: Duration,
    ) -> Poller {
        let http = self.http.clone();
        Poller::spawn(
            self.cache.clone(),
            Self::messages_key(session_id, page, page_size),
            every,
            move || messages_fetcher(http.clone(), session_id, page, page_size)(),
        )
    }
}

fn sessions_fetcher(
    http: HttpClient,
    filters: &ChatSessionFilters,
    page: u32,
    page_size: u32,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<Page<ChatSession>>> + Send {
    let mut query = filters.to_query();
    query.extend(paging(page, page_size));
    move || {
        Box::pin(async move {
            http.get_json::<Page<ChatSession>>("chat-sessions", &query)
                .await
        })
    }
}

fn messages_fetcher(
    http: HttpClient,
    session_id: i64,
    page: u32,
    page_size: u32,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<Page<ChatMessage>>> + Send {
    let mut query = vec![("session_id", session_id.to_string())];
    query.extend(paging(page, page_size));
    move || {
        Box::pin(async move {
            http.get_json::<Page<ChatMessage>>("chat-messages", &query)
                .await
        })
    }
}
