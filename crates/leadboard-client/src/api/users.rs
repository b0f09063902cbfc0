use std::sync::Arc;

use reqwest::Method;

use crate::error::Result;
use crate::http::HttpClient;
use crate::query::{EntityKind, Fetched, QueryCache, QueryKey};
use crate::types::{
    ActionResponse, CreateUserRequest, Page, RejectUserRequest, UpdateUserRequest, UserFilters,
    UserProfile,
};

use super::paging;

/// User administration. The backend enforces admin rights; a non-admin gets
/// `ClientError::Forbidden`.
#[derive(Debug, Clone)]
pub struct UsersApi {
    http: HttpClient,
    cache: QueryCache,
}

impl UsersApi {
    pub fn new(http: HttpClient, cache: QueryCache) -> Self {
        Self { http, cache }
    }

    pub fn list_key(filters: &UserFilters, page: u32, page_size: u32) -> QueryKey {
        QueryKey::new(EntityKind::Users, "list")
            .params(filters.to_query())
            .params(paging(page, page_size))
    }

    pub fn detail_key(id: i64) -> QueryKey {
        QueryKey::new(EntityKind::Users, "detail").param("id", id)
    }

    pub async fn list(
        &self,
        filters: &UserFilters,
        page: u32,
        page_size: u32,
    ) -> Result<Arc<Page<UserProfile>>> {
        let mut query = filters.to_query();
        query.extend(paging(page, page_size));
        let http = self.http.clone();
        self.cache
            .fetch(Self::list_key(filters, page, page_size), move || async move {
                http.get_json::<Page<UserProfile>>("users", &query).await
            })
            .await
    }

    pub async fn get(&self, id: Option<i64>) -> Result<Fetched<UserProfile>> {
        let Some(id) = id else {
            return Ok(Fetched::Disabled);
        };
        let http = self.http.clone();
        let result = self
            .cache
            .fetch(Self::detail_key(id), move || async move {
                http.get_json::<UserProfile>(&format!("users/{id}"), &[])
                    .await
            })
            .await;
        Fetched::from_result(result)
    }

    pub async fn create(&self, request: &CreateUserRequest) -> Result<UserProfile> {
        self.cache
            .mutate(&[EntityKind::Users], self.http.post_json("users", request))
            .await
    }

    pub async fn update(&self, id: i64, request: &UpdateUserRequest) -> Result<UserProfile> {
        let path = format!("users/{id}");
        self.cache
            .mutate(&[EntityKind::Users], self.http.patch_json(&path, request))
            .await
    }

    pub async fn delete(&self, id: i64) -> Result<ActionResponse> {
        let path = format!("users/{id}");
        self.cache
            .mutate(&[EntityKind::Users], self.http.delete_action(&path))
            .await
    }

    pub async fn approve(&self, id: i64) -> Result<ActionResponse> {
        self.transition(id, "approve").await
    }

    pub async fn reject(&self, id: i64, reason: Option<String>) -> Result<ActionResponse> {
        let path = format!("users/{id}/reject");
        let body = RejectUserRequest { reason };
        let write = async {
            let response = self
                .http
                .send(Method::POST, &path, |req| Ok(req.json(&body)))
                .await?;
            HttpClient::read_json_or_default::<ActionResponse>(response).await
        };
        self.cache.mutate(&[EntityKind::Users], write).await
    }

    pub async fn deactivate(&self, id: i64) -> Result<ActionResponse> {
        self.transition(id, "deactivate").await
    }

    pub async fn reactivate(&self, id: i64) -> Result<ActionResponse> {
        self.transition(id, "reactivate").await
    }

    async fn transition(&self, id: i64, action: &str) -> Result<ActionResponse> {
        let path = format!("users/{id}/{action}");
        let result = self
            .cache
            .mutate(&[EntityKind::Users], self.http.post_action(&path))
            .await;
        if result.is_ok() {
            tracing::info!(user_id = id, action, "user status changed");
        }
        result
    }
}
