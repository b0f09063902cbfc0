//! Authenticated HTTP transport.
//!
//! Every request re-reads the access token when it is built. A response that
//! says the session is invalid triggers one shared token refresh, after which
//! the request is rebuilt and sent exactly once more.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::session::SessionContext;
use crate::types::{ActionResponse, RefreshRequest, TokenResponse};

const SNIPPET_CHARS: usize = 400;

/// 403 messages that mean "your session is no longer valid" rather than
/// "you may not do this".
const SESSION_INVALID_MARKERS: [&str; 5] = [
    "expired",
    "invalid",
    "deactivated",
    "not active",
    "pending approval",
];

type RefreshFuture = Shared<BoxFuture<'static, Result<String>>>;

#[derive(Clone)]
pub struct HttpClient {
    inner: Arc<HttpInner>,
}

struct HttpInner {
    base_url: String,
    http: Client,
    session: Arc<SessionContext>,
    import_timeout: Duration,
    refresh: Mutex<Option<(u64, RefreshFuture)>>,
    refresh_seq: AtomicU64,
}

enum Checked {
    Ok(Response),
    /// 401, or a 403 whose message marks the session as invalid.
    SessionInvalid(ClientError),
    Failed(ClientError),
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("base_url", &self.inner.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpClient {
    pub fn new(config: &ClientConfig, session: Arc<SessionContext>) -> Result<Self> {
        config.validate()?;
        let http = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self {
            inner: Arc::new(HttpInner {
                base_url: config.normalized_base_url(),
                http,
                session,
                import_timeout: config.import_timeout,
                refresh: Mutex::new(None),
                refresh_seq: AtomicU64::new(0),
            }),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.inner.session
    }

    pub fn import_timeout(&self) -> Duration {
        self.inner.import_timeout
    }

    pub fn url(&self, path: &str) -> String {
        self.inner.url(path)
    }

    /// Send an authenticated request.
    ///
    /// `configure` is called once per attempt, so bodies that cannot be
    /// cloned (multipart forms) are rebuilt for the retry.
    pub async fn send<F>(&self, method: Method, path: &str, configure: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder> + Send + Sync,
    {
        let token = self.inner.session.tokens().access_token();
        let response = self
            .inner
            .dispatch(&method, path, token.as_deref(), &configure)
            .await?;
        let rejection = match check_response(response).await {
            Checked::Ok(response) => return Ok(response),
            Checked::Failed(err) => return Err(err),
            Checked::SessionInvalid(err) => err,
        };

        tracing::debug!(
            %method,
            path,
            status = rejection.status(),
            "session rejected; refreshing before retry"
        );
        let fresh = self.refresh_access_token(token.as_deref()).await?;

        let response = self
            .inner
            .dispatch(&method, path, Some(fresh.as_str()), &configure)
            .await?;
        match check_response(response).await {
            Checked::Ok(response) => Ok(response),
            Checked::Failed(err) | Checked::SessionInvalid(err) => Err(err),
        }
    }

    /// Send without a bearer token and without the refresh protocol.
    pub async fn send_public<F>(&self, method: Method, path: &str, configure: F) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder> + Send + Sync,
    {
        self.send_with_token(method, path, None, configure).await
    }

    /// Send once with an explicit token; session errors are returned as-is.
    pub async fn send_with_token<F>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        configure: F,
    ) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder> + Send + Sync,
    {
        let response = self.inner.dispatch(&method, path, token, &configure).await?;
        match check_response(response).await {
            Checked::Ok(response) => Ok(response),
            Checked::Failed(err) | Checked::SessionInvalid(err) => Err(err),
        }
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .send(Method::GET, path, |req| Ok(req.query(query)))
            .await?;
        Self::read_json(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .send(Method::POST, path, |req| Ok(req.json(body)))
            .await?;
        Self::read_json(response).await
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .send(Method::PATCH, path, |req| Ok(req.json(body)))
            .await?;
        Self::read_json(response).await
    }

    /// POST without a body to an endpoint that only acknowledges.
    pub async fn post_action(&self, path: &str) -> Result<ActionResponse> {
        let response = self.send(Method::POST, path, Ok).await?;
        Self::read_json_or_default(response).await
    }

    pub async fn delete_action(&self, path: &str) -> Result<ActionResponse> {
        let response = self.send(Method::DELETE, path, Ok).await?;
        Self::read_json_or_default(response).await
    }

    pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            ClientError::Decode(format!("{e}; response snippet: {}", snippet(&body)))
        })
    }

    /// Like [`read_json`](Self::read_json) but an empty body yields `T::default()`.
    pub async fn read_json_or_default<T: DeserializeOwned + Default>(
        response: Response,
    ) -> Result<T> {
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(T::default());
        }
        serde_json::from_str(&body).map_err(|e| {
            ClientError::Decode(format!("{e}; response snippet: {}", snippet(&body)))
        })
    }

    /// Obtain a usable access token, sharing one refresh among all callers.
    ///
    /// `stale` is the token the failed request carried. If the store already
    /// holds a different token, another caller refreshed in the meantime and
    /// that token is returned without a new refresh.
    async fn refresh_access_token(&self, stale: Option<&str>) -> Result<String> {
        let pending = {
            let mut slot = self.inner.refresh.lock();
            if let Some(current) = self.inner.session.tokens().access_token()
                && stale != Some(current.as_str())
            {
                return Ok(current);
            }
            match slot.as_ref() {
                Some((_, pending)) => pending.clone(),
                None => {
                    let id = self.inner.refresh_seq.fetch_add(1, Ordering::Relaxed);
                    let inner = Arc::clone(&self.inner);
                    let pending = async move {
                        let result = inner.run_refresh().await;
                        let mut slot = inner.refresh.lock();
                        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
                            *slot = None;
                        }
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, pending.clone()));
                    pending
                }
            }
        };
        pending.await
    }
}

impl HttpInner {
    fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{path}", self.base_url)
    }

    async fn dispatch<F>(
        &self,
        method: &Method,
        path: &str,
        token: Option<&str>,
        configure: &F,
    ) -> Result<Response>
    where
        F: Fn(RequestBuilder) -> Result<RequestBuilder> + Send + Sync,
    {
        let mut request = self.http.request(method.clone(), self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let request = configure(request)?;
        tracing::debug!(%method, path, authenticated = token.is_some(), "sending request");
        let response = request.send().await?;
        tracing::debug!(%method, path, status = response.status().as_u16(), "response received");
        Ok(response)
    }

    async fn run_refresh(&self) -> Result<String> {
        let epoch = self.session.epoch();
        let Some(refresh_token) = self.session.tokens().refresh_token() else {
            let message = "No refresh token available".to_string();
            self.session.expire_since(epoch, message.clone());
            return Err(ClientError::SessionExpired { message });
        };

        let result = async {
            let response = self
                .http
                .post(self.url("auth/refresh"))
                .json(&RefreshRequest {
                    refresh_token: &refresh_token,
                })
                .send()
                .await?;
            match check_response(response).await {
                Checked::Ok(response) => HttpClient::read_json::<TokenResponse>(response).await,
                Checked::Failed(err) | Checked::SessionInvalid(err) => Err(err),
            }
        }
        .await;

        match result {
            Ok(tokens) => {
                let access = tokens.access_token.clone();
                let rotated = tokens.refresh_token.is_some();
                if !self
                    .session
                    .update_tokens(epoch, tokens.access_token, tokens.refresh_token)
                {
                    tracing::info!("session ended during token refresh; discarding new token");
                    return Err(ClientError::SessionExpired {
                        message: "Session ended while refreshing".to_string(),
                    });
                }
                tracing::info!(rotated_refresh = rotated, "access token refreshed");
                Ok(access)
            }
            Err(err) => {
                tracing::warn!(error = %err, "token refresh failed; clearing session");
                let message = err.user_message();
                self.session.expire_since(epoch, message.clone());
                Err(ClientError::SessionExpired { message })
            }
        }
    }
}

async fn check_response(response: Response) -> Checked {
    let status = response.status();
    if status.is_success() {
        return Checked::Ok(response);
    }
    let body = match response.text().await {
        Ok(body) => body,
        Err(err) => return Checked::Failed(err.into()),
    };
    let message = error_message(status, &body);
    match status {
        StatusCode::UNAUTHORIZED => Checked::SessionInvalid(ClientError::Unauthorized { message }),
        StatusCode::FORBIDDEN if is_session_invalid(&message) => {
            Checked::SessionInvalid(ClientError::Forbidden { message })
        }
        StatusCode::FORBIDDEN => Checked::Failed(ClientError::Forbidden { message }),
        StatusCode::NOT_FOUND => Checked::Failed(ClientError::NotFound { message }),
        _ => Checked::Failed(ClientError::Api {
            status: status.as_u16(),
            message,
        }),
    }
}

pub(crate) fn is_session_invalid(message: &str) -> bool {
    let lower = message.to_lowercase();
    SESSION_INVALID_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Pull a human-readable message out of an error body.
///
/// Looks at `detail` (a string, or a list of validation errors with `msg`),
/// then `message`, then `error`, then falls back to the raw body.
pub(crate) fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body)
        && let Some(message) = message_from_value(&value)
    {
        return message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!(
            "Request failed with status {}",
            status.canonical_reason().unwrap_or(status.as_str())
        );
    }
    snippet(trimmed)
}

fn message_from_value(value: &Value) -> Option<String> {
    match value.get("detail") {
        Some(Value::String(detail)) if !detail.trim().is_empty() => return Some(detail.clone()),
        Some(Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(Value::as_str).or(item.as_str()))
                .collect();
            if !messages.is_empty() {
                return Some(messages.join("; "));
            }
        }
        Some(Value::Object(detail)) => {
            if let Some(message) = detail.get("message").and_then(Value::as_str) {
                return Some(message.to_string());
            }
        }
        _ => {}
    }
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .filter(|message| !message.trim().is_empty())
        .map(str::to_string)
}

fn snippet(body: &str) -> String {
    body.chars().take(SNIPPET_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_string_wins() {
        let body = r#"{"detail": "Lead not found", "message": "ignored"}"#;
        assert_eq!(error_message(StatusCode::NOT_FOUND, body), "Lead not found");
    }

    #[test]
    fn validation_detail_list_is_joined() {
        let body = r#"{"detail": [{"loc": ["body", "email"], "msg": "field required"}, {"msg": "bad page"}]}"#;
        assert_eq!(
            error_message(StatusCode::UNPROCESSABLE_ENTITY, body),
            "field required; bad page"
        );
    }

    #[test]
    fn falls_back_to_message_error_then_body() {
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"message": "nope"}"#),
            "nope"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"error": "still nope"}"#),
            "still nope"
        );
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream down"),
            "upstream down"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, ""),
            "Request failed with status Internal Server Error"
        );
    }

    #[test]
    fn session_markers_are_case_insensitive() {
        assert!(is_session_invalid("Token has EXPIRED"));
        assert!(is_session_invalid("Account pending approval"));
        assert!(is_session_invalid("User account is deactivated"));
        assert!(!is_session_invalid("Admin access required"));
    }

    #[test]
    fn url_joins_without_double_slash() {
        let config = ClientConfig::new().base_url("http://localhost:8000/api/v1/");
        let session = SessionContext::in_memory().expect("session");
        let client = HttpClient::new(&config, session).expect("client");
        assert_eq!(client.url("/leads"), "http://localhost:8000/api/v1/leads");
        assert_eq!(client.url("auth/me"), "http://localhost:8000/api/v1/auth/me");
    }
}
