//! Request and response types for the Leadboard API.

use serde::{Deserialize, Serialize};

// ---------- Auth ----------

/// Request body for POST /auth/google.
#[derive(Debug, Clone, Serialize)]
pub struct GoogleLoginRequest {
    pub token: String,
}

/// Token block returned by login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

/// Response from POST /auth/google.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: TokenResponse,
    pub user: UserProfile,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct VerifyRequest<'a> {
    pub token: &'a str,
}

/// Response from POST /auth/verify.
#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    #[serde(default = "default_true")]
    pub valid: bool,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub message: Option<String>,
}

fn default_true() -> bool {
    true
}

// ---------- Users ----------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[serde(alias = "admin")]
    Admin,
    #[serde(alias = "manager")]
    Manager,
    #[serde(alias = "viewer")]
    Viewer,
    #[serde(other)]
    Public,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::Viewer => "VIEWER",
            Role::Public => "PUBLIC",
        }
    }
}

/// Authenticated user or a row of the users table.
///
/// Capability flags come from the backend and are never recomputed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub is_approved: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub can_manage: bool,
    #[serde(default)]
    pub can_view_full: bool,
    #[serde(default)]
    pub login_count: u64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub last_login: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UserFilters {
    pub search: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub is_approved: Option<bool>,
}

impl UserFilters {
    pub(crate) fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        push_opt(&mut query, "search", self.search.as_deref());
        push_opt(&mut query, "role", self.role.map(Role::as_str));
        push_opt(&mut query, "is_active", self.is_active.map(bool_str));
        push_opt(&mut query, "is_approved", self.is_approved.map(bool_str));
        query
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub role: Role,
}

/// Request body for PATCH /users/{id}. Only send fields you want to change.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub can_view_full: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RejectUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------- Leads ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Columns the dashboard does not model explicitly (imported spreadsheets vary).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LeadFilters {
    pub search: Option<String>,
    pub status: Option<String>,
    pub source: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
    pub sort_by: Option<String>,
    pub sort_desc: Option<bool>,
}

impl LeadFilters {
    pub(crate) fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        push_opt(&mut query, "search", self.search.as_deref());
        push_opt(&mut query, "status", self.status.as_deref());
        push_opt(&mut query, "source", self.source.as_deref());
        push_opt(&mut query, "country", self.country.as_deref());
        push_opt(&mut query, "city", self.city.as_deref());
        push_opt(&mut query, "sort_by", self.sort_by.as_deref());
        push_opt(
            &mut query,
            "sort_order",
            self.sort_desc.map(|desc| if desc { "desc" } else { "asc" }),
        );
        query
    }
}

/// Request body for POST /leads and PATCH /leads/{id}.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LeadInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct BulkDeleteRequest<'a> {
    pub ids: &'a [i64],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BulkDeleteResponse {
    #[serde(default)]
    pub deleted: u64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoveDuplicatesResponse {
    #[serde(default)]
    pub removed: u64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of POST /leads/import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImportSummary {
    #[serde(default)]
    pub imported: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub duplicates: u64,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// One row of GET /leads/geographic-stats.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GeoStat {
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    pub count: u64,
}

/// Stats endpoint returns either a bare array or `{ items: [...] }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum GeoStatsResponse {
    List(Vec<GeoStat>),
    Wrapped { items: Vec<GeoStat> },
}

impl GeoStatsResponse {
    pub(crate) fn into_stats(self) -> Vec<GeoStat> {
        match self {
            GeoStatsResponse::List(stats) => stats,
            GeoStatsResponse::Wrapped { items } => items,
        }
    }
}

// ---------- Chat ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: i64,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub lead_id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub last_message_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ChatSessionFilters {
    pub search: Option<String>,
    pub status: Option<String>,
    pub is_active: Option<bool>,
}

impl ChatSessionFilters {
    pub fn active() -> Self {
        Self {
            is_active: Some(true),
            ..Self::default()
        }
    }

    pub(crate) fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        push_opt(&mut query, "search", self.search.as_deref());
        push_opt(&mut query, "status", self.status.as_deref());
        push_opt(&mut query, "is_active", self.is_active.map(bool_str));
        query
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateChatSessionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    #[serde(default)]
    pub sender: Option<String>,
    pub content: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendChatMessageRequest {
    pub session_id: i64,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
}

// ---------- Telegram ----------

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TelegramStatus {
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub bot_username: Option<String>,
    #[serde(default)]
    pub active_sessions: Option<u64>,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelegramSendRequest {
    pub chat_id: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TelegramSendResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------- Shared ----------

/// Paginated list envelope used by every list endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Page<T> {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.page_size == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.page_size))
    }
}

/// Body of write endpoints that only acknowledge (delete, approve, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

fn push_opt(query: &mut Vec<(&'static str, String)>, name: &'static str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        query.push((name, value.to_string()));
    }
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_accepts_both_cases_and_unknowns() {
        let role: Role = serde_json::from_value(json!("ADMIN")).expect("upper");
        assert_eq!(role, Role::Admin);
        let role: Role = serde_json::from_value(json!("manager")).expect("lower");
        assert_eq!(role, Role::Manager);
        let role: Role = serde_json::from_value(json!("SUPERUSER")).expect("unknown");
        assert_eq!(role, Role::Public);
    }

    #[test]
    fn lead_filters_skip_blank_values() {
        let filters = LeadFilters {
            search: Some("  ".to_string()),
            country: Some("Spain".to_string()),
            sort_desc: Some(true),
            ..LeadFilters::default()
        };
        assert_eq!(
            filters.to_query(),
            vec![
                ("country", "Spain".to_string()),
                ("sort_order", "desc".to_string())
            ]
        );
    }

    #[test]
    fn lead_keeps_unmodelled_columns() {
        let lead: Lead = serde_json::from_value(json!({
            "id": 7,
            "name": "Ada",
            "linkedin": "ada-l"
        }))
        .expect("lead");
        assert_eq!(lead.extra.get("linkedin"), Some(&json!("ada-l")));
    }

    #[test]
    fn total_pages_rounds_up() {
        let page: Page<i64> = Page {
            total: 41,
            page: 1,
            page_size: 20,
            items: Vec::new(),
        };
        assert_eq!(page.total_pages(), 3);
    }

    #[test]
    fn geo_stats_accept_both_shapes() {
        let bare: GeoStatsResponse =
            serde_json::from_value(json!([{"country": "PT", "count": 3}])).expect("bare");
        assert_eq!(bare.into_stats().len(), 1);
        let wrapped: GeoStatsResponse =
            serde_json::from_value(json!({"items": [{"country": "PT", "count": 3}]}))
                .expect("wrapped");
        assert_eq!(wrapped.into_stats()[0].count, 3);
    }
}
