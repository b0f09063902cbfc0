use serde::{Deserialize, Serialize};

use crate::guard::RouteRequirements;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppRoute {
    Login,
    PendingApproval,
    Unauthorized,
    Dashboard,
    Leads {
        #[serde(default)]
        lead_id: Option<i64>,
    },
    Users {
        #[serde(default)]
        user_id: Option<i64>,
    },
    Chat {
        #[serde(default)]
        session_id: Option<i64>,
    },
    Telegram,
    Profile,
}

impl Default for AppRoute {
    fn default() -> Self {
        Self::Dashboard
    }
}

impl AppRoute {
    pub fn from_path(raw_path: &str) -> Self {
        let path = normalize_path(raw_path);
        match path.as_str() {
            "/" | "/dashboard" => return Self::Dashboard,
            "/login" => return Self::Login,
            "/pending-approval" => return Self::PendingApproval,
            "/unauthorized" => return Self::Unauthorized,
            "/telegram" => return Self::Telegram,
            "/profile" => return Self::Profile,
            _ => {}
        }
        if let Some(lead_id) = id_from_prefix(&path, "/leads") {
            return Self::Leads { lead_id };
        }
        if let Some(user_id) = id_from_prefix(&path, "/users") {
            return Self::Users { user_id };
        }
        if let Some(session_id) = id_from_prefix(&path, "/chat") {
            return Self::Chat { session_id };
        }
        Self::Dashboard
    }

    pub fn to_path(&self) -> String {
        match self {
            Self::Login => "/login".to_string(),
            Self::PendingApproval => "/pending-approval".to_string(),
            Self::Unauthorized => "/unauthorized".to_string(),
            Self::Dashboard => "/".to_string(),
            Self::Leads { lead_id } => id_to_path("/leads", *lead_id),
            Self::Users { user_id } => id_to_path("/users", *user_id),
            Self::Chat { session_id } => id_to_path("/chat", *session_id),
            Self::Telegram => "/telegram".to_string(),
            Self::Profile => "/profile".to_string(),
        }
    }

    /// Public routes render without a session.
    pub fn is_public(&self) -> bool {
        matches!(
            self,
            Self::Login | Self::PendingApproval | Self::Unauthorized
        )
    }

    /// Access requirements the dashboard declares for each protected view.
    pub fn requirements(&self) -> Option<RouteRequirements> {
        if self.is_public() {
            return None;
        }
        let requirements = match self {
            Self::Users { .. } => RouteRequirements::approved().with_admin(),
            Self::Telegram => RouteRequirements::approved().with_manager(),
            Self::Profile => RouteRequirements::default(),
            _ => RouteRequirements::approved(),
        };
        Some(requirements)
    }
}

/// Parses a numeric route segment. Non-numeric ids resolve to `None` so the
/// detail query stays disabled instead of issuing a request.
pub fn parse_id(segment: &str) -> Option<i64> {
    segment.trim().parse::<i64>().ok()
}

fn id_from_prefix(path: &str, prefix: &str) -> Option<Option<i64>> {
    if path == prefix {
        return Some(None);
    }
    let prefixed = format!("{prefix}/");
    path.strip_prefix(&prefixed).map(parse_id)
}

fn id_to_path(prefix: &str, id: Option<i64>) -> String {
    match id {
        Some(id) => format!("{prefix}/{id}"),
        None => prefix.to_string(),
    }
}

fn normalize_path(raw_path: &str) -> String {
    let path = raw_path.trim();
    let path = path.split(['?', '#']).next().unwrap_or_default();
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }
    let mut normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    while normalized.contains("//") {
        normalized = normalized.replace("//", "/");
    }
    if normalized.len() > 1 {
        normalized = normalized.trim_end_matches('/').to_string();
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::{AppRoute, parse_id};

    #[test]
    fn parses_entity_routes() {
        assert_eq!(AppRoute::from_path("/leads"), AppRoute::Leads { lead_id: None });
        assert_eq!(
            AppRoute::from_path("/leads/42/"),
            AppRoute::Leads { lead_id: Some(42) }
        );
        assert_eq!(
            AppRoute::from_path("users/7?tab=activity"),
            AppRoute::Users { user_id: Some(7) }
        );
        assert_eq!(
            AppRoute::from_path("/chat/abc"),
            AppRoute::Chat { session_id: None }
        );
        assert_eq!(AppRoute::from_path("//login"), AppRoute::Login);
        assert_eq!(AppRoute::from_path("/nowhere"), AppRoute::Dashboard);
    }

    #[test]
    fn routes_round_trip() {
        let routes = vec![
            AppRoute::Login,
            AppRoute::PendingApproval,
            AppRoute::Unauthorized,
            AppRoute::Dashboard,
            AppRoute::Leads { lead_id: Some(3) },
            AppRoute::Users { user_id: None },
            AppRoute::Chat {
                session_id: Some(19),
            },
            AppRoute::Telegram,
            AppRoute::Profile,
        ];

        for route in routes {
            let path = route.to_path();
            assert_eq!(AppRoute::from_path(&path), route);
        }
    }

    #[test]
    fn public_routes_have_no_requirements() {
        assert!(AppRoute::Login.requirements().is_none());
        assert!(AppRoute::PendingApproval.requirements().is_none());

        let users = AppRoute::Users { user_id: None }
            .requirements()
            .expect("users route is gated");
        assert!(users.require_admin);
        assert!(users.require_approval);

        let profile = AppRoute::Profile.requirements().expect("profile is gated");
        assert!(!profile.require_approval);
    }

    #[test]
    fn parse_id_rejects_non_numeric() {
        assert_eq!(parse_id("12"), Some(12));
        assert_eq!(parse_id("NaN"), None);
        assert_eq!(parse_id(""), None);
    }
}
