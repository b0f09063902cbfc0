//! Route gating for protected views.
//!
//! [`evaluate`] is the pure decision; [`RouteGuard`] remembers the previous
//! decision so navigation is only requested when the state actually changes.

use serde::{Deserialize, Serialize};

use crate::route::AppRoute;

/// Requirements a protected view declares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteRequirements {
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub require_admin: bool,
    #[serde(default)]
    pub require_manager: bool,
}

impl RouteRequirements {
    pub fn approved() -> Self {
        Self {
            require_approval: true,
            ..Self::default()
        }
    }

    pub fn with_admin(mut self) -> Self {
        self.require_admin = true;
        self
    }

    pub fn with_manager(mut self) -> Self {
        self.require_manager = true;
        self
    }
}

/// The session facts the guard needs. Built by the client from its session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessSnapshot {
    pub is_loading: bool,
    pub is_authenticated: bool,
    pub profile_resolved: bool,
    pub is_approved: bool,
    pub is_admin: bool,
    pub can_manage: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardState {
    Checking,
    Unauthenticated,
    Forbidden,
    Authorized,
}

impl GuardState {
    pub fn renders_content(self) -> bool {
        self == Self::Authorized
    }

    pub fn renders_placeholder(self) -> bool {
        self == Self::Checking
    }
}

pub fn evaluate(snapshot: &AccessSnapshot, requirements: &RouteRequirements) -> GuardState {
    if snapshot.is_loading {
        return GuardState::Checking;
    }
    if !snapshot.is_authenticated {
        return GuardState::Unauthenticated;
    }
    if !snapshot.profile_resolved {
        return GuardState::Checking;
    }
    if first_unmet(snapshot, requirements).is_some() {
        return GuardState::Forbidden;
    }
    GuardState::Authorized
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unmet {
    Approval,
    Admin,
    Manager,
}

fn first_unmet(snapshot: &AccessSnapshot, requirements: &RouteRequirements) -> Option<Unmet> {
    if requirements.require_approval && !snapshot.is_approved {
        return Some(Unmet::Approval);
    }
    if requirements.require_admin && !snapshot.is_admin {
        return Some(Unmet::Admin);
    }
    if requirements.require_manager && !snapshot.can_manage {
        return Some(Unmet::Manager);
    }
    None
}

/// Result of one guard evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardOutcome {
    pub state: GuardState,
    /// Set only when this evaluation moved the guard into a redirecting state.
    pub redirect: Option<AppRoute>,
}

/// Per-mount guard state machine.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    requirements: RouteRequirements,
    snapshot: Option<AccessSnapshot>,
    state: Option<GuardState>,
}

impl RouteGuard {
    pub fn new(requirements: RouteRequirements) -> Self {
        Self {
            requirements,
            snapshot: None,
            state: None,
        }
    }

    /// Guard for a route's declared requirements; `None` for public routes.
    pub fn for_route(route: &AppRoute) -> Option<Self> {
        route.requirements().map(Self::new)
    }

    pub fn requirements(&self) -> RouteRequirements {
        self.requirements
    }

    pub fn state(&self) -> Option<GuardState> {
        self.state
    }

    /// Re-evaluate against a new session snapshot.
    pub fn update(&mut self, snapshot: AccessSnapshot) -> GuardOutcome {
        self.snapshot = Some(snapshot);
        self.reevaluate()
    }

    /// Swap the requirement set and re-evaluate against the last snapshot.
    pub fn set_requirements(&mut self, requirements: RouteRequirements) -> GuardOutcome {
        self.requirements = requirements;
        self.reevaluate()
    }

    fn reevaluate(&mut self) -> GuardOutcome {
        let snapshot = self.snapshot.unwrap_or(AccessSnapshot {
            is_loading: true,
            ..AccessSnapshot::default()
        });
        let next = evaluate(&snapshot, &self.requirements);
        let previous = self.state.replace(next);

        let redirect = if previous == Some(next) {
            None
        } else {
            match next {
                GuardState::Unauthenticated => Some(AppRoute::Login),
                GuardState::Forbidden => Some(self.forbidden_target(&snapshot)),
                GuardState::Checking | GuardState::Authorized => None,
            }
        };

        if let Some(route) = redirect.as_ref() {
            tracing::debug!(state = ?next, target = %route.to_path(), "route guard redirect");
        }

        GuardOutcome {
            state: next,
            redirect,
        }
    }

    fn forbidden_target(&self, snapshot: &AccessSnapshot) -> AppRoute {
        match first_unmet(snapshot, &self.requirements) {
            Some(Unmet::Approval) => AppRoute::PendingApproval,
            _ => AppRoute::Unauthorized,
        }
    }
}
