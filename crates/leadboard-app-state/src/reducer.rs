use serde::{Deserialize, Serialize};

use crate::guard::{GuardOutcome, GuardState};
use crate::route::AppRoute;
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppAction {
    BootstrapFromPath { path: String },
    Navigate { route: AppRoute },
    GuardEvaluated { state: GuardState, redirect: Option<AppRoute> },
    ErrorRaised { message: String },
    ClearError,
}

impl From<GuardOutcome> for AppAction {
    fn from(outcome: GuardOutcome) -> Self {
        Self::GuardEvaluated {
            state: outcome.state,
            redirect: outcome.redirect,
        }
    }
}

pub fn apply_action(state: &mut AppState, action: AppAction) {
    match action {
        AppAction::BootstrapFromPath { path } => {
            navigate(state, AppRoute::from_path(&path));
        }
        AppAction::Navigate { route } => {
            navigate(state, route);
        }
        AppAction::GuardEvaluated { state: guard, redirect } => {
            state.guard = Some(guard);
            if let Some(route) = redirect {
                if navigate(state, route) {
                    state.redirects = state.redirects.saturating_add(1);
                }
            }
        }
        AppAction::ErrorRaised { message } => {
            state.last_error = Some(message);
        }
        AppAction::ClearError => {
            state.last_error = None;
        }
    }
}

/// Returns whether the route changed. Navigating to the current route is a no-op.
fn navigate(state: &mut AppState, route: AppRoute) -> bool {
    if route == state.route {
        return false;
    }
    state.route_history.push(state.route.clone());
    state.route = route;
    if state.route.is_public() {
        state.guard = None;
    }
    true
}
