use serde::{Deserialize, Serialize};

use crate::guard::GuardState;
use crate::route::AppRoute;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    pub route: AppRoute,
    pub route_history: Vec<AppRoute>,
    /// Guard decision for the current route; `None` for public routes.
    pub guard: Option<GuardState>,
    /// Number of redirects the guard has requested.
    pub redirects: u32,
    pub last_error: Option<String>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            route: AppRoute::default(),
            route_history: Vec::new(),
            guard: None,
            redirects: 0,
            last_error: None,
        }
    }
}
