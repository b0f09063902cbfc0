//! Navigation state and route gating for the Leadboard dashboard.
//!
//! This crate is I/O free: the client crate feeds it session snapshots and
//! applies the redirects it asks for.

mod guard;
mod reducer;
mod route;
mod state;

pub use guard::{AccessSnapshot, GuardOutcome, GuardState, RouteGuard, RouteRequirements, evaluate};
pub use reducer::{AppAction, apply_action};
pub use route::{AppRoute, parse_id};
pub use state::AppState;
