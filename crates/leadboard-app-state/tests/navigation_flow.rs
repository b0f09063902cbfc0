use leadboard_app_state::{
    AccessSnapshot, AppAction, AppRoute, AppState, GuardState, RouteGuard, apply_action,
};
use pretty_assertions::assert_eq;

fn pending_user() -> AccessSnapshot {
    AccessSnapshot {
        is_loading: false,
        is_authenticated: true,
        profile_resolved: true,
        is_approved: false,
        is_admin: false,
        can_manage: false,
    }
}

#[test]
fn unapproved_login_lands_on_pending_approval_and_stays_there() {
    let mut app = AppState::default();
    apply_action(
        &mut app,
        AppAction::BootstrapFromPath {
            path: "/leads".to_string(),
        },
    );
    let mut guard = RouteGuard::for_route(&app.route).expect("leads route is gated");

    let checking = guard.update(AccessSnapshot {
        is_loading: true,
        ..AccessSnapshot::default()
    });
    apply_action(&mut app, checking.into());
    assert_eq!(app.guard, Some(GuardState::Checking));
    assert_eq!(app.route, AppRoute::Leads { lead_id: None });

    for _ in 0..3 {
        let outcome = guard.update(pending_user());
        assert!(!outcome.state.renders_content());
        apply_action(&mut app, outcome.into());
    }

    assert_eq!(app.route, AppRoute::PendingApproval);
    assert_eq!(app.redirects, 1);
}

#[test]
fn session_loss_sends_user_to_login_once() {
    let mut app = AppState::default();
    let mut guard = RouteGuard::for_route(&app.route).expect("dashboard is gated");

    let authorized = guard.update(AccessSnapshot {
        is_approved: true,
        ..pending_user()
    });
    assert_eq!(authorized.state, GuardState::Authorized);
    apply_action(&mut app, authorized.into());

    let cleared = AccessSnapshot::default();
    apply_action(&mut app, guard.update(cleared).into());
    apply_action(&mut app, guard.update(cleared).into());

    assert_eq!(app.route, AppRoute::Login);
    assert_eq!(app.redirects, 1);
}

#[test]
fn routes_serialize_with_type_tag() {
    let json = serde_json::to_value(AppRoute::Leads { lead_id: Some(5) }).expect("serialize");
    assert_eq!(json, serde_json::json!({"type": "leads", "lead_id": 5}));
}
