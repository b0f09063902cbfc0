//! Example: show who the stored session belongs to and a few dashboard numbers.
//!
//! Log in once with an identity-provider ID token, then run without it; the
//! session is persisted between runs.
//!
//! Usage:
//!   LEADBOARD_API_URL=http://localhost:8000/api/v1 \
//!     cargo run -p leadboard-client --example whoami -- [google-id-token]
//!
//! Set `RUST_LOG=leadboard_client=debug` to see every request.

use leadboard_client::app_state::{AppRoute, RouteGuard};
use leadboard_client::{ClientConfig, LeadFilters, Leadboard, Result};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let client = Leadboard::new(ClientConfig::from_env())?;
    let session = client.session();

    if let Some(credential) = std::env::args().nth(1) {
        let user = session.login(&credential).await?;
        eprintln!("logged in as {} ({})", user.email, user.role.as_str());
    }

    match session.refresh_profile().await? {
        Some(user) => eprintln!(
            "session: {} role={} approved={} admin={}",
            user.email,
            user.role.as_str(),
            user.is_approved,
            user.is_admin
        ),
        None => {
            eprintln!("no stored session; pass an ID token to log in");
            return Ok(());
        }
    }

    if let Some(mut guard) = RouteGuard::for_route(&AppRoute::Leads { lead_id: None }) {
        let outcome = guard.update(session.access_snapshot());
        if let Some(redirect) = outcome.redirect {
            eprintln!(
                "leads view unavailable, would redirect to {}",
                redirect.to_path()
            );
            return Ok(());
        }
    }

    let page = client.leads().list(&LeadFilters::default(), 1, 5).await?;
    println!("{} leads ({} pages)", page.total, page.total_pages());
    for lead in &page.items {
        println!(
            "  #{} {} <{}>",
            lead.id,
            lead.name.as_deref().unwrap_or("-"),
            lead.email.as_deref().unwrap_or("-")
        );
    }

    let status = client.telegram().status().await?;
    println!(
        "telegram bot: running={} username={}",
        status.is_running,
        status.bot_username.as_deref().unwrap_or("-")
    );
    Ok(())
}
