//! Client for the Leadboard admin API.
//!
//! Handles the session lifecycle (login, persisted tokens, transparent token
//! refresh, logout) and cached, deduplicated access to leads, users, chat
//! sessions and the Telegram bot.
//!
//! ```no_run
//! use leadboard_client::{ClientConfig, Leadboard, LeadFilters};
//!
//! # async fn run() -> leadboard_client::Result<()> {
//! let client = Leadboard::new(ClientConfig::from_env())?;
//! client.session().login("google-id-token").await?;
//! let page = client.leads().list(&LeadFilters::default(), 1, 20).await?;
//! println!("{} leads", page.total);
//! # Ok(())
//! # }
//! ```

pub mod api;
mod client;
mod config;
mod error;
mod http;
pub mod query;
mod session;
mod token_store;
mod types;

pub use api::{ChatApi, ImportFile, LeadsApi, TelegramApi, UsersApi};
pub use client::Leadboard;
pub use config::{
    BASE_URL_ENV, ClientConfig, DEFAULT_BASE_URL, GOOGLE_CLIENT_ID_ENV, SESSION_FILE_ENV,
};
pub use error::{ClientError, ErrorClass, Result};
pub use http::HttpClient;
pub use query::{
    EntityKind, Fetched, Mutation, MutationStatus, Poller, QueryCache, QueryKey, QueryObserver,
    QuerySnapshot, QueryStatus, ViewScope,
};
pub use session::{SessionContext, SessionController, SessionEvent, SessionState};
pub use token_store::{
    AuthStateStore, FileAuthStore, MemoryAuthStore, StoredSession, TokenPair, TokenStore,
};
pub use types::*;

pub use leadboard_app_state as app_state;
