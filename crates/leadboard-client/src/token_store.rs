//! Token persistence.
//!
//! [`TokenStore`] keeps the current tokens and profile in memory and writes
//! every change through to an [`AuthStateStore`] backend so a restart
//! rehydrates the session without a new login.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::types::UserProfile;

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

impl StoredSession {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenPair {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

/// Persistence backend for the session.
pub trait AuthStateStore: Send + Sync {
    fn load_auth_state(&self) -> io::Result<Option<StoredSession>>;
    fn persist_auth_state(&self, state: &StoredSession) -> io::Result<()>;
    fn clear_auth_state(&self) -> io::Result<()>;
}

/// JSON file backend, readable only by the owner on unix.
#[derive(Debug, Clone)]
pub struct FileAuthStore {
    path: PathBuf,
}

impl FileAuthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data_local_dir>/leadboard/session.json`
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir().ok_or_else(|| {
            ClientError::Storage("failed to resolve local data directory".to_string())
        })?;
        Ok(data_dir.join("leadboard").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuthStateStore for FileAuthStore {
    fn load_auth_state(&self) -> io::Result<Option<StoredSession>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        match serde_json::from_str::<StoredSession>(&contents) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                // A corrupt file must not lock the user out; start signed out.
                tracing::warn!(path = %self.path.display(), error = %err, "discarding unreadable session file");
                Ok(None)
            }
        }
    }

    fn persist_auth_state(&self, state: &StoredSession) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(state).map_err(io::Error::other)?;
        std::fs::write(&tmp, body)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn clear_auth_state(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use nix::sys::stat::{FchmodatFlags, Mode, fchmodat};
    use std::os::unix::ffi::OsStrExt;

    fchmodat(
        None,
        path.as_os_str().as_bytes(),
        Mode::S_IRUSR | Mode::S_IWUSR,
        FchmodatFlags::FollowSymlink,
    )
    .map_err(io::Error::from)
}

#[cfg(not(unix))]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    tracing::warn!(
        path = %path.display(),
        "session file permissions not restricted on this platform"
    );
    Ok(())
}

/// In-memory backend. Clones share storage, so dropping one `TokenStore` and
/// opening another over a clone behaves like a reload.
#[derive(Debug, Clone, Default)]
pub struct MemoryAuthStore {
    state: Arc<Mutex<Option<StoredSession>>>,
}

impl MemoryAuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StoredSession) -> Self {
        Self {
            state: Arc::new(Mutex::new(Some(state))),
        }
    }

    pub fn stored(&self) -> Option<StoredSession> {
        self.state.lock().clone()
    }
}

impl AuthStateStore for MemoryAuthStore {
    fn load_auth_state(&self) -> io::Result<Option<StoredSession>> {
        Ok(self.state.lock().clone())
    }

    fn persist_auth_state(&self, state: &StoredSession) -> io::Result<()> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    fn clear_auth_state(&self) -> io::Result<()> {
        *self.state.lock() = None;
        Ok(())
    }
}

/// Write-through token cache. Writes are last-write-wins; callers should
/// re-read after every await instead of holding on to a token.
pub struct TokenStore {
    backend: Arc<dyn AuthStateStore>,
    current: RwLock<StoredSession>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.read();
        f.debug_struct("TokenStore")
            .field("has_access_token", &current.access_token.is_some())
            .field("has_refresh_token", &current.refresh_token.is_some())
            .field("user", &current.user.as_ref().map(|u| u.id))
            .finish()
    }
}

impl TokenStore {
    /// Open the store and rehydrate from the backend.
    pub fn open(backend: Arc<dyn AuthStateStore>) -> Result<Self> {
        let current = backend.load_auth_state()?.unwrap_or_default();
        Ok(Self {
            backend,
            current: RwLock::new(current),
        })
    }

    pub fn get(&self) -> TokenPair {
        let current = self.current.read();
        TokenPair {
            access: current.access_token.clone(),
            refresh: current.refresh_token.clone(),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.current.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.current.read().refresh_token.clone()
    }

    pub fn user(&self) -> Option<UserProfile> {
        self.current.read().user.clone()
    }

    pub fn snapshot(&self) -> StoredSession {
        self.current.read().clone()
    }

    /// Store a new access token. `refresh: None` keeps the current refresh token.
    pub fn set(&self, access: impl Into<String>, refresh: Option<String>) -> Result<()> {
        let access = access.into();
        self.write(|state| {
            state.access_token = Some(access);
            if refresh.is_some() {
                state.refresh_token = refresh;
            }
        })
    }

    pub fn set_user(&self, user: Option<UserProfile>) -> Result<()> {
        self.write(|state| state.user = user)
    }

    /// Tokens and profile from a login, persisted in one write.
    pub fn store_login(
        &self,
        access: impl Into<String>,
        refresh: Option<String>,
        user: UserProfile,
    ) -> Result<()> {
        let access = access.into();
        self.write(|state| {
            *state = StoredSession {
                access_token: Some(access),
                refresh_token: refresh,
                user: Some(user),
            };
        })
    }

    /// Drop everything. Returns whether anything was stored.
    pub fn clear(&self) -> Result<bool> {
        let mut current = self.current.write();
        let had_state = !current.is_empty();
        *current = StoredSession::default();
        self.backend.clear_auth_state()?;
        Ok(had_state)
    }

    fn write(&self, update: impl FnOnce(&mut StoredSession)) -> Result<()> {
        // Hold the lock across the write so persisted order matches memory order.
        let mut current = self.current.write();
        update(&mut current);
        self.backend.persist_auth_state(&current)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn profile() -> UserProfile {
        UserProfile {
            id: 1,
            email: "ops@example.com".to_string(),
            name: Some("Ops".to_string()),
            picture: None,
            role: Role::Manager,
            is_active: true,
            is_approved: true,
            is_admin: false,
            can_manage: true,
            can_view_full: true,
            login_count: 3,
            created_at: None,
            updated_at: None,
            last_login: None,
        }
    }

    #[test]
    fn get_reflects_latest_write_across_reloads() {
        let backend = MemoryAuthStore::new();
        let store = TokenStore::open(Arc::new(backend.clone())).expect("open");

        store.set("a1", Some("r1".to_string())).expect("set");
        store.set("a2", None).expect("set");
        assert_eq!(
            store.get(),
            TokenPair {
                access: Some("a2".to_string()),
                refresh: Some("r1".to_string()),
            }
        );

        let reloaded = TokenStore::open(Arc::new(backend.clone())).expect("reopen");
        assert_eq!(reloaded.get(), store.get());

        assert!(store.clear().expect("clear"));
        assert_eq!(store.get(), TokenPair::default());
        assert!(!store.clear().expect("second clear"));

        let reloaded = TokenStore::open(Arc::new(backend)).expect("reopen");
        assert_eq!(reloaded.get(), TokenPair::default());
    }

    #[test]
    fn file_backend_round_trips_login() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("session.json");
        let store = TokenStore::open(Arc::new(FileAuthStore::new(&path))).expect("open");
        store
            .store_login("access", Some("refresh".to_string()), profile())
            .expect("login");

        let reloaded = TokenStore::open(Arc::new(FileAuthStore::new(&path))).expect("reopen");
        assert_eq!(reloaded.user(), Some(profile()));
        assert_eq!(reloaded.refresh_token().as_deref(), Some("refresh"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        reloaded.clear().expect("clear");
        assert!(!path.exists());
    }

    #[test]
    fn corrupt_file_starts_signed_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").expect("write");

        let store = TokenStore::open(Arc::new(FileAuthStore::new(&path))).expect("open");
        assert_eq!(store.snapshot(), StoredSession::default());
    }
}
