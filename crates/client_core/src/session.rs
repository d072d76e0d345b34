//! Signed-in identity, where it is kept between runs, and which routes it
//! unlocks.

use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    domain::UserId,
    protocol::{LoginRequest, RegisterRequest},
};
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    api::ChatBackend,
    error::{ClientError, ClientResult},
};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    pub token: String,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> ClientResult<Option<Session>>;
    async fn save(&self, session: &Session) -> ClientResult<()>;
    async fn clear(&self) -> ClientResult<()>;
}

#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> ClientResult<Option<Session>> {
        Ok(self.session.lock().await.clone())
    }

    async fn save(&self, session: &Session) -> ClientResult<()> {
        *self.session.lock().await = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> ClientResult<()> {
        *self.session.lock().await = None;
        Ok(())
    }
}

/// JSON file holding the token and user id, the desktop stand-in for the
/// browser's cookie pair.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn storage_error(&self, action: &str, err: impl fmt::Display) -> ClientError {
        ClientError::Storage(format!(
            "failed to {action} session file '{}': {err}",
            self.path.display()
        ))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> ClientResult<Option<Session>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.storage_error("read", err)),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| self.storage_error("parse", err))
    }

    async fn save(&self, session: &Session) -> ClientResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| self.storage_error("create parent directory for", err))?;
            }
        }
        let raw =
            serde_json::to_string_pretty(session).map_err(|err| self.storage_error("encode", err))?;
        tokio::fs::write(&self.path, raw)
            .await
            .map_err(|err| self.storage_error("write", err))
    }

    async fn clear(&self) -> ClientResult<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(self.storage_error("remove", err)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
    Register,
    Chat,
    Tasks,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Home => "/",
            Route::Login => "/login",
            Route::Register => "/register",
            Route::Chat => "/chat",
            Route::Tasks => "/tasks",
        }
    }

    /// Matches a path and its sub-paths, e.g. `/chat/u2` is [`Route::Chat`].
    pub fn from_path(path: &str) -> Option<Self> {
        let trimmed = path.trim_end_matches('/');
        if trimmed.is_empty() {
            return Some(Route::Home);
        }
        [Route::Login, Route::Register, Route::Chat, Route::Tasks]
            .into_iter()
            .find(|route| {
                trimmed == route.path()
                    || trimmed
                        .strip_prefix(route.path())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
    }

    pub fn is_protected(self) -> bool {
        matches!(self, Route::Chat | Route::Tasks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    Allow(Route),
    Redirect(Route),
}

pub fn authorize(route: Route, session: Option<&Session>) -> RouteDecision {
    if route.is_protected() && session.is_none() {
        RouteDecision::Redirect(Route::Login)
    } else {
        RouteDecision::Allow(route)
    }
}

/// Login, registration and logout against the backend, persisting the
/// resulting session.
pub struct Authenticator {
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn SessionStore>,
}

impl Authenticator {
    pub fn new(backend: Arc<dyn ChatBackend>, store: Arc<dyn SessionStore>) -> Self {
        Self { backend, store }
    }

    pub async fn login(&self, username: &str, password: &str) -> ClientResult<Session> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ClientError::validation("Username and password are required."));
        }
        let response = self
            .backend
            .login(&LoginRequest {
                username: username.trim().to_string(),
                password: password.to_string(),
            })
            .await?;
        let session = Session {
            user_id: response.user_id,
            token: response.token,
        };
        self.store.save(&session).await?;
        info!(user_id = %session.user_id, "signed in");
        Ok(session)
    }

    pub async fn register(&self, request: RegisterRequest) -> ClientResult<()> {
        let missing = [
            ("lastname", &request.lastname),
            ("firstname", &request.firstname),
            ("username", &request.username),
            ("password", &request.password),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());
        if let Some((field, _)) = missing {
            return Err(ClientError::validation(format!("Field '{field}' is required.")));
        }
        self.backend.register(&request).await?;
        info!(username = %request.username, "registered");
        Ok(())
    }

    /// Clears the stored credential; the caller navigates to the returned
    /// route.
    pub async fn logout(&self) -> ClientResult<Route> {
        self.store.clear().await?;
        info!("signed out");
        Ok(Route::Login)
    }

    pub async fn current(&self) -> ClientResult<Option<Session>> {
        self.store.load().await
    }

    pub async fn require(&self) -> ClientResult<Session> {
        self.current().await?.ok_or(ClientError::MissingCredential)
    }

    pub async fn navigate(&self, path: &str) -> ClientResult<RouteDecision> {
        let route = Route::from_path(path)
            .ok_or_else(|| ClientError::validation(format!("Unknown route '{path}'.")))?;
        let session = self.current().await?;
        Ok(authorize(route, session.as_ref()))
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
