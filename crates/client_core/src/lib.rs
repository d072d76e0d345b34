//! Client core for the Zynko messaging and task client: REST backend, relay
//! socket, session handling and the chat and board controllers built on
//! them.

use std::sync::Arc;

use tracing::info;

pub mod api;
pub mod chat;
pub mod config;
pub mod conversation;
pub mod directory;
pub mod error;
pub mod session;
pub mod tasks;
pub mod transport;

pub use api::{ChatBackend, HttpBackend};
pub use chat::{ChatController, ChatEvent, SkipReason, SubmitOutcome};
pub use config::{load_settings, ClientSettings};
pub use error::{ClientError, ClientResult, TransportError};
pub use session::{
    authorize, Authenticator, FileSessionStore, MemorySessionStore, Route, RouteDecision, Session,
    SessionStore,
};
pub use tasks::{Column, TaskBoard};
pub use transport::{RelayEvent, RelayTransport, WebSocketRelay};

/// Owns the process-wide collaborators: one backend client, one relay
/// connection and the session store. Controllers borrow them through `Arc`.
pub struct ClientRuntime {
    backend: Arc<dyn ChatBackend>,
    relay: Arc<dyn RelayTransport>,
    auth: Authenticator,
}

impl ClientRuntime {
    pub fn from_settings(settings: &ClientSettings) -> ClientResult<Self> {
        let backend: Arc<dyn ChatBackend> = Arc::new(HttpBackend::from_settings(settings)?);
        let relay: Arc<dyn RelayTransport> =
            WebSocketRelay::new(settings.relay_url.clone(), settings.ack_timeout);
        let store: Arc<dyn SessionStore> =
            Arc::new(FileSessionStore::new(settings.session_file.clone()));
        Ok(Self::with_dependencies(backend, relay, store))
    }

    pub fn with_dependencies(
        backend: Arc<dyn ChatBackend>,
        relay: Arc<dyn RelayTransport>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            auth: Authenticator::new(Arc::clone(&backend), store),
            backend,
            relay,
        }
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn backend(&self) -> Arc<dyn ChatBackend> {
        Arc::clone(&self.backend)
    }

    pub fn relay(&self) -> Arc<dyn RelayTransport> {
        Arc::clone(&self.relay)
    }

    /// Chat controller mounted for the stored session.
    pub async fn chat(&self) -> ClientResult<Arc<ChatController>> {
        let session = self.auth.require().await?;
        let controller = ChatController::new(self.backend(), self.relay());
        if let Err(err) = controller.mount(session).await {
            controller.unmount().await;
            return Err(err);
        }
        Ok(controller)
    }

    pub async fn tasks(&self) -> ClientResult<TaskBoard> {
        let session = self.auth.require().await?;
        Ok(TaskBoard::new(self.backend(), session))
    }

    /// Drops the relay connection and the stored credential.
    pub async fn logout(&self) -> ClientResult<Route> {
        self.relay.disconnect().await;
        self.auth.logout().await
    }

    pub async fn shutdown(&self) {
        self.relay.disconnect().await;
        info!("client runtime stopped");
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;

#[cfg(test)]
#[path = "tests/runtime_tests.rs"]
mod tests;
