//! Contact directory cache. The only way to change it is a full refresh.

use std::sync::Arc;

use shared::domain::{Contact, UserId};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{api::ChatBackend, error::ClientResult};

pub struct ContactDirectory {
    backend: Arc<dyn ChatBackend>,
    contacts: RwLock<Vec<Contact>>,
}

impl ContactDirectory {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self {
            backend,
            contacts: RwLock::new(Vec::new()),
        }
    }

    /// Fetches the directory and replaces the cached list wholesale. On error
    /// the previous list is left untouched.
    pub async fn refresh(&self, token: &str) -> ClientResult<Vec<Contact>> {
        let contacts = self.backend.fetch_contacts(token).await?;
        debug!(count = contacts.len(), "directory refreshed");
        *self.contacts.write().await = contacts.clone();
        Ok(contacts)
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.contacts.read().await.clone()
    }

    /// Directory entry for the conversation with `peer_id`, if any.
    pub async fn find_by_peer(&self, self_id: &UserId, peer_id: &UserId) -> Option<Contact> {
        self.contacts
            .read()
            .await
            .iter()
            .find(|contact| &contact.peer_of(self_id).id == peer_id)
            .cloned()
    }

    pub async fn clear(&self) {
        self.contacts.write().await.clear();
    }
}
