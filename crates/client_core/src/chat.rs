//! Reconciliation between relay deliveries, REST writes, the contact
//! directory and the open conversation.

use std::sync::{Arc, Weak};

use chrono::Utc;
use shared::{
    domain::{Contact, Message, User, UserId, UserRef},
    protocol::{InboundDelivery, OutgoingMessage},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    api::ChatBackend,
    conversation::{ConversationBuffer, LoadTicket},
    directory::ContactDirectory,
    error::{ClientError, ClientResult},
    session::Session,
    transport::{RelayEvent, RelayTransport},
};

#[derive(Debug, Clone)]
pub enum ChatEvent {
    DirectoryUpdated(Vec<Contact>),
    ConversationUpdated {
        peer: UserId,
        messages: Vec<Message>,
    },
    ComposeCleared,
    Error(String),
    ReauthRequired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyMessage,
    NoPeerSelected,
    NoCredential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Sent,
    Skipped(SkipReason),
}

#[derive(Default)]
struct ChatState {
    session: Option<Session>,
    selected_peer: Option<User>,
    buffer: ConversationBuffer,
    compose: String,
    last_error: Option<String>,
}

pub struct ChatController {
    backend: Arc<dyn ChatBackend>,
    transport: Arc<dyn RelayTransport>,
    directory: ContactDirectory,
    inner: Mutex<ChatState>,
    inbound_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ChatEvent>,
}

impl ChatController {
    pub fn new(backend: Arc<dyn ChatBackend>, transport: Arc<dyn RelayTransport>) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            directory: ContactDirectory::new(Arc::clone(&backend)),
            backend,
            transport,
            inner: Mutex::new(ChatState::default()),
            inbound_task: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    /// Binds the controller to `session`: joins the user's relay room,
    /// installs the single `receiveMessage` handler and loads the directory.
    /// A relay failure is not fatal; sends fall back to the HTTP path.
    pub async fn mount(self: &Arc<Self>, session: Session) -> ClientResult<Vec<Contact>> {
        {
            let mut guard = self.inner.lock().await;
            guard.session = Some(session.clone());
            guard.selected_peer = None;
            guard.buffer.clear();
            guard.last_error = None;
        }

        if let Err(err) = self.transport.connect(&session.user_id).await {
            warn!(
                user_id = %session.user_id,
                "chat: relay unavailable, continuing without live delivery: {err}"
            );
        }
        self.install_inbound_handler().await;

        self.refresh_directory().await
    }

    /// Removes the inbound handler. The relay connection itself belongs to the
    /// composition root and stays open.
    pub async fn unmount(&self) {
        self.transport.off(RelayEvent::ReceiveMessage).await;
        if let Some(task) = self.inbound_task.lock().await.take() {
            task.abort();
        }
    }

    /// Unmounts and forgets everything tied to the signed-in user.
    pub async fn sign_out(&self) {
        self.unmount().await;
        {
            let mut guard = self.inner.lock().await;
            *guard = ChatState::default();
        }
        self.directory.clear().await;
        let _ = self.events.send(ChatEvent::ReauthRequired);
    }

    async fn install_inbound_handler(self: &Arc<Self>) {
        let mut rx = self.transport.on(RelayEvent::ReceiveMessage).await;
        let controller: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                controller.handle_inbound(delivery).await;
            }
            debug!("chat: inbound handler closed");
        });
        if let Some(previous) = self.inbound_task.lock().await.replace(task) {
            previous.abort();
        }
    }

    /// Appends the delivery when it comes from the selected peer, then
    /// refreshes the directory exactly once either way.
    pub async fn handle_inbound(&self, delivery: InboundDelivery) {
        {
            let mut guard = self.inner.lock().await;
            let from_selected = guard
                .selected_peer
                .as_ref()
                .is_some_and(|peer| peer.id == delivery.sender_id);
            if from_selected {
                let peer = delivery.sender_id.clone();
                guard.buffer.append(delivery.into_message(Utc::now()));
                let messages = guard.buffer.messages();
                let _ = self
                    .events
                    .send(ChatEvent::ConversationUpdated { peer, messages });
            } else {
                debug!(
                    sender_id = %delivery.sender_id,
                    "chat: delivery for a conversation that is not open"
                );
            }
        }

        if let Err(err) = self.refresh_directory().await {
            warn!("chat: directory refresh after delivery failed: {err}");
        }
    }

    async fn token(&self) -> ClientResult<Session> {
        let session = self.inner.lock().await.session.clone();
        match session {
            Some(session) => Ok(session),
            None => {
                let _ = self.events.send(ChatEvent::ReauthRequired);
                Err(ClientError::MissingCredential)
            }
        }
    }

    async fn report(&self, err: &ClientError) {
        let message = err.user_message();
        self.inner.lock().await.last_error = Some(message.clone());
        let _ = self.events.send(ChatEvent::Error(message));
        if err.requires_reauth() {
            let _ = self.events.send(ChatEvent::ReauthRequired);
        }
    }

    pub async fn refresh_directory(&self) -> ClientResult<Vec<Contact>> {
        let session = self.token().await?;
        match self.directory.refresh(&session.token).await {
            Ok(contacts) => {
                let _ = self
                    .events
                    .send(ChatEvent::DirectoryUpdated(contacts.clone()));
                Ok(contacts)
            }
            Err(err) => {
                self.report(&err).await;
                Err(err)
            }
        }
    }

    /// Opens the conversation with the other participant of `contact`.
    pub async fn select_contact(&self, contact: &Contact) -> ClientResult<()> {
        let session = self.token().await?;
        let peer = contact.peer_of(&session.user_id).clone();
        self.open_conversation(peer).await
    }

    /// Opens a conversation with a user found through search.
    pub async fn start_conversation(&self, user: User) -> ClientResult<()> {
        self.open_conversation(user).await
    }

    async fn open_conversation(&self, peer: User) -> ClientResult<()> {
        let ticket = {
            let mut guard = self.inner.lock().await;
            let ticket = guard.buffer.begin_load(peer.id.clone());
            guard.selected_peer = Some(peer);
            ticket
        };
        self.load(ticket).await.map(|_| ())
    }

    /// Fetches the history for the ticket's peer and applies it if the ticket
    /// is still current. Returns whether the buffer was replaced.
    async fn load(&self, ticket: LoadTicket) -> ClientResult<bool> {
        let session = self.token().await?;
        let messages = match self
            .backend
            .fetch_conversation(&session.token, ticket.peer())
            .await
        {
            Ok(messages) => messages,
            Err(err) => {
                let current = self.inner.lock().await.buffer.is_current(&ticket);
                if current {
                    self.report(&err).await;
                } else {
                    debug!(peer = %ticket.peer(), "chat: stale conversation load failed: {err}");
                }
                return Err(err);
            }
        };

        let mut guard = self.inner.lock().await;
        if !guard.buffer.apply_load(&ticket, messages) {
            debug!(peer = %ticket.peer(), "chat: discarding stale conversation load");
            return Ok(false);
        }
        let _ = self.events.send(ChatEvent::ConversationUpdated {
            peer: ticket.peer().clone(),
            messages: guard.buffer.messages(),
        });
        Ok(true)
    }

    /// Reloads the open conversation, if any.
    pub async fn reload_conversation(&self) -> ClientResult<bool> {
        let ticket = {
            let mut guard = self.inner.lock().await;
            let Some(peer_id) = guard.selected_peer.as_ref().map(|p| p.id.clone()) else {
                return Ok(false);
            };
            guard.buffer.begin_load(peer_id)
        };
        self.load(ticket).await
    }

    pub async fn set_compose(&self, text: impl Into<String>) {
        self.inner.lock().await.compose = text.into();
    }

    pub async fn compose(&self) -> String {
        self.inner.lock().await.compose.clone()
    }

    /// Submits the current compose text.
    pub async fn submit_compose(&self) -> ClientResult<SubmitOutcome> {
        let text = self.compose().await;
        self.submit(&text).await
    }

    /// Sends `text` to the selected peer.
    ///
    /// The relay emission and the HTTP write run concurrently. Only the HTTP
    /// path changes the buffer: a local echo is shown while it is in flight
    /// and is then replaced by a reload of the conversation (or retracted if
    /// the write fails), so a successful send shows up exactly once.
    pub async fn submit(&self, text: &str) -> ClientResult<SubmitOutcome> {
        if text.trim().is_empty() {
            return Ok(SubmitOutcome::Skipped(SkipReason::EmptyMessage));
        }

        let (session, peer, echo) = {
            let mut guard = self.inner.lock().await;
            let Some(session) = guard.session.clone() else {
                let _ = self.events.send(ChatEvent::ReauthRequired);
                return Ok(SubmitOutcome::Skipped(SkipReason::NoCredential));
            };
            let Some(peer) = guard.selected_peer.clone() else {
                return Ok(SubmitOutcome::Skipped(SkipReason::NoPeerSelected));
            };
            let echo = guard.buffer.push_echo(Message {
                sender: UserRef::id(session.user_id.clone()),
                receiver: Some(UserRef::from(&peer)),
                message: text.to_string(),
                created_at: Utc::now(),
            });
            let _ = self.events.send(ChatEvent::ConversationUpdated {
                peer: peer.id.clone(),
                messages: guard.buffer.messages(),
            });
            (session, peer, echo)
        };

        let outgoing = OutgoingMessage {
            sender_id: session.user_id.clone(),
            receiver_id: peer.id.clone(),
            message: text.to_string(),
        };

        let (relay_result, http_result) = tokio::join!(
            self.transport.send_message(&outgoing),
            self.backend.post_message(&session.token, &outgoing)
        );

        match relay_result {
            Ok(_) => debug!(receiver_id = %peer.id, "chat: relay acknowledged message"),
            Err(err) => {
                warn!(receiver_id = %peer.id, "chat: relay emission failed: {err}");
                self.report(&ClientError::from(err)).await;
            }
        }

        if let Err(err) = http_result {
            {
                let mut guard = self.inner.lock().await;
                guard.buffer.retract_echo(echo);
                if guard.buffer.peer() == Some(&peer.id) {
                    let _ = self.events.send(ChatEvent::ConversationUpdated {
                        peer: peer.id.clone(),
                        messages: guard.buffer.messages(),
                    });
                }
            }
            self.report(&err).await;
            return Err(err);
        }

        info!(receiver_id = %peer.id, "chat: message stored");
        let still_selected = {
            let mut guard = self.inner.lock().await;
            guard.compose.clear();
            guard
                .selected_peer
                .as_ref()
                .is_some_and(|selected| selected.id == peer.id)
        };
        let _ = self.events.send(ChatEvent::ComposeCleared);

        if still_selected {
            if let Err(err) = self.reload_conversation().await {
                warn!("chat: reload after send failed: {err}");
            }
        } else {
            // The echo belongs to a buffer that has since been replaced.
            self.inner.lock().await.buffer.retract_echo(echo);
        }
        if let Err(err) = self.refresh_directory().await {
            warn!("chat: directory refresh after send failed: {err}");
        }

        Ok(SubmitOutcome::Sent)
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.directory.contacts().await
    }

    /// Directory entry for the conversation with `peer_id`, if any.
    pub async fn find_contact(&self, peer_id: &UserId) -> Option<Contact> {
        let session = self.inner.lock().await.session.clone()?;
        self.directory.find_by_peer(&session.user_id, peer_id).await
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.buffer.messages()
    }

    pub async fn selected_peer(&self) -> Option<User> {
        self.inner.lock().await.selected_peer.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.lock().await.last_error.clone()
    }

    pub async fn session(&self) -> Option<Session> {
        self.inner.lock().await.session.clone()
    }

    /// Candidates for a new conversation. A blank query returns nothing
    /// without calling the backend.
    pub async fn search_users(&self, query: &str) -> ClientResult<Vec<User>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let session = self.token().await?;
        self.backend
            .search_users(&session.token, query.trim())
            .await
    }

    /// Profile of the signed-in user.
    pub async fn current_user(&self) -> ClientResult<User> {
        let session = self.token().await?;
        self.backend
            .fetch_user(&session.token, &session.user_id)
            .await
    }
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
