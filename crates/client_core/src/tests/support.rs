//! Recording fakes for the backend and relay seams.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{
        Contact, ContactId, Message, Task, TaskId, User, UserId, UserRef, Workspace, WorkspaceId,
    },
    protocol::{
        InboundDelivery, LoginRequest, LoginResponse, NewWorkspace, OutgoingMessage,
        RegisterRequest, TaskDraft, TaskUpdate,
    },
};
use tokio::sync::mpsc;

use crate::{
    api::ChatBackend,
    error::{ClientError, ClientResult, TransportError},
    transport::{RelayEvent, RelayTransport},
};

pub const TOKEN: &str = "token-1";

pub fn user(id: &str, username: &str) -> User {
    User {
        id: UserId::new(id),
        username: username.to_string(),
        firstname: username.to_string(),
        lastname: "Doe".to_string(),
        created_at: None,
    }
}

pub fn message(sender: &str, text: &str) -> Message {
    Message {
        sender: UserRef::id(UserId::new(sender)),
        receiver: None,
        message: text.to_string(),
        created_at: "2024-01-01T00:00:00Z".parse().expect("timestamp"),
    }
}

pub fn contact(id: &str, sender: &User, receiver: &User, last: &str) -> Contact {
    Contact {
        id: ContactId::new(id),
        sender: sender.clone(),
        receiver: receiver.clone(),
        last_message: last.to_string(),
        last_message_time: None,
    }
}

pub fn delivery(from: &str, to: &str, text: &str) -> InboundDelivery {
    InboundDelivery {
        sender_id: UserId::new(from),
        receiver_id: UserId::new(to),
        message: text.to_string(),
        created_at: None,
    }
}

fn failure(endpoint: &str, status: u16) -> ClientError {
    ClientError::Status {
        endpoint: endpoint.to_string(),
        status,
        message: "injected failure".to_string(),
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub contacts: Mutex<Vec<Contact>>,
    pub conversations: Mutex<HashMap<UserId, Vec<Message>>>,
    pub conversation_delays: Mutex<HashMap<UserId, Duration>>,
    pub conversation_failures: Mutex<HashMap<UserId, u16>>,
    pub users: Mutex<Vec<User>>,
    pub workspaces: Mutex<Vec<Workspace>>,
    pub tasks: Mutex<Vec<Task>>,
    pub posted_messages: Mutex<Vec<OutgoingMessage>>,
    pub updated_tasks: Mutex<Vec<(TaskId, TaskUpdate)>>,
    pub created_workspaces: Mutex<Vec<NewWorkspace>>,
    pub failures: Mutex<HashMap<&'static str, u16>>,
    calls: Mutex<Vec<&'static str>>,
}

impl FakeBackend {
    pub fn fail(&self, op: &'static str, status: u16) {
        self.failures.lock().expect("lock").insert(op, status);
    }

    pub fn recover(&self, op: &'static str) {
        self.failures.lock().expect("lock").remove(op);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter(|c| **c == op)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    pub fn set_contacts(&self, contacts: Vec<Contact>) {
        *self.contacts.lock().expect("lock") = contacts;
    }

    pub fn set_conversation(&self, peer: &str, messages: Vec<Message>) {
        self.conversations
            .lock()
            .expect("lock")
            .insert(UserId::new(peer), messages);
    }

    pub fn delay_conversation(&self, peer: &str, delay: Duration) {
        self.conversation_delays
            .lock()
            .expect("lock")
            .insert(UserId::new(peer), delay);
    }

    /// Fails history fetches for `peer` only, after any configured delay.
    pub fn fail_conversation(&self, peer: &str, status: u16) {
        self.conversation_failures
            .lock()
            .expect("lock")
            .insert(UserId::new(peer), status);
    }

    fn record(&self, op: &'static str) -> ClientResult<()> {
        self.calls.lock().expect("lock").push(op);
        match self.failures.lock().expect("lock").get(op) {
            Some(status) => Err(failure(op, *status)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn login(&self, request: &LoginRequest) -> ClientResult<LoginResponse> {
        self.record("login")?;
        Ok(LoginResponse {
            token: TOKEN.to_string(),
            user_id: UserId::new(format!("id-{}", request.username)),
        })
    }

    async fn register(&self, _request: &RegisterRequest) -> ClientResult<()> {
        self.record("register")
    }

    async fn fetch_contacts(&self, _token: &str) -> ClientResult<Vec<Contact>> {
        self.record("fetch_contacts")?;
        Ok(self.contacts.lock().expect("lock").clone())
    }

    async fn fetch_conversation(
        &self,
        _token: &str,
        peer_id: &UserId,
    ) -> ClientResult<Vec<Message>> {
        self.record("fetch_conversation")?;
        // Snapshot before sleeping so a delayed response reflects request time.
        let messages = self
            .conversations
            .lock()
            .expect("lock")
            .get(peer_id)
            .cloned()
            .unwrap_or_default();
        let delay = self
            .conversation_delays
            .lock()
            .expect("lock")
            .get(peer_id)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let failure_status = self
            .conversation_failures
            .lock()
            .expect("lock")
            .get(peer_id)
            .copied();
        if let Some(status) = failure_status {
            return Err(failure("fetch_conversation", status));
        }
        Ok(messages)
    }

    async fn post_message(
        &self,
        _token: &str,
        outgoing: &OutgoingMessage,
    ) -> ClientResult<Message> {
        self.record("post_message")?;
        self.posted_messages
            .lock()
            .expect("lock")
            .push(outgoing.clone());
        let stored = Message {
            sender: UserRef::id(outgoing.sender_id.clone()),
            receiver: Some(UserRef::id(outgoing.receiver_id.clone())),
            message: outgoing.message.clone(),
            created_at: Utc::now(),
        };
        self.conversations
            .lock()
            .expect("lock")
            .entry(outgoing.receiver_id.clone())
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn search_users(&self, _token: &str, query: &str) -> ClientResult<Vec<User>> {
        self.record("search_users")?;
        let query = query.to_ascii_lowercase();
        Ok(self
            .users
            .lock()
            .expect("lock")
            .iter()
            .filter(|u| u.username.to_ascii_lowercase().contains(&query))
            .cloned()
            .collect())
    }

    async fn fetch_user(&self, _token: &str, user_id: &UserId) -> ClientResult<User> {
        self.record("fetch_user")?;
        self.users
            .lock()
            .expect("lock")
            .iter()
            .find(|u| &u.id == user_id)
            .cloned()
            .ok_or_else(|| failure("fetch_user", 404))
    }

    async fn list_users(&self, _token: &str) -> ClientResult<Vec<User>> {
        self.record("list_users")?;
        Ok(self.users.lock().expect("lock").clone())
    }

    async fn fetch_workspaces(&self, _token: &str) -> ClientResult<Vec<Workspace>> {
        self.record("fetch_workspaces")?;
        Ok(self.workspaces.lock().expect("lock").clone())
    }

    async fn create_workspace(
        &self,
        _token: &str,
        workspace: &NewWorkspace,
    ) -> ClientResult<Workspace> {
        self.record("create_workspace")?;
        self.created_workspaces
            .lock()
            .expect("lock")
            .push(workspace.clone());
        let created = Workspace {
            id: WorkspaceId::new(format!("w-{}", workspace.name)),
            name: workspace.name.clone(),
            description: workspace.description.clone(),
            owner: None,
            members: workspace.members.iter().cloned().map(UserRef::id).collect(),
        };
        self.workspaces.lock().expect("lock").push(created.clone());
        Ok(created)
    }

    async fn fetch_tasks(
        &self,
        _token: &str,
        workspace_id: &WorkspaceId,
    ) -> ClientResult<Vec<Task>> {
        self.record("fetch_tasks")?;
        Ok(self
            .tasks
            .lock()
            .expect("lock")
            .iter()
            .filter(|t| &t.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn create_task(&self, _token: &str, draft: &TaskDraft) -> ClientResult<Task> {
        self.record("create_task")?;
        let mut tasks = self.tasks.lock().expect("lock");
        let task = Task {
            id: TaskId::new(format!("t{}", tasks.len() + 1)),
            title: draft.title.clone(),
            description: draft.description.clone(),
            status: draft.status,
            priority: draft.priority,
            due_date: draft.due_date,
            workspace_id: draft.workspace_id.clone(),
            assigned_to: draft.assigned_to.clone().map(UserRef::id),
        };
        tasks.push(task.clone());
        Ok(task)
    }

    async fn update_task(
        &self,
        _token: &str,
        task_id: &TaskId,
        update: &TaskUpdate,
    ) -> ClientResult<Task> {
        self.record("update_task")?;
        self.updated_tasks
            .lock()
            .expect("lock")
            .push((task_id.clone(), update.clone()));
        let mut tasks = self.tasks.lock().expect("lock");
        let task = tasks
            .iter_mut()
            .find(|t| &t.id == task_id)
            .ok_or_else(|| failure("update_task", 404))?;
        task.title = update.title.clone();
        task.description = update.description.clone();
        task.status = update.status;
        task.priority = update.priority;
        task.due_date = update.due_date;
        task.assigned_to = update.assigned_to.clone().map(UserRef::id);
        Ok(task.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckBehavior {
    Accept,
    Reject(String),
    Unavailable,
}

pub struct FakeRelay {
    connected: AtomicBool,
    pub ack: Mutex<AckBehavior>,
    pub joined: Mutex<Vec<UserId>>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    handler: Mutex<Option<mpsc::UnboundedSender<InboundDelivery>>>,
    pub on_calls: Mutex<usize>,
    pub off_calls: Mutex<usize>,
}

impl Default for FakeRelay {
    fn default() -> Self {
        Self {
            connected: AtomicBool::new(false),
            ack: Mutex::new(AckBehavior::Accept),
            joined: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            handler: Mutex::new(None),
            on_calls: Mutex::new(0),
            off_calls: Mutex::new(0),
        }
    }
}

impl FakeRelay {
    pub fn with_ack(ack: AckBehavior) -> Self {
        let relay = Self::default();
        *relay.ack.lock().expect("lock") = ack;
        relay
    }

    /// Pushes an inbound delivery to the installed handler, if any.
    pub fn deliver(&self, delivery: InboundDelivery) -> bool {
        self.handler
            .lock()
            .expect("lock")
            .as_ref()
            .is_some_and(|tx| tx.send(delivery).is_ok())
    }

    pub fn has_handler(&self) -> bool {
        self.handler
            .lock()
            .expect("lock")
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl RelayTransport for FakeRelay {
    async fn connect(&self, user_id: &UserId) -> Result<(), TransportError> {
        if *self.ack.lock().expect("lock") == AckBehavior::Unavailable {
            return Err(TransportError::Connect {
                url: "ws://fake".to_string(),
                reason: "refused".to_string(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        self.joined.lock().expect("lock").push(user_id.clone());
        Ok(())
    }

    async fn send_message(
        &self,
        outgoing: &OutgoingMessage,
    ) -> Result<Option<Message>, TransportError> {
        let ack = self.ack.lock().expect("lock").clone();
        match ack {
            AckBehavior::Unavailable => Err(TransportError::Disconnected),
            AckBehavior::Reject(reason) => {
                self.sent.lock().expect("lock").push(outgoing.clone());
                Err(TransportError::Rejected(reason))
            }
            AckBehavior::Accept => {
                self.sent.lock().expect("lock").push(outgoing.clone());
                Ok(Some(Message {
                    sender: UserRef::id(outgoing.sender_id.clone()),
                    receiver: Some(UserRef::id(outgoing.receiver_id.clone())),
                    message: outgoing.message.clone(),
                    created_at: Utc::now(),
                }))
            }
        }
    }

    async fn on(&self, _event: RelayEvent) -> mpsc::UnboundedReceiver<InboundDelivery> {
        *self.on_calls.lock().expect("lock") += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        *self.handler.lock().expect("lock") = Some(tx);
        rx
    }

    async fn off(&self, _event: RelayEvent) {
        *self.off_calls.lock().expect("lock") += 1;
        self.handler.lock().expect("lock").take();
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.handler.lock().expect("lock").take();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
