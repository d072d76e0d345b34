use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{Message, Task, TaskPriority, TaskStatus, UserId, UserRef, WorkspaceId},
    error::ApiError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub lastname: String,
    pub firstname: String,
    pub username: String,
    pub password: String,
}

/// The `{senderId, receiverId, message}` triple, used both as the `POST
/// /messages` body and as the relay `sendMessage` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWorkspace {
    pub name: String,
    pub description: String,
    /// Assigned by the backend from the bearer token.
    pub owner: String,
    pub members: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub workspace_id: WorkspaceId,
    pub assigned_to: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub due_date: Option<DateTime<Utc>>,
    pub assigned_to: Option<UserId>,
}

impl TaskUpdate {
    /// Full replacement body carrying the task's current fields.
    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            priority: task.priority,
            due_date: task.due_date,
            assigned_to: task.assigned_to.as_ref().map(|user| user.id.clone()),
        }
    }
}

/// Relay acknowledgement for a `sendMessage` emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAck {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of an inbound `receiveMessage` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundDelivery {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl InboundDelivery {
    /// Converts the delivery into a buffer entry, stamping it with
    /// `received_at` when the relay did not provide a timestamp.
    pub fn into_message(self, received_at: DateTime<Utc>) -> Message {
        Message {
            sender: UserRef::id(self.sender_id),
            receiver: Some(UserRef::id(self.receiver_id)),
            message: self.message,
            created_at: self.created_at.unwrap_or(received_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientFrame {
    JoinRoom(UserId),
    SendMessage { ack: u64, message: OutgoingMessage },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum RelayFrame {
    Ack { ack: u64, result: SendAck },
    ReceiveMessage(InboundDelivery),
    Error(ApiError),
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
