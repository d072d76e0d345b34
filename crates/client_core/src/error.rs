//! Error taxonomy for the client core and its mapping to user-visible text.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("relay is not connected")]
    Disconnected,
    #[error("failed to connect relay at {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("relay did not acknowledge within {0:?}")]
    AckTimeout(std::time::Duration),
    #[error("relay rejected the message: {0}")]
    Rejected(String),
    #[error("relay send failed: {0}")]
    Send(String),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {endpoint} failed with status {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    Validation(String),
    #[error("missing credential: sign in again")]
    MissingCredential,
    #[error("session store failure: {0}")]
    Storage(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(message.into())
    }

    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ClientError::Status { .. } | ClientError::Request { .. }
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::Request { source, .. } => source.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True when the session can no longer be used and the user has to sign
    /// in again.
    pub fn requires_reauth(&self) -> bool {
        matches!(self, ClientError::MissingCredential)
            || matches!(self.status(), Some(401) | Some(403))
    }

    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::MissingCredential => {
                "Missing credential or user not signed in.".to_string()
            }
            ClientError::Status { status: 401, .. } | ClientError::Status { status: 403, .. } => {
                "Session expired; sign in again.".to_string()
            }
            ClientError::Status { status, .. } => {
                format!("Server error (HTTP {status}); please retry.")
            }
            ClientError::Request { source, .. } => {
                if source.is_timeout() {
                    "Server timed out; please retry.".to_string()
                } else if source.is_connect() {
                    "Server unreachable; check URL/network and retry.".to_string()
                } else if source.is_decode() {
                    "Server returned an unexpected response.".to_string()
                } else {
                    "Network error; please retry.".to_string()
                }
            }
            ClientError::Transport(TransportError::Rejected(reason)) => {
                format!("The message could not be sent: {reason}")
            }
            ClientError::Transport(TransportError::AckTimeout(_)) => {
                "The message could not be sent.".to_string()
            }
            ClientError::Transport(_) => "Real-time connection unavailable.".to_string(),
            ClientError::Validation(message) => message.clone(),
            ClientError::Storage(_) => "Could not access the saved session.".to_string(),
        }
    }
}
