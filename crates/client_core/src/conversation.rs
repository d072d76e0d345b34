//! Ordered message buffer for the open conversation.
//!
//! Every load takes a [`LoadTicket`]; a response is applied only when its
//! ticket is still the latest one, so a slow response for a previously
//! selected peer can never overwrite the current buffer.

use shared::domain::{Message, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    peer: UserId,
    generation: u64,
}

impl LoadTicket {
    pub fn peer(&self) -> &UserId {
        &self.peer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoId(u64);

#[derive(Debug, Clone)]
struct BufferEntry {
    message: Message,
    echo: Option<EchoId>,
}

#[derive(Debug, Default)]
pub struct ConversationBuffer {
    peer: Option<UserId>,
    generation: u64,
    next_echo: u64,
    entries: Vec<BufferEntry>,
}

impl ConversationBuffer {
    pub fn peer(&self) -> Option<&UserId> {
        self.peer.as_ref()
    }

    /// Starts a load for `peer`. Switching peers empties the buffer right away.
    pub fn begin_load(&mut self, peer: UserId) -> LoadTicket {
        if self.peer.as_ref() != Some(&peer) {
            self.entries.clear();
            self.peer = Some(peer.clone());
        }
        self.generation += 1;
        LoadTicket {
            peer,
            generation: self.generation,
        }
    }

    pub fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation && self.peer.as_ref() == Some(&ticket.peer)
    }

    /// Replaces the buffer with `messages` if `ticket` is still current.
    /// Pending local echoes are dropped: the backend list is authoritative.
    pub fn apply_load(&mut self, ticket: &LoadTicket, messages: Vec<Message>) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        self.entries = messages
            .into_iter()
            .map(|message| BufferEntry {
                message,
                echo: None,
            })
            .collect();
        true
    }

    pub fn append(&mut self, message: Message) {
        self.entries.push(BufferEntry {
            message,
            echo: None,
        });
    }

    /// Appends a not-yet-confirmed local copy of an outgoing message.
    pub fn push_echo(&mut self, message: Message) -> EchoId {
        self.next_echo += 1;
        let id = EchoId(self.next_echo);
        self.entries.push(BufferEntry {
            message,
            echo: Some(id),
        });
        id
    }

    pub fn retract_echo(&mut self, id: EchoId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.echo != Some(id));
        before != self.entries.len()
    }

    pub fn pending_echoes(&self) -> usize {
        self.entries.iter().filter(|e| e.echo.is_some()).count()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.entries.iter().map(|e| e.message.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.peer = None;
        self.generation += 1;
        self.entries.clear();
    }
}
