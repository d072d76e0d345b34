//! Relay transport: one persistent WebSocket per process, shared by every
//! controller through `Arc<dyn RelayTransport>`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use shared::{
    domain::{Message, UserId},
    protocol::{ClientFrame, InboundDelivery, OutgoingMessage, RelayFrame, SendAck},
};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Inbound relay events a controller can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayEvent {
    ReceiveMessage,
}

#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Opens the connection if needed and joins the per-user room. Calling it
    /// again on a live connection re-joins the same room.
    async fn connect(&self, user_id: &UserId) -> Result<(), TransportError>;

    /// Emits `sendMessage` and waits for the relay ack. Returns the stored
    /// message when the relay echoes it back.
    async fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> Result<Option<Message>, TransportError>;

    /// Installs the single handler for `event`, replacing (and closing) any
    /// previous one.
    async fn on(&self, event: RelayEvent) -> mpsc::UnboundedReceiver<InboundDelivery>;

    async fn off(&self, event: RelayEvent);

    async fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

type AckTable = Mutex<HashMap<u64, oneshot::Sender<SendAck>>>;
type HandlerTable = Mutex<HashMap<RelayEvent, mpsc::UnboundedSender<InboundDelivery>>>;

struct RelayShared {
    connected: AtomicBool,
    pending_acks: AckTable,
    handlers: HandlerTable,
}

struct RelayConnection {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub struct WebSocketRelay {
    url: String,
    ack_timeout: Duration,
    next_ack: AtomicU64,
    shared: Arc<RelayShared>,
    connection: Mutex<Option<RelayConnection>>,
}

impl WebSocketRelay {
    pub fn new(url: impl Into<String>, ack_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            ack_timeout,
            next_ack: AtomicU64::new(1),
            shared: Arc::new(RelayShared {
                connected: AtomicBool::new(false),
                pending_acks: Mutex::new(HashMap::new()),
                handlers: Mutex::new(HashMap::new()),
            }),
            connection: Mutex::new(None),
        })
    }

    async fn open(&self) -> Result<RelayConnection, TransportError> {
        let (ws_stream, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|err| TransportError::Connect {
                    url: self.url.clone(),
                    reason: err.to_string(),
                })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!("relay: failed to encode frame: {err}");
                        continue;
                    }
                };
                if let Err(err) = ws_writer.send(WsMessage::Text(text)).await {
                    warn!("relay: send failed: {err}");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let shared = Arc::clone(&self.shared);
        shared.connected.store(true, Ordering::SeqCst);
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<RelayFrame>(&text) {
                        Ok(frame) => shared.dispatch(frame).await,
                        Err(err) => warn!("relay: invalid frame: {err}"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!("relay: receive failed: {err}");
                        break;
                    }
                }
            }
            shared.connected.store(false, Ordering::SeqCst);
            // Dropping the senders wakes every waiter with `Disconnected`.
            shared.pending_acks.lock().await.clear();
            info!("relay: disconnected");
        });

        info!(url = %self.url, "relay: connected");
        Ok(RelayConnection {
            outbound,
            reader,
            writer,
        })
    }

    async fn emit(&self, frame: ClientFrame) -> Result<(), TransportError> {
        let guard = self.connection.lock().await;
        let connection = guard.as_ref().ok_or(TransportError::Disconnected)?;
        connection
            .outbound
            .send(frame)
            .map_err(|_| TransportError::Disconnected)
    }
}

impl RelayShared {
    async fn dispatch(&self, frame: RelayFrame) {
        match frame {
            RelayFrame::Ack { ack, result } => {
                let waiter = self.pending_acks.lock().await.remove(&ack);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(result);
                    }
                    None => debug!(ack, "relay: ack for unknown or expired emission"),
                }
            }
            RelayFrame::ReceiveMessage(delivery) => {
                let mut handlers = self.handlers.lock().await;
                if let Some(tx) = handlers.get(&RelayEvent::ReceiveMessage) {
                    if tx.send(delivery).is_err() {
                        handlers.remove(&RelayEvent::ReceiveMessage);
                    }
                } else {
                    debug!("relay: receiveMessage without handler");
                }
            }
            RelayFrame::Error(err) => {
                warn!(message = %err.message, "relay: error event");
            }
        }
    }
}

#[async_trait]
impl RelayTransport for WebSocketRelay {
    async fn connect(&self, user_id: &UserId) -> Result<(), TransportError> {
        {
            let mut guard = self.connection.lock().await;
            let live = guard.is_some() && self.is_connected();
            if !live {
                if let Some(stale) = guard.take() {
                    stale.reader.abort();
                    stale.writer.abort();
                }
                *guard = Some(self.open().await?);
            }
        }
        self.emit(ClientFrame::JoinRoom(user_id.clone())).await?;
        info!(user_id = %user_id, "relay: joined room");
        Ok(())
    }

    async fn send_message(
        &self,
        message: &OutgoingMessage,
    ) -> Result<Option<Message>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let ack = self.next_ack.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared.pending_acks.lock().await.insert(ack, tx);

        if let Err(err) = self
            .emit(ClientFrame::SendMessage {
                ack,
                message: message.clone(),
            })
            .await
        {
            self.shared.pending_acks.lock().await.remove(&ack);
            return Err(err);
        }

        let result = match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => return Err(TransportError::Disconnected),
            Err(_) => {
                self.shared.pending_acks.lock().await.remove(&ack);
                return Err(TransportError::AckTimeout(self.ack_timeout));
            }
        };

        if result.success {
            Ok(result.message)
        } else {
            Err(TransportError::Rejected(
                result
                    .error
                    .unwrap_or_else(|| "message not sent".to_string()),
            ))
        }
    }

    async fn on(&self, event: RelayEvent) -> mpsc::UnboundedReceiver<InboundDelivery> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.shared.handlers.lock().await.insert(event, tx).is_some() {
            debug!(?event, "relay: replaced existing handler");
        }
        rx
    }

    async fn off(&self, event: RelayEvent) {
        self.shared.handlers.lock().await.remove(&event);
    }

    async fn disconnect(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            // Closing the outbound queue lets the writer send a close frame.
            drop(connection.outbound);
            let _ = connection.writer.await;
            connection.reader.abort();
        }
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.pending_acks.lock().await.clear();
        self.shared.handlers.lock().await.clear();
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
