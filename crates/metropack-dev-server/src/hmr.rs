//! WebSocket lifecycle for `/hot` and the process-wide client set.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use hyper_tungstenite::{tungstenite::Message, HyperWebsocket};
use metropack_core::error::BuildError;
use metropack_hmr_protocol::{ClientMessage, ServerMessage};
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, info, warn};

/// All connected hot-reload clients. Lives for the whole server process;
/// owners fan updates out through it.
#[derive(Default)]
pub struct ClientRegistry {
    next_id: AtomicU64,
    clients: DashMap<u64, UnboundedSender<ServerMessage>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sender: UnboundedSender<ServerMessage>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients.insert(id, sender);
        id
    }

    pub fn remove(&self, id: u64) {
        self.clients.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Send to every client. A failed send means the client's writer task
    /// is gone; it is dropped from the set so one dead socket never aborts
    /// the fan-out.
    pub fn broadcast(&self, message: &ServerMessage) {
        let mut dead: Vec<u64> = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().send(message.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            self.clients.remove(&id);
        }
    }

    /// Disconnect every client (their writer tasks end once the senders are
    /// gone). Used during shutdown.
    pub fn clear(&self) {
        self.clients.clear();
    }

    fn send_to(&self, id: u64, message: ServerMessage) {
        if let Some(sender) = self.clients.get(&id) {
            let _ = sender.send(message);
        }
    }
}

/// Drive one upgraded `/hot` socket until the client goes away.
pub async fn serve_websocket(websocket: HyperWebsocket, registry: Arc<ClientRegistry>) {
    let stream = match websocket.await {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = stream.split();

    let (tx, mut rx) = unbounded_channel::<ServerMessage>();
    let client_id = registry.insert(tx);
    info!(client_id, clients = registry.len(), "hot client connected");

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(_) => continue,
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => handle_client_message(&registry, client_id, &text),
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    registry.remove(client_id);
    writer.abort();
    info!(client_id, clients = registry.len(), "hot client disconnected");
}

/// Incoming frames. A malformed message is a protocol error: logged and
/// ignored, never a disconnect.
fn handle_client_message(registry: &ClientRegistry, client_id: u64, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::RegisterEntrypoints { entry_points }) => {
            debug!(client_id, ?entry_points, "entrypoints registered");
            registry.send_to(client_id, ServerMessage::BundleRegistered);
        }
        Ok(ClientMessage::Log { level, data }) => {
            debug!(
                client_id,
                level = level.as_deref().unwrap_or("info"),
                data = %data.map(|d| d.to_string()).unwrap_or_default(),
                "client log"
            );
        }
        Ok(ClientMessage::LogOptIn { .. }) => {
            debug!(client_id, "client opted into log forwarding");
        }
        Err(error) => {
            warn!(
                client_id,
                "{}",
                BuildError::Protocol {
                    detail: error.to_string()
                }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_drops_dead_clients() {
        let registry = ClientRegistry::new();
        let (alive_tx, mut alive_rx) = unbounded_channel();
        let (dead_tx, dead_rx) = unbounded_channel();
        registry.insert(alive_tx);
        registry.insert(dead_tx);
        drop(dead_rx);

        registry.broadcast(&ServerMessage::UpdateDone);
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            alive_rx.try_recv().unwrap(),
            ServerMessage::UpdateDone
        ));
    }

    #[test]
    fn malformed_messages_do_not_remove_the_client() {
        let registry = ClientRegistry::new();
        let (tx, mut rx) = unbounded_channel();
        let id = registry.insert(tx);

        handle_client_message(&registry, id, "not json at all");
        assert_eq!(registry.len(), 1);

        handle_client_message(&registry, id, r#"{"type":"register-entrypoints"}"#);
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::BundleRegistered
        ));
    }
}
