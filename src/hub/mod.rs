//! Status broadcast hub
//!
//! Every registered connection owns an outbound queue. Publishing fans a
//! message out to all connections except the origin; clients filter by
//! `channel` themselves.

pub mod client;
pub mod server;

use crate::status::StatusSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identifies one live subscriber connection
pub type ConnectionId = Uuid;

/// Message type tag of status broadcasts
pub const STATUS_MESSAGE_TYPE: &str = "status";

/// Wire envelope for status broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub channel: String,
    pub payload: StatusSnapshot,
}

impl StatusMessage {
    pub fn new(channel: &str, payload: StatusSnapshot) -> Self {
        Self {
            kind: STATUS_MESSAGE_TYPE.to_string(),
            channel: channel.to_string(),
            payload,
        }
    }
}

/// Handshake sent to every new connection
pub fn handshake() -> String {
    serde_json::json!({ "status": "Connected" }).to_string()
}

/// Broker owning the set of live connections
#[derive(Default)]
pub struct Hub {
    connections: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<String>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. The returned receiver yields every message routed to
    /// it, starting with the handshake.
    pub fn register(&self) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();

        // Receiver is alive, so this cannot fail
        let _ = tx.send(handshake());

        self.connections.lock().unwrap().insert(id, tx);
        tracing::debug!("Hub connection {} registered", id);
        (id, rx)
    }

    pub fn unregister(&self, id: ConnectionId) {
        if self.connections.lock().unwrap().remove(&id).is_some() {
            tracing::debug!("Hub connection {} unregistered", id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Broadcast a status snapshot for `channel`. Returns how many
    /// connections accepted the message.
    pub fn publish(
        &self,
        channel: &str,
        snapshot: &StatusSnapshot,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let message = StatusMessage::new(channel, snapshot.clone());
        match serde_json::to_string(&message) {
            Ok(text) => self.send_all(&text, exclude),
            Err(e) => {
                tracing::error!("Failed to serialize status for {}: {}", channel, e);
                0
            }
        }
    }

    /// Forward a raw message from one connection to all the others
    pub fn relay(&self, raw: &str, from: ConnectionId) -> usize {
        self.send_all(raw, Some(from))
    }

    fn send_all(&self, text: &str, exclude: Option<ConnectionId>) -> usize {
        // Snapshot the targets so membership can change while we send
        let targets: Vec<(ConnectionId, mpsc::UnboundedSender<String>)> = self
            .connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| Some(**id) != exclude)
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in targets {
            match tx.send(text.to_string()) {
                Ok(()) => delivered += 1,
                Err(_) => tracing::debug!("Hub connection {} is gone, skipping", id),
            }
        }
        delivered
    }
}
