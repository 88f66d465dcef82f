//! Per-room fan-out of live updates

use crate::protocol::ServerMessage;
use crate::types::{RoomCode, SubscriberId};
use axum::extract::ws::Utf8Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

pub type Subscription = mpsc::UnboundedReceiver<Utf8Bytes>;

/// Connected live clients, grouped by room code
#[derive(Clone, Default)]
pub struct Fanout {
    rooms: Arc<RwLock<HashMap<RoomCode, HashMap<SubscriberId, mpsc::UnboundedSender<Utf8Bytes>>>>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber for a room
    pub async fn subscribe(&self, code: &str) -> (SubscriberId, Subscription) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ulid::Ulid::new().to_string();

        self.rooms
            .write()
            .await
            .entry(code.to_string())
            .or_default()
            .insert(id.clone(), tx);

        tracing::debug!(room = code, subscriber = %id, "Subscriber added");
        (id, rx)
    }

    pub async fn unsubscribe(&self, code: &str, id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(subscribers) = rooms.get_mut(code) {
            subscribers.remove(id);
            if subscribers.is_empty() {
                rooms.remove(code);
            }
        }
        tracing::debug!(room = code, subscriber = id, "Subscriber removed");
    }

    pub async fn subscriber_count(&self, code: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(code)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Deliver a message to every subscriber of a room.
    ///
    /// The payload is serialized once. Subscribers whose connection is gone are skipped.
    /// Returns the number of subscribers the message was handed to.
    pub async fn broadcast(&self, code: &str, msg: &ServerMessage) -> usize {
        let json = match serde_json::to_string(msg) {
            Ok(json) => Utf8Bytes::from(json),
            Err(e) => {
                tracing::error!(room = code, "Failed to serialize broadcast: {}", e);
                return 0;
            }
        };

        let rooms = self.rooms.read().await;
        let Some(subscribers) = rooms.get(code) else {
            return 0;
        };

        let mut delivered = 0;
        for (id, tx) in subscribers {
            if tx.send(json.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(room = code, subscriber = %id, "Skipping closed subscriber");
            }
        }
        delivered
    }
}
