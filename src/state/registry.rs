use super::{AppState, SharedRoom};
use crate::error::{GameError, GameResult};
use crate::protocol::{RoomView, ServerMessage};
use crate::types::*;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::room::Room;

/// Safe character set for room codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 5;

/// Generate a random short room code
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Codes are typed by humans, so accept any case and stray whitespace
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

impl AppState {
    /// Create a room with a fresh, unused code
    pub async fn create_room(
        &self,
        world: World,
        intro: Option<String>,
        prompt: Option<String>,
    ) -> RoomView {
        let (code, view, opened) = {
            let mut rooms = self.rooms.write().await;

            let code = loop {
                let code = generate_room_code();
                if !rooms.contains_key(&code) {
                    break code;
                }
                // Collision - try again (rare with 28M combinations)
                tracing::debug!("Room code collision on {}, retrying", code);
            };

            let room = Room::new(code.clone(), world, intro, prompt);
            let view = room.view();
            let opened = ServerMessage::RoomOpened {
                context: room.visible_context(),
                prompt: room.prompt.clone(),
            };
            rooms.insert(code.clone(), Arc::new(Mutex::new(room)));
            (code, view, opened)
        };

        tracing::info!(room = %code, "Room created");
        self.fanout.broadcast(&code, &opened).await;
        view
    }

    /// Look up a room by code
    pub async fn get_room(&self, code: &str) -> GameResult<SharedRoom> {
        let code = normalize_code(code);
        self.rooms
            .read()
            .await
            .get(&code)
            .cloned()
            .ok_or(GameError::RoomNotFound(code))
    }

    pub async fn room_exists(&self, code: &str) -> bool {
        self.get_room(code).await.is_ok()
    }

    /// Public snapshot of a room
    pub async fn room_view(&self, code: &str) -> GameResult<RoomView> {
        let room = self.get_room(code).await?;
        let view = room.lock().await.view();
        Ok(view)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
