mod player;
mod registry;
pub mod room;
mod round;

use crate::broadcast::Fanout;
use crate::llm::{LlmConfig, LlmProvider, PortraitProvider, Providers};
use crate::types::RoomCode;
use room::Room;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub use registry::{generate_room_code, normalize_code};
pub use player::NewPlayer;
pub use room::{NarrationJob, PortraitJob, SubmitOutcome, VoteOutcome};

/// A room behind its own lock, so different rooms never wait on each other
pub type SharedRoom = Arc<Mutex<Room>>;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub rooms: Arc<RwLock<HashMap<RoomCode, SharedRoom>>>,
    /// Live clients per room
    pub fanout: Fanout,
    /// Narration gateway (None if no provider is configured)
    pub narrator: Option<Arc<dyn LlmProvider>>,
    /// Portrait generator (None if no provider is configured)
    pub portraits: Option<Arc<dyn PortraitProvider>>,
    pub llm_config: LlmConfig,
}

impl AppState {
    pub fn new() -> Self {
        Self::new_with_providers(Providers::default(), LlmConfig::default())
    }

    pub fn new_with_providers(providers: Providers, llm_config: LlmConfig) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            fanout: Fanout::new(),
            narrator: providers.narrator,
            portraits: providers.portraits,
            llm_config,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
