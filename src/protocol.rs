use crate::types::*;
use serde::{Deserialize, Serialize};

/// Sent in every welcome so clients can detect a mismatched server
pub const PROTOCOL_VERSION: &str = "1.0";

/// Messages a live client may send on a room channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Free-form table talk, relayed to everyone in the room
    Chat {
        #[serde(default)]
        sender: Option<String>,
        text: String,
    },
    /// Ask for a fresh room snapshot
    Sync,
}

/// Payloads pushed to live clients of a room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        room: RoomView,
        server_now: String,
    },
    RoomOpened {
        context: Vec<ContextTurn>,
        prompt: String,
    },
    PlayersUpdated {
        players: Vec<Player>,
        phase: Phase,
    },
    /// Sent while still collecting actions; never carries action text
    SubmissionProgress {
        submitted_count: usize,
        players_count: usize,
    },
    VotingOpened {
        phase: Phase,
        actions: Vec<Action>,
    },
    /// Running per-choice counts; who voted for what is never broadcast
    VoteTally {
        votes: Vec<u32>,
    },
    VotingClosed {
        phase: Phase,
        votes: Vec<u32>,
        winning_index: usize,
        winning_action: Action,
    },
    RoundAdvanced {
        round: u32,
        context: Vec<ContextTurn>,
        prompt: String,
        phase: Phase,
        total_cost: f64,
    },
    PortraitUpdated {
        player_id: PlayerId,
        portrait_url: String,
    },
    Chat {
        #[serde(skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
        message: String,
    },
    Error {
        code: String,
        msg: String,
    },
}

/// Public snapshot of a room
///
/// Built so that nothing a player submitted this round is visible before voting opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomView {
    pub code: RoomCode,
    pub world: World,
    pub context: Vec<ContextTurn>,
    pub prompt: String,
    pub round: u32,
    pub phase: Phase,
    pub players: Vec<Player>,
    pub submitted_count: usize,
    pub actions: Vec<Action>,
    pub votes: Vec<u32>,
    pub winning_action: Option<Action>,
    pub narrating: bool,
    pub total_cost: f64,
}
