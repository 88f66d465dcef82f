use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque ID types for type safety
pub type RoomCode = String;
pub type PlayerId = String;
pub type SubscriberId = String;

/// Free-form structured data passed through to AI providers untouched
pub type World = Map<String, Value>;
pub type CharacterDetails = Map<String, Value>;

/// Maximum number of portrait regenerations a player may request
pub const MAX_PORTRAIT_ATTEMPTS: u32 = 3;

/// Maximum length of a submitted action, in characters
pub const MAX_ACTION_CHARS: usize = 500;

pub const DEFAULT_PROMPT: &str = "Welcome to the quest.";
pub const NEXT_ROUND_PROMPT: &str = "What do you do now?";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Submitting,
    Voting,
    PostVote,
}

impl Phase {
    /// The only phase this one may move to
    pub fn next(self) -> Phase {
        match self {
            Phase::Submitting => Phase::Voting,
            Phase::Voting => Phase::PostVote,
            Phase::PostVote => Phase::Submitting,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Submitting => "SUBMITTING",
            Phase::Voting => "VOTING",
            Phase::PostVote => "POST_VOTE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stats {
    pub strength: u32,
    pub dexterity: u32,
    pub intelligence: u32,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            intelligence: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterSheet {
    pub stats: Stats,
    pub inventory: Vec<String>,
    /// Whatever the client sent at join; never inspected by the server
    #[serde(default)]
    pub details: CharacterDetails,
    /// Free-text appearance description used for portrait prompts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portrait_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub character: CharacterSheet,
    pub portrait_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Sender {
    Narrator,
    Player { id: PlayerId, name: String },
    System,
}

/// One entry of a room's story
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextTurn {
    pub sender: Sender,
    pub text: String,
    /// Round the turn was recorded in
    pub round: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Action {
    pub player_id: PlayerId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub player_id: PlayerId,
    pub choice: usize,
}
