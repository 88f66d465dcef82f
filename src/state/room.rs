//! Per-room state machine
//!
//! Every method here is synchronous and runs while the caller holds the room's lock,
//! so each one is a single atomic step against the room.

use crate::error::{GameError, GameResult};
use crate::protocol::{RoomView, ServerMessage};
use crate::types::*;
use indexmap::IndexMap;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct Room {
    pub code: RoomCode,
    pub world: World,
    pub context: Vec<ContextTurn>,
    pub prompt: String,
    pub round: u32,
    pub players: IndexMap<PlayerId, Player>,
    pub phase: Phase,
    pub actions: Vec<Action>,
    pub submitted_players: HashSet<PlayerId>,
    pub votes: Vec<Vote>,
    pub winning_action: Option<Action>,
    pub total_cost: f64,
    pub created_at: String,
    narrating: bool,
}

/// Result of a successful action submission
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Collecting { submitted: usize, total: usize },
    VotingOpened { actions: Vec<Action> },
}

/// Result of a successful vote
#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    Counting {
        tally: Vec<u32>,
    },
    Closed {
        tally: Vec<u32>,
        winning_index: usize,
        winning_action: Action,
    },
}

/// Everything the narrator needs, captured while the room was locked
#[derive(Debug, Clone)]
pub struct NarrationJob {
    pub world: World,
    pub story: String,
    pub winning_action: Action,
}

/// Everything the portrait generator needs for a regeneration
#[derive(Debug, Clone)]
pub struct PortraitJob {
    pub player_name: String,
    pub descriptor: String,
    pub world: World,
    pub attempts_remaining: u32,
}

/// Index of the first choice holding the maximum count
pub fn winning_index(tally: &[u32]) -> Option<usize> {
    let max = *tally.iter().max()?;
    tally.iter().position(|&count| count == max)
}

/// Trim a display name, rejecting blank ones
pub fn validate_name(name: &str) -> GameResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GameError::InvalidInput("Name must not be empty".to_string()));
    }
    Ok(name)
}

impl Room {
    pub fn new(code: RoomCode, world: World, intro: Option<String>, prompt: Option<String>) -> Self {
        let mut context = Vec::new();
        if let Some(text) = intro.filter(|t| !t.trim().is_empty()) {
            context.push(ContextTurn {
                sender: Sender::Narrator,
                text,
                round: 1,
            });
        }

        Self {
            code,
            world,
            context,
            prompt: prompt
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            round: 1,
            players: IndexMap::new(),
            phase: Phase::Submitting,
            actions: Vec::new(),
            submitted_players: HashSet::new(),
            votes: Vec::new(),
            winning_action: None,
            total_cost: 0.0,
            created_at: chrono::Utc::now().to_rfc3339(),
            narrating: false,
        }
    }

    pub fn is_narrating(&self) -> bool {
        self.narrating
    }

    fn expect_phase(&self, expected: Phase) -> GameResult<()> {
        if self.phase != expected {
            return Err(GameError::WrongPhase {
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    fn player(&self, player_id: &str) -> GameResult<&Player> {
        self.players
            .get(player_id)
            .ok_or_else(|| GameError::UnknownPlayer(player_id.to_string()))
    }

    fn transition(&mut self, to: Phase) {
        debug_assert_eq!(self.phase.next(), to, "phase may only move forward");
        tracing::info!(room = %self.code, from = %self.phase, to = %to, "Phase transition");
        self.phase = to;
    }

    fn push_turn(&mut self, sender: Sender, text: String) {
        self.context.push(ContextTurn {
            sender,
            text,
            round: self.round,
        });
    }

    pub fn add_cost(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.total_cost += cost;
        }
    }

    /// Add a player. Allowed in every phase, including mid-round.
    ///
    /// A late joiner counts towards the "everyone submitted" and "everyone voted" checks
    /// from now on, so a round can wait on them indefinitely.
    pub fn join(
        &mut self,
        name: &str,
        details: CharacterDetails,
        descriptor: Option<String>,
        portrait_url: Option<String>,
    ) -> GameResult<Player> {
        let name = validate_name(name)?;

        let player = Player {
            id: ulid::Ulid::new().to_string(),
            name: name.to_string(),
            character: CharacterSheet {
                stats: Stats::default(),
                inventory: Vec::new(),
                details,
                descriptor,
                portrait_url,
            },
            portrait_attempts: 0,
        };

        self.players.insert(player.id.clone(), player.clone());
        self.push_turn(Sender::System, format!("{} joined the party.", player.name));

        if self.phase != Phase::Submitting {
            tracing::warn!(
                room = %self.code,
                player = %player.id,
                phase = %self.phase,
                "Player joined mid-round"
            );
        }

        Ok(player)
    }

    pub fn submit_action(&mut self, player_id: &str, text: &str) -> GameResult<SubmitOutcome> {
        self.expect_phase(Phase::Submitting)?;
        let player_name = self.player(player_id)?.name.clone();
        if self.submitted_players.contains(player_id) {
            return Err(GameError::DuplicateSubmission);
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(GameError::InvalidInput(
                "Action text must not be empty".to_string(),
            ));
        }
        if text.chars().count() > MAX_ACTION_CHARS {
            return Err(GameError::InvalidInput(format!(
                "Action text must be at most {} characters",
                MAX_ACTION_CHARS
            )));
        }

        self.actions.push(Action {
            player_id: player_id.to_string(),
            text: text.to_string(),
        });
        self.submitted_players.insert(player_id.to_string());
        self.push_turn(
            Sender::Player {
                id: player_id.to_string(),
                name: player_name,
            },
            text.to_string(),
        );

        let submitted = self.submitted_players.len();
        let total = self.players.len();
        if total > 0 && submitted == total {
            self.transition(Phase::Voting);
            Ok(SubmitOutcome::VotingOpened {
                actions: self.actions.clone(),
            })
        } else {
            Ok(SubmitOutcome::Collecting { submitted, total })
        }
    }

    pub fn tally(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.actions.len()];
        for vote in &self.votes {
            if let Some(count) = counts.get_mut(vote.choice) {
                *count += 1;
            }
        }
        counts
    }

    pub fn vote(&mut self, player_id: &str, choice: i64) -> GameResult<VoteOutcome> {
        self.expect_phase(Phase::Voting)?;
        self.player(player_id)?;
        if self.votes.iter().any(|v| v.player_id == player_id) {
            return Err(GameError::DuplicateVote);
        }

        let options = self.actions.len();
        let choice = usize::try_from(choice)
            .ok()
            .filter(|&c| c < options)
            .ok_or(GameError::InvalidChoice { choice, options })?;

        self.votes.push(Vote {
            player_id: player_id.to_string(),
            choice,
        });

        let tally = self.tally();
        if self.votes.len() == self.players.len() {
            // choice was validated against a non-empty action list, so a winner exists
            let winning_index = winning_index(&tally).unwrap_or(choice);
            let winning_action = self.actions[winning_index].clone();
            self.winning_action = Some(winning_action.clone());
            self.transition(Phase::PostVote);
            Ok(VoteOutcome::Closed {
                tally,
                winning_index,
                winning_action,
            })
        } else {
            Ok(VoteOutcome::Counting { tally })
        }
    }

    /// Render the story as plain text for the narrator
    pub fn story_so_far(&self) -> String {
        self.context
            .iter()
            .map(|turn| match &turn.sender {
                Sender::Narrator => turn.text.clone(),
                Sender::Player { name, .. } => format!("{} proposed: {}", name, turn.text),
                Sender::System => format!("[{}]", turn.text),
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Claim the room for narration. Phase stays POST_VOTE until `complete_advance`.
    pub fn begin_advance(&mut self) -> GameResult<NarrationJob> {
        self.expect_phase(Phase::PostVote)?;
        if self.narrating {
            return Err(GameError::AdvanceInProgress);
        }
        let winning_action = self.winning_action.clone().ok_or(GameError::NoWinner)?;

        self.narrating = true;
        Ok(NarrationJob {
            world: self.world.clone(),
            story: self.story_so_far(),
            winning_action,
        })
    }

    /// Release the narration claim without touching anything else
    pub fn abort_advance(&mut self) {
        self.narrating = false;
    }

    pub fn complete_advance(&mut self, narration: String, cost: f64) -> GameResult<()> {
        self.expect_phase(Phase::PostVote)?;
        let winning_action = self.winning_action.take().ok_or(GameError::NoWinner)?;

        self.push_turn(
            Sender::System,
            format!("The players decided to: \"{}\"", winning_action.text),
        );
        self.push_turn(Sender::Narrator, narration);

        self.actions.clear();
        self.votes.clear();
        self.submitted_players.clear();
        self.round += 1;
        self.prompt = NEXT_ROUND_PROMPT.to_string();
        self.add_cost(cost);
        self.narrating = false;
        self.transition(Phase::Submitting);
        Ok(())
    }

    /// Whether the player may regenerate their portrait, without using up an attempt
    pub fn check_portrait_attempt(&self, player_id: &str) -> GameResult<()> {
        if self.player(player_id)?.portrait_attempts >= MAX_PORTRAIT_ATTEMPTS {
            return Err(GameError::RegenerationLimit(MAX_PORTRAIT_ATTEMPTS));
        }
        Ok(())
    }

    /// Count a portrait regeneration attempt before the generator is called
    pub fn reserve_portrait_attempt(
        &mut self,
        player_id: &str,
        descriptor: Option<String>,
    ) -> GameResult<PortraitJob> {
        self.check_portrait_attempt(player_id)?;
        let world = self.world.clone();
        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| GameError::UnknownPlayer(player_id.to_string()))?;
        player.portrait_attempts += 1;

        if let Some(d) = descriptor.filter(|d| !d.trim().is_empty()) {
            player.character.descriptor = Some(d);
        }

        Ok(PortraitJob {
            player_name: player.name.clone(),
            descriptor: player.character.descriptor.clone().unwrap_or_default(),
            world,
            attempts_remaining: MAX_PORTRAIT_ATTEMPTS - player.portrait_attempts,
        })
    }

    pub fn set_portrait(&mut self, player_id: &str, url: String) -> GameResult<()> {
        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| GameError::UnknownPlayer(player_id.to_string()))?;
        player.character.portrait_url = Some(url);
        Ok(())
    }

    /// Context as the public may see it right now
    pub fn visible_context(&self) -> Vec<ContextTurn> {
        self.context
            .iter()
            .filter(|turn| {
                !(self.phase == Phase::Submitting
                    && turn.round == self.round
                    && matches!(turn.sender, Sender::Player { .. }))
            })
            .cloned()
            .collect()
    }

    pub fn players_list(&self) -> Vec<Player> {
        self.players.values().cloned().collect()
    }

    pub fn view(&self) -> RoomView {
        let revealed = self.phase != Phase::Submitting;
        RoomView {
            code: self.code.clone(),
            world: self.world.clone(),
            context: self.visible_context(),
            prompt: self.prompt.clone(),
            round: self.round,
            phase: self.phase,
            players: self.players_list(),
            submitted_count: self.submitted_players.len(),
            actions: if revealed {
                self.actions.clone()
            } else {
                Vec::new()
            },
            votes: if revealed { self.tally() } else { Vec::new() },
            winning_action: self.winning_action.clone(),
            narrating: self.narrating,
            total_cost: self.total_cost,
        }
    }

    pub fn players_message(&self) -> ServerMessage {
        ServerMessage::PlayersUpdated {
            players: self.players_list(),
            phase: self.phase,
        }
    }

    pub fn round_message(&self) -> ServerMessage {
        ServerMessage::RoundAdvanced {
            round: self.round,
            context: self.visible_context(),
            prompt: self.prompt.clone(),
            phase: self.phase,
            total_cost: self.total_cost,
        }
    }

    /// Check the bookkeeping invariants; used by tests
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.actions.len() != self.submitted_players.len() {
            return Err(format!(
                "{} actions but {} submitted players",
                self.actions.len(),
                self.submitted_players.len()
            ));
        }
        for id in &self.submitted_players {
            let matching = self.actions.iter().filter(|a| &a.player_id == id).count();
            if matching != 1 {
                return Err(format!("player {} has {} actions", id, matching));
            }
        }
        let voters: HashSet<_> = self.votes.iter().map(|v| &v.player_id).collect();
        if voters.len() != self.votes.len() {
            return Err("a player voted twice".to_string());
        }
        if self.votes.iter().any(|v| v.choice >= self.actions.len()) {
            return Err("vote choice out of range".to_string());
        }
        Ok(())
    }
}
