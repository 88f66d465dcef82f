//! Error taxonomy for room operations and its HTTP mapping.

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::llm::LlmError;
use crate::types::{Phase, PlayerId, RoomCode};

pub type GameResult<T> = Result<T, GameError>;

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Invalid room code: {0}")]
    RoomNotFound(RoomCode),

    #[error("Unknown player: {0}")]
    UnknownPlayer(PlayerId),

    #[error("Not in {expected} phase (room is in {actual})")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("You have already submitted an action.")]
    DuplicateSubmission,

    #[error("You have already voted.")]
    DuplicateVote,

    #[error("Invalid choice {choice}: must be between 0 and {}", .options.saturating_sub(1))]
    InvalidChoice { choice: i64, options: usize },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Portrait regeneration limit of {0} reached")]
    RegenerationLimit(u32),

    #[error("No winning action found.")]
    NoWinner,

    #[error("The next round is already being narrated.")]
    AdvanceInProgress,

    #[error("Narration failed: {0}")]
    Narration(#[source] LlmError),

    #[error("Portrait generation failed: {0}")]
    Portrait(#[source] LlmError),
}

impl GameError {
    /// Stable machine-readable reason code
    pub fn code(&self) -> &'static str {
        match self {
            GameError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            GameError::UnknownPlayer(_) => "UNKNOWN_PLAYER",
            GameError::WrongPhase { .. } => "WRONG_PHASE",
            GameError::DuplicateSubmission => "DUPLICATE_SUBMISSION",
            GameError::DuplicateVote => "DUPLICATE_VOTE",
            GameError::InvalidChoice { .. } => "INVALID_CHOICE",
            GameError::InvalidInput(_) => "INVALID_INPUT",
            GameError::RegenerationLimit(_) => "REGENERATION_LIMIT",
            GameError::NoWinner => "NO_WINNER",
            GameError::AdvanceInProgress => "ADVANCE_IN_PROGRESS",
            GameError::Narration(_) => "NARRATION_FAILED",
            GameError::Portrait(_) => "PORTRAIT_FAILED",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GameError::RoomNotFound(_) | GameError::UnknownPlayer(_) => StatusCode::NOT_FOUND,
            GameError::AdvanceInProgress => StatusCode::CONFLICT,
            GameError::Narration(_) | GameError::Portrait(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Collaborator failures, as opposed to problems with the caller's input
    pub fn is_server_side(&self) -> bool {
        self.status().is_server_error()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    detail: String,
}

impl IntoResponse for GameError {
    fn into_response(self) -> axum::response::Response {
        if self.is_server_side() {
            tracing::error!(code = self.code(), "{}", self);
        } else {
            tracing::debug!(code = self.code(), "{}", self);
        }

        let body = Json(ErrorBody {
            code: self.code(),
            detail: self.to_string(),
        });

        (self.status(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_client_errors_are_bad_request() {
        let err = GameError::WrongPhase {
            expected: Phase::Voting,
            actual: Phase::Submitting,
        };
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "WRONG_PHASE");
        assert!(err.to_string().contains("VOTING"));
        assert!(!err.is_server_side());
    }

    #[test]
    fn test_not_found_is_distinct() {
        let err = GameError::RoomNotFound("ABCDE".to_string());
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GameError::UnknownPlayer("x".to_string()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_collaborator_failures_are_server_side() {
        let err = GameError::Narration(LlmError::Timeout(Duration::from_secs(30)));
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
        assert!(err.is_server_side());
        assert_eq!(err.code(), "NARRATION_FAILED");
    }

    #[test]
    fn test_invalid_choice_message() {
        let err = GameError::InvalidChoice {
            choice: 2,
            options: 2,
        };
        assert_eq!(
            err.to_string(),
            "Invalid choice 2: must be between 0 and 1"
        );
    }
}
