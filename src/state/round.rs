use super::AppState;
use crate::cost;
use crate::error::{GameError, GameResult};
use crate::llm::{narration_prompt, LlmError};
use crate::protocol::ServerMessage;
use crate::state::room::{SubmitOutcome, VoteOutcome};
use crate::types::*;

impl AppState {
    /// Record a player's action for the current round
    pub async fn submit_action(
        &self,
        code: &str,
        player_id: &str,
        text: &str,
    ) -> GameResult<SubmitOutcome> {
        let shared = self.get_room(code).await?;
        let mut room = shared.lock().await;

        let outcome = room.submit_action(player_id, text)?;
        let msg = match &outcome {
            SubmitOutcome::VotingOpened { actions } => ServerMessage::VotingOpened {
                phase: room.phase,
                actions: actions.clone(),
            },
            SubmitOutcome::Collecting { submitted, total } => ServerMessage::SubmissionProgress {
                submitted_count: *submitted,
                players_count: *total,
            },
        };
        tracing::info!(room = %room.code, player = player_id, "Action submitted");

        // Still holding the room lock, so updates for this room go out in commit order
        self.fanout.broadcast(&room.code, &msg).await;
        Ok(outcome)
    }

    /// Record a player's vote for one of this round's actions
    pub async fn vote(&self, code: &str, player_id: &str, choice: i64) -> GameResult<VoteOutcome> {
        let shared = self.get_room(code).await?;
        let mut room = shared.lock().await;

        let outcome = room.vote(player_id, choice)?;
        let msg = match &outcome {
            VoteOutcome::Counting { tally } => ServerMessage::VoteTally {
                votes: tally.clone(),
            },
            VoteOutcome::Closed {
                tally,
                winning_index,
                winning_action,
            } => {
                tracing::info!(
                    room = %room.code,
                    winner = winning_index,
                    "Voting closed: \"{}\"",
                    winning_action.text
                );
                ServerMessage::VotingClosed {
                    phase: room.phase,
                    votes: tally.clone(),
                    winning_index: *winning_index,
                    winning_action: winning_action.clone(),
                }
            }
        };

        self.fanout.broadcast(&room.code, &msg).await;
        Ok(outcome)
    }

    /// Narrate the winning action and open the next round.
    ///
    /// The narrator is called with the room unlocked. Until it answers the room stays in
    /// POST_VOTE and a second advance is refused. On failure nothing but that marker changes.
    pub async fn advance_round(&self, code: &str) -> GameResult<()> {
        let shared = self.get_room(code).await?;

        let job = {
            let mut room = shared.lock().await;
            room.begin_advance()?
        };

        // Runs detached so a dropped request cannot leave the room marked as narrating
        let state = self.clone();
        let task_room = shared.clone();
        let task = tokio::spawn(async move {
            let shared = task_room;
            let narrated = state
                .narrate(&job.world, &job.story, &job.winning_action.text)
                .await;

            let mut room = shared.lock().await;
            let result: GameResult<()> = match narrated {
                Ok((narration, cost)) => room.complete_advance(narration, cost),
                Err(e) => Err(GameError::Narration(e)),
            };

            match result {
                Ok(()) => {
                    tracing::info!(
                        room = %room.code,
                        round = room.round,
                        total_cost = room.total_cost,
                        "Round advanced"
                    );
                    let msg = room.round_message();
                    state.fanout.broadcast(&room.code, &msg).await;
                    Ok(())
                }
                Err(e) => {
                    room.abort_advance();
                    tracing::error!(room = %room.code, "Advance failed: {}", e);
                    Err(e)
                }
            }
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                // The task died before it could release the room
                let mut room = shared.lock().await;
                room.abort_advance();
                tracing::error!(room = %room.code, "Narration task failed: {}", e);
                Err(GameError::Narration(LlmError::ApiError(format!(
                    "narration task failed: {}",
                    e
                ))))
            }
        }
    }

    /// Ask the narration gateway what happens next; returns the text and its cost
    async fn narrate(
        &self,
        world: &World,
        story: &str,
        action: &str,
    ) -> Result<(String, f64), LlmError> {
        let narrator = self.narrator.as_ref().ok_or_else(|| {
            LlmError::MissingCredentials("no narration provider configured".to_string())
        })?;

        let prompt = narration_prompt(world, story, action);
        let request = self.llm_config.narration_request(prompt.clone());
        let timeout = request.timeout;

        // Providers enforce the timeout themselves; this bounds any that do not
        let response = tokio::time::timeout(timeout, narrator.generate(request))
            .await
            .map_err(|_| LlmError::Timeout(timeout))??;

        let text = response.text.trim().to_string();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse(
                "narration was empty".to_string(),
            ));
        }

        tracing::debug!(
            provider = %response.metadata.provider,
            model = %response.metadata.model,
            latency_ms = response.metadata.latency_ms,
            "Narration generated"
        );
        let cost = cost::charge_text(&response.metadata, &prompt, &text);
        Ok((text, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        GenerateRequest, GenerateResponse, LlmConfig, LlmProvider, LlmResult, Providers,
        ResponseMetadata,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct SlowNarrator {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl LlmProvider for SlowNarrator {
        async fn generate(&self, _request: GenerateRequest) -> LlmResult<GenerateResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(GenerateResponse {
                text: "The bridge holds.".to_string(),
                metadata: ResponseMetadata {
                    provider: "test".to_string(),
                    model: "test".to_string(),
                    reported_cost: Some(0.01),
                    ..ResponseMetadata::default()
                },
            })
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct PanickingNarrator;

    #[async_trait]
    impl LlmProvider for PanickingNarrator {
        async fn generate(&self, _request: GenerateRequest) -> LlmResult<GenerateResponse> {
            panic!("narrator bug");
        }

        fn name(&self) -> &str {
            "panicking"
        }
    }

    fn state_with(narrator: Arc<SlowNarrator>, timeout: Duration) -> AppState {
        let config = LlmConfig {
            default_timeout: timeout,
            ..LlmConfig::default()
        };
        AppState::new_with_providers(
            Providers {
                narrator: Some(narrator),
                portraits: None,
            },
            config,
        )
    }

    async fn room_after_vote(state: &AppState) -> String {
        let code = state.create_room(World::new(), None, None).await.code;
        let (player, _) = state
            .join_room(&code, crate::state::NewPlayer::named("Solo"))
            .await
            .unwrap();
        state.submit_action(&code, &player.id, "cross").await.unwrap();
        state.vote(&code, &player.id, 0).await.unwrap();
        code
    }

    #[tokio::test]
    async fn test_concurrent_advance_narrates_once() {
        let narrator = Arc::new(SlowNarrator {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(100),
        });
        let state = state_with(narrator.clone(), Duration::from_secs(5));
        let code = room_after_vote(&state).await;

        let (first, second) = tokio::join!(state.advance_round(&code), state.advance_round(&code));

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(GameError::AdvanceInProgress))));
        assert_eq!(narrator.calls.load(Ordering::SeqCst), 1);

        let view = state.room_view(&code).await.unwrap();
        assert_eq!(view.phase, Phase::Submitting);
        assert_eq!(view.round, 2);
        assert!((view.total_cost - 0.01).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_timeout_keeps_post_vote() {
        let narrator = Arc::new(SlowNarrator {
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(500),
        });
        let state = state_with(narrator, Duration::from_millis(20));
        let code = room_after_vote(&state).await;

        let result = state.advance_round(&code).await;
        assert!(matches!(
            result,
            Err(GameError::Narration(LlmError::Timeout(_)))
        ));

        let view = state.room_view(&code).await.unwrap();
        assert_eq!(view.phase, Phase::PostVote);
        assert!(view.winning_action.is_some());
        assert!(!view.narrating);
    }

    #[tokio::test]
    async fn test_panicking_narrator_releases_room() {
        let state = AppState::new_with_providers(
            Providers {
                narrator: Some(Arc::new(PanickingNarrator)),
                portraits: None,
            },
            LlmConfig::default(),
        );
        let code = room_after_vote(&state).await;

        let err = state.advance_round(&code).await.unwrap_err();
        assert!(matches!(err, GameError::Narration(LlmError::ApiError(_))));

        let view = state.room_view(&code).await.unwrap();
        assert!(!view.narrating);
        assert_eq!(view.phase, Phase::PostVote);

        // A retry reaches the narrator again instead of being refused
        let err = state.advance_round(&code).await.unwrap_err();
        assert!(!matches!(err, GameError::AdvanceInProgress));
    }

    #[tokio::test]
    async fn test_missing_narrator_is_server_side() {
        let state = AppState::new();
        let code = room_after_vote(&state).await;

        let err = state.advance_round(&code).await.unwrap_err();
        assert!(err.is_server_side());
        assert!(matches!(
            err,
            GameError::Narration(LlmError::MissingCredentials(_))
        ));
        assert_eq!(state.room_view(&code).await.unwrap().phase, Phase::PostVote);
    }

    #[tokio::test]
    async fn test_submission_progress_broadcast_hides_text() {
        let state = AppState::new();
        let code = state.create_room(World::new(), None, None).await.code;
        let (p1, _) = state
            .join_room(&code, crate::state::NewPlayer::named("P1"))
            .await
            .unwrap();
        state
            .join_room(&code, crate::state::NewPlayer::named("P2"))
            .await
            .unwrap();

        let (_, mut rx) = state.fanout.subscribe(&code).await;
        state
            .submit_action(&code, &p1.id, "secret plan")
            .await
            .unwrap();

        let payload = rx.recv().await.unwrap();
        assert!(!payload.as_str().contains("secret plan"));
        let value: serde_json::Value = serde_json::from_str(payload.as_str()).unwrap();
        assert_eq!(value["t"], "submission_progress");
        assert_eq!(value["submitted_count"], 1);
        assert_eq!(value["players_count"], 2);
    }

    #[tokio::test]
    async fn test_concurrent_submissions_keep_invariants() {
        let state = AppState::new();
        let code = state.create_room(World::new(), None, None).await.code;

        let mut ids = Vec::new();
        for i in 0..8 {
            let (player, _) = state
                .join_room(
                    &code,
                    crate::state::NewPlayer::named(&format!("P{}", i)),
                )
                .await
                .unwrap();
            ids.push(player.id);
        }

        // Every player submits twice at once; exactly one of each pair may land
        let mut handles = Vec::new();
        for id in ids.iter().chain(ids.iter()) {
            let state = state.clone();
            let code = code.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                state.submit_action(&code, &id, "charge").await
            }));
        }
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, ids.len());

        let shared = state.get_room(&code).await.unwrap();
        let room = shared.lock().await;
        room.check_invariants().unwrap();
        assert_eq!(room.actions.len(), ids.len());
        assert_eq!(room.phase, Phase::Voting);
    }
}
