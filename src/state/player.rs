use super::AppState;
use crate::cost;
use crate::error::{GameError, GameResult};
use crate::llm::{LlmError, PortraitRequest};
use crate::protocol::{RoomView, ServerMessage};
use crate::state::room::validate_name;
use crate::types::*;

/// Everything a client may supply when joining a room
#[derive(Debug, Clone, Default)]
pub struct NewPlayer {
    pub name: String,
    pub details: CharacterDetails,
    pub descriptor: Option<String>,
    /// Picture the portrait should resemble
    pub reference_image: Option<String>,
    pub style: Option<String>,
}

impl NewPlayer {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn wants_portrait(&self) -> bool {
        self.descriptor
            .as_deref()
            .is_some_and(|d| !d.trim().is_empty())
            || self.reference_image.is_some()
    }
}

impl AppState {
    /// Add a player to a room, drawing a portrait first if one was asked for
    pub async fn join_room(&self, code: &str, new: NewPlayer) -> GameResult<(Player, RoomView)> {
        let shared = self.get_room(code).await?;
        // Reject before paying for a portrait nobody can use
        validate_name(&new.name)?;

        let (portrait_url, portrait_cost) = if new.wants_portrait() {
            let world = shared.lock().await.world.clone();
            let request = PortraitRequest {
                name: new.name.trim().to_string(),
                descriptor: new.descriptor.clone().unwrap_or_default(),
                reference_image: new.reference_image.clone(),
                style_hint: new.style.clone(),
                world,
                timeout: self.llm_config.default_timeout,
            };
            match self.draw_portrait(request).await {
                Ok((url, cost)) => (Some(url), cost),
                Err(e) => {
                    // Joining matters more than the picture
                    tracing::warn!(room = %code, "Portrait at join failed: {}", e);
                    (None, 0.0)
                }
            }
        } else {
            (None, 0.0)
        };

        let mut room = shared.lock().await;
        let player = room.join(&new.name, new.details, new.descriptor, portrait_url)?;
        room.add_cost(portrait_cost);
        tracing::info!(room = %room.code, player = %player.id, name = %player.name, "Player joined");

        let msg = room.players_message();
        self.fanout.broadcast(&room.code, &msg).await;
        Ok((player, room.view()))
    }

    /// Draw a new portrait for a player; returns the URL and the attempts left
    pub async fn regenerate_portrait(
        &self,
        code: &str,
        player_id: &str,
        descriptor: Option<String>,
        reference_image: Option<String>,
        style: Option<String>,
    ) -> GameResult<(String, u32)> {
        let shared = self.get_room(code).await?;

        let job = {
            let mut room = shared.lock().await;
            room.check_portrait_attempt(player_id)?;
            if self.portraits.is_none() {
                return Err(GameError::Portrait(LlmError::MissingCredentials(
                    "no portrait provider configured".to_string(),
                )));
            }
            // The attempt counts even if the generator fails below
            room.reserve_portrait_attempt(player_id, descriptor)?
        };

        let request = PortraitRequest {
            name: job.player_name,
            descriptor: job.descriptor,
            reference_image,
            style_hint: style,
            world: job.world,
            timeout: self.llm_config.default_timeout,
        };

        let state = self.clone();
        let code = code.to_string();
        let player_id = player_id.to_string();
        let attempts_remaining = job.attempts_remaining;
        let task = tokio::spawn(async move {
            let (url, cost) = state
                .draw_portrait(request)
                .await
                .map_err(GameError::Portrait)?;

            let mut room = shared.lock().await;
            room.set_portrait(&player_id, url.clone())?;
            room.add_cost(cost);
            tracing::info!(
                room = %room.code,
                player = %player_id,
                attempts_remaining,
                "Portrait regenerated"
            );

            let msg = ServerMessage::PortraitUpdated {
                player_id: player_id.clone(),
                portrait_url: url.clone(),
            };
            state.fanout.broadcast(&room.code, &msg).await;
            Ok::<_, GameError>(url)
        });

        let url = task.await.unwrap_or_else(|e| {
            tracing::error!(room = %code, "Portrait task failed: {}", e);
            Err(GameError::Portrait(LlmError::ApiError(format!(
                "portrait task failed: {}",
                e
            ))))
        })?;
        Ok((url, attempts_remaining))
    }

    async fn draw_portrait(&self, request: PortraitRequest) -> Result<(String, f64), LlmError> {
        let provider = self.portraits.as_ref().ok_or_else(|| {
            LlmError::MissingCredentials("no portrait provider configured".to_string())
        })?;

        let timeout = request.timeout;
        let response = tokio::time::timeout(timeout, provider.generate_portrait(request))
            .await
            .map_err(|_| LlmError::Timeout(timeout))??;

        tracing::debug!(
            provider = %response.metadata.provider,
            latency_ms = response.metadata.latency_ms,
            "Portrait generated"
        );
        let cost = cost::charge_image(&response.metadata);
        Ok((response.image_url, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{
        LlmConfig, LlmResult, PortraitProvider, PortraitResponse, Providers, ResponseMetadata,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct MockPainter {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PortraitProvider for MockPainter {
        async fn generate_portrait(&self, request: PortraitRequest) -> LlmResult<PortraitResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LlmError::ApiError("painter is out of paint".to_string()));
            }
            Ok(PortraitResponse {
                image_url: format!("https://img.test/{}/{}.png", request.name, n),
                metadata: ResponseMetadata {
                    provider: "mock".to_string(),
                    model: "mock".to_string(),
                    reported_cost: Some(0.02),
                    ..ResponseMetadata::default()
                },
            })
        }

        fn name(&self) -> &str {
            "mock"
        }
    }

    fn state_with(painter: Arc<MockPainter>) -> AppState {
        AppState::new_with_providers(
            Providers {
                narrator: None,
                portraits: Some(painter),
            },
            LlmConfig::default(),
        )
    }

    fn painter(fail: bool) -> Arc<MockPainter> {
        Arc::new(MockPainter {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    #[tokio::test]
    async fn test_join_broadcasts_players() {
        let state = AppState::new();
        let code = state.create_room(World::new(), None, None).await.code;
        let (_, mut rx) = state.fanout.subscribe(&code).await;

        let (player, view) = state.join_room(&code, NewPlayer::named("Ada")).await.unwrap();
        assert_eq!(player.character.stats, Stats::default());
        assert_eq!(view.players.len(), 1);

        let payload = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(payload.as_str()).unwrap();
        assert_eq!(value["t"], "players_updated");
        assert_eq!(value["players"][0]["name"], "Ada");
    }

    #[tokio::test]
    async fn test_join_unknown_room() {
        let state = AppState::new();
        let result = state.join_room("NOPE1", NewPlayer::named("Ada")).await;
        assert!(matches!(result, Err(GameError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_join_with_descriptor_draws_portrait() {
        let painter = painter(false);
        let state = state_with(painter.clone());
        let code = state.create_room(World::new(), None, None).await.code;

        let new = NewPlayer {
            descriptor: Some("a tall elf with a lantern".to_string()),
            ..NewPlayer::named("Ada")
        };
        let (player, view) = state.join_room(&code, new).await.unwrap();

        assert_eq!(painter.calls.load(Ordering::SeqCst), 1);
        assert!(player.character.portrait_url.is_some());
        assert_eq!(player.portrait_attempts, 0);
        assert!((view.total_cost - 0.02).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_blank_name_skips_portrait() {
        let painter = painter(false);
        let state = state_with(painter.clone());
        let code = state.create_room(World::new(), None, None).await.code;

        let new = NewPlayer {
            descriptor: Some("elf".to_string()),
            ..NewPlayer::named("   ")
        };
        let err = state.join_room(&code, new).await.unwrap_err();

        assert!(matches!(err, GameError::InvalidInput(_)));
        assert_eq!(painter.calls.load(Ordering::SeqCst), 0);
        let view = state.room_view(&code).await.unwrap();
        assert!(view.players.is_empty());
        assert_eq!(view.total_cost, 0.0);
    }

    #[tokio::test]
    async fn test_join_survives_portrait_failure() {
        let state = state_with(painter(true));
        let code = state.create_room(World::new(), None, None).await.code;

        let new = NewPlayer {
            descriptor: Some("a dwarf".to_string()),
            ..NewPlayer::named("Gimli")
        };
        let (player, view) = state.join_room(&code, new).await.unwrap();

        assert!(player.character.portrait_url.is_none());
        assert_eq!(view.total_cost, 0.0);
    }

    #[tokio::test]
    async fn test_regenerate_is_limited() {
        let painter = painter(false);
        let state = state_with(painter.clone());
        let code = state.create_room(World::new(), None, None).await.code;
        let (player, _) = state.join_room(&code, NewPlayer::named("Ada")).await.unwrap();

        let mut remaining = Vec::new();
        for _ in 0..MAX_PORTRAIT_ATTEMPTS {
            let (url, left) = state
                .regenerate_portrait(&code, &player.id, Some("with a hat".to_string()), None, None)
                .await
                .unwrap();
            assert!(url.starts_with("https://img.test/Ada/"));
            remaining.push(left);
        }
        assert_eq!(remaining, vec![2, 1, 0]);

        let err = state
            .regenerate_portrait(&code, &player.id, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::RegenerationLimit(3)));
        assert_eq!(painter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_failed_regeneration_consumes_attempt() {
        let state = state_with(painter(true));
        let code = state.create_room(World::new(), None, None).await.code;
        let (player, _) = state.join_room(&code, NewPlayer::named("Ada")).await.unwrap();

        let err = state
            .regenerate_portrait(&code, &player.id, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::Portrait(LlmError::ApiError(_))));

        let view = state.room_view(&code).await.unwrap();
        assert_eq!(view.players[0].portrait_attempts, 1);
        assert!(view.players[0].character.portrait_url.is_none());
    }

    #[tokio::test]
    async fn test_regenerate_without_provider() {
        let state = AppState::new();
        let code = state.create_room(World::new(), None, None).await.code;
        let (player, _) = state.join_room(&code, NewPlayer::named("Ada")).await.unwrap();

        let err = state
            .regenerate_portrait(&code, &player.id, None, None, None)
            .await
            .unwrap_err();
        assert!(err.is_server_side());
    }

    #[tokio::test]
    async fn test_client_errors_win_over_missing_provider() {
        let state = AppState::new();

        let err = state
            .regenerate_portrait("NOPE9", "x", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::RoomNotFound(_)));
        assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);

        let code = state.create_room(World::new(), None, None).await.code;
        let err = state
            .regenerate_portrait(&code, "nobody", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::UnknownPlayer(_)));

        let (player, _) = state.join_room(&code, NewPlayer::named("Ada")).await.unwrap();
        {
            let shared = state.get_room(&code).await.unwrap();
            let mut room = shared.lock().await;
            for _ in 0..MAX_PORTRAIT_ATTEMPTS {
                room.reserve_portrait_attempt(&player.id, None).unwrap();
            }
        }
        let err = state
            .regenerate_portrait(&code, &player.id, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::RegenerationLimit(_)));
    }

    #[tokio::test]
    async fn test_missing_provider_keeps_attempts() {
        let state = AppState::new();
        let code = state.create_room(World::new(), None, None).await.code;
        let (player, _) = state.join_room(&code, NewPlayer::named("Ada")).await.unwrap();

        state
            .regenerate_portrait(&code, &player.id, None, None, None)
            .await
            .unwrap_err();
        let view = state.room_view(&code).await.unwrap();
        assert_eq!(view.players[0].portrait_attempts, 0);
    }

    #[tokio::test]
    async fn test_regenerate_unknown_player() {
        let state = state_with(painter(false));
        let code = state.create_room(World::new(), None, None).await.code;

        let err = state
            .regenerate_portrait(&code, "nobody", None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, GameError::UnknownPlayer(_)));
    }
}
