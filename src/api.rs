//! HTTP API endpoints for rooms.
//!
//! Every room command is a small JSON POST; live updates go out over the room's WebSocket.

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    services::{ServeDir, ServeFile},
    trace::TraceLayer,
};

use crate::error::{GameError, GameResult};
use crate::protocol::RoomView;
use crate::state::{AppState, NewPlayer};
use crate::types::*;
use crate::ws;

/// JSON body extractor whose rejections use the usual `{code, detail}` error body
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = GameError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(GameError::InvalidInput(rejection.body_text())),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(default)]
    pub world: World,
    /// Opening narration
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateRoomResponse {
    pub code: RoomCode,
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub name: String,
    #[serde(default)]
    pub character: CharacterDetails,
    #[serde(default)]
    pub descriptor: Option<String>,
    #[serde(default)]
    pub reference_image: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

/// The new player plus what they need to start playing
#[derive(Debug, Serialize)]
pub struct JoinResponse {
    #[serde(flatten)]
    pub player: Player,
    pub context: Vec<ContextTurn>,
    pub prompt: String,
    pub phase: Phase,
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub player_id: PlayerId,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub player_id: PlayerId,
    pub choice: i64,
}

#[derive(Debug, Deserialize)]
pub struct RegenerateRequest {
    pub player_id: PlayerId,
    #[serde(default)]
    pub descriptor: Option<String>,
    #[serde(default)]
    pub reference_image: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegenerateResponse {
    pub portrait_url: String,
    pub attempts_remaining: u32,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    fn ok() -> Json<Self> {
        Json(Self { status: "ok" })
    }
}

/// Build the application router
pub fn router(state: Arc<AppState>, static_dir: &FsPath) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/room", post(create_room))
        .route("/room/{code}", get(ws::ws_handler))
        .route("/room/{code}/join", post(join_room))
        .route("/room/{code}/action", post(submit_action))
        .route("/room/{code}/vote", post(vote))
        .route("/room/{code}/next", post(advance_round))
        .route("/room/{code}/regenerate", post(regenerate_portrait))
        .route("/room/{code}/state", get(room_state))
        .route_service("/", ServeFile::new(static_dir.join("dm.html")))
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// POST /room
///
/// The body is optional; an empty one opens a room with no world and the default prompt.
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> GameResult<Json<CreateRoomResponse>> {
    let request: CreateRoomRequest = if body.iter().all(u8::is_ascii_whitespace) {
        CreateRoomRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| GameError::InvalidInput(format!("Invalid room settings: {}", e)))?
    };

    let view = state
        .create_room(request.world, request.context, request.prompt)
        .await;
    Ok(Json(CreateRoomResponse { code: view.code }))
}

/// POST /room/{code}/join
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    ApiJson(request): ApiJson<JoinRequest>,
) -> GameResult<Json<JoinResponse>> {
    let new = NewPlayer {
        name: request.name,
        details: request.character,
        descriptor: request.descriptor,
        reference_image: request.reference_image,
        style: request.style,
    };
    let (player, view) = state.join_room(&code, new).await?;

    Ok(Json(JoinResponse {
        player,
        context: view.context,
        prompt: view.prompt,
        phase: view.phase,
    }))
}

/// POST /room/{code}/action
pub async fn submit_action(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    ApiJson(request): ApiJson<ActionRequest>,
) -> GameResult<Json<StatusResponse>> {
    state
        .submit_action(&code, &request.player_id, &request.text)
        .await?;
    Ok(StatusResponse::ok())
}

/// POST /room/{code}/vote
pub async fn vote(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    ApiJson(request): ApiJson<VoteRequest>,
) -> GameResult<Json<StatusResponse>> {
    state
        .vote(&code, &request.player_id, request.choice)
        .await?;
    Ok(StatusResponse::ok())
}

/// POST /room/{code}/next
pub async fn advance_round(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> GameResult<Json<StatusResponse>> {
    state.advance_round(&code).await?;
    Ok(StatusResponse::ok())
}

/// POST /room/{code}/regenerate
pub async fn regenerate_portrait(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    ApiJson(request): ApiJson<RegenerateRequest>,
) -> GameResult<Json<RegenerateResponse>> {
    let (portrait_url, attempts_remaining) = state
        .regenerate_portrait(
            &code,
            &request.player_id,
            request.descriptor,
            request.reference_image,
            request.style,
        )
        .await?;

    Ok(Json(RegenerateResponse {
        portrait_url,
        attempts_remaining,
    }))
}

/// GET /room/{code}/state
pub async fn room_state(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> GameResult<Json<RoomView>> {
    state.room_view(&code).await.map(Json)
}
