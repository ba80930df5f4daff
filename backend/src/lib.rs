use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::SinkExt;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;
use vote_core::{
    apply_command, Command, CommandError, GameEvent, GameState, IdSource, PlayerId, RosterError,
    RoundPhase, Tally, VoteChoice, VoteError,
};

/// Production id source. Tests inside vote-core use `SequentialIds` instead.
struct UuidIds;

impl IdSource for UuidIds {
    fn next_id(&mut self) -> PlayerId {
        Uuid::new_v4().to_string()
    }
}

#[derive(Clone)]
pub struct AppState {
    game: Arc<RwLock<GameState>>,
    updates: broadcast::Sender<GameView>,
    persist_path: Option<PathBuf>,
}

impl Default for AppState {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self {
            game: Arc::new(RwLock::new(GameState::default())),
            updates: tx,
            persist_path: None,
        }
    }
}

impl AppState {
    /// Loads the snapshot at `path` if one exists. Anything unreadable or
    /// structurally invalid falls back to an empty game; corruption never
    /// surfaces to the user.
    pub async fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut state = Self::default();
        state.persist_path = Some(path.clone());
        if let Ok(bytes) = tokio::fs::read(&path).await {
            match serde_json::from_slice::<GameState>(&bytes) {
                Ok(mut loaded) => {
                    // A hand-edited snapshot may hold votes for departed
                    // players; drop them to keep the ledger orphan-free.
                    loaded.round.retain_members(&loaded.roster);
                    *state.game.write().await = loaded;
                }
                Err(err) => {
                    tracing::warn!(
                        "ignoring invalid snapshot at {}: {err}",
                        path.display()
                    );
                }
            }
        }
        state
    }

    async fn persist(&self) {
        if let Some(path) = &self.persist_path {
            let snapshot = {
                let game = self.game.read().await;
                game.clone()
            };
            match serde_json::to_vec_pretty(&snapshot) {
                Ok(json) => {
                    if let Err(err) = tokio::fs::write(path, json).await {
                        tracing::error!("persist error: {err}");
                    }
                }
                Err(err) => tracing::error!("snapshot encode error: {err}"),
            }
        }
    }

    async fn erase(&self) {
        if let Some(path) = &self.persist_path {
            if let Err(err) = tokio::fs::remove_file(path).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::error!("snapshot erase error: {err}");
                }
            }
        }
    }
}

/// Everything the UI needs to redraw after a command.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GameView {
    pub players: Vec<PlayerView>,
    pub tally: Tally,
    pub progress: Progress,
    pub phase: RoundPhase,
    pub banner: String,
    pub controls: Controls,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub vote: Option<VoteChoice>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Progress {
    pub voted: usize,
    pub total: usize,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Controls {
    pub voting_enabled: bool,
    pub round_reset_enabled: bool,
    pub game_reset_enabled: bool,
}

/// Pure projection from game state to displayed facts.
pub fn render(state: &GameState) -> GameView {
    let phase = state.phase();
    GameView {
        players: state
            .roster
            .iter()
            .map(|p| PlayerView {
                id: p.id.clone(),
                name: p.name.clone(),
                vote: state.round.vote_for(&p.id),
            })
            .collect(),
        tally: state.round.tally(),
        progress: Progress {
            voted: state.round.len(),
            total: state.roster.len(),
        },
        phase,
        banner: phase.banner().to_string(),
        controls: Controls {
            voting_enabled: !state.roster.is_empty() && phase != RoundPhase::Complete,
            round_reset_enabled: !state.roster.is_empty(),
            // Game reset stays available even on an empty board.
            game_reset_enabled: true,
        },
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/players", post(add_player))
        .route("/players/:id", delete(remove_player))
        .route("/votes", post(cast_vote))
        .route("/round/reset", post(reset_round))
        .route("/game/reset", post(reset_game))
        .route("/state", get(get_state))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

#[derive(Serialize)]
pub struct CommandResponse {
    pub message: String,
    pub view: GameView,
}

fn error_status(err: &CommandError) -> StatusCode {
    match err {
        CommandError::Roster(RosterError::EmptyName | RosterError::NameTooLong) => {
            StatusCode::BAD_REQUEST
        }
        CommandError::Roster(RosterError::DuplicateName) => StatusCode::CONFLICT,
        CommandError::Vote(VoteError::PlayerNotFound) => StatusCode::NOT_FOUND,
        CommandError::Vote(VoteError::RoundAlreadyComplete | VoteError::DuplicateVote) => {
            StatusCode::CONFLICT
        }
    }
}

/// One command, processed to completion under the write lock: validate,
/// mutate, persist, broadcast the redraw. Commands never interleave.
async fn process_command(
    state: &AppState,
    command: Command,
) -> Result<CommandResponse, CommandError> {
    let mut game = state.game.write().await;
    let event = apply_command(&mut game, command, &mut UuidIds)?;
    let view = render(&game);
    drop(game);

    match &event {
        GameEvent::GameReset => state.erase().await,
        _ => state.persist().await,
    }

    let message = event.message();
    tracing::debug!("applied command: {message}");
    let _ = state.updates.send(view.clone());
    Ok(CommandResponse { message, view })
}

fn respond(result: Result<CommandResponse, CommandError>) -> axum::response::Response {
    match result {
        Ok(res) => (StatusCode::OK, Json(res)).into_response(),
        Err(err) => (error_status(&err), err.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct AddPlayerRequest {
    name: String,
}

async fn add_player(
    State(state): State<AppState>,
    Json(payload): Json<AddPlayerRequest>,
) -> impl IntoResponse {
    respond(process_command(&state, Command::AddPlayer { name: payload.name }).await)
}

async fn remove_player(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    respond(process_command(&state, Command::RemovePlayer { id }).await)
}

#[derive(Deserialize)]
struct VoteRequest {
    player_id: String,
    choice: VoteChoice,
}

async fn cast_vote(
    State(state): State<AppState>,
    Json(payload): Json<VoteRequest>,
) -> impl IntoResponse {
    respond(
        process_command(
            &state,
            Command::CastVote {
                player_id: payload.player_id,
                choice: payload.choice,
            },
        )
        .await,
    )
}

async fn reset_round(State(state): State<AppState>) -> impl IntoResponse {
    respond(process_command(&state, Command::ResetRound).await)
}

async fn reset_game(State(state): State<AppState>) -> impl IntoResponse {
    respond(process_command(&state, Command::ResetGame).await)
}

async fn get_state(State(state): State<AppState>) -> impl IntoResponse {
    let game = state.game.read().await;
    Json(render(&game))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Push-only redraw stream: current view on connect, then a fresh view
/// after every accepted command. Commands themselves arrive over HTTP.
async fn handle_socket(stream: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = stream.split();

    let snapshot = {
        let game = state.game.read().await;
        render(&game)
    };
    let mut rx = state.updates.subscribe();

    if sender
        .send(Message::Text(serde_json::to_string(&snapshot).unwrap()))
        .await
        .is_err()
    {
        return;
    }

    let mut send_task = tokio::spawn(async move {
        while let Ok(view) = rx.recv().await {
            if sender
                .send(Message::Text(serde_json::to_string(&view).unwrap()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    let _ = (&mut send_task).await;
    recv_task.abort();
}
