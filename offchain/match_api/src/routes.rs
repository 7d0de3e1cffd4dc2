//! HTTP and websocket surface. Handlers stay thin: parse, call the directory
//! or ledger, wrap the committed record in a `SessionView`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use engine::{
    Candle, FinishReason, GameMode, LeaderboardEntry, MatchSummary, PlayerSeed, SessionStatus, Side, Versioned,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiResult};
use crate::runtime::drive_session;
use crate::state::AppState;
use crate::view::SessionView;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionReq {
    pub user_id: String,
    pub display_name: String,
    /// Preset length; ignored when `duration_seconds` is given.
    #[serde(default)]
    pub mode: Option<GameMode>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub external_ref: Option<u64>,
}

impl CreateSessionReq {
    fn duration(&self) -> u32 {
        self.duration_seconds
            .unwrap_or_else(|| self.mode.unwrap_or(GameMode::Blitz).duration_seconds())
    }

    fn host(&self) -> PlayerSeed {
        PlayerSeed::new(self.user_id.clone(), self.display_name.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinReq {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenReq {
    pub user_id: String,
    pub side: Side,
    pub collateral: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserReq {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeverageReq {
    pub user_id: String,
    pub leverage: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReq {
    pub user_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResp {
    pub symbols: Vec<String>,
    pub live_sessions: usize,
    pub server_clock: bool,
    pub settlement_webhook: bool,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub user_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/ai", post(create_ai_session))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/join", post(join))
        .route("/sessions/:id/open", post(open_position))
        .route("/sessions/:id/close", post(close_all))
        .route("/sessions/:id/leverage", post(set_leverage))
        .route("/sessions/:id/chat", post(chat))
        .route("/sessions/:id/tick", post(tick))
        .route("/sessions/:id/finish", post(finish))
        .route("/sessions/:id/ws", get(ws))
        .route("/players/:user_id/history", get(history))
        .route("/leaderboard", get(leaderboard))
        .route("/feed/:symbol", post(push_candle))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn resolve_symbol(state: &AppState, requested: Option<&str>) -> ApiResult<String> {
    let symbol = requested.unwrap_or(state.config.default_symbol()).to_uppercase();
    if !state.feed.contains(&symbol) {
        return Err(ApiError::UnknownSymbol(symbol));
    }
    Ok(symbol)
}

fn created(state: &AppState, id: &str) -> ApiResult<Response> {
    drive_session(state, id);
    let record = state.directory.get_session(id)?;
    Ok((StatusCode::CREATED, Json(state.view(&record))).into_response())
}

async fn create_session(State(state): State<AppState>, Json(req): Json<CreateSessionReq>) -> ApiResult<Response> {
    let symbol = resolve_symbol(&state, req.symbol.as_deref())?;
    let id = state.directory.create_session(req.host(), req.duration(), &symbol, req.external_ref)?;
    created(&state, &id)
}

async fn create_ai_session(State(state): State<AppState>, Json(req): Json<CreateSessionReq>) -> ApiResult<Response> {
    let symbol = resolve_symbol(&state, req.symbol.as_deref())?;
    let id = state.directory.create_ai_session(req.host(), req.duration(), &symbol)?;
    created(&state, &id)
}

async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<SessionView>> {
    let record = state.directory.get_session(&id)?;
    Ok(Json(state.view(&record)))
}

async fn join(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<JoinReq>,
) -> ApiResult<Json<SessionView>> {
    let record = state.directory.join(&id, PlayerSeed::new(req.user_id, req.display_name))?;
    Ok(Json(state.view(&record)))
}

async fn open_position(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<OpenReq>,
) -> ApiResult<Json<SessionView>> {
    let price = state.trade_price(&state.ledger.snapshot(&id)?)?;
    let record = state.ledger.open_position(&id, &req.user_id, req.collateral, req.side, price)?;
    Ok(Json(state.view(&record)))
}

async fn close_all(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UserReq>,
) -> ApiResult<Json<SessionView>> {
    let current = state.ledger.snapshot(&id)?;
    // a flat player may close before any price exists
    let price = match state.trade_price(&current) {
        Ok(price) => price,
        Err(e) if current.session.player(&req.user_id).is_some_and(|p| p.has_open_positions()) => return Err(e),
        Err(_) => 0.0,
    };
    let record = state.ledger.close_all_positions(&id, &req.user_id, price)?;
    Ok(Json(state.view(&record)))
}

async fn set_leverage(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<LeverageReq>,
) -> ApiResult<Json<SessionView>> {
    let record = state.ledger.set_leverage(&id, &req.user_id, req.leverage)?;
    Ok(Json(state.view(&record)))
}

async fn chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatReq>,
) -> ApiResult<Json<SessionView>> {
    let record = state.ledger.post_chat_message(&id, &req.user_id, &req.text)?;
    Ok(Json(state.view(&record)))
}

async fn tick(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UserReq>,
) -> ApiResult<Json<SessionView>> {
    if !state.config.client_clock {
        return Err(ApiError::Conflict("the server drives the match clock".into()));
    }
    let record = state.ledger.tick(&id, &req.user_id)?;
    Ok(Json(state.view(&record)))
}

async fn finish(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UserReq>,
) -> ApiResult<Json<SessionView>> {
    if state.ledger.snapshot(&id)?.session.host_id != req.user_id {
        return Err(engine::LedgerError::NotHost.into());
    }
    let record = state.ledger.force_finish(&id, FinishReason::Forced)?;
    Ok(Json(state.view(&record)))
}

async fn history(State(state): State<AppState>, Path(user_id): Path<String>) -> Json<Vec<MatchSummary>> {
    Json(state.directory.list_finished_for_player(&user_id))
}

async fn leaderboard(State(state): State<AppState>) -> Json<Vec<LeaderboardEntry>> {
    Json(state.directory.leaderboard())
}

async fn push_candle(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Json(candle): Json<Candle>,
) -> ApiResult<StatusCode> {
    state.feed.push(&symbol.to_uppercase(), candle)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn status(State(state): State<AppState>) -> Json<StatusResp> {
    let live_sessions = state.ledger.store().scan(&|s: &engine::MatchSession| !s.is_finished()).len();
    Json(StatusResp {
        symbols: state.feed.symbols(),
        live_sessions,
        server_clock: !state.config.client_clock,
        settlement_webhook: state.settlement.is_active(),
    })
}

async fn ws(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let record = state.directory.get_session(&id)?;
    let as_host = query.user_id.as_deref() == Some(record.session.host_id.as_str());
    Ok(ws.on_upgrade(move |socket| handle_ws(state, id, as_host, socket)))
}

fn encode(state: &AppState, record: &Versioned) -> Option<Message> {
    match serde_json::to_string(&state.view(record)) {
        Ok(json) => Some(Message::Text(json)),
        Err(e) => {
            warn!(target: "clash", error = %e, "failed to serialize session view");
            None
        }
    }
}

async fn handle_ws(state: AppState, id: String, as_host: bool, socket: WebSocket) {
    let session_rx = match state.ledger.subscribe(&id) {
        Ok(rx) => rx,
        Err(e) => {
            debug!(target: "clash", session = %id, error = %e, "ws subscribe failed");
            return;
        }
    };
    if as_host {
        state.host_connected(&id);
    }
    debug!(target: "clash", session = %id, as_host, "ws client connected");

    let (sender, receiver) = socket.split();
    pump(state.clone(), session_rx, sender, receiver).await;

    socket_closed(&state, &id, as_host);
    debug!(target: "clash", session = %id, "ws client disconnected");
}

/// Pushes every committed snapshot to `sink` until either side goes away.
/// Returns only once both halves have stopped.
async fn pump<S, R, E>(state: AppState, mut session_rx: watch::Receiver<Versioned>, mut sink: S, mut stream: R)
where
    S: Sink<Message> + Unpin + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Send + 'static,
{
    let mut send_task = tokio::spawn(async move {
        loop {
            let record = session_rx.borrow_and_update().clone();
            if let Some(msg) = encode(&state, &record) {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            if session_rx.changed().await.is_err() {
                break;
            }
        }
    });
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });
    // dropping a JoinHandle does not stop the task, so the survivor is aborted
    let sender_done = tokio::select! {
        _ = &mut send_task => true,
        _ = &mut recv_task => false,
    };
    let survivor = if sender_done { recv_task } else { send_task };
    survivor.abort();
    let _ = survivor.await;
}

fn socket_closed(state: &AppState, id: &str, as_host: bool) {
    if as_host && state.host_disconnected(id) {
        host_left(state, id);
    }
}

/// With the client-driven clock nobody can count down once the host is gone,
/// so the match ends there.
fn host_left(state: &AppState, id: &str) {
    if !state.config.client_clock {
        return;
    }
    let live = matches!(state.ledger.snapshot(id), Ok(r) if r.session.status == SessionStatus::Playing);
    if !live {
        return;
    }
    match state.ledger.force_finish(id, FinishReason::HostDisconnected) {
        Ok(_) => info!(target: "clash", session = id, "host disconnected, match closed"),
        Err(e) => warn!(target: "clash", session = id, error = %e, "could not close abandoned match"),
    }
}
