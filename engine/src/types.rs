use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side { Long, Short }

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradePhase { Open, Close }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub entry_price: f64,
    pub quantity_base: f64,
    pub collateral: f64,
    pub leverage: u32, // captured at open, never follows the player's setting
}

/// Append-only ledger record. `realized_pnl` is zero for `Open` records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub id: Uuid,
    pub side: Side,
    pub quantity_base: f64,
    pub price: f64,
    pub leverage: u32,
    pub realized_pnl: f64,
    pub phase: TradePhase,
    pub timestamp: i64, // unix millis
    pub collateral: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub user_id: String,
    pub display_name: String,
    pub cash: f64,
    pub initial_cash: f64,
    pub leverage: u32,
    pub longs: Vec<Position>,
    pub shorts: Vec<Position>,
    pub total_realized_pnl: f64,
    pub trade_history: Vec<Trade>,
}

impl Player {
    pub fn new(seed: PlayerSeed, initial_cash: f64) -> Self {
        Self {
            user_id: seed.user_id,
            display_name: seed.display_name,
            cash: initial_cash,
            initial_cash,
            leverage: 1,
            longs: Vec::new(),
            shorts: Vec::new(),
            total_realized_pnl: 0.0,
            trade_history: Vec::new(),
        }
    }

    pub fn has_open_positions(&self) -> bool {
        !self.longs.is_empty() || !self.shorts.is_empty()
    }

    pub fn positions(&self, side: Side) -> &[Position] {
        match side {
            Side::Long => &self.longs,
            Side::Short => &self.shorts,
        }
    }
}

/// Identity of someone entering a match; the directory turns it into a funded `Player`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerSeed {
    pub user_id: String,
    pub display_name: String,
}

impl PlayerSeed {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { user_id: user_id.into(), display_name: display_name.into() }
    }
}

pub const AI_USER_SUFFIX: &str = "-ai";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus { Waiting, Playing, Finished }

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpponentKind { Human, Ai }

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    TimerExpired,
    Forced,
    HostDisconnected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchSession {
    pub id: String,
    pub players: Vec<Player>,
    pub status: SessionStatus,
    pub opponent: OpponentKind,
    pub symbol: String,
    pub price_history: Vec<Candle>,
    pub created_at: i64,
    pub duration_seconds: u32,
    pub remaining_seconds: u32,
    pub host_id: String,
    pub chat_log: Vec<ChatMessage>,
    pub external_settlement_ref: Option<u64>,
    pub finished_at: Option<i64>,
    pub finish_reason: Option<FinishReason>,
}

impl MatchSession {
    pub fn player(&self, user_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn player_index(&self, user_id: &str) -> Option<usize> {
        self.players.iter().position(|p| p.user_id == user_id)
    }

    pub fn host(&self) -> Option<&Player> {
        self.player(&self.host_id)
    }

    /// The participant that is not the host, if any has joined.
    pub fn guest(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.user_id != self.host_id)
    }

    /// The house bot's seat. Decided by how the session was created, never by
    /// the shape of a user id.
    pub fn ai_player(&self) -> Option<&Player> {
        match self.opponent {
            OpponentKind::Ai => self.guest(),
            OpponentKind::Human => None,
        }
    }

    pub fn latest_price(&self) -> Option<f64> {
        self.price_history.last().map(|c| c.close)
    }

    pub fn is_finished(&self) -> bool {
        self.status == SessionStatus::Finished
    }
}

/// Match length presets offered by the lobby.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GameMode { Blitz, Rapid }

impl GameMode {
    pub fn duration_seconds(self) -> u32 {
        match self {
            GameMode::Blitz => 180,
            GameMode::Rapid => 480,
        }
    }
}
