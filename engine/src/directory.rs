//! Session directory: allocates lobby codes, admits players, and answers the
//! read-only history and leaderboard queries.

use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::ledger::MatchLedger;
use crate::store::Versioned;
use crate::{now_ms, MatchSession, OpponentKind, Player, PlayerSeed, SessionStatus, AI_USER_SUFFIX};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// No 0/O or 1/I, so codes survive being read aloud.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;
const CODE_ATTEMPTS: usize = 8;

pub fn generate_session_code<R: Rng>(rng: &mut R) -> String {
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Outcome { Win, Loss, Draw }

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MatchSummary {
    pub session_id: String,
    pub symbol: String,
    pub opponent: OpponentKind,
    pub opponent_name: Option<String>,
    pub outcome: Outcome,
    pub realized_pnl: f64,
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: String,
    pub display_name: String,
    pub total_pnl: f64,
    pub battles: u32,
}

pub struct SessionDirectory {
    ledger: Arc<MatchLedger>,
}

impl SessionDirectory {
    pub fn new(ledger: Arc<MatchLedger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<MatchLedger> {
        &self.ledger
    }

    fn new_session(&self, id: String, host: PlayerSeed, duration_seconds: u32, symbol: &str) -> MatchSession {
        let host_id = host.user_id.clone();
        MatchSession {
            id,
            players: vec![Player::new(host, self.ledger.config().initial_cash)],
            status: SessionStatus::Waiting,
            opponent: OpponentKind::Human,
            symbol: symbol.to_string(),
            price_history: Vec::new(),
            created_at: now_ms(),
            duration_seconds,
            remaining_seconds: duration_seconds,
            host_id,
            chat_log: Vec::new(),
            external_settlement_ref: None,
            finished_at: None,
            finish_reason: None,
        }
    }

    /// Allocates a fresh code and stores the session built by `build`,
    /// drawing again if the code is already taken.
    fn allocate<F>(&self, build: F) -> LedgerResult<Versioned>
    where
        F: Fn(String) -> MatchSession,
    {
        let mut rng = rand::rng();
        let mut last_err = None;
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_session_code(&mut rng);
            match self.ledger.create(build(code)) {
                Ok(record) => return Ok(record),
                Err(LedgerError::DuplicateSession(code)) => {
                    debug!(target: "clash", %code, "session code collision");
                    last_err = Some(LedgerError::DuplicateSession(code));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(LedgerError::Contention { attempts: CODE_ATTEMPTS as u32 }))
    }

    /// Opens a lobby for a human-vs-human match; returns the join code.
    pub fn create_session(
        &self,
        host: PlayerSeed,
        duration_seconds: u32,
        symbol: &str,
        external_ref: Option<u64>,
    ) -> LedgerResult<String> {
        if duration_seconds == 0 {
            return Err(ValidationError::InvalidDuration.into());
        }
        let record = self.allocate(|code| {
            let mut session = self.new_session(code, host.clone(), duration_seconds, symbol);
            session.external_settlement_ref = external_ref;
            session
        })?;
        Ok(record.session.id.clone())
    }

    /// Starts a match against the house bot. The session is live immediately.
    pub fn create_ai_session(&self, host: PlayerSeed, duration_seconds: u32, symbol: &str) -> LedgerResult<String> {
        if duration_seconds == 0 {
            return Err(ValidationError::InvalidDuration.into());
        }
        let record = self.allocate(|code| {
            let bot = PlayerSeed::new(format!("bot-{}{AI_USER_SUFFIX}", code.to_lowercase()), "Opponent");
            let mut session = self.new_session(code, host.clone(), duration_seconds, symbol);
            session.opponent = OpponentKind::Ai;
            session.players.push(Player::new(bot, self.ledger.config().initial_cash));
            session.status = SessionStatus::Playing;
            session
        })?;
        info!(target: "clash", session = %record.session.id, "ai match started");
        Ok(record.session.id.clone())
    }

    pub fn get_session(&self, id: &str) -> LedgerResult<Versioned> {
        self.ledger.snapshot(id)
    }

    /// Admits a second player. Capacity is re-checked atomically by the ledger.
    pub fn join(&self, id: &str, seed: PlayerSeed) -> LedgerResult<Versioned> {
        let current = self.ledger.snapshot(id)?;
        if current.session.host_id == seed.user_id || current.session.player(&seed.user_id).is_some() {
            return Err(LedgerError::AlreadyJoined(seed.user_id));
        }
        if current.session.opponent == OpponentKind::Ai || current.session.players.len() >= self.ledger.config().max_players {
            return Err(LedgerError::SessionFull);
        }
        let record = self.ledger.join(id, &seed)?;
        info!(target: "clash", session = id, user = %seed.user_id, "player joined");
        Ok(record)
    }

    /// Finished matches the user took part in, newest first.
    pub fn list_finished_for_player(&self, user_id: &str) -> Vec<MatchSummary> {
        let mut out: Vec<MatchSummary> = self
            .ledger
            .store()
            .scan(&|s: &MatchSession| s.is_finished() && s.player(user_id).is_some())
            .into_iter()
            .filter_map(|record| summarize(&record.session, user_id))
            .collect();
        out.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        out
    }

    /// Realized P&L across finished human-vs-human matches, best first.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let sessions = self
            .ledger
            .store()
            .scan(&|s: &MatchSession| s.is_finished() && s.players.len() == 2 && s.opponent == OpponentKind::Human);
        let mut stats: HashMap<String, LeaderboardEntry> = HashMap::new();
        for record in &sessions {
            for p in &record.session.players {
                let entry = stats.entry(p.user_id.clone()).or_insert_with(|| LeaderboardEntry {
                    rank: 0,
                    user_id: p.user_id.clone(),
                    display_name: p.display_name.clone(),
                    total_pnl: 0.0,
                    battles: 0,
                });
                entry.total_pnl += p.total_realized_pnl;
                entry.battles += 1;
            }
        }
        let mut board: Vec<LeaderboardEntry> = stats.into_values().collect();
        board.sort_by(|a, b| b.total_pnl.total_cmp(&a.total_pnl).then_with(|| a.user_id.cmp(&b.user_id)));
        for (i, entry) in board.iter_mut().enumerate() {
            entry.rank = i + 1;
        }
        board
    }
}

fn summarize(session: &MatchSession, user_id: &str) -> Option<MatchSummary> {
    let me = session.player(user_id)?;
    let opponent = session.players.iter().find(|p| p.user_id != user_id);
    let outcome = match opponent {
        Some(o) if me.total_realized_pnl > o.total_realized_pnl => Outcome::Win,
        Some(o) if me.total_realized_pnl < o.total_realized_pnl => Outcome::Loss,
        _ => Outcome::Draw,
    };
    Some(MatchSummary {
        session_id: session.id.clone(),
        symbol: session.symbol.clone(),
        opponent: session.opponent,
        opponent_name: opponent.map(|o| o.display_name.clone()),
        outcome,
        realized_pnl: me.total_realized_pnl,
        finished_at: session.finished_at,
    })
}
