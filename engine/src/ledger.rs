//! The match ledger: sole writer of record for every session.
//!
//! Each mutation is a small transaction: load the current version, compute the
//! next session with the executor, and commit with compare-and-swap. A lost
//! race reloads and recomputes; after `max_retries` conflicts the call fails
//! with `Contention`. Nothing is written unless the whole step validated.

use crate::chat::compose_message;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::events::{MatchResult, SettlementEvent};
use crate::executor;
use crate::feed::{is_valid_candle, merge_candle, MergeOutcome};
use crate::policy::Action;
use crate::store::{SessionStore, Versioned};
use crate::{now_ms, Candle, FinishReason, MatchSession, Player, PlayerSeed, SessionStatus, Side};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;

pub struct MatchLedger {
    store: Arc<dyn SessionStore>,
    config: LedgerConfig,
    events: broadcast::Sender<SettlementEvent>,
}

fn require_playing(session: &MatchSession) -> LedgerResult<()> {
    match session.status {
        SessionStatus::Playing => Ok(()),
        SessionStatus::Waiting => Err(LedgerError::NotStarted),
        SessionStatus::Finished => Err(LedgerError::AlreadyFinished),
    }
}

/// Rebuilds the session with one player's holdings replaced by `update`'s result.
fn with_player<F>(session: &MatchSession, user_id: &str, update: F) -> LedgerResult<MatchSession>
where
    F: FnOnce(&Player) -> LedgerResult<Player>,
{
    let idx = session
        .player_index(user_id)
        .ok_or_else(|| LedgerError::PlayerNotFound(user_id.to_string()))?;
    let player = update(&session.players[idx])?;
    let mut next = session.clone();
    next.players[idx] = player;
    Ok(next)
}

fn finish(session: &mut MatchSession, reason: FinishReason) {
    session.status = SessionStatus::Finished;
    session.finish_reason = Some(reason);
    session.finished_at = Some(now_ms());
}

impl MatchLedger {
    pub fn new(store: Arc<dyn SessionStore>, config: LedgerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { store, config, events }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SettlementEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SettlementEvent) {
        // no subscriber is fine: settlement forwarding is optional
        let _ = self.events.send(event);
    }

    fn publish_transitions(&self, before: &MatchSession, after: &MatchSession) {
        if before.status == SessionStatus::Waiting && after.status == SessionStatus::Playing {
            info!(target: "clash", session = %after.id, "match started");
            self.emit(SettlementEvent::started(after));
        }
        if !before.is_finished() && after.is_finished() {
            info!(target: "clash", session = %after.id, reason = ?after.finish_reason, "match finished");
            self.emit(SettlementEvent::Finished(MatchResult::from_session(after)));
        }
    }

    /// Runs `step` against the latest committed state until it commits.
    /// `step` returning `Ok(None)` means nothing to change; no write happens.
    fn transact<F>(&self, id: &str, op: &'static str, mut step: F) -> LedgerResult<Versioned>
    where
        F: FnMut(&MatchSession) -> LedgerResult<Option<MatchSession>>,
    {
        let attempts = self.config.max_retries.max(1);
        for attempt in 1..=attempts {
            let current = self.store.load(id)?;
            let Some(next) = step(&current.session)? else {
                return Ok(current);
            };
            match self.store.compare_and_swap(id, current.version, next)? {
                Some(committed) => {
                    self.publish_transitions(&current.session, &committed.session);
                    return Ok(committed);
                }
                None => {
                    debug!(target: "clash", session = id, op, attempt, "write conflict, retrying");
                    std::thread::yield_now();
                }
            }
        }
        warn!(target: "clash", session = id, op, attempts, "giving up on contended session");
        Err(LedgerError::Contention { attempts })
    }

    /// Registers a brand new session record.
    pub fn create(&self, session: MatchSession) -> LedgerResult<Versioned> {
        let record = self.store.insert(session)?;
        info!(target: "clash", session = %record.session.id, host = %record.session.host_id, "session created");
        self.emit(SettlementEvent::created(&record.session));
        if record.session.status == SessionStatus::Playing {
            self.emit(SettlementEvent::started(&record.session));
        }
        Ok(record)
    }

    pub fn snapshot(&self, id: &str) -> LedgerResult<Versioned> {
        self.store.load(id)
    }

    pub fn subscribe(&self, id: &str) -> LedgerResult<watch::Receiver<Versioned>> {
        self.store.subscribe(id)
    }

    pub fn open_position(&self, id: &str, user_id: &str, collateral: f64, side: Side, tick_price: f64) -> LedgerResult<Versioned> {
        let committed = self.transact(id, "open_position", |session| {
            require_playing(session)?;
            let now = now_ms();
            let next = with_player(session, user_id, |p| {
                executor::open_position(p, collateral, side, tick_price, now, &self.config.rules)
            })?;
            Ok(Some(next))
        })?;
        debug!(target: "clash", session = id, user = user_id, ?side, collateral, tick_price, "position opened");
        Ok(committed)
    }

    pub fn close_all_positions(&self, id: &str, user_id: &str, tick_price: f64) -> LedgerResult<Versioned> {
        self.transact(id, "close_all_positions", |session| {
            require_playing(session)?;
            let player = session
                .player(user_id)
                .ok_or_else(|| LedgerError::PlayerNotFound(user_id.to_string()))?;
            if !player.has_open_positions() {
                return Ok(None);
            }
            let now = now_ms();
            let next = with_player(session, user_id, |p| executor::close_all_positions(p, tick_price, now))?;
            debug!(target: "clash", session = id, user = user_id, tick_price, "positions closed");
            Ok(Some(next))
        })
    }

    pub fn set_leverage(&self, id: &str, user_id: &str, leverage: u32) -> LedgerResult<Versioned> {
        self.transact(id, "set_leverage", |session| {
            if session.is_finished() {
                return Err(LedgerError::AlreadyFinished);
            }
            let next = with_player(session, user_id, |p| executor::set_leverage(p, leverage, &self.config.rules))?;
            Ok(Some(next))
        })
    }

    /// Applies an opponent proposal in one transaction, exactly as validated
    /// for a human: leverage first, then the open.
    pub fn apply_action(&self, id: &str, user_id: &str, action: &Action, tick_price: f64) -> LedgerResult<Versioned> {
        match *action {
            Action::CloseAll => self.close_all_positions(id, user_id, tick_price),
            Action::Open { side, leverage, collateral } => self.transact(id, "apply_action", |session| {
                require_playing(session)?;
                let now = now_ms();
                let rules = &self.config.rules;
                let next = with_player(session, user_id, |p| {
                    let levered = executor::set_leverage(p, leverage, rules)?;
                    executor::open_position(&levered, collateral, side, tick_price, now, rules)
                })?;
                Ok(Some(next))
            }),
        }
    }

    /// Chat is allowed in every status; it never touches player or timer state.
    pub fn post_chat_message(&self, id: &str, sender_id: &str, text: &str) -> LedgerResult<Versioned> {
        self.transact(id, "post_chat_message", |session| {
            let sender = session
                .player(sender_id)
                .ok_or_else(|| LedgerError::PlayerNotFound(sender_id.to_string()))?;
            let msg = compose_message(sender_id, &sender.display_name, text, now_ms(), self.config.max_chat_len)?;
            let mut next = session.clone();
            next.chat_log.push(msg);
            Ok(Some(next))
        })
    }

    pub fn join(&self, id: &str, seed: &PlayerSeed) -> LedgerResult<Versioned> {
        self.transact(id, "join", |session| {
            if session.is_finished() {
                return Err(LedgerError::AlreadyFinished);
            }
            if session.players.len() >= self.config.max_players {
                return Err(LedgerError::SessionFull);
            }
            if session.player(&seed.user_id).is_some() {
                return Err(LedgerError::AlreadyJoined(seed.user_id.clone()));
            }
            let mut next = session.clone();
            next.players.push(Player::new(seed.clone(), self.config.initial_cash));
            next.status = SessionStatus::Playing;
            Ok(Some(next))
        })
    }

    /// One second of match clock. Only the host's context drives the clock;
    /// everyone else just observes the committed countdown.
    pub fn tick(&self, id: &str, caller_id: &str) -> LedgerResult<Versioned> {
        self.transact(id, "tick", |session| {
            if session.host_id != caller_id {
                return Err(LedgerError::NotHost);
            }
            match session.status {
                SessionStatus::Finished => return Ok(None),
                SessionStatus::Waiting => return Err(LedgerError::NotStarted),
                SessionStatus::Playing => {}
            }
            let mut next = session.clone();
            next.remaining_seconds = next.remaining_seconds.saturating_sub(1);
            if next.remaining_seconds == 0 {
                finish(&mut next, FinishReason::TimerExpired);
            }
            Ok(Some(next))
        })
    }

    /// External cancellation. Finishing twice is a no-op, not an error.
    pub fn force_finish(&self, id: &str, reason: FinishReason) -> LedgerResult<Versioned> {
        self.transact(id, "force_finish", |session| {
            if session.is_finished() {
                return Ok(None);
            }
            let mut next = session.clone();
            finish(&mut next, reason);
            Ok(Some(next))
        })
    }

    /// Folds a feed candle into the session's price history. Finished
    /// sessions keep the history they ended with.
    pub fn record_candle(&self, id: &str, candle: Candle) -> LedgerResult<Versioned> {
        if !is_valid_candle(&candle) {
            return Err(ValidationError::InvalidPrice(candle.close).into());
        }
        self.transact(id, "record_candle", |session| {
            if session.is_finished() {
                return Ok(None);
            }
            let mut next = session.clone();
            match merge_candle(&mut next.price_history, candle, self.config.history_cap) {
                MergeOutcome::Stale => Ok(None),
                MergeOutcome::Appended | MergeOutcome::Replaced => Ok(Some(next)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::{OpponentKind, TradePhase};

    fn ledger() -> MatchLedger {
        MatchLedger::new(Arc::new(MemoryStore::new()), LedgerConfig::default())
    }

    fn waiting(ledger: &MatchLedger, id: &str, duration: u32) {
        let host = Player::new(PlayerSeed::new("host", "Host"), ledger.config().initial_cash);
        ledger
            .create(MatchSession {
                id: id.into(),
                players: vec![host],
                status: SessionStatus::Waiting,
                opponent: OpponentKind::Human,
                symbol: "BTCUSDT".into(),
                price_history: vec![],
                created_at: 0,
                duration_seconds: duration,
                remaining_seconds: duration,
                host_id: "host".into(),
                chat_log: vec![],
                external_settlement_ref: Some(3),
                finished_at: None,
                finish_reason: None,
            })
            .unwrap();
    }

    fn playing(ledger: &MatchLedger, id: &str, duration: u32) {
        waiting(ledger, id, duration);
        ledger.join(id, &PlayerSeed::new("guest", "Guest")).unwrap();
    }

    #[test]
    fn join_starts_match_and_caps_players() {
        let l = ledger();
        waiting(&l, "S1", 60);
        let v = l.join("S1", &PlayerSeed::new("guest", "Guest")).unwrap();
        assert_eq!(v.session.status, SessionStatus::Playing);
        assert_eq!(v.session.players.len(), 2);
        assert_eq!(l.join("S1", &PlayerSeed::new("third", "Third")).unwrap_err(), LedgerError::SessionFull);
    }

    #[test]
    fn join_after_finish_is_rejected() {
        let l = ledger();
        waiting(&l, "S1", 60);
        l.force_finish("S1", FinishReason::Forced).unwrap();
        assert_eq!(l.join("S1", &PlayerSeed::new("guest", "Guest")).unwrap_err(), LedgerError::AlreadyFinished);
    }

    #[test]
    fn trading_requires_playing() {
        let l = ledger();
        waiting(&l, "S1", 60);
        assert_eq!(l.open_position("S1", "host", 10.0, Side::Long, 1.0).unwrap_err(), LedgerError::NotStarted);
        // leverage may be picked in the lobby
        assert_eq!(l.set_leverage("S1", "host", 20).unwrap().session.players[0].leverage, 20);
    }

    #[test]
    fn open_then_close_through_ledger() {
        let l = ledger();
        playing(&l, "S1", 60);
        l.set_leverage("S1", "guest", 10).unwrap();
        let v = l.open_position("S1", "guest", 1_000.0, Side::Long, 60_000.0).unwrap();
        assert_eq!(v.session.player("guest").unwrap().cash, 99_000.0);
        let v = l.close_all_positions("S1", "guest", 61_000.0).unwrap();
        let guest = v.session.player("guest").unwrap();
        assert!((guest.cash - 100_166.5).abs() < 1e-6);
        assert_eq!(guest.trade_history.last().unwrap().phase, TradePhase::Close);
    }

    #[test]
    fn close_with_nothing_open_does_not_write() {
        let l = ledger();
        playing(&l, "S1", 60);
        let before = l.snapshot("S1").unwrap();
        let after = l.close_all_positions("S1", "host", 100.0).unwrap();
        assert_eq!(before.version, after.version);
        assert_eq!(*before.session, *after.session);
    }

    #[test]
    fn rejected_open_leaves_session_untouched() {
        let l = ledger();
        playing(&l, "S1", 60);
        let before = l.snapshot("S1").unwrap();
        let err = l.open_position("S1", "host", 200_000.0, Side::Short, 100.0).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCash { .. }));
        assert_eq!(l.snapshot("S1").unwrap().version, before.version);
    }

    #[test]
    fn unknown_player_and_session() {
        let l = ledger();
        playing(&l, "S1", 60);
        assert_eq!(l.set_leverage("S1", "nobody", 5).unwrap_err(), LedgerError::PlayerNotFound("nobody".into()));
        assert_eq!(l.tick("NOPE", "host").unwrap_err(), LedgerError::SessionNotFound("NOPE".into()));
    }

    #[test]
    fn only_host_ticks() {
        let l = ledger();
        playing(&l, "S1", 60);
        assert_eq!(l.tick("S1", "guest").unwrap_err(), LedgerError::NotHost);
        assert_eq!(l.tick("S1", "host").unwrap().session.remaining_seconds, 59);
    }

    #[test]
    fn clock_runs_out_and_stays_finished() {
        let l = ledger();
        playing(&l, "S1", 2);
        l.tick("S1", "host").unwrap();
        let done = l.tick("S1", "host").unwrap();
        assert_eq!(done.session.status, SessionStatus::Finished);
        assert_eq!(done.session.finish_reason, Some(FinishReason::TimerExpired));
        let again = l.tick("S1", "host").unwrap();
        assert_eq!(again.version, done.version);
        assert_eq!(again.session.remaining_seconds, 0);
        assert_eq!(l.open_position("S1", "host", 1.0, Side::Long, 1.0).unwrap_err(), LedgerError::AlreadyFinished);
    }

    #[test]
    fn finish_emits_settlement_event() {
        let l = ledger();
        let mut events = l.subscribe_events();
        playing(&l, "S1", 1);
        l.tick("S1", "host").unwrap();
        let mut finished = None;
        while let Ok(ev) = events.try_recv() {
            if let SettlementEvent::Finished(result) = ev {
                finished = Some(result);
            }
        }
        let result = finished.expect("finished event");
        assert_eq!(result.session_id, "S1");
        assert_eq!(result.external_ref, Some(3));
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.winner, None);
    }

    #[test]
    fn force_finish_is_idempotent() {
        let l = ledger();
        playing(&l, "S1", 60);
        let a = l.force_finish("S1", FinishReason::HostDisconnected).unwrap();
        let b = l.force_finish("S1", FinishReason::Forced).unwrap();
        assert_eq!(a.version, b.version);
        assert_eq!(b.session.finish_reason, Some(FinishReason::HostDisconnected));
    }

    #[test]
    fn chat_needs_a_participant_and_text() {
        let l = ledger();
        playing(&l, "S1", 60);
        let v = l.post_chat_message("S1", "guest", " hi ").unwrap();
        assert_eq!(v.session.chat_log[0].text, "hi");
        assert_eq!(v.session.chat_log[0].sender_name, "Guest");
        assert_eq!(l.post_chat_message("S1", "guest", "  ").unwrap_err(), ValidationError::EmptyMessage.into());
        assert!(matches!(l.post_chat_message("S1", "lurker", "hi"), Err(LedgerError::PlayerNotFound(_))));
    }

    #[test]
    fn candles_merge_into_history() {
        let l = ledger();
        playing(&l, "S1", 60);
        let c = |time, close| Candle { time, open: close, high: close, low: close, close };
        l.record_candle("S1", c(1, 10.0)).unwrap();
        l.record_candle("S1", c(1, 11.0)).unwrap();
        let v = l.record_candle("S1", c(2, 12.0)).unwrap();
        assert_eq!(v.session.price_history.len(), 2);
        assert_eq!(v.session.latest_price(), Some(12.0));
        let stale = l.record_candle("S1", c(0, 1.0)).unwrap();
        assert_eq!(stale.version, v.version);
    }

    #[test]
    fn opponent_open_applies_leverage_and_validation() {
        let l = ledger();
        playing(&l, "S1", 60);
        let open = Action::Open { side: Side::Short, leverage: 40, collateral: 50_000.0 };
        let v = l.apply_action("S1", "guest", &open, 100.0).unwrap();
        let guest = v.session.player("guest").unwrap();
        assert_eq!(guest.leverage, 40);
        assert_eq!(guest.shorts[0].leverage, 40);
        let too_big = Action::Open { side: Side::Long, leverage: 5, collateral: 60_000.0 };
        assert!(matches!(l.apply_action("S1", "guest", &too_big, 100.0), Err(LedgerError::InsufficientCash { .. })));
        // the failed proposal did not sneak its leverage in
        assert_eq!(l.snapshot("S1").unwrap().session.player("guest").unwrap().leverage, 40);
        let bad_lev = Action::Open { side: Side::Long, leverage: 7, collateral: 1.0 };
        assert!(matches!(l.apply_action("S1", "guest", &bad_lev, 100.0), Err(LedgerError::Validation(_))));
    }
}
