//! Background work for a live session: copying feed candles into its history,
//! the server-side host clock, and the house bot. One task per session, gone
//! once the session finishes.

use engine::{OpponentPolicy, RandomPolicy, RandomPolicyConfig, SessionStatus};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::state::AppState;

const CLOCK_PERIOD: Duration = Duration::from_secs(1);

/// Starts the session's driver unless one is already running.
pub fn drive_session(state: &AppState, id: &str) {
    if !state.claim_driver(id) {
        return;
    }
    let state = state.clone();
    let id = id.to_string();
    tokio::spawn(async move {
        if let Err(e) = run(&state, &id).await {
            warn!(target: "clash", session = %id, error = %e, "session driver stopped");
        }
        state.release_driver(&id);
    });
}

async fn run(state: &AppState, id: &str) -> anyhow::Result<()> {
    let mut session_rx = state.ledger.subscribe(id)?;
    let (symbol, host_id, bot_id) = {
        let current = session_rx.borrow_and_update();
        let s = &current.session;
        if s.is_finished() {
            return Ok(());
        }
        let bot = s.ai_player().map(|p| p.user_id.clone());
        (s.symbol.clone(), s.host_id.clone(), bot)
    };

    // an unknown symbol just never delivers; keep a sender alive so the
    // receiver does not report closed
    let (_idle_tx, idle_rx) = watch::channel(None);
    let mut feed_rx = state.feed.subscribe(&symbol).unwrap_or(idle_rx);
    let mut feed_open = true;

    let server_clock = !state.config.client_clock;
    let mut clock = interval_at(Instant::now() + CLOCK_PERIOD, CLOCK_PERIOD);

    let ai_every = state.config.ai_interval();
    let mut ai_ticker = interval_at(Instant::now() + ai_every, ai_every);
    let mut policy: Option<Box<dyn OpponentPolicy>> = bot_id
        .as_ref()
        .map(|_| Box::new(RandomPolicy::new(RandomPolicyConfig::default())) as Box<dyn OpponentPolicy>);
    let vs_ai = policy.is_some();
    let warmup = state.config.ai_warmup_candles;

    debug!(target: "clash", session = id, server_clock, vs_ai, "session driver started");
    loop {
        tokio::select! {
            changed = session_rx.changed() => {
                if changed.is_err() || session_rx.borrow_and_update().session.is_finished() {
                    break;
                }
            }
            changed = feed_rx.changed(), if feed_open => {
                if changed.is_err() {
                    feed_open = false;
                    continue;
                }
                let candle = *feed_rx.borrow_and_update();
                if let Some(candle) = candle {
                    if let Err(e) = state.ledger.record_candle(id, candle) {
                        debug!(target: "clash", session = id, error = %e, "candle not recorded");
                    }
                }
            }
            _ = clock.tick(), if server_clock => host_tick(state, id, &host_id),
            _ = ai_ticker.tick(), if policy.is_some() => {
                if let (Some(p), Some(bot_id)) = (policy.as_mut(), bot_id.as_deref()) {
                    bot_turn(state, id, bot_id, p.as_mut(), warmup);
                }
            }
        }
    }
    info!(target: "clash", session = id, "session driver finished");
    Ok(())
}

/// Counts down on the host's behalf. Waiting lobbies are left alone.
fn host_tick(state: &AppState, id: &str, host_id: &str) {
    let playing = matches!(state.ledger.snapshot(id), Ok(r) if r.session.status == SessionStatus::Playing);
    if !playing {
        return;
    }
    if let Err(e) = state.ledger.tick(id, host_id) {
        warn!(target: "clash", session = id, error = %e, "clock tick failed");
    }
}

/// One decision cycle. Anything that goes wrong just skips the cycle.
fn bot_turn(state: &AppState, id: &str, bot_id: &str, policy: &mut dyn OpponentPolicy, warmup: usize) {
    let record = match state.ledger.snapshot(id) {
        Ok(r) => r,
        Err(e) => {
            debug!(target: "clash", session = id, error = %e, "bot skipped");
            return;
        }
    };
    if record.session.status != SessionStatus::Playing || record.session.price_history.len() < warmup {
        return;
    }
    let Ok(price) = state.trade_price(&record) else {
        return;
    };
    let Some(me) = record.session.player(bot_id) else {
        return;
    };
    let Some(action) = policy.decide(me, price) else {
        return;
    };
    match state.ledger.apply_action(id, bot_id, &action, price) {
        Ok(_) => debug!(target: "clash", session = id, ?action, price, "bot acted"),
        Err(e) => debug!(target: "clash", session = id, ?action, error = %e, "bot action rejected"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use clap::Parser;
    use engine::{Candle, FinishReason, PlayerSeed};

    fn state(args: &[&str]) -> AppState {
        let mut argv = vec!["match_api"];
        argv.extend_from_slice(args);
        AppState::new(ServerConfig::parse_from(argv))
    }

    fn flat(time: i64, price: f64) -> Candle {
        Candle { time, open: price, high: price, low: price, close: price }
    }

    #[tokio::test(start_paused = true)]
    async fn server_clock_runs_the_match_out() {
        let st = state(&[]);
        let id = st.directory.create_session(PlayerSeed::new("h", "H"), 3, "BTCUSDT", None).unwrap();
        st.directory.join(&id, PlayerSeed::new("g", "G")).unwrap();
        drive_session(&st, &id);
        assert!(!st.claim_driver(&id));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let session = st.ledger.snapshot(&id).unwrap().session;
        assert!(session.is_finished());
        assert_eq!(session.remaining_seconds, 0);
        assert_eq!(session.finish_reason, Some(FinishReason::TimerExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn feed_candles_land_in_history() {
        let st = state(&["--client-clock"]);
        let id = st.directory.create_session(PlayerSeed::new("h", "H"), 60, "BTCUSDT", None).unwrap();
        drive_session(&st, &id);
        tokio::task::yield_now().await;

        st.feed.push("BTCUSDT", flat(1, 100.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        st.feed.push("BTCUSDT", flat(2, 101.0)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let session = st.ledger.snapshot(&id).unwrap().session;
        assert_eq!(session.price_history.len(), 2);
        assert_eq!(session.latest_price(), Some(101.0));
        // client clock: nothing ticked on the host's behalf
        assert_eq!(session.remaining_seconds, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_waits_for_warmup_then_trades() {
        let st = state(&["--client-clock", "--ai-warmup-candles", "2"]);
        let id = st.directory.create_ai_session(PlayerSeed::new("h", "H"), 60, "BTCUSDT").unwrap();
        drive_session(&st, &id);
        tokio::task::yield_now().await;

        st.feed.push("BTCUSDT", flat(1, 100.0)).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let bot_trades = |st: &AppState| {
            let session = st.ledger.snapshot(&id).unwrap().session;
            session.guest().map(|b| b.trade_history.len()).unwrap_or(0)
        };
        assert_eq!(bot_trades(&st), 0);

        st.feed.push("BTCUSDT", flat(2, 100.0)).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(bot_trades(&st) > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_trades_its_own_seat_even_against_a_suffixed_host() {
        let st = state(&["--client-clock", "--ai-warmup-candles", "1"]);
        let id = st.directory.create_ai_session(PlayerSeed::new("kai-ai", "Kai"), 60, "BTCUSDT").unwrap();
        drive_session(&st, &id);
        tokio::task::yield_now().await;

        st.feed.push("BTCUSDT", flat(1, 100.0)).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        let session = st.ledger.snapshot(&id).unwrap().session;
        assert!(session.player("kai-ai").unwrap().trade_history.is_empty());
        assert!(!session.ai_player().unwrap().trade_history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn driver_exits_when_match_is_forced_over() {
        let st = state(&["--client-clock"]);
        let id = st.directory.create_ai_session(PlayerSeed::new("h", "H"), 60, "BTCUSDT").unwrap();
        drive_session(&st, &id);
        tokio::task::yield_now().await;
        st.ledger.force_finish(&id, FinishReason::Forced).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(st.claim_driver(&id));
    }
}
