//! Match engine for head-to-head leveraged paper trading.
//!
//! `risk` and `executor` are pure; `ledger` commits their results against a
//! versioned `store`; `directory` fronts session lifecycle and history.

pub mod chat;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod executor;
pub mod feed;
pub mod ledger;
pub mod policy;
pub mod risk;
pub mod store;
pub mod types;

pub use config::{LedgerConfig, TradingRules, SUPPORTED_LEVERAGE};
pub use directory::{LeaderboardEntry, MatchSummary, Outcome, SessionDirectory};
pub use error::{LedgerError, LedgerResult, ValidationError};
pub use events::{MatchResult, PlayerResult, SettlementEvent};
pub use ledger::MatchLedger;
pub use policy::{Action, OpponentPolicy, RandomPolicy, RandomPolicyConfig};
pub use risk::{liquidation_price, portfolio_value, unrealized_pnl, PlayerMetrics};
pub use store::{MemoryStore, SessionStore, Versioned};
pub use types::*;

/// Wall clock in unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
