//! Lifecycle events for the settlement collaborator. They carry enough to
//! pay out a match; the ledger itself never moves tokens.

use crate::risk::portfolio_value;
use crate::{FinishReason, MatchSession};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlayerResult {
    pub user_id: String,
    pub display_name: String,
    pub total_realized_pnl: f64,
    /// Marked at the final price, open positions included.
    pub portfolio_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MatchResult {
    pub session_id: String,
    pub host_id: String,
    pub external_ref: Option<u64>,
    pub reason: Option<FinishReason>,
    /// Close of the last recorded candle; `None` if no candle ever arrived.
    pub final_price: Option<f64>,
    pub results: Vec<PlayerResult>,
    /// Decided on realized P&L. `None` for a draw or a match that never had
    /// two players.
    pub winner: Option<String>,
}

impl MatchResult {
    pub fn from_session(session: &MatchSession) -> Self {
        let final_price = session.latest_price();
        let results: Vec<PlayerResult> = session
            .players
            .iter()
            .map(|p| PlayerResult {
                user_id: p.user_id.clone(),
                display_name: p.display_name.clone(),
                total_realized_pnl: p.total_realized_pnl,
                portfolio_value: final_price.map(|price| portfolio_value(p, price)),
            })
            .collect();
        Self {
            session_id: session.id.clone(),
            host_id: session.host_id.clone(),
            external_ref: session.external_settlement_ref,
            reason: session.finish_reason,
            final_price,
            winner: winner_of(&results),
            results,
        }
    }
}

fn winner_of(results: &[PlayerResult]) -> Option<String> {
    match results {
        [a, b] if a.total_realized_pnl > b.total_realized_pnl => Some(a.user_id.clone()),
        [a, b] if b.total_realized_pnl > a.total_realized_pnl => Some(b.user_id.clone()),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SettlementEvent {
    Created {
        session_id: String,
        host_id: String,
        external_ref: Option<u64>,
    },
    Started {
        session_id: String,
        host_id: String,
        player_ids: Vec<String>,
        external_ref: Option<u64>,
    },
    Finished(MatchResult),
}

impl SettlementEvent {
    pub fn created(session: &MatchSession) -> Self {
        SettlementEvent::Created {
            session_id: session.id.clone(),
            host_id: session.host_id.clone(),
            external_ref: session.external_settlement_ref,
        }
    }

    pub fn started(session: &MatchSession) -> Self {
        SettlementEvent::Started {
            session_id: session.id.clone(),
            host_id: session.host_id.clone(),
            player_ids: session.players.iter().map(|p| p.user_id.clone()).collect(),
            external_ref: session.external_settlement_ref,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            SettlementEvent::Created { session_id, .. } | SettlementEvent::Started { session_id, .. } => session_id,
            SettlementEvent::Finished(result) => &result.session_id,
        }
    }
}
