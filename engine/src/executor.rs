//! Trade executor: validated state transitions for a single player's holdings.
//!
//! Every function takes the current `Player` by reference and returns the next
//! one. Validation runs before anything is built, so a rejected request leaves
//! no trace, and the ledger can recompute these freely when a write conflicts.

use crate::config::TradingRules;
use crate::error::{LedgerError, LedgerResult, ValidationError};
use crate::risk::position_pnl;
use crate::{Player, Position, Side, Trade, TradePhase};
use uuid::Uuid;

/// Fill details for an open, before it is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenQuote {
    pub notional: f64,
    pub fee: f64,
    pub quantity_base: f64,
}

pub fn quote_open(collateral: f64, leverage: u32, tick_price: f64, rules: &TradingRules) -> OpenQuote {
    let notional = collateral * leverage as f64;
    let fee = notional * rules.fee_rate;
    OpenQuote { notional, fee, quantity_base: (notional - fee) / tick_price }
}

fn validate_price(tick_price: f64) -> Result<(), ValidationError> {
    if !tick_price.is_finite() || tick_price <= 0.0 {
        return Err(ValidationError::InvalidPrice(tick_price));
    }
    Ok(())
}

/// Keeps a player's history ordered by append even if the wall clock steps back.
fn next_timestamp(player: &Player, now_ms: i64) -> i64 {
    player.trade_history.last().map_or(now_ms, |t| t.timestamp.max(now_ms))
}

pub fn open_position(
    player: &Player,
    collateral: f64,
    side: Side,
    tick_price: f64,
    now_ms: i64,
    rules: &TradingRules,
) -> LedgerResult<Player> {
    if !collateral.is_finite() || collateral <= 0.0 {
        return Err(ValidationError::NonPositiveAmount(collateral).into());
    }
    validate_price(tick_price)?;
    if collateral > player.cash {
        return Err(LedgerError::InsufficientCash { needed: collateral, available: player.cash });
    }

    let leverage = player.leverage;
    let quote = quote_open(collateral, leverage, tick_price, rules);
    let position = Position {
        entry_price: tick_price,
        quantity_base: quote.quantity_base,
        collateral,
        leverage,
    };
    let trade = Trade {
        id: Uuid::new_v4(),
        side,
        quantity_base: quote.quantity_base,
        price: tick_price,
        leverage,
        realized_pnl: 0.0,
        phase: TradePhase::Open,
        timestamp: next_timestamp(player, now_ms),
        collateral,
    };

    let mut next = player.clone();
    next.cash -= collateral;
    match side {
        Side::Long => next.longs.push(position),
        Side::Short => next.shorts.push(position),
    }
    next.trade_history.push(trade);
    Ok(next)
}

/// Closes every open position at `tick_price`. A flat player comes back
/// unchanged. Cash is not floored: a position may return less than nothing.
pub fn close_all_positions(player: &Player, tick_price: f64, now_ms: i64) -> LedgerResult<Player> {
    if !player.has_open_positions() {
        return Ok(player.clone());
    }
    validate_price(tick_price)?;

    let timestamp = next_timestamp(player, now_ms);
    let mut cash_gained = 0.0;
    let mut realized = 0.0;
    let mut closed = Vec::with_capacity(player.longs.len() + player.shorts.len());
    for side in [Side::Long, Side::Short] {
        for pos in player.positions(side) {
            let pnl = position_pnl(pos, side, tick_price);
            realized += pnl;
            cash_gained += pos.collateral + pnl;
            closed.push(Trade {
                id: Uuid::new_v4(),
                side,
                quantity_base: pos.quantity_base,
                price: tick_price,
                leverage: pos.leverage,
                realized_pnl: pnl,
                phase: TradePhase::Close,
                timestamp,
                collateral: pos.collateral,
            });
        }
    }

    let mut next = player.clone();
    next.cash += cash_gained;
    next.longs.clear();
    next.shorts.clear();
    next.total_realized_pnl += realized;
    next.trade_history.extend(closed);
    Ok(next)
}

/// Changes the leverage used for future opens only.
pub fn set_leverage(player: &Player, leverage: u32, rules: &TradingRules) -> LedgerResult<Player> {
    if !rules.supports_leverage(leverage) {
        return Err(ValidationError::InvalidLeverage(leverage).into());
    }
    let mut next = player.clone();
    next.leverage = leverage;
    Ok(next)
}
