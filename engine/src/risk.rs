//! Pure position math. Nothing here touches shared state, so views may call it
//! on every price refresh without coordinating with the ledger.

use crate::{Player, Position, Side};
use serde::Serialize;

pub fn position_pnl(pos: &Position, side: Side, price: f64) -> f64 {
    match side {
        Side::Long => (price - pos.entry_price) * pos.quantity_base,
        Side::Short => (pos.entry_price - price) * pos.quantity_base,
    }
}

pub fn unrealized_pnl(longs: &[Position], shorts: &[Position], price: f64) -> f64 {
    let long_pnl: f64 = longs.iter().map(|p| position_pnl(p, Side::Long, price)).sum();
    let short_pnl: f64 = shorts.iter().map(|p| position_pnl(p, Side::Short, price)).sum();
    long_pnl + short_pnl
}

pub fn total_collateral(player: &Player) -> f64 {
    player.longs.iter().chain(player.shorts.iter()).map(|p| p.collateral).sum()
}

fn total_quantity(positions: &[Position]) -> f64 {
    positions.iter().map(|p| p.quantity_base).sum()
}

/// Quantity-weighted entry price; `None` for an empty side.
fn weighted_entry(positions: &[Position]) -> Option<f64> {
    let qty = total_quantity(positions);
    if qty == 0.0 {
        return None;
    }
    Some(positions.iter().map(|p| p.entry_price * p.quantity_base).sum::<f64>() / qty)
}

pub fn portfolio_value(player: &Player, price: f64) -> f64 {
    player.cash + total_collateral(player) + unrealized_pnl(&player.longs, &player.shorts, price)
}

/// Long base quantity minus short base quantity.
pub fn net_exposure(player: &Player) -> f64 {
    total_quantity(&player.longs) - total_quantity(&player.shorts)
}

/// Advisory liquidation price. `None` means no liquidation risk: leverage 1x,
/// flat net exposure, or a long book whose margin outlasts a zero price. The
/// ledger never acts on this value.
pub fn liquidation_price(player: &Player, price: f64, maintenance_margin_rate: f64) -> Option<f64> {
    if player.leverage <= 1 {
        return None;
    }
    let net = net_exposure(player);
    if net == 0.0 {
        return None;
    }
    let maintenance_margin = maintenance_margin_rate * (net * price).abs();
    let margin_balance = portfolio_value(player, price);
    let entry = if net > 0.0 { weighted_entry(&player.longs)? } else { weighted_entry(&player.shorts)? };
    // net < 0 flips the direction of the adjustment for short-heavy books
    let liq = entry - (margin_balance - maintenance_margin) / net;
    (liq.is_finite() && liq > 0.0).then_some(liq)
}

/// Everything a player card shows, derived from holdings and the latest price.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PlayerMetrics {
    pub unrealized_pnl: f64,
    pub portfolio_value: f64,
    pub liquidation_price: Option<f64>,
    pub return_pct: f64,
    pub long_exposure: f64,
    pub short_exposure: f64,
}

impl PlayerMetrics {
    pub fn compute(player: &Player, price: f64, maintenance_margin_rate: f64) -> Self {
        let portfolio_value = portfolio_value(player, price);
        let return_pct = if player.initial_cash > 0.0 {
            (portfolio_value - player.initial_cash) / player.initial_cash * 100.0
        } else {
            0.0
        };
        Self {
            unrealized_pnl: unrealized_pnl(&player.longs, &player.shorts, price),
            portfolio_value,
            liquidation_price: liquidation_price(player, price, maintenance_margin_rate),
            return_pct,
            long_exposure: total_quantity(&player.longs),
            short_exposure: total_quantity(&player.shorts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlayerSeed;

    fn pos(entry_price: f64, quantity_base: f64, collateral: f64) -> Position {
        Position { entry_price, quantity_base, collateral, leverage: 10 }
    }

    fn player(cash: f64, leverage: u32) -> Player {
        let mut p = Player::new(PlayerSeed::new("u1", "Alice"), 100_000.0);
        p.cash = cash;
        p.leverage = leverage;
        p
    }

    #[test]
    fn test_pnl_long_gain_short_loss() {
        let longs = vec![pos(100.0, 2.0, 10.0)];
        let shorts = vec![pos(100.0, 1.0, 10.0)];
        assert_eq!(unrealized_pnl(&longs, &shorts, 110.0), 20.0 - 10.0);
    }

    #[test]
    fn test_portfolio_value_counts_collateral() {
        let mut p = player(90_000.0, 10);
        p.longs.push(pos(100.0, 50.0, 10_000.0));
        assert_eq!(portfolio_value(&p, 101.0), 90_000.0 + 10_000.0 + 50.0);
    }

    #[test]
    fn test_no_liquidation_at_one_x() {
        let mut p = player(0.0, 1);
        p.longs.push(pos(60_000.0, 100.0, 100_000.0));
        assert_eq!(liquidation_price(&p, 60_000.0, 0.005), None);
    }

    #[test]
    fn test_no_liquidation_when_hedged() {
        let mut p = player(50_000.0, 20);
        p.longs.push(pos(60_000.0, 1.0, 1_000.0));
        p.shorts.push(pos(61_000.0, 1.0, 1_000.0));
        assert_eq!(liquidation_price(&p, 60_500.0, 0.005), None);
    }

    #[test]
    fn test_liquidation_long_sits_below_entry() {
        let mut p = player(0.0, 100);
        p.longs.push(pos(60_000.0, 1.0, 600.0));
        let liq = liquidation_price(&p, 60_000.0, 0.005).unwrap();
        // balance 600, mm 300 -> 300 of room over 1 unit
        assert!((liq - 59_700.0).abs() < 1e-9);
    }

    #[test]
    fn test_liquidation_short_sits_above_entry() {
        let mut p = player(0.0, 100);
        p.shorts.push(pos(60_000.0, 1.0, 600.0));
        let liq = liquidation_price(&p, 60_000.0, 0.005).unwrap();
        assert!((liq - 60_300.0).abs() < 1e-9);
    }

    #[test]
    fn test_well_funded_long_has_no_liquidation() {
        let mut p = player(99_000.0, 5);
        p.longs.push(pos(60_000.0, 0.08, 1_000.0));
        assert_eq!(liquidation_price(&p, 60_000.0, 0.005), None);
        assert_eq!(PlayerMetrics::compute(&p, 60_000.0, 0.005).liquidation_price, None);
    }

    #[test]
    fn test_metrics_return_pct() {
        let mut p = player(99_000.0, 10);
        p.longs.push(pos(100.0, 10.0, 1_000.0));
        let m = PlayerMetrics::compute(&p, 200.0, 0.005);
        assert_eq!(m.unrealized_pnl, 1_000.0);
        assert_eq!(m.portfolio_value, 101_000.0);
        assert!((m.return_pct - 1.0).abs() < 1e-12);
        assert_eq!(m.long_exposure, 10.0);
        assert_eq!(m.short_exposure, 0.0);
    }
}
