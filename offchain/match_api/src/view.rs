use engine::{MatchSession, PlayerMetrics, Versioned};
use serde::Serialize;
use std::collections::BTreeMap;

/// What clients render: the committed session plus derived player numbers at
/// the latest known price.
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub version: u64,
    pub latest_price: Option<f64>,
    pub metrics: BTreeMap<String, PlayerMetrics>,
    pub session: MatchSession,
}

impl SessionView {
    /// `feed_price` wins over the session's own history when it is fresher.
    pub fn build(record: &Versioned, feed_price: Option<f64>, maintenance_margin_rate: f64) -> Self {
        let session = record.session.as_ref();
        let latest_price = feed_price.or_else(|| session.latest_price());
        let metrics = match latest_price {
            Some(price) => session
                .players
                .iter()
                .map(|p| (p.user_id.clone(), PlayerMetrics::compute(p, price, maintenance_margin_rate)))
                .collect(),
            None => BTreeMap::new(),
        };
        Self { version: record.version, latest_price, metrics, session: session.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{Candle, LedgerConfig, MatchLedger, MemoryStore, PlayerSeed, SessionDirectory, Side};
    use std::sync::Arc;

    #[test]
    fn metrics_follow_the_freshest_price() {
        let dir = SessionDirectory::new(Arc::new(MatchLedger::new(Arc::new(MemoryStore::new()), LedgerConfig::default())));
        let id = dir.create_session(PlayerSeed::new("h", "H"), 180, "BTCUSDT", None).unwrap();
        let record = dir.get_session(&id).unwrap();
        assert!(SessionView::build(&record, None, 0.005).metrics.is_empty());

        dir.join(&id, PlayerSeed::new("g", "G")).unwrap();
        let ledger = dir.ledger();
        ledger
            .record_candle(&id, Candle { time: 1, open: 60_000.0, high: 60_000.0, low: 60_000.0, close: 60_000.0 })
            .unwrap();
        ledger.set_leverage(&id, "g", 10).unwrap();
        let record = ledger.open_position(&id, "g", 1_000.0, Side::Long, 60_000.0).unwrap();

        let from_history = SessionView::build(&record, None, 0.005);
        assert_eq!(from_history.latest_price, Some(60_000.0));
        assert_eq!(from_history.metrics["g"].unrealized_pnl, 0.0);

        let live = SessionView::build(&record, Some(61_000.0), 0.005);
        assert!((live.metrics["g"].unrealized_pnl - 166.5).abs() < 1e-6);
        assert_eq!(live.version, record.version);
    }
}
