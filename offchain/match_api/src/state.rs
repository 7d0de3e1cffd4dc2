use engine::{MatchLedger, MemoryStore, SessionDirectory, Versioned};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::{ApiError, ApiResult};
use crate::feed::PriceFeed;
use crate::settlement::SettlementForwarder;
use crate::view::SessionView;

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<SessionDirectory>,
    pub ledger: Arc<MatchLedger>,
    pub feed: Arc<PriceFeed>,
    pub config: Arc<ServerConfig>,
    pub settlement: SettlementForwarder,
    /// Sessions whose background tasks are already running.
    driven: Arc<Mutex<HashSet<String>>>,
    /// Open host websockets per session.
    host_sockets: Arc<Mutex<HashMap<String, usize>>>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let ledger = Arc::new(MatchLedger::new(Arc::new(MemoryStore::new()), config.ledger_config()));
        let feed = Arc::new(PriceFeed::new(config.symbols.iter().map(|s| s.to_uppercase())));
        let settlement = SettlementForwarder::new(config.settlement_webhook.clone());
        Self {
            directory: Arc::new(SessionDirectory::new(ledger.clone())),
            ledger,
            feed,
            config: Arc::new(config),
            settlement,
            driven: Arc::default(),
            host_sockets: Arc::default(),
        }
    }

    /// Price a trade is stamped with: live feed first, then the session's own
    /// last candle.
    pub fn trade_price(&self, record: &Versioned) -> ApiResult<f64> {
        let symbol = &record.session.symbol;
        self.feed
            .latest_close(symbol)
            .or_else(|| record.session.latest_price())
            .ok_or_else(|| ApiError::NoPrice(symbol.clone()))
    }

    pub fn view(&self, record: &Versioned) -> SessionView {
        SessionView::build(
            record,
            self.feed.latest_close(&record.session.symbol),
            self.ledger.config().rules.maintenance_margin_rate,
        )
    }

    /// Claims the right to start a session's background tasks; true once.
    pub(crate) fn claim_driver(&self, id: &str) -> bool {
        self.driven.lock().insert(id.to_string())
    }

    pub(crate) fn release_driver(&self, id: &str) {
        self.driven.lock().remove(id);
    }

    pub(crate) fn host_connected(&self, id: &str) {
        *self.host_sockets.lock().entry(id.to_string()).or_default() += 1;
    }

    /// Returns true when this was the host's last open socket.
    pub(crate) fn host_disconnected(&self, id: &str) -> bool {
        let mut sockets = self.host_sockets.lock();
        match sockets.get_mut(id) {
            Some(n) if *n > 1 => {
                *n -= 1;
                false
            }
            Some(_) => {
                sockets.remove(id);
                true
            }
            None => false,
        }
    }
}
