//! Per-symbol latest-candle channels. Sessions hold only a weak view of the
//! feed: whatever close was last published for their symbol.

use engine::feed::is_valid_candle;
use engine::Candle;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{ApiError, ApiResult};

#[derive(Default)]
pub struct PriceFeed {
    channels: RwLock<HashMap<String, watch::Sender<Option<Candle>>>>,
}

impl PriceFeed {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let feed = Self::default();
        for symbol in symbols {
            feed.register(&symbol.into());
        }
        feed
    }

    fn register(&self, symbol: &str) -> watch::Sender<Option<Candle>> {
        if let Some(tx) = self.channels.read().get(symbol) {
            return tx.clone();
        }
        self.channels
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .clone()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.channels.read().contains_key(symbol)
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = self.channels.read().keys().cloned().collect();
        out.sort();
        out
    }

    pub fn latest(&self, symbol: &str) -> Option<Candle> {
        self.channels.read().get(symbol).and_then(|tx| *tx.borrow())
    }

    pub fn latest_close(&self, symbol: &str) -> Option<f64> {
        self.latest(symbol).map(|c| c.close)
    }

    pub fn subscribe(&self, symbol: &str) -> ApiResult<watch::Receiver<Option<Candle>>> {
        self.channels
            .read()
            .get(symbol)
            .map(watch::Sender::subscribe)
            .ok_or_else(|| ApiError::UnknownSymbol(symbol.to_string()))
    }

    /// Publishes a candle. Pushing to a new symbol registers it.
    pub fn push(&self, symbol: &str, candle: Candle) -> ApiResult<()> {
        if !is_valid_candle(&candle) {
            return Err(ApiError::BadRequest(format!("invalid candle for {symbol}")));
        }
        let tx = self.register(symbol);
        tx.send_replace(Some(candle));
        debug!(target: "clash", symbol, close = candle.close, time = candle.time, "candle");
        Ok(())
    }
}

/// Random walk used when no exchange stream is wired in. One candle per
/// `interval`, each opening at the previous close.
pub struct SyntheticWalk {
    rng: StdRng,
    last_close: f64,
    /// Max relative move per candle.
    volatility: f64,
    floor: f64,
}

impl SyntheticWalk {
    pub fn new(start_price: f64) -> Self {
        Self::with_rng(start_price, StdRng::from_os_rng())
    }

    pub fn with_seed(start_price: f64, seed: u64) -> Self {
        Self::with_rng(start_price, StdRng::seed_from_u64(seed))
    }

    fn with_rng(start_price: f64, rng: StdRng) -> Self {
        let start = if start_price.is_finite() && start_price > 0.0 { start_price } else { 1.0 };
        Self { rng, last_close: start, volatility: 0.002, floor: start * 0.01 }
    }

    pub fn next_candle(&mut self, time: i64) -> Candle {
        let open = self.last_close;
        let step = self.rng.random_range(-self.volatility..=self.volatility);
        let close = (open * (1.0 + step)).max(self.floor);
        let wick = open.max(close) * self.rng.random_range(0.0..=self.volatility / 2.0);
        let high = open.max(close) + wick;
        let low = (open.min(close) - wick).max(self.floor);
        self.last_close = close;
        Candle { time, open, high, low, close }
    }
}

pub fn spawn_synthetic(feed: Arc<PriceFeed>, symbol: String, start_price: f64, interval: Duration) {
    info!(target: "clash", %symbol, start_price, "synthetic feed running");
    tokio::spawn(async move {
        let mut walk = SyntheticWalk::new(start_price);
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let candle = walk.next_candle(engine::now_ms());
            if let Err(e) = feed.push(&symbol, candle) {
                debug!(target: "clash", %symbol, error = %e, "synthetic candle rejected");
            }
        }
    });
}
