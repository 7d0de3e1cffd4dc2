use clap::Parser;
use engine::LedgerConfig;
use std::time::Duration;

/// Match server settings. Every flag can also come from the environment.
#[derive(Parser, Debug, Clone)]
#[command(name = "match_api", about = "Head-to-head leveraged paper trading match server")]
pub struct ServerConfig {
    #[arg(long, env = "MATCH_API_ADDR", default_value = "0.0.0.0:8787")]
    pub addr: String,

    /// Symbols with a synthetic feed, comma separated.
    #[arg(long, env = "MATCH_API_SYMBOLS", value_delimiter = ',', default_value = "BTCUSDT")]
    pub symbols: Vec<String>,

    /// Disable the built-in random-walk feed; candles then arrive only via `POST /feed/{symbol}`.
    #[arg(long, env = "MATCH_API_NO_SYNTHETIC_FEED", default_value_t = false)]
    pub no_synthetic_feed: bool,

    #[arg(long, env = "MATCH_API_START_PRICE", default_value_t = 60_000.0)]
    pub start_price: f64,

    #[arg(long, env = "MATCH_API_FEED_INTERVAL_MS", default_value_t = 1_000)]
    pub feed_interval_ms: u64,

    /// Let the host client drive the countdown through `POST /sessions/{id}/tick`
    /// instead of the server ticking on the host's behalf.
    #[arg(long, env = "MATCH_API_CLIENT_CLOCK", default_value_t = false)]
    pub client_clock: bool,

    #[arg(long, env = "MATCH_API_AI_INTERVAL_MS", default_value_t = 200)]
    pub ai_interval_ms: u64,

    /// Candles a session needs before the bot starts trading.
    #[arg(long, env = "MATCH_API_AI_WARMUP", default_value_t = 5)]
    pub ai_warmup_candles: usize,

    #[arg(long, env = "MATCH_API_INITIAL_CASH", default_value_t = 100_000.0)]
    pub initial_cash: f64,

    #[arg(long, env = "MATCH_API_MAX_RETRIES", default_value_t = 16)]
    pub max_retries: u32,

    #[arg(long, env = "MATCH_API_HISTORY_CAP", default_value_t = 600)]
    pub history_cap: usize,

    /// Where finished-match results are POSTed for settlement.
    #[arg(long, env = "MATCH_API_SETTLEMENT_WEBHOOK")]
    pub settlement_webhook: Option<String>,

    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl ServerConfig {
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            initial_cash: self.initial_cash,
            max_retries: self.max_retries,
            history_cap: self.history_cap,
            ..LedgerConfig::default()
        }
    }

    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_ms.max(10))
    }

    pub fn ai_interval(&self) -> Duration {
        Duration::from_millis(self.ai_interval_ms.max(10))
    }

    pub fn default_symbol(&self) -> &str {
        self.symbols.first().map(String::as_str).unwrap_or("BTCUSDT")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::parse_from(["match_api"]);
        assert_eq!(cfg.addr, "0.0.0.0:8787");
        assert_eq!(cfg.symbols, vec!["BTCUSDT".to_string()]);
        assert!(!cfg.client_clock);
        assert_eq!(cfg.ai_interval(), Duration::from_millis(200));
        assert_eq!(cfg.ledger_config().initial_cash, 100_000.0);
    }

    #[test]
    fn symbol_list_and_overrides() {
        let cfg = ServerConfig::parse_from([
            "match_api",
            "--symbols",
            "ETHUSDT,SOLUSDT",
            "--client-clock",
            "--max-retries",
            "3",
        ]);
        assert_eq!(cfg.default_symbol(), "ETHUSDT");
        assert_eq!(cfg.symbols.len(), 2);
        assert!(cfg.client_clock);
        assert_eq!(cfg.ledger_config().max_retries, 3);
    }
}
