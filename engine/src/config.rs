use serde::{Deserialize, Serialize};

pub const SUPPORTED_LEVERAGE: [u32; 8] = [1, 5, 10, 20, 40, 60, 80, 100];

/// Pricing constants applied by the executor and the position math.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradingRules {
    /// Charged once on open, as a fraction of notional.
    pub fee_rate: f64,
    /// Fraction of net notional used as maintenance margin.
    pub maintenance_margin_rate: f64,
    pub supported_leverage: Vec<u32>,
}

impl Default for TradingRules {
    fn default() -> Self {
        Self {
            fee_rate: 0.001,
            maintenance_margin_rate: 0.005,
            supported_leverage: SUPPORTED_LEVERAGE.to_vec(),
        }
    }
}

impl TradingRules {
    pub fn supports_leverage(&self, leverage: u32) -> bool {
        (1..=100).contains(&leverage) && self.supported_leverage.contains(&leverage)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    pub initial_cash: f64,
    pub max_players: usize,
    /// Conflicting writes tolerated before a transaction fails with `Contention`.
    pub max_retries: u32,
    /// Candles kept per session.
    pub history_cap: usize,
    pub max_chat_len: usize,
    pub rules: TradingRules,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_cash: 100_000.0,
            max_players: 2,
            max_retries: 16,
            history_cap: 600,
            max_chat_len: 500,
            rules: TradingRules::default(),
        }
    }
}
