//! Opponent decision making. A policy only proposes; the ledger applies its
//! proposals through the same validated path a human request takes.

use crate::config::SUPPORTED_LEVERAGE;
use crate::{Player, Side};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Open { side: Side, leverage: u32, collateral: f64 },
    CloseAll,
}

pub trait OpponentPolicy: Send {
    /// Looks at the opponent's current holdings and the latest price and
    /// proposes at most one action.
    fn decide(&mut self, holdings: &Player, price: f64) -> Option<Action>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RandomPolicyConfig {
    /// Chance per decision to flatten when holding anything.
    pub close_probability: f64,
    /// Chance per decision to open when flat.
    pub open_probability: f64,
    /// Stake bounds as fractions of current cash.
    pub min_stake: f64,
    pub max_stake: f64,
    pub leverage_choices: Vec<u32>,
}

impl Default for RandomPolicyConfig {
    fn default() -> Self {
        Self {
            close_probability: 0.4,
            open_probability: 0.8,
            min_stake: 0.4,
            max_stake: 0.8,
            leverage_choices: SUPPORTED_LEVERAGE.to_vec(),
        }
    }
}

/// Coin-flip trader: flattens or opens a sized, randomly levered position.
pub struct RandomPolicy {
    config: RandomPolicyConfig,
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(config: RandomPolicyConfig) -> Self {
        Self::with_rng(config, StdRng::from_os_rng())
    }

    /// Deterministic variant for tests and replays.
    pub fn with_seed(config: RandomPolicyConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut config: RandomPolicyConfig, rng: StdRng) -> Self {
        config.min_stake = config.min_stake.clamp(0.0, 1.0);
        config.max_stake = config.max_stake.clamp(config.min_stake, 1.0);
        if config.leverage_choices.is_empty() {
            config.leverage_choices = vec![1];
        }
        Self { config, rng }
    }
}

impl OpponentPolicy for RandomPolicy {
    fn decide(&mut self, holdings: &Player, price: f64) -> Option<Action> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }
        let roll: f64 = self.rng.random();
        if holdings.has_open_positions() {
            return (roll < self.config.close_probability).then_some(Action::CloseAll);
        }
        if roll >= self.config.open_probability || holdings.cash <= 0.0 {
            return None;
        }
        let side = if self.rng.random_bool(0.5) { Side::Long } else { Side::Short };
        let idx = self.rng.random_range(0..self.config.leverage_choices.len());
        let leverage = self.config.leverage_choices[idx];
        let stake = self.rng.random_range(self.config.min_stake..=self.config.max_stake);
        Some(Action::Open { side, leverage, collateral: holdings.cash * stake })
    }
}
