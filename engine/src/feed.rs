use crate::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Appended,
    Replaced,
    /// Older than the last candle; the feed only moves forward.
    Stale,
}

/// Folds one feed candle into a session's history. A candle with the same
/// `time` as the last one replaces it, a newer one is appended, and the
/// oldest candles are dropped once `cap` is exceeded.
pub fn merge_candle(history: &mut Vec<Candle>, candle: Candle, cap: usize) -> MergeOutcome {
    let outcome = match history.last_mut() {
        Some(last) if last.time == candle.time => {
            *last = candle;
            MergeOutcome::Replaced
        }
        Some(last) if last.time > candle.time => MergeOutcome::Stale,
        _ => {
            history.push(candle);
            MergeOutcome::Appended
        }
    };
    if cap > 0 && history.len() > cap {
        let excess = history.len() - cap;
        history.drain(..excess);
    }
    outcome
}

pub fn is_valid_candle(candle: &Candle) -> bool {
    let prices = [candle.open, candle.high, candle.low, candle.close];
    prices.iter().all(|p| p.is_finite() && *p > 0.0) && candle.low <= candle.high
}
