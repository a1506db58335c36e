use super::indicators::ema_series;
use super::traits::SignalSource;
use crate::common::types::Signal;
use crate::engine::candles::CandleWindow;

/// Fast/slow EMA crossover on close prices
///
/// Edge-triggered: a signal fires only on the candle where the fast EMA
/// crosses the slow one. While the lines stay apart the source holds.
#[derive(Debug, Clone)]
pub struct EmaCrossover {
    fast_period: usize,
    slow_period: usize,
}

impl EmaCrossover {
    pub fn new(fast_period: usize, slow_period: usize) -> Self {
        Self {
            fast_period,
            slow_period,
        }
    }
}

impl SignalSource for EmaCrossover {
    fn name(&self) -> &'static str {
        "ema_crossover"
    }

    fn min_candles(&self) -> usize {
        self.slow_period + 1
    }

    fn evaluate(&self, window: &CandleWindow) -> Signal {
        if window.len() < self.min_candles() {
            return Signal::Hold;
        }

        let closes = window.closes();
        let (Some(fast), Some(slow)) = (
            ema_series(&closes, self.fast_period),
            ema_series(&closes, self.slow_period),
        ) else {
            return Signal::Hold;
        };
        if fast.len() < 2 || slow.len() < 2 {
            return Signal::Hold;
        }

        let fast_now = fast[fast.len() - 1];
        let fast_prev = fast[fast.len() - 2];
        let slow_now = slow[slow.len() - 1];
        let slow_prev = slow[slow.len() - 2];

        if fast_prev <= slow_prev && fast_now > slow_now {
            Signal::Long
        } else if fast_prev >= slow_prev && fast_now < slow_now {
            Signal::Short
        } else {
            Signal::Hold
        }
    }
}
