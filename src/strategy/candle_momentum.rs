use super::traits::SignalSource;
use crate::common::types::Signal;
use crate::engine::candles::CandleWindow;

/// Run of same-colored candles
///
/// The last `count` candles all closing above their open gives LONG, all
/// closing below gives SHORT. Doji candles break the run.
#[derive(Debug, Clone)]
pub struct CandleMomentum {
    count: usize,
}

impl CandleMomentum {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl SignalSource for CandleMomentum {
    fn name(&self) -> &'static str {
        "candle_momentum"
    }

    fn min_candles(&self) -> usize {
        self.count.max(1)
    }

    fn evaluate(&self, window: &CandleWindow) -> Signal {
        if window.len() < self.min_candles() {
            return Signal::Hold;
        }
        let recent = window.recent(self.min_candles());
        if recent.iter().all(|c| c.is_green()) {
            Signal::Long
        } else if recent.iter().all(|c| c.is_red()) {
            Signal::Short
        } else {
            Signal::Hold
        }
    }
}
