use super::indicators::ema;
use super::traits::SignalSource;
use crate::common::types::Signal;
use crate::engine::candles::CandleWindow;

/// Taker volume dominance of the last closed candle
///
/// LONG when market buys outweigh market sells, SHORT for the reverse. With a
/// trend period set, the signal must also agree with the close relative to
/// the EMA of closes: longs only above it, shorts only below.
#[derive(Debug, Clone)]
pub struct VolumeDominance {
    trend_ema_period: Option<usize>,
}

impl VolumeDominance {
    pub fn new(trend_ema_period: Option<usize>) -> Self {
        Self { trend_ema_period }
    }
}

impl SignalSource for VolumeDominance {
    fn name(&self) -> &'static str {
        "volume_dominance"
    }

    fn min_candles(&self) -> usize {
        self.trend_ema_period.unwrap_or(1).max(1)
    }

    fn evaluate(&self, window: &CandleWindow) -> Signal {
        if window.len() < self.min_candles() {
            return Signal::Hold;
        }
        let Some(last) = window.last() else {
            return Signal::Hold;
        };

        let (uptrend, downtrend) = match self.trend_ema_period {
            Some(period) => match ema(&window.closes(), period) {
                Some(trend) => (last.close > trend, last.close < trend),
                None => return Signal::Hold,
            },
            None => (true, true),
        };

        let buyers = last.taker_buy_volume;
        let sellers = last.taker_sell_volume();
        if buyers > sellers && uptrend {
            Signal::Long
        } else if sellers > buyers && downtrend {
            Signal::Short
        } else {
            Signal::Hold
        }
    }
}
