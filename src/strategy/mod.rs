//! Signal sources
//!
//! A signal source turns the closed-candle window into a direction. The
//! controller treats it as opaque: it only calls [`SignalSource::evaluate`]
//! after each candle close and acts on the answer.
//!
//! ```text
//! candle close ──► CandleWindow ──► SignalSource.evaluate() ──► LONG / SHORT / HOLD
//!                                                                    │
//!                                                                    ▼
//!                                                           PositionController
//! ```
//!
//! # Components
//!
//! - [`SignalSource`]: Trait every source implements
//! - [`EmaCrossover`]: Edge-triggered fast/slow EMA cross
//! - [`VolumeDominance`]: Taker buy vs sell volume with an optional EMA trend filter
//! - [`CandleMomentum`]: Run of same-colored candles
//! - [`build`]: Construct the source selected in configuration

mod candle_momentum;
mod ema_crossover;
pub mod indicators;
mod traits;
mod volume_dominance;

pub use candle_momentum::CandleMomentum;
pub use ema_crossover::EmaCrossover;
pub use traits::{BoxedSignalSource, SignalSource};
pub use volume_dominance::VolumeDominance;

use crate::config::types::StrategyConfig;

/// Build the signal source selected in configuration
pub fn build(config: &StrategyConfig) -> BoxedSignalSource {
    match config {
        StrategyConfig::EmaCrossover {
            fast_period,
            slow_period,
        } => Box::new(EmaCrossover::new(*fast_period, *slow_period)),
        StrategyConfig::VolumeDominance { trend_ema_period } => {
            Box::new(VolumeDominance::new(*trend_ema_period))
        }
        StrategyConfig::CandleMomentum { count } => Box::new(CandleMomentum::new(*count)),
    }
}

#[cfg(test)]
pub(crate) fn test_candle(
    minute: i64,
    close: rust_decimal::Decimal,
    volume: rust_decimal::Decimal,
    taker_buy_volume: rust_decimal::Decimal,
) -> crate::common::types::Candle {
    use chrono::{Duration, TimeZone, Utc};

    let open_time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
    crate::common::types::Candle {
        open_time,
        close_time: open_time + Duration::seconds(59),
        open: close,
        high: close,
        low: close,
        close,
        volume,
        taker_buy_volume,
    }
}

/// Window of one-minute candles where each candle opens at the previous close
#[cfg(test)]
pub(crate) fn test_window(closes: &[rust_decimal::Decimal]) -> crate::engine::candles::CandleWindow {
    use rust_decimal_macros::dec;

    let mut previous = closes.first().copied().unwrap_or_default();
    let candles = closes.iter().enumerate().map(|(i, close)| {
        let mut candle = test_candle(i as i64, *close, dec!(10), dec!(5));
        candle.open = previous;
        candle.high = previous.max(*close);
        candle.low = previous.min(*close);
        previous = *close;
        candle
    });
    crate::engine::candles::CandleWindow::seeded(closes.len().max(1), candles)
}
