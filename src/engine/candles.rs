use rust_decimal::Decimal;
use std::collections::VecDeque;

use crate::common::types::Candle;

/// What [`CandleWindow::push`] did with a candle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A new interval closed
    Appended,
    /// Same open time as the newest candle; its values were refreshed
    Replaced,
    /// Older than the newest candle; ignored
    Stale,
}

impl PushOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, PushOutcome::Appended)
    }
}

/// Sliding window of the most recent closed candles
///
/// Keeps at most `capacity` candles ordered oldest to newest. A candle whose
/// open time matches the newest one replaces it, and anything older is
/// dropped, so a feed that replays candles after a reconnect cannot duplicate
/// or reorder history. Only [`PushOutcome::Appended`] marks a new close.
#[derive(Debug, Clone)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Window pre-filled from historical candles (oldest first)
    pub fn seeded(capacity: usize, history: impl IntoIterator<Item = Candle>) -> Self {
        let mut window = Self::new(capacity);
        for candle in history {
            window.push(candle);
        }
        window
    }

    /// Append a closed candle, dropping the oldest when full
    pub fn push(&mut self, candle: Candle) -> PushOutcome {
        if let Some(last) = self.candles.back_mut() {
            if candle.open_time == last.open_time {
                *last = candle;
                return PushOutcome::Replaced;
            }
            if candle.open_time < last.open_time {
                return PushOutcome::Stale;
            }
        }

        self.candles.push_back(candle);
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
        PushOutcome::Appended
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.candles.len() == self.capacity
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Candle> + ExactSizeIterator {
        self.candles.iter()
    }

    /// Close prices, oldest first
    pub fn closes(&self) -> Vec<Decimal> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// The newest `n` candles, oldest first
    pub fn recent(&self, n: usize) -> Vec<&Candle> {
        let skip = self.candles.len().saturating_sub(n);
        self.candles.iter().skip(skip).collect()
    }
}
