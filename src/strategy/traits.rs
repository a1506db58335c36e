use crate::common::types::Signal;
use crate::engine::candles::CandleWindow;

/// Core signal trait
///
/// A signal source looks at the closed-candle window and answers LONG, SHORT
/// or HOLD. The controller calls it once per candle close while holding its
/// lock, so evaluation must stay cheap.
///
/// # Implementation Notes
///
/// - `evaluate` is synchronous and deterministic: same window, same answer
/// - No I/O and no interior mutability; any indicator is recomputed from the window
/// - A window shorter than `min_candles` must yield `Signal::Hold`
///
/// # Example
///
/// ```ignore
/// struct AlwaysLong;
///
/// impl SignalSource for AlwaysLong {
///     fn name(&self) -> &'static str { "always_long" }
///
///     fn min_candles(&self) -> usize { 1 }
///
///     fn evaluate(&self, window: &CandleWindow) -> Signal {
///         if window.is_empty() { Signal::Hold } else { Signal::Long }
///     }
/// }
/// ```
pub trait SignalSource: Send + Sync {
    /// Identifier used in logs and status messages
    fn name(&self) -> &'static str;

    /// Candles needed before the source can produce anything but HOLD
    fn min_candles(&self) -> usize;

    /// Direction suggested by the current window
    fn evaluate(&self, window: &CandleWindow) -> Signal;
}

/// Boxed signal source for dynamic dispatch
pub type BoxedSignalSource = Box<dyn SignalSource>;
