//! Trailing stop / profit lock evaluation
//!
//! A pure function of the position's trailing state, the current mark price
//! and the configured percentages. It performs no I/O; the controller applies
//! the returned state and acts on the returned action.
//!
//! For a long position the stop arms once price exceeds
//! `entry * (1 + activation_pct)`. Arming is a latch: it stays set for the
//! rest of the position even if price falls back below the activation level.
//! While armed the high-water mark ratchets up and the position closes when
//! price drops below `high_water_mark * (1 - distance_pct)`. Shorts mirror this
//! with the low-water mark.

use rust_decimal::Decimal;

use crate::common::types::PositionSide;

/// Percentages that drive the trailing stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingParams {
    pub activation_pct: Decimal,
    pub distance_pct: Decimal,
}

/// Per-position trailing state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingState {
    pub armed: bool,
    pub high_water_mark: Decimal,
    pub low_water_mark: Decimal,
}

impl TrailingState {
    /// Fresh state for a position entered at `entry_price`
    pub fn new(entry_price: Decimal) -> Self {
        Self {
            armed: false,
            high_water_mark: entry_price,
            low_water_mark: entry_price,
        }
    }
}

/// What the controller should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingAction {
    /// Not armed yet; the fixed stop is the only protection
    Inactive,
    /// Armed on this tick
    Armed { stop_price: Decimal },
    /// Armed earlier, stop not hit
    Holding { stop_price: Decimal },
    /// Stop hit: close the position
    Close { stop_price: Decimal },
}

impl TrailingAction {
    pub fn stop_price(&self) -> Option<Decimal> {
        match self {
            TrailingAction::Inactive => None,
            TrailingAction::Armed { stop_price }
            | TrailingAction::Holding { stop_price }
            | TrailingAction::Close { stop_price } => Some(*stop_price),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingOutcome {
    pub state: TrailingState,
    pub action: TrailingAction,
}

/// Price beyond which trailing arms
pub fn activation_price(side: PositionSide, entry: Decimal, params: &TrailingParams) -> Decimal {
    match side {
        PositionSide::Long => entry * (Decimal::ONE + params.activation_pct),
        PositionSide::Short => entry * (Decimal::ONE - params.activation_pct),
    }
}

/// Evaluate one mark price tick
pub fn evaluate(
    side: PositionSide,
    entry: Decimal,
    state: TrailingState,
    price: Decimal,
    params: &TrailingParams,
) -> TrailingOutcome {
    let mut next = state;
    let newly_armed = !state.armed
        && match side {
            PositionSide::Long => price > activation_price(side, entry, params),
            PositionSide::Short => price < activation_price(side, entry, params),
        };

    if !state.armed && !newly_armed {
        return TrailingOutcome {
            state: next,
            action: TrailingAction::Inactive,
        };
    }
    next.armed = true;

    let (stop_price, hit) = match side {
        PositionSide::Long => {
            next.high_water_mark = next.high_water_mark.max(price);
            let stop = next.high_water_mark * (Decimal::ONE - params.distance_pct);
            (stop, price < stop)
        }
        PositionSide::Short => {
            next.low_water_mark = next.low_water_mark.min(price);
            let stop = next.low_water_mark * (Decimal::ONE + params.distance_pct);
            (stop, price > stop)
        }
    };

    let action = if hit {
        TrailingAction::Close { stop_price }
    } else if newly_armed {
        TrailingAction::Armed { stop_price }
    } else {
        TrailingAction::Holding { stop_price }
    };

    TrailingOutcome {
        state: next,
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn params() -> TrailingParams {
        TrailingParams {
            activation_pct: dec!(0.003),
            distance_pct: dec!(0.001),
        }
    }

    fn run(side: PositionSide, prices: &[Decimal]) -> Vec<TrailingOutcome> {
        let mut state = TrailingState::new(dec!(100));
        prices
            .iter()
            .map(|price| {
                let outcome = evaluate(side, dec!(100), state, *price, &params());
                state = outcome.state;
                outcome
            })
            .collect()
    }

    #[test]
    fn test_long_profit_lock_sequence() {
        let outcomes = run(
            PositionSide::Long,
            &[dec!(100.4), dec!(100.39), dec!(100.5), dec!(100.29)],
        );

        assert_eq!(
            outcomes[0].action,
            TrailingAction::Armed {
                stop_price: dec!(100.2996)
            }
        );
        assert_eq!(outcomes[0].state.high_water_mark, dec!(100.4));

        assert_eq!(
            outcomes[1].action,
            TrailingAction::Holding {
                stop_price: dec!(100.2996)
            }
        );

        assert_eq!(outcomes[2].state.high_water_mark, dec!(100.5));
        assert_eq!(
            outcomes[3].action,
            TrailingAction::Close {
                stop_price: dec!(100.3995)
            }
        );
    }

    #[test]
    fn test_no_arming_at_exact_activation_price() {
        let outcomes = run(PositionSide::Long, &[dec!(100.3), dec!(99)]);
        assert!(outcomes
            .iter()
            .all(|o| o.action == TrailingAction::Inactive && !o.state.armed));
        assert_eq!(outcomes[1].state.high_water_mark, dec!(100));
    }

    #[test]
    fn test_arming_is_a_latch() {
        // Arms at 100.35, retraces below the activation price to 100.2 while
        // staying above the stop, then breaches it at 100.1.
        let mut state = TrailingState::new(dec!(100));
        let wide = TrailingParams {
            activation_pct: dec!(0.003),
            distance_pct: dec!(0.002),
        };
        let armed = evaluate(PositionSide::Long, dec!(100), state, dec!(100.35), &wide);
        state = armed.state;
        assert!(state.armed);

        let retrace = evaluate(PositionSide::Long, dec!(100), state, dec!(100.2), &wide);
        assert!(retrace.state.armed);
        assert!(matches!(retrace.action, TrailingAction::Holding { .. }));

        let hit = evaluate(PositionSide::Long, dec!(100), retrace.state, dec!(100.1), &wide);
        assert!(matches!(hit.action, TrailingAction::Close { .. }));
    }

    #[test]
    fn test_short_mirrors_long() {
        let outcomes = run(
            PositionSide::Short,
            &[dec!(99.6), dec!(99.65), dec!(99.5), dec!(99.61)],
        );

        assert!(matches!(outcomes[0].action, TrailingAction::Armed { .. }));
        assert_eq!(outcomes[0].state.low_water_mark, dec!(99.6));
        // 99.6 * 1.001 = 99.6996
        assert_eq!(
            outcomes[1].action,
            TrailingAction::Holding {
                stop_price: dec!(99.6996)
            }
        );
        assert_eq!(outcomes[2].state.low_water_mark, dec!(99.5));
        // 99.5 * 1.001 = 99.5995 < 99.61
        assert_eq!(
            outcomes[3].action,
            TrailingAction::Close {
                stop_price: dec!(99.5995)
            }
        );
    }

    #[test]
    fn test_water_marks_are_monotonic_once_armed() {
        let prices: Vec<Decimal> = [
            "100.5", "100.45", "100.7", "100.62", "100.9", "100.85", "100.86", "101.2", "101.15",
        ]
        .iter()
        .map(|p| p.parse().unwrap())
        .collect();

        let outcomes = run(PositionSide::Long, &prices);
        let mut previous = Decimal::ZERO;
        for (outcome, price) in outcomes.iter().zip(&prices) {
            assert!(outcome.state.high_water_mark >= previous);
            previous = outcome.state.high_water_mark;

            let stop = outcome.state.high_water_mark * (Decimal::ONE - dec!(0.001));
            let closes = matches!(outcome.action, TrailingAction::Close { .. });
            assert_eq!(closes, *price < stop);
        }
    }

    #[test]
    fn test_low_water_mark_is_monotonic_for_short() {
        let prices: Vec<Decimal> = [
            "99.5", "99.55", "99.3", "99.38", "99.1", "99.15", "99.14", "98.8", "98.85", "98.95",
        ]
        .iter()
        .map(|p| p.parse().unwrap())
        .collect();

        let outcomes = run(PositionSide::Short, &prices);
        let mut previous = Decimal::MAX;
        for (outcome, price) in outcomes.iter().zip(&prices) {
            assert!(outcome.state.armed);
            assert!(outcome.state.low_water_mark <= previous);
            previous = outcome.state.low_water_mark;

            let stop = outcome.state.low_water_mark * (Decimal::ONE + dec!(0.001));
            let closes = matches!(outcome.action, TrailingAction::Close { .. });
            assert_eq!(closes, *price > stop, "price {}", price);
        }
        assert!(matches!(outcomes.last().unwrap().action, TrailingAction::Close { .. }));
    }
}
