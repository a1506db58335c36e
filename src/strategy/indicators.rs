use rust_decimal::Decimal;

/// Exponential moving average series of `values`
///
/// Seeded with the simple average of the first `period` values, so the
/// returned series starts at index `period - 1` of the input and has
/// `values.len() - period + 1` entries. `None` when there is not enough data.
pub fn ema_series(values: &[Decimal], period: usize) -> Option<Vec<Decimal>> {
    if period == 0 || values.len() < period {
        return None;
    }

    let alpha = Decimal::TWO / Decimal::from(period + 1);
    let seed: Decimal = values[..period].iter().sum::<Decimal>() / Decimal::from(period);

    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(seed);
    let mut current = seed;
    for value in &values[period..] {
        current += alpha * (*value - current);
        series.push(current);
    }
    Some(series)
}

/// Latest EMA value
pub fn ema(values: &[Decimal], period: usize) -> Option<Decimal> {
    ema_series(values, period).and_then(|s| s.last().copied())
}
