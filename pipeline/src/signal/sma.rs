//! Simple moving averages over a chronological price window.

use crate::error::SignalError;

/// Every `period`-wide average of `prices`, oldest window first.
///
/// One pass with a running sum: each step adds the entering price and
/// drops the leaving one. Empty when `period` is zero or longer than the
/// input.
pub fn calculate_sma(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let p = period as f64;
    let mut out = Vec::with_capacity(prices.len() - period + 1);

    let mut sum: f64 = prices[..period].iter().sum();
    out.push(sum / p);

    for i in period..prices.len() {
        sum += prices[i] - prices[i - period];
        out.push(sum / p);
    }

    out
}

/// Short and long averages for the same window.
pub fn calculate_smas(
    prices: &[f64],
    short_period: usize,
    long_period: usize,
) -> Result<(Vec<f64>, Vec<f64>), SignalError> {
    if short_period == 0 || short_period > long_period {
        return Err(SignalError::InvalidPeriods {
            short: short_period,
            long: long_period,
        });
    }
    if prices.len() < long_period {
        return Err(SignalError::InsufficientData {
            required: long_period,
            available: prices.len(),
        });
    }

    Ok((
        calculate_sma(prices, short_period),
        calculate_sma(prices, long_period),
    ))
}

/// The most recent short and long averages.
pub fn latest_smas(
    prices: &[f64],
    short_period: usize,
    long_period: usize,
) -> Result<(f64, f64), SignalError> {
    let (short, long) = calculate_smas(prices, short_period, long_period)?;
    match (short.last(), long.last()) {
        (Some(s), Some(l)) => Ok((*s, *l)),
        _ => Err(SignalError::InsufficientData {
            required: long_period,
            available: prices.len(),
        }),
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn naive_sma(prices: &[f64], period: usize) -> Vec<f64> {
        prices
            .windows(period)
            .map(|w| w.iter().sum::<f64>() / period as f64)
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]
        #[test]
        fn running_sum_matches_naive_recomputation(
            prices in prop::collection::vec(0.01f64..100_000.0, 1..300),
            period_seed in 1usize..300,
        ) {
            let period = 1 + (period_seed - 1) % prices.len();

            let fast = calculate_sma(&prices, period);
            let slow = naive_sma(&prices, period);

            prop_assert_eq!(fast.len(), prices.len() - period + 1);
            prop_assert_eq!(fast.len(), slow.len());

            for (i, (a, b)) in fast.iter().zip(slow.iter()).enumerate() {
                let tol = 1e-6 * b.abs().max(1.0);
                prop_assert!((a - b).abs() <= tol, "index {}: {} vs {}", i, a, b);
            }
        }
    }
}
