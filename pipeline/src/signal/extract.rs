//! Price extraction from a window of depth updates.
//!
//! One price per update: the price of its first bid delta. Depth events are
//! deltas, so this is the most recently changed bid level, not necessarily
//! the best bid.

use crate::error::SignalError;
use crate::feed::types::OrderBookData;

/// Number of updates that would yield a price (those with bid deltas).
pub fn priced_count<'a, I>(records: I) -> usize
where
    I: IntoIterator<Item = &'a OrderBookData>,
{
    records
        .into_iter()
        .filter(|d| !d.bid_updates.is_empty())
        .count()
}

/// Extracts one price per update, preserving order.
///
/// Updates without bid deltas are skipped and leave no gap. A single
/// unparseable (or non-finite) price fails the whole batch.
pub fn extract_prices<'a, I>(records: I) -> Result<Vec<f64>, SignalError>
where
    I: IntoIterator<Item = &'a OrderBookData>,
{
    let mut prices = Vec::new();

    for (position, data) in records.into_iter().enumerate() {
        let Some(raw) = data.first_bid_price() else {
            continue;
        };

        match raw.trim().parse::<f64>() {
            Ok(p) if p.is_finite() => prices.push(p),
            _ => {
                return Err(SignalError::Extraction {
                    position,
                    raw: raw.to_string(),
                });
            }
        }
    }

    Ok(prices)
}
