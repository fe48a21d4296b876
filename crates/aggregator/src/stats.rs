//! Deterministic reductions.

use std::cmp::Ordering;

use mycelia_feeds::Trade;

/// Median with the lower-value neighbor on even counts, so any two
/// clients reduce the same sample set to the same bits regardless of
/// arrival order.
pub fn median_lower(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    let idx = if n % 2 == 1 { n / 2 } else { n / 2 - 1 };
    Some(sorted[idx])
}

/// Volume-weighted average over a pooled trade set: `Σ(p·v) / Σv`.
pub fn pooled_vwap(trades: &[Trade]) -> Option<f64> {
    let volume: f64 = trades.iter().map(|t| t.volume).sum();
    if volume <= 0.0 {
        return None;
    }
    let notional: f64 = trades.iter().map(|t| t.price * t.volume).sum();
    Some(notional / volume)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_takes_middle() {
        assert_eq!(
            median_lower(&[69001.0, 69010.0, 69003.0]).unwrap(),
            69003.0
        );
    }

    #[test]
    fn test_median_even_takes_lower_neighbor() {
        assert_eq!(median_lower(&[4.0, 1.0, 3.0, 2.0]).unwrap(), 2.0);
        assert_eq!(median_lower(&[100.00, 100.10]).unwrap(), 100.00);
    }

    #[test]
    fn test_median_permutation_invariant() {
        let a = median_lower(&[5.0, 9.0, 1.0, 7.0]).unwrap();
        let b = median_lower(&[9.0, 7.0, 5.0, 1.0]).unwrap();
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_median_empty() {
        assert!(median_lower(&[]).is_none());
    }

    #[test]
    fn test_pooled_vwap() {
        let trades = vec![
            Trade { price: 100.0, volume: 2.0, executed_at: None },
            Trade { price: 101.0, volume: 3.0, executed_at: None },
            Trade { price: 99.0, volume: 5.0, executed_at: None },
        ];
        let vwap = pooled_vwap(&trades).unwrap();
        assert!((vwap - 99.80).abs() < 1e-12);
    }

    #[test]
    fn test_pooled_vwap_zero_volume() {
        assert!(pooled_vwap(&[]).is_none());
        let trades = vec![Trade { price: 100.0, volume: 0.0, executed_at: None }];
        assert!(pooled_vwap(&trades).is_none());
    }
}
