//! Invokers and result mappers: predictor call in, typed response out.

pub mod layout;
pub mod table;

pub use layout::{map_layout, predict_layout};
pub use table::{TABLE_PREDICT_OPTIONS, map_cell, map_tables, predict_tables};

/// Rounds to `places` decimals, ties to even.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10_f64.powi(places);
    (value * factor).round_ties_even() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.123_456, 4), 0.1235);
        assert_eq!(round_to(12.344_9, 2), 12.34);
        assert_eq!(round_to(0.0, 4), 0.0);
    }

    #[test]
    fn test_round_to_ties_even() {
        assert_eq!(round_to(0.031_25, 4), 0.0312);
        assert_eq!(round_to(0.093_75, 4), 0.0938);
        assert_eq!(round_to(1.125, 2), 1.12);
        assert_eq!(round_to(1.375, 2), 1.38);
        assert_eq!(round_to(2.5, 0), 2.0);
    }
}
