//! Exponential backoff.

use std::time::Duration;

/// Delay before retry number `attempt` (zero-based):
/// `min(initial * factor^attempt, max)`.
pub fn calculate_backoff(attempt: u32, initial: Duration, max: Duration, factor: f64) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let scaled = initial.as_secs_f64() * factor.powi(exponent);

    if !scaled.is_finite() || scaled >= max.as_secs_f64() {
        return max;
    }
    Duration::from_secs_f64(scaled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_millis(2000);

        assert_eq!(calculate_backoff(0, initial, max, 2.0), Duration::from_millis(100));
        assert_eq!(calculate_backoff(1, initial, max, 2.0), Duration::from_millis(200));
        assert_eq!(calculate_backoff(3, initial, max, 2.0), Duration::from_millis(800));
        assert_eq!(calculate_backoff(5, initial, max, 2.0), max);
    }

    #[test]
    fn test_backoff_never_exceeds_max() {
        let max = Duration::from_secs(30);
        for attempt in [10, 100, 1_000, u32::MAX] {
            assert_eq!(calculate_backoff(attempt, Duration::from_millis(100), max, 2.0), max);
        }
    }

    #[test]
    fn test_factor_one_is_constant() {
        let initial = Duration::from_millis(250);
        for attempt in 0..10 {
            assert_eq!(
                calculate_backoff(attempt, initial, Duration::from_secs(1), 1.0),
                initial
            );
        }
    }
}
