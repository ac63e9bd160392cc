const BASE_DELAY_SECS: i64 = 300;
const MAX_DELAY_SECS: i64 = 21600;

/// `delay_n = min(300 * 3^(n-1), 21600)` seconds, where `n` is the attempt that
/// just failed (1-indexed). First failure defers 5 minutes; the cap is 6 hours.
pub fn retry_delay_secs(attempt: u32) -> i64 {
    let n = attempt.max(1) - 1;
    let multiplier = 3i64.saturating_pow(n);
    (BASE_DELAY_SECS.saturating_mul(multiplier)).min(MAX_DELAY_SECS)
}

pub fn retry_after(now: i64, attempt: u32) -> i64 {
    now + retry_delay_secs(attempt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_schedule_matches_three_successive_failures() {
        assert_eq!(retry_delay_secs(1), 300);
        assert_eq!(retry_delay_secs(2), 900);
        assert_eq!(retry_delay_secs(3), 2700);
    }

    #[test]
    fn backoff_caps_at_six_hours() {
        assert_eq!(retry_delay_secs(10), 21600);
    }

    #[test]
    fn retry_after_adds_delay_to_failure_time() {
        assert_eq!(retry_after(1000, 1), 1300);
    }
}
