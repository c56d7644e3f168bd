//! Reconnect backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay before reconnect attempt `attempt` (1-based): exponential
/// from `minimum`, capped at `maximum`, with up to 10% jitter on top.
pub fn reconnect_delay(attempt: u32, minimum: Duration, maximum: Duration) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let exponential = 2u32.saturating_pow(attempt.saturating_sub(1));
    let delay = minimum.saturating_mul(exponential).min(maximum);

    let jitter_range = delay.as_millis() as u64 / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    delay + Duration::from_millis(jitter)
}
