use crate::config::DeferBackoff;
use rand::Rng;
use std::time::Duration;

/// Jittered exponential delay before re-invoking a deferred pass. Attempt
/// numbering starts at zero; the delay is sampled between the base and the
/// capped exponential step so retries spread out rather than thundering.
pub fn deferral_delay(backoff: &DeferBackoff, attempt: u32) -> Duration {
    let exponent = attempt.min(16);
    let ceiling = backoff
        .base
        .saturating_mul(2u32.saturating_pow(exponent))
        .min(backoff.max);
    jitter_between(backoff.base.min(ceiling), ceiling)
}

pub fn jitter_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let min_secs = min.as_secs_f64();
    let span = max.as_secs_f64() - min_secs;
    let sample = rng.gen::<f64>() * span + min_secs;
    Duration::from_secs_f64(sample)
}
