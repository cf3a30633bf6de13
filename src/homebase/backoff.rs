//! Two-phase reconnect back-off (spec.md §4.C, §8 scenario 5).
//!
//! A pure function of the failure count so the reconnect monotonicity law
//! is unit-testable without a clock: phase 1 ("fast retry") covers the
//! first `fast_retry_window_ms` of wall-clock time since the first
//! disconnect; phase 2 ("slow back-off") applies afterwards and grows
//! exponentially with the failure count, capped.

use crate::config::LinkConfig;
use rand::Rng;
use std::time::Duration;

/// Which phase of the reconnect schedule a given elapsed-since-disconnect
/// duration falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPhase {
    FastRetry,
    SlowBackoff { failures_in_phase: u32 },
}

/// Compute the next reconnect delay.
///
/// `elapsed_since_first_disconnect` determines the phase; `failures_in_phase`
/// is the number of failed attempts since entering phase 2 (ignored in
/// phase 1). Jitter is drawn from `rand::thread_rng()` at call time, so the
/// returned duration is randomized but always within the documented bound.
pub fn next_delay(cfg: &LinkConfig, phase: BackoffPhase) -> Duration {
    let mut rng = rand::thread_rng();
    match phase {
        BackoffPhase::FastRetry => {
            let jitter = rng.gen_range(0..=cfg.fast_retry_jitter_ms);
            Duration::from_millis(cfg.fast_retry_base_ms + jitter)
        }
        BackoffPhase::SlowBackoff { failures_in_phase } => {
            let exp = cfg
                .slow_base_backoff_ms
                .saturating_mul(1u64 << failures_in_phase.min(20));
            let base = exp.min(cfg.slow_max_backoff_ms);
            let jitter = rng.gen_range(0..=cfg.slow_jitter_ms);
            Duration::from_millis(base + jitter)
        }
    }
}

/// Decide which phase applies given how long it's been since the first
/// disconnect in the current failure streak.
pub fn phase_for_elapsed(
    cfg: &LinkConfig,
    elapsed_since_first_disconnect: Duration,
    failures_in_phase2: u32,
) -> BackoffPhase {
    if elapsed_since_first_disconnect.as_millis() < u128::from(cfg.fast_retry_window_ms) {
        BackoffPhase::FastRetry
    } else {
        BackoffPhase::SlowBackoff {
            failures_in_phase: failures_in_phase2,
        }
    }
}
