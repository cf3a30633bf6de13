//! Reachability Prober (spec.md §4.B).
//!
//! Runs as a `tokio::time::interval` loop in the teacher's scheduler style
//! (`ws_forwarder.rs`'s `heartbeat_interval.tick()` pattern). ICMP probing
//! is abstracted behind a [`Pinger`] trait so the default implementation
//! (the `surge-ping` crate — the idiomatic async ICMP crate for exactly
//! this, imported per the "enrich from the rest of the pack" rule since
//! the teacher has no ICMP code of its own) can be swapped for a
//! deterministic fake in tests.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tracing::error;

use crate::config::ProberConfig;
use crate::repo::devices;

/// One probe attempt's outcome.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOutcome {
    pub success: bool,
    pub latency_ms: Option<u64>,
}

/// Abstracts ICMP reachability probing so tests don't need real network
/// access or root/CAP_NET_RAW privileges.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeOutcome;
}

/// Default `Pinger` backed by `surge-ping`.
pub struct IcmpPinger {
    client: surge_ping::Client,
}

impl IcmpPinger {
    pub fn new() -> Result<Self, surge_ping::SurgeError> {
        let config = surge_ping::Config::default();
        Ok(Self {
            client: surge_ping::Client::new(&config)?,
        })
    }
}

#[async_trait]
impl Pinger for IcmpPinger {
    async fn probe(&self, address: &str, timeout: Duration) -> ProbeOutcome {
        let Ok(ip): Result<IpAddr, _> = address.parse() else {
            return ProbeOutcome {
                success: false,
                latency_ms: None,
            };
        };

        let payload = [0u8; 8];
        let mut pinger = self
            .client
            .pinger(ip, surge_ping::PingIdentifier(rand::random()))
            .await;
        pinger.timeout(timeout);

        match pinger.ping(surge_ping::PingSequence(0), &payload).await {
            Ok((_packet, rtt)) => ProbeOutcome {
                success: true,
                latency_ms: Some(rtt.as_millis() as u64),
            },
            Err(_) => ProbeOutcome {
                success: false,
                latency_ms: None,
            },
        }
    }
}

struct Window {
    outcomes: VecDeque<ProbeOutcome>,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, outcome: ProbeOutcome) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(outcome);
    }

    /// `(ping_avg, ping_success)` per spec.md §4.B.
    fn aggregates(&self) -> (i64, f64) {
        let total = self.outcomes.len();
        if total == 0 {
            return (0, 0.0);
        }
        let successes: Vec<u64> = self
            .outcomes
            .iter()
            .filter(|o| o.success)
            .filter_map(|o| o.latency_ms)
            .collect();
        let ping_avg = if successes.is_empty() {
            0
        } else {
            (successes.iter().sum::<u64>() / successes.len() as u64) as i64
        };
        let success_count = self.outcomes.iter().filter(|o| o.success).count();
        let ping_success = (success_count as f64 / total as f64 * 100.0).round() / 100.0;
        (ping_avg, ping_success)
    }
}

/// Runs the periodic probe cycle for every registered address.
pub struct ReachabilityProber {
    pool: PgPool,
    pinger: Arc<dyn Pinger>,
    config: ProberConfig,
    windows: Mutex<HashMap<String, Window>>,
}

impl ReachabilityProber {
    pub fn new(pool: PgPool, pinger: Arc<dyn Pinger>, config: ProberConfig) -> Self {
        Self {
            pool,
            pinger,
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Probe every address once, concurrently, and persist the updated
    /// rolling-window aggregates. Probe failures never stop the caller's
    /// scheduler loop (spec.md §4.B).
    pub async fn probe_cycle(&self, addresses: &[String]) {
        let timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let outcomes: Vec<(String, ProbeOutcome)> = futures_util::future::join_all(
            addresses.iter().map(|address| {
                let pinger = self.pinger.clone();
                let address = address.clone();
                async move {
                    let outcome = pinger.probe(&address, timeout).await;
                    (address, outcome)
                }
            }),
        )
        .await;

        for (address, outcome) in outcomes {
            let (ping_avg, ping_success) = {
                let mut windows = self.windows.lock().await;
                let window = windows
                    .entry(address.clone())
                    .or_insert_with(|| Window::new(self.config.probe_window));
                window.push(outcome);
                window.aggregates()
            };

            if let Err(e) =
                devices::upsert_reachability(&self.pool, &address, ping_avg, ping_success, outcome.success)
                    .await
            {
                error!(address = %address, error = %e, "failed to persist reachability aggregates");
            }
        }
    }

    /// Run forever, probing every address in `addresses()` on each tick.
    pub async fn run(self: Arc<Self>, addresses: impl Fn() -> Vec<String> + Send + Sync + 'static) {
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.probe_interval_ms));
        loop {
            interval.tick().await;
            let targets = addresses();
            if targets.is_empty() {
                continue;
            }
            self.probe_cycle(&targets).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePinger {
        succeed: bool,
        latency_ms: u64,
    }

    #[async_trait]
    impl Pinger for FakePinger {
        async fn probe(&self, _address: &str, _timeout: Duration) -> ProbeOutcome {
            ProbeOutcome {
                success: self.succeed,
                latency_ms: self.succeed.then_some(self.latency_ms),
            }
        }
    }

    #[test]
    fn window_drops_oldest_beyond_capacity() {
        let mut window = Window::new(3);
        for i in 0..5 {
            window.push(ProbeOutcome {
                success: true,
                latency_ms: Some(i),
            });
        }
        assert_eq!(window.outcomes.len(), 3);
        // Oldest two (0, 1) should have been evicted; remaining are 2,3,4.
        let latencies: Vec<u64> = window.outcomes.iter().map(|o| o.latency_ms.unwrap()).collect();
        assert_eq!(latencies, vec![2, 3, 4]);
    }

    #[test]
    fn aggregates_compute_avg_over_successes_and_success_ratio_over_all() {
        let mut window = Window::new(4);
        window.push(ProbeOutcome {
            success: true,
            latency_ms: Some(10),
        });
        window.push(ProbeOutcome {
            success: true,
            latency_ms: Some(20),
        });
        window.push(ProbeOutcome {
            success: false,
            latency_ms: None,
        });
        let (avg, success) = window.aggregates();
        assert_eq!(avg, 15);
        assert!((success - 0.67).abs() < 0.01);
    }

    #[test]
    fn empty_window_aggregates_to_zero() {
        let window = Window::new(4);
        assert_eq!(window.aggregates(), (0, 0.0));
    }

    #[tokio::test]
    async fn fake_pinger_reports_failure_without_panicking() {
        let pinger = FakePinger {
            succeed: false,
            latency_ms: 0,
        };
        let outcome = pinger.probe("10.0.0.1", Duration::from_millis(500)).await;
        assert!(!outcome.success);
    }
}
