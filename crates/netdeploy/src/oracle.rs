//! Reachability oracle
//!
//! Waits for the host network to settle, then probes a target with a
//! bounded number of sequential attempts.

use crate::backend::Prober;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::thread;
use std::time::{Duration, Instant};

/// Source of time for settle delays and probe pacing
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`thread::sleep`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Probe configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeOptions {
    /// Sequential attempts; zero is treated as one
    pub attempts: u32,
    /// Upper bound for one attempt; also its minimum duration
    #[serde(with = "secs")]
    pub timeout: Duration,
    /// Delay before the first attempt so links can come up
    #[serde(with = "secs")]
    pub settle: Duration,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(2),
            settle: Duration::from_secs(20),
        }
    }
}

impl ProbeOptions {
    pub fn without_settle(self) -> Self {
        Self {
            settle: Duration::ZERO,
            ..self
        }
    }
}

/// Latency of the successful probe, or the last error
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeDetail {
    Latency(Duration),
    Error(String),
}

/// Outcome of probing a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub reachable: bool,
    pub target: IpAddr,
    /// Attempts actually made
    pub attempts: u32,
    /// Time spent probing, settle delay excluded
    pub elapsed: Duration,
    pub detail: ProbeDetail,
}

impl Verdict {
    pub fn latency(&self) -> Option<Duration> {
        match self.detail {
            ProbeDetail::Latency(d) => Some(d),
            ProbeDetail::Error(_) => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.detail {
            ProbeDetail::Latency(d) => format!("{} reachable ({:.1} ms)", self.target, d.as_secs_f64() * 1000.0),
            ProbeDetail::Error(e) => format!(
                "{} unreachable after {} attempts: {e}",
                self.target, self.attempts
            ),
        }
    }
}

/// Probe `target` until it answers or the attempts run out.
///
/// Every attempt occupies at least `timeout`, so a target that never answers
/// costs `attempts * timeout` after the settle delay.
pub fn probe(
    prober: &dyn Prober,
    clock: &dyn Clock,
    target: IpAddr,
    options: &ProbeOptions,
) -> Verdict {
    if !options.settle.is_zero() {
        log::info!(
            "Waiting {}s for interfaces to settle",
            options.settle.as_secs()
        );
        clock.sleep(options.settle);
    }

    let attempts = options.attempts.max(1);
    let started = clock.now();
    let mut last_error = String::from("no attempt made");

    for attempt in 1..=attempts {
        let attempt_start = clock.now();
        match prober.probe_once(target, options.timeout) {
            Ok(latency) => {
                log::debug!("Probe {attempt}/{attempts} to {target} answered");
                return Verdict {
                    reachable: true,
                    target,
                    attempts: attempt,
                    elapsed: clock.now().duration_since(started),
                    detail: ProbeDetail::Latency(latency),
                };
            }
            Err(e) => {
                log::debug!("Probe {attempt}/{attempts} to {target} failed: {e}");
                last_error = e.to_string();
            }
        }

        let spent = clock.now().duration_since(attempt_start);
        if let Some(remaining) = options.timeout.checked_sub(spent) {
            clock.sleep(remaining);
        }
    }

    Verdict {
        reachable: false,
        target,
        attempts,
        elapsed: clock.now().duration_since(started),
        detail: ProbeDetail::Error(last_error),
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
