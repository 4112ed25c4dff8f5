//! Connection health counters
//!
//! Tracks per-connection success/failure counts and timestamps. These
//! counters are informational; the liveness flag that drives selection
//! lives on the pool record itself.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Call outcome counters for one connection
#[derive(Debug)]
pub struct ConnectionHealth {
    successes: AtomicU64,
    transport_failures: AtomicU64,
    remote_errors: AtomicU64,
    last_success: RwLock<Option<Instant>>,
    last_failure: RwLock<Option<Instant>>,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            successes: AtomicU64::new(0),
            transport_failures: AtomicU64::new(0),
            remote_errors: AtomicU64::new(0),
            last_success: RwLock::new(None),
            last_failure: RwLock::new(None),
        }
    }

    pub fn record_success(&self) {
        saturating_inc(&self.successes);
        *self
            .last_success
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
    }

    pub fn record_transport_failure(&self) {
        saturating_inc(&self.transport_failures);
        *self
            .last_failure
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
    }

    /// The backend answered with its own error; the connection itself is fine
    pub fn record_remote_error(&self) {
        saturating_inc(&self.remote_errors);
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Acquire)
    }

    pub fn transport_failures(&self) -> u64 {
        self.transport_failures.load(Ordering::Acquire)
    }

    pub fn remote_errors(&self) -> u64 {
        self.remote_errors.load(Ordering::Acquire)
    }

    /// Share of completed calls (successes and remote errors) among all attempts
    pub fn success_rate(&self) -> f64 {
        let completed = self.successes() + self.remote_errors();
        let total = completed + self.transport_failures();
        if total == 0 {
            return 1.0;
        }
        completed as f64 / total as f64
    }

    pub fn time_since_last_success(&self) -> Option<Duration> {
        self.last_success
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .map(|instant| instant.elapsed())
    }

    pub fn time_since_last_failure(&self) -> Option<Duration> {
        self.last_failure
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .map(|instant| instant.elapsed())
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

fn saturating_inc(counter: &AtomicU64) {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_add(1))
        })
        .ok();
}

/// Point-in-time view of a connection, for reconciliation and diagnostics
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub connection: String,
    pub reachable: bool,
    pub successes: u64,
    pub transport_failures: u64,
    pub remote_errors: u64,
    pub success_rate: f64,
    pub time_since_last_success: Option<Duration>,
    pub time_since_last_failure: Option<Duration>,
}
