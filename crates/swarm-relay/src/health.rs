//! Per-account circuit breaker for remote agent credentials.
//!
//! Auth rejections are sticky: an expired key fails every attempt until a
//! human rotates it, so after a couple of consecutive rejections the
//! account's circuit opens and dispatch routes around it. The circuit
//! half-opens after a cooldown so a rotated key comes back without a
//! restart.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Consecutive auth failures before the circuit opens.
const OPEN_THRESHOLD: u32 = 2;
/// How long an open circuit stays open before a retry is allowed.
const COOLDOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Default)]
struct Entry {
    open: bool,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Tracks credential health per account reference.
pub struct AccountHealth {
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<HashMap<String, Entry>>,
}

impl Default for AccountHealth {
    fn default() -> Self {
        Self::with_policy(OPEN_THRESHOLD, COOLDOWN)
    }
}

impl AccountHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// A successful call closes the circuit and clears the failure streak.
    pub fn record_success(&self, account: &str) {
        let mut inner = self.inner.lock().expect("health lock poisoned");
        let entry = inner.entry(account.to_string()).or_default();
        entry.open = false;
        entry.consecutive_failures = 0;
    }

    /// Record a failed call. Only auth rejections can open the circuit;
    /// transient failures just extend the streak.
    pub fn record_failure(&self, account: &str, auth_rejected: bool) {
        let mut inner = self.inner.lock().expect("health lock poisoned");
        let entry = inner.entry(account.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.last_failure = Some(Instant::now());
        if auth_rejected && entry.consecutive_failures >= self.threshold {
            entry.open = true;
            tracing::warn!(
                account,
                failures = entry.consecutive_failures,
                "account circuit opened"
            );
        }
    }

    /// Whether the account may be dispatched to. An open circuit half-opens
    /// once the cooldown has elapsed.
    pub fn is_healthy(&self, account: &str) -> bool {
        let mut inner = self.inner.lock().expect("health lock poisoned");
        let Some(entry) = inner.get_mut(account) else {
            return true;
        };
        if !entry.open {
            return true;
        }
        match entry.last_failure {
            Some(at) if at.elapsed() > self.cooldown => {
                tracing::info!(account, "account circuit half-open after cooldown");
                entry.open = false;
                entry.consecutive_failures = 0;
                true
            }
            _ => false,
        }
    }

    /// First healthy account other than `exclude`, in stable key order.
    pub fn healthy_alternate(
        &self,
        exclude: &str,
        accounts: &HashMap<String, String>,
    ) -> Option<String> {
        let mut candidates: Vec<&str> = accounts.keys().map(String::as_str).collect();
        candidates.sort_unstable();
        candidates
            .into_iter()
            .find(|a| *a != exclude && self.is_healthy(a))
            .map(String::from)
    }
}
