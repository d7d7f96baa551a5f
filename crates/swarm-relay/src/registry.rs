//! Active-swarm registry: at most one live control loop per swarm id.
//!
//! Injected into the executor rather than held as a global so multiple
//! engine instances in one process can keep separate (or shared) views.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::errors::SwarmError;

/// Registry of swarms whose control loop is currently running.
#[derive(Debug, Default)]
pub struct ActiveSwarms {
    inner: Mutex<HashMap<String, Instant>>,
}

/// Snapshot row from [`ActiveSwarms::list`].
#[derive(Debug, Clone)]
pub struct ActiveSwarmInfo {
    pub swarm_id: String,
    pub running_for: Duration,
}

impl ActiveSwarms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a swarm id for one control loop. The returned lease releases
    /// the claim on drop, so every exit path of the loop gives it back.
    pub fn acquire(self: &Arc<Self>, swarm_id: &str) -> Result<SwarmLease, SwarmError> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        if inner.contains_key(swarm_id) {
            return Err(SwarmError::AlreadyExecuting(swarm_id.to_string()));
        }
        let started_at = Instant::now();
        inner.insert(swarm_id.to_string(), started_at);
        Ok(SwarmLease {
            registry: Arc::clone(self),
            swarm_id: swarm_id.to_string(),
            started_at,
        })
    }

    pub fn list(&self) -> Vec<ActiveSwarmInfo> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        inner
            .iter()
            .map(|(id, started)| ActiveSwarmInfo {
                swarm_id: id.clone(),
                running_for: started.elapsed(),
            })
            .collect()
    }

    pub fn is_active(&self, swarm_id: &str) -> bool {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .contains_key(swarm_id)
    }

    fn release(&self, swarm_id: &str) {
        self.inner
            .lock()
            .expect("registry lock poisoned")
            .remove(swarm_id);
    }
}

/// RAII claim on a swarm id.
#[derive(Debug)]
pub struct SwarmLease {
    registry: Arc<ActiveSwarms>,
    swarm_id: String,
    started_at: Instant,
}

impl SwarmLease {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Drop for SwarmLease {
    fn drop(&mut self) {
        self.registry.release(&self.swarm_id);
    }
}
