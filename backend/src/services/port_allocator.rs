//! Port allocation for agent workers.
//!
//! Availability is computed from the store on every request rather than
//! from an in-memory set: the store survives restarts and releases ports
//! automatically when rows leave the live states. The caller claims the
//! returned port in the same CAS update that moves the agent to
//! `starting`, so concurrent winners are decided by the unique index and
//! losers simply retry.

use std::collections::HashSet;

use thiserror::Error;

use crate::services::agent_store::{AgentStore, StoreError};

#[derive(Debug, Error)]
pub enum PortError {
    #[error("No port available in range {0}-{1}")]
    NoPortAvailable(u16, u16),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Hands out free TCP ports from a configured range
#[derive(Debug, Clone)]
pub struct PortAllocator {
    store: AgentStore,
    min: u16,
    max: u16,
}

impl PortAllocator {
    pub fn new(store: AgentStore, min: u16, max: u16) -> Self {
        Self { store, min, max }
    }

    /// Lowest port in [min, max] not currently assigned to any agent
    pub async fn next(&self) -> Result<u16, PortError> {
        self.next_excluding(None).await
    }

    /// Like [`next`](Self::next), but also skips `exclude`. Restarts pass
    /// their previous port here so a bouncing agent never lands on a
    /// socket that may still be in TIME_WAIT.
    pub async fn next_excluding(&self, exclude: Option<u16>) -> Result<u16, PortError> {
        let mut used = self.store.ports_in_range(self.min, self.max).await?;
        if let Some(port) = exclude {
            used.insert(port);
        }
        first_free_port(self.min, self.max, &used)
            .ok_or(PortError::NoPortAvailable(self.min, self.max))
    }
}

/// Ascending scan for the first port not in `used`
fn first_free_port(lo: u16, hi: u16, used: &HashSet<u16>) -> Option<u16> {
    (lo..=hi).find(|port| !used.contains(port))
}
