//! Reusable player identities
//!
//! A session has `MAX_PLAYERS` identity slots. The accept path takes one
//! before accepting a connection and the teardown path gives it back. The
//! [`IdentityGate`] wraps the pool so the accept path can wait for a release
//! instead of polling.

use crate::error::{Result, ServerError};
use log::{debug, info};
use shared::PlayerId;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// The set of identities not currently held by a live player.
#[derive(Debug)]
pub struct IdentityPool {
    free: BTreeSet<PlayerId>,
    capacity: usize,
}

impl IdentityPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: (0..capacity as PlayerId).collect(),
            capacity,
        }
    }

    /// Takes the lowest free identity.
    pub fn allocate(&mut self) -> Result<PlayerId> {
        let id = self.free.pop_first().ok_or(ServerError::IdentityExhausted)?;
        debug!("Reserved ID: {}", id);
        Ok(id)
    }

    /// Returns an identity to the pool. Releasing an identity that is already
    /// free, or one outside the pool, does nothing and returns false.
    pub fn release(&mut self, id: PlayerId) -> bool {
        if (id as usize) >= self.capacity {
            return false;
        }
        let released = self.free.insert(id);
        if released {
            debug!("Released ID: {}", id);
        }
        released
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }
}

/// Identity pool shared between the accept task and the session loop.
#[derive(Debug)]
pub struct IdentityGate {
    pool: Mutex<IdentityPool>,
    released: Notify,
}

impl IdentityGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Mutex::new(IdentityPool::new(capacity)),
            released: Notify::new(),
        }
    }

    fn pool(&self) -> MutexGuard<'_, IdentityPool> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn try_allocate(&self) -> Result<PlayerId> {
        self.pool().allocate()
    }

    /// Waits until an identity is free and takes it.
    pub async fn acquire(&self) -> PlayerId {
        loop {
            match self.try_allocate() {
                Ok(id) => return id,
                Err(_) => {
                    info!("No available IDs. Waiting for an ID to be released...");
                    self.released.notified().await;
                }
            }
        }
    }

    pub fn release(&self, id: PlayerId) {
        if self.pool().release(id) {
            self.released.notify_one();
        }
    }

    pub fn available(&self) -> usize {
        self.pool().available()
    }
}
