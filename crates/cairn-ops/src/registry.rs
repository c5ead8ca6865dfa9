//! In-flight operation tracking and per-destination serialization.

use std::path::PathBuf;
use std::sync::Arc;

use cairn_core::{OpError, OpResult, OperationId};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation tokens of running operations, keyed by caller id.
#[derive(Debug, Clone, Default)]
pub struct OperationRegistry {
    live: Arc<DashMap<OperationId, CancellationToken>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return a guard that unregisters it on drop.
    pub fn register(&self, id: OperationId) -> OpResult<Registration> {
        let token = CancellationToken::new();
        match self.live.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(OpError::OperationInProgress { id: id.to_string() });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        Ok(Registration {
            id,
            token,
            live: Arc::clone(&self.live),
        })
    }

    /// Cancel a running operation. Returns whether it was found.
    pub fn cancel(&self, id: &OperationId) -> bool {
        match self.live.get(id) {
            Some(token) => {
                debug!(%id, "cancelling operation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running operation.
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.live.iter() {
            entry.value().cancel();
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// A registered operation.
#[derive(Debug)]
pub struct Registration {
    id: OperationId,
    token: CancellationToken,
    live: Arc<DashMap<OperationId, CancellationToken>>,
}

impl Registration {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.live.remove(&self.id);
    }
}

/// One async mutex per destination directory.
///
/// Two batches writing into the same directory run one after the other, so
/// conflict detection for the second sees the results of the first.
#[derive(Debug, Clone, Default)]
pub struct DestinationLocks {
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl DestinationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: PathBuf) -> DestinationGuard {
        let mutex = Arc::clone(self.locks.entry(key.clone()).or_default().value());
        let guard = mutex.lock_owned().await;
        DestinationGuard {
            key,
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of directories with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held while a batch writes into a directory.
#[derive(Debug)]
pub struct DestinationGuard {
    key: PathBuf,
    locks: Arc<DashMap<PathBuf, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map holds the mutex once nobody is waiting.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
