//! Registry of live elevated processes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

/// Set of running elevated processes that can be force-terminated together.
#[derive(Debug, Clone, Default)]
pub struct ProcessSet {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: AtomicU64,
    live: DashMap<u64, CancellationToken>,
}

impl ProcessSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process. It stays in the set until the handle is dropped.
    pub fn track(&self) -> TrackedProcess {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.inner.live.insert(id, token.clone());
        TrackedProcess {
            id,
            token,
            set: self.clone(),
        }
    }

    /// Number of processes currently running.
    pub fn len(&self) -> usize {
        self.inner.live.len()
    }

    /// Whether no process is running.
    pub fn is_empty(&self) -> bool {
        self.inner.live.is_empty()
    }

    /// Signal every live process to be killed.
    pub fn kill_all(&self) -> usize {
        let mut killed = 0;
        for entry in self.inner.live.iter() {
            entry.value().cancel();
            killed += 1;
        }
        if killed > 0 {
            tracing::info!(count = killed, "terminating elevated processes");
        }
        killed
    }
}

/// Membership of one process in a [`ProcessSet`].
#[derive(Debug)]
pub struct TrackedProcess {
    id: u64,
    token: CancellationToken,
    set: ProcessSet,
}

impl TrackedProcess {
    /// Resolves when the process must be killed.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for TrackedProcess {
    fn drop(&mut self) {
        self.set.inner.live.remove(&self.id);
    }
}
