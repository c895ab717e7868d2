//! Preemptive per-`(repo, PR)` locking.
//!
//! At most one lifecycle operation runs per pull request. The lock is
//! preemptive: a later acquirer for the same key signals the current
//! holder, whose scoped context is then cancelled, but it does not steal
//! the lock; it waits for the holder to observe cancellation and exit
//! the critical section. Operations on a key are therefore totally
//! ordered while a newer webhook can always displace a stale in-flight
//! one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{watch, OwnedMutexGuard};

use crate::context::OpContext;

/// Errors acquiring a preemptive lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("lock wait cancelled for {repo} PR {pull_request}")]
    Cancelled { repo: String, pull_request: u64 },
}

#[derive(Debug)]
struct KeyLock {
    mutex: Arc<tokio::sync::Mutex<()>>,
    /// Highest ticket issued for this key. A holder is preempted when the
    /// value exceeds its own ticket.
    latest: watch::Sender<u64>,
    tickets: AtomicU64,
}

/// Process-wide provider of per-`(repo, PR)` preemptive locks.
#[derive(Debug, Default)]
pub struct PreemptiveLockProvider {
    keys: Mutex<HashMap<(String, u64), Arc<KeyLock>>>,
}

impl PreemptiveLockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locker for one `(repo, PR)` key. Lockers for the same key share
    /// state.
    pub fn locker(&self, repo: &str, pull_request: u64) -> PreemptiveLocker {
        let mut keys = self.keys.lock().unwrap();
        let key = keys
            .entry((repo.to_string(), pull_request))
            .or_insert_with(|| {
                Arc::new(KeyLock {
                    mutex: Arc::new(tokio::sync::Mutex::new(())),
                    latest: watch::channel(0).0,
                    tickets: AtomicU64::new(0),
                })
            })
            .clone();
        PreemptiveLocker {
            key,
            repo: repo.to_string(),
            pull_request,
        }
    }
}

/// A handle to acquire the lock for one key.
#[derive(Debug)]
pub struct PreemptiveLocker {
    key: Arc<KeyLock>,
    repo: String,
    pull_request: u64,
}

impl PreemptiveLocker {
    /// Acquire the lock, signalling preemption to any current holder
    /// before waiting. Returns an error if `ctx` is cancelled while
    /// waiting.
    pub async fn lock(&self, ctx: &OpContext) -> Result<LockGuard, LockError> {
        let ticket = self.key.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        // Signal the current holder before queueing behind it.
        self.key.latest.send_modify(|v| {
            if ticket > *v {
                *v = ticket;
            }
        });
        tokio::select! {
            guard = Arc::clone(&self.key.mutex).lock_owned() => Ok(LockGuard {
                _guard: guard,
                preempt: self.key.latest.subscribe(),
                ticket,
            }),
            _ = ctx.cancelled() => Err(LockError::Cancelled {
                repo: self.repo.clone(),
                pull_request: self.pull_request,
            }),
        }
    }
}

/// Held critical section. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    _guard: OwnedMutexGuard<()>,
    preempt: watch::Receiver<u64>,
    ticket: u64,
}

impl LockGuard {
    /// An owned future that resolves when a later acquirer arrives for
    /// this key. Detached from the guard so it can be awaited from a
    /// watcher task while the operation runs.
    pub fn preempt_signal(&self) -> PreemptSignal {
        PreemptSignal {
            rx: self.preempt.clone(),
            ticket: self.ticket,
        }
    }
}

/// Resolves when the associated lock holder has been preempted.
#[derive(Debug)]
pub struct PreemptSignal {
    rx: watch::Receiver<u64>,
    ticket: u64,
}

impl PreemptSignal {
    pub async fn wait(mut self) {
        loop {
            if *self.rx.borrow_and_update() > self.ticket {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
