//! Timer registry — one armed, cancellable countdown per message id.
//! Purely in-memory: restarts rebuild it from the store.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use courier_core::error::{CourierError, Result};

struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    timers: HashMap<String, ArmedTimer>,
    closed: bool,
}

/// Registry of armed timers keyed by message id.
///
/// At most one timer is armed per id; re-arming replaces the previous one.
/// Callbacks run in their own spawned task, never under a caller's lock.
pub struct TimerRegistry {
    inner: Arc<Mutex<Inner>>,
    next_generation: AtomicU64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                timers: HashMap::new(),
                closed: false,
            })),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Arm a timer that runs `callback` at (or as soon as possible after)
    /// `fire_at`. A fire time already in the past fires immediately.
    ///
    /// Fails only when the registry has been shut down.
    pub fn arm<F, Fut>(&self, id: &str, fire_at: DateTime<Utc>, callback: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(CourierError::Shutdown("timer registry is closed".into()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let registry = Arc::clone(&self.inner);
        let timer_id = id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Drop our own bookkeeping first, and bail out if a newer timer
            // replaced this one while we slept.
            {
                let mut inner = registry.lock().unwrap();
                match inner.timers.get(&timer_id) {
                    Some(t) if t.generation == generation => {
                        inner.timers.remove(&timer_id);
                    }
                    _ => return,
                }
            }
            callback().await;
        });

        // Last write wins: abort any timer previously armed for this id.
        if let Some(old) = inner.timers.insert(id.to_string(), ArmedTimer { generation, handle }) {
            old.handle.abort();
        }
        Ok(())
    }

    /// Cancel a pending timer. No-op (false) if absent or already fired.
    pub fn disarm(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.timers.remove(id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Number of currently armed timers.
    pub fn armed(&self) -> usize {
        self.inner.lock().unwrap().timers.len()
    }

    pub fn is_armed(&self, id: &str) -> bool {
        self.inner.lock().unwrap().timers.contains_key(id)
    }

    /// Disarm everything and refuse further arming.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        for (_, timer) in inner.timers.drain() {
            timer.handle.abort();
        }
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
