//! # Work Queue
//!
//! Deduplicating queue of resources waiting for a reconcile pass.
//!
//! - A key is queued at most once, however often it is added.
//! - A key handed to a worker is not handed out again until the worker calls
//!   [`WorkQueue::done`]. Adds that arrive meanwhile are remembered and the
//!   key is queued again on `done`, so one resource never sees two passes at
//!   the same time.
//! - [`WorkQueue::add_after`] delays an add; the timer is dropped on
//!   shutdown. Only the earliest pending timer per key is kept, and a timer
//!   replaced by an earlier one is cancelled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Which reconciler a key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Source,
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl WorkKey {
    pub fn source(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Source,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn destination(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::Destination,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {}/{}", self.kind, self.namespace, self.name)
    }
}

#[derive(Default)]
struct State {
    ready: VecDeque<WorkKey>,
    queued: HashSet<WorkKey>,
    processing: HashSet<WorkKey>,
    /// Added while being processed.
    dirty: HashSet<WorkKey>,
    /// Pending delayed adds and the token that cancels each timer.
    waiting: HashMap<WorkKey, (Instant, CancellationToken)>,
}

#[derive(Clone)]
pub struct WorkQueue {
    state: Arc<Mutex<State>>,
    notify: Arc<Notify>,
    shutdown: CancellationToken,
}

impl WorkQueue {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            notify: Arc::new(Notify::new()),
            shutdown,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, key: WorkKey) {
        let mut state = self.lock();
        if state.processing.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) {
            trace!(key = %key, "Queued");
            state.ready.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Add `key` once `delay` has passed, unless the queue shuts down first.
    pub fn add_after(&self, key: WorkKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let deadline = Instant::now() + delay;
        let timer = self.shutdown.child_token();
        {
            let mut state = self.lock();
            if let Some((pending, _)) = state.waiting.get(&key) {
                if *pending <= deadline {
                    return;
                }
            }
            let replaced = state
                .waiting
                .insert(key.clone(), (deadline, timer.clone()));
            if let Some((_, superseded)) = replaced {
                trace!(key = %key, "Replacing later timer");
                superseded.cancel();
            }
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    let fire = {
                        let mut state = queue.lock();
                        match state.waiting.get(&key) {
                            Some((pending, _)) if *pending == deadline => {
                                state.waiting.remove(&key);
                                true
                            }
                            _ => false,
                        }
                    };
                    if fire {
                        queue.add(key);
                    }
                }
            }
        });
    }

    /// Whether a delayed add is pending for `key`.
    pub fn is_waiting(&self, key: &WorkKey) -> bool {
        self.lock().waiting.contains_key(key)
    }

    /// Wait for the next key. `None` once the queue is shut down.
    pub async fn next(&self) -> Option<WorkKey> {
        loop {
            let notified = self.notify.notified();
            if self.shutdown.is_cancelled() {
                return None;
            }
            if let Some(key) = self.pop() {
                return Some(key);
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = notified => {}
            }
        }
    }

    fn pop(&self) -> Option<WorkKey> {
        let mut state = self.lock();
        let key = state.ready.pop_front()?;
        state.queued.remove(&key);
        state.processing.insert(key.clone());
        Some(key)
    }

    /// Mark a pass over `key` finished.
    pub fn done(&self, key: &WorkKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.remove(key) {
            drop(state);
            self.add(key.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.lock().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deduplicates() {
        let queue = WorkQueue::new(CancellationToken::new());
        queue.add(WorkKey::source("default", "a"));
        queue.add(WorkKey::source("default", "a"));
        queue.add(WorkKey::destination("default", "a"));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_key_not_handed_out_twice_while_processing() {
        let queue = WorkQueue::new(CancellationToken::new());
        let key = WorkKey::source("default", "a");
        queue.add(key.clone());

        let taken = queue.next().await.unwrap();
        queue.add(key.clone());
        assert!(queue.is_empty());

        queue.done(&taken);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next().await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_shutdown_releases_waiters() {
        let token = CancellationToken::new();
        let queue = WorkQueue::new(token.clone());
        let waiter = tokio::spawn({
            let queue = queue.clone();
            async move { queue.next().await }
        });
        token.cancel();
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after() {
        let queue = WorkQueue::new(CancellationToken::new());
        queue.add_after(WorkKey::source("default", "a"), Duration::from_secs(30));
        tokio::task::yield_now().await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_timer_wins() {
        let queue = WorkQueue::new(CancellationToken::new());
        let key = WorkKey::source("default", "a");
        queue.add_after(key.clone(), Duration::from_secs(60));
        queue.add_after(key.clone(), Duration::from_secs(10));
        queue.add_after(key.clone(), Duration::from_secs(600));
        assert!(queue.is_waiting(&key));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_waiting(&key));

        // The superseded 60s timer does not fire a second add
        let taken = queue.next().await.unwrap();
        queue.done(&taken);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_replaced_timer_is_cancelled() {
        let queue = WorkQueue::new(CancellationToken::new());
        let key = WorkKey::source("default", "a");
        queue.add_after(key.clone(), Duration::from_secs(600));
        let later = queue.lock().waiting.get(&key).unwrap().1.clone();

        // A later deadline leaves the pending timer alone
        queue.add_after(key.clone(), Duration::from_secs(900));
        assert!(!later.is_cancelled());

        queue.add_after(key.clone(), Duration::from_secs(5));
        assert!(later.is_cancelled());
        let earlier = queue.lock().waiting.get(&key).unwrap().1.clone();
        assert!(!earlier.is_cancelled());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_waiting(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_timers() {
        let token = CancellationToken::new();
        let queue = WorkQueue::new(token.clone());
        let key = WorkKey::source("default", "a");
        queue.add_after(key.clone(), Duration::from_secs(30));
        let timer = queue.lock().waiting.get(&key).unwrap().1.clone();

        token.cancel();
        assert!(timer.is_cancelled());
    }
}
