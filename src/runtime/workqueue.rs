//! Rate limited, de-duplicating work queue.
//!
//! An item is held at most once while it waits. An item added again while a worker
//! processes it is parked and handed out again once the worker calls [`WorkQueue::done`],
//! so no two workers ever see the same item at the same time.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use fnv::{FnvHashMap, FnvHashSet};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(1000);

/// Per-item exponential backoff.
#[derive(Debug)]
struct RateLimiter<T> {
    failures: FnvHashMap<T, u32>,
    base: Duration,
    max: Duration,
}

impl<T: Eq + Hash> RateLimiter<T> {
    fn when(&mut self, item: T) -> Duration {
        let failures = self.failures.entry(item).or_insert(0);
        let exponent = *failures;
        *failures = failures.saturating_add(1);
        // 2^31 * 5ms is far beyond the cap
        if exponent >= 31 {
            return self.max;
        }
        self.base.saturating_mul(1 << exponent).min(self.max)
    }
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: FnvHashSet<T>,
    processing: FnvHashSet<T>,
    waiting: FnvHashMap<T, Instant>,
    limiter: RateLimiter<T>,
}

struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    shutdown: CancellationToken,
}

pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_backoff(BASE_DELAY, MAX_DELAY)
    }

    pub fn with_backoff(base: Duration, max: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: FnvHashSet::default(),
                    processing: FnvHashSet::default(),
                    waiting: FnvHashMap::default(),
                    limiter: RateLimiter {
                        failures: FnvHashMap::default(),
                        base,
                        max,
                    },
                }),
                notify: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Queue `item` unless it is already waiting.
    pub async fn add(&self, item: T) {
        if self.is_shutting_down() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        if !state.dirty.insert(item.clone()) {
            return;
        }
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Queue `item` once `delay` has elapsed.
    ///
    /// When the item is already scheduled, the earlier of the two deadlines wins.
    pub async fn add_after(&self, item: T, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(item).await;
            return;
        }

        let ready_at = Instant::now() + delay;
        {
            let mut state = self.inner.state.lock().await;
            match state.waiting.get(&item) {
                Some(existing) if *existing <= ready_at => return,
                _ => {
                    state.waiting.insert(item.clone(), ready_at);
                }
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(ready_at) => {
                    let due = {
                        let mut state = queue.inner.state.lock().await;
                        if state.waiting.get(&item) == Some(&ready_at) {
                            state.waiting.remove(&item);
                            true
                        } else {
                            false
                        }
                    };
                    if due {
                        queue.add(item).await;
                    }
                }
                _ = queue.inner.shutdown.cancelled() => {}
            }
        });
    }

    /// Queue `item` after its backoff delay, which doubles with every call until [`forget`](Self::forget).
    pub async fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut state = self.inner.state.lock().await;
            state.limiter.when(item.clone())
        };
        self.add_after(item, delay).await;
    }

    /// Clear the backoff history of `item`.
    pub async fn forget(&self, item: &T) {
        let mut state = self.inner.state.lock().await;
        state.limiter.failures.remove(item);
    }

    pub async fn num_requeues(&self, item: &T) -> u32 {
        let state = self.inner.state.lock().await;
        state.limiter.failures.get(item).copied().unwrap_or(0)
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            // Registered before the queue is checked so an add in between is not missed
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_shutting_down() {
                return None;
            }
            {
                let mut state = self.inner.state.lock().await;
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = self.inner.shutdown.cancelled() => return None,
            }
        }
    }

    /// Mark `item` as processed, requeueing it when it was added in the meantime.
    pub async fn done(&self, item: &T) {
        let mut state = self.inner.state.lock().await;
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop handing out items and drop pending delayed additions.
    pub async fn shut_down(&self) {
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Number of items waiting to be handed out.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_items_are_deduplicated() {
        let queue = WorkQueue::new();
        queue.add("cluster").await;
        queue.add("cluster").await;
        queue.add("other").await;

        assert_eq!(queue.len().await, 2);
        assert_eq!(queue.get().await, Some("cluster"));
        assert_eq!(queue.get().await, Some("other"));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn items_added_while_processing_come_back_after_done() {
        let queue = WorkQueue::new();
        queue.add("cluster").await;
        let item = queue.get().await.unwrap();

        queue.add("cluster").await;
        assert_eq!(queue.len().await, 0);

        queue.done(&item).await;
        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.get().await, Some("cluster"));
    }

    #[tokio::test]
    async fn get_waits_for_an_add() {
        let queue = WorkQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add(7).await;
        assert_eq!(consumer.await.unwrap(), Some(7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_parked_worker_gets_an_item() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        for round in 0..50 {
            let consumers: Vec<_> = (0..3)
                .map(|_| {
                    let queue = queue.clone();
                    tokio::spawn(async move { queue.get().await })
                })
                .collect();
            for item in 0..3 {
                queue.add(round * 10 + item).await;
            }

            let received = tokio::time::timeout(
                Duration::from_secs(5),
                futures::future::join_all(consumers),
            )
            .await
            .expect("a queued item was left behind");
            let mut items: Vec<u32> = received.into_iter().map(|r| r.unwrap().unwrap()).collect();
            items.sort();
            assert_eq!(items, vec![round * 10, round * 10 + 1, round * 10 + 2]);
            for item in items {
                queue.done(&item).await;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_items_wait_for_their_deadline() {
        let queue = WorkQueue::new();
        queue.add_after("cluster", Duration::from_secs(10)).await;

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(queue.is_empty().await);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let queue = WorkQueue::new();
        queue.add_after("cluster", Duration::from_secs(60)).await;
        queue.add_after("cluster", Duration::from_secs(5)).await;

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(queue.get().await, Some("cluster"));
        queue.done(&"cluster").await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn backoff_doubles_until_forgotten() {
        let queue: WorkQueue<&str> = WorkQueue::new();
        let mut state = queue.inner.state.lock().await;
        assert_eq!(state.limiter.when("cluster"), Duration::from_millis(5));
        assert_eq!(state.limiter.when("cluster"), Duration::from_millis(10));
        assert_eq!(state.limiter.when("cluster"), Duration::from_millis(20));
        assert_eq!(state.limiter.when("other"), Duration::from_millis(5));
        for _ in 0..40 {
            state.limiter.when("cluster");
        }
        assert_eq!(state.limiter.when("cluster"), MAX_DELAY);
        drop(state);

        assert_eq!(queue.num_requeues(&"cluster").await, 44);
        queue.forget(&"cluster").await;
        assert_eq!(queue.num_requeues(&"cluster").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_items_are_requeued() {
        let queue = WorkQueue::new();
        queue.add_rate_limited("cluster").await;
        assert!(queue.is_empty().await);
        assert_eq!(queue.num_requeues(&"cluster").await, 1);

        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(queue.get().await, Some("cluster"));
    }

    #[tokio::test]
    async fn shutdown_releases_waiting_workers() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;

        queue.shut_down().await;

        assert_eq!(consumer.await.unwrap(), None);
        queue.add(1).await;
        assert_eq!(queue.get().await, None);
    }
}
