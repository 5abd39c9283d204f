//! # Queue Module
//!
//! A single-consumer retry queue. Each item carries its own backoff state;
//! `get` returns the highest-priority *eligible* item, where priority is
//! `(attempts, last_attempt)` ascending and eligibility means the item's
//! backoff period has expired. Head and tail sentinel priorities carry the
//! worker control protocol (stop/halt/flush) through the same channel as
//! event payloads.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::error::QueueError;

/// One queued payload: an event body or a worker control sentinel
#[derive(Debug, Clone, PartialEq)]
pub enum QueuePayload {
    /// Serialized event JSON bound for the adapter
    Body(String),

    /// Ask the worker to drain gracefully for at most the given duration
    Stop(Duration),

    /// Ask the worker to exit immediately without draining
    Halt,

    /// Ask the worker to flush the adapter when idle
    Flush,
}

/// Sort class for queued items
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemPriority {
    /// Always sorts before any normal item
    Head,

    /// Ordinary payload, ordered by retry state
    Normal,

    /// Always sorts after any normal item
    Tail,
}

impl ItemPriority {
    fn base_attempts(self) -> i64 {
        match self {
            ItemPriority::Head => i64::MIN,
            ItemPriority::Normal => 0,
            ItemPriority::Tail => i64::MAX,
        }
    }
}

/// A queued payload plus its per-item backoff state
#[derive(Debug, Clone)]
pub struct QueueItem {
    /// The wrapped payload
    pub payload: QueuePayload,

    priority: ItemPriority,
    attempts: i64,
    last_attempt: Option<Instant>,
    created: Instant,
    backoff: Arc<Backoff>,
}

impl QueueItem {
    /// Wrap a payload with the shared backoff policy
    pub fn new(payload: QueuePayload, priority: ItemPriority, backoff: Arc<Backoff>) -> Self {
        Self {
            payload,
            priority,
            attempts: priority.base_attempts(),
            last_attempt: None,
            created: Instant::now(),
            backoff,
        }
    }

    /// Delivery attempts recorded against this item
    pub fn attempts(&self) -> i64 {
        self.attempts
    }

    /// Timestamp of the last delivery attempt
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// When the item was first enqueued
    pub fn created(&self) -> Instant {
        self.created
    }

    /// Record one delivery attempt now
    pub fn attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_attempt = Some(Instant::now());
    }

    /// Clear retry state, restoring the item's base priority
    pub fn reset(&mut self) {
        self.attempts = self.priority.base_attempts();
        self.last_attempt = None;
    }

    /// Time remaining in this item's backoff period
    pub fn remaining(&self) -> Duration {
        self.backoff.remaining(self.attempts, self.last_attempt)
    }

    /// Returns true when the item is eligible for delivery
    pub fn expired(&self) -> bool {
        self.backoff.expired(self.attempts, self.last_attempt)
    }

    fn sort_key(&self) -> (i64, Option<Instant>) {
        (self.attempts, self.last_attempt)
    }
}

/// Point-in-time view of queue state
#[derive(Debug, Clone, Copy)]
pub struct QueueStat {
    /// Number of queued items
    pub size: usize,

    /// Items currently eligible for delivery
    pub ready: usize,

    /// Remaining backoff of the furthest-out item, if any are queued
    pub oldest_expiry: Option<Duration>,
}

/// Single-consumer FIFO with per-item backoff and head/tail priorities
#[derive(Debug)]
pub struct Queue {
    items: Mutex<Vec<QueueItem>>,
    not_empty: Notify,
    not_full: Notify,
    capacity: Option<usize>,
    backoff: Arc<Backoff>,
}

impl Default for Queue {
    fn default() -> Self {
        Self::new(None, Arc::new(Backoff::default()))
    }
}

impl Queue {
    /// Create a queue with an optional capacity bound and a shared backoff
    /// policy applied to every item
    pub fn new(capacity: Option<usize>, backoff: Arc<Backoff>) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
            backoff,
        }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Enqueue a payload; blocks while the queue is at capacity
    pub async fn put(&self, payload: QueuePayload) {
        self.put_item(QueueItem::new(
            payload,
            ItemPriority::Normal,
            Arc::clone(&self.backoff),
        ))
        .await;
    }

    /// Enqueue a payload that sorts before all normal items
    pub async fn put_head(&self, payload: QueuePayload) {
        self.put_item(QueueItem::new(
            payload,
            ItemPriority::Head,
            Arc::clone(&self.backoff),
        ))
        .await;
    }

    /// Enqueue a payload that sorts after all normal items
    pub async fn put_tail(&self, payload: QueuePayload) {
        self.put_item(QueueItem::new(
            payload,
            ItemPriority::Tail,
            Arc::clone(&self.backoff),
        ))
        .await;
    }

    /// Return an item to the queue, preserving its retry state
    pub async fn put_item(&self, item: QueueItem) {
        let mut item = Some(item);
        loop {
            let notified = self.not_full.notified();
            {
                let mut items = self.items.lock();
                if self.capacity.map_or(true, |cap| items.len() < cap) {
                    if let Some(item) = item.take() {
                        items.push(item);
                    }
                    self.not_empty.notify_one();
                    return;
                }
            }
            notified.await;
        }
    }

    /// Enqueue a control sentinel at the head without yielding. Control
    /// items are exempt from the capacity bound so shutdown cannot block
    /// behind a full queue.
    pub(crate) fn push_control(&self, payload: QueuePayload) {
        let item = QueueItem::new(payload, ItemPriority::Head, Arc::clone(&self.backoff));
        self.items.lock().push(item);
        self.not_empty.notify_one();
    }

    /// Fetch the highest-priority eligible item.
    ///
    /// Non-blocking mode returns [`QueueError::Empty`] immediately when no
    /// item is eligible. Blocking with `timeout = None` waits forever;
    /// with a timeout it waits at most that long.
    pub async fn get(
        &self,
        block: bool,
        timeout: Option<Duration>,
    ) -> Result<QueueItem, QueueError> {
        if !block {
            return self.try_pop().ok_or(QueueError::Empty);
        }
        match timeout {
            None => loop {
                let notified = self.not_empty.notified();
                if let Some(item) = self.try_pop() {
                    return Ok(item);
                }
                notified.await;
            },
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                loop {
                    let notified = self.not_empty.notified();
                    if let Some(item) = self.try_pop() {
                        return Ok(item);
                    }
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(QueueError::Empty);
                    }
                    if tokio::time::timeout(remaining, notified).await.is_err() {
                        return self.try_pop().ok_or(QueueError::Empty);
                    }
                }
            }
        }
    }

    /// Clear retry state for every queued item, making all eligible again
    pub fn reset(&self) {
        tracing::debug!("resetting queue");
        let mut items = self.items.lock();
        for item in items.iter_mut() {
            item.reset();
        }
        self.not_empty.notify_one();
    }

    /// Drop every queued item
    pub fn clear(&self) {
        tracing::debug!("clearing all items from queue");
        self.items.lock().clear();
        self.not_full.notify_waiters();
    }

    /// Scan the queue under its lock and report size / readiness / expiry
    pub fn stat(&self) -> QueueStat {
        let items = self.items.lock();
        QueueStat {
            size: items.len(),
            ready: items.iter().filter(|item| item.expired()).count(),
            oldest_expiry: items.iter().map(|item| item.remaining()).max(),
        }
    }

    fn try_pop(&self) -> Option<QueueItem> {
        let mut items = self.items.lock();
        items.sort_by_key(QueueItem::sort_key);

        let index = items
            .iter()
            .position(|item| item.attempts() <= 0 || item.expired())?;
        let item = items.remove(index);
        self.not_full.notify_one();
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn body(text: &str) -> QueuePayload {
        QueuePayload::Body(text.to_string())
    }

    async fn pop(queue: &Queue) -> QueuePayload {
        queue.get(false, None).await.unwrap().payload
    }

    #[tokio::test]
    async fn test_fifo_for_fresh_items() {
        let queue = Queue::default();
        queue.put(body("a")).await;
        queue.put(body("b")).await;
        queue.put(body("c")).await;

        assert_eq!(pop(&queue).await, body("a"));
        assert_eq!(pop(&queue).await, body("b"));
        assert_eq!(pop(&queue).await, body("c"));
    }

    #[tokio::test]
    async fn test_head_item_precedes_everything() {
        let queue = Queue::default();
        queue.put(body("a")).await;
        queue.put_head(body("urgent")).await;

        assert_eq!(pop(&queue).await, body("urgent"));
        assert_eq!(pop(&queue).await, body("a"));
    }

    #[tokio::test]
    async fn test_tail_item_follows_everything() {
        let queue = Queue::default();
        queue.put_tail(body("last")).await;
        queue.put(body("a")).await;
        queue.put(body("b")).await;

        assert_eq!(pop(&queue).await, body("a"));
        assert_eq!(pop(&queue).await, body("b"));
        assert_eq!(pop(&queue).await, body("last"));
    }

    #[tokio::test]
    async fn test_non_blocking_get_on_empty_queue() {
        let queue = Queue::default();
        assert!(matches!(
            queue.get(false, None).await,
            Err(QueueError::Empty)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_item_is_ineligible_until_backoff_expires() {
        let queue = Queue::default();
        queue.put(body("retry")).await;

        let mut item = queue.get(false, None).await.unwrap();
        item.attempt();
        queue.put_item(item).await;

        assert!(matches!(
            queue.get(false, None).await,
            Err(QueueError::Empty)
        ));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(pop(&queue).await, body("retry"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_orders_by_fewest_attempts() {
        let queue = Queue::default();
        queue.put(body("failed")).await;

        let mut failed = queue.get(false, None).await.unwrap();
        failed.attempt();
        queue.put_item(failed).await;
        queue.put(body("fresh")).await;

        tokio::time::advance(Duration::from_secs(4)).await;

        // Both eligible now, but the fresh item has fewer attempts.
        assert_eq!(pop(&queue).await, body("fresh"));
        assert_eq!(pop(&queue).await, body("failed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_makes_all_items_eligible() {
        let queue = Queue::default();
        queue.put(body("a")).await;

        let mut item = queue.get(false, None).await.unwrap();
        item.attempt();
        item.attempt();
        queue.put_item(item).await;

        queue.reset();
        let item = queue.get(false, None).await.unwrap();
        assert_eq!(item.attempts(), 0);
        assert!(item.last_attempt().is_none());
    }

    #[tokio::test]
    async fn test_reset_preserves_sentinel_priority() {
        let queue = Queue::default();
        queue.put(body("normal")).await;
        queue.put_head(body("head")).await;

        queue.reset();
        assert_eq!(pop(&queue).await, body("head"));
    }

    #[tokio::test]
    async fn test_clear_drops_everything() {
        let queue = Queue::default();
        queue.put(body("a")).await;
        queue.put(body("b")).await;

        queue.clear();
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocking_get_times_out() {
        let queue = Queue::default();
        let result = queue.get(true, Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Err(QueueError::Empty)));
    }

    #[tokio::test]
    async fn test_blocking_get_wakes_on_put() {
        let queue = Arc::new(Queue::default());
        let getter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get(true, Some(Duration::from_secs(5))).await })
        };

        tokio::task::yield_now().await;
        queue.put(body("x")).await;

        let item = getter.await.unwrap().unwrap();
        assert_eq!(item.payload, body("x"));
    }

    #[tokio::test]
    async fn test_bounded_put_blocks_until_space() {
        let queue = Arc::new(Queue::new(Some(1), Arc::new(Backoff::default())));
        queue.put(body("first")).await;

        let putter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.put(body("second")).await })
        };

        tokio::task::yield_now().await;
        assert_eq!(queue.len(), 1);

        assert_eq!(pop(&queue).await, body("first"));
        putter.await.unwrap();
        assert_eq!(pop(&queue).await, body("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stat_reports_readiness() {
        let queue = Queue::default();
        queue.put(body("ready")).await;

        let mut waiting = QueueItem::new(
            body("waiting"),
            ItemPriority::Normal,
            Arc::new(Backoff::default()),
        );
        waiting.attempt();
        queue.put_item(waiting).await;

        let stat = queue.stat();
        assert_eq!(stat.size, 2);
        assert_eq!(stat.ready, 1);
        assert_eq!(stat.oldest_expiry, Some(Duration::from_secs(2)));
    }
}
