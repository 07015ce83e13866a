//! Bounded MPSC ingress queue for a shard.
//!
//! A lock-free ring buffer fronted by two wakeup channels: consumers park
//! on `items`, blocked producers park on `space`. Overflow behavior is
//! selected per deployment: block the producer or evict the oldest queued
//! entry and count it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use tokio::sync::Notify;

use crate::config::BackpressurePolicy;

pub enum RecvOutcome<T> {
    Item(T),
    /// No traffic within the idle window.
    Idle,
    /// Queue closed and fully drained.
    Closed,
}

pub struct ShardQueue<T> {
    buf: ArrayQueue<T>,
    policy: BackpressurePolicy,
    items: Notify,
    space: Notify,
    closed: AtomicBool,
}

impl<T> ShardQueue<T> {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Self {
        Self {
            buf: ArrayQueue::new(capacity),
            policy,
            items: Notify::new(),
            space: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Enqueue one item. Under `Block` this awaits a free slot; under
    /// `DropOldest` it evicts queued entries instead and returns how many
    /// were evicted. `Err` hands the item back when the queue is closed.
    pub async fn push(&self, mut item: T) -> Result<u64, T> {
        match self.policy {
            BackpressurePolicy::Block => loop {
                if self.closed.load(Ordering::Acquire) {
                    return Err(item);
                }
                match self.buf.push(item) {
                    Ok(()) => {
                        self.items.notify_one();
                        return Ok(0);
                    }
                    Err(back) => {
                        item = back;
                        // Register interest before re-checking, so a
                        // notify between the failed push and the await is
                        // not lost.
                        let space = self.space.notified();
                        if self.buf.len() < self.buf.capacity()
                            || self.closed.load(Ordering::Acquire)
                        {
                            continue;
                        }
                        space.await;
                    }
                }
            },
            BackpressurePolicy::DropOldest => {
                if self.closed.load(Ordering::Acquire) {
                    return Err(item);
                }
                let mut evicted = 0;
                loop {
                    match self.buf.push(item) {
                        Ok(()) => {
                            self.items.notify_one();
                            return Ok(evicted);
                        }
                        Err(back) => {
                            item = back;
                            if self.buf.pop().is_some() {
                                evicted += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Dequeue one item, or report idleness after `idle` with no traffic.
    /// `Closed` is only returned once the queue is closed AND empty.
    pub async fn recv(&self, idle: Duration) -> RecvOutcome<T> {
        loop {
            if let Some(item) = self.buf.pop() {
                self.space.notify_one();
                return RecvOutcome::Item(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return RecvOutcome::Closed;
            }
            let notified = self.items.notified();
            if !self.buf.is_empty() || self.closed.load(Ordering::Acquire) {
                continue;
            }
            if tokio::time::timeout(idle, notified).await.is_err() {
                return RecvOutcome::Idle;
            }
        }
    }

    /// Close the queue. Parked producers and consumers wake up; queued
    /// items remain consumable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.items.notify_waiters();
        self.space.notify_waiters();
    }

    /// Throw away everything still queued. Used when a drain times out.
    pub fn discard_remaining(&self) -> u64 {
        let mut n = 0;
        while self.buf.pop().is_some() {
            n += 1;
        }
        if n > 0 {
            self.space.notify_waiters();
        }
        n
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_push_recv_in_order() {
        let queue = ShardQueue::new(8, BackpressurePolicy::Block);
        queue.push(1u32).await.unwrap();
        queue.push(2u32).await.unwrap();

        match queue.recv(Duration::from_millis(50)).await {
            RecvOutcome::Item(v) => assert_eq!(v, 1),
            _ => panic!("expected item"),
        }
        match queue.recv(Duration::from_millis(50)).await {
            RecvOutcome::Item(v) => assert_eq!(v, 2),
            _ => panic!("expected item"),
        }
    }

    #[tokio::test]
    async fn test_recv_reports_idle() {
        let queue: ShardQueue<u32> = ShardQueue::new(8, BackpressurePolicy::Block);
        match queue.recv(Duration::from_millis(10)).await {
            RecvOutcome::Idle => {}
            _ => panic!("expected idle"),
        }
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_and_counts() {
        let queue = ShardQueue::new(2, BackpressurePolicy::DropOldest);
        assert_eq!(queue.push(1u32).await.unwrap(), 0);
        assert_eq!(queue.push(2u32).await.unwrap(), 0);
        // Full: 1 gets evicted to make room for 3
        assert_eq!(queue.push(3u32).await.unwrap(), 1);

        match queue.recv(Duration::from_millis(10)).await {
            RecvOutcome::Item(v) => assert_eq!(v, 2),
            _ => panic!("expected item"),
        }
    }

    #[tokio::test]
    async fn test_block_policy_waits_for_space() {
        let queue = Arc::new(ShardQueue::new(1, BackpressurePolicy::Block));
        queue.push(1u32).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(2u32).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished(), "producer must be parked on a full queue");

        match queue.recv(Duration::from_millis(50)).await {
            RecvOutcome::Item(v) => assert_eq!(v, 1),
            _ => panic!("expected item"),
        }
        assert!(producer.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_close_rejects_producers_but_drains_consumers() {
        let queue = ShardQueue::new(4, BackpressurePolicy::Block);
        queue.push(1u32).await.unwrap();
        queue.close();

        assert!(queue.push(2u32).await.is_err());
        match queue.recv(Duration::from_millis(10)).await {
            RecvOutcome::Item(v) => assert_eq!(v, 1),
            _ => panic!("queued item must survive close"),
        }
        match queue.recv(Duration::from_millis(10)).await {
            RecvOutcome::Closed => {}
            _ => panic!("expected closed after drain"),
        }
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_producer() {
        let queue = Arc::new(ShardQueue::new(1, BackpressurePolicy::Block));
        queue.push(1u32).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(2u32).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_millis(200), producer)
            .await
            .expect("producer must wake on close")
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_discard_remaining_counts() {
        let queue = ShardQueue::new(8, BackpressurePolicy::Block);
        for i in 0..5u32 {
            queue.push(i).await.unwrap();
        }
        assert_eq!(queue.discard_remaining(), 5);
        assert!(queue.is_empty());
    }
}
