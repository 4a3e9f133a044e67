// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded FIFO between the translator and the dispatcher.
//!
//! Producers wait for room for at most a bounded time; an event that still finds the queue full
//! once that time is up is dropped (drop-newest). Consumers wait indefinitely for the next event.
//! The length and historical maximum length are mirrored in atomics so the stats reporter can
//! read them without taking the lock.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::event::StructuredEvent;

/// How long a producer waits for room before dropping its event.
pub const QUEUE_FULL_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_QUEUE_MAX_LENGTH: usize = 10_000;

/// Outcome of [`EventQueue::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Accepted,
    Dropped,
}

struct Shared {
    events: Mutex<VecDeque<StructuredEvent>>,
    capacity: AtomicUsize,
    len: AtomicUsize,
    max_len_seen: AtomicUsize,
    not_full: Notify,
    not_empty: Notify,
}

/// Cloneable handle to the shared queue.
#[derive(Clone)]
pub struct EventQueue {
    shared: Arc<Shared>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                events: Mutex::new(VecDeque::new()),
                capacity: AtomicUsize::new(capacity),
                len: AtomicUsize::new(0),
                max_len_seen: AtomicUsize::new(0),
                not_full: Notify::new(),
                not_empty: Notify::new(),
            }),
        }
    }

    /// Appends `event`, waiting up to `timeout` for room.
    ///
    /// Returns [`Enqueue::Dropped`] when the queue is still full at the deadline; the event is
    /// released in that case.
    pub async fn enqueue(&self, event: StructuredEvent, timeout: Duration) -> Enqueue {
        self.enqueue_until(event, timeout, std::future::pending()).await
    }

    /// Like [`EventQueue::enqueue`], but stops waiting for room as soon as `interrupt` resolves.
    /// The event then gets one last attempt and is dropped if the queue is still full.
    pub async fn enqueue_until<F>(
        &self,
        event: StructuredEvent,
        timeout: Duration,
        interrupt: F,
    ) -> Enqueue
    where
        F: Future<Output = ()>,
    {
        let deadline = Instant::now() + timeout;
        tokio::pin!(interrupt);
        let mut event = event;
        loop {
            let notified = self.shared.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_push(event) {
                Ok(()) => return Enqueue::Accepted,
                Err(rejected) => event = rejected,
            }

            let gave_up = tokio::select! {
                biased;
                () = &mut interrupt => true,
                woken = tokio::time::timeout_at(deadline, notified) => woken.is_err(),
            };
            if gave_up {
                return match self.try_push(event) {
                    Ok(()) => Enqueue::Accepted,
                    Err(_dropped) => Enqueue::Dropped,
                };
            }
        }
    }

    /// Removes the head of the queue, waiting as long as it takes for one to arrive.
    ///
    /// Cancel safe: dropping the future never loses an event.
    pub async fn dequeue(&self) -> StructuredEvent {
        loop {
            let notified = self.shared.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(event) = self.try_dequeue() {
                return event;
            }
            notified.await;
        }
    }

    /// Removes the head of the queue if there is one.
    pub fn try_dequeue(&self) -> Option<StructuredEvent> {
        let mut events = self.lock();
        let event = events.pop_front()?;
        self.shared.len.store(events.len(), Ordering::Relaxed);
        drop(events);
        self.shared.not_full.notify_one();
        Some(event)
    }

    /// Approximate number of queued events.
    pub fn len(&self) -> usize {
        self.shared.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest length the queue has ever reached.
    pub fn max_len_seen(&self) -> usize {
        self.shared.max_len_seen.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity.load(Ordering::Relaxed)
    }

    /// Changes the capacity. Queued events are kept even if they exceed a smaller capacity;
    /// producers then wait until the queue drains below it.
    pub fn set_capacity(&self, capacity: usize) {
        self.shared.capacity.store(capacity, Ordering::Relaxed);
        self.shared.not_full.notify_waiters();
    }

    fn try_push(&self, event: StructuredEvent) -> Result<(), StructuredEvent> {
        let mut events = self.lock();
        if events.len() >= self.capacity() {
            return Err(event);
        }
        events.push_back(event);
        let len = events.len();
        self.shared.len.store(len, Ordering::Relaxed);
        self.shared.max_len_seen.fetch_max(len, Ordering::Relaxed);
        drop(events);
        self.shared.not_empty.notify_one();
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<StructuredEvent>> {
        // Nothing panics while the lock is held, so a poisoned queue is still consistent.
        self.shared
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_MAX_LENGTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn event(n: usize) -> StructuredEvent {
        StructuredEvent::new(vec![("n".to_string(), n.to_string())], format!("n={n}"))
    }

    fn number(event: &StructuredEvent) -> usize {
        event
            .parameter("n")
            .and_then(|n| n.parse().ok())
            .expect("numbered event")
    }

    #[tokio::test]
    async fn test_third_enqueue_is_dropped_after_timeout() {
        let queue = EventQueue::new(2);
        let timeout = Duration::from_millis(100);

        assert_eq!(queue.enqueue(event(1), timeout).await, Enqueue::Accepted);
        assert_eq!(queue.enqueue(event(2), timeout).await, Enqueue::Accepted);

        let started = std::time::Instant::now();
        assert_eq!(queue.enqueue(event(3), timeout).await, Enqueue::Dropped);
        let waited = started.elapsed();

        assert!(waited >= timeout, "returned after {waited:?}");
        assert!(waited < timeout + Duration::from_millis(500), "blocked for {waited:?}");
        assert_eq!(queue.len(), 2);
        assert_eq!(number(&queue.dequeue().await), 1);
        assert_eq!(number(&queue.dequeue().await), 2);
        assert!(queue.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn test_interrupted_enqueue_gives_up_early() {
        let queue = EventQueue::new(1);
        queue.enqueue(event(1), QUEUE_FULL_TIMEOUT).await;

        let started = std::time::Instant::now();
        let outcome = queue
            .enqueue_until(
                event(2),
                QUEUE_FULL_TIMEOUT,
                tokio::time::sleep(Duration::from_millis(20)),
            )
            .await;

        assert_eq!(outcome, Enqueue::Dropped);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(number(&queue.dequeue().await), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_does_not_reject_when_room_exists() {
        let queue = EventQueue::new(1);
        assert_eq!(
            queue
                .enqueue_until(event(1), QUEUE_FULL_TIMEOUT, std::future::ready(()))
                .await,
            Enqueue::Accepted
        );
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_waiting_producer_is_admitted_when_room_frees_up() {
        let queue = EventQueue::new(1);
        queue.enqueue(event(1), QUEUE_FULL_TIMEOUT).await;

        let consumer = queue.clone();
        let drain = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            consumer.dequeue().await
        });

        assert_eq!(queue.enqueue(event(2), QUEUE_FULL_TIMEOUT).await, Enqueue::Accepted);
        assert_eq!(number(&drain.await.expect("consumer task")), 1);
        assert_eq!(number(&queue.dequeue().await), 2);
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_data() {
        let queue = EventQueue::new(4);
        let consumer = queue.clone();
        let pending = tokio::spawn(async move { consumer.dequeue().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        queue.enqueue(event(7), QUEUE_FULL_TIMEOUT).await;
        assert_eq!(number(&pending.await.expect("consumer task")), 7);
    }

    #[tokio::test]
    async fn test_cancelled_dequeue_loses_nothing() {
        let queue = EventQueue::new(4);
        let cancelled =
            tokio::time::timeout(Duration::from_millis(10), queue.dequeue()).await;
        assert!(cancelled.is_err());

        queue.enqueue(event(1), QUEUE_FULL_TIMEOUT).await;
        assert_eq!(number(&queue.dequeue().await), 1);
    }

    #[tokio::test]
    async fn test_max_len_seen_tracks_high_water_mark() {
        let queue = EventQueue::new(8);
        for n in 0..5 {
            queue.enqueue(event(n), QUEUE_FULL_TIMEOUT).await;
        }
        for _ in 0..5 {
            queue.dequeue().await;
        }
        queue.enqueue(event(9), QUEUE_FULL_TIMEOUT).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.max_len_seen(), 5);
    }

    #[tokio::test]
    async fn test_growing_capacity_releases_waiting_producer() {
        let queue = EventQueue::new(1);
        queue.enqueue(event(1), QUEUE_FULL_TIMEOUT).await;

        let producer = queue.clone();
        let waiting =
            tokio::spawn(async move { producer.enqueue(event(2), QUEUE_FULL_TIMEOUT).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.set_capacity(2);
        assert_eq!(waiting.await.expect("producer task"), Enqueue::Accepted);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_shrunk_capacity_keeps_queued_events() {
        let queue = EventQueue::new(3);
        for n in 0..3 {
            queue.enqueue(event(n), QUEUE_FULL_TIMEOUT).await;
        }
        queue.set_capacity(1);
        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.enqueue(event(3), Duration::from_millis(10)).await,
            Enqueue::Dropped
        );
        assert_eq!(number(&queue.dequeue().await), 0);
    }

    fn run_simulation(capacity: usize, producers: usize, per_producer: usize, consumers: usize) {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .expect("runtime");

        runtime.block_on(async move {
            let queue = EventQueue::new(capacity);
            let total = producers * per_producer;

            let mut producer_tasks = Vec::new();
            for p in 0..producers {
                let queue = queue.clone();
                producer_tasks.push(tokio::spawn(async move {
                    for i in 0..per_producer {
                        let outcome = queue
                            .enqueue(event(p * per_producer + i), QUEUE_FULL_TIMEOUT)
                            .await;
                        assert_eq!(outcome, Enqueue::Accepted);
                        assert!(queue.len() <= queue.capacity());
                        tokio::task::yield_now().await;
                    }
                }));
            }

            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            let remaining = Arc::new(AtomicUsize::new(total));
            let mut consumer_tasks = Vec::new();
            for c in 0..consumers {
                let queue = queue.clone();
                let tx = tx.clone();
                let remaining = Arc::clone(&remaining);
                consumer_tasks.push(tokio::spawn(async move {
                    let mut seen = Vec::new();
                    loop {
                        let claimed = remaining
                            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                                left.checked_sub(1)
                            })
                            .is_ok();
                        if !claimed {
                            break;
                        }
                        seen.push(number(&queue.dequeue().await));
                        assert!(queue.len() <= queue.capacity());
                    }
                    tx.send((c, seen)).expect("collector open");
                }));
            }
            drop(tx);

            for task in producer_tasks {
                task.await.expect("producer task");
            }
            for task in consumer_tasks {
                task.await.expect("consumer task");
            }

            let mut received = 0;
            while let Some((_, seen)) = rx.recv().await {
                received += seen.len();
                // Each consumer sees every producer's events in production order.
                for p in 0..producers {
                    let mine: Vec<usize> = seen
                        .iter()
                        .copied()
                        .filter(|n| n / per_producer == p)
                        .collect();
                    assert!(mine.windows(2).all(|w| w[0] < w[1]), "reordered: {mine:?}");
                }
            }
            assert_eq!(received, total);
            assert!(queue.max_len_seen() <= capacity);
            assert!(queue.is_empty());
        });
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_length_never_exceeds_capacity(
            capacity in 1usize..8,
            producers in 1usize..4,
            per_producer in 1usize..64,
            consumers in 1usize..4,
        ) {
            run_simulation(capacity, producers, per_producer, consumers);
        }

        #[test]
        fn prop_single_consumer_sees_exact_fifo(
            capacity in 1usize..8,
            items in 1usize..128,
        ) {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .expect("runtime");
            let order = runtime.block_on(async move {
                let queue = EventQueue::new(capacity);
                let producer = queue.clone();
                let produce = tokio::spawn(async move {
                    for n in 0..items {
                        producer.enqueue(event(n), QUEUE_FULL_TIMEOUT).await;
                    }
                });
                let mut order = Vec::with_capacity(items);
                for _ in 0..items {
                    order.push(number(&queue.dequeue().await));
                }
                produce.await.expect("producer task");
                order
            });
            prop_assert_eq!(order, (0..items).collect::<Vec<_>>());
        }
    }
}
