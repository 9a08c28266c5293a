//! In-memory manual-ack message queue.
//!
//! Behaves like a single-node broker with per-consumer prefetch of one:
//!
//! - `ack` removes the message
//! - `nack(requeue = false)` discards it
//! - `nack(requeue = true)` puts it back at the head of the queue
//! - releasing (or holding past the delivery timeout) puts it back at the
//!   tail after the redelivery delay, flagged as redelivered
//!
//! [`InMemoryQueue::disconnect`] ends every open consumer stream, which lets
//! tests exercise resubscription.

use async_stream::stream;
use ketuk_core::queue::{
    Delivery, DeliveryStream, MessageQueue, QueueError, Settlement, SettlementOutcome,
    await_settlement,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug)]
struct Pending {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Pending>,
    acked: Vec<Vec<u8>>,
    rejected: Vec<Vec<u8>>,
    released: usize,
    deliveries: usize,
    in_flight: usize,
    notify: Arc<Notify>,
}

#[derive(Debug)]
struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    next_tag: AtomicU64,
    generation: AtomicU64,
    consume_failures: AtomicUsize,
    subscriptions: AtomicUsize,
    delivery_timeout: Duration,
    redelivery_delay: Duration,
}

impl Inner {
    fn pop(&self, queue: &str) -> Option<(Pending, u64)> {
        let mut queues = self.queues.lock().unwrap();
        let state = queues.get_mut(queue)?;
        let pending = state.ready.pop_front()?;
        state.deliveries += 1;
        state.in_flight += 1;
        Some((pending, self.next_tag.fetch_add(1, Ordering::SeqCst)))
    }

    fn notifier(&self, queue: &str) -> Option<Arc<Notify>> {
        self.queues
            .lock()
            .unwrap()
            .get(queue)
            .map(|s| Arc::clone(&s.notify))
    }

    fn settle(&self, queue: &str, payload: Vec<u8>, outcome: SettlementOutcome) -> bool {
        let mut queues = self.queues.lock().unwrap();
        let Some(state) = queues.get_mut(queue) else {
            return false;
        };
        state.in_flight = state.in_flight.saturating_sub(1);

        match outcome {
            SettlementOutcome::Settled(Settlement::Ack) => {
                state.acked.push(payload);
                false
            },
            SettlementOutcome::Settled(Settlement::Nack { requeue: false }) => {
                state.rejected.push(payload);
                false
            },
            SettlementOutcome::Settled(Settlement::Nack { requeue: true }) => {
                state.ready.push_front(Pending {
                    payload,
                    redelivered: true,
                });
                state.notify.notify_one();
                false
            },
            SettlementOutcome::Released | SettlementOutcome::TimedOut => {
                state.released += 1;
                true
            },
        }
    }

    fn redeliver(&self, queue: &str, payload: Vec<u8>) {
        let mut queues = self.queues.lock().unwrap();
        if let Some(state) = queues.get_mut(queue) {
            state.ready.push_back(Pending {
                payload,
                redelivered: true,
            });
            state.notify.notify_one();
        }
    }
}

/// In-memory broker for worker tests.
///
/// Clones share the same broker.
#[derive(Clone, Debug)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
}

impl InMemoryQueue {
    /// Create a broker with a one-hour delivery timeout and a one-second
    /// redelivery delay.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timings(Duration::from_secs(3600), Duration::from_secs(1))
    }

    /// Create a broker with explicit delivery timeout and redelivery delay.
    #[must_use]
    pub fn with_timings(delivery_timeout: Duration, redelivery_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                queues: Mutex::new(HashMap::new()),
                next_tag: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                consume_failures: AtomicUsize::new(0),
                subscriptions: AtomicUsize::new(0),
                delivery_timeout,
                redelivery_delay,
            }),
        }
    }

    /// End every open consumer stream, as a dropped broker connection would.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        for state in self.inner.queues.lock().unwrap().values() {
            state.notify.notify_one();
        }
    }

    /// Make the next `n` calls to `consume` fail.
    pub fn fail_consumes(&self, n: usize) {
        self.inner.consume_failures.store(n, Ordering::SeqCst);
    }

    /// Number of successful `consume` calls.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.load(Ordering::SeqCst)
    }

    /// Payloads acknowledged on `queue`.
    #[must_use]
    pub fn acked(&self, queue: &str) -> Vec<Vec<u8>> {
        self.read(queue, |s| s.acked.clone())
    }

    /// Payloads rejected on `queue`.
    #[must_use]
    pub fn rejected(&self, queue: &str) -> Vec<Vec<u8>> {
        self.read(queue, |s| s.rejected.clone())
    }

    /// Deliveries on `queue` that came back unsettled.
    #[must_use]
    pub fn released_count(&self, queue: &str) -> usize {
        self.read(queue, |s| s.released)
    }

    /// Total deliveries handed out on `queue`, redeliveries included.
    #[must_use]
    pub fn delivery_count(&self, queue: &str) -> usize {
        self.read(queue, |s| s.deliveries)
    }

    /// Messages waiting on `queue`, not yet handed out.
    #[must_use]
    pub fn pending(&self, queue: &str) -> usize {
        self.read(queue, |s| s.ready.len())
    }

    /// Deliveries on `queue` awaiting a verdict.
    #[must_use]
    pub fn in_flight(&self, queue: &str) -> usize {
        self.read(queue, |s| s.in_flight)
    }

    fn read<T: Default>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> T {
        self.inner
            .queues
            .lock()
            .unwrap()
            .get(queue)
            .map(f)
            .unwrap_or_default()
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageQueue for InMemoryQueue {
    fn declare(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        Box::pin(async move {
            self.inner
                .queues
                .lock()
                .unwrap()
                .entry(queue)
                .or_default();
            Ok(())
        })
    }

    fn publish(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        let payload = payload.to_vec();
        Box::pin(async move {
            let mut queues = self.inner.queues.lock().unwrap();
            let state = queues.get_mut(&queue).ok_or_else(|| QueueError::PublishFailed {
                queue: queue.clone(),
                reason: "queue not declared".to_string(),
            })?;
            state.ready.push_back(Pending {
                payload,
                redelivered: false,
            });
            state.notify.notify_one();
            Ok(())
        })
    }

    fn consume(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        Box::pin(async move {
            let failures = self.inner.consume_failures.load(Ordering::SeqCst);
            if failures > 0 {
                self.inner
                    .consume_failures
                    .store(failures - 1, Ordering::SeqCst);
                return Err(QueueError::ConsumeFailed {
                    queue,
                    reason: "injected failure".to_string(),
                });
            }

            let notify = self
                .inner
                .notifier(&queue)
                .ok_or_else(|| QueueError::ConsumeFailed {
                    queue: queue.clone(),
                    reason: "queue not declared".to_string(),
                })?;
            self.inner.subscriptions.fetch_add(1, Ordering::SeqCst);

            let inner = Arc::clone(&self.inner);
            let generation = inner.generation.load(Ordering::SeqCst);

            let deliveries = stream! {
                loop {
                    if inner.generation.load(Ordering::SeqCst) != generation {
                        break;
                    }

                    let Some((pending, tag)) = inner.pop(&queue) else {
                        notify.notified().await;
                        continue;
                    };

                    let (delivery, rx) = Delivery::new(pending.payload.clone(), tag, pending.redelivered);
                    let broker = Arc::clone(&inner);
                    let name = queue.clone();
                    tokio::spawn(async move {
                        let outcome = await_settlement(rx, broker.delivery_timeout).await;
                        if broker.settle(&name, pending.payload.clone(), outcome) {
                            tokio::time::sleep(broker.redelivery_delay).await;
                            broker.redeliver(&name, pending.payload);
                        }
                    });

                    yield Ok(delivery);
                }
            };

            Ok(Box::pin(deliveries) as DeliveryStream)
        })
    }
}
