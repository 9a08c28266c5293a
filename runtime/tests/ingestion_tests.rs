//! Ingestion worker behaviour against in-memory collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use futures::StreamExt;
use ketuk_core::gate::GateState;
use ketuk_core::ids::UserId;
use ketuk_core::queue::{Delivery, DeliveryStream, MessageQueue, QueueError};
use ketuk_core::record::{Category, StoreError, TicketStatus};
use ketuk_runtime::{Disposition, IngestionWorker, RejectReason, RetryPolicy};
use ketuk_testing::{InMemoryQueue, InMemoryRecordStore, RecordingNotifier};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

const QUEUE: &str = "schedule";

const LAB_A: &str = r#"{
    "userId": 1,
    "title": "Lab A",
    "description": "Weekly practicum",
    "category": "class",
    "startDate": "2024-08-01T08:00:00+07:00",
    "endDate": "2024-08-01T10:00:00+07:00",
    "status": "pending"
}"#;

// ============================================================================
// Test Fixtures
// ============================================================================

struct Harness {
    queue: InMemoryQueue,
    records: InMemoryRecordStore,
    notifier: RecordingNotifier,
    gate: GateState,
}

impl Harness {
    async fn new() -> Self {
        let queue = InMemoryQueue::new();
        queue.declare(QUEUE).await.unwrap();
        Self {
            queue,
            records: InMemoryRecordStore::new().with_user(UserId::new(1), "owner@example.com"),
            notifier: RecordingNotifier::new(),
            gate: GateState::new(),
        }
    }

    fn worker(&self) -> IngestionWorker {
        IngestionWorker::new(
            QUEUE,
            Arc::new(self.queue.clone()),
            Arc::new(self.records.clone()),
            Arc::new(self.notifier.clone()),
            self.gate.clone(),
        )
        .with_retry_policy(
            RetryPolicy::builder()
                .initial_delay(Duration::from_millis(10))
                .max_delay(Duration::from_millis(100))
                .build(),
        )
    }

    /// Publish `body` and hand back its delivery.
    async fn deliver(&self, body: &[u8]) -> Delivery {
        self.queue.publish(QUEUE, body).await.unwrap();
        self.next_delivery().await
    }

    async fn next_delivery(&self) -> Delivery {
        let mut stream = self.queue.consume(QUEUE).await.unwrap();
        stream.next().await.unwrap().unwrap()
    }

    /// Let the broker observe every settlement.
    async fn settled(&self) {
        wait_until(|| self.queue.in_flight(QUEUE) == 0).await;
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// ============================================================================
// Gate Open
// ============================================================================

#[tokio::test]
async fn lab_a_request_creates_schedule_and_ticket_and_is_acked() {
    let h = Harness::new().await;
    h.gate.open();

    let delivery = h.deliver(LAB_A.as_bytes()).await;
    let disposition = h.worker().process_delivery(delivery).await;
    h.settled().await;

    assert_eq!(disposition, Disposition::Acked);

    let schedules = h.records.schedules();
    let tickets = h.records.tickets();
    assert_eq!(schedules.len(), 1);
    assert_eq!(tickets.len(), 1);
    assert_eq!(schedules[0].title, "Lab A");
    assert_eq!(schedules[0].category, Category::Class);
    assert_eq!(tickets[0].status, TicketStatus::Pending);
    assert_eq!(tickets[0].schedule_id, Some(schedules[0].id));

    assert_eq!(h.queue.acked(QUEUE).len(), 1);
    assert!(h.queue.rejected(QUEUE).is_empty());

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "owner@example.com");
    assert_eq!(sent[0].subject, "New Ticket Created: Lab A");
    assert!(sent[0].body.contains("Status: pending"));
}

#[tokio::test]
async fn notification_failure_still_acks() {
    let h = Harness::new().await;
    h.gate.open();
    h.notifier.set_failure(Some(ketuk_core::notify::NotifyError::Transport(
        "relay down".to_string(),
    )));

    let delivery = h.deliver(LAB_A.as_bytes()).await;
    let disposition = h.worker().process_delivery(delivery).await;
    h.settled().await;

    assert_eq!(disposition, Disposition::Acked);
    assert_eq!(h.notifier.sent().len(), 1, "send should have been attempted");
    assert_eq!(h.queue.acked(QUEUE).len(), 1);
    assert_eq!(h.records.tickets().len(), 1);
}

#[tokio::test]
async fn unknown_owner_skips_the_notification() {
    let h = Harness::new().await;
    h.gate.open();
    let body = LAB_A.replace("\"userId\": 1", "\"userId\": 42");

    let delivery = h.deliver(body.as_bytes()).await;
    let disposition = h.worker().process_delivery(delivery).await;

    assert_eq!(disposition, Disposition::Acked);
    assert!(h.notifier.sent().is_empty());
}

#[tokio::test]
async fn owner_lookup_failure_skips_the_notification() {
    let h = Harness::new().await;
    h.gate.open();
    h.records
        .fail_user_lookups(Some(StoreError::Timeout(Duration::from_secs(10))));

    let delivery = h.deliver(LAB_A.as_bytes()).await;
    let disposition = h.worker().process_delivery(delivery).await;

    assert_eq!(disposition, Disposition::Acked);
    assert!(h.notifier.sent().is_empty());
}

// ============================================================================
// Gate Closed
// ============================================================================

#[tokio::test(start_paused = true)]
async fn closed_gate_defers_and_the_request_comes_back() {
    let h = Harness::new().await;
    let worker = h.worker();

    let delivery = h.deliver(LAB_A.as_bytes()).await;
    assert_eq!(worker.process_delivery(delivery).await, Disposition::Deferred);
    h.settled().await;

    assert!(h.records.schedules().is_empty());
    assert!(h.records.tickets().is_empty());
    assert!(h.queue.acked(QUEUE).is_empty());
    assert!(h.queue.rejected(QUEUE).is_empty());
    assert_eq!(h.queue.released_count(QUEUE), 1);

    h.gate.open();
    let again = h.next_delivery().await;
    assert!(again.is_redelivered());
    assert_eq!(worker.process_delivery(again).await, Disposition::Acked);
    h.settled().await;

    assert_eq!(h.queue.acked(QUEUE).len(), 1);
    assert_eq!(h.records.tickets().len(), 1);
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test(start_paused = true)]
async fn malformed_request_is_rejected_and_never_redelivered() {
    let h = Harness::new().await;
    h.gate.open();

    let delivery = h.deliver(br#"{"userId":1,"title":@}"#).await;
    let disposition = h.worker().process_delivery(delivery).await;
    h.settled().await;

    assert_eq!(
        disposition,
        Disposition::Rejected {
            reason: RejectReason::Malformed
        }
    );
    assert_eq!(h.queue.rejected(QUEUE).len(), 1);
    assert!(h.records.schedules().is_empty());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(h.queue.pending(QUEUE), 0);
    assert_eq!(h.queue.delivery_count(QUEUE), 1);
}

#[tokio::test]
async fn invalid_request_is_rejected_even_with_the_gate_closed() {
    let h = Harness::new().await;
    let body = LAB_A.replace("\"Lab A\"", "\"   \"");

    let delivery = h.deliver(body.as_bytes()).await;
    let disposition = h.worker().process_delivery(delivery).await;
    h.settled().await;

    assert_eq!(
        disposition,
        Disposition::Rejected {
            reason: RejectReason::Malformed
        }
    );
    assert_eq!(h.queue.rejected(QUEUE).len(), 1);
}

#[tokio::test]
async fn schedule_failure_rejects_without_records() {
    let h = Harness::new().await;
    h.gate.open();
    h.records
        .fail_schedules(Some(StoreError::Database("relation does not exist".to_string())));

    let delivery = h.deliver(LAB_A.as_bytes()).await;
    let disposition = h.worker().process_delivery(delivery).await;
    h.settled().await;

    assert_eq!(
        disposition,
        Disposition::Rejected {
            reason: RejectReason::ScheduleFailed
        }
    );
    assert!(h.records.schedules().is_empty());
    assert!(h.records.tickets().is_empty());
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.queue.rejected(QUEUE).len(), 1);
}

#[tokio::test]
async fn ticket_failure_leaves_one_orphaned_schedule() {
    let h = Harness::new().await;
    h.gate.open();
    h.records
        .fail_tickets(Some(StoreError::Constraint("tickets_status_check".to_string())));

    let delivery = h.deliver(LAB_A.as_bytes()).await;
    let disposition = h.worker().process_delivery(delivery).await;
    h.settled().await;

    assert_eq!(
        disposition,
        Disposition::Rejected {
            reason: RejectReason::TicketFailed
        }
    );
    assert_eq!(h.records.orphan_schedules().len(), 1);
    assert!(h.records.tickets().is_empty());
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.queue.rejected(QUEUE).len(), 1);
    assert!(h.queue.acked(QUEUE).is_empty());
}

// ============================================================================
// Consume Loop
// ============================================================================

#[tokio::test]
async fn worker_processes_in_order_and_resubscribes_after_disconnect() {
    let h = Harness::new().await;
    h.gate.open();

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = h.worker().spawn(shutdown_tx.subscribe());

    h.queue.publish(QUEUE, LAB_A.as_bytes()).await.unwrap();
    h.queue
        .publish(QUEUE, LAB_A.replace("Lab A", "Lab B").as_bytes())
        .await
        .unwrap();
    wait_until(|| h.queue.acked(QUEUE).len() == 2).await;

    let titles: Vec<String> = h.records.schedules().into_iter().map(|s| s.title).collect();
    assert_eq!(titles, vec!["Lab A".to_string(), "Lab B".to_string()]);

    h.queue.disconnect();
    wait_until(|| h.queue.subscription_count() == 2).await;

    h.queue
        .publish(QUEUE, LAB_A.replace("Lab A", "Lab C").as_bytes())
        .await
        .unwrap();
    wait_until(|| h.queue.acked(QUEUE).len() == 3).await;

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_subscriptions_are_retried() {
    let h = Harness::new().await;
    h.gate.open();
    h.queue.fail_consumes(3);
    h.queue.publish(QUEUE, LAB_A.as_bytes()).await.unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = h.worker().spawn(shutdown_tx.subscribe());

    wait_until(|| h.queue.acked(QUEUE).len() == 1).await;
    assert_eq!(h.queue.subscription_count(), 1);

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();
}

/// Queue whose subscriptions only ever yield receive errors.
#[derive(Clone, Default)]
struct BrokenReceiveQueue {
    receives: Arc<AtomicUsize>,
}

impl MessageQueue for BrokenReceiveQueue {
    fn declare(
        &self,
        _queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn publish(
        &self,
        _queue: &str,
        _payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn consume(
        &self,
        _queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, QueueError>> + Send + '_>> {
        let receives = Arc::clone(&self.receives);
        Box::pin(async move {
            let stream = futures::stream::repeat_with(move || {
                receives.fetch_add(1, Ordering::SeqCst);
                Err(QueueError::TransportError("broker unreachable".to_string()))
            });
            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[tokio::test(start_paused = true)]
async fn receive_errors_back_off_instead_of_spinning() {
    let h = Harness::new().await;
    let queue = BrokenReceiveQueue::default();
    let worker = IngestionWorker::new(
        QUEUE,
        Arc::new(queue.clone()),
        Arc::new(h.records.clone()),
        Arc::new(h.notifier.clone()),
        h.gate.clone(),
    )
    .with_retry_policy(
        RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .max_delay(Duration::from_secs(1))
            .build(),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = worker.spawn(shutdown_tx.subscribe());

    // 100 + 200 + 400 + 800 ms of backoff fit before the 2 s mark.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let receives = queue.receives.load(Ordering::SeqCst);
    assert!((4..=6).contains(&receives), "{receives} receives in 2s");

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker did not stop during backoff")
        .unwrap();
}

#[tokio::test]
async fn shutdown_stops_an_idle_worker() {
    let h = Harness::new().await;
    let (shutdown_tx, _) = broadcast::channel(1);
    let handle = h.worker().spawn(shutdown_tx.subscribe());

    wait_until(|| h.queue.subscription_count() == 1).await;
    shutdown_tx.send(()).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
}
