//! Booking request ingestion worker.
//!
//! The worker consumes one delivery at a time from the booking queue and
//! settles each one according to what happened to it:
//!
//! ```text
//! delivery ──► decode ──✗──► reject (malformed)
//!                │
//!                ▼
//!           gate open? ──no──► release unsettled (deferred, redelivered later)
//!                │ yes
//!                ▼
//!        create schedule ──✗──► reject
//!                │
//!                ▼
//!         create ticket ──✗──► reject (schedule left orphaned)
//!                │
//!                ▼
//!         e-mail owner (failure logged only)
//!                │
//!                ▼
//!               ack
//! ```
//!
//! # Subscribe-Process-Reconnect Loop
//!
//! [`IngestionWorker::run`] declares the queue, consumes it, and when the
//! subscription fails or the stream ends, waits with exponential backoff
//! and subscribes again. Errors never escape the loop; only the shutdown
//! signal ends it. A shutdown that arrives mid-message waits for that
//! message to be settled.

use crate::metrics::IngestionMetrics;
use crate::notification::TicketNotice;
use crate::retry::RetryPolicy;
use chrono_tz::Tz;
use futures::StreamExt;
use ketuk_core::gate::GateState;
use ketuk_core::message::{self, BookingRequestMessage, MessageError};
use ketuk_core::notify::Notifier;
use ketuk_core::queue::{Delivery, DeliveryStream, MessageQueue, QueueError};
use ketuk_core::record::{RecordStore, ScheduleRecord, TicketRecord};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Why a delivery was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The payload could not be decoded or failed validation
    Malformed,
    /// The schedule row could not be written
    ScheduleFailed,
    /// The ticket row could not be written after its schedule was
    TicketFailed,
}

impl RejectReason {
    /// Short label used for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::ScheduleFailed => "schedule_failed",
            Self::TicketFailed => "ticket_failed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The worker's verdict on one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Schedule and ticket written; delivery acknowledged
    Acked,
    /// Delivery discarded without requeue
    Rejected {
        /// What went wrong
        reason: RejectReason,
    },
    /// Gate closed; delivery released unsettled for later redelivery
    Deferred,
}

enum StreamEnd {
    Shutdown,
    Closed,
}

/// Long-running consumer that turns booking requests into records.
pub struct IngestionWorker {
    queue_name: String,
    queue: Arc<dyn MessageQueue>,
    records: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    gate: GateState,
    timezone: Tz,
    retry_policy: RetryPolicy,
}

impl IngestionWorker {
    /// Create a worker for `queue_name`.
    ///
    /// Notification times are rendered in `Asia/Jakarta` and resubscription
    /// uses [`RetryPolicy::default`] unless overridden.
    #[must_use]
    pub fn new(
        queue_name: impl Into<String>,
        queue: Arc<dyn MessageQueue>,
        records: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        gate: GateState,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            queue,
            records,
            notifier,
            gate,
            timezone: chrono_tz::Asia::Jakarta,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Render notification times in `timezone`.
    #[must_use]
    pub const fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Backoff used between resubscription attempts and after receive
    /// errors.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Handle one delivery and settle it.
    pub async fn process_delivery(&self, delivery: Delivery) -> Disposition {
        IngestionMetrics::record_received();
        let started = Instant::now();

        let request = match message::decode(delivery.payload()) {
            Ok(request) => request,
            Err(e) => {
                self.log_malformed(&delivery, &e);
                settle_reject(delivery);
                IngestionMetrics::record_rejected(RejectReason::Malformed.as_str());
                return Disposition::Rejected {
                    reason: RejectReason::Malformed,
                };
            },
        };

        let span = info_span!(
            "booking_request",
            delivery_tag = delivery.delivery_tag(),
            redelivered = delivery.is_redelivered(),
            user_id = %request.user_id,
            idempotency_key = %request.idempotency_key(),
        );

        let disposition = self.handle(delivery, request).instrument(span).await;
        if disposition == Disposition::Acked {
            IngestionMetrics::record_acked(started.elapsed());
        }
        disposition
    }

    async fn handle(&self, delivery: Delivery, request: BookingRequestMessage) -> Disposition {
        if !self.gate.is_open() {
            debug!("Ticket intake closed, leaving request for redelivery");
            delivery.release();
            IngestionMetrics::record_deferred();
            return Disposition::Deferred;
        }

        let schedule = match self.records.create_schedule(request.to_new_schedule()).await {
            Ok(schedule) => schedule,
            Err(e) => {
                error!(error = %e, title = %request.title, "Failed to create schedule");
                settle_reject(delivery);
                IngestionMetrics::record_rejected(RejectReason::ScheduleFailed.as_str());
                return Disposition::Rejected {
                    reason: RejectReason::ScheduleFailed,
                };
            },
        };

        let ticket = match self.records.create_ticket(request.to_new_ticket(schedule.id)).await {
            Ok(ticket) => ticket,
            Err(e) => {
                error!(
                    error = %e,
                    orphaned_schedule_id = %schedule.id,
                    "Failed to create ticket, schedule left without a ticket"
                );
                settle_reject(delivery);
                IngestionMetrics::record_orphan();
                IngestionMetrics::record_rejected(RejectReason::TicketFailed.as_str());
                return Disposition::Rejected {
                    reason: RejectReason::TicketFailed,
                };
            },
        };

        info!(
            schedule_id = %schedule.id,
            ticket_id = %ticket.id,
            status = %ticket.status,
            "Booking request stored"
        );

        self.notify_owner(&ticket, &schedule).await;

        if let Err(e) = delivery.ack() {
            warn!(error = %e, "Failed to acknowledge stored booking request");
        }
        Disposition::Acked
    }

    async fn notify_owner(&self, ticket: &TicketRecord, schedule: &ScheduleRecord) {
        let email = match self.records.find_user_email(ticket.user_id).await {
            Ok(Some(email)) => email,
            Ok(None) => {
                warn!(user_id = %ticket.user_id, "Ticket owner not found, skipping notification");
                return;
            },
            Err(e) => {
                warn!(error = %e, user_id = %ticket.user_id, "Owner lookup failed, skipping notification");
                IngestionMetrics::record_notification_failure();
                return;
            },
        };

        let notice = TicketNotice::compose(ticket, schedule, self.timezone);
        match self.notifier.send_email(&email, &notice.subject, &notice.body).await {
            Ok(()) => debug!(to = %email, "Ticket notification sent"),
            Err(e) => {
                warn!(error = %e, to = %email, "Failed to send ticket notification");
                IngestionMetrics::record_notification_failure();
            },
        }
    }

    fn log_malformed(&self, delivery: &Delivery, e: &MessageError) {
        let payload = delivery.payload();
        match e {
            MessageError::Decode { offset, found, .. } => error!(
                queue = %self.queue_name,
                delivery_tag = delivery.delivery_tag(),
                error = %e,
                offset,
                found = ?found,
                payload_hex = %hex::encode(payload),
                payload = %String::from_utf8_lossy(payload),
                "Discarding malformed booking request"
            ),
            _ => error!(
                queue = %self.queue_name,
                delivery_tag = delivery.delivery_tag(),
                error = %e,
                payload_hex = %hex::encode(payload),
                payload = %String::from_utf8_lossy(payload),
                "Discarding invalid booking request"
            ),
        }
    }

    /// Spawn the consume loop as a background task.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(shutdown).await;
        })
    }

    /// Consume until a shutdown signal arrives, resubscribing as needed.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(queue = %self.queue_name, "Ingestion worker started");
        let mut attempt: u32 = 0;

        loop {
            let subscribed = tokio::select! {
                _ = shutdown.recv() => {
                    info!(queue = %self.queue_name, "Ingestion worker received shutdown signal");
                    break;
                }
                result = self.subscribe() => result,
            };

            match subscribed {
                Ok(mut stream) => {
                    info!(queue = %self.queue_name, "Consuming booking requests");
                    match self.drain(&mut stream, &mut shutdown, &mut attempt).await {
                        StreamEnd::Shutdown => break,
                        StreamEnd::Closed => {
                            warn!(queue = %self.queue_name, "Delivery stream ended");
                        },
                    }
                },
                Err(e) => {
                    error!(queue = %self.queue_name, error = %e, "Failed to subscribe to queue");
                },
            }

            let delay = self.retry_policy.delay_for_attempt(attempt);
            attempt = attempt.saturating_add(1);
            IngestionMetrics::record_reconnect();
            warn!(queue = %self.queue_name, attempt, "Resubscribing in {:?}", delay);

            tokio::select! {
                _ = shutdown.recv() => {
                    info!(queue = %self.queue_name, "Ingestion worker received shutdown signal");
                    break;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!(queue = %self.queue_name, "Ingestion worker stopped");
    }

    async fn subscribe(&self) -> Result<DeliveryStream, QueueError> {
        self.queue.declare(&self.queue_name).await?;
        self.queue.consume(&self.queue_name).await
    }

    async fn drain(
        &self,
        stream: &mut DeliveryStream,
        shutdown: &mut broadcast::Receiver<()>,
        attempt: &mut u32,
    ) -> StreamEnd {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(queue = %self.queue_name, "Ingestion worker received shutdown signal during processing");
                    return StreamEnd::Shutdown;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        *attempt = 0;
                        let disposition = self.process_delivery(delivery).await;
                        debug!(queue = %self.queue_name, ?disposition, "Delivery settled");
                    },
                    Some(Err(e)) => {
                        let delay = self.retry_policy.delay_for_attempt(*attempt);
                        *attempt = attempt.saturating_add(1);
                        error!(
                            queue = %self.queue_name,
                            error = %e,
                            retry_in = ?delay,
                            "Error receiving delivery"
                        );
                        tokio::select! {
                            _ = shutdown.recv() => {
                                info!(queue = %self.queue_name, "Ingestion worker received shutdown signal during backoff");
                                return StreamEnd::Shutdown;
                            }
                            () = tokio::time::sleep(delay) => {}
                        }
                    },
                    None => return StreamEnd::Closed,
                },
            }
        }
    }
}

fn settle_reject(delivery: Delivery) {
    let delivery_tag = delivery.delivery_tag();
    if let Err(e) = delivery.reject() {
        warn!(delivery_tag, error = %e, "Failed to reject delivery");
    }
}
