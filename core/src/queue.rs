//! Broker-neutral message queue abstraction with manual settlement.
//!
//! The ingestion worker consumes booking requests from a named queue and
//! decides, per delivery, how the broker should treat it:
//!
//! | Worker verdict | Call | Broker behaviour |
//! |---|---|---|
//! | processed | [`Delivery::ack`] | message removed |
//! | unprocessable | [`Delivery::reject`] | message discarded, never redelivered |
//! | retry now | [`Delivery::nack`] with `requeue = true` | message redelivered immediately |
//! | not ready yet | [`Delivery::release`] (or drop) | message stays in flight and is redelivered after the broker's redelivery delay |
//!
//! "Not ready yet" is how a closed intake gate is expressed: the message is
//! neither acknowledged nor rejected, and the broker's redelivery timer drives
//! the retry. That makes the gate-closed path an at-least-once replay loop.
//!
//! # Settlement plumbing
//!
//! Each [`Delivery`] owns the sending half of a oneshot channel. The broker
//! adapter keeps the receiving half and waits on it with
//! [`await_settlement`]; a dropped sender means "released unsettled".

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during queue operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to declare a queue
    #[error("Declare failed for queue '{queue}': {reason}")]
    DeclareFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to publish a message
    #[error("Publish failed for queue '{queue}': {reason}")]
    PublishFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to start consuming
    #[error("Consume failed for queue '{queue}': {reason}")]
    ConsumeFailed {
        /// The queue that failed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// The broker side of a delivery went away before it was settled
    #[error("Settlement failed for delivery {delivery_tag}: broker no longer listening")]
    SettlementFailed {
        /// Tag of the delivery that could not be settled
        delivery_tag: u64,
    },

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// How the consumer settled a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Processed; remove from the queue
    Ack,
    /// Not processed; requeue or discard
    Nack {
        /// Whether the broker should redeliver the message
        requeue: bool,
    },
}

/// What the broker adapter learned about a delivery it handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// The consumer settled explicitly
    Settled(Settlement),
    /// The consumer released the delivery without settling it
    Released,
    /// The consumer held the delivery past the delivery timeout
    TimedOut,
}

/// One message handed to a consumer.
///
/// A delivery must be settled at most once; every settlement method consumes
/// it. Dropping it unsettled is equivalent to [`Delivery::release`].
#[derive(Debug)]
pub struct Delivery {
    payload: Vec<u8>,
    delivery_tag: u64,
    redelivered: bool,
    settle: oneshot::Sender<Settlement>,
}

impl Delivery {
    /// Create a delivery and the receiver the broker adapter awaits.
    #[must_use]
    pub fn new(
        payload: Vec<u8>,
        delivery_tag: u64,
        redelivered: bool,
    ) -> (Self, oneshot::Receiver<Settlement>) {
        let (settle, rx) = oneshot::channel();
        (
            Self {
                payload,
                delivery_tag,
                redelivered,
                settle,
            },
            rx,
        )
    }

    /// Raw message body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Broker-assigned tag, unique per delivery attempt.
    #[must_use]
    pub const fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether this message was handed out before.
    #[must_use]
    pub const fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge successful processing.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SettlementFailed`] if the broker side is gone.
    pub fn ack(self) -> Result<(), QueueError> {
        self.settle_with(Settlement::Ack)
    }

    /// Negatively acknowledge, optionally asking for redelivery.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SettlementFailed`] if the broker side is gone.
    pub fn nack(self, requeue: bool) -> Result<(), QueueError> {
        self.settle_with(Settlement::Nack { requeue })
    }

    /// Permanently discard: `nack` without requeue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::SettlementFailed`] if the broker side is gone.
    pub fn reject(self) -> Result<(), QueueError> {
        self.nack(false)
    }

    /// Leave the delivery unsettled so the broker redelivers it later.
    pub fn release(self) {
        drop(self);
    }

    fn settle_with(self, settlement: Settlement) -> Result<(), QueueError> {
        let delivery_tag = self.delivery_tag;
        self.settle
            .send(settlement)
            .map_err(|_| QueueError::SettlementFailed { delivery_tag })
    }
}

/// Wait for the consumer's verdict on a delivery.
///
/// `delivery_timeout` bounds how long a consumer may hold a delivery. It
/// should be generous (hours) so slow downstream writes do not trigger a
/// spurious redelivery while the message is still being processed.
pub async fn await_settlement(
    rx: oneshot::Receiver<Settlement>,
    delivery_timeout: Duration,
) -> SettlementOutcome {
    match tokio::time::timeout(delivery_timeout, rx).await {
        Ok(Ok(settlement)) => SettlementOutcome::Settled(settlement),
        Ok(Err(_)) => SettlementOutcome::Released,
        Err(_) => SettlementOutcome::TimedOut,
    }
}

/// Stream of deliveries from a consumer subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, QueueError>> + Send>>;

/// Trait for queue broker implementations.
///
/// Consumers use manual acknowledgment: nothing is removed from the queue
/// until the consumer settles the delivery.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` so one broker handle can be
/// shared by the worker and any producers.
pub trait MessageQueue: Send + Sync {
    /// Ensure `queue` exists. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::DeclareFailed`] if the broker refuses.
    fn declare(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;

    /// Publish a raw payload to `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::PublishFailed`] if the broker does not accept it.
    fn publish(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>>;

    /// Start consuming `queue` with manual acknowledgment.
    ///
    /// The stream ends when the broker connection is lost; callers are
    /// expected to resubscribe.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConsumeFailed`] if the subscription cannot be set up.
    fn consume(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, QueueError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn ack_is_observed_by_the_broker() {
        let (delivery, rx) = Delivery::new(b"x".to_vec(), 1, false);
        delivery.ack().unwrap();
        assert_eq!(
            await_settlement(rx, HOUR).await,
            SettlementOutcome::Settled(Settlement::Ack)
        );
    }

    #[tokio::test]
    async fn reject_is_nack_without_requeue() {
        let (delivery, rx) = Delivery::new(b"x".to_vec(), 2, false);
        delivery.reject().unwrap();
        assert_eq!(
            await_settlement(rx, HOUR).await,
            SettlementOutcome::Settled(Settlement::Nack { requeue: false })
        );
    }

    #[tokio::test]
    async fn release_leaves_the_delivery_unsettled() {
        let (delivery, rx) = Delivery::new(b"x".to_vec(), 3, true);
        assert!(delivery.is_redelivered());
        delivery.release();
        assert_eq!(await_settlement(rx, HOUR).await, SettlementOutcome::Released);
    }

    #[tokio::test(start_paused = true)]
    async fn holding_past_the_timeout_is_reported() {
        let (_delivery, rx) = Delivery::new(b"x".to_vec(), 4, false);
        assert_eq!(
            await_settlement(rx, Duration::from_secs(5)).await,
            SettlementOutcome::TimedOut
        );
    }

    #[test]
    fn settling_after_broker_left_is_an_error() {
        let (delivery, rx) = Delivery::new(b"x".to_vec(), 5, false);
        drop(rx);
        assert_eq!(
            delivery.ack(),
            Err(QueueError::SettlementFailed { delivery_tag: 5 })
        );
    }
}
