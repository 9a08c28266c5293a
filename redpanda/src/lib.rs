//! Redpanda message queue for the Ketuk ingestion worker.
//!
//! [`RedpandaQueue`] implements [`MessageQueue`] from `ketuk-core` on top of
//! rdkafka, so it works against Redpanda or any other Kafka-compatible
//! broker. A queue name maps to a topic of the same name.
//!
//! # Settlement
//!
//! Kafka has no per-message acknowledgment, so settlement is expressed with
//! offsets. Auto-commit is disabled and every delivery is held until the
//! consumer settles it:
//!
//! | Settlement | Broker action |
//! |---|---|
//! | ack | commit `offset + 1` |
//! | reject | commit `offset + 1` (message discarded) |
//! | nack with requeue | seek back to the offset now |
//! | released / timed out | wait `redelivery_delay`, then seek back |
//!
//! The consumer does not poll the broker while a delivery is being processed,
//! so the delivery timeout is handed to librdkafka as `max.poll.interval.ms`
//! (at least the session timeout, at most 24 hours). A worker that holds a
//! delivery longer than that loses its partitions and the record is
//! redelivered to the group.
//!
//! A delivery that is seeked back comes out of the stream again with
//! [`Delivery::is_redelivered`] set. Only one delivery is in flight per
//! subscription, which keeps partition order intact.
//!
//! # Example
//!
//! ```no_run
//! use ketuk_core::queue::MessageQueue;
//! use ketuk_redpanda::RedpandaQueue;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = RedpandaQueue::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("ketuk-ingestion")
//!     .redelivery_delay(Duration::from_secs(30))
//!     .build()?;
//!
//! queue.declare("schedule").await?;
//! queue.publish("schedule", br#"{"userId":1}"#).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use ketuk_core::queue::{
    Delivery, DeliveryStream, MessageQueue, QueueError, Settlement, SettlementOutcome,
    await_settlement,
};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
const SESSION_TIMEOUT_MS: u128 = 6_000;
const MAX_POLL_INTERVAL_MS: u128 = 86_400_000;

/// Kafka-compatible [`MessageQueue`].
///
/// Holds one producer; each [`MessageQueue::consume`] call creates its own
/// consumer in the configured group.
pub struct RedpandaQueue {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    auto_offset_reset: String,
    partitions: i32,
    replication_factor: i32,
    delivery_timeout: Duration,
    redelivery_delay: Duration,
}

impl RedpandaQueue {
    /// Create a queue with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, QueueError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the queue.
    #[must_use]
    pub fn builder() -> RedpandaQueueBuilder {
        RedpandaQueueBuilder::default()
    }

    /// Bootstrap servers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// How long a consumer may hold a delivery before the group gives its
    /// partitions (and the record) to another member.
    #[must_use]
    pub const fn delivery_timeout(&self) -> Duration {
        self.delivery_timeout
    }

    /// Pause before an unsettled delivery is handed out again.
    #[must_use]
    pub const fn redelivery_delay(&self) -> Duration {
        self.redelivery_delay
    }

    /// `max.poll.interval.ms` derived from the delivery timeout.
    fn max_poll_interval_ms(&self) -> u128 {
        self.delivery_timeout
            .as_millis()
            .clamp(SESSION_TIMEOUT_MS, MAX_POLL_INTERVAL_MS)
    }

    fn consumer_config(&self, group: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", SESSION_TIMEOUT_MS.to_string())
            .set("max.poll.interval.ms", self.max_poll_interval_ms().to_string())
            .set("enable.partition.eof", "false");
        config
    }

    fn group_for(&self, queue: &str) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("ketuk-{queue}"))
    }
}

/// Builder for [`RedpandaQueue`].
#[derive(Default)]
pub struct RedpandaQueueBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    partitions: Option<i32>,
    replication_factor: Option<i32>,
    delivery_timeout: Option<Duration>,
    redelivery_delay: Option<Duration>,
}

impl RedpandaQueueBuilder {
    /// Comma-separated broker addresses, e.g. `"localhost:9092"`.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"` or `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group shared by every worker instance.
    ///
    /// If not set, the group is `ketuk-<queue>`.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a new consumer group starts reading.
    ///
    /// Default: `"earliest"`, so requests published before the first worker
    /// started are not skipped.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Partition count used by [`MessageQueue::declare`].
    ///
    /// Default: 1
    #[must_use]
    pub const fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = Some(partitions);
        self
    }

    /// Replication factor used by [`MessageQueue::declare`].
    ///
    /// Default: 1
    #[must_use]
    pub const fn replication_factor(mut self, replication_factor: i32) -> Self {
        self.replication_factor = Some(replication_factor);
        self
    }

    /// How long a consumer may hold a delivery; becomes the consumer's
    /// `max.poll.interval.ms`, clamped to 6 seconds ..= 24 hours.
    ///
    /// Default: 1 hour
    #[must_use]
    pub const fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }

    /// Pause before a released delivery is redelivered.
    ///
    /// Default: 30 seconds
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Build the [`RedpandaQueue`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::ConnectionFailed`] if brokers are not set or the
    /// producer configuration is rejected.
    pub fn build(self) -> Result<RedpandaQueue, QueueError> {
        let brokers = self
            .brokers
            .ok_or_else(|| QueueError::ConnectionFailed("Brokers not configured".to_string()))?;

        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| QueueError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let queue = RedpandaQueue {
            producer,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            auto_offset_reset: self
                .auto_offset_reset
                .unwrap_or_else(|| "earliest".to_string()),
            partitions: self.partitions.unwrap_or(1),
            replication_factor: self.replication_factor.unwrap_or(1),
            delivery_timeout: self.delivery_timeout.unwrap_or(Duration::from_secs(3600)),
            redelivery_delay: self.redelivery_delay.unwrap_or(Duration::from_secs(30)),
            brokers,
        };

        tracing::info!(
            brokers = %queue.brokers,
            acks,
            compression,
            delivery_timeout_secs = queue.delivery_timeout.as_secs(),
            redelivery_delay_secs = queue.redelivery_delay.as_secs(),
            "RedpandaQueue created successfully"
        );

        Ok(queue)
    }
}

/// Where a delivered record sits in its topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Position {
    topic: String,
    partition: i32,
    offset: i64,
}

impl Position {
    /// Offsets to commit once this record is settled for good.
    fn commit_list(&self) -> KafkaResult<TopicPartitionList> {
        let mut list = TopicPartitionList::new();
        list.add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))?;
        Ok(list)
    }

    fn commit(&self, consumer: &StreamConsumer) {
        let result = self
            .commit_list()
            .and_then(|list| consumer.commit(&list, CommitMode::Async));
        if let Err(e) = result {
            tracing::warn!(
                topic = %self.topic,
                partition = self.partition,
                offset = self.offset,
                error = %e,
                "Failed to commit offset (message may be redelivered)"
            );
        }
    }

    fn rewind(&self, consumer: &StreamConsumer) {
        if let Err(e) = consumer.seek(
            &self.topic,
            self.partition,
            Offset::Offset(self.offset),
            Timeout::After(SEEK_TIMEOUT),
        ) {
            tracing::warn!(
                topic = %self.topic,
                partition = self.partition,
                offset = self.offset,
                error = %e,
                "Failed to seek back for redelivery"
            );
        }
    }
}

impl MessageQueue for RedpandaQueue {
    fn declare(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + '_>> {
        let queue = queue.to_string();

        Box::pin(async move {
            let declare_failed = |reason: String| QueueError::DeclareFailed {
                queue: queue.clone(),
                reason,
            };

            let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .create()
                .map_err(|e| declare_failed(format!("Failed to create admin client: {e}")))?;

            let topic = NewTopic::new(
                &queue,
                self.partitions,
                TopicReplication::Fixed(self.replication_factor),
            );
            let options = AdminOptions::new().operation_timeout(Some(Timeout::After(self.timeout)));

            let results = admin
                .create_topics(&[topic], &options)
                .await
                .map_err(|e| declare_failed(e.to_string()))?;

            for result in results {
                match result {
                    Ok(name) => tracing::info!(topic = %name, "Topic created"),
                    Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                        tracing::debug!(topic = %name, "Topic already exists");
                    },
                    Err((_, code)) => return Err(declare_failed(code.to_string())),
                }
            }

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
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::<(), [u8]>::to(&queue).payload(payload.as_slice());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %queue,
                        partition,
                        offset,
                        bytes = payload.len(),
                        "Message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %queue, error = %kafka_error, "Failed to publish message");
                    Err(QueueError::PublishFailed {
                        queue,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn consume(
        &self,
        queue: &str,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, QueueError>> + Send + '_>> {
        let queue = queue.to_string();
        let group = self.group_for(&queue);
        let delivery_timeout = self.delivery_timeout;
        let redelivery_delay = self.redelivery_delay;

        Box::pin(async move {
            let consume_failed = |reason: String| QueueError::ConsumeFailed {
                queue: queue.clone(),
                reason,
            };

            let consumer: StreamConsumer = self
                .consumer_config(&group)
                .create()
                .map_err(|e| consume_failed(format!("Failed to create consumer: {e}")))?;

            consumer
                .subscribe(&[queue.as_str()])
                .map_err(|e| consume_failed(format!("Failed to subscribe: {e}")))?;

            tracing::info!(
                topic = %queue,
                consumer_group = %group,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                max_poll_interval_ms = %self.max_poll_interval_ms(),
                "Subscribed to queue"
            );

            let stream = async_stream::stream! {
                let mut next_tag: u64 = 0;
                let mut seen: HashSet<Position> = HashSet::new();

                loop {
                    let received = match consumer.recv().await {
                        Ok(message) => Ok((
                            Position {
                                topic: message.topic().to_string(),
                                partition: message.partition(),
                                offset: message.offset(),
                            },
                            message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        )),
                        Err(e) => Err(e),
                    };

                    let (position, payload) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            yield Err(QueueError::TransportError(format!(
                                "Failed to receive message: {e}"
                            )));
                            continue;
                        },
                    };

                    next_tag += 1;
                    let redelivered = !seen.insert(position.clone());
                    let (delivery, rx) = Delivery::new(payload, next_tag, redelivered);

                    tracing::trace!(
                        topic = %position.topic,
                        partition = position.partition,
                        offset = position.offset,
                        delivery_tag = next_tag,
                        redelivered,
                        "Handing out delivery"
                    );

                    yield Ok(delivery);

                    // Resumes once the caller polls again; only a caller that
                    // keeps the delivery across that poll ever waits here.
                    match await_settlement(rx, delivery_timeout).await {
                        SettlementOutcome::Settled(Settlement::Ack | Settlement::Nack { requeue: false }) => {
                            position.commit(&consumer);
                            seen.remove(&position);
                        },
                        SettlementOutcome::Settled(Settlement::Nack { requeue: true }) => {
                            position.rewind(&consumer);
                        },
                        outcome @ (SettlementOutcome::Released | SettlementOutcome::TimedOut) => {
                            tracing::debug!(
                                offset = position.offset,
                                ?outcome,
                                delay_secs = redelivery_delay.as_secs(),
                                "Delivery left unsettled, scheduling redelivery"
                            );
                            tokio::time::sleep(redelivery_delay).await;
                            position.rewind(&consumer);
                        },
                    }
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
