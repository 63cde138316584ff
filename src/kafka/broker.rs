//! Broker reader boundary.
//!
//! The engine talks to the broker through [`BrokerReader`] so the poll loop
//! and commit path can be exercised against an in-memory implementation in
//! tests. [`KafkaBrokerReader`] is the production implementation backed by an
//! rdkafka `StreamConsumer`; consumer-group membership and rebalancing are
//! handled by the broker client.

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::OwnedMessage;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::debug;

use crate::config::ConsumerConfig;
use crate::kafka::types::{OffsetMap, Partition};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),
    #[error("{0}")]
    Other(String),
}

/// Point-in-time view of the reader, used as a liveness probe.
#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    /// Partitions currently assigned to this group member.
    pub assignment: Vec<Partition>,
}

#[async_trait]
pub trait BrokerReader: Send + Sync {
    /// Fetch the next message, blocking until one is available or the call fails.
    async fn fetch_next(&self) -> Result<OwnedMessage, BrokerError>;

    /// Commit the given offsets as a single batch.
    ///
    /// Offsets are the last-consumed positions; the implementation is
    /// responsible for translating to the broker's commit convention.
    async fn commit_offsets(&self, offsets: &OffsetMap) -> Result<(), BrokerError>;

    /// Release the reader's resources. Fetches in flight may still complete.
    fn close(&self) -> Result<(), BrokerError>;

    /// Reader statistics for health reporting.
    fn stats(&self) -> Result<BrokerStats, BrokerError>;
}

/// rdkafka-backed [`BrokerReader`].
///
/// Auto-commit and auto-offset-store are disabled on the client; the engine
/// owns all commit decisions.
pub struct KafkaBrokerReader {
    consumer: StreamConsumer,
}

impl KafkaBrokerReader {
    pub fn new(config: &ConsumerConfig) -> Result<Self, BrokerError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.kafka_hosts)
            .set("group.id", &config.kafka_consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &config.kafka_consumer_offset_reset);

        if config.kafka_tls {
            client_config
                .set("security.protocol", "ssl")
                .set("enable.ssl.certificate.verification", "false");
        }

        let consumer: StreamConsumer = client_config.create()?;
        let topics = config.topics();
        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs)?;

        Ok(Self { consumer })
    }
}

#[async_trait]
impl BrokerReader for KafkaBrokerReader {
    async fn fetch_next(&self) -> Result<OwnedMessage, BrokerError> {
        Ok(self.consumer.recv().await?.detach())
    }

    async fn commit_offsets(&self, offsets: &OffsetMap) -> Result<(), BrokerError> {
        let mut list = TopicPartitionList::with_capacity(offsets.len());
        for (partition, offset) in offsets {
            // Committed offset is the next offset to consume.
            list.add_partition_offset(
                partition.topic(),
                partition.partition_number(),
                Offset::Offset(offset + 1),
            )?;
        }
        self.consumer.commit(&list, CommitMode::Sync)?;
        debug!(partitions = offsets.len(), "offsets committed to broker");
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        self.consumer.unsubscribe();
        Ok(())
    }

    fn stats(&self) -> Result<BrokerStats, BrokerError> {
        let assignment = self.consumer.assignment()?;
        let assignment = assignment
            .elements()
            .into_iter()
            .map(|elem| Partition::new(elem.topic().to_string(), elem.partition()))
            .collect();
        Ok(BrokerStats { assignment })
    }
}
