//! Shared test fixtures: an in-memory scripted broker and recording handlers.

// Each test binary uses a different subset of these fixtures.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders, OwnedMessage};
use rdkafka::Timestamp;
use tokio::sync::Notify;

use servicekit::config::ConsumerConfig;
use servicekit::kafka::broker::{BrokerError, BrokerReader, BrokerStats};
use servicekit::kafka::message::MessageWithContext;
use servicekit::kafka::types::OffsetMap;
use servicekit::Handler;

pub enum Fetch {
    Message(OwnedMessage),
    Error(String),
}

/// In-memory broker: serves a scripted sequence of fetches, records every
/// commit batch, blocks fetchers once the script is exhausted.
#[derive(Default)]
pub struct ScriptedBroker {
    queue: Mutex<VecDeque<Fetch>>,
    pub commits: Mutex<Vec<OffsetMap>>,
    notify: Notify,
    /// Number of commits allowed to succeed before failing; negative means
    /// commits never fail.
    fail_commits_after: AtomicI64,
    pub fail_stats: AtomicBool,
}

impl ScriptedBroker {
    pub fn new() -> Self {
        let broker = Self::default();
        broker.fail_commits_after.store(-1, Ordering::SeqCst);
        broker
    }

    pub fn push_message(&self, message: OwnedMessage) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Fetch::Message(message));
        self.notify.notify_one();
    }

    pub fn push_error(&self, reason: &str) {
        self.queue
            .lock()
            .unwrap()
            .push_back(Fetch::Error(reason.to_string()));
        self.notify.notify_one();
    }

    pub fn fail_commits_after(&self, successes: i64) {
        self.fail_commits_after.store(successes, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.lock().unwrap().len()
    }

    pub fn last_commit(&self) -> Option<OffsetMap> {
        self.commits.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl BrokerReader for ScriptedBroker {
    async fn fetch_next(&self) -> Result<OwnedMessage, BrokerError> {
        loop {
            {
                let mut queue = self.queue.lock().unwrap();
                if let Some(fetch) = queue.pop_front() {
                    return match fetch {
                        Fetch::Message(message) => Ok(message),
                        Fetch::Error(reason) => Err(BrokerError::Other(reason)),
                    };
                }
            }
            self.notify.notified().await;
        }
    }

    async fn commit_offsets(&self, offsets: &OffsetMap) -> Result<(), BrokerError> {
        let remaining = self.fail_commits_after.load(Ordering::SeqCst);
        if remaining == 0 {
            return Err(BrokerError::Other("commit refused".to_string()));
        }
        if remaining > 0 {
            self.fail_commits_after.store(remaining - 1, Ordering::SeqCst);
        }
        self.commits.lock().unwrap().push(offsets.clone());
        Ok(())
    }

    fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    fn stats(&self) -> Result<BrokerStats, BrokerError> {
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(BrokerError::Other("stats unavailable".to_string()));
        }
        Ok(BrokerStats::default())
    }
}

pub fn message(topic: &str, partition: i32, offset: i64) -> OwnedMessage {
    OwnedMessage::new(
        Some(format!("payload-{offset}").into_bytes()),
        Some(format!("key-{offset}").into_bytes()),
        topic.to_string(),
        Timestamp::CreateTime(1_700_000_000_000 + offset),
        partition,
        offset,
        None,
    )
}

pub fn message_with_correlation(
    topic: &str,
    partition: i32,
    offset: i64,
    correlation_id: &str,
) -> OwnedMessage {
    let headers = OwnedHeaders::new().insert(Header {
        key: "x-correlation-id",
        value: Some(correlation_id.as_bytes()),
    });
    OwnedMessage::new(
        Some(format!("payload-{offset}").into_bytes()),
        Some(format!("key-{offset}").into_bytes()),
        topic.to_string(),
        Timestamp::CreateTime(1_700_000_000_000 + offset),
        partition,
        offset,
        Some(headers),
    )
}

pub fn test_config(topics: &str, batch_size: u64, interval_ms: u64, enabled: bool) -> ConsumerConfig {
    ConsumerConfig {
        kafka_hosts: "localhost:9092".to_string(),
        kafka_consumer_group: "cg-test".to_string(),
        kafka_consumer_topics: topics.to_string(),
        kafka_consumer_offset_reset: "earliest".to_string(),
        kafka_tls: false,
        message_channel_size: 16,
        kafka_consumer_auto_commit: enabled,
        kafka_consumer_auto_commit_interval_ms: interval_ms,
        kafka_consumer_auto_commit_batch_size: batch_size,
        shutdown_timeout_secs: 5,
        service_name: "servicekit-test".to_string(),
    }
}

/// Handler that records `(topic, partition, offset, correlation_id)` for
/// every message it sees.
#[derive(Default)]
pub struct RecordingHandler {
    pub seen: Mutex<Vec<(String, i32, i64, String)>>,
}

impl RecordingHandler {
    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn offsets(&self) -> Vec<i64> {
        self.seen.lock().unwrap().iter().map(|m| m.2).collect()
    }
}

#[async_trait]
impl Handler for RecordingHandler {
    async fn handle(&self, message: &MessageWithContext) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push((
            message.topic().to_string(),
            message.partition().partition_number(),
            message.offset(),
            message.correlation.correlation_id.clone(),
        ));
        Ok(())
    }
}

/// Handler that panics on every message.
pub struct PanickingHandler;

#[async_trait]
impl Handler for PanickingHandler {
    async fn handle(&self, message: &MessageWithContext) -> anyhow::Result<()> {
        panic!("boom at offset {}", message.offset());
    }
}

/// Handler that fails on every message.
pub struct FailingHandler;

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, message: &MessageWithContext) -> anyhow::Result<()> {
        anyhow::bail!("rejected offset {}", message.offset())
    }
}

/// Poll `check` until it returns true or the timeout elapses.
pub async fn wait_until<F>(check: F, timeout: Duration)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !check() {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
