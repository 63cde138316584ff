//! Application-level Kafka consumer: per-topic handler dispatch and
//! lifecycle orchestration around the poll loop.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Instrument};

use crate::config::ConsumerConfig;
use crate::correlation::EventCorrelation;
use crate::kafka::broker::{BrokerReader, KafkaBrokerReader};
use crate::kafka::message::MessageWithContext;
use crate::kafka::metrics_consts::{
    HANDLER_FAILURES, HANDLER_PANICS, MESSAGES_DISPATCHED, UNKNOWN_TOPIC_DROPPED,
};
use crate::kafka::reader::Reader;
use crate::kafka::types::format_offsets;

/// Per-topic message handler.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: &MessageWithContext) -> anyhow::Result<()>;
}

/// Fatal misconfiguration, surfaced at registration time rather than runtime.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("duplicate handler for topic {topic}")]
    DuplicateHandler { topic: String },
    #[error("handler registered for unsubscribed topic {topic}")]
    TopicNotSubscribed { topic: String },
}

struct RegisteredHandler {
    name: String,
    handler: Arc<dyn Handler>,
}

/// Message-consumption engine: polls subscribed topics, dispatches each
/// message to its registered handler and commits offsets per the auto-commit
/// policy. Delivery is at-least-once.
pub struct KafkaConsumer {
    reader: Arc<Reader>,
    handlers: HashMap<String, RegisteredHandler>,
    topics: HashSet<String>,
    channel_size: usize,
    shutdown_timeout: Duration,
    service_name: String,
    cancel: CancellationToken,
}

impl KafkaConsumer {
    /// Build a consumer over an already-constructed broker reader.
    pub fn new(broker: Arc<dyn BrokerReader>, config: &ConsumerConfig) -> Self {
        let topics = config.topics();
        Self {
            reader: Arc::new(Reader::new(broker, topics.clone(), config.auto_commit())),
            handlers: HashMap::new(),
            topics: topics.into_iter().collect(),
            channel_size: config.message_channel_size.max(1),
            shutdown_timeout: config.shutdown_timeout(),
            service_name: config.service_name.clone(),
            cancel: CancellationToken::new(),
        }
    }

    /// Build a consumer with an rdkafka reader from environment configuration.
    pub fn from_config(config: &ConsumerConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let broker = KafkaBrokerReader::new(config)?;
        Ok(Self::new(Arc::new(broker), config))
    }

    /// Register a handler for a subscribed topic.
    ///
    /// The `name` identifies the handler in logs and spans. Registration is
    /// fail-fast: duplicate topics and topics outside the subscribed set are
    /// configuration errors, not runtime conditions.
    pub fn add_handler(
        &mut self,
        topic: &str,
        name: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), ConfigError> {
        if self.handlers.contains_key(topic) {
            return Err(ConfigError::DuplicateHandler {
                topic: topic.to_string(),
            });
        }
        if !self.topics.contains(topic) {
            return Err(ConfigError::TopicNotSubscribed {
                topic: topic.to_string(),
            });
        }
        self.handlers.insert(
            topic.to_string(),
            RegisteredHandler {
                name: name.to_string(),
                handler,
            },
        );
        Ok(())
    }

    /// Token that triggers graceful shutdown when cancelled; hand a clone to
    /// any external shutdown orchestration. Clone it (and [`Self::reader`],
    /// for health probes) before calling [`Self::start`], which consumes the
    /// consumer.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn reader(&self) -> &Arc<Reader> {
        &self.reader
    }

    /// Liveness probe: fails only if the underlying reader call fails.
    ///
    /// For probing while the consumer runs, clone [`Self::reader`] before
    /// starting and call `reader.broker().stats()` on the clone.
    pub fn health_check(&self) -> anyhow::Result<()> {
        self.reader.broker().stats()?;
        Ok(())
    }

    /// Run until SIGINT/SIGTERM, then shut down gracefully.
    ///
    /// Consumes the consumer: take clones of [`Self::cancellation_token`]
    /// and [`Self::reader`] first if shutdown or health checks are driven
    /// externally.
    pub async fn start(self) -> anyhow::Result<()> {
        self.run_with_shutdown(crate::signals::wait_for_shutdown_signal())
            .await
    }

    /// Run until the given future resolves (or the poll loop dies), then shut
    /// down gracefully: cancel the poll loop, await it and the auto-commit
    /// task within the shutdown timeout, and close the broker reader.
    ///
    /// A fatal poll error takes the whole consumer down; the error is
    /// returned after shutdown completes. Clean cancellation is not an error.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let correlation = EventCorrelation::new(&self.service_name);
        info!(
            correlation_id = %correlation.correlation_id,
            topics = ?self.reader.topics(),
            "kafka consumer started"
        );

        let (tx, mut rx) = mpsc::channel(self.channel_size);
        let reader = self.reader.clone();
        let poll_cancel = self.cancel.clone();
        let poll_task = tokio::spawn(async move { reader.poll(tx, poll_cancel).await });

        let trigger = self.cancel.clone();
        tokio::spawn(async move {
            shutdown.await;
            trigger.cancel();
        });

        // Dispatcher loop: drains until the poll loop exits and the channel
        // closes. Buffered messages are still dispatched during shutdown.
        while let Some(message) = rx.recv().await {
            self.dispatch(message).await;
        }

        self.cancel.cancel();
        let mut terminal: anyhow::Result<()> = Ok(());
        match tokio::time::timeout(self.shutdown_timeout, poll_task).await {
            Ok(Ok(Ok(committed))) => {
                info!(offsets = %format_offsets(&committed), "kafka consumer exited cleanly");
            }
            Ok(Ok(Err(err))) if err.is_cancellation() => {
                info!("kafka consumer cancelled");
            }
            Ok(Ok(Err(err))) => {
                let (committed, consumed) = self.reader.offsets().await;
                error!(
                    error = %err,
                    committed = %format_offsets(&committed),
                    consumed = %format_offsets(&consumed),
                    "kafka consumer exited"
                );
                terminal = Err(err.into());
            }
            Ok(Err(join_err)) => {
                error!(error = %join_err, "poll task panicked");
                terminal = Err(anyhow::anyhow!("poll task panicked: {join_err}"));
            }
            Err(_) => {
                error!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "timed out waiting for poll loop to stop"
                );
                terminal = Err(anyhow::anyhow!("poll loop shutdown timed out"));
            }
        }

        if let Err(err) = self.reader.close() {
            error!(error = %err, "error closing broker reader");
            if terminal.is_ok() {
                terminal = Err(err.into());
            }
        }

        info!("kafka consumer stopped");
        terminal
    }

    /// Route one message to its topic handler, isolating errors and panics.
    async fn dispatch(&self, message: MessageWithContext) {
        let topic = message.topic().to_string();
        let Some(registered) = self.handlers.get(&topic) else {
            metrics::counter!(UNKNOWN_TOPIC_DROPPED, "topic" => topic.clone()).increment(1);
            error!(
                topic = %topic,
                correlation_id = %message.correlation.correlation_id,
                "missing handler for topic, dropping message"
            );
            return;
        };

        let span = tracing::info_span!(
            "kafka.message",
            handler = %registered.name,
            topic = %topic,
            partition = message.partition().partition_number(),
            offset = message.offset(),
            key = message.key_utf8().unwrap_or_default(),
            correlation_id = %message.correlation.correlation_id,
            timestamp_ms = message.timestamp_millis().unwrap_or_default(),
            status = tracing::field::Empty,
            error = tracing::field::Empty,
        );

        let outcome = AssertUnwindSafe(
            registered
                .handler
                .handle(&message)
                .instrument(span.clone()),
        )
        .catch_unwind()
        .await;
        metrics::counter!(MESSAGES_DISPATCHED, "topic" => topic.clone()).increment(1);

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => {
                metrics::counter!(HANDLER_FAILURES, "topic" => topic.clone()).increment(1);
                error!(
                    parent: &span,
                    error = %err,
                    "error in processing kafka message"
                );
                Some(err)
            }
            Err(panic) => {
                metrics::counter!(HANDLER_PANICS, "topic" => topic.clone()).increment(1);
                let err = panic_to_error(panic);
                let backtrace = std::backtrace::Backtrace::force_capture();
                error!(
                    parent: &span,
                    error = %err,
                    stacktrace = %backtrace,
                    "panic recovered in message handler"
                );
                Some(err)
            }
        };

        match failure {
            None => {
                span.record("status", "ok");
            }
            Some(err) => {
                span.record("status", "error");
                span.record("error", tracing::field::display(&err));
            }
        }
    }
}

/// Normalize a recovered panic payload into an error value.
fn panic_to_error(panic: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    match panic.downcast::<String>() {
        Ok(msg) => anyhow::anyhow!("{msg}"),
        Err(panic) => match panic.downcast::<&'static str>() {
            Ok(msg) => anyhow::anyhow!("{msg}"),
            Err(_) => anyhow::anyhow!("error occurred during message processing"),
        },
    }
}
