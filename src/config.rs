use std::time::Duration;

use envconfig::Envconfig;

use crate::kafka::reader::AutoCommit;

/// Environment-driven consumer engine configuration.
#[derive(Envconfig, Clone, Debug)]
pub struct ConsumerConfig {
    #[envconfig(default = "localhost:9092")]
    pub kafka_hosts: String,

    #[envconfig(default = "cg-kafka-consumer")]
    pub kafka_consumer_group: String,

    /// Comma-separated list of subscribed topics.
    #[envconfig(default = "")]
    pub kafka_consumer_topics: String,

    #[envconfig(default = "earliest")]
    pub kafka_consumer_offset_reset: String,

    #[envconfig(default = "false")]
    pub kafka_tls: bool,

    /// Capacity of the poll-to-dispatch channel.
    #[envconfig(default = "100")]
    pub message_channel_size: usize,

    #[envconfig(default = "true")]
    pub kafka_consumer_auto_commit: bool,

    #[envconfig(default = "1000")]
    pub kafka_consumer_auto_commit_interval_ms: u64,

    #[envconfig(default = "50")]
    pub kafka_consumer_auto_commit_batch_size: u64,

    #[envconfig(default = "30")]
    pub shutdown_timeout_secs: u64,

    #[envconfig(from = "SERVICE_NAME", default = "servicekit")]
    pub service_name: String,
}

impl ConsumerConfig {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Self::init_from_env()
    }

    pub fn topics(&self) -> Vec<String> {
        self.kafka_consumer_topics
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn auto_commit(&self) -> AutoCommit {
        AutoCommit {
            enabled: self.kafka_consumer_auto_commit,
            interval: Duration::from_millis(self.kafka_consumer_auto_commit_interval_ms),
            batch_size: self.kafka_consumer_auto_commit_batch_size,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Cross-field validation, run before the engine is constructed.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.topics().is_empty() {
            anyhow::bail!("KAFKA_CONSUMER_TOPICS must name at least one topic");
        }
        if self.kafka_consumer_auto_commit {
            if self.kafka_consumer_auto_commit_interval_ms == 0 {
                anyhow::bail!(
                    "KAFKA_CONSUMER_AUTO_COMMIT_INTERVAL_MS must be non-zero when auto commit is enabled"
                );
            }
            if self.kafka_consumer_auto_commit_batch_size == 0 {
                anyhow::bail!(
                    "KAFKA_CONSUMER_AUTO_COMMIT_BATCH_SIZE must be non-zero when auto commit is enabled"
                );
            }
        }
        Ok(())
    }
}
