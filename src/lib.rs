//! servicekit: cross-cutting infrastructure for backend services.
//!
//! The centerpiece is the Kafka message-consumption engine
//! ([`kafka::consumer::KafkaConsumer`]): at-least-once delivery with
//! batched/interval offset commits, per-topic handler dispatch with panic
//! isolation, correlation propagation from message headers, and graceful
//! signal-driven shutdown.

pub mod config;
pub mod correlation;
pub mod kafka;
pub mod logging;
pub mod signals;

pub use config::ConsumerConfig;
pub use kafka::consumer::{ConfigError, Handler, KafkaConsumer};
pub use kafka::message::MessageWithContext;
