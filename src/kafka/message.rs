use rdkafka::message::{Message, OwnedMessage};

use crate::correlation::EventCorrelation;
use crate::kafka::types::Partition;

/// A fetched message paired with its derived correlation context.
///
/// Created once per fetch by the poll loop, handed through the channel and
/// consumed exactly once by the dispatcher.
#[derive(Debug)]
pub struct MessageWithContext {
    pub message: OwnedMessage,
    pub correlation: EventCorrelation,
}

impl MessageWithContext {
    pub fn new(message: OwnedMessage) -> Self {
        let correlation = EventCorrelation::from_message(&message);
        Self {
            message,
            correlation,
        }
    }

    pub fn topic(&self) -> &str {
        self.message.topic()
    }

    pub fn partition(&self) -> Partition {
        Partition::new(self.message.topic().to_string(), self.message.partition())
    }

    pub fn offset(&self) -> i64 {
        self.message.offset()
    }

    pub fn key_utf8(&self) -> Option<&str> {
        self.message.key().and_then(|k| std::str::from_utf8(k).ok())
    }

    pub fn timestamp_millis(&self) -> Option<i64> {
        self.message.timestamp().to_millis()
    }
}
