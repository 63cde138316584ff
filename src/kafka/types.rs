use std::collections::HashMap;
use std::fmt::Write;

/// A single partition of a topic, used as the key for offset tracking.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
    topic: String,
    partition_number: i32,
}

impl Partition {
    pub fn new(topic: String, partition_number: i32) -> Self {
        Self {
            topic,
            partition_number,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition_number(&self) -> i32 {
        self.partition_number
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.topic, self.partition_number)
    }
}

/// Last-consumed (or last-committed) offset per partition.
pub type OffsetMap = HashMap<Partition, i64>;

/// Render an offset map as a compact `topic:partition=offset` list for log fields.
pub fn format_offsets(offsets: &OffsetMap) -> String {
    let mut entries: Vec<(&Partition, &i64)> = offsets.iter().collect();
    entries.sort_by(|a, b| {
        a.0.topic()
            .cmp(b.0.topic())
            .then(a.0.partition_number().cmp(&b.0.partition_number()))
    });
    let mut out = String::new();
    for (i, (partition, offset)) in entries.into_iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{partition}={offset}");
    }
    out
}
