pub const MESSAGES_CONSUMED: &str = "consumer_engine_messages_consumed_total";
pub const OFFSETS_COMMITTED: &str = "consumer_engine_offsets_committed_total";
pub const COMMIT_FAILURES: &str = "consumer_engine_commit_failures_total";
pub const MESSAGES_DISPATCHED: &str = "consumer_engine_messages_dispatched_total";
pub const UNKNOWN_TOPIC_DROPPED: &str = "consumer_engine_unknown_topic_dropped_total";
pub const HANDLER_FAILURES: &str = "consumer_engine_handler_failures_total";
pub const HANDLER_PANICS: &str = "consumer_engine_handler_panics_total";
