//! Message-consumption engine for partitioned log-based messaging.
//!
//! Data flow: broker -> poll loop (fetch) -> offset tracker (record) ->
//! channel -> dispatcher (handle). Offsets are committed under two triggers,
//! batch size and time interval, both serialized by one commit lock.

pub mod broker;
pub mod consumer;
pub mod message;
pub mod metrics_consts;
pub mod offset_tracker;
pub mod reader;
pub mod types;
