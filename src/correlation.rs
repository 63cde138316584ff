//! Correlation propagation for consumed messages.
//!
//! Every message gets an [`EventCorrelation`] derived from its headers, so
//! downstream logs and spans can be joined across services. When the
//! producer did not set a correlation id, a fresh one is generated.

use rdkafka::message::{Headers, Message, OwnedMessage};
use uuid::Uuid;

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const SCENARIO_ID_HEADER: &str = "x-scenario-id";
pub const SESSION_ID_HEADER: &str = "x-session-id";
pub const SCENARIO_NAME_HEADER: &str = "x-scenario-name";

/// Correlation identifiers carried alongside a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCorrelation {
    pub correlation_id: String,
    pub scenario_id: Option<String>,
    pub session_id: Option<String>,
    pub scenario_name: Option<String>,
}

impl EventCorrelation {
    /// A correlation scoped to a named component, for logs that are not
    /// tied to any one message (poll loop start, shutdown).
    pub fn new(service_name: &str) -> Self {
        Self {
            correlation_id: format!("{}-{}", service_name, Uuid::new_v4()),
            scenario_id: None,
            session_id: None,
            scenario_name: None,
        }
    }

    /// Extract correlation identifiers from message headers.
    ///
    /// Header keys are matched case-insensitively. A missing correlation id
    /// falls back to a freshly generated uuid so every message is traceable.
    pub fn from_message(message: &OwnedMessage) -> Self {
        let mut correlation = Self {
            correlation_id: Uuid::new_v4().to_string(),
            scenario_id: None,
            session_id: None,
            scenario_name: None,
        };
        let Some(headers) = message.headers() else {
            return correlation;
        };
        for header in headers.iter() {
            let Some(value) = header.value else { continue };
            let Ok(value) = std::str::from_utf8(value) else {
                continue;
            };
            match header.key.to_ascii_lowercase().as_str() {
                CORRELATION_ID_HEADER => correlation.correlation_id = value.to_string(),
                SCENARIO_ID_HEADER => correlation.scenario_id = Some(value.to_string()),
                SESSION_ID_HEADER => correlation.session_id = Some(value.to_string()),
                SCENARIO_NAME_HEADER => correlation.scenario_name = Some(value.to_string()),
                _ => {}
            }
        }
        correlation
    }
}
