//! Offset tracker: the highest consumed-but-not-committed offset per partition.
//!
//! Two maps live here: `consumed` is mutated on every fetch, `committed` is
//! replaced wholesale on every successful commit. One mutex guards both maps
//! and is held across the broker commit call, so commits triggered from the
//! size and time triggers are serialized and never interleave.

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::kafka::broker::{BrokerError, BrokerReader};
use crate::kafka::metrics_consts::{MESSAGES_CONSUMED, OFFSETS_COMMITTED};
use crate::kafka::types::{format_offsets, OffsetMap, Partition};

#[derive(Debug, thiserror::Error)]
#[error("offset commit failed: {source}")]
pub struct CommitError {
    #[from]
    pub source: BrokerError,
}

#[derive(Default)]
struct TrackerState {
    consumed: OffsetMap,
    committed: OffsetMap,
    pending: u64,
}

/// Thread-safe consumed/committed offset state shared by the poll loop and
/// both commit triggers.
#[derive(Default)]
pub struct OffsetTracker {
    state: Mutex<TrackerState>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a consumed offset. Called by the poll loop after every
    /// successful channel hand-off.
    pub async fn record(&self, partition: Partition, offset: i64) {
        let mut state = self.state.lock().await;
        metrics::counter!(
            MESSAGES_CONSUMED,
            "topic" => partition.topic().to_string()
        )
        .increment(1);
        state.consumed.insert(partition, offset);
        state.pending += 1;
    }

    /// Number of messages consumed since the last successful commit.
    pub async fn pending(&self) -> u64 {
        self.state.lock().await.pending
    }

    /// Commit all consumed offsets as one batch.
    ///
    /// With nothing pending this is a no-op that never contacts the broker.
    /// On success the consumed set becomes the committed set and a defensive
    /// copy of the new committed snapshot is returned. On broker error the
    /// state is left unchanged so the offsets are retried by the next trigger.
    pub async fn commit(
        &self,
        broker: &dyn BrokerReader,
    ) -> Result<Option<OffsetMap>, CommitError> {
        let mut state = self.state.lock().await;
        if state.pending == 0 {
            debug!("no messages to commit");
            return Ok(None);
        }
        debug!(
            offsets = %format_offsets(&state.consumed),
            pending = state.pending,
            "initiating commit"
        );
        broker.commit_offsets(&state.consumed).await?;
        metrics::counter!(OFFSETS_COMMITTED).increment(state.pending);
        state.committed = std::mem::take(&mut state.consumed);
        state.pending = 0;
        info!(offsets = %format_offsets(&state.committed), "messages committed");
        Ok(Some(state.committed.clone()))
    }

    /// Defensive copies of `(committed, consumed)` for observability.
    pub async fn snapshot(&self) -> (OffsetMap, OffsetMap) {
        let state = self.state.lock().await;
        (state.committed.clone(), state.consumed.clone())
    }
}
