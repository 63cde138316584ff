//! Poll loop and commit scheduling.
//!
//! [`Reader::poll`] drives message intake: it fetches messages one at a time,
//! derives the per-message correlation context and hands each message to a
//! bounded channel, racing the hand-off against cancellation. Consumed
//! offsets are committed under two independent triggers, a batch-size check
//! evaluated after every hand-off and a background interval task, both
//! funneled through [`OffsetTracker::commit`]'s single lock.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::kafka::broker::{BrokerError, BrokerReader};
use crate::kafka::message::MessageWithContext;
use crate::kafka::metrics_consts::COMMIT_FAILURES;
use crate::kafka::offset_tracker::{CommitError, OffsetTracker};
use crate::kafka::types::{format_offsets, OffsetMap};
use std::time::Duration;

/// Auto-commit policy. Immutable after engine construction.
#[derive(Debug, Clone)]
pub struct AutoCommit {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: u64,
}

impl Default for AutoCommit {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(1),
            batch_size: 50,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("error fetching message: {0}")]
    Fetch(#[source] BrokerError),
    #[error("error fetching message: {fetch}; final commit failed: {commit}")]
    FetchAndCommit {
        fetch: BrokerError,
        commit: CommitError,
    },
    #[error("batch-size commit failed: {0}")]
    Commit(#[from] CommitError),
    #[error("poll cancelled")]
    Cancelled,
    #[error("poll cancelled; final commit failed: {0}")]
    CancelledWithCommit(#[source] CommitError),
}

impl PollError {
    /// Clean cancellation is expected during shutdown and is not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PollError::Cancelled)
    }
}

/// The engine's broker-facing half: one poll loop per reader instance.
pub struct Reader {
    broker: Arc<dyn BrokerReader>,
    tracker: Arc<OffsetTracker>,
    auto_commit: AutoCommit,
    topics: Vec<String>,
    closed: CancellationToken,
    // Serializes concurrent poll() calls: the tracker and broker fetch
    // position are shared, so only one loop may run at a time.
    poll_gate: tokio::sync::Mutex<()>,
}

impl Reader {
    pub fn new(broker: Arc<dyn BrokerReader>, topics: Vec<String>, auto_commit: AutoCommit) -> Self {
        Self {
            broker,
            tracker: Arc::new(OffsetTracker::new()),
            auto_commit,
            topics,
            closed: CancellationToken::new(),
            poll_gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn broker(&self) -> &Arc<dyn BrokerReader> {
        &self.broker
    }

    /// Defensive `(committed, consumed)` snapshot for observability.
    pub async fn offsets(&self) -> (OffsetMap, OffsetMap) {
        self.tracker.snapshot().await
    }

    /// Signal the poll loop to exit silently and release the broker reader.
    pub fn close(&self) -> Result<(), BrokerError> {
        info!(topics = ?self.topics, "reader close initiated");
        self.closed.cancel();
        self.broker.close()
    }

    /// Run the poll loop until cancellation, reader close or a terminal error.
    ///
    /// Returns the last committed offsets on a clean exit. Cancellation
    /// produces [`PollError::Cancelled`], returned as an error but benign.
    /// Concurrent calls are serialized; a second caller waits until the
    /// running loop exits.
    pub async fn poll(
        &self,
        tx: mpsc::Sender<MessageWithContext>,
        cancel: CancellationToken,
    ) -> Result<OffsetMap, PollError> {
        let _running = self.poll_gate.lock().await;
        info!(topics = ?self.topics, "polling started");

        // The time trigger is tied to the loop's cancellation scope: it exits
        // (after one final commit) once the loop winds down.
        let commit_cancel = cancel.child_token();
        let commit_task = tokio::spawn(time_based_commit_loop(
            self.broker.clone(),
            self.tracker.clone(),
            self.auto_commit.clone(),
            commit_cancel.clone(),
        ));

        let result = self.poll_loop(&tx, &cancel).await;

        commit_cancel.cancel();
        if commit_task.await.is_err() {
            error!("auto-commit task panicked");
        }
        drop(tx);

        let (committed, consumed) = self.tracker.snapshot().await;
        match &result {
            Ok(()) => info!(
                committed = %format_offsets(&committed),
                "polling ended"
            ),
            Err(err) if err.is_cancellation() => info!(
                committed = %format_offsets(&committed),
                "polling cancelled"
            ),
            Err(err) => error!(
                error = %err,
                committed = %format_offsets(&committed),
                consumed = %format_offsets(&consumed),
                "polling ended with error"
            ),
        }
        warn!(topics = ?self.topics, "polling ended for topics");
        result.map(|()| committed)
    }

    async fn poll_loop(
        &self,
        tx: &mpsc::Sender<MessageWithContext>,
        cancel: &CancellationToken,
    ) -> Result<(), PollError> {
        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.exit_cancelled().await,
                _ = self.closed.cancelled() => return Ok(()),
                fetched = self.broker.fetch_next() => fetched,
            };
            let message = match fetched {
                Ok(message) => message,
                Err(fetch) => {
                    // Only auto-commit consumers commit on a fetch failure.
                    let commit = if self.auto_commit.enabled {
                        self.final_commit().await
                    } else {
                        None
                    };
                    return Err(match commit {
                        Some(commit) => PollError::FetchAndCommit { fetch, commit },
                        None => PollError::Fetch(fetch),
                    });
                }
            };

            let with_context = MessageWithContext::new(message);
            let partition = with_context.partition();
            let offset = with_context.offset();

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.exit_cancelled().await,
                _ = self.closed.cancelled() => return Ok(()),
                sent = tx.send(with_context) => {
                    if sent.is_err() {
                        // All receivers dropped: equivalent to reader close.
                        return Ok(());
                    }
                    self.tracker.record(partition, offset).await;
                    if self.auto_commit.enabled
                        && self.tracker.pending().await >= self.auto_commit.batch_size
                    {
                        debug!("batch size reached for auto commit, committing messages");
                        if let Err(err) = self.tracker.commit(self.broker.as_ref()).await {
                            metrics::counter!(COMMIT_FAILURES, "trigger" => "size").increment(1);
                            return Err(PollError::Commit(err));
                        }
                    }
                }
            }
        }
    }

    /// Cancellation always flushes the consumed position, even when
    /// auto-commit is disabled; it is the only commit such a consumer gets.
    async fn exit_cancelled(&self) -> Result<(), PollError> {
        match self.final_commit().await {
            Some(commit) => Err(PollError::CancelledWithCommit(commit)),
            None => Err(PollError::Cancelled),
        }
    }

    /// Best-effort commit of whatever is pending on the way out.
    async fn final_commit(&self) -> Option<CommitError> {
        match self.tracker.commit(self.broker.as_ref()).await {
            Ok(_) => None,
            Err(err) => {
                metrics::counter!(COMMIT_FAILURES, "trigger" => "final").increment(1);
                Some(err)
            }
        }
    }
}

/// Background time trigger: commits pending offsets on every interval tick,
/// and once more on cancellation before exiting. Commit errors here are
/// logged, never fatal; the offsets stay pending for the next trigger.
async fn time_based_commit_loop(
    broker: Arc<dyn BrokerReader>,
    tracker: Arc<OffsetTracker>,
    policy: AutoCommit,
    cancel: CancellationToken,
) {
    if !policy.enabled {
        debug!("auto commit is disabled");
        return;
    }
    let mut ticker = interval_at(Instant::now() + policy.interval, policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("auto commit cancelled, committing pending messages");
                if let Err(err) = tracker.commit(broker.as_ref()).await {
                    metrics::counter!(COMMIT_FAILURES, "trigger" => "time").increment(1);
                    error!(error = %err, "error in final auto commit");
                }
                break;
            }
            _ = ticker.tick() => {
                debug!("time limit reached for auto commit interval, committing messages");
                if let Err(err) = tracker.commit(broker.as_ref()).await {
                    metrics::counter!(COMMIT_FAILURES, "trigger" => "time").increment(1);
                    error!(error = %err, "time-triggered commit failed");
                }
            }
        }
    }
    warn!("auto commit stopped");
}
