//! Single-flight job consumer
//!
//! Polls the queue on a fixed cadence and runs at most one job at a time.
//! The job is awaited inside the tick handler, so the next poll cannot start
//! before it settles; ticks missed meanwhile are skipped, not replayed.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::job::Job;
use crate::pipeline::JobRunner;
use crate::queue::JobQueue;

/// Default delay between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Busy,
}

/// Result of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// No message was visible
    Empty,
    /// Job succeeded and its message was deleted
    Completed,
    /// Job failed; the message is left for redelivery
    Failed,
    /// Message could never succeed and was deleted
    Rejected,
    /// Receive failed; treated as an empty cycle
    QueueUnavailable,
}

/// Counters over the consumer's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub polls: u64,
    pub completed: u64,
    pub failed: u64,
    pub rejected: u64,
    pub queue_errors: u64,
}

pub struct JobConsumer {
    queue: Arc<dyn JobQueue>,
    runner: Arc<dyn JobRunner>,
    poll_interval: Duration,
    state: ConsumerState,
    stats: ConsumerStats,
}

impl JobConsumer {
    pub fn new(queue: Arc<dyn JobQueue>, runner: Arc<dyn JobRunner>, poll_interval: Duration) -> Self {
        Self {
            queue,
            runner,
            poll_interval,
            state: ConsumerState::Idle,
            stats: ConsumerStats::default(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Poll until `shutdown` is cancelled
    ///
    /// Cancellation is only observed between polls, so a job in flight
    /// settles before this returns.
    pub async fn run(mut self, shutdown: CancellationToken) -> ConsumerStats {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Job consumer started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }

        info!(
            completed = self.stats.completed,
            failed = self.stats.failed,
            rejected = self.stats.rejected,
            "Job consumer stopped"
        );
        self.stats
    }

    /// One poll cycle: receive at most one message and run it to completion
    pub async fn poll_once(&mut self) -> PollOutcome {
        if self.state == ConsumerState::Busy {
            return PollOutcome::Empty;
        }
        self.stats.polls += 1;

        let message = match self.queue.receive_one().await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("No message");
                return PollOutcome::Empty;
            }
            Err(e) => {
                warn!("Queue receive failed: {}", e);
                self.stats.queue_errors += 1;
                return PollOutcome::QueueUnavailable;
            }
        };

        let job = match Job::from_message(&message) {
            Ok(job) => job,
            Err(e) => {
                error!("Rejecting message: {}", e);
                self.acknowledge(&message.receipt_handle).await;
                self.stats.rejected += 1;
                return PollOutcome::Rejected;
            }
        };

        if message.receive_count > 1 {
            info!(
                track_id = %job.track_id,
                receive_count = message.receive_count,
                "Redelivered job"
            );
        }

        self.state = ConsumerState::Busy;
        let result = self.runner.run(&job).await;
        self.state = ConsumerState::Idle;

        match result {
            Ok(report) => {
                if report.tracks_updated == 0 {
                    warn!(track_id = %job.track_id, "Job completed but track no longer exists");
                }
                self.acknowledge(&job.receipt_handle).await;
                self.stats.completed += 1;
                PollOutcome::Completed
            }
            Err(e) => {
                // Left on the queue; it becomes visible again after the
                // visibility timeout
                error!(track_id = %job.track_id, "Job failed, leaving for redelivery: {}", e);
                self.stats.failed += 1;
                PollOutcome::Failed
            }
        }
    }

    async fn acknowledge(&self, receipt_handle: &str) {
        match self.queue.delete(receipt_handle).await {
            Ok(true) => debug!("Message deleted"),
            Ok(false) => warn!("Message receipt was stale; it may be processed again"),
            Err(e) => warn!("Message delete failed, it may be processed again: {}", e),
        }
    }
}
