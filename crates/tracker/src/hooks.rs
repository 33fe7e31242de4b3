//! Completion hooks.
//!
//! Run exactly once per job, on its first terminal transition:
//!
//! 1. invalidate the cached read of the affected record,
//! 2. schedule auto-dismiss after the settle delay (completed jobs only),
//! 3. unsubscribe the job's channels,
//! 4. release the job's reference on the shared connection.
//!
//! Failed jobs get no settle deadline; they stay until dismissed.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use verse_channel::connection::ChannelConnection;
use verse_core::job::{Job, JobId, Status};
use verse_core::types::Timestamp;

use crate::dispatcher::EventDispatcher;

/// Settle delay used when none is configured.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Longest accepted settle delay. Longer values are clamped.
pub const MAX_SETTLE_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// External cache of record reads, invalidated when a job finishes.
pub trait RecordCache: Send + Sync {
    fn invalidate(&self, job: &Job);
}

impl<F> RecordCache for F
where
    F: Fn(&Job) + Send + Sync,
{
    fn invalidate(&self, job: &Job) {
        self(job)
    }
}

/// Cache that holds nothing. Used when the embedding application does
/// not cache record reads.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl RecordCache for NoopCache {
    fn invalidate(&self, _job: &Job) {}
}

pub struct CompletionHooks {
    cache: Arc<dyn RecordCache>,
    settle_delay: chrono::Duration,
    fired: HashSet<JobId>,
    settle_deadlines: HashMap<JobId, Timestamp>,
}

impl CompletionHooks {
    pub fn new(cache: Arc<dyn RecordCache>, settle_delay: Duration) -> Self {
        if settle_delay > MAX_SETTLE_DELAY {
            tracing::warn!(?settle_delay, max = ?MAX_SETTLE_DELAY, "Settle delay too long, clamping");
        }
        let settle_delay = settle_delay.min(MAX_SETTLE_DELAY);
        Self {
            cache,
            settle_delay: chrono::Duration::from_std(settle_delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(2)),
            fired: HashSet::new(),
            settle_deadlines: HashMap::new(),
        }
    }

    /// Run the hooks for a job that just became terminal.
    ///
    /// `holds_lease` says whether the job still owns a connection
    /// reference. Returns `false` if the hooks already ran for this job.
    pub fn run(
        &mut self,
        job: &Job,
        now: Timestamp,
        dispatcher: &mut EventDispatcher,
        connection: &mut ChannelConnection,
        holds_lease: bool,
    ) -> bool {
        if !self.fired.insert(job.id.clone()) {
            return false;
        }

        self.cache.invalidate(job);

        if job.state == Status::Completed {
            let deadline = now
                .checked_add_signed(self.settle_delay)
                .unwrap_or(Timestamp::MAX_UTC);
            self.settle_deadlines.insert(job.id.clone(), deadline);
            tracing::debug!(job_id = %job.id, %deadline, "Auto-dismiss scheduled");
        }

        dispatcher.unsubscribe(&job.id);
        if holds_lease {
            connection.release();
        }

        tracing::info!(job_id = %job.id, state = %job.state, "Job finished, listeners removed");
        true
    }

    pub fn has_fired(&self, job_id: &JobId) -> bool {
        self.fired.contains(job_id)
    }

    /// Drop all bookkeeping for a job leaving the registry, so a later
    /// job with the same id gets its own hooks.
    pub fn forget(&mut self, job_id: &JobId) {
        self.fired.remove(job_id);
        self.settle_deadlines.remove(job_id);
    }

    pub fn settle_deadline(&self, job_id: &JobId) -> Option<Timestamp> {
        self.settle_deadlines.get(job_id).copied()
    }

    /// Earliest pending auto-dismiss deadline.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.settle_deadlines.values().min().copied()
    }

    /// Remove and return the jobs whose deadline is at or before `now`.
    pub fn take_due(&mut self, now: Timestamp) -> Vec<JobId> {
        let mut due: Vec<(Timestamp, JobId)> = self
            .settle_deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, deadline)| (*deadline, id.clone()))
            .collect();
        due.sort();
        for (_, id) in &due {
            self.settle_deadlines.remove(id);
        }
        due.into_iter().map(|(_, id)| id).collect()
    }
}
