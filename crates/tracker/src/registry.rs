//! Job registry.
//!
//! Sole owner and mutator of tracked [`Job`]s. Jobs are replaced
//! wholesale with the output of [`machine::transition`](crate::machine::transition),
//! never edited in place by anyone else.

use std::collections::HashMap;

use verse_core::job::{Job, JobId, ProgressEvent, Status};
use verse_core::types::Timestamp;

use crate::machine::{self, JobEvent};

/// Outcome of an event that changed a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub job_id: JobId,
    pub state: Status,
    /// The log entry the transition appended.
    pub entry: ProgressEvent,
    /// True only for the transition that first reached a terminal state.
    pub entered_terminal: bool,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<JobId, Job>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, job_id: &JobId) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn get(&self, job_id: &JobId) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    /// Insert a new job. Returns `false`, leaving the registry untouched,
    /// when a job with the same id is already present.
    pub fn insert(&mut self, job: Job) -> bool {
        if self.jobs.contains_key(&job.id) {
            return false;
        }
        self.jobs.insert(job.id.clone(), job);
        true
    }

    pub fn remove(&mut self, job_id: &JobId) -> Option<Job> {
        self.jobs.remove(job_id)
    }

    /// Run `event` through the state machine for `job_id` and store the
    /// result.
    ///
    /// Returns `None` when the job is unknown or the event does not
    /// apply; the stored job is then unchanged.
    pub fn apply(&mut self, job_id: &JobId, event: &JobEvent, at: Timestamp) -> Option<Applied> {
        let current = self.jobs.get(job_id)?;
        let next = machine::transition(current, event, at)?;
        let entered_terminal = !current.is_terminal() && next.is_terminal();
        let applied = Applied {
            job_id: job_id.clone(),
            state: next.state,
            entry: next.log.last()?.clone(),
            entered_terminal,
        };
        self.jobs.insert(job_id.clone(), next);
        Some(applied)
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.keys().cloned().collect()
    }

    /// Number of jobs not yet in a terminal state.
    pub fn live_count(&self) -> usize {
        self.jobs.values().filter(|j| !j.is_terminal()).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
