//! Events broadcast by the tracker.
//!
//! Observers (views, the CLI, tests) subscribe via
//! [`JobTracker::subscribe`](crate::tracker::JobTracker::subscribe) and
//! re-read the job through the tracker when they need its full state.

use serde::Serialize;
use verse_core::job::{JobId, ProgressEvent, Status};

/// Broadcast channel capacity for tracker events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A change observers may want to react to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// A log entry was appended to a job.
    Progress {
        job_id: JobId,
        entry: ProgressEvent,
    },

    /// A job reached `completed` or `failed`. Sent once per job.
    Terminal { job_id: JobId, status: Status },

    /// A job left the registry, either explicitly or after settling.
    Dismissed { job_id: JobId },

    /// The push connection dropped unexpectedly.
    Disconnected { reason: String },
}

impl TrackerEvent {
    /// The job this event concerns, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            TrackerEvent::Progress { job_id, .. }
            | TrackerEvent::Terminal { job_id, .. }
            | TrackerEvent::Dismissed { job_id } => Some(job_id),
            TrackerEvent::Disconnected { .. } => None,
        }
    }
}
