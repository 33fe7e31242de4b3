//! Job state machine.
//!
//! [`transition`] is pure: given a job and an inbound event it returns
//! the next job (state replaced, one log entry appended) or `None` when
//! the event does not apply in the current state.
//!
//! | Current                 | Event       | Next      |
//! |-------------------------|-------------|-----------|
//! | queued                  | `joined`    | joined    |
//! | queued, joined          | `added`     | queued    |
//! | queued, joined, waiting | `waiting`   | waiting   |
//! | any non-terminal        | `active`    | active    |
//! | any non-terminal        | `completed` | completed |
//! | any non-terminal        | `failed`    | failed    |
//!
//! `completed` and `failed` absorb every later event.

use verse_core::job::{Job, ProgressEvent, Status};
use verse_core::types::Timestamp;

pub const MSG_JOINED: &str = "Joined processing room";
pub const MSG_ADDED: &str = "Alrighty, you're in the line!";
pub const MSG_ACTIVE: &str = "Doing the thing... almost there!";
pub const MSG_WAITING: &str = "Just hang tight, your turn's coming.";
pub const MSG_COMPLETED: &str = "Done and dusted! You're all set.";
pub const MSG_FAILED: &str = "Whoops, something went wrong. Try again later.";

/// An event that may move a job to a new state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// The worker attached us to the job's room.
    Joined,
    Added,
    Active,
    Waiting,
    Completed,
    /// Worker-reported failure.
    Failed { reason: Option<String> },
    /// The initiating API call failed before any push event arrived.
    RequestFailed { reason: String },
}

impl JobEvent {
    /// Map a wire event type to an event. Unknown types yield `None`.
    pub fn from_type(kind: &str, reason: Option<String>) -> Option<Self> {
        match kind {
            "joined" => Some(JobEvent::Joined),
            "added" => Some(JobEvent::Added),
            "active" => Some(JobEvent::Active),
            "waiting" => Some(JobEvent::Waiting),
            "completed" => Some(JobEvent::Completed),
            "failed" => Some(JobEvent::Failed { reason }),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Joined => "joined",
            JobEvent::Added => "added",
            JobEvent::Active => "active",
            JobEvent::Waiting => "waiting",
            JobEvent::Completed => "completed",
            JobEvent::Failed { .. } => "failed",
            JobEvent::RequestFailed { .. } => "request_failed",
        }
    }

    /// State the job lands in when the event applies.
    pub fn target(&self) -> Status {
        match self {
            JobEvent::Joined => Status::Joined,
            JobEvent::Added => Status::Queued,
            JobEvent::Active => Status::Active,
            JobEvent::Waiting => Status::Waiting,
            JobEvent::Completed => Status::Completed,
            JobEvent::Failed { .. } | JobEvent::RequestFailed { .. } => Status::Failed,
        }
    }

    /// Human-readable log message for the event.
    pub fn message(&self) -> String {
        match self {
            JobEvent::Joined => MSG_JOINED.to_string(),
            JobEvent::Added => MSG_ADDED.to_string(),
            JobEvent::Active => MSG_ACTIVE.to_string(),
            JobEvent::Waiting => MSG_WAITING.to_string(),
            JobEvent::Completed => MSG_COMPLETED.to_string(),
            JobEvent::Failed { reason: None } => MSG_FAILED.to_string(),
            JobEvent::Failed {
                reason: Some(reason),
            } => format!("{MSG_FAILED} Reason: {reason}"),
            JobEvent::RequestFailed { reason } => format!("Failed to start job: {reason}"),
        }
    }
}

/// Whether `event` is accepted while a job sits in `state`.
pub fn accepts(state: Status, event: &JobEvent) -> bool {
    if state.is_terminal() {
        return false;
    }
    match event {
        JobEvent::Joined => state == Status::Queued,
        JobEvent::Added => matches!(state, Status::Queued | Status::Joined),
        JobEvent::Waiting => matches!(state, Status::Queued | Status::Joined | Status::Waiting),
        JobEvent::Active
        | JobEvent::Completed
        | JobEvent::Failed { .. }
        | JobEvent::RequestFailed { .. } => true,
    }
}

/// Apply `event` to `job`, stamping the new log entry with `at`.
///
/// Returns `None` when the event is not accepted in the job's state.
pub fn transition(job: &Job, event: &JobEvent, at: Timestamp) -> Option<Job> {
    if !accepts(job.state, event) {
        return None;
    }
    let mut next = job.clone();
    next.state = event.target();
    next.log.push(ProgressEvent::new(next.state, event.message(), at));
    Some(next)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use verse_core::job::JobKind;

    use super::*;

    fn job_in(state: Status) -> Job {
        let mut job = Job::queued(JobKind::Text, "J1", Utc::now());
        job.state = state;
        job
    }

    fn all_events() -> Vec<JobEvent> {
        vec![
            JobEvent::Joined,
            JobEvent::Added,
            JobEvent::Active,
            JobEvent::Waiting,
            JobEvent::Completed,
            JobEvent::Failed { reason: None },
            JobEvent::RequestFailed {
                reason: "boom".into(),
            },
        ]
    }

    #[test]
    fn table_rows_are_accepted() {
        let cases = [
            (Status::Queued, JobEvent::Joined, Status::Joined),
            (Status::Queued, JobEvent::Added, Status::Queued),
            (Status::Joined, JobEvent::Added, Status::Queued),
            (Status::Queued, JobEvent::Waiting, Status::Waiting),
            (Status::Joined, JobEvent::Waiting, Status::Waiting),
            (Status::Waiting, JobEvent::Waiting, Status::Waiting),
            (Status::Waiting, JobEvent::Active, Status::Active),
            (Status::Joined, JobEvent::Active, Status::Active),
            (Status::Active, JobEvent::Completed, Status::Completed),
            (Status::Queued, JobEvent::Failed { reason: None }, Status::Failed),
        ];
        for (from, event, to) in cases {
            let next = transition(&job_in(from), &event, Utc::now())
                .unwrap_or_else(|| panic!("{from} + {} should apply", event.name()));
            assert_eq!(next.state, to, "{from} + {}", event.name());
        }
    }

    #[test]
    fn off_table_events_are_ignored() {
        assert!(transition(&job_in(Status::Active), &JobEvent::Joined, Utc::now()).is_none());
        assert!(transition(&job_in(Status::Joined), &JobEvent::Joined, Utc::now()).is_none());
        assert!(transition(&job_in(Status::Active), &JobEvent::Added, Utc::now()).is_none());
        assert!(transition(&job_in(Status::Active), &JobEvent::Waiting, Utc::now()).is_none());
        assert!(transition(&job_in(Status::Waiting), &JobEvent::Added, Utc::now()).is_none());
    }

    #[test]
    fn terminal_states_absorb_everything() {
        for terminal in [Status::Completed, Status::Failed] {
            for event in all_events() {
                assert!(
                    transition(&job_in(terminal), &event, Utc::now()).is_none(),
                    "{terminal} must absorb {}",
                    event.name()
                );
            }
        }
    }

    #[test]
    fn transition_appends_exactly_one_entry() {
        let job = job_in(Status::Queued);
        let at = Utc::now();
        let next = transition(&job, &JobEvent::Active, at).unwrap();

        assert_eq!(next.log.len(), job.log.len() + 1);
        assert_eq!(&next.log[..job.log.len()], &job.log[..]);
        let entry = next.log.last().unwrap();
        assert_eq!(entry.status, Status::Active);
        assert_eq!(entry.message, MSG_ACTIVE);
        assert_eq!(entry.timestamp, at);
    }

    #[test]
    fn input_job_is_left_untouched() {
        let job = job_in(Status::Queued);
        let before = job.clone();
        let _ = transition(&job, &JobEvent::Completed, Utc::now());
        assert_eq!(job, before);
    }

    #[test]
    fn failure_messages_carry_reason() {
        assert_eq!(JobEvent::Failed { reason: None }.message(), MSG_FAILED);
        assert_eq!(
            JobEvent::Failed {
                reason: Some("tts quota exceeded".into())
            }
            .message(),
            format!("{MSG_FAILED} Reason: tts quota exceeded")
        );
        assert_eq!(
            JobEvent::RequestFailed {
                reason: "Journal not found (status 404)".into()
            }
            .message(),
            "Failed to start job: Journal not found (status 404)"
        );
    }

    #[test]
    fn from_type_maps_wire_names() {
        assert_eq!(JobEvent::from_type("joined", None), Some(JobEvent::Joined));
        assert_eq!(
            JobEvent::from_type("failed", Some("x".into())),
            Some(JobEvent::Failed {
                reason: Some("x".into())
            })
        );
        assert_eq!(JobEvent::from_type("complete", None), None);
        assert_eq!(JobEvent::from_type("progress", None), None);
    }
}
