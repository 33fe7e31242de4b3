//! Tracked generation jobs and their progress log.
//!
//! A [`Job`] is keyed by a [`JobId`] that is derived deterministically
//! from its [`JobKind`] and entity id, so a caller that comes back to an
//! in-flight job computes the same identifier the remote worker uses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{EntityId, Timestamp};

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// Which generation family a job belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Journal entry -> poem.
    Text,
    /// Poem -> narrated audio.
    Audio,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Text => "text",
            JobKind::Audio => "audio",
        }
    }

    /// Message of the synthetic `idle` entry that opens every log.
    pub fn ready_message(self) -> &'static str {
        match self {
            JobKind::Text => "Ready to generate poem",
            JobKind::Audio => "Ready to generate poem audio",
        }
    }

    /// Message of the `queued` entry written when the job is started.
    pub fn started_message(self) -> &'static str {
        match self {
            JobKind::Text => "Poem generation started",
            JobKind::Audio => "Poem audio generation started",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(JobKind::Text),
            "audio" => Ok(JobKind::Audio),
            other => Err(CoreError::UnknownKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// Prefix shared by every generation job id on the event source.
pub const JOB_ID_SCOPE: &str = "poetry";

/// Routing key of a job: `"poetry:<kind>:<entityId>"`, the same string
/// the event source uses to name the job.
///
/// Doubles as the name of the per-job acknowledgement channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Compute the id for `(kind, entity_id)`.
    pub fn derive(kind: JobKind, entity_id: &str) -> Self {
        Self(format!("{JOB_ID_SCOPE}:{}:{entity_id}", kind.as_str()))
    }

    /// Parse an id received from the wire, checking it follows the
    /// derivation convention.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let mut parts = raw.splitn(3, ':');
        let (Some(scope), Some(kind), Some(entity)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(CoreError::InvalidJobId(
                raw.to_string(),
                "expected poetry:<kind>:<entityId>",
            ));
        };
        if scope != JOB_ID_SCOPE {
            return Err(CoreError::InvalidJobId(raw.to_string(), "unknown scope"));
        }
        kind.parse::<JobKind>()?;
        if entity.is_empty() {
            return Err(CoreError::InvalidJobId(raw.to_string(), "empty entity id"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Kind segment of the id. Only meaningful for ids built via
    /// [`derive`](Self::derive) or [`parse`](Self::parse).
    pub fn kind(&self) -> Option<JobKind> {
        self.0.split(':').nth(1).and_then(|k| k.parse().ok())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Status / ProgressEvent
// ---------------------------------------------------------------------------

/// State of a tracked job. Also the status stamped on each log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Idle,
    Queued,
    Active,
    Waiting,
    Joined,
    Completed,
    Failed,
}

impl Status {
    /// `completed` and `failed` absorb every later event.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Idle => "idle",
            Status::Queued => "queued",
            Status::Active => "active",
            Status::Waiting => "waiting",
            Status::Joined => "joined",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable entry of a job's progress log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub status: Status,
    pub message: String,
    pub timestamp: Timestamp,
}

impl ProgressEvent {
    pub fn new(status: Status, message: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            status,
            message: message.into(),
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One tracked run of a generation task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub entity_id: EntityId,
    pub state: Status,
    /// Append-only, insertion ordered.
    pub log: Vec<ProgressEvent>,
    pub started_at: Timestamp,
}

impl Job {
    /// A freshly started job: state `queued`, log `[idle, queued]`.
    pub fn queued(kind: JobKind, entity_id: impl Into<EntityId>, at: Timestamp) -> Self {
        let entity_id = entity_id.into();
        Self {
            id: JobId::derive(kind, &entity_id),
            kind,
            entity_id,
            state: Status::Queued,
            log: vec![
                ProgressEvent::new(Status::Idle, kind.ready_message(), at),
                ProgressEvent::new(Status::Queued, kind.started_message(), at),
            ],
            started_at: at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Statuses of the log entries, oldest first.
    pub fn statuses(&self) -> Vec<Status> {
        self.log.iter().map(|e| e.status).collect()
    }
}
