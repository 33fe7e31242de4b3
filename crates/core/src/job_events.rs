//! Push-channel event name constants for generation jobs.
//!
//! Shared by the frame codec in `verse-channel` and the dispatcher in
//! `verse-tracker`. Per-job acknowledgements arrive on a channel named
//! after the job id itself, so there is no constant for them.

/// Outbound request asking the worker to attach us to a job's room.
pub const EVENT_JOIN: &str = "poem:join";

/// Payload `type` of the per-job room acknowledgement.
pub const JOINED_TYPE: &str = "joined";

/// Job accepted into the remote queue.
pub const EVENT_JOB_ADDED: &str = "job:added";

/// Job picked up by a worker.
pub const EVENT_JOB_ACTIVE: &str = "job:active";

/// Job waiting behind a backlog.
pub const EVENT_JOB_WAITING: &str = "job:waiting";

/// Job finished successfully.
pub const EVENT_JOB_COMPLETED: &str = "job:completed";

/// Job failed on the worker.
pub const EVENT_JOB_FAILED: &str = "job:failed";

/// Every global lifecycle channel a tracked job listens on.
pub const LIFECYCLE_EVENTS: &[&str] = &[
    EVENT_JOB_ADDED,
    EVENT_JOB_ACTIVE,
    EVENT_JOB_WAITING,
    EVENT_JOB_FAILED,
    EVENT_JOB_COMPLETED,
];
