//! Domain types shared by the Verse job-progress tracking crates.
//!
//! Nothing in here performs I/O: the channel crate moves frames, the
//! tracker crate drives state. This crate only names things.

pub mod clock;
pub mod error;
pub mod job;
pub mod job_events;
pub mod types;
