//! Job-progress tracking core.
//!
//! Tracks long-running remote generation jobs over a shared push
//! channel: one state machine per job, one subscription set per job, one
//! reference-counted connection for all of them.

pub mod config;
pub mod dispatcher;
pub mod events;
pub mod hooks;
pub mod machine;
pub mod registry;
pub mod service;
pub mod tracker;
