//! The job-progress tracking core.
//!
//! [`JobTracker`] ties the registry, the dispatcher, the shared channel
//! connection and the completion hooks together. Every method takes
//! `&mut self` and runs to completion without suspending, so the
//! presence check in [`JobTracker::start`] and the subscription it makes
//! happen in one turn.
//!
//! Nothing is returned as an error across this boundary except invalid
//! input: transport and API failures become `failed` transitions.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use verse_channel::api::{GenerationApiError, StartResponse};
use verse_channel::connection::ChannelConnection;
use verse_channel::messages::{ChannelSignal, InboundFrame, OutboundFrame};
use verse_core::clock::Clock;
use verse_core::error::CoreError;
use verse_core::job::{Job, JobId, JobKind, ProgressEvent, Status};
use verse_core::types::Timestamp;

use crate::dispatcher::EventDispatcher;
use crate::events::{TrackerEvent, EVENT_CHANNEL_CAPACITY};
use crate::hooks::{CompletionHooks, RecordCache};
use crate::machine::JobEvent;
use crate::registry::JobRegistry;

/// Result of [`JobTracker::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub job_id: JobId,
    /// `false` when a live or failed job for the pair was already present.
    pub created: bool,
    /// Tag of the run this id currently names. A later run of the same
    /// pair gets a higher tag.
    pub attempt: u64,
}

pub struct JobTracker {
    registry: JobRegistry,
    dispatcher: EventDispatcher,
    connection: ChannelConnection,
    hooks: CompletionHooks,
    clock: Arc<dyn Clock>,
    /// Jobs currently holding a connection reference.
    leases: HashSet<JobId>,
    /// Attempt tag of every tracked job.
    attempts: HashMap<JobId, u64>,
    last_attempt: u64,
    event_tx: broadcast::Sender<TrackerEvent>,
}

impl JobTracker {
    pub fn new(
        mut connection: ChannelConnection,
        cache: Arc<dyn RecordCache>,
        clock: Arc<dyn Clock>,
        settle_delay: Duration,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let disconnect_tx = event_tx.clone();
        connection.on_disconnect(Box::new(move |reason| {
            tracing::warn!(reason, "Event source disconnected");
            let _ = disconnect_tx.send(TrackerEvent::Disconnected {
                reason: reason.to_string(),
            });
        }));

        Self {
            registry: JobRegistry::new(),
            dispatcher: EventDispatcher::new(),
            connection,
            hooks: CompletionHooks::new(cache, settle_delay),
            clock,
            leases: HashSet::new(),
            attempts: HashMap::new(),
            last_attempt: 0,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<TrackerEvent> {
        self.event_tx.clone()
    }

    /// Start tracking a `kind` job for `entity_id`.
    ///
    /// If a live or failed job for the pair is present its id is
    /// returned and nothing else happens; a failed job must be dismissed
    /// before it can be retried. A completed job still waiting out its
    /// settle delay is dismissed and replaced. Otherwise a `queued` job
    /// is created, the connection is taken, the job's channels are
    /// subscribed and a join request is sent.
    pub fn start(&mut self, kind: JobKind, entity_id: &str) -> Result<StartOutcome, CoreError> {
        if entity_id.trim().is_empty() {
            return Err(CoreError::Validation("entity id must not be empty".into()));
        }

        let job_id = JobId::derive(kind, entity_id);
        match self.registry.get(&job_id).map(|job| job.state) {
            Some(Status::Completed) => {
                tracing::info!(job_id = %job_id, "Replacing settled job");
                self.dismiss(&job_id);
            }
            Some(state) => {
                tracing::debug!(job_id = %job_id, state = %state, "Job already tracked");
                let attempt = self.attempts.get(&job_id).copied().unwrap_or_default();
                return Ok(StartOutcome {
                    job_id,
                    created: false,
                    attempt,
                });
            }
            None => {}
        }

        self.last_attempt += 1;
        let attempt = self.last_attempt;
        self.attempts.insert(job_id.clone(), attempt);

        let job = Job::queued(kind, entity_id, self.clock.now());
        let initial = job.log.clone();
        self.registry.insert(job);
        for entry in initial {
            self.publish(TrackerEvent::Progress {
                job_id: job_id.clone(),
                entry,
            });
        }

        if let Err(e) = self.connection.ensure_connected() {
            tracing::error!(job_id = %job_id, error = %e, "Failed to open event source");
            self.fail_request(&job_id, e.to_string());
            return Ok(StartOutcome {
                job_id,
                created: true,
                attempt,
            });
        }
        self.leases.insert(job_id.clone());
        self.dispatcher.subscribe(&job_id);

        if let Err(e) = self.connection.send(&OutboundFrame::join(&job_id)) {
            tracing::error!(job_id = %job_id, error = %e, "Failed to send join request");
            self.fail_request(&job_id, e.to_string());
        } else {
            tracing::info!(job_id = %job_id, "Join request sent");
        }

        Ok(StartOutcome {
            job_id,
            created: true,
            attempt,
        })
    }

    /// Remove a job and tear down whatever it still holds.
    ///
    /// Returns `false` when the job was not tracked.
    pub fn dismiss(&mut self, job_id: &JobId) -> bool {
        let Some(job) = self.registry.remove(job_id) else {
            tracing::debug!(job_id = %job_id, "Dismiss for unknown job");
            return false;
        };

        self.dispatcher.unsubscribe(job_id);
        if self.leases.remove(job_id) {
            self.connection.release();
        }
        self.hooks.forget(job_id);
        self.attempts.remove(job_id);

        tracing::info!(job_id = %job_id, state = %job.state, "Job dismissed");
        self.publish(TrackerEvent::Dismissed {
            job_id: job_id.clone(),
        });
        true
    }

    pub fn get(&self, job_id: &JobId) -> Option<&Job> {
        self.registry.get(job_id)
    }

    /// The job's log, oldest first. Empty for unknown jobs.
    pub fn progress_log(&self, job_id: &JobId) -> Vec<ProgressEvent> {
        self.registry
            .get(job_id)
            .map(|job| job.log.clone())
            .unwrap_or_default()
    }

    /// `false` for unknown jobs.
    pub fn is_terminal(&self, job_id: &JobId) -> bool {
        self.registry.get(job_id).is_some_and(Job::is_terminal)
    }

    pub fn handle_signal(&mut self, signal: ChannelSignal) {
        match signal {
            ChannelSignal::Connected => {
                tracing::info!(jobs = self.registry.live_count(), "Event source connected");
            }
            ChannelSignal::Frame(frame) => self.handle_frame(&frame),
            ChannelSignal::Disconnected { reason } => self.connection.handle_disconnect(&reason),
        }
    }

    /// Route one inbound frame to its job, if any.
    pub fn handle_frame(&mut self, frame: &InboundFrame) {
        let Some(routed) = self.dispatcher.route(frame) else {
            return;
        };
        self.apply(&routed.job_id, &routed.event);
    }

    /// Record the outcome of the request-start API call made for
    /// `attempt` of `job_id`.
    ///
    /// Results for an attempt that has since been dismissed or replaced
    /// are discarded.
    pub fn handle_start_result(
        &mut self,
        job_id: &JobId,
        attempt: u64,
        result: Result<StartResponse, GenerationApiError>,
    ) {
        let current = self.attempts.get(job_id).copied();
        if current != Some(attempt) {
            tracing::debug!(
                job_id = %job_id,
                attempt,
                current = ?current,
                "Start result for a superseded attempt, discarding",
            );
            return;
        }
        match result {
            Ok(response) if response.job_id == job_id.as_str() => {
                tracing::debug!(job_id = %job_id, state = %response.state, "Generation enqueued");
            }
            Ok(response) => {
                tracing::warn!(
                    job_id = %job_id,
                    returned = %response.job_id,
                    "Backend returned a different job id",
                );
                self.fail_request(
                    job_id,
                    format!("backend returned job id {}", response.job_id),
                );
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Start request failed");
                self.fail_request(job_id, e.to_string());
            }
        }
    }

    /// Fail `job_id` immediately with a request-failure entry.
    pub fn fail_request(&mut self, job_id: &JobId, reason: String) {
        self.apply(job_id, &JobEvent::RequestFailed { reason });
    }

    pub fn settle_deadline(&self, job_id: &JobId) -> Option<Timestamp> {
        self.hooks.settle_deadline(job_id)
    }

    pub fn next_settle_deadline(&self) -> Option<Timestamp> {
        self.hooks.next_deadline()
    }

    /// Time left until the earliest settle deadline, zero if overdue.
    pub fn next_settle_in(&self) -> Option<Duration> {
        let deadline = self.hooks.next_deadline()?;
        Some(
            (deadline - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }

    /// Dismiss every completed job whose settle deadline has passed.
    pub fn expire_settled(&mut self) -> Vec<JobId> {
        let due = self.hooks.take_due(self.clock.now());
        due.into_iter()
            .filter(|job_id| self.dismiss(job_id))
            .collect()
    }

    pub fn connection(&self) -> &ChannelConnection {
        &self.connection
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Unsubscribe everything and close the connection regardless of
    /// outstanding references. Jobs stay readable.
    pub fn shutdown(&mut self) {
        for job_id in self.registry.ids() {
            self.dispatcher.unsubscribe(&job_id);
        }
        self.leases.clear();
        self.connection.close_all();
        tracing::info!(jobs = self.registry.len(), "Tracker shut down");
    }

    // ---- private helpers ----

    fn apply(&mut self, job_id: &JobId, event: &JobEvent) {
        let now = self.clock.now();
        let Some(applied) = self.registry.apply(job_id, event, now) else {
            match self.registry.get(job_id) {
                Some(job) => tracing::debug!(
                    job_id = %job_id,
                    state = %job.state,
                    event = event.name(),
                    "Event does not apply in current state, ignoring",
                ),
                None => tracing::debug!(job_id = %job_id, "Event for unknown job, discarding"),
            }
            return;
        };

        tracing::debug!(job_id = %job_id, state = %applied.state, "Job progressed");
        self.publish(TrackerEvent::Progress {
            job_id: job_id.clone(),
            entry: applied.entry,
        });

        if !applied.entered_terminal {
            return;
        }
        let holds_lease = self.leases.remove(job_id);
        if let Some(job) = self.registry.get(job_id) {
            self.hooks.run(
                job,
                now,
                &mut self.dispatcher,
                &mut self.connection,
                holds_lease,
            );
        }
        if applied.state == Status::Failed {
            tracing::warn!(job_id = %job_id, "Job failed");
        } else {
            tracing::info!(job_id = %job_id, "Job completed");
        }
        self.publish(TrackerEvent::Terminal {
            job_id: job_id.clone(),
            status: applied.state,
        });
    }

    fn publish(&self, event: TrackerEvent) {
        // No receivers is fine.
        let _ = self.event_tx.send(event);
    }
}
