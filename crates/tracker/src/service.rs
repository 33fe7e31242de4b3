//! Async service around the tracking core.
//!
//! [`TrackerService::spawn`] moves a [`JobTracker`] into a single task
//! that owns it exclusively. The task interleaves, one at a time:
//!
//! - commands from [`TrackerHandle`]s,
//! - signals from the transport (frames, connects, drops),
//! - results of request-start API calls, which run in their own tasks,
//! - the settle timer for completed jobs.
//!
//! Because only this task touches the tracker, the core needs no locks
//! and every operation runs to completion before the next one starts.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use verse_channel::api::{GenerationApi, GenerationApiError, StartResponse};
use verse_channel::messages::ChannelSignal;
use verse_core::error::CoreError;
use verse_core::job::{Job, JobId, JobKind, ProgressEvent};

use crate::events::TrackerEvent;
use crate::tracker::{JobTracker, StartOutcome};

/// Capacity of the handle -> service command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// How long [`TrackerHandle::shutdown`] waits for the loop to exit.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Job id, attempt tag and outcome of one request-start call.
type StartResult = (JobId, u64, Result<StartResponse, GenerationApiError>);

enum Command {
    Start {
        kind: JobKind,
        entity_id: String,
        reply: oneshot::Sender<Result<StartOutcome, CoreError>>,
    },
    Dismiss {
        job_id: JobId,
        reply: oneshot::Sender<bool>,
    },
    Job {
        job_id: JobId,
        reply: oneshot::Sender<Option<Job>>,
    },
    ProgressLog {
        job_id: JobId,
        reply: oneshot::Sender<Vec<ProgressEvent>>,
    },
    IsTerminal {
        job_id: JobId,
        reply: oneshot::Sender<bool>,
    },
}

/// Errors returned by [`TrackerHandle`].
#[derive(Debug, thiserror::Error)]
pub enum TrackerServiceError {
    /// The service loop has exited.
    #[error("Tracker service is not running")]
    Stopped,

    /// The request was rejected before any job was created.
    #[error(transparent)]
    Rejected(#[from] CoreError),
}

pub struct TrackerService {
    tracker: JobTracker,
    api: Arc<dyn GenerationApi>,
    results_tx: mpsc::UnboundedSender<StartResult>,
}

impl TrackerService {
    /// Spawn the service loop on the current runtime.
    ///
    /// `inbound` is the signal receiver paired with the transport inside
    /// the tracker's connection.
    pub fn spawn(
        tracker: JobTracker,
        inbound: mpsc::UnboundedReceiver<ChannelSignal>,
        api: Arc<dyn GenerationApi>,
    ) -> TrackerHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let events = tracker.event_sender();
        let cancel = CancellationToken::new();

        let service = Self {
            tracker,
            api,
            results_tx,
        };
        let cancel_clone = cancel.clone();
        let task_handle = tokio::spawn(async move {
            tracing::info!("Tracker service started");
            service
                .run(commands_rx, inbound, results_rx, &cancel_clone)
                .await;
            tracing::info!("Tracker service exited");
        });

        TrackerHandle {
            commands: commands_tx,
            events,
            cancel,
            task_handle: Arc::new(Mutex::new(Some(task_handle))),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::UnboundedReceiver<ChannelSignal>,
        mut results: mpsc::UnboundedReceiver<StartResult>,
        cancel: &CancellationToken,
    ) {
        loop {
            let settle_in = self.tracker.next_settle_in();

            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    // Every handle is gone.
                    None => break,
                },
                Some(signal) = inbound.recv() => self.tracker.handle_signal(signal),
                Some((job_id, attempt, result)) = results.recv() => {
                    self.tracker.handle_start_result(&job_id, attempt, result);
                }
                _ = settle_timer(settle_in) => {
                    for job_id in self.tracker.expire_settled() {
                        tracing::debug!(job_id = %job_id, "Settled job dismissed");
                    }
                }
            }
        }

        self.tracker.shutdown();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start {
                kind,
                entity_id,
                reply,
            } => {
                let outcome = self.tracker.start(kind, &entity_id);
                if let Ok(started) = &outcome {
                    if started.created && !self.tracker.is_terminal(&started.job_id) {
                        self.request_start(started.job_id.clone(), started.attempt, kind, entity_id);
                    }
                }
                let _ = reply.send(outcome);
            }
            Command::Dismiss { job_id, reply } => {
                let _ = reply.send(self.tracker.dismiss(&job_id));
            }
            Command::Job { job_id, reply } => {
                let _ = reply.send(self.tracker.get(&job_id).cloned());
            }
            Command::ProgressLog { job_id, reply } => {
                let _ = reply.send(self.tracker.progress_log(&job_id));
            }
            Command::IsTerminal { job_id, reply } => {
                let _ = reply.send(self.tracker.is_terminal(&job_id));
            }
        }
    }

    // ---- private helpers ----

    /// Call the generation API off the loop; the result comes back on
    /// the results channel.
    fn request_start(&self, job_id: JobId, attempt: u64, kind: JobKind, entity_id: String) {
        let api = Arc::clone(&self.api);
        let results_tx = self.results_tx.clone();
        tokio::spawn(async move {
            let result = api.start_generation(kind, &entity_id).await;
            let _ = results_tx.send((job_id, attempt, result));
        });
    }
}

async fn settle_timer(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

/// Cloneable handle to a running [`TrackerService`].
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<TrackerEvent>,
    cancel: CancellationToken,
    task_handle: Arc<Mutex<Option<tokio::task::JoinHandle<()>>>>,
}

impl TrackerHandle {
    /// Start (or look up) the job for `kind` and `entity_id`.
    pub async fn start(
        &self,
        kind: JobKind,
        entity_id: &str,
    ) -> Result<StartOutcome, TrackerServiceError> {
        let entity_id = entity_id.to_string();
        let outcome = self
            .request(|reply| Command::Start {
                kind,
                entity_id,
                reply,
            })
            .await?;
        Ok(outcome?)
    }

    pub async fn dismiss(&self, job_id: &JobId) -> Result<bool, TrackerServiceError> {
        let job_id = job_id.clone();
        self.request(|reply| Command::Dismiss { job_id, reply }).await
    }

    /// Snapshot of the job, if tracked.
    pub async fn job(&self, job_id: &JobId) -> Result<Option<Job>, TrackerServiceError> {
        let job_id = job_id.clone();
        self.request(|reply| Command::Job { job_id, reply }).await
    }

    pub async fn progress_log(
        &self,
        job_id: &JobId,
    ) -> Result<Vec<ProgressEvent>, TrackerServiceError> {
        let job_id = job_id.clone();
        self.request(|reply| Command::ProgressLog { job_id, reply })
            .await
    }

    pub async fn is_terminal(&self, job_id: &JobId) -> Result<bool, TrackerServiceError> {
        let job_id = job_id.clone();
        self.request(|reply| Command::IsTerminal { job_id, reply })
            .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Stop the loop, unsubscribe every job and close the connection.
    ///
    /// Waits up to five seconds for the loop to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down tracker service");
        self.cancel.cancel();

        if let Some(task_handle) = self.task_handle.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task_handle)
                .await
                .is_err()
            {
                tracing::warn!("Tracker service did not exit in time");
            }
        }
    }

    // ---- private helpers ----

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, TrackerServiceError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| TrackerServiceError::Stopped)?;
        rx.await.map_err(|_| TrackerServiceError::Stopped)
    }
}
