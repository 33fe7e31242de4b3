#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio::sync::Notify;
use verse_channel::api::{GenerationApi, GenerationApiError, StartResponse};
use verse_channel::connection::ChannelConnection;
use verse_channel::messages::{parse_event, InboundFrame, OutboundFrame};
use verse_channel::transport::{ChannelError, Transport};
use verse_core::clock::{Clock, ManualClock};
use verse_core::job::{Job, JobId, JobKind};
use verse_core::job_events::EVENT_JOIN;
use verse_tracker::hooks::RecordCache;
use verse_tracker::tracker::JobTracker;

pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// What the fake transport saw.
#[derive(Debug, Default)]
pub struct Wire {
    pub opens: usize,
    pub closes: usize,
    pub sent: Vec<serde_json::Value>,
    pub fail_open: bool,
}

impl Wire {
    /// Join requests sent, as job id strings.
    pub fn joins(&self) -> Vec<String> {
        self.sent
            .iter()
            .filter(|f| f["event"] == EVENT_JOIN)
            .filter_map(|f| f["data"]["jobId"].as_str().map(str::to_string))
            .collect()
    }
}

/// In-memory [`Transport`] recording everything it is asked to do.
pub struct FakeTransport(pub Arc<Mutex<Wire>>);

impl Transport for FakeTransport {
    fn open(&mut self) -> Result<(), ChannelError> {
        let mut wire = self.0.lock().unwrap();
        if wire.fail_open {
            return Err(ChannelError::NoRuntime);
        }
        wire.opens += 1;
        Ok(())
    }

    fn send(&mut self, frame: &OutboundFrame) -> Result<(), ChannelError> {
        let value = serde_json::to_value(frame)?;
        self.0.lock().unwrap().sent.push(value);
        Ok(())
    }

    fn close(&mut self) {
        self.0.lock().unwrap().closes += 1;
    }
}

/// [`RecordCache`] counting invalidations per job.
#[derive(Default)]
pub struct CountingCache {
    pub invalidated: Mutex<Vec<JobId>>,
}

impl CountingCache {
    pub fn count(&self, job_id: &JobId) -> usize {
        self.invalidated
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == job_id)
            .count()
    }
}

impl RecordCache for CountingCache {
    fn invalidate(&self, job: &Job) {
        self.invalidated.lock().unwrap().push(job.id.clone());
    }
}

pub struct Harness {
    pub tracker: JobTracker,
    pub wire: Arc<Mutex<Wire>>,
    pub clock: Arc<ManualClock>,
    pub cache: Arc<CountingCache>,
}

/// A tracker over a fake transport, a counting cache and a manual clock.
pub fn harness() -> Harness {
    harness_with(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap())
}

pub fn harness_with(start: chrono::DateTime<Utc>) -> Harness {
    let wire = Arc::new(Mutex::new(Wire::default()));
    let clock = Arc::new(ManualClock::new(start));
    let cache = Arc::new(CountingCache::default());
    let connection = ChannelConnection::new(Box::new(FakeTransport(Arc::clone(&wire))));
    let tracker = JobTracker::new(
        connection,
        Arc::clone(&cache) as Arc<dyn RecordCache>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        SETTLE_DELAY,
    );
    Harness {
        tracker,
        wire,
        clock,
        cache,
    }
}

/// Frame from a Socket.IO event argument array.
pub fn frame(args: &str) -> InboundFrame {
    parse_event(args).unwrap()
}

/// `["<job id>",{"type":"joined"}]`
pub fn joined(job_id: &JobId) -> InboundFrame {
    frame(&format!(r#"["{job_id}",{{"type":"joined"}}]"#))
}

/// `["job:<kind>",{"type":"<kind>","jobId":"<job id>"}]`
pub fn lifecycle(kind: &str, job_id: &JobId) -> InboundFrame {
    frame(&format!(
        r#"["job:{kind}",{{"type":"{kind}","jobId":"{job_id}"}}]"#
    ))
}

pub fn failed(job_id: &JobId, reason: &str) -> InboundFrame {
    frame(&format!(
        r#"["job:failed",{{"type":"failed","jobId":"{job_id}","reason":"{reason}"}}]"#
    ))
}

/// Scripted [`GenerationApi`] recording every call.
pub struct ScriptedApi {
    pub calls: Mutex<Vec<(JobKind, String)>>,
    script: Box<dyn Fn(JobKind, &str) -> Result<StartResponse, GenerationApiError> + Send + Sync>,
    /// When set, the first call does not answer until notified.
    first_call_gate: Option<Arc<Notify>>,
}

impl ScriptedApi {
    /// Answers with the locally derived job id.
    pub fn accepting() -> Self {
        Self::with(|kind, entity_id| {
            Ok(StartResponse {
                job_id: JobId::derive(kind, entity_id).to_string(),
                state: "waiting".into(),
            })
        })
    }

    pub fn rejecting(status: u16, message: &'static str) -> Self {
        Self::with(move |_, _| {
            Err(GenerationApiError::Api {
                status,
                message: message.to_string(),
            })
        })
    }

    pub fn with(
        script: impl Fn(JobKind, &str) -> Result<StartResponse, GenerationApiError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            script: Box::new(script),
            first_call_gate: None,
        }
    }

    /// Hold the first call's answer until `gate` is notified.
    pub fn holding_first_call(mut self, gate: Arc<Notify>) -> Self {
        self.first_call_gate = Some(gate);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl GenerationApi for ScriptedApi {
    async fn start_generation(
        &self,
        kind: JobKind,
        entity_id: &str,
    ) -> Result<StartResponse, GenerationApiError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((kind, entity_id.to_string()));
            calls.len()
        };
        let result = (self.script)(kind, entity_id);
        if let (1, Some(gate)) = (call, &self.first_call_gate) {
            gate.notified().await;
        }
        result
    }
}
