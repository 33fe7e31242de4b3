//! Event dispatcher.
//!
//! Keeps an explicit subscription table: for every channel name, the
//! set of job ids listening on it. Subscribing a job registers it on its
//! own acknowledgement channel (named after the job id) and on every
//! global `job:*` lifecycle channel. [`EventDispatcher::route`] turns an
//! inbound frame into a `(JobId, JobEvent)` pair only when the frame's
//! job is subscribed on the frame's channel.

use std::collections::{BTreeSet, HashMap, HashSet};

use verse_channel::messages::InboundFrame;
use verse_core::job::JobId;
use verse_core::job_events::{JOINED_TYPE, LIFECYCLE_EVENTS};

use crate::machine::JobEvent;

/// An inbound frame resolved to a subscribed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    pub job_id: JobId,
    pub event: JobEvent,
}

#[derive(Debug, Default)]
pub struct EventDispatcher {
    /// Channel name -> job ids listening on it.
    listeners: HashMap<String, BTreeSet<JobId>>,
    subscribed: HashSet<JobId>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `job_id` on its acknowledgement channel and every
    /// lifecycle channel. Returns `false` if it was already subscribed.
    pub fn subscribe(&mut self, job_id: &JobId) -> bool {
        if !self.subscribed.insert(job_id.clone()) {
            return false;
        }
        for channel in Self::channels_for(job_id) {
            self.listeners
                .entry(channel)
                .or_default()
                .insert(job_id.clone());
        }
        tracing::debug!(job_id = %job_id, "Subscribed to job channels");
        true
    }

    /// Remove exactly the registrations made for `job_id`.
    ///
    /// Idempotent: returns `false` when nothing was registered.
    pub fn unsubscribe(&mut self, job_id: &JobId) -> bool {
        if !self.subscribed.remove(job_id) {
            return false;
        }
        for channel in Self::channels_for(job_id) {
            if let Some(set) = self.listeners.get_mut(&channel) {
                set.remove(job_id);
                if set.is_empty() {
                    self.listeners.remove(&channel);
                }
            }
        }
        tracing::debug!(job_id = %job_id, "Unsubscribed from job channels");
        true
    }

    pub fn is_subscribed(&self, job_id: &JobId) -> bool {
        self.subscribed.contains(job_id)
    }

    /// Number of job ids listening on `channel`.
    pub fn listener_count(&self, channel: &str) -> usize {
        self.listeners.get(channel).map_or(0, BTreeSet::len)
    }

    /// Number of channels with at least one listener.
    pub fn channel_count(&self) -> usize {
        self.listeners.len()
    }

    /// Resolve an inbound frame to a subscribed job and event.
    ///
    /// Frames on channels nobody listens to, frames naming a job that is
    /// not subscribed, and unknown event types all yield `None`.
    pub fn route(&self, frame: &InboundFrame) -> Option<Routed> {
        let Some(listeners) = self.listeners.get(&frame.event) else {
            tracing::debug!(event = %frame.event, "No listeners for event, discarding");
            return None;
        };

        if let Some(kind) = frame.event.strip_prefix("job:") {
            Self::route_lifecycle(frame, kind, listeners)
        } else {
            Self::route_ack(frame, listeners)
        }
    }

    fn route_lifecycle(
        frame: &InboundFrame,
        kind: &str,
        listeners: &BTreeSet<JobId>,
    ) -> Option<Routed> {
        let Some(raw_id) = frame.data.job_id.as_deref() else {
            tracing::warn!(event = %frame.event, "Lifecycle event without jobId, discarding");
            return None;
        };
        let job_id = match JobId::parse(raw_id) {
            Ok(job_id) => job_id,
            Err(e) => {
                tracing::debug!(event = %frame.event, error = %e, "Foreign job id, discarding");
                return None;
            }
        };
        if !listeners.contains(&job_id) {
            tracing::debug!(event = %frame.event, job_id = %job_id, "Stale event, discarding");
            return None;
        }
        if let Some(declared) = frame.data.kind.as_deref() {
            if declared != kind {
                tracing::warn!(
                    event = %frame.event,
                    declared,
                    "Payload type disagrees with channel, using channel",
                );
            }
        }
        let Some(event) = JobEvent::from_type(kind, frame.data.reason.clone()) else {
            tracing::debug!(event = %frame.event, "Unknown lifecycle event, ignoring");
            return None;
        };
        Some(Routed { job_id, event })
    }

    fn route_ack(frame: &InboundFrame, listeners: &BTreeSet<JobId>) -> Option<Routed> {
        let job_id = listeners.iter().find(|id| id.as_str() == frame.event)?;
        match frame.data.kind.as_deref() {
            Some(JOINED_TYPE) | None => Some(Routed {
                job_id: job_id.clone(),
                event: JobEvent::Joined,
            }),
            Some(other) => {
                tracing::debug!(job_id = %job_id, kind = other, "Unknown room event, ignoring");
                None
            }
        }
    }

    fn channels_for(job_id: &JobId) -> impl Iterator<Item = String> + '_ {
        std::iter::once(job_id.to_string()).chain(LIFECYCLE_EVENTS.iter().map(|e| e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use verse_channel::messages::parse_event;
    use verse_core::job::JobKind;
    use verse_core::job_events::EVENT_JOB_ACTIVE;

    use super::*;

    fn text_j1() -> JobId {
        JobId::derive(JobKind::Text, "J1")
    }

    fn lifecycle(event: &str, job_id: &JobId) -> InboundFrame {
        let kind = event.trim_start_matches("job:");
        parse_event(&format!(
            r#"["{event}",{{"type":"{kind}","jobId":"{job_id}"}}]"#
        ))
        .unwrap()
    }

    #[test]
    fn subscribe_registers_ack_and_lifecycle_channels() {
        let mut dispatcher = EventDispatcher::new();
        let id = text_j1();

        assert!(dispatcher.subscribe(&id));

        assert_eq!(dispatcher.channel_count(), 1 + LIFECYCLE_EVENTS.len());
        assert_eq!(dispatcher.listener_count(id.as_str()), 1);
        assert_eq!(dispatcher.listener_count(EVENT_JOB_ACTIVE), 1);
    }

    #[test]
    fn double_subscribe_adds_nothing() {
        let mut dispatcher = EventDispatcher::new();
        let id = text_j1();

        assert!(dispatcher.subscribe(&id));
        assert!(!dispatcher.subscribe(&id));

        assert_eq!(dispatcher.listener_count(EVENT_JOB_ACTIVE), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_job() {
        let mut dispatcher = EventDispatcher::new();
        let text = text_j1();
        let audio = JobId::derive(JobKind::Audio, "J1");
        dispatcher.subscribe(&text);
        dispatcher.subscribe(&audio);

        assert!(dispatcher.unsubscribe(&text));
        assert!(!dispatcher.unsubscribe(&text));

        assert_eq!(dispatcher.listener_count(EVENT_JOB_ACTIVE), 1);
        assert_eq!(dispatcher.listener_count(text.as_str()), 0);
        assert_eq!(dispatcher.listener_count(audio.as_str()), 1);
        assert!(dispatcher.route(&lifecycle(EVENT_JOB_ACTIVE, &text)).is_none());
        assert!(dispatcher.route(&lifecycle(EVENT_JOB_ACTIVE, &audio)).is_some());
    }

    #[test]
    fn unsubscribe_last_job_clears_table() {
        let mut dispatcher = EventDispatcher::new();
        let id = text_j1();
        dispatcher.subscribe(&id);
        dispatcher.unsubscribe(&id);
        assert_eq!(dispatcher.channel_count(), 0);
    }

    #[test]
    fn routes_lifecycle_event_by_job_id() {
        let mut dispatcher = EventDispatcher::new();
        let id = text_j1();
        dispatcher.subscribe(&id);

        let routed = dispatcher.route(&lifecycle(EVENT_JOB_ACTIVE, &id)).unwrap();
        assert_eq!(routed.job_id, id);
        assert_eq!(routed.event, JobEvent::Active);
    }

    #[test]
    fn routes_failure_reason() {
        let mut dispatcher = EventDispatcher::new();
        let id = text_j1();
        dispatcher.subscribe(&id);
        let frame = parse_event(
            r#"["job:failed",{"type":"failed","jobId":"poetry:text:J1","reason":"model overloaded"}]"#,
        )
        .unwrap();

        assert_matches!(
            dispatcher.route(&frame),
            Some(Routed { event: JobEvent::Failed { reason: Some(r) }, .. }) if r == "model overloaded"
        );
    }

    #[test]
    fn routes_room_acknowledgement() {
        let mut dispatcher = EventDispatcher::new();
        let id = text_j1();
        dispatcher.subscribe(&id);
        let frame = parse_event(r#"["poetry:text:J1",{"type":"joined"}]"#).unwrap();

        assert_eq!(
            dispatcher.route(&frame),
            Some(Routed {
                job_id: id,
                event: JobEvent::Joined
            })
        );
    }

    #[test]
    fn discards_unsubscribed_and_malformed_frames() {
        let mut dispatcher = EventDispatcher::new();
        let id = text_j1();
        dispatcher.subscribe(&id);

        let stranger = JobId::derive(JobKind::Text, "J2");
        assert!(dispatcher.route(&lifecycle(EVENT_JOB_ACTIVE, &stranger)).is_none());

        let no_id = parse_event(r#"["job:active",{"type":"active"}]"#).unwrap();
        assert!(dispatcher.route(&no_id).is_none());

        let foreign = parse_event(r#"["job:active",{"type":"active","jobId":"J1"}]"#).unwrap();
        assert!(dispatcher.route(&foreign).is_none());

        let singular =
            parse_event(r#"["job:complete",{"type":"complete","jobId":"poetry:text:J1"}]"#)
                .unwrap();
        assert!(dispatcher.route(&singular).is_none());
    }
}
