//! Turning domain events into queueable payloads.

use crate::clock::SharedClock;
use crate::types::LocalId;
use std::collections::HashSet;
use syncq_sync_protocol::{
    classify_event, CourseRef, EventContext, EventInfo, EventPayload, EventType, FileInfo,
    NodeStamp, ObjectSnapshot, UserRef,
};

/// Read access to the leaf's own records, used to denormalize context.
///
/// Lookups return `None` when the record no longer exists; the payload is
/// still captured with whatever context is available.
pub trait ContextSource {
    /// Natural keys of a local user.
    fn user(&self, id: LocalId) -> Option<UserRef>;

    /// Natural keys of a local course.
    fn course(&self, id: LocalId) -> Option<CourseRef>;

    /// Snapshot of a changed object.
    fn object(&self, table: &str, id: LocalId) -> Option<ObjectSnapshot>;

    /// Files attached to a submission event. Only consulted for
    /// submission events.
    fn attachments(&self, _event: &EventInfo) -> Vec<FileInfo> {
        Vec::new()
    }
}

/// A classified event ready to be queued.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedEvent {
    /// Event category.
    pub event_type: EventType,
    /// Dispatch priority, 1 first.
    pub priority: u8,
    /// Structured payload.
    pub payload: EventPayload,
}

impl CapturedEvent {
    /// Creates a captured event with an explicit type and priority.
    pub fn new(event_type: EventType, priority: u8, payload: EventPayload) -> Self {
        Self {
            event_type,
            priority,
            payload,
        }
    }

    /// Classifies a payload by its event name. Returns `None` for events
    /// that are not replicated.
    pub fn classify(payload: EventPayload) -> Option<Self> {
        let (event_type, priority) = classify_event(&payload.event.event_name)?;
        Some(Self::new(event_type, priority, payload))
    }
}

/// Builds payloads for one leaf node.
pub struct EventCapture {
    node_id: String,
    clock: SharedClock,
}

impl EventCapture {
    /// Creates a capture for `node_id`.
    pub fn new(node_id: impl Into<String>, clock: SharedClock) -> Self {
        Self {
            node_id: node_id.into(),
            clock,
        }
    }

    /// Classifies `event` and gathers its context.
    ///
    /// Submission events also carry their attachments, one entry per
    /// distinct content hash. Directory entries (`.`) are skipped.
    pub fn capture(&self, event: EventInfo, source: &dyn ContextSource) -> Option<CapturedEvent> {
        let Some((event_type, _)) = classify_event(&event.event_name) else {
            tracing::trace!(event = %event.event_name, "event not replicated");
            return None;
        };

        let user = event
            .related_user_id
            .or(Some(event.user_id))
            .filter(|id| *id > 0)
            .and_then(|id| source.user(id));
        let course = event.course_id.and_then(|id| source.course(id));
        let object = match (&event.object_table, event.object_id) {
            (Some(table), Some(id)) => source.object(table, id),
            _ => None,
        };

        let node = NodeStamp {
            id: self.node_id.clone(),
            timestamp: self.clock.now(),
        };
        let files = if event_type == EventType::Submission {
            distinct_files(source.attachments(&event))
        } else {
            Vec::new()
        };
        let context = EventContext {
            user,
            course,
            object,
            files,
        };
        CapturedEvent::classify(EventPayload::new(event, context, node))
    }
}

fn distinct_files(files: Vec<FileInfo>) -> Vec<FileInfo> {
    let mut seen = HashSet::new();
    files
        .into_iter()
        .filter(|f| f.filename != "." && !f.content_hash.is_empty())
        .filter(|f| seen.insert(f.content_hash.clone()))
        .collect()
}
