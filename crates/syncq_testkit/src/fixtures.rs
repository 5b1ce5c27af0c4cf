//! Test fixtures.
//!
//! Builders for the payloads and messages most tests need, using one
//! sample user and course throughout.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use syncq_core::{
    payload_hash, CapturedEvent, ContextSource, DataDir, LocalId, ManualClock, SharedClock,
};
use syncq_sync_protocol::{
    classify_event, CourseData, CourseRef, EnrolmentData, EventContext, EventInfo, EventPayload,
    EventType, GradeItemRef, GradeSnapshot, NodeStamp, ObjectSnapshot, UpdateAction, UpdateType,
    UploadItem, UserData, UserRef, WireUpdate,
};
use tempfile::TempDir;

/// Username of the sample user.
pub const SAMPLE_USERNAME: &str = "jdoe";
/// Email of the sample user.
pub const SAMPLE_EMAIL: &str = "jdoe@example.org";
/// External id of the sample user.
pub const SAMPLE_USER_IDNUMBER: &str = "S-100";
/// Short name of the sample course.
pub const SAMPLE_COURSE: &str = "MATH101";
/// External id of the sample course.
pub const SAMPLE_COURSE_IDNUMBER: &str = "M101";
/// External id of the sample grade item.
pub const SAMPLE_GRADE_ITEM: &str = "FE-1";
/// Name of the sample grade item.
pub const SAMPLE_GRADE_ITEM_NAME: &str = "Final exam";

/// Event name of a grade change.
pub const USER_GRADED: &str = "\\core\\event\\user_graded";

/// The sample user as a leaf sees it.
pub fn sample_user() -> UserRef {
    UserRef {
        local_id: 4,
        username: SAMPLE_USERNAME.into(),
        email: SAMPLE_EMAIL.into(),
        idnumber: SAMPLE_USER_IDNUMBER.into(),
    }
}

/// The sample course as a leaf sees it.
pub fn sample_course() -> CourseRef {
    CourseRef {
        local_id: 3,
        shortname: SAMPLE_COURSE.into(),
        idnumber: SAMPLE_COURSE_IDNUMBER.into(),
    }
}

/// A grade snapshot for the sample grade item.
pub fn grade_snapshot(local_id: LocalId, raw_grade: f64) -> ObjectSnapshot {
    ObjectSnapshot::GradeGrades(GradeSnapshot {
        local_id,
        user_id: 4,
        raw_grade: Some(raw_grade),
        final_grade: Some(raw_grade),
        feedback: None,
        item: Some(GradeItemRef {
            item_type: "mod".into(),
            item_module: Some("quiz".into()),
            item_instance: Some(1),
            item_name: Some(SAMPLE_GRADE_ITEM_NAME.into()),
            idnumber: Some(SAMPLE_GRADE_ITEM.into()),
        }),
    })
}

/// An event about the sample user in the sample course.
pub fn event_info(event_name: &str, object: Option<&ObjectSnapshot>, time_created: i64) -> EventInfo {
    EventInfo {
        event_name: event_name.into(),
        component: "core".into(),
        action: "updated".into(),
        target: "user".into(),
        object_table: object.map(|o| o.table().to_string()),
        object_id: object.map(ObjectSnapshot::local_id),
        related_user_id: Some(4),
        user_id: 2,
        course_id: Some(3),
        time_created,
        other: None,
    }
}

/// A payload with the sample context.
pub fn event_payload(
    node_id: &str,
    event_name: &str,
    object: Option<ObjectSnapshot>,
    time_created: i64,
) -> EventPayload {
    EventPayload::new(
        event_info(event_name, object.as_ref(), time_created),
        EventContext {
            user: Some(sample_user()),
            course: Some(sample_course()),
            object,
            files: Vec::new(),
        },
        NodeStamp {
            id: node_id.into(),
            timestamp: time_created,
        },
    )
}

/// A grade payload for the sample user, course and grade item.
pub fn grade_payload(node_id: &str, grade_id: LocalId, raw_grade: f64, time_created: i64) -> EventPayload {
    event_payload(
        node_id,
        USER_GRADED,
        Some(grade_snapshot(grade_id, raw_grade)),
        time_created,
    )
}

/// Classifies a payload; unreplicated event names fall back to
/// [`EventType::Unknown`].
pub fn captured(payload: EventPayload) -> CapturedEvent {
    let (event_type, priority) = classify_event(&payload.event.event_name)
        .unwrap_or_else(|| (EventType::Unknown(payload.event.event_name.clone()), 5));
    CapturedEvent::new(event_type, priority, payload)
}

/// An upload item as a leaf would send it.
pub fn upload_item(id: u64, payload: EventPayload) -> UploadItem {
    let event = captured(payload);
    UploadItem {
        id,
        event_type: event.event_type,
        event_name: event.payload.event.event_name.clone(),
        object_table: event.payload.event.object_table.clone(),
        object_id: event.payload.event.object_id,
        priority: event.priority,
        payload_hash: payload_hash(&event.payload).expect("payload hashes"),
        time_created: event.payload.event.time_created,
        payload: event.payload,
    }
}

/// A course as the hub publishes it.
pub fn course_data(id: i64, shortname: &str) -> CourseData {
    CourseData {
        id,
        fullname: format!("{shortname} (full)"),
        shortname: shortname.into(),
        idnumber: format!("{shortname}-ID"),
        summary: String::new(),
        visible: true,
        start_date: 0,
        end_date: 0,
    }
}

/// A user as the hub publishes it.
pub fn user_data(id: i64, username: &str) -> UserData {
    UserData {
        id,
        username: username.into(),
        email: format!("{username}@example.org"),
        firstname: username.into(),
        lastname: "Test".into(),
        idnumber: String::new(),
        suspended: false,
    }
}

/// An enrolment as the hub publishes it.
pub fn enrolment_data(user_id: i64, course_id: i64) -> EnrolmentData {
    EnrolmentData {
        user_id,
        course_id,
        status: 0,
        time_start: 0,
        time_end: 0,
        role: Some("student".into()),
    }
}

/// A downloaded update.
pub fn wire_update<T: Serialize>(
    id: u64,
    update_type: UpdateType,
    action: UpdateAction,
    timestamp: i64,
    data: &T,
) -> WireUpdate {
    WireUpdate {
        id,
        update_type,
        action,
        priority: 3,
        timestamp,
        data: serde_json::to_value(data).expect("fixture data serializes"),
    }
}

/// A manual clock, shared and as a trait object.
pub fn manual_clock(start: i64) -> (Arc<ManualClock>, SharedClock) {
    let clock = Arc::new(ManualClock::new(start));
    let shared: SharedClock = clock.clone();
    (clock, shared)
}

/// A [`ContextSource`] backed by maps.
#[derive(Debug, Default, Clone)]
pub struct StaticContext {
    /// Users by local id.
    pub users: HashMap<LocalId, UserRef>,
    /// Courses by local id.
    pub courses: HashMap<LocalId, CourseRef>,
    /// Objects by (table, local id).
    pub objects: HashMap<(String, LocalId), ObjectSnapshot>,
}

impl StaticContext {
    /// A context holding the sample user and course.
    pub fn sample() -> Self {
        let mut context = Self::default();
        context.users.insert(4, sample_user());
        context.courses.insert(3, sample_course());
        context
    }

    /// Adds an object snapshot.
    pub fn with_object(mut self, object: ObjectSnapshot) -> Self {
        self.objects
            .insert((object.table().to_string(), object.local_id()), object);
        self
    }
}

impl ContextSource for StaticContext {
    fn user(&self, id: LocalId) -> Option<UserRef> {
        self.users.get(&id).cloned()
    }

    fn course(&self, id: LocalId) -> Option<CourseRef> {
        self.courses.get(&id).cloned()
    }

    fn object(&self, table: &str, id: LocalId) -> Option<ObjectSnapshot> {
        self.objects.get(&(table.to_string(), id)).cloned()
    }
}

/// A locked data directory in a temporary location.
pub struct TempDataDir {
    /// The locked directory.
    pub dir: DataDir,
    _temp: TempDir,
}

impl TempDataDir {
    /// Creates a fresh directory.
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        let dir = DataDir::open(temp.path(), true).expect("Failed to open data directory");
        Self { dir, _temp: temp }
    }
}

impl Default for TempDataDir {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TempDataDir {
    type Target = DataDir;

    fn deref(&self) -> &Self::Target {
        &self.dir
    }
}
