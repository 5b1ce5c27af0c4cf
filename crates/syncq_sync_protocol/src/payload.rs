//! Captured event payloads.
//!
//! A payload carries everything the hub needs to apply an event without
//! calling back to the leaf: the raw event fields, natural keys of the
//! related user and course, and a snapshot of the changed object.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// The structured payload stored on a queue item and uploaded to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Raw event fields.
    pub event: EventInfo,
    /// Denormalized context for cross-node resolution.
    pub context: EventContext,
    /// Which leaf captured the event, and when.
    pub node: NodeStamp,
}

impl EventPayload {
    /// Creates a payload.
    pub fn new(event: EventInfo, context: EventContext, node: NodeStamp) -> Self {
        Self {
            event,
            context,
            node,
        }
    }

    /// Bytes that identify the payload content for duplicate suppression.
    ///
    /// The node stamp is left out: it records capture time, so including it
    /// would make a redelivered event look new.
    pub fn digest_input(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(&(&self.event, &self.context)).map_err(ProtocolError::encode)
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(ProtocolError::encode)
    }

    /// Decodes from JSON.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        serde_json::from_slice(bytes).map_err(ProtocolError::decode)
    }
}

/// Fields copied from the triggering event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    /// Fully-qualified event name.
    pub event_name: String,
    /// Component that fired the event.
    pub component: String,
    /// Verb, e.g. `graded`.
    pub action: String,
    /// Target noun, e.g. `user`.
    pub target: String,
    /// Table of the changed object.
    pub object_table: Option<String>,
    /// Leaf-local id of the changed object.
    pub object_id: Option<i64>,
    /// Leaf-local id of the user the event is about.
    pub related_user_id: Option<i64>,
    /// Leaf-local id of the acting user.
    pub user_id: i64,
    /// Leaf-local id of the course.
    pub course_id: Option<i64>,
    /// When the event happened on the leaf (unix seconds).
    pub time_created: i64,
    /// Free-form extra data.
    #[serde(default)]
    pub other: Option<serde_json::Value>,
}

/// Natural keys and object data captured alongside the event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    /// The related user.
    pub user: Option<UserRef>,
    /// The course.
    pub course: Option<CourseRef>,
    /// Snapshot of the changed object.
    pub object: Option<ObjectSnapshot>,
    /// Files attached to a submission.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileInfo>,
}

/// A file attached to a captured event, identified by content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// SHA-1 or SHA-256 hex digest of the file content.
    pub content_hash: String,
    /// File name as uploaded.
    pub filename: String,
    /// Size in bytes.
    pub filesize: u64,
    /// MIME type.
    pub mimetype: String,
}

/// Natural keys of a leaf user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    /// Leaf-local id.
    pub local_id: i64,
    /// Login name.
    #[serde(default)]
    pub username: String,
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// External identifier shared across nodes.
    #[serde(default)]
    pub idnumber: String,
}

/// Natural keys of a leaf course.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRef {
    /// Leaf-local id.
    pub local_id: i64,
    /// Short name.
    #[serde(default)]
    pub shortname: String,
    /// External identifier shared across nodes.
    #[serde(default)]
    pub idnumber: String,
}

/// Leaf identity stamped on a payload at capture time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStamp {
    /// Leaf node id.
    pub id: String,
    /// Capture time (unix seconds).
    pub timestamp: i64,
}

/// Table-specific snapshot of the object an event changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum ObjectSnapshot {
    /// A row of `grade_grades`.
    GradeGrades(GradeSnapshot),
    /// A row of `assign_submission`.
    AssignSubmission(SubmissionSnapshot),
    /// A row of `quiz_attempts`.
    QuizAttempts(QuizAttemptSnapshot),
    /// A row of `forum_posts`.
    ForumPosts(ForumPostSnapshot),
    /// A row of `user_enrolments`.
    UserEnrolments(EnrolmentSnapshot),
    /// A row of `course_modules_completion`.
    CourseModulesCompletion(CompletionSnapshot),
}

impl ObjectSnapshot {
    /// Returns the source table name.
    pub fn table(&self) -> &'static str {
        match self {
            Self::GradeGrades(_) => "grade_grades",
            Self::AssignSubmission(_) => "assign_submission",
            Self::QuizAttempts(_) => "quiz_attempts",
            Self::ForumPosts(_) => "forum_posts",
            Self::UserEnrolments(_) => "user_enrolments",
            Self::CourseModulesCompletion(_) => "course_modules_completion",
        }
    }

    /// Returns the leaf-local id of the snapshotted row.
    pub fn local_id(&self) -> i64 {
        match self {
            Self::GradeGrades(s) => s.local_id,
            Self::AssignSubmission(s) => s.local_id,
            Self::QuizAttempts(s) => s.local_id,
            Self::ForumPosts(s) => s.local_id,
            Self::UserEnrolments(s) => s.local_id,
            Self::CourseModulesCompletion(s) => s.local_id,
        }
    }
}

/// Snapshot of a grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSnapshot {
    /// Leaf-local grade id.
    pub local_id: i64,
    /// Leaf-local user id.
    pub user_id: i64,
    /// Raw grade.
    pub raw_grade: Option<f64>,
    /// Final grade.
    pub final_grade: Option<f64>,
    /// Feedback text.
    #[serde(default)]
    pub feedback: Option<String>,
    /// The grade item this grade belongs to.
    #[serde(default)]
    pub item: Option<GradeItemRef>,
}

/// Natural keys of a grade item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeItemRef {
    /// Item type, e.g. `mod` or `manual`.
    pub item_type: String,
    /// Module name for activity items.
    #[serde(default)]
    pub item_module: Option<String>,
    /// Leaf-local activity instance.
    #[serde(default)]
    pub item_instance: Option<i64>,
    /// Display name.
    #[serde(default)]
    pub item_name: Option<String>,
    /// External identifier.
    #[serde(default)]
    pub idnumber: Option<String>,
}

/// Natural keys of a course activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRef {
    /// Module name, e.g. `assign`.
    pub module: String,
    /// Leaf-local instance id.
    pub instance: i64,
    /// Activity name.
    #[serde(default)]
    pub name: Option<String>,
    /// External identifier of the course module.
    #[serde(default)]
    pub idnumber: Option<String>,
}

/// Snapshot of an assignment submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSnapshot {
    /// Leaf-local submission id.
    pub local_id: i64,
    /// Leaf-local assignment id.
    pub assignment: i64,
    /// Leaf-local user id.
    pub user_id: i64,
    /// Submission status, e.g. `submitted`.
    pub status: String,
    /// Last change on the leaf.
    pub time_modified: i64,
    /// The assignment activity.
    #[serde(default)]
    pub activity: Option<ActivityRef>,
}

/// Snapshot of a quiz attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizAttemptSnapshot {
    /// Leaf-local attempt id.
    pub local_id: i64,
    /// Leaf-local quiz id.
    pub quiz: i64,
    /// Leaf-local user id.
    pub user_id: i64,
    /// Attempt number.
    pub attempt: i64,
    /// Attempt state, e.g. `finished`.
    pub state: String,
    /// Sum of question grades.
    pub sum_grades: Option<f64>,
    /// Finish time.
    pub time_finish: i64,
    /// The quiz activity.
    #[serde(default)]
    pub activity: Option<ActivityRef>,
}

/// Snapshot of a forum post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForumPostSnapshot {
    /// Leaf-local post id.
    pub local_id: i64,
    /// Leaf-local discussion id.
    pub discussion: i64,
    /// Leaf-local author id.
    pub user_id: i64,
    /// Subject line.
    pub subject: String,
    /// Body.
    pub message: String,
    /// Creation time.
    pub created: i64,
}

/// Snapshot of a user enrolment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolmentSnapshot {
    /// Leaf-local enrolment id.
    pub local_id: i64,
    /// Leaf-local user id.
    pub user_id: i64,
    /// 0 active, 1 suspended.
    pub status: i64,
    /// Enrolment start.
    pub time_start: i64,
    /// Enrolment end, 0 for open-ended.
    pub time_end: i64,
    /// Enrolment plugin, e.g. `manual`.
    #[serde(default)]
    pub enrol_method: Option<String>,
}

/// Snapshot of an activity completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSnapshot {
    /// Leaf-local completion id.
    pub local_id: i64,
    /// Leaf-local user id.
    pub user_id: i64,
    /// Completion state code.
    pub completion_state: i64,
    /// Last change on the leaf.
    pub time_modified: i64,
    /// The completed activity.
    #[serde(default)]
    pub activity: Option<ActivityRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grade_payload(stamp: i64) -> EventPayload {
        EventPayload::new(
            EventInfo {
                event_name: "\\core\\event\\user_graded".into(),
                component: "core".into(),
                action: "graded".into(),
                target: "user".into(),
                object_table: Some("grade_grades".into()),
                object_id: Some(17),
                related_user_id: Some(5),
                user_id: 2,
                course_id: Some(3),
                time_created: 1_700_000_000,
                other: None,
            },
            EventContext {
                user: Some(UserRef {
                    local_id: 5,
                    username: "jdoe".into(),
                    email: "jdoe@example.org".into(),
                    idnumber: "S-0005".into(),
                }),
                course: Some(CourseRef {
                    local_id: 3,
                    shortname: "MATH101".into(),
                    idnumber: "C-MATH101".into(),
                }),
                object: Some(ObjectSnapshot::GradeGrades(GradeSnapshot {
                    local_id: 17,
                    user_id: 5,
                    raw_grade: Some(80.0),
                    final_grade: Some(80.0),
                    feedback: None,
                    item: None,
                })),
                files: Vec::new(),
            },
            NodeStamp {
                id: "school-a".into(),
                timestamp: stamp,
            },
        )
    }

    #[test]
    fn snapshot_is_tagged_by_table() {
        let payload = grade_payload(1);
        let json: serde_json::Value = serde_json::from_slice(&payload.encode().unwrap()).unwrap();
        assert_eq!(json["context"]["object"]["table"], "grade_grades");
        assert_eq!(json["context"]["object"]["rawGrade"], 80.0);
        assert_eq!(json["event"]["eventName"], "\\core\\event\\user_graded");
    }

    #[test]
    fn digest_input_ignores_node_stamp() {
        let a = grade_payload(100).digest_input().unwrap();
        let b = grade_payload(200).digest_input().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn files_are_omitted_when_empty_and_change_the_digest() {
        let plain = grade_payload(1);
        let json: serde_json::Value = serde_json::from_slice(&plain.encode().unwrap()).unwrap();
        assert!(json["context"].get("files").is_none());

        let mut with_file = grade_payload(1);
        with_file.context.files.push(FileInfo {
            content_hash: "ab12".into(),
            filename: "essay.pdf".into(),
            filesize: 2_048,
            mimetype: "application/pdf".into(),
        });
        let json: serde_json::Value = serde_json::from_slice(&with_file.encode().unwrap()).unwrap();
        assert_eq!(json["context"]["files"][0]["contentHash"], "ab12");
        assert_ne!(plain.digest_input().unwrap(), with_file.digest_input().unwrap());

        let decoded = EventPayload::decode(&with_file.encode().unwrap()).unwrap();
        assert_eq!(decoded.context.files, with_file.context.files);
    }

    #[test]
    fn decode_restores_snapshot_variant() {
        let payload = grade_payload(1);
        let decoded = EventPayload::decode(&payload.encode().unwrap()).unwrap();
        let object = decoded.context.object.unwrap();
        assert_eq!(object.table(), "grade_grades");
        assert_eq!(object.local_id(), 17);
    }
}
