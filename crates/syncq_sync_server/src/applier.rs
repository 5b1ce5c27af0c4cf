//! Applies uploaded leaf events to hub records.
//!
//! Each item is handled on its own; an error in one item becomes an
//! `error` result for that item and the batch carries on. Writes to the
//! same hub row are serialized by a per-row lock so the last-write-wins
//! comparison always sees the current row.

use crate::directory::{CourseField, HubDirectory, RecordFamily, RecordKey, UserField};
use crate::error::ServerResult;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use syncq_core::{HubId, LocalId, MappingStore, SharedClock, Timestamp};
use syncq_sync_protocol::{
    ActivityRef, ConflictPolicy, CourseRef, EventPayload, EventType, ItemResult, ObjectSnapshot,
    Resolution, UploadItem, UserRef,
};

const COURSE_COMPLETED: &str = "\\core\\event\\course_completed";
const ROW_LOCK_PRUNE_AT: usize = 1024;

/// Result of applying one item.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// Applied, or acknowledged without mutation.
    Success {
        /// Affected hub row.
        hub_id: Option<HubId>,
        /// Detail.
        message: String,
    },
    /// The hub row is newer and was left alone.
    Conflict {
        /// The hub row that won.
        hub_id: HubId,
        /// Detail.
        message: String,
    },
    /// Could not be applied.
    Error {
        /// Reason.
        message: String,
    },
}

impl ApplyOutcome {
    fn success(hub_id: Option<HubId>, message: impl Into<String>) -> Self {
        Self::Success {
            hub_id,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Converts to the wire result for queue item `id`.
    pub fn into_item_result(self, id: u64) -> ItemResult {
        match self {
            Self::Success { hub_id, message } => ItemResult::success(id, hub_id, message),
            Self::Conflict { hub_id, message } => ItemResult::conflict(id, hub_id, message),
            Self::Error { message } => ItemResult::error(id, message),
        }
    }
}

#[derive(Default)]
struct RowLocks {
    rows: Mutex<HashMap<RecordKey, Arc<Mutex<()>>>>,
}

impl RowLocks {
    fn row(&self, key: RecordKey) -> Arc<Mutex<()>> {
        let mut rows = self.rows.lock();
        if rows.len() >= ROW_LOCK_PRUNE_AT {
            rows.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        Arc::clone(rows.entry(key).or_default())
    }
}

/// A pending hub write.
struct Write<'a> {
    node_id: &'a str,
    key: RecordKey,
    table: &'static str,
    local_id: LocalId,
    event_time: Timestamp,
    data: serde_json::Value,
    label: &'static str,
}

/// Applies uploaded events against a [`HubDirectory`].
pub struct HubApplier {
    directory: Arc<dyn HubDirectory>,
    mappings: Arc<MappingStore>,
    policy: ConflictPolicy,
    locks: RowLocks,
    clock: SharedClock,
}

impl HubApplier {
    /// Creates an applier.
    pub fn new(
        directory: Arc<dyn HubDirectory>,
        mappings: Arc<MappingStore>,
        policy: ConflictPolicy,
        clock: SharedClock,
    ) -> Self {
        Self {
            directory,
            mappings,
            policy,
            locks: RowLocks::default(),
            clock,
        }
    }

    /// Applies one item uploaded by `node_id`. Never fails; errors are
    /// reported as [`ApplyOutcome::Error`].
    pub fn apply(&self, node_id: &str, item: &UploadItem) -> ApplyOutcome {
        match self.dispatch(node_id, item) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(node_id, item_id = item.id, error = %e, "apply failed");
                ApplyOutcome::error(e.to_string())
            }
        }
    }

    /// Applies a batch in order and returns one result per item.
    pub fn apply_batch(&self, node_id: &str, items: &[UploadItem]) -> Vec<ItemResult> {
        items
            .iter()
            .map(|item| self.apply(node_id, item).into_item_result(item.id))
            .collect()
    }

    fn dispatch(&self, node_id: &str, item: &UploadItem) -> ServerResult<ApplyOutcome> {
        let payload = &item.payload;
        match &item.event_type {
            EventType::Grade => self.apply_grade(node_id, payload),
            EventType::Submission => self.apply_submission(node_id, payload),
            EventType::Quiz => self.apply_quiz_attempt(node_id, payload),
            EventType::Forum => self.apply_forum_post(node_id, payload),
            EventType::Completion => self.apply_completion(node_id, payload),
            EventType::Enrol => Ok(self.acknowledge_enrolment(payload)),
            EventType::User => Ok(self.acknowledge_user(payload)),
            EventType::Unknown(tag) => Ok(ApplyOutcome::error(format!(
                "Unknown event type: {tag}"
            ))),
        }
    }

    /// Resolves a user by idnumber, then email, then username.
    pub fn resolve_user(&self, user: Option<&UserRef>) -> Option<HubId> {
        let user = user?;
        [
            (UserField::IdNumber, &user.idnumber),
            (UserField::Email, &user.email),
            (UserField::Username, &user.username),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .find_map(|(field, value)| self.directory.find_user(field, value))
    }

    /// Resolves a course by idnumber, then shortname.
    pub fn resolve_course(&self, course: Option<&CourseRef>) -> Option<HubId> {
        let course = course?;
        [
            (CourseField::IdNumber, &course.idnumber),
            (CourseField::Shortname, &course.shortname),
        ]
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .find_map(|(field, value)| self.directory.find_course(field, value))
    }

    fn user_and_course(&self, payload: &EventPayload) -> Result<(HubId, HubId), ApplyOutcome> {
        let user = self
            .resolve_user(payload.context.user.as_ref())
            .ok_or_else(|| ApplyOutcome::error("User not found on hub"))?;
        let course = self
            .resolve_course(payload.context.course.as_ref())
            .ok_or_else(|| ApplyOutcome::error("Course not found on hub"))?;
        Ok((user, course))
    }

    fn activity(
        &self,
        course: HubId,
        module: &str,
        activity: Option<&ActivityRef>,
    ) -> Option<HubId> {
        let activity = activity?;
        self.directory.find_activity(
            course,
            module,
            activity.idnumber.as_deref(),
            activity.name.as_deref(),
        )
    }

    fn apply_grade(&self, node_id: &str, payload: &EventPayload) -> ServerResult<ApplyOutcome> {
        let Some(ObjectSnapshot::GradeGrades(grade)) = &payload.context.object else {
            return Ok(ApplyOutcome::error("Missing grade data"));
        };
        let (user, course) = match self.user_and_course(payload) {
            Ok(ids) => ids,
            Err(outcome) => return Ok(outcome),
        };
        let item = grade.item.as_ref().and_then(|item| {
            self.directory
                .find_grade_item(course, item.idnumber.as_deref(), item.item_name.as_deref())
        });
        let Some(item) = item else {
            return Ok(ApplyOutcome::error("Grade item not found on hub"));
        };

        self.write(Write {
            node_id,
            key: RecordKey::new(RecordFamily::Grade, item, user),
            table: "grade_grades",
            local_id: grade.local_id,
            event_time: payload.event.time_created,
            data: json!({
                "rawGrade": grade.raw_grade,
                "finalGrade": grade.final_grade,
                "feedback": grade.feedback,
            }),
            label: "Grade",
        })
    }

    fn apply_submission(&self, node_id: &str, payload: &EventPayload) -> ServerResult<ApplyOutcome> {
        let Some(ObjectSnapshot::AssignSubmission(submission)) = &payload.context.object else {
            return Ok(ApplyOutcome::error("Missing submission data"));
        };
        let (user, course) = match self.user_and_course(payload) {
            Ok(ids) => ids,
            Err(outcome) => return Ok(outcome),
        };
        let Some(assignment) = self.activity(course, "assign", submission.activity.as_ref()) else {
            return Ok(ApplyOutcome::error("Assignment not found on hub"));
        };

        self.write(Write {
            node_id,
            key: RecordKey::new(RecordFamily::Submission, assignment, user),
            table: "assign_submission",
            local_id: submission.local_id,
            event_time: payload.event.time_created,
            data: json!({
                "status": submission.status,
                "timeModified": submission.time_modified,
            }),
            label: "Submission",
        })
    }

    fn apply_quiz_attempt(&self, node_id: &str, payload: &EventPayload) -> ServerResult<ApplyOutcome> {
        let Some(ObjectSnapshot::QuizAttempts(attempt)) = &payload.context.object else {
            return Ok(ApplyOutcome::error("Missing quiz attempt data"));
        };
        let (user, course) = match self.user_and_course(payload) {
            Ok(ids) => ids,
            Err(outcome) => return Ok(outcome),
        };
        let Some(quiz) = self.activity(course, "quiz", attempt.activity.as_ref()) else {
            return Ok(ApplyOutcome::error("Quiz not found on hub"));
        };

        self.write(Write {
            node_id,
            key: RecordKey::new(RecordFamily::QuizAttempt, quiz, user)
                .with_discriminator(attempt.attempt),
            table: "quiz_attempts",
            local_id: attempt.local_id,
            event_time: payload.event.time_created,
            data: json!({
                "attempt": attempt.attempt,
                "state": attempt.state,
                "sumGrades": attempt.sum_grades,
                "timeFinish": attempt.time_finish,
            }),
            label: "Quiz attempt",
        })
    }

    fn apply_forum_post(&self, node_id: &str, payload: &EventPayload) -> ServerResult<ApplyOutcome> {
        let Some(ObjectSnapshot::ForumPosts(post)) = &payload.context.object else {
            return Ok(ApplyOutcome::error("Missing forum post data"));
        };
        let (user, course) = match self.user_and_course(payload) {
            Ok(ids) => ids,
            Err(outcome) => return Ok(outcome),
        };

        let mapped = self
            .mappings
            .mapper(node_id)
            .resolve("forum_posts", post.local_id)
            .and_then(|hub_id| self.directory.get_record(hub_id));
        let key = match mapped {
            Some(record) => record.key,
            None => RecordKey::new(RecordFamily::ForumPost, course, user)
                .with_discriminator(post.created),
        };

        self.write(Write {
            node_id,
            key,
            table: "forum_posts",
            local_id: post.local_id,
            event_time: payload.event.time_created,
            data: json!({
                "subject": post.subject,
                "message": post.message,
                "created": post.created,
            }),
            label: "Forum post",
        })
    }

    fn apply_completion(&self, node_id: &str, payload: &EventPayload) -> ServerResult<ApplyOutcome> {
        let (user, course) = match self.user_and_course(payload) {
            Ok(ids) => ids,
            Err(outcome) => return Ok(outcome),
        };

        match &payload.context.object {
            Some(ObjectSnapshot::CourseModulesCompletion(completion)) => {
                let module = completion
                    .activity
                    .as_ref()
                    .map(|a| a.module.as_str())
                    .unwrap_or_default();
                let Some(cm) = self.activity(course, module, completion.activity.as_ref()) else {
                    return Ok(ApplyOutcome::error("Course module not found on hub"));
                };
                self.write(Write {
                    node_id,
                    key: RecordKey::new(RecordFamily::ModuleCompletion, cm, user),
                    table: "course_modules_completion",
                    local_id: completion.local_id,
                    event_time: payload.event.time_created,
                    data: json!({
                        "completionState": completion.completion_state,
                        "timeModified": completion.time_modified,
                    }),
                    label: "Completion",
                })
            }
            _ if payload.event.event_name == COURSE_COMPLETED => self.write(Write {
                node_id,
                key: RecordKey::new(RecordFamily::CourseCompletion, course, user),
                table: "course_completions",
                local_id: payload.event.object_id.unwrap_or_default(),
                event_time: payload.event.time_created,
                data: json!({ "timeCompleted": payload.event.time_created }),
                label: "Course completion",
            }),
            _ => Ok(ApplyOutcome::error("Missing completion data")),
        }
    }

    fn acknowledge_enrolment(&self, payload: &EventPayload) -> ApplyOutcome {
        match self.user_and_course(payload) {
            Ok((user, _)) => ApplyOutcome::success(Some(user), "Enrolment acknowledged"),
            Err(outcome) => outcome,
        }
    }

    fn acknowledge_user(&self, payload: &EventPayload) -> ApplyOutcome {
        match self.resolve_user(payload.context.user.as_ref()) {
            Some(user) => ApplyOutcome::success(Some(user), "User event acknowledged"),
            None => ApplyOutcome::error("User not found on hub"),
        }
    }

    fn write(&self, write: Write<'_>) -> ServerResult<ApplyOutcome> {
        let row = self.locks.row(write.key);
        let _guard = row.lock();
        let mapper = self.mappings.mapper(write.node_id);

        let Some(existing) = self.directory.find_record(&write.key) else {
            let hub_id = self
                .directory
                .insert_record(write.key, write.data, self.clock.now())?;
            mapper.upsert(write.table, write.local_id, hub_id, None)?;
            tracing::debug!(node_id = write.node_id, hub_id, table = write.table, "hub record created");
            return Ok(ApplyOutcome::success(
                Some(hub_id),
                format!("{} created", write.label),
            ));
        };

        match self.policy.resolve(existing.time_modified, write.event_time) {
            Resolution::KeepExisting => {
                tracing::info!(
                    node_id = write.node_id,
                    hub_id = existing.id,
                    hub_modified = existing.time_modified,
                    event_time = write.event_time,
                    "conflict: hub record is newer"
                );
                Ok(ApplyOutcome::Conflict {
                    hub_id: existing.id,
                    message: format!("Hub {} is newer", write.label.to_lowercase()),
                })
            }
            Resolution::ApplyIncoming => {
                self.directory
                    .update_record(existing.id, write.data, self.clock.now())?;
                mapper.upsert(write.table, write.local_id, existing.id, None)?;
                Ok(ApplyOutcome::success(
                    Some(existing.id),
                    format!("{} updated", write.label),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryHubDirectory;
    use syncq_core::ManualClock;
    use syncq_sync_protocol::{
        EventContext, EventInfo, ForumPostSnapshot, GradeItemRef, GradeSnapshot, ItemStatus,
        NodeStamp,
    };

    struct Hub {
        applier: HubApplier,
        directory: Arc<MemoryHubDirectory>,
        mappings: Arc<MappingStore>,
        clock: Arc<ManualClock>,
        user: HubId,
        item: HubId,
    }

    fn hub() -> Hub {
        let clock = Arc::new(ManualClock::new(100));
        let directory = Arc::new(MemoryHubDirectory::new());
        let user = directory.add_user("jdoe", "jdoe@example.org", "S-100");
        let course = directory.add_course("MATH101", "M101");
        let item = directory.add_grade_item(course, "FE-1", "Final exam");
        let mappings = Arc::new(MappingStore::in_memory(clock.clone()));
        let applier = HubApplier::new(
            directory.clone(),
            mappings.clone(),
            ConflictPolicy::LastWriteWins,
            clock.clone(),
        );
        Hub {
            applier,
            directory,
            mappings,
            clock,
            user,
            item,
        }
    }

    fn user_ref() -> UserRef {
        UserRef {
            local_id: 4,
            username: "jdoe".into(),
            email: "jdoe@example.org".into(),
            idnumber: "S-100".into(),
        }
    }

    fn course_ref() -> CourseRef {
        CourseRef {
            local_id: 3,
            shortname: "MATH101".into(),
            idnumber: "M101".into(),
        }
    }

    fn item(id: u64, event_type: EventType, event_name: &str, time: i64, object: Option<ObjectSnapshot>) -> UploadItem {
        let payload = EventPayload::new(
            EventInfo {
                event_name: event_name.into(),
                component: "core".into(),
                action: "graded".into(),
                target: "user".into(),
                object_table: object.as_ref().map(|o| o.table().to_string()),
                object_id: object.as_ref().map(ObjectSnapshot::local_id),
                related_user_id: Some(4),
                user_id: 2,
                course_id: Some(3),
                time_created: time,
                other: None,
            },
            EventContext {
                user: Some(user_ref()),
                course: Some(course_ref()),
                object,
                files: Vec::new(),
            },
            NodeStamp {
                id: "leaf-a".into(),
                timestamp: time,
            },
        );
        UploadItem {
            id,
            event_type,
            event_name: event_name.into(),
            object_table: payload.event.object_table.clone(),
            object_id: payload.event.object_id,
            priority: 1,
            payload,
            payload_hash: format!("hash-{id}"),
            time_created: time,
        }
    }

    fn grade(id: u64, local_id: i64, raw: f64, time: i64) -> UploadItem {
        let snapshot = ObjectSnapshot::GradeGrades(GradeSnapshot {
            local_id,
            user_id: 4,
            raw_grade: Some(raw),
            final_grade: Some(raw),
            feedback: None,
            item: Some(GradeItemRef {
                item_type: "mod".into(),
                item_module: Some("assign".into()),
                item_instance: Some(1),
                item_name: Some("Final exam".into()),
                idnumber: Some("FE-1".into()),
            }),
        });
        item(id, EventType::Grade, "\\core\\event\\user_graded", time, Some(snapshot))
    }

    fn raw_grade(hub: &Hub, hub_id: HubId) -> f64 {
        hub.directory.get_record(hub_id).unwrap().data["rawGrade"]
            .as_f64()
            .unwrap()
    }

    #[test]
    fn new_grade_is_created_and_mapped() {
        let hub = hub();
        let outcome = hub.applier.apply("leaf-a", &grade(1, 17, 80.0, 90));
        let ApplyOutcome::Success { hub_id: Some(hub_id), .. } = outcome else {
            panic!("expected success, got {outcome:?}");
        };
        assert_eq!(hub.mappings.mapper("leaf-a").resolve("grade_grades", 17), Some(hub_id));
        let record = hub.directory.get_record(hub_id).unwrap();
        assert_eq!(record.key, RecordKey::new(RecordFamily::Grade, hub.item, hub.user));
    }

    #[test]
    fn equal_timestamp_overwrites() {
        let hub = hub();
        let first = hub.applier.apply("leaf-a", &grade(1, 17, 80.0, 50));
        let ApplyOutcome::Success { hub_id: Some(hub_id), .. } = first else {
            panic!("expected success");
        };
        assert!(hub.directory.touch(hub_id, 100));

        let outcome = hub.applier.apply("leaf-a", &grade(2, 17, 90.0, 100));
        assert!(matches!(outcome, ApplyOutcome::Success { .. }));
        assert_eq!(raw_grade(&hub, hub_id), 90.0);
    }

    #[test]
    fn older_event_conflicts_without_mutation() {
        let hub = hub();
        let ApplyOutcome::Success { hub_id: Some(hub_id), .. } =
            hub.applier.apply("leaf-a", &grade(1, 17, 80.0, 50))
        else {
            panic!("expected success");
        };
        hub.directory.touch(hub_id, 100);

        let outcome = hub.applier.apply("leaf-a", &grade(2, 17, 90.0, 90));
        assert_eq!(
            outcome,
            ApplyOutcome::Conflict {
                hub_id,
                message: "Hub grade is newer".into()
            }
        );
        assert_eq!(raw_grade(&hub, hub_id), 80.0);
        assert_eq!(hub.directory.get_record(hub_id).unwrap().time_modified, 100);
    }

    #[test]
    fn user_resolution_precedence() {
        let hub = hub();
        let by_email = hub.directory.add_user("other", "other@example.org", "");
        let by_username = hub.directory.add_user("third", "", "");

        let mut user = user_ref();
        assert_eq!(hub.applier.resolve_user(Some(&user)), Some(hub.user));

        user.idnumber = "unknown".into();
        user.email = "other@example.org".into();
        assert_eq!(hub.applier.resolve_user(Some(&user)), Some(by_email));

        user.email = "nobody@example.org".into();
        user.username = "third".into();
        assert_eq!(hub.applier.resolve_user(Some(&user)), Some(by_username));

        user.username = "ghost".into();
        assert_eq!(hub.applier.resolve_user(Some(&user)), None);
        assert_eq!(hub.applier.resolve_user(None), None);
    }

    #[test]
    fn unresolvable_user_is_an_item_error() {
        let hub = hub();
        let mut upload = grade(1, 17, 80.0, 50);
        upload.payload.context.user = Some(UserRef {
            local_id: 9,
            username: "ghost".into(),
            ..UserRef::default()
        });
        assert_eq!(
            hub.applier.apply("leaf-a", &upload),
            ApplyOutcome::Error {
                message: "User not found on hub".into()
            }
        );
    }

    #[test]
    fn batch_continues_past_failures() {
        let hub = hub();
        let unknown = item(2, EventType::Unknown("badge".into()), "\\core\\event\\badge_awarded", 50, None);
        let results = hub.applier.apply_batch(
            "leaf-a",
            &[grade(1, 17, 80.0, 50), unknown, grade(3, 18, 70.0, 50)],
        );
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, ItemStatus::Success);
        assert_eq!(results[1].status, ItemStatus::Error);
        assert_eq!(results[1].message, "Unknown event type: badge");
        assert_eq!(results[2].status, ItemStatus::Success);
    }

    #[test]
    fn forum_posts_follow_their_mapping() {
        let hub = hub();
        let post = |subject: &str, time: i64| {
            let snapshot = ObjectSnapshot::ForumPosts(ForumPostSnapshot {
                local_id: 31,
                discussion: 2,
                user_id: 4,
                subject: subject.into(),
                message: "body".into(),
                created: 40,
            });
            item(1, EventType::Forum, "\\mod_forum\\event\\post_created", time, Some(snapshot))
        };

        hub.clock.set(10);
        hub.applier.apply("leaf-a", &post("first", 50));
        hub.applier.apply("leaf-a", &post("edited", 60));
        assert_eq!(hub.directory.record_count(RecordFamily::ForumPost), 1);
        let hub_id = hub.mappings.mapper("leaf-a").resolve("forum_posts", 31).unwrap();
        assert_eq!(hub.directory.get_record(hub_id).unwrap().data["subject"], "edited");
    }

    #[test]
    fn enrolment_and_user_events_are_acknowledged() {
        let hub = hub();
        let enrol = item(1, EventType::Enrol, "\\core\\event\\user_enrolment_created", 50, None);
        assert_eq!(
            hub.applier.apply("leaf-a", &enrol),
            ApplyOutcome::Success {
                hub_id: Some(hub.user),
                message: "Enrolment acknowledged".into()
            }
        );
        let user = item(2, EventType::User, "\\core\\event\\user_updated", 50, None);
        assert!(matches!(hub.applier.apply("leaf-a", &user), ApplyOutcome::Success { .. }));
    }

    #[test]
    fn concurrent_writes_to_one_row_create_it_once() {
        let hub = Arc::new(hub());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let hub = Arc::clone(&hub);
                std::thread::spawn(move || {
                    let node = format!("leaf-{i}");
                    hub.applier.apply(&node, &grade(i, 17, 50.0 + i as f64, 200))
                })
            })
            .collect();
        for handle in handles {
            assert!(matches!(handle.join().unwrap(), ApplyOutcome::Success { .. }));
        }
        assert_eq!(hub.directory.record_count(RecordFamily::Grade), 1);
    }
}
