//! The hub's own records, as seen by the applier.
//!
//! Course, user and gradebook storage live outside the sync engine. The
//! applier reaches them only through [`HubDirectory`];
//! [`MemoryHubDirectory`] is a complete in-memory implementation for tests
//! and standalone hubs.

use crate::error::ServerResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use syncq_core::{HubId, Timestamp};

/// Natural-key field of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserField {
    /// External identifier.
    IdNumber,
    /// Email address.
    Email,
    /// Login name.
    Username,
}

/// Natural-key field of a course.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseField {
    /// External identifier.
    IdNumber,
    /// Short name.
    Shortname,
}

/// Kind of hub row an uploaded event writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordFamily {
    /// `grade_grades`, keyed by grade item.
    Grade,
    /// `assign_submission`, keyed by assignment.
    Submission,
    /// `quiz_attempts`, keyed by quiz and attempt number.
    QuizAttempt,
    /// `forum_posts`, keyed by course and creation time.
    ForumPost,
    /// `course_modules_completion`, keyed by course module.
    ModuleCompletion,
    /// `course_completions`, keyed by course.
    CourseCompletion,
}

/// Natural key of a hub row.
///
/// `parent` is the hub id of the owning grade item, activity or course;
/// `discriminator` separates several rows per user (e.g. quiz attempts).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    /// Row kind.
    pub family: RecordFamily,
    /// Owning object.
    pub parent: HubId,
    /// Hub user.
    pub user: HubId,
    /// Extra key component, 0 when unused.
    pub discriminator: i64,
}

impl RecordKey {
    /// Creates a key with no discriminator.
    pub fn new(family: RecordFamily, parent: HubId, user: HubId) -> Self {
        Self {
            family,
            parent,
            user,
            discriminator: 0,
        }
    }

    /// Sets the discriminator.
    pub fn with_discriminator(mut self, discriminator: i64) -> Self {
        self.discriminator = discriminator;
        self
    }
}

/// A hub row as read for conflict checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubRecord {
    /// Hub id.
    pub id: HubId,
    /// Natural key.
    pub key: RecordKey,
    /// Row data.
    pub data: serde_json::Value,
    /// Creation time.
    pub time_created: Timestamp,
    /// Last modification time, compared against event times.
    pub time_modified: Timestamp,
}

/// Access to the hub's records.
pub trait HubDirectory: Send + Sync {
    /// Finds a user by one natural-key field.
    fn find_user(&self, field: UserField, value: &str) -> Option<HubId>;

    /// Finds a course by one natural-key field.
    fn find_course(&self, field: CourseField, value: &str) -> Option<HubId>;

    /// Finds a grade item in a course by idnumber, else by name.
    fn find_grade_item(
        &self,
        course: HubId,
        idnumber: Option<&str>,
        name: Option<&str>,
    ) -> Option<HubId>;

    /// Finds an activity of `module` in a course by idnumber, else by name.
    fn find_activity(
        &self,
        course: HubId,
        module: &str,
        idnumber: Option<&str>,
        name: Option<&str>,
    ) -> Option<HubId>;

    /// Reads a row by natural key.
    fn find_record(&self, key: &RecordKey) -> Option<HubRecord>;

    /// Reads a row by hub id.
    fn get_record(&self, id: HubId) -> Option<HubRecord>;

    /// Inserts a row and returns its hub id.
    fn insert_record(
        &self,
        key: RecordKey,
        data: serde_json::Value,
        now: Timestamp,
    ) -> ServerResult<HubId>;

    /// Overwrites a row's data and touches its modification time.
    fn update_record(&self, id: HubId, data: serde_json::Value, now: Timestamp)
        -> ServerResult<()>;
}

/// A hub user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HubUser {
    /// Hub id.
    pub id: HubId,
    /// Login name.
    pub username: String,
    /// Email.
    pub email: String,
    /// External identifier.
    pub idnumber: String,
}

/// A hub course.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct HubCourse {
    /// Hub id.
    pub id: HubId,
    /// Short name.
    pub shortname: String,
    /// External identifier.
    pub idnumber: String,
}

#[derive(Debug, Clone)]
struct Named {
    id: HubId,
    course: HubId,
    module: String,
    idnumber: String,
    name: String,
}

#[derive(Default)]
struct Inner {
    next_id: HubId,
    users: Vec<HubUser>,
    courses: Vec<HubCourse>,
    grade_items: Vec<Named>,
    activities: Vec<Named>,
    records: HashMap<HubId, HubRecord>,
    by_key: HashMap<RecordKey, HubId>,
}

impl Inner {
    fn allocate(&mut self) -> HubId {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`HubDirectory`].
#[derive(Default)]
pub struct MemoryHubDirectory {
    inner: RwLock<Inner>,
}

impl MemoryHubDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user and returns its id.
    pub fn add_user(&self, username: &str, email: &str, idnumber: &str) -> HubId {
        let mut inner = self.inner.write();
        let id = inner.allocate();
        inner.users.push(HubUser {
            id,
            username: username.into(),
            email: email.into(),
            idnumber: idnumber.into(),
        });
        id
    }

    /// Adds a course and returns its id.
    pub fn add_course(&self, shortname: &str, idnumber: &str) -> HubId {
        let mut inner = self.inner.write();
        let id = inner.allocate();
        inner.courses.push(HubCourse {
            id,
            shortname: shortname.into(),
            idnumber: idnumber.into(),
        });
        id
    }

    /// Adds a grade item and returns its id.
    pub fn add_grade_item(&self, course: HubId, idnumber: &str, name: &str) -> HubId {
        let mut inner = self.inner.write();
        let id = inner.allocate();
        inner.grade_items.push(Named {
            id,
            course,
            module: String::new(),
            idnumber: idnumber.into(),
            name: name.into(),
        });
        id
    }

    /// Adds an activity and returns its id.
    pub fn add_activity(&self, course: HubId, module: &str, idnumber: &str, name: &str) -> HubId {
        let mut inner = self.inner.write();
        let id = inner.allocate();
        inner.activities.push(Named {
            id,
            course,
            module: module.into(),
            idnumber: idnumber.into(),
            name: name.into(),
        });
        id
    }

    /// Sets a row's modification time, as a hub-side edit would.
    pub fn touch(&self, id: HubId, time_modified: Timestamp) -> bool {
        match self.inner.write().records.get_mut(&id) {
            Some(record) => {
                record.time_modified = time_modified;
                true
            }
            None => false,
        }
    }

    /// Number of rows of a family.
    pub fn record_count(&self, family: RecordFamily) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|r| r.key.family == family)
            .count()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn find_named(items: &[Named], course: HubId, module: Option<&str>, idnumber: Option<&str>, name: Option<&str>) -> Option<HubId> {
    let in_scope = |n: &&Named| n.course == course && module.map_or(true, |m| n.module == m);
    if let Some(idnumber) = non_empty(idnumber) {
        return items
            .iter()
            .filter(in_scope)
            .find(|n| n.idnumber == idnumber)
            .map(|n| n.id);
    }
    let name = non_empty(name)?;
    items
        .iter()
        .filter(in_scope)
        .find(|n| n.name == name)
        .map(|n| n.id)
}

impl HubDirectory for MemoryHubDirectory {
    fn find_user(&self, field: UserField, value: &str) -> Option<HubId> {
        if value.is_empty() {
            return None;
        }
        let inner = self.inner.read();
        inner
            .users
            .iter()
            .find(|u| match field {
                UserField::IdNumber => u.idnumber == value,
                UserField::Email => u.email == value,
                UserField::Username => u.username == value,
            })
            .map(|u| u.id)
    }

    fn find_course(&self, field: CourseField, value: &str) -> Option<HubId> {
        if value.is_empty() {
            return None;
        }
        let inner = self.inner.read();
        inner
            .courses
            .iter()
            .find(|c| match field {
                CourseField::IdNumber => c.idnumber == value,
                CourseField::Shortname => c.shortname == value,
            })
            .map(|c| c.id)
    }

    fn find_grade_item(
        &self,
        course: HubId,
        idnumber: Option<&str>,
        name: Option<&str>,
    ) -> Option<HubId> {
        find_named(&self.inner.read().grade_items, course, None, idnumber, name)
    }

    fn find_activity(
        &self,
        course: HubId,
        module: &str,
        idnumber: Option<&str>,
        name: Option<&str>,
    ) -> Option<HubId> {
        find_named(
            &self.inner.read().activities,
            course,
            Some(module),
            idnumber,
            name,
        )
    }

    fn find_record(&self, key: &RecordKey) -> Option<HubRecord> {
        let inner = self.inner.read();
        let id = inner.by_key.get(key)?;
        inner.records.get(id).cloned()
    }

    fn get_record(&self, id: HubId) -> Option<HubRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    fn insert_record(
        &self,
        key: RecordKey,
        data: serde_json::Value,
        now: Timestamp,
    ) -> ServerResult<HubId> {
        let mut inner = self.inner.write();
        let id = inner.allocate();
        inner.records.insert(
            id,
            HubRecord {
                id,
                key,
                data,
                time_created: now,
                time_modified: now,
            },
        );
        inner.by_key.insert(key, id);
        Ok(id)
    }

    fn update_record(
        &self,
        id: HubId,
        data: serde_json::Value,
        now: Timestamp,
    ) -> ServerResult<()> {
        let mut inner = self.inner.write();
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| crate::error::ServerError::Internal(format!("no hub record {id}")))?;
        record.data = data;
        record.time_modified = now;
        Ok(())
    }
}
