//! Leaf-side application of hub updates.
//!
//! The [`LeafApplier`] turns downloaded [`WireUpdate`]s into changes on the
//! leaf's own records through a [`LocalDirectory`]. Hub ids are translated
//! to local ids with the identity mapper; objects the leaf has never seen
//! are created and mapped.
//!
//! An update whose prerequisites are missing (an enrolment for a user the
//! leaf has not received yet) is skipped without mutation so a later pass
//! can apply it.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use syncq_core::{content_hash, IdentityMapper, LocalId, MappingStore};
use syncq_sync_protocol::{
    CourseContentData, CourseData, EnrolmentData, UpdateAction, UpdateType, UserData, WireUpdate,
};

/// The leaf's own records, as the applier needs them.
pub trait LocalDirectory: Send + Sync {
    /// Whether a course exists.
    fn course_exists(&self, id: LocalId) -> bool;

    /// Whether `shortname` is used by a course other than `except`.
    fn shortname_taken(&self, shortname: &str, except: Option<LocalId>) -> bool;

    /// Creates a course under the given (unique) short name.
    fn create_course(&self, course: &CourseData, shortname: &str) -> SyncResult<LocalId>;

    /// Updates a course.
    fn update_course(&self, id: LocalId, course: &CourseData, shortname: &str) -> SyncResult<()>;

    /// Deletes a course. Returns false if it was already gone.
    fn delete_course(&self, id: LocalId) -> SyncResult<bool>;

    /// Whether a user exists.
    fn user_exists(&self, id: LocalId) -> bool;

    /// Finds a user by email.
    fn find_user_by_email(&self, email: &str) -> Option<LocalId>;

    /// Finds a user by username.
    fn find_user_by_username(&self, username: &str) -> Option<LocalId>;

    /// Creates a user.
    fn create_user(&self, user: &UserData) -> SyncResult<LocalId>;

    /// Updates a user.
    fn update_user(&self, id: LocalId, user: &UserData) -> SyncResult<()>;

    /// Suspends a user. Returns false if the user was already gone.
    fn suspend_user(&self, id: LocalId) -> SyncResult<bool>;

    /// Creates or updates an enrolment.
    fn enrol(&self, user: LocalId, course: LocalId, enrolment: &EnrolmentData) -> SyncResult<()>;

    /// Removes an enrolment. Returns false if there was none.
    fn unenrol(&self, user: LocalId, course: LocalId) -> SyncResult<bool>;
}

/// Restores a course content export delivered as an artifact.
pub trait ContentRestorer: Send + Sync {
    /// Restores `content` into `course`, or into a new course when `None`.
    /// Returns the local course id.
    fn restore(&self, course: Option<LocalId>, content: &CourseContentData) -> SyncResult<LocalId>;
}

/// Aggregate outcome of [`LeafApplier::process_batch`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResult {
    /// Updates applied.
    pub success: u32,
    /// Updates that failed.
    pub failed: u32,
    /// Updates skipped for missing prerequisites.
    pub skipped: u32,
    /// One message per failure.
    pub errors: Vec<String>,
    /// Ids of the skipped updates.
    pub skipped_ids: Vec<u64>,
}

impl BatchResult {
    /// Updates seen.
    pub fn total(&self) -> u32 {
        self.success + self.failed + self.skipped
    }

    /// Adds another result's counts.
    pub fn merge(&mut self, other: BatchResult) {
        self.success += other.success;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
        self.skipped_ids.extend(other.skipped_ids);
    }
}

/// Applies hub updates to the leaf.
pub struct LeafApplier {
    node_id: String,
    directory: Arc<dyn LocalDirectory>,
    mappings: Arc<MappingStore>,
    restorer: Option<Arc<dyn ContentRestorer>>,
}

impl LeafApplier {
    /// Creates an applier recording mappings under `node_id`.
    pub fn new(
        node_id: impl Into<String>,
        directory: Arc<dyn LocalDirectory>,
        mappings: Arc<MappingStore>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            directory,
            mappings,
            restorer: None,
        }
    }

    /// Enables course content updates.
    pub fn with_restorer(mut self, restorer: Arc<dyn ContentRestorer>) -> Self {
        self.restorer = Some(restorer);
        self
    }

    /// The mapping store.
    pub fn mappings(&self) -> &MappingStore {
        &self.mappings
    }

    /// Applies one update.
    ///
    /// Returns `Ok(true)` when applied, `Ok(false)` when skipped for
    /// missing prerequisites. Malformed payloads, unknown types and
    /// directory failures are errors.
    pub fn apply(&self, update: &WireUpdate) -> SyncResult<bool> {
        match &update.update_type {
            UpdateType::Course => self.apply_course(update),
            UpdateType::User => self.apply_user(update),
            UpdateType::Enrolment => self.apply_enrolment(update),
            UpdateType::CourseContent => self.apply_course_content(update),
            UpdateType::Unknown(tag) => {
                Err(SyncError::Validation(format!("Unknown update type: {tag}")))
            }
        }
    }

    /// Applies updates independently and aggregates the outcomes.
    pub fn process_batch(&self, updates: &[WireUpdate]) -> BatchResult {
        let mut result = BatchResult::default();
        for update in updates {
            match self.apply(update) {
                Ok(true) => result.success += 1,
                Ok(false) => {
                    result.skipped += 1;
                    result.skipped_ids.push(update.id);
                }
                Err(e) => {
                    tracing::warn!(
                        update_id = update.id,
                        update_type = %update.update_type,
                        error = %e,
                        "update failed"
                    );
                    result.failed += 1;
                    result.errors.push(format!("update {}: {e}", update.id));
                }
            }
        }
        tracing::info!(
            success = result.success,
            failed = result.failed,
            skipped = result.skipped,
            "update batch applied"
        );
        result
    }

    fn mapper(&self) -> IdentityMapper<'_> {
        self.mappings.mapper(&self.node_id)
    }

    fn apply_course(&self, update: &WireUpdate) -> SyncResult<bool> {
        let course: CourseData = decode(update)?;
        let table = update.update_type.object_table();
        let mapper = self.mapper();
        let existing = mapper
            .resolve_reverse(table, course.id)
            .filter(|id| self.directory.course_exists(*id));

        match &update.action {
            UpdateAction::Delete => {
                if let Some(local) = mapper.resolve_reverse(table, course.id) {
                    self.directory.delete_course(local)?;
                    mapper.delete(table, local)?;
                    tracing::info!(hub_id = course.id, local_id = local, "course deleted");
                }
                Ok(true)
            }
            UpdateAction::Create | UpdateAction::Update => {
                let shortname = self.unique_shortname(&course.shortname, existing);
                let local = match existing {
                    Some(local) => {
                        self.directory.update_course(local, &course, &shortname)?;
                        local
                    }
                    None => {
                        let local = self.directory.create_course(&course, &shortname)?;
                        tracing::info!(hub_id = course.id, local_id = local, shortname, "course created");
                        local
                    }
                };
                mapper.upsert(table, local, course.id, Some(hash(&course)?.as_str()))?;
                Ok(true)
            }
            UpdateAction::Unknown(action) => Err(unsupported(update, action)),
        }
    }

    fn unique_shortname(&self, base: &str, except: Option<LocalId>) -> String {
        if !self.directory.shortname_taken(base, except) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|candidate| !self.directory.shortname_taken(candidate, except))
            .unwrap_or_else(|| base.to_string())
    }

    fn apply_user(&self, update: &WireUpdate) -> SyncResult<bool> {
        let user: UserData = decode(update)?;
        let table = update.update_type.object_table();
        let mapper = self.mapper();

        match &update.action {
            UpdateAction::Delete => {
                if let Some(local) = mapper.resolve_reverse(table, user.id) {
                    self.directory.suspend_user(local)?;
                    mapper.delete(table, local)?;
                    tracing::info!(hub_id = user.id, local_id = local, "user suspended");
                }
                Ok(true)
            }
            UpdateAction::Create | UpdateAction::Update => {
                let existing = mapper
                    .resolve_reverse(table, user.id)
                    .filter(|id| self.directory.user_exists(*id))
                    .or_else(|| {
                        non_empty(&user.email).and_then(|e| self.directory.find_user_by_email(e))
                    })
                    .or_else(|| {
                        non_empty(&user.username)
                            .and_then(|u| self.directory.find_user_by_username(u))
                    });
                let local = match existing {
                    Some(local) => {
                        self.directory.update_user(local, &user)?;
                        local
                    }
                    None => {
                        let local = self.directory.create_user(&user)?;
                        tracing::info!(hub_id = user.id, local_id = local, "user created");
                        local
                    }
                };
                mapper.upsert(table, local, user.id, Some(hash(&user)?.as_str()))?;
                Ok(true)
            }
            UpdateAction::Unknown(action) => Err(unsupported(update, action)),
        }
    }

    fn apply_enrolment(&self, update: &WireUpdate) -> SyncResult<bool> {
        let enrolment: EnrolmentData = decode(update)?;
        let mapper = self.mapper();
        let user = mapper.resolve_reverse(UpdateType::User.object_table(), enrolment.user_id);
        let course = mapper.resolve_reverse(UpdateType::Course.object_table(), enrolment.course_id);

        let (Some(user), Some(course)) = (user, course) else {
            tracing::debug!(
                update_id = update.id,
                hub_user = enrolment.user_id,
                hub_course = enrolment.course_id,
                "enrolment skipped, user or course not mapped yet"
            );
            return Ok(false);
        };

        match &update.action {
            UpdateAction::Delete => {
                self.directory.unenrol(user, course)?;
                Ok(true)
            }
            UpdateAction::Create | UpdateAction::Update => {
                self.directory.enrol(user, course, &enrolment)?;
                Ok(true)
            }
            UpdateAction::Unknown(action) => Err(unsupported(update, action)),
        }
    }

    fn apply_course_content(&self, update: &WireUpdate) -> SyncResult<bool> {
        let content: CourseContentData = decode(update)?;
        if !matches!(update.action, UpdateAction::Create | UpdateAction::Update) {
            return Err(unsupported(update, update.action.as_str()));
        }
        if content.artifact.as_deref().map_or(true, str::is_empty) {
            tracing::debug!(update_id = update.id, "course content skipped, no artifact");
            return Ok(false);
        }
        let Some(restorer) = &self.restorer else {
            tracing::debug!(update_id = update.id, "course content skipped, no restorer");
            return Ok(false);
        };

        let table = update.update_type.object_table();
        let mapper = self.mapper();
        let existing = mapper
            .resolve_reverse(table, content.course_id)
            .filter(|id| self.directory.course_exists(*id));
        let local = restorer.restore(existing, &content)?;
        mapper.upsert(table, local, content.course_id, None)?;
        tracing::info!(hub_id = content.course_id, local_id = local, "course content restored");
        Ok(true)
    }
}

fn decode<T: DeserializeOwned>(update: &WireUpdate) -> SyncResult<T> {
    update.data_as().map_err(|e| {
        SyncError::Validation(format!("malformed {} payload: {e}", update.update_type))
    })
}

fn hash<T: Serialize>(data: &T) -> SyncResult<String> {
    let bytes = serde_json::to_vec(data).map_err(|e| SyncError::Validation(e.to_string()))?;
    Ok(content_hash(&bytes))
}

fn unsupported(update: &WireUpdate, action: &str) -> SyncError {
    SyncError::Validation(format!(
        "Unsupported action {action} for {} update",
        update.update_type
    ))
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

/// A course held by [`MemoryDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCourse {
    /// Local id.
    pub id: LocalId,
    /// Full name.
    pub fullname: String,
    /// Unique short name.
    pub shortname: String,
    /// External identifier.
    pub idnumber: String,
    /// Visibility.
    pub visible: bool,
}

/// A user held by [`MemoryDirectory`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalUser {
    /// Local id.
    pub id: LocalId,
    /// Login name.
    pub username: String,
    /// Email.
    pub email: String,
    /// First name.
    pub firstname: String,
    /// Last name.
    pub lastname: String,
    /// Suspension flag.
    pub suspended: bool,
}

#[derive(Default)]
struct Records {
    next_id: LocalId,
    courses: BTreeMap<LocalId, LocalCourse>,
    users: BTreeMap<LocalId, LocalUser>,
    enrolments: BTreeMap<(LocalId, LocalId), EnrolmentData>,
}

impl Records {
    fn allocate(&mut self) -> LocalId {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`LocalDirectory`].
#[derive(Default)]
pub struct MemoryDirectory {
    records: RwLock<Records>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a course and returns its id.
    pub fn add_course(&self, shortname: &str) -> LocalId {
        let mut records = self.records.write();
        let id = records.allocate();
        records.courses.insert(
            id,
            LocalCourse {
                id,
                fullname: shortname.into(),
                shortname: shortname.into(),
                idnumber: String::new(),
                visible: true,
            },
        );
        id
    }

    /// Adds a user and returns its id.
    pub fn add_user(&self, username: &str, email: &str) -> LocalId {
        let mut records = self.records.write();
        let id = records.allocate();
        records.users.insert(
            id,
            LocalUser {
                id,
                username: username.into(),
                email: email.into(),
                firstname: String::new(),
                lastname: String::new(),
                suspended: false,
            },
        );
        id
    }

    /// Returns a course.
    pub fn course(&self, id: LocalId) -> Option<LocalCourse> {
        self.records.read().courses.get(&id).cloned()
    }

    /// Returns a user.
    pub fn user(&self, id: LocalId) -> Option<LocalUser> {
        self.records.read().users.get(&id).cloned()
    }

    /// Returns an enrolment.
    pub fn enrolment(&self, user: LocalId, course: LocalId) -> Option<EnrolmentData> {
        self.records.read().enrolments.get(&(user, course)).cloned()
    }

    /// Number of courses.
    pub fn course_count(&self) -> usize {
        self.records.read().courses.len()
    }

    /// Number of users.
    pub fn user_count(&self) -> usize {
        self.records.read().users.len()
    }
}

impl LocalDirectory for MemoryDirectory {
    fn course_exists(&self, id: LocalId) -> bool {
        self.records.read().courses.contains_key(&id)
    }

    fn shortname_taken(&self, shortname: &str, except: Option<LocalId>) -> bool {
        self.records
            .read()
            .courses
            .values()
            .any(|c| c.shortname == shortname && Some(c.id) != except)
    }

    fn create_course(&self, course: &CourseData, shortname: &str) -> SyncResult<LocalId> {
        let mut records = self.records.write();
        let id = records.allocate();
        records.courses.insert(
            id,
            LocalCourse {
                id,
                fullname: course.fullname.clone(),
                shortname: shortname.into(),
                idnumber: course.idnumber.clone(),
                visible: course.visible,
            },
        );
        Ok(id)
    }

    fn update_course(&self, id: LocalId, course: &CourseData, shortname: &str) -> SyncResult<()> {
        let mut records = self.records.write();
        let local = records
            .courses
            .get_mut(&id)
            .ok_or_else(|| SyncError::Validation(format!("course {id} does not exist")))?;
        local.fullname = course.fullname.clone();
        local.shortname = shortname.into();
        local.idnumber = course.idnumber.clone();
        local.visible = course.visible;
        Ok(())
    }

    fn delete_course(&self, id: LocalId) -> SyncResult<bool> {
        let mut records = self.records.write();
        records.enrolments.retain(|(_, course), _| *course != id);
        Ok(records.courses.remove(&id).is_some())
    }

    fn user_exists(&self, id: LocalId) -> bool {
        self.records.read().users.contains_key(&id)
    }

    fn find_user_by_email(&self, email: &str) -> Option<LocalId> {
        self.records
            .read()
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .map(|u| u.id)
    }

    fn find_user_by_username(&self, username: &str) -> Option<LocalId> {
        self.records
            .read()
            .users
            .values()
            .find(|u| u.username == username)
            .map(|u| u.id)
    }

    fn create_user(&self, user: &UserData) -> SyncResult<LocalId> {
        let mut records = self.records.write();
        let id = records.allocate();
        records.users.insert(
            id,
            LocalUser {
                id,
                username: user.username.clone(),
                email: user.email.clone(),
                firstname: user.firstname.clone(),
                lastname: user.lastname.clone(),
                suspended: user.suspended,
            },
        );
        Ok(id)
    }

    fn update_user(&self, id: LocalId, user: &UserData) -> SyncResult<()> {
        let mut records = self.records.write();
        let local = records
            .users
            .get_mut(&id)
            .ok_or_else(|| SyncError::Validation(format!("user {id} does not exist")))?;
        local.username = user.username.clone();
        local.email = user.email.clone();
        local.firstname = user.firstname.clone();
        local.lastname = user.lastname.clone();
        local.suspended = user.suspended;
        Ok(())
    }

    fn suspend_user(&self, id: LocalId) -> SyncResult<bool> {
        match self.records.write().users.get_mut(&id) {
            Some(user) => {
                user.suspended = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn enrol(&self, user: LocalId, course: LocalId, enrolment: &EnrolmentData) -> SyncResult<()> {
        self.records
            .write()
            .enrolments
            .insert((user, course), enrolment.clone());
        Ok(())
    }

    fn unenrol(&self, user: LocalId, course: LocalId) -> SyncResult<bool> {
        Ok(self.records.write().enrolments.remove(&(user, course)).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use syncq_core::SystemClock;
    use syncq_testkit::{course_data, enrolment_data, user_data, wire_update};

    struct Fixture {
        directory: Arc<MemoryDirectory>,
        applier: LeafApplier,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(MemoryDirectory::new());
        let mappings = Arc::new(MappingStore::in_memory(Arc::new(SystemClock)));
        let applier = LeafApplier::new("leaf-a", directory.clone(), mappings);
        Fixture { directory, applier }
    }

    fn course_update(id: u64, action: UpdateAction, course: &CourseData) -> WireUpdate {
        wire_update(id, UpdateType::Course, action, 100, course)
    }

    #[test]
    fn course_create_then_update_reuses_mapping() {
        let f = fixture();
        assert!(f
            .applier
            .apply(&course_update(1, UpdateAction::Create, &course_data(500, "ALG")))
            .unwrap());

        let local = f.applier.mappings().mapper("leaf-a").resolve_reverse("course", 500).unwrap();
        assert_eq!(f.directory.course(local).unwrap().shortname, "ALG");

        let mut renamed = course_data(500, "ALG");
        renamed.fullname = "Algebra II".into();
        f.applier
            .apply(&course_update(2, UpdateAction::Update, &renamed))
            .unwrap();

        assert_eq!(f.directory.course_count(), 1);
        assert_eq!(f.directory.course(local).unwrap().fullname, "Algebra II");
    }

    #[test]
    fn course_shortname_collision_gets_suffix() {
        let f = fixture();
        f.directory.add_course("ALG");
        f.directory.add_course("ALG_1");

        f.applier
            .apply(&course_update(1, UpdateAction::Create, &course_data(500, "ALG")))
            .unwrap();

        let local = f.applier.mappings().mapper("leaf-a").resolve_reverse("course", 500).unwrap();
        assert_eq!(f.directory.course(local).unwrap().shortname, "ALG_2");

        // Updating the same course keeps its own name free.
        f.applier
            .apply(&course_update(2, UpdateAction::Update, &course_data(500, "ALG_2")))
            .unwrap();
        assert_eq!(f.directory.course(local).unwrap().shortname, "ALG_2");
    }

    #[test]
    fn delete_of_absent_object_is_success() {
        let f = fixture();
        assert!(f
            .applier
            .apply(&course_update(1, UpdateAction::Delete, &course_data(999, "GONE")))
            .unwrap());
        assert_eq!(f.directory.course_count(), 0);
    }

    #[test]
    fn course_delete_removes_object_and_mapping() {
        let f = fixture();
        f.applier
            .apply(&course_update(1, UpdateAction::Create, &course_data(500, "ALG")))
            .unwrap();
        f.applier
            .apply(&course_update(2, UpdateAction::Delete, &course_data(500, "ALG")))
            .unwrap();

        assert_eq!(f.directory.course_count(), 0);
        assert!(f.applier.mappings().mapper("leaf-a").resolve_reverse("course", 500).is_none());
    }

    #[test]
    fn user_adopts_existing_account_by_email() {
        let f = fixture();
        let existing = f.directory.add_user("old-name", "ana@example.org");

        let update = wire_update(1, UpdateType::User, UpdateAction::Create, 100, &user_data(70, "ana"));
        f.applier.apply(&update).unwrap();

        assert_eq!(f.directory.user_count(), 1);
        assert_eq!(f.directory.user(existing).unwrap().username, "ana");
        assert_eq!(
            f.applier.mappings().mapper("leaf-a").resolve_reverse("user", 70),
            Some(existing)
        );
    }

    #[test]
    fn user_delete_suspends() {
        let f = fixture();
        f.applier
            .apply(&wire_update(1, UpdateType::User, UpdateAction::Create, 100, &user_data(70, "ana")))
            .unwrap();
        let local = f.applier.mappings().mapper("leaf-a").resolve_reverse("user", 70).unwrap();

        f.applier
            .apply(&wire_update(2, UpdateType::User, UpdateAction::Delete, 110, &user_data(70, "ana")))
            .unwrap();

        assert!(f.directory.user(local).unwrap().suspended);
        assert!(f.applier.mappings().mapper("leaf-a").resolve_reverse("user", 70).is_none());
    }

    #[test]
    fn enrolment_waits_for_prerequisites() {
        let f = fixture();
        let enrol = wire_update(3, UpdateType::Enrolment, UpdateAction::Create, 120, &enrolment_data(70, 500));

        assert!(!f.applier.apply(&enrol).unwrap());

        f.applier
            .apply(&wire_update(1, UpdateType::User, UpdateAction::Create, 100, &user_data(70, "ana")))
            .unwrap();
        assert!(!f.applier.apply(&enrol).unwrap());

        f.applier
            .apply(&course_update(2, UpdateAction::Create, &course_data(500, "ALG")))
            .unwrap();
        assert!(f.applier.apply(&enrol).unwrap());

        let mapper = f.applier.mappings().mapper("leaf-a");
        let user = mapper.resolve_reverse("user", 70).unwrap();
        let course = mapper.resolve_reverse("course", 500).unwrap();
        assert_eq!(f.directory.enrolment(user, course).unwrap().role.as_deref(), Some("student"));
    }

    #[test]
    fn batch_counts_each_outcome() {
        let f = fixture();
        let mut malformed = course_update(4, UpdateAction::Create, &course_data(1, "X"));
        malformed.data = serde_json::json!("not an object");

        let updates = vec![
            course_update(1, UpdateAction::Create, &course_data(500, "ALG")),
            wire_update(2, UpdateType::Enrolment, UpdateAction::Create, 100, &enrolment_data(70, 500)),
            wire_update(3, UpdateType::Unknown("badge".into()), UpdateAction::Create, 100, &course_data(1, "X")),
            malformed,
        ];

        let result = f.applier.process_batch(&updates);
        assert_eq!(result.success, 1);
        assert_eq!(result.skipped, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(result.skipped_ids, vec![2]);
        assert!(result.errors[0].contains("Unknown update type: badge"));
        assert_eq!(result.total(), 4);
    }

    struct RecordingRestorer {
        directory: Arc<MemoryDirectory>,
        restored: Mutex<Vec<String>>,
    }

    impl ContentRestorer for RecordingRestorer {
        fn restore(&self, course: Option<LocalId>, content: &CourseContentData) -> SyncResult<LocalId> {
            self.restored
                .lock()
                .push(content.artifact.clone().unwrap_or_default());
            Ok(course.unwrap_or_else(|| self.directory.add_course("RESTORED")))
        }
    }

    #[test]
    fn course_content_needs_artifact_and_restorer() {
        let f = fixture();
        let content = CourseContentData {
            course_id: 500,
            artifact: Some("course-500.mbz".into()),
        };
        let update = wire_update(9, UpdateType::CourseContent, UpdateAction::Create, 100, &content);
        assert!(!f.applier.apply(&update).unwrap());

        let restorer = Arc::new(RecordingRestorer {
            directory: f.directory.clone(),
            restored: Mutex::new(Vec::new()),
        });
        let applier = LeafApplier::new(
            "leaf-a",
            f.directory.clone(),
            Arc::new(MappingStore::in_memory(Arc::new(SystemClock))),
        )
        .with_restorer(restorer.clone());

        let no_artifact = wire_update(
            10,
            UpdateType::CourseContent,
            UpdateAction::Create,
            100,
            &CourseContentData {
                course_id: 500,
                artifact: None,
            },
        );
        assert!(!applier.apply(&no_artifact).unwrap());

        assert!(applier.apply(&update).unwrap());
        assert_eq!(*restorer.restored.lock(), vec!["course-500.mbz".to_string()]);
        assert!(applier.mappings().mapper("leaf-a").resolve_reverse("course", 500).is_some());
    }
}
