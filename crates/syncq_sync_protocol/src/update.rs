//! Hub-originated update types and their payloads.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of object a distribution update describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpdateType {
    /// Course metadata.
    Course,
    /// A user account.
    User,
    /// A user enrolment in a course.
    Enrolment,
    /// A full course content export, delivered as an artifact.
    CourseContent,
    /// Any other tag.
    Unknown(String),
}

impl UpdateType {
    /// Returns the wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Course => "course",
            Self::User => "user",
            Self::Enrolment => "enrolment",
            Self::CourseContent => "course_content",
            Self::Unknown(tag) => tag,
        }
    }

    /// Table the updated object lives in, used as the identity mapping table.
    pub fn object_table(&self) -> &str {
        match self {
            Self::Course | Self::CourseContent => "course",
            Self::User => "user",
            Self::Enrolment => "user_enrolments",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<String> for UpdateType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "course" => Self::Course,
            "user" => Self::User,
            "enrolment" => Self::Enrolment,
            "course_content" => Self::CourseContent,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<UpdateType> for String {
    fn from(update_type: UpdateType) -> Self {
        match update_type {
            UpdateType::Unknown(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the update does to the object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpdateAction {
    /// The object was created on the hub.
    Create,
    /// The object changed on the hub.
    Update,
    /// The object was removed on the hub.
    Delete,
    /// Any other action.
    Unknown(String),
}

impl UpdateAction {
    /// Returns the wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<String> for UpdateAction {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "create" => Self::Create,
            "update" => Self::Update,
            "delete" => Self::Delete,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<UpdateAction> for String {
    fn from(action: UpdateAction) -> Self {
        match action {
            UpdateAction::Unknown(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a course update. `id` is the hub course id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseData {
    /// Hub course id.
    pub id: i64,
    /// Full name.
    #[serde(default)]
    pub fullname: String,
    /// Short name; leaves make it unique locally.
    #[serde(default)]
    pub shortname: String,
    /// External identifier.
    #[serde(default)]
    pub idnumber: String,
    /// Summary text.
    #[serde(default)]
    pub summary: String,
    /// Whether the course is visible.
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Start date (unix seconds).
    #[serde(default)]
    pub start_date: i64,
    /// End date (unix seconds), 0 for none.
    #[serde(default)]
    pub end_date: i64,
}

/// Payload of a user update. `id` is the hub user id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    /// Hub user id.
    pub id: i64,
    /// Login name.
    #[serde(default)]
    pub username: String,
    /// Email address.
    #[serde(default)]
    pub email: String,
    /// First name.
    #[serde(default)]
    pub firstname: String,
    /// Last name.
    #[serde(default)]
    pub lastname: String,
    /// External identifier.
    #[serde(default)]
    pub idnumber: String,
    /// Whether the account is suspended.
    #[serde(default)]
    pub suspended: bool,
}

/// Payload of an enrolment update. Both ids are hub ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrolmentData {
    /// Hub user id.
    pub user_id: i64,
    /// Hub course id.
    pub course_id: i64,
    /// 0 active, 1 suspended.
    #[serde(default)]
    pub status: i64,
    /// Enrolment start.
    #[serde(default)]
    pub time_start: i64,
    /// Enrolment end, 0 for open-ended.
    #[serde(default)]
    pub time_end: i64,
    /// Role to assign, e.g. `student`.
    #[serde(default)]
    pub role: Option<String>,
}

/// Payload of a course content update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseContentData {
    /// Hub course id.
    pub course_id: i64,
    /// Name of the artifact holding the export.
    #[serde(default)]
    pub artifact: Option<String>,
}

fn default_true() -> bool {
    true
}
