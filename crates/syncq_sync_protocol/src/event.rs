//! Event classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a captured leaf event.
///
/// Encoded on the wire as a lowercase tag. Tags this version does not
/// recognise decode to [`EventType::Unknown`] so the hub can answer with a
/// per-item error instead of rejecting the whole upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// A user was graded.
    Grade,
    /// An assignment submission was created or updated.
    Submission,
    /// A quiz attempt was submitted.
    Quiz,
    /// A forum post or discussion was created.
    Forum,
    /// Activity or course completion changed.
    Completion,
    /// A user enrolment was created, updated or deleted.
    Enrol,
    /// A user account was created or updated.
    User,
    /// Any other tag.
    Unknown(String),
}

impl EventType {
    /// Returns the wire tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Grade => "grade",
            Self::Submission => "submission",
            Self::Quiz => "quiz",
            Self::Forum => "forum",
            Self::Completion => "completion",
            Self::Enrol => "enrol",
            Self::User => "user",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<String> for EventType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "grade" => Self::Grade,
            "submission" => Self::Submission,
            "quiz" => Self::Quiz,
            "forum" => Self::Forum,
            "completion" => Self::Completion,
            "enrol" => Self::Enrol,
            "user" => Self::User,
            _ => Self::Unknown(tag),
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Unknown(tag) => tag,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a fully-qualified event name to its category and queue priority.
///
/// Priority 1 is dispatched first. Returns `None` for events that are not
/// replicated.
pub fn classify_event(event_name: &str) -> Option<(EventType, u8)> {
    let classified = match event_name {
        "\\core\\event\\user_graded" => (EventType::Grade, 1),
        "\\mod_quiz\\event\\attempt_submitted" => (EventType::Quiz, 1),
        "\\mod_assign\\event\\submission_created"
        | "\\mod_assign\\event\\submission_updated"
        | "\\assignsubmission_file\\event\\submission_created"
        | "\\assignsubmission_file\\event\\submission_updated" => (EventType::Submission, 2),
        "\\core\\event\\course_completed" => (EventType::Completion, 2),
        "\\core\\event\\user_enrolment_created"
        | "\\core\\event\\user_enrolment_updated"
        | "\\core\\event\\user_enrolment_deleted" => (EventType::Enrol, 3),
        "\\core\\event\\user_created" => (EventType::User, 3),
        "\\core\\event\\user_updated" => (EventType::User, 4),
        "\\core\\event\\course_module_completion_updated" => (EventType::Completion, 4),
        "\\mod_forum\\event\\post_created" | "\\mod_forum\\event\\discussion_created" => {
            (EventType::Forum, 5)
        }
        _ => return None,
    };
    Some(classified)
}

/// Outcome of applying one uploaded item on the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// The event was applied.
    Success,
    /// The hub copy is newer; nothing changed.
    Conflict,
    /// The event could not be applied.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_round_trip_through_json() {
        let json = serde_json::to_string(&EventType::Grade).unwrap();
        assert_eq!(json, "\"grade\"");
        let back: EventType = serde_json::from_str("\"enrol\"").unwrap();
        assert_eq!(back, EventType::Enrol);
    }

    #[test]
    fn unknown_tag_is_preserved() {
        let parsed: EventType = serde_json::from_str("\"badge\"").unwrap();
        assert_eq!(parsed, EventType::Unknown("badge".into()));
        assert_eq!(serde_json::to_string(&parsed).unwrap(), "\"badge\"");
    }

    #[test]
    fn grades_and_quizzes_outrank_forum_posts() {
        let (grade, grade_priority) = classify_event("\\core\\event\\user_graded").unwrap();
        let (_, quiz_priority) = classify_event("\\mod_quiz\\event\\attempt_submitted").unwrap();
        let (forum, forum_priority) = classify_event("\\mod_forum\\event\\post_created").unwrap();
        assert_eq!(grade, EventType::Grade);
        assert_eq!(forum, EventType::Forum);
        assert_eq!(grade_priority, 1);
        assert_eq!(quiz_priority, 1);
        assert_eq!(forum_priority, 5);
    }

    #[test]
    fn course_and_module_completion_differ_in_priority() {
        assert_eq!(
            classify_event("\\core\\event\\course_completed"),
            Some((EventType::Completion, 2))
        );
        assert_eq!(
            classify_event("\\core\\event\\course_module_completion_updated"),
            Some((EventType::Completion, 4))
        );
    }

    #[test]
    fn unreplicated_events_are_not_classified() {
        assert!(classify_event("\\core\\event\\course_viewed").is_none());
    }

    #[test]
    fn item_status_is_lowercase() {
        assert_eq!(serde_json::to_string(&ItemStatus::Conflict).unwrap(), "\"conflict\"");
    }
}
