//! Property-based test generators using proptest.

use crate::fixtures::{event_payload, grade_snapshot, USER_GRADED};
use proptest::prelude::*;
use syncq_sync_protocol::{EventPayload, ForumPostSnapshot, ObjectSnapshot, UserRef};

/// Event names the classifier knows, with a few it does not.
pub const EVENT_NAMES: &[&str] = &[
    USER_GRADED,
    "\\mod_assign\\event\\submission_created",
    "\\mod_quiz\\event\\attempt_submitted",
    "\\mod_forum\\event\\post_created",
    "\\core\\event\\user_enrolment_created",
    "\\core\\event\\course_completed",
    "\\core\\event\\user_updated",
    "\\core\\event\\course_viewed",
];

/// Strategy for user natural keys; any field may be empty.
pub fn user_ref_strategy() -> impl Strategy<Value = UserRef> {
    (
        1i64..10_000,
        "[a-z]{0,8}",
        prop::option::of("[a-z]{1,6}@example\\.org"),
        prop::option::of("[A-Z]-[0-9]{1,4}"),
    )
        .prop_map(|(local_id, username, email, idnumber)| UserRef {
            local_id,
            username,
            email: email.unwrap_or_default(),
            idnumber: idnumber.unwrap_or_default(),
        })
}

/// Strategy for grade payloads from one node.
pub fn grade_payload_strategy(node_id: &'static str) -> impl Strategy<Value = EventPayload> {
    (1i64..1_000, 0u32..=100, 1_000i64..100_000).prop_map(move |(grade_id, raw, time)| {
        event_payload(
            node_id,
            USER_GRADED,
            Some(grade_snapshot(grade_id, f64::from(raw))),
            time,
        )
    })
}

/// Strategy for payloads with a random event name and object.
pub fn event_payload_strategy(node_id: &'static str) -> impl Strategy<Value = EventPayload> {
    (
        prop::sample::select(EVENT_NAMES),
        1i64..1_000,
        1_000i64..100_000,
        prop::bool::ANY,
    )
        .prop_map(move |(name, local_id, time, forum)| {
            let object = if forum {
                ObjectSnapshot::ForumPosts(ForumPostSnapshot {
                    local_id,
                    discussion: 1,
                    user_id: 4,
                    subject: format!("post {local_id}"),
                    message: "body".into(),
                    created: time,
                })
            } else {
                grade_snapshot(local_id, 50.0)
            };
            event_payload(node_id, name, Some(object), time)
        })
}

/// Strategy for (local id, hub id) pairs.
pub fn id_pair_strategy() -> impl Strategy<Value = (i64, i64)> {
    (1i64..50, 1i64..50)
}
