//! # syncq Sync Protocol
//!
//! Wire types shared by leaf nodes and the hub.
//!
//! This crate provides:
//! - The captured event payload ([`EventPayload`]) and its object snapshots
//! - Closed event and update tags ([`EventType`], [`UpdateType`], [`UpdateAction`])
//!   with an explicit `Unknown` variant for tags this version does not know
//! - Request/response messages for the five endpoints (status, register,
//!   upload, download, report) with JSON encoding
//! - The conflict policy used when an uploaded event meets an existing hub row
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod error;
mod event;
mod messages;
mod payload;
mod update;

pub use conflict::{ConflictPolicy, Resolution};
pub use error::{ProtocolError, ProtocolResult};
pub use event::{classify_event, EventType, ItemStatus};
pub use messages::{
    endpoints, DownloadRequest, DownloadResponse, ErrorBody, ItemResult, RegisterRequest,
    RegisterResponse, ReportRequest, ReportResponse, ResponseStatus, StatusRequest,
    StatusResponse, SyncDirection, SyncSummary, UploadItem, UploadRequest, UploadResponse,
    WireUpdate,
};
pub use payload::{
    ActivityRef, CompletionSnapshot, CourseRef, EnrolmentSnapshot, EventContext, EventInfo,
    EventPayload, FileInfo, ForumPostSnapshot, GradeItemRef, GradeSnapshot, NodeStamp, ObjectSnapshot,
    QuizAttemptSnapshot, SubmissionSnapshot, UserRef,
};
pub use update::{CourseContentData, CourseData, EnrolmentData, UpdateAction, UpdateType, UserData};

/// Largest number of updates a single download may return.
pub const MAX_DOWNLOAD_LIMIT: u32 = 500;
