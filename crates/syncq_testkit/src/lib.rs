//! # syncq Testkit
//!
//! Test utilities for syncq.
//!
//! This crate provides:
//! - Fixtures: sample users, courses, captured events and upload items
//! - A fixed [`ContextSource`](syncq_core::ContextSource) for capture tests
//! - Temporary data directories
//! - Property-based test generators using proptest
//!
//! The sample user and course match across fixtures, so a hub directory
//! seeded with [`SAMPLE_USERNAME`] and [`SAMPLE_COURSE`] resolves every
//! payload built here.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
