//! Shared test utilities for fieldsync integration tests.
//!
//! This module provides:
//! - `TestHarness` for a queue backed by a temp-dir SQLite file
//! - Builders for registration records and attachments

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
