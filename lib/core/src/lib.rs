//! Core domain types and utilities for flowmill.
//!
//! This crate provides the identifiers and the error-handling alias shared by
//! the workflow engine, its service adapters and the runner.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{ExecutionId, ParseIdError, WorkflowId};
