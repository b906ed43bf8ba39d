// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for task definitions.

use thiserror::Error;

/// Result type for task definition operations.
pub type Result<T> = std::result::Result<T, TasksError>;

/// Errors raised while parsing or validating task definitions.
#[derive(Debug, Error)]
pub enum TasksError {
	#[error("invalid task name: {0:?}")]
	InvalidTaskName(String),

	#[error("invalid task type: {0:?}")]
	InvalidTaskType(String),

	#[error("invalid task group key: {0}")]
	InvalidGroupKey(String),

	#[error("unknown misfire policy: {0}")]
	UnknownMisfirePolicy(String),

	#[error("unknown task state: {0}")]
	UnknownTaskState(String),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}
