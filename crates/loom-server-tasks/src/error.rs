// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for task manager operations.

use std::fmt;
use thiserror::Error;

use crate::engine::EngineError;
use crate::repository::RepositoryError;
use crate::trigger::TriggerError;

/// Result type for task manager operations.
pub type Result<T> = std::result::Result<T, TaskError>;

/// The lifecycle operation an error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOperation {
	Schedule,
	Reschedule,
	Pause,
	Resume,
	Delete,
	Query,
	Register,
	Subscribe,
}

impl fmt::Display for TaskOperation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Schedule => write!(f, "scheduling"),
			Self::Reschedule => write!(f, "rescheduling"),
			Self::Pause => write!(f, "pausing"),
			Self::Resume => write!(f, "resuming"),
			Self::Delete => write!(f, "deleting"),
			Self::Query => write!(f, "querying"),
			Self::Register => write!(f, "registering"),
			Self::Subscribe => write!(f, "subscribing"),
		}
	}
}

/// Errors surfaced by [`crate::TaskManager`].
///
/// Engine and repository failures always carry the operation, the task
/// group key and, where there is one, the task name.
#[derive(Debug, Error)]
pub enum TaskError {
	#[error("error in {operation} task [{group}][{name}]: no such task")]
	NoSuchTask {
		operation: TaskOperation,
		group: String,
		name: String,
	},

	#[error("invalid trigger for task [{group}][{name}]: {source}")]
	Config {
		group: String,
		name: String,
		#[source]
		source: TriggerError,
	},

	#[error("error in {operation} task [{group}][{name}]: {source}")]
	EngineFailure {
		operation: TaskOperation,
		group: String,
		name: String,
		#[source]
		source: EngineError,
	},

	#[error("error in {operation} task [{group}][{name}]: task repository: {source}")]
	Repository {
		operation: TaskOperation,
		group: String,
		name: String,
		#[source]
		source: RepositoryError,
	},

	#[error("error in {operation} task [{group}][{name}]: {message}")]
	Unknown {
		operation: TaskOperation,
		group: String,
		name: String,
		message: String,
	},
}

impl TaskError {
	/// Wrap an engine error. Errors the engine could not classify become
	/// [`TaskError::Unknown`].
	pub(crate) fn engine(
		operation: TaskOperation,
		group: &str,
		name: &str,
		source: EngineError,
	) -> Self {
		match source {
			EngineError::Other(message) => Self::Unknown {
				operation,
				group: group.to_string(),
				name: name.to_string(),
				message,
			},
			source => Self::EngineFailure {
				operation,
				group: group.to_string(),
				name: name.to_string(),
				source,
			},
		}
	}

	pub(crate) fn repository(
		operation: TaskOperation,
		group: &str,
		name: &str,
		source: RepositoryError,
	) -> Self {
		Self::Repository {
			operation,
			group: group.to_string(),
			name: name.to_string(),
			source,
		}
	}

	pub(crate) fn no_such_task(operation: TaskOperation, group: &str, name: &str) -> Self {
		Self::NoSuchTask {
			operation,
			group: group.to_string(),
			name: name.to_string(),
		}
	}

	pub fn is_no_such_task(&self) -> bool {
		matches!(self, Self::NoSuchTask { .. })
	}

	pub fn is_config(&self) -> bool {
		matches!(self, Self::Config { .. })
	}
}
