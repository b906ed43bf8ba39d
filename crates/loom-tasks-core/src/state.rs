// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Abstract task state, independent of any scheduling engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TasksError;

/// State of a task as seen by the scheduler.
///
/// Always derived from the engine on demand; never cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
	/// Not known to the engine
	None,
	/// Scheduled and waiting for its next fire time
	Normal,
	/// Scheduled but suspended
	Paused,
	/// A non-concurrent task whose previous run is still executing
	Blocked,
	/// Schedule exhausted
	Finished,
	/// The engine failed to fire the task
	Error,
	/// The engine reported something this crate does not recognise
	Unknown,
}

impl TaskState {
	pub const ALL: [TaskState; 7] = [
		TaskState::None,
		TaskState::Normal,
		TaskState::Paused,
		TaskState::Blocked,
		TaskState::Finished,
		TaskState::Error,
		TaskState::Unknown,
	];
}

impl fmt::Display for TaskState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::None => write!(f, "none"),
			Self::Normal => write!(f, "normal"),
			Self::Paused => write!(f, "paused"),
			Self::Blocked => write!(f, "blocked"),
			Self::Finished => write!(f, "finished"),
			Self::Error => write!(f, "error"),
			Self::Unknown => write!(f, "unknown"),
		}
	}
}

impl FromStr for TaskState {
	type Err = TasksError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"none" => Ok(Self::None),
			"normal" => Ok(Self::Normal),
			"paused" => Ok(Self::Paused),
			"blocked" => Ok(Self::Blocked),
			"finished" => Ok(Self::Finished),
			"error" => Ok(Self::Error),
			"unknown" => Ok(Self::Unknown),
			_ => Err(TasksError::UnknownTaskState(s.to_string())),
		}
	}
}
