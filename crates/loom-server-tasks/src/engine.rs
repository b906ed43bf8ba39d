// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Capability interface for the underlying job engine.
//!
//! The task manager never talks to a concrete scheduler. Anything that can
//! store a job with one trigger under a `(group, name)` key, fire it, pause,
//! resume and delete it, report its trigger state, and deliver completion
//! callbacks for a group can sit behind [`JobEngine`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use loom_tasks_core::{TaskInfo, TaskState};

use crate::trigger::EngineTrigger;

/// Result type for engine calls.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Identity of a job and its trigger inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey {
	pub group: String,
	pub name: String,
}

impl JobKey {
	pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
		Self {
			group: group.into(),
			name: name.into(),
		}
	}
}

impl fmt::Display for JobKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.group, self.name)
	}
}

/// The job half of a scheduling artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDetail {
	pub key: JobKey,
	pub task_class: String,
	pub properties: HashMap<String, String>,
	/// When set, the engine must not start a run while the previous one is
	/// still executing.
	pub concurrent_execution_disallowed: bool,
}

impl JobDetail {
	pub fn from_task(key: JobKey, task: &TaskInfo) -> Self {
		Self {
			key,
			task_class: task.task_class.clone(),
			properties: task.properties.clone(),
			concurrent_execution_disallowed: task.trigger.disallow_concurrent_execution,
		}
	}
}

/// Trigger state as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerState {
	None,
	Normal,
	Paused,
	Complete,
	Error,
	Blocked,
	/// Engine-specific state with no portable meaning
	Other(String),
}

impl From<TriggerState> for TaskState {
	fn from(state: TriggerState) -> Self {
		match state {
			TriggerState::None => TaskState::None,
			TriggerState::Normal => TaskState::Normal,
			TriggerState::Paused => TaskState::Paused,
			TriggerState::Complete => TaskState::Finished,
			TriggerState::Error => TaskState::Error,
			TriggerState::Blocked => TaskState::Blocked,
			TriggerState::Other(_) => TaskState::Unknown,
		}
	}
}

/// Result of replacing a trigger in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescheduleOutcome {
	/// No trigger was stored under the key; nothing was replaced.
	NotFound,
	Replaced {
		next_fire_time: Option<DateTime<Utc>>,
	},
}

/// Errors reported by a job engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("job already exists: {0}")]
	AlreadyExists(JobKey),

	#[error("trigger for {0} will never fire")]
	WillNeverFire(JobKey),

	#[error("job store unavailable: {0}")]
	Unavailable(String),

	#[error("{0}")]
	Other(String),
}

/// Callbacks delivered by the engine for triggers in a subscribed group.
#[async_trait]
pub trait TriggerListener: Send + Sync {
	fn name(&self) -> &str;

	async fn trigger_fired(&self, _trigger: &EngineTrigger) {}

	/// Returning `true` skips this run of the job.
	async fn veto_job_execution(&self, _trigger: &EngineTrigger) -> bool {
		false
	}

	async fn trigger_misfired(&self, _trigger: &EngineTrigger) {}

	/// Called after the job ran. `trigger.next_fire_time` is `None` when the
	/// schedule is exhausted.
	async fn trigger_complete(&self, trigger: &EngineTrigger);
}

/// Operations the task manager needs from a scheduling substrate.
#[async_trait]
pub trait JobEngine: Send + Sync {
	/// Store a job with its trigger. Fails if the key is taken.
	async fn schedule_job(&self, job: JobDetail, trigger: EngineTrigger) -> EngineResult<()>;

	/// Replace the trigger stored under `key`, keeping the job.
	async fn reschedule_job(
		&self,
		key: &JobKey,
		trigger: EngineTrigger,
	) -> EngineResult<RescheduleOutcome>;

	async fn pause_job(&self, key: &JobKey) -> EngineResult<()>;

	async fn resume_job(&self, key: &JobKey) -> EngineResult<()>;

	/// Returns `false` if there was nothing to delete.
	async fn delete_job(&self, key: &JobKey) -> EngineResult<bool>;

	async fn check_exists(&self, key: &JobKey) -> EngineResult<bool>;

	async fn trigger_state(&self, key: &JobKey) -> EngineResult<TriggerState>;

	/// Snapshot of the stored trigger.
	async fn trigger(&self, key: &JobKey) -> EngineResult<Option<EngineTrigger>>;

	/// Overwrite the stored trigger's next fire time. Engines that do not
	/// expose a mutable fire time return `Ok(false)`.
	async fn set_next_fire_time(
		&self,
		_key: &JobKey,
		_next_fire_time: DateTime<Utc>,
	) -> EngineResult<bool> {
		Ok(false)
	}

	async fn trigger_keys(&self, group: &str) -> EngineResult<Vec<JobKey>>;

	/// Subscribe `listener` to trigger events for every key in `group`.
	/// A listener already subscribed to `group` under the same name is
	/// replaced.
	async fn add_trigger_listener(
		&self,
		group: &str,
		listener: Arc<dyn TriggerListener>,
	) -> EngineResult<()>;

	/// Drop the listener named `name` from `group`. Returns whether one was
	/// subscribed.
	async fn remove_trigger_listener(&self, group: &str, name: &str) -> EngineResult<bool>;
}
