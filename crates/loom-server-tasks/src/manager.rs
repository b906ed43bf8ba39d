// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Lifecycle coordinator for one tenant and task type.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use loom_tasks_core::{TaskGroup, TaskInfo, TaskState, TenantId};

use crate::engine::{JobDetail, JobEngine, JobKey, RescheduleOutcome};
use crate::error::{Result, TaskError, TaskOperation};
use crate::listener::TaskCompletionListener;
use crate::notifier::{DeletionListeners, TaskDeletionListener};
use crate::repository::TaskRepository;
use crate::trigger::build_trigger;

/// Per-task results of a bulk operation.
#[derive(Debug, Default)]
pub struct BatchOutcome {
	pub succeeded: Vec<String>,
	pub failed: Vec<(String, TaskError)>,
}

impl BatchOutcome {
	pub fn is_complete(&self) -> bool {
		self.failed.is_empty()
	}

	fn record(&mut self, name: String, result: Result<()>) {
		match result {
			Ok(()) => self.succeeded.push(name),
			Err(e) => self.failed.push((name, e)),
		}
	}
}

/// Schedules the tasks of one [`TaskGroup`] onto a [`JobEngine`].
///
/// Mutating operations are serialized per manager. Queries read the engine
/// directly and may observe a mutation in progress.
pub struct TaskManager {
	group: TaskGroup,
	group_key: String,
	engine: Arc<dyn JobEngine>,
	repository: Arc<dyn TaskRepository>,
	deletion_listeners: DeletionListeners,
	lock: Mutex<()>,
}

impl TaskManager {
	/// Create a manager for the repository's group and subscribe its
	/// completion listener on the engine.
	pub async fn new(engine: Arc<dyn JobEngine>, repository: Arc<dyn TaskRepository>) -> Result<Self> {
		let group = repository.group().clone();
		let group_key = group.key();

		let listener = Arc::new(TaskCompletionListener::new(Arc::clone(&repository)));
		engine
			.add_trigger_listener(&group_key, listener)
			.await
			.map_err(|e| TaskError::Unknown {
				operation: TaskOperation::Subscribe,
				group: group_key.clone(),
				name: String::new(),
				message: e.to_string(),
			})?;

		debug!(group = %group_key, "Task manager initialized");
		Ok(Self {
			group,
			group_key,
			engine,
			repository,
			deletion_listeners: DeletionListeners::new(),
			lock: Mutex::new(()),
		})
	}

	pub fn group(&self) -> &TaskGroup {
		&self.group
	}

	pub fn tenant_id(&self) -> TenantId {
		self.group.tenant_id()
	}

	pub fn task_type(&self) -> &str {
		self.group.task_type()
	}

	/// Register `listener` to be called after `name` is deleted from the
	/// engine. Replaces any earlier registration for the same name.
	pub fn register_deletion_listener(
		&self,
		name: impl Into<String>,
		listener: Arc<dyn TaskDeletionListener>,
	) {
		self.deletion_listeners.register(name, listener);
	}

	pub fn unregister_deletion_listener(&self, name: &str) {
		self.deletion_listeners.unregister(name);
	}

	/// Detach this group's completion listener from the engine. Scheduled
	/// jobs keep firing but are no longer marked finished. Returns whether
	/// a listener was subscribed.
	#[instrument(skip(self), fields(group = %self.group_key))]
	pub async fn unsubscribe(&self) -> Result<bool> {
		let removed = self
			.engine
			.remove_trigger_listener(&self.group_key, &self.group_key)
			.await
			.map_err(|e| TaskError::Unknown {
				operation: TaskOperation::Subscribe,
				group: self.group_key.clone(),
				name: String::new(),
				message: e.to_string(),
			})?;
		debug!(removed, "Completion listener detached");
		Ok(removed)
	}

	/// Persist a task definition without scheduling it.
	#[instrument(skip(self, info), fields(task = %info.name))]
	pub async fn register_task(&self, info: &TaskInfo) -> Result<()> {
		let _guard = self.lock.lock().await;
		self.repository
			.add_task(info)
			.await
			.map_err(|e| TaskError::repository(TaskOperation::Register, &self.group_key, &info.name, e))
	}

	pub async fn get_task(&self, name: &str) -> Result<Option<TaskInfo>> {
		self.repository
			.get_task(name)
			.await
			.map_err(|e| TaskError::repository(TaskOperation::Query, &self.group_key, name, e))
	}

	pub async fn get_all_tasks(&self) -> Result<Vec<TaskInfo>> {
		self.repository
			.get_all_tasks()
			.await
			.map_err(|e| TaskError::repository(TaskOperation::Query, &self.group_key, "", e))
	}

	/// Schedule `name` unless it is already scheduled.
	#[instrument(skip(self))]
	pub async fn schedule_task(&self, name: &str) -> Result<()> {
		let _guard = self.lock.lock().await;
		self.schedule_locked(name).await
	}

	/// Schedule every task in the repository. Failures are logged and
	/// collected; they do not stop the remaining tasks.
	#[instrument(skip(self))]
	pub async fn schedule_all_tasks(&self) -> Result<BatchOutcome> {
		let _guard = self.lock.lock().await;
		let tasks = self
			.repository
			.get_all_tasks()
			.await
			.map_err(|e| TaskError::repository(TaskOperation::Schedule, &self.group_key, "", e))?;

		let mut outcome = BatchOutcome::default();
		for task in tasks {
			let result = self.schedule_locked(&task.name).await;
			if let Err(e) = &result {
				warn!(
					tenant = %self.tenant_id(),
					task_type = %self.task_type(),
					task = %task.name,
					error = %e,
					"Error in scheduling task"
				);
			}
			outcome.record(task.name, result);
		}
		Ok(outcome)
	}

	/// Rebuild the trigger from the stored definition and replace it in the
	/// engine, scheduling the task if the engine does not have it.
	#[instrument(skip(self))]
	pub async fn reschedule_task(&self, name: &str) -> Result<()> {
		let _guard = self.lock.lock().await;
		let op = TaskOperation::Reschedule;
		let key = self.job_key(name);
		let task = self.load_task(op, name).await?;
		let paused = self.is_paused(op, name).await?;

		let trigger = build_trigger(key.clone(), &task.trigger, Utc::now())
			.map_err(|source| self.config_error(name, source))?;

		match self
			.engine
			.reschedule_job(&key, trigger)
			.await
			.map_err(|e| TaskError::engine(op, &self.group_key, name, e))?
		{
			RescheduleOutcome::NotFound => {
				debug!(task = %name, "No trigger to replace, scheduling");
				self.submit(op, &key, &task, paused).await
			}
			RescheduleOutcome::Replaced { next_fire_time } => {
				// replacing a trigger resumes it
				if paused {
					self.pause_job(op, &key).await?;
				}
				info!(
					tenant = %self.tenant_id(),
					task_type = %self.task_type(),
					task = %name,
					next_fire_time = ?next_fire_time,
					"Task rescheduled"
				);
				Ok(())
			}
		}
	}

	#[instrument(skip(self))]
	pub async fn pause_task(&self, name: &str) -> Result<()> {
		let _guard = self.lock.lock().await;
		let op = TaskOperation::Pause;
		self.pause_job(op, &self.job_key(name)).await?;
		self.set_paused(op, name, true).await?;
		info!(tenant = %self.tenant_id(), task_type = %self.task_type(), task = %name, "Task paused");
		Ok(())
	}

	/// Resume a paused task. Missed fire times are skipped when the engine
	/// lets the next fire time be moved.
	#[instrument(skip(self))]
	pub async fn resume_task(&self, name: &str) -> Result<()> {
		let _guard = self.lock.lock().await;
		let op = TaskOperation::Resume;
		let key = self.job_key(name);

		let trigger = self
			.engine
			.trigger(&key)
			.await
			.map_err(|e| TaskError::engine(op, &self.group_key, name, e))?
			.ok_or_else(|| TaskError::no_such_task(op, &self.group_key, name))?;

		if let Some(next) = trigger.fire_time_after(Utc::now()) {
			self.engine
				.set_next_fire_time(&key, next)
				.await
				.map_err(|e| TaskError::engine(op, &self.group_key, name, e))?;
		}

		self.engine
			.resume_job(&key)
			.await
			.map_err(|e| TaskError::engine(op, &self.group_key, name, e))?;
		self.set_paused(op, name, false).await?;
		info!(tenant = %self.tenant_id(), task_type = %self.task_type(), task = %name, "Task resumed");
		Ok(())
	}

	/// Remove `name` from the engine and, when `remove_registration` is set,
	/// from the repository. Returns `true` only if every requested removal
	/// succeeded.
	#[instrument(skip(self))]
	pub async fn delete_task(&self, name: &str, remove_registration: bool) -> Result<bool> {
		let _guard = self.lock.lock().await;
		self.delete_locked(name, remove_registration).await
	}

	/// Remove every scheduled task of the group from the engine. Task
	/// definitions stay in the repository.
	#[instrument(skip(self))]
	pub async fn delete_all_tasks(&self) -> Result<BatchOutcome> {
		let _guard = self.lock.lock().await;
		let keys = self
			.engine
			.trigger_keys(&self.group_key)
			.await
			.map_err(|e| TaskError::engine(TaskOperation::Delete, &self.group_key, "", e))?;

		let mut outcome = BatchOutcome::default();
		for key in keys {
			let result = self.delete_locked(&key.name, false).await.map(|_| ());
			if let Err(e) = &result {
				warn!(
					tenant = %self.tenant_id(),
					task_type = %self.task_type(),
					task = %key.name,
					error = %e,
					"Error in deleting task"
				);
			}
			outcome.record(key.name, result);
		}
		Ok(outcome)
	}

	pub async fn get_task_state(&self, name: &str) -> Result<TaskState> {
		let state = self
			.engine
			.trigger_state(&self.job_key(name))
			.await
			.map_err(|e| TaskError::engine(TaskOperation::Query, &self.group_key, name, e))?;
		Ok(state.into())
	}

	pub async fn get_all_task_states(&self) -> Result<HashMap<String, TaskState>> {
		let keys = self
			.engine
			.trigger_keys(&self.group_key)
			.await
			.map_err(|e| TaskError::engine(TaskOperation::Query, &self.group_key, "", e))?;

		let mut states = HashMap::with_capacity(keys.len());
		for key in keys {
			let state = self.get_task_state(&key.name).await?;
			states.insert(key.name, state);
		}
		Ok(states)
	}

	/// Whether the engine holds a job for `name`. The repository is not
	/// consulted.
	pub async fn is_task_scheduled(&self, name: &str) -> Result<bool> {
		self.engine
			.check_exists(&self.job_key(name))
			.await
			.map_err(|e| TaskError::engine(TaskOperation::Query, &self.group_key, name, e))
	}

	/// Repository tasks that are currently scheduled.
	pub async fn get_all_running_tasks(&self) -> Result<Vec<TaskInfo>> {
		let mut running = Vec::new();
		for task in self.get_all_tasks().await? {
			if self.is_task_scheduled(&task.name).await? {
				running.push(task);
			}
		}
		Ok(running)
	}

	fn job_key(&self, name: &str) -> JobKey {
		JobKey::new(self.group_key.clone(), name)
	}

	fn config_error(&self, name: &str, source: crate::trigger::TriggerError) -> TaskError {
		TaskError::Config {
			group: self.group_key.clone(),
			name: name.to_string(),
			source,
		}
	}

	async fn load_task(&self, op: TaskOperation, name: &str) -> Result<TaskInfo> {
		self.repository
			.get_task(name)
			.await
			.map_err(|e| TaskError::repository(op, &self.group_key, name, e))?
			.ok_or_else(|| TaskError::no_such_task(op, &self.group_key, name))
	}

	async fn is_paused(&self, op: TaskOperation, name: &str) -> Result<bool> {
		self.repository
			.is_task_paused(name)
			.await
			.map_err(|e| TaskError::repository(op, &self.group_key, name, e))
	}

	async fn set_paused(&self, op: TaskOperation, name: &str, paused: bool) -> Result<()> {
		self.repository
			.set_task_paused(name, paused)
			.await
			.map_err(|e| TaskError::repository(op, &self.group_key, name, e))
	}

	async fn pause_job(&self, op: TaskOperation, key: &JobKey) -> Result<()> {
		self.engine
			.pause_job(key)
			.await
			.map_err(|e| TaskError::engine(op, &self.group_key, &key.name, e))
	}

	async fn schedule_locked(&self, name: &str) -> Result<()> {
		let op = TaskOperation::Schedule;
		let key = self.job_key(name);

		let exists = self
			.engine
			.check_exists(&key)
			.await
			.map_err(|e| TaskError::engine(op, &self.group_key, name, e))?;
		if exists {
			debug!(task = %name, "Task already scheduled");
			return Ok(());
		}

		let task = self.load_task(op, name).await?;
		let paused = self.is_paused(op, name).await?;
		self.submit(op, &key, &task, paused).await
	}

	async fn submit(&self, op: TaskOperation, key: &JobKey, task: &TaskInfo, paused: bool) -> Result<()> {
		let trigger = build_trigger(key.clone(), &task.trigger, Utc::now())
			.map_err(|source| self.config_error(&task.name, source))?;

		self.engine
			.schedule_job(JobDetail::from_task(key.clone(), task), trigger)
			.await
			.map_err(|e| TaskError::engine(op, &self.group_key, &task.name, e))?;

		if paused {
			self.pause_job(op, key).await?;
		}

		info!(
			tenant = %self.tenant_id(),
			task_type = %self.task_type(),
			task = %task.name,
			paused,
			"Task scheduled"
		);
		Ok(())
	}

	async fn delete_locked(&self, name: &str, remove_registration: bool) -> Result<bool> {
		let op = TaskOperation::Delete;
		let mut deleted = self
			.engine
			.delete_job(&self.job_key(name))
			.await
			.map_err(|e| TaskError::engine(op, &self.group_key, name, e))?;

		if deleted {
			info!(tenant = %self.tenant_id(), task_type = %self.task_type(), task = %name, "Task deleted");
			self.deletion_listeners.notify(name);
		}

		if remove_registration {
			let removed = self
				.repository
				.delete_task(name)
				.await
				.map_err(|e| TaskError::repository(op, &self.group_key, name, e))?;
			deleted &= removed;
		}
		Ok(deleted)
	}
}
