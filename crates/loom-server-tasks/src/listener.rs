// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Completion listener: marks tasks finished once their schedule runs out.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::engine::TriggerListener;
use crate::repository::TaskRepository;
use crate::trigger::EngineTrigger;

/// Subscribed to one task group. When a trigger completes with no next fire
/// time the task is recorded as finished in the repository.
///
/// Repository failures are logged and swallowed so they never disturb the
/// engine's event delivery.
pub struct TaskCompletionListener {
	name: String,
	repository: Arc<dyn TaskRepository>,
}

impl TaskCompletionListener {
	pub fn new(repository: Arc<dyn TaskRepository>) -> Self {
		Self {
			name: repository.group().key(),
			repository,
		}
	}
}

#[async_trait]
impl TriggerListener for TaskCompletionListener {
	fn name(&self) -> &str {
		&self.name
	}

	async fn trigger_misfired(&self, trigger: &EngineTrigger) {
		debug!(group = %self.name, task = %trigger.key.name, "Task misfired");
	}

	async fn trigger_complete(&self, trigger: &EngineTrigger) {
		if trigger.next_fire_time.is_some() {
			return;
		}
		let task = &trigger.key.name;
		match self.repository.set_task_finished(task, true).await {
			Ok(()) => info!(group = %self.name, task = %task, "Task finished"),
			Err(e) => error!(group = %self.name, task = %task, error = %e, "Error in finishing task"),
		}
	}
}
