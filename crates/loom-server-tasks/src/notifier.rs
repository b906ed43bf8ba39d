// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-task deletion listeners.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Notified when a scheduled task is deleted from the engine.
pub trait TaskDeletionListener: Send + Sync {
	fn task_deleted(&self, name: &str);
}

impl<F> TaskDeletionListener for F
where
	F: Fn(&str) + Send + Sync,
{
	fn task_deleted(&self, name: &str) {
		self(name)
	}
}

/// At most one listener per task name; the last registration wins.
///
/// Notifying does not consume the registration. Callers remove it with
/// [`DeletionListeners::unregister`] when they no longer care.
#[derive(Default)]
pub struct DeletionListeners {
	listeners: RwLock<HashMap<String, Arc<dyn TaskDeletionListener>>>,
}

impl DeletionListeners {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the listener this registration replaced, if any.
	pub fn register(
		&self,
		name: impl Into<String>,
		listener: Arc<dyn TaskDeletionListener>,
	) -> Option<Arc<dyn TaskDeletionListener>> {
		self.listeners
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(name.into(), listener)
	}

	pub fn unregister(&self, name: &str) -> Option<Arc<dyn TaskDeletionListener>> {
		self.listeners
			.write()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(name)
	}

	/// Call the listener for `name`. Returns whether one was registered.
	pub fn notify(&self, name: &str) -> bool {
		// clone out so the listener runs without the lock held
		let listener = self
			.listeners
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.get(name)
			.cloned();
		match listener {
			Some(listener) => {
				listener.task_deleted(name);
				true
			}
			None => false,
		}
	}
}
