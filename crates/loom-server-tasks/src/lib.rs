// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tenant-scoped task scheduling for Loom server.
//!
//! [`TaskManager`] turns durable task definitions ([`loom_tasks_core::TaskInfo`])
//! into jobs and triggers on a pluggable [`JobEngine`], scoped to one tenant and
//! task type. It keeps the task repository and the engine in agreement on
//! paused and finished tasks, and notifies registered listeners on deletion.
//!
//! [`MemoryJobEngine`] is an in-process engine suitable for a single node and
//! for tests; [`SqliteTaskRepository`] persists task definitions.

pub mod config;
pub mod engine;
pub mod error;
pub mod listener;
pub mod manager;
pub mod memory;
pub mod notifier;
pub mod repository;
pub mod trigger;

pub use config::{load_config_from_sources, ConfigError, TasksConfig, TasksConfigLayer};
pub use engine::{
	EngineError, EngineResult, JobDetail, JobEngine, JobKey, RescheduleOutcome, TriggerListener,
	TriggerState,
};
pub use error::{Result, TaskError, TaskOperation};
pub use listener::TaskCompletionListener;
pub use manager::{BatchOutcome, TaskManager};
pub use memory::{JobRunner, MemoryJobEngine};
pub use notifier::{DeletionListeners, TaskDeletionListener};
pub use repository::{
	InMemoryTaskRepository, RepositoryError, SqliteTaskRepository, TaskRepository,
};
pub use trigger::{
	build_trigger, CronMisfireInstruction, EngineSchedule, EngineTrigger, RepeatCount,
	SimpleMisfireInstruction, TriggerError,
};
