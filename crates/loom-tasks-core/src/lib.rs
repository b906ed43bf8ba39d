// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for Loom task scheduling.
//!
//! A task is a named, tenant-owned unit of work with a trigger policy (cron or
//! interval based). This crate holds the engine-independent vocabulary shared
//! by the scheduling manager (`loom-server-tasks`) and its callers:
//!
//! - [`TaskInfo`] / [`TriggerInfo`]: the durable task definition
//! - [`MisfirePolicy`]: catch-up behaviour for late fire times
//! - [`TaskState`]: the abstract state reported for a scheduled task
//! - [`TaskGroup`]: the `(tenant, task type)` namespace and its engine key

pub mod error;
pub mod group;
pub mod state;
pub mod task;

pub use error::{Result, TasksError};
pub use group::{TaskGroup, TenantId};
pub use state::TaskState;
pub use task::{MisfirePolicy, TaskInfo, TriggerInfo, TriggerSchedule, REPEAT_FOREVER};
