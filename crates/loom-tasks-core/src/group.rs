// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task groups: the `(tenant, task type)` namespace tasks are scheduled under.
//!
//! The scheduling engine keeps jobs and triggers in a flat `(group, name)`
//! namespace. Every task of one tenant and task type lives under a single
//! group key of the form `tenant:<id>:type:<type>`. The tenant id is numeric,
//! so the first `:type:` separator is always the one written by
//! [`TaskGroup::key`] and two different pairs can never render the same key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TasksError};

const TENANT_PREFIX: &str = "tenant:";
const TYPE_SEPARATOR: &str = ":type:";

/// Numeric tenant identifier. Tenant `0` is the super tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub i64);

impl TenantId {
	pub const SUPER_TENANT: TenantId = TenantId(0);
}

impl fmt::Display for TenantId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for TenantId {
	type Err = std::num::ParseIntError;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(s.parse()?))
	}
}

/// A `(tenant, task type)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskGroup {
	tenant_id: TenantId,
	task_type: String,
}

impl TaskGroup {
	/// Create a group, rejecting empty task types and types containing
	/// whitespace or control characters.
	pub fn new(tenant_id: TenantId, task_type: impl Into<String>) -> Result<Self> {
		let task_type = task_type.into();
		if !Self::validate_task_type(&task_type) {
			return Err(TasksError::InvalidTaskType(task_type));
		}
		Ok(Self {
			tenant_id,
			task_type,
		})
	}

	pub fn validate_task_type(task_type: &str) -> bool {
		!task_type.is_empty()
			&& !task_type
				.chars()
				.any(|c| c.is_whitespace() || c.is_control())
	}

	pub fn tenant_id(&self) -> TenantId {
		self.tenant_id
	}

	pub fn task_type(&self) -> &str {
		&self.task_type
	}

	/// The engine-level group key for this pair.
	pub fn key(&self) -> String {
		format!(
			"{}{}{}{}",
			TENANT_PREFIX, self.tenant_id, TYPE_SEPARATOR, self.task_type
		)
	}
}

impl fmt::Display for TaskGroup {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.key())
	}
}

impl FromStr for TaskGroup {
	type Err = TasksError;

	fn from_str(s: &str) -> Result<Self> {
		let rest = s
			.strip_prefix(TENANT_PREFIX)
			.ok_or_else(|| TasksError::InvalidGroupKey(s.to_string()))?;
		let (tenant, task_type) = rest
			.split_once(TYPE_SEPARATOR)
			.ok_or_else(|| TasksError::InvalidGroupKey(s.to_string()))?;
		let tenant_id = tenant
			.parse()
			.map_err(|_| TasksError::InvalidGroupKey(s.to_string()))?;
		Self::new(tenant_id, task_type)
	}
}
