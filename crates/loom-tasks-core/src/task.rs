// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task definitions: the durable record a scheduler derives its triggers from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TasksError};

/// Interval repeat count meaning "repeat until the end time, if any".
pub const REPEAT_FOREVER: i32 = -1;

/// A named, schedulable unit of work owned by one tenant and task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
	/// Unique within its task group
	pub name: String,
	/// Opaque reference to the task body; passed through to the engine
	pub task_class: String,
	/// Opaque payload passed through to the engine
	#[serde(default)]
	pub properties: HashMap<String, String>,
	pub trigger: TriggerInfo,
}

impl TaskInfo {
	pub fn new(
		name: impl Into<String>,
		task_class: impl Into<String>,
		trigger: TriggerInfo,
	) -> Result<Self> {
		let name = name.into();
		if !Self::validate_name(&name) {
			return Err(TasksError::InvalidTaskName(name));
		}
		Ok(Self {
			name,
			task_class: task_class.into(),
			properties: HashMap::new(),
			trigger,
		})
	}

	pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.properties.insert(key.into(), value.into());
		self
	}

	/// Names must be non-empty and free of control characters.
	pub fn validate_name(name: &str) -> bool {
		!name.is_empty() && !name.chars().any(char::is_control)
	}
}

/// The two mutually exclusive schedule shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerSchedule {
	/// Cron expression, e.g. `"0 0 * * * ?"` for the top of every hour
	Cron { expression: String },
	/// Fixed interval.
	///
	/// `repeat_count`: `-1` repeats forever, `0` fires exactly once, `n > 0`
	/// fires once and then repeats `n` more times.
	Interval {
		repeat_count: i32,
		interval_millis: u64,
	},
}

impl TriggerSchedule {
	pub fn schedule_type(&self) -> &'static str {
		match self {
			Self::Cron { .. } => "cron",
			Self::Interval { .. } => "interval",
		}
	}

	pub fn is_cron(&self) -> bool {
		matches!(self, Self::Cron { .. })
	}
}

/// When and how a task fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerInfo {
	pub schedule: TriggerSchedule,
	/// `None` means "now" at the moment the trigger is submitted
	pub start_time: Option<DateTime<Utc>>,
	pub end_time: Option<DateTime<Utc>>,
	#[serde(default)]
	pub misfire_policy: MisfirePolicy,
	#[serde(default)]
	pub disallow_concurrent_execution: bool,
}

impl TriggerInfo {
	pub fn cron(expression: impl Into<String>) -> Self {
		Self::with_schedule(TriggerSchedule::Cron {
			expression: expression.into(),
		})
	}

	pub fn interval(repeat_count: i32, interval_millis: u64) -> Self {
		Self::with_schedule(TriggerSchedule::Interval {
			repeat_count,
			interval_millis,
		})
	}

	/// Fire exactly once.
	pub fn once() -> Self {
		Self::interval(0, 0)
	}

	fn with_schedule(schedule: TriggerSchedule) -> Self {
		Self {
			schedule,
			start_time: None,
			end_time: None,
			misfire_policy: MisfirePolicy::Default,
			disallow_concurrent_execution: false,
		}
	}

	pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
		self.start_time = Some(start);
		self
	}

	pub fn ending_at(mut self, end: DateTime<Utc>) -> Self {
		self.end_time = Some(end);
		self
	}

	pub fn misfire_policy(mut self, policy: MisfirePolicy) -> Self {
		self.misfire_policy = policy;
		self
	}

	pub fn disallow_concurrent_execution(mut self, disallow: bool) -> Self {
		self.disallow_concurrent_execution = disallow;
		self
	}
}

/// Catch-up behaviour when a fire time could not be honoured on time.
///
/// One flat enumeration covers both schedule shapes; which values are legal
/// depends on the shape and is checked when the trigger is built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MisfirePolicy {
	/// Let the engine pick ("smart" policy)
	#[default]
	Default,
	/// Fire every missed time as soon as possible
	IgnoreMisfires,
	/// Cron only: fire once now, then continue the schedule
	FireAndProceed,
	/// Cron only: skip missed times and wait for the next one
	DoNothing,
	/// Interval only: fire now
	FireNow,
	/// Interval only: wait for the next time, missed repeats not consumed
	NextWithExistingCount,
	/// Interval only: wait for the next time, missed repeats consumed
	NextWithRemainingCount,
	/// Interval only: fire now, missed repeats not consumed
	NowWithExistingCount,
	/// Interval only: fire now, missed repeats consumed
	NowWithRemainingCount,
}

impl MisfirePolicy {
	pub const ALL: [MisfirePolicy; 9] = [
		MisfirePolicy::Default,
		MisfirePolicy::IgnoreMisfires,
		MisfirePolicy::FireAndProceed,
		MisfirePolicy::DoNothing,
		MisfirePolicy::FireNow,
		MisfirePolicy::NextWithExistingCount,
		MisfirePolicy::NextWithRemainingCount,
		MisfirePolicy::NowWithExistingCount,
		MisfirePolicy::NowWithRemainingCount,
	];

	pub fn valid_for_cron(self) -> bool {
		matches!(
			self,
			Self::Default | Self::IgnoreMisfires | Self::FireAndProceed | Self::DoNothing
		)
	}

	pub fn valid_for_interval(self) -> bool {
		matches!(
			self,
			Self::Default
				| Self::IgnoreMisfires
				| Self::FireNow
				| Self::NextWithExistingCount
				| Self::NextWithRemainingCount
				| Self::NowWithExistingCount
				| Self::NowWithRemainingCount
		)
	}

	pub fn is_valid_for(self, schedule: &TriggerSchedule) -> bool {
		match schedule {
			TriggerSchedule::Cron { .. } => self.valid_for_cron(),
			TriggerSchedule::Interval { .. } => self.valid_for_interval(),
		}
	}
}

impl fmt::Display for MisfirePolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Default => "default",
			Self::IgnoreMisfires => "ignore_misfires",
			Self::FireAndProceed => "fire_and_proceed",
			Self::DoNothing => "do_nothing",
			Self::FireNow => "fire_now",
			Self::NextWithExistingCount => "next_with_existing_count",
			Self::NextWithRemainingCount => "next_with_remaining_count",
			Self::NowWithExistingCount => "now_with_existing_count",
			Self::NowWithRemainingCount => "now_with_remaining_count",
		};
		f.write_str(s)
	}
}

impl FromStr for MisfirePolicy {
	type Err = TasksError;

	fn from_str(s: &str) -> Result<Self> {
		Self::ALL
			.into_iter()
			.find(|policy| policy.to_string().eq_ignore_ascii_case(s))
			.ok_or_else(|| TasksError::UnknownMisfirePolicy(s.to_string()))
	}
}
