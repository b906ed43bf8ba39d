// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Translation of [`TriggerInfo`] into engine-native triggers, and the fire
//! time arithmetic those triggers carry.

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use thiserror::Error;

use loom_tasks_core::{MisfirePolicy, TriggerInfo, TriggerSchedule, REPEAT_FOREVER};

use crate::engine::JobKey;

/// Result type for trigger translation.
pub type Result<T> = std::result::Result<T, TriggerError>;

/// Reasons a [`TriggerInfo`] cannot be turned into an engine trigger.
#[derive(Debug, Error)]
pub enum TriggerError {
	#[error("the task misfire policy '{policy}' cannot be used in {shape} schedule tasks")]
	IncompatibleMisfirePolicy {
		policy: MisfirePolicy,
		shape: &'static str,
	},

	#[error("invalid cron expression {expression:?}: {reason}")]
	InvalidCronExpression { expression: String, reason: String },

	#[error("invalid repeat count: {0}")]
	InvalidRepeatCount(i32),

	#[error("a repeating trigger needs a positive interval")]
	ZeroInterval,

	#[error("interval of {0}ms is out of range")]
	IntervalOutOfRange(u64),

	#[error("trigger will never fire")]
	NeverFires,
}

/// How many times an interval trigger repeats after its first fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatCount {
	Forever,
	Times(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronMisfireInstruction {
	Smart,
	IgnoreMisfires,
	FireOnceNow,
	DoNothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimpleMisfireInstruction {
	Smart,
	IgnoreMisfires,
	FireNow,
	RescheduleNextWithExistingCount,
	RescheduleNextWithRemainingCount,
	RescheduleNowWithExistingCount,
	RescheduleNowWithRemainingCount,
}

/// Engine-native schedule shape.
#[derive(Debug, Clone)]
pub enum EngineSchedule {
	/// Fires once at the start time.
	Once,
	Simple {
		interval: Duration,
		repeat: RepeatCount,
		misfire: SimpleMisfireInstruction,
	},
	Cron {
		expression: String,
		schedule: Box<Schedule>,
		misfire: CronMisfireInstruction,
	},
}

/// A trigger as stored by a job engine.
#[derive(Debug, Clone)]
pub struct EngineTrigger {
	pub key: JobKey,
	pub start_time: DateTime<Utc>,
	pub end_time: Option<DateTime<Utc>>,
	pub schedule: EngineSchedule,
	pub next_fire_time: Option<DateTime<Utc>>,
	pub previous_fire_time: Option<DateTime<Utc>>,
	/// Fires since `start_time`
	pub times_triggered: u32,
}

/// Build the engine trigger for `info` under `key`.
///
/// A missing start time resolves to `now`, so every submission gets a fresh
/// start. Misfire policies that do not apply to the schedule shape are
/// rejected rather than ignored.
pub fn build_trigger(key: JobKey, info: &TriggerInfo, now: DateTime<Utc>) -> Result<EngineTrigger> {
	let schedule = match &info.schedule {
		TriggerSchedule::Cron { expression } => {
			let misfire = cron_misfire_instruction(info.misfire_policy)?;
			let schedule = parse_cron_expression(expression)?;
			EngineSchedule::Cron {
				expression: expression.clone(),
				schedule: Box::new(schedule),
				misfire,
			}
		}
		TriggerSchedule::Interval {
			repeat_count,
			interval_millis,
		} => {
			let misfire = simple_misfire_instruction(info.misfire_policy)?;
			let repeat = match *repeat_count {
				0 => None,
				REPEAT_FOREVER => Some(RepeatCount::Forever),
				n if n > 0 => Some(RepeatCount::Times(n.unsigned_abs())),
				n => return Err(TriggerError::InvalidRepeatCount(n)),
			};
			match repeat {
				None => EngineSchedule::Once,
				Some(repeat) => EngineSchedule::Simple {
					interval: interval_from_millis(*interval_millis)?,
					repeat,
					misfire,
				},
			}
		}
	};

	let mut trigger = EngineTrigger {
		key,
		start_time: info.start_time.unwrap_or(now),
		end_time: info.end_time,
		schedule,
		next_fire_time: None,
		previous_fire_time: None,
		times_triggered: 0,
	};
	trigger.next_fire_time = trigger.first_fire_time();
	if trigger.next_fire_time.is_none() {
		return Err(TriggerError::NeverFires);
	}
	Ok(trigger)
}

fn cron_misfire_instruction(policy: MisfirePolicy) -> Result<CronMisfireInstruction> {
	match policy {
		MisfirePolicy::Default => Ok(CronMisfireInstruction::Smart),
		MisfirePolicy::IgnoreMisfires => Ok(CronMisfireInstruction::IgnoreMisfires),
		MisfirePolicy::FireAndProceed => Ok(CronMisfireInstruction::FireOnceNow),
		MisfirePolicy::DoNothing => Ok(CronMisfireInstruction::DoNothing),
		policy => Err(TriggerError::IncompatibleMisfirePolicy {
			policy,
			shape: "cron",
		}),
	}
}

fn simple_misfire_instruction(policy: MisfirePolicy) -> Result<SimpleMisfireInstruction> {
	use SimpleMisfireInstruction as I;
	match policy {
		MisfirePolicy::Default => Ok(I::Smart),
		MisfirePolicy::IgnoreMisfires => Ok(I::IgnoreMisfires),
		MisfirePolicy::FireNow => Ok(I::FireNow),
		MisfirePolicy::NextWithExistingCount => Ok(I::RescheduleNextWithExistingCount),
		MisfirePolicy::NextWithRemainingCount => Ok(I::RescheduleNextWithRemainingCount),
		MisfirePolicy::NowWithExistingCount => Ok(I::RescheduleNowWithExistingCount),
		MisfirePolicy::NowWithRemainingCount => Ok(I::RescheduleNowWithRemainingCount),
		policy => Err(TriggerError::IncompatibleMisfirePolicy {
			policy,
			shape: "simple",
		}),
	}
}

fn interval_from_millis(millis: u64) -> Result<Duration> {
	if millis == 0 {
		return Err(TriggerError::ZeroInterval);
	}
	i64::try_from(millis)
		.ok()
		.and_then(Duration::try_milliseconds)
		.ok_or(TriggerError::IntervalOutOfRange(millis))
}

/// Convert an expression to the 6/7-field form the `cron` crate parses.
///
/// Quartz-style expressions use `?` for "no specific value" in the day
/// fields; the `cron` crate spells that `*`. Classic 5-field Unix
/// expressions get a `0` seconds field and a `*` year field.
fn normalize_cron_expression(expression: &str) -> String {
	let fields: Vec<&str> = expression
		.split_whitespace()
		.map(|field| if field == "?" { "*" } else { field })
		.collect();
	if fields.len() == 5 {
		format!("0 {} *", fields.join(" "))
	} else {
		fields.join(" ")
	}
}

/// Parse and validate a cron expression.
pub fn parse_cron_expression(expression: &str) -> Result<Schedule> {
	Schedule::from_str(&normalize_cron_expression(expression)).map_err(|e| {
		TriggerError::InvalidCronExpression {
			expression: expression.to_string(),
			reason: e.to_string(),
		}
	})
}

impl EngineTrigger {
	/// First time at or after the start time the trigger fires.
	pub fn first_fire_time(&self) -> Option<DateTime<Utc>> {
		match self.schedule {
			EngineSchedule::Once | EngineSchedule::Simple { .. } => {
				self.within_end(self.start_time)
			}
			EngineSchedule::Cron { .. } => {
				self.fire_time_after(self.start_time - Duration::milliseconds(1))
			}
		}
	}

	/// Next time strictly after `after` the schedule fires, ignoring
	/// pause state and how many times it already fired.
	pub fn fire_time_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
		let candidate = match &self.schedule {
			EngineSchedule::Once => (self.start_time > after).then_some(self.start_time),
			EngineSchedule::Simple {
				interval, repeat, ..
			} => simple_fire_time_after(self.start_time, *interval, *repeat, after),
			EngineSchedule::Cron { schedule, .. } => {
				let from = if after < self.start_time {
					self.start_time - Duration::seconds(1)
				} else {
					after
				};
				schedule
					.after(&from)
					.find(|time| *time >= self.start_time && *time > after)
			}
		}?;
		self.within_end(candidate)
	}

	fn within_end(&self, time: DateTime<Utc>) -> Option<DateTime<Utc>> {
		match self.end_time {
			Some(end) if time > end => None,
			_ => Some(time),
		}
	}

	/// Advance past the fire time that is being executed now.
	pub fn triggered(&mut self) {
		self.times_triggered = self.times_triggered.saturating_add(1);
		self.previous_fire_time = self.next_fire_time;
		self.next_fire_time = self
			.next_fire_time
			.and_then(|fired| self.fire_time_after(fired));
	}

	/// Overwrite the next fire time, keeping the repeat bookkeeping of
	/// interval triggers in step with the slot it points at.
	pub fn set_next_fire_time(&mut self, next: Option<DateTime<Utc>>) {
		self.next_fire_time = next;
		self.sync_times_triggered();
	}

	/// Whether the pending fire time is later than `threshold` allows.
	pub fn is_misfired(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
		self.next_fire_time
			.and_then(|next| next.checked_add_signed(threshold))
			.is_some_and(|limit| limit < now)
	}

	/// Apply the misfire instruction. Afterwards `next_fire_time` is either
	/// a time to fire immediately (`<= now`), a future time, or `None` when
	/// the schedule is exhausted.
	pub fn update_after_misfire(&mut self, now: DateTime<Utc>) {
		match self.schedule.clone() {
			EngineSchedule::Once => {
				self.next_fire_time = Some(now);
			}
			EngineSchedule::Cron { misfire, .. } => match misfire {
				CronMisfireInstruction::IgnoreMisfires => {}
				CronMisfireInstruction::Smart | CronMisfireInstruction::FireOnceNow => {
					self.next_fire_time = Some(now);
				}
				CronMisfireInstruction::DoNothing => {
					self.next_fire_time = self.fire_time_after(now);
				}
			},
			EngineSchedule::Simple {
				interval,
				repeat,
				misfire,
			} => self.update_simple_after_misfire(now, interval, repeat, misfire),
		}
	}

	fn update_simple_after_misfire(
		&mut self,
		now: DateTime<Utc>,
		interval: Duration,
		repeat: RepeatCount,
		misfire: SimpleMisfireInstruction,
	) {
		use SimpleMisfireInstruction as I;

		enum Action {
			Ignore,
			NowWithExisting,
			NowWithRemaining,
			NextWithExisting,
			NextWithRemaining,
		}

		let action = match misfire {
			I::Smart => match repeat {
				RepeatCount::Forever => Action::NextWithRemaining,
				RepeatCount::Times(_) => Action::NowWithExisting,
			},
			I::IgnoreMisfires => Action::Ignore,
			I::FireNow | I::RescheduleNowWithRemainingCount => Action::NowWithRemaining,
			I::RescheduleNowWithExistingCount => Action::NowWithExisting,
			I::RescheduleNextWithExistingCount => Action::NextWithExisting,
			I::RescheduleNextWithRemainingCount => Action::NextWithRemaining,
		};

		let remaining = self.remaining_fires();
		match action {
			Action::Ignore => {}
			Action::NowWithExisting => self.rebase(now, remaining),
			Action::NowWithRemaining => {
				let missed = self.missed_fires(now, interval);
				// the fire now stands in for the first missed slot
				let remaining =
					remaining.map(|r| r.saturating_sub(missed.saturating_sub(1)).max(1));
				self.rebase(now, remaining);
			}
			Action::NextWithRemaining => {
				self.next_fire_time = self.fire_time_after(now);
				self.sync_times_triggered();
			}
			Action::NextWithExisting => {
				match simple_fire_time_after(self.start_time, interval, RepeatCount::Forever, now) {
					Some(next) => self.rebase(next, remaining),
					None => self.next_fire_time = None,
				}
			}
		}
	}

	/// Fires left on an interval trigger, counting the pending one.
	/// `None` means unbounded.
	fn remaining_fires(&self) -> Option<u32> {
		match self.schedule {
			EngineSchedule::Simple {
				repeat: RepeatCount::Times(n),
				..
			} => Some(n.saturating_add(1).saturating_sub(self.times_triggered)),
			EngineSchedule::Once => Some(1),
			_ => None,
		}
	}

	/// Number of scheduled slots from the pending fire time up to `now`.
	fn missed_fires(&self, now: DateTime<Utc>, interval: Duration) -> u32 {
		let Some(next) = self.next_fire_time else {
			return 0;
		};
		let interval_ms = interval.num_milliseconds().max(1);
		let behind = (now - next).num_milliseconds().max(0) / interval_ms + 1;
		let missed = u32::try_from(behind).unwrap_or(u32::MAX);
		match self.remaining_fires() {
			Some(remaining) => missed.min(remaining),
			None => missed,
		}
	}

	/// Restart an interval schedule at `start` with `remaining` fires left.
	fn rebase(&mut self, start: DateTime<Utc>, remaining: Option<u32>) {
		self.start_time = start;
		self.times_triggered = 0;
		if let (EngineSchedule::Simple { repeat, .. }, Some(remaining)) =
			(&mut self.schedule, remaining)
		{
			*repeat = RepeatCount::Times(remaining.saturating_sub(1));
		}
		self.next_fire_time = match remaining {
			Some(0) => None,
			_ => self.within_end(start),
		};
	}

	fn sync_times_triggered(&mut self) {
		if let (EngineSchedule::Simple { interval, .. }, Some(next)) =
			(&self.schedule, self.next_fire_time)
		{
			let interval_ms = interval.num_milliseconds().max(1);
			let slot = (next - self.start_time).num_milliseconds().max(0) / interval_ms;
			self.times_triggered = u32::try_from(slot).unwrap_or(u32::MAX);
		}
	}
}

fn simple_fire_time_after(
	start: DateTime<Utc>,
	interval: Duration,
	repeat: RepeatCount,
	after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
	if after < start {
		return Some(start);
	}
	let interval_ms = interval.num_milliseconds();
	if interval_ms <= 0 {
		return None;
	}
	let index = (after - start).num_milliseconds() / interval_ms + 1;
	if let RepeatCount::Times(n) = repeat {
		if index > i64::from(n) {
			return None;
		}
	}
	let offset = index
		.checked_mul(interval_ms)
		.and_then(Duration::try_milliseconds)?;
	start.checked_add_signed(offset)
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn key() -> JobKey {
		JobKey::new("tenant:1:type:test", "task")
	}

	fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2026, 1, 19, h, m, s).unwrap()
	}

	#[test]
	fn cron_with_ignore_misfires() {
		let info = TriggerInfo::cron("0 0 * * * ?").misfire_policy(MisfirePolicy::IgnoreMisfires);
		let trigger = build_trigger(key(), &info, at(10, 30, 0)).unwrap();

		assert!(matches!(
			trigger.schedule,
			EngineSchedule::Cron {
				misfire: CronMisfireInstruction::IgnoreMisfires,
				..
			}
		));
		assert_eq!(trigger.next_fire_time, Some(at(11, 0, 0)));
	}

	#[test]
	fn every_policy_shape_pair_follows_the_table() {
		let shapes = [
			TriggerInfo::cron("0 0 * * * ?"),
			TriggerInfo::interval(REPEAT_FOREVER, 1000),
			TriggerInfo::interval(3, 1000),
			TriggerInfo::once(),
		];
		for shape in shapes {
			for policy in MisfirePolicy::ALL {
				let info = shape.clone().misfire_policy(policy);
				let result = build_trigger(key(), &info, at(10, 0, 0));
				if policy.is_valid_for(&info.schedule) {
					assert!(result.is_ok(), "{policy} should be accepted");
				} else {
					assert!(
						matches!(result, Err(TriggerError::IncompatibleMisfirePolicy { .. })),
						"{policy} should be rejected"
					);
				}
			}
		}
	}

	#[test]
	fn repeat_zero_fires_once_regardless_of_interval() {
		let info = TriggerInfo::interval(0, 60_000);
		let mut trigger = build_trigger(key(), &info, at(10, 0, 0)).unwrap();

		assert!(matches!(trigger.schedule, EngineSchedule::Once));
		assert_eq!(trigger.next_fire_time, Some(at(10, 0, 0)));

		trigger.triggered();
		assert_eq!(trigger.previous_fire_time, Some(at(10, 0, 0)));
		assert_eq!(trigger.next_fire_time, None);
	}

	#[test]
	fn repeat_forever_keeps_going() {
		let info = TriggerInfo::interval(REPEAT_FOREVER, 5000);
		let mut trigger = build_trigger(key(), &info, at(10, 0, 0)).unwrap();

		for _ in 0..1000 {
			trigger.triggered();
		}
		assert_eq!(trigger.next_fire_time, Some(at(10, 0, 0) + Duration::seconds(5000)));
	}

	#[test]
	fn repeat_count_is_additional_fires() {
		let info = TriggerInfo::interval(2, 1000);
		let mut trigger = build_trigger(key(), &info, at(10, 0, 0)).unwrap();

		let mut fired = Vec::new();
		while let Some(next) = trigger.next_fire_time {
			fired.push(next);
			trigger.triggered();
		}
		assert_eq!(fired, vec![at(10, 0, 0), at(10, 0, 1), at(10, 0, 2)]);
	}

	#[test]
	fn missing_start_uses_submission_time() {
		let info = TriggerInfo::interval(REPEAT_FOREVER, 1000);
		let first = build_trigger(key(), &info, at(10, 0, 0)).unwrap();
		let second = build_trigger(key(), &info, at(12, 0, 0)).unwrap();

		assert_eq!(first.start_time, at(10, 0, 0));
		assert_eq!(second.start_time, at(12, 0, 0));
	}

	#[test]
	fn explicit_start_is_kept() {
		let info = TriggerInfo::once().starting_at(at(15, 0, 0));
		let trigger = build_trigger(key(), &info, at(10, 0, 0)).unwrap();
		assert_eq!(trigger.next_fire_time, Some(at(15, 0, 0)));
	}

	#[test]
	fn end_time_stops_interval() {
		let info = TriggerInfo::interval(REPEAT_FOREVER, 60_000).ending_at(at(10, 2, 30));
		let mut trigger = build_trigger(key(), &info, at(10, 0, 0)).unwrap();

		let mut count = 0;
		while trigger.next_fire_time.is_some() {
			trigger.triggered();
			count += 1;
		}
		assert_eq!(count, 3);
	}

	#[test]
	fn end_before_start_never_fires() {
		let info = TriggerInfo::cron("0 0 * * * ?")
			.starting_at(at(12, 0, 1))
			.ending_at(at(12, 30, 0));
		assert!(matches!(
			build_trigger(key(), &info, at(10, 0, 0)),
			Err(TriggerError::NeverFires)
		));
	}

	#[test]
	fn malformed_cron_is_rejected() {
		let info = TriggerInfo::cron("not a cron");
		assert!(matches!(
			build_trigger(key(), &info, at(10, 0, 0)),
			Err(TriggerError::InvalidCronExpression { .. })
		));
	}

	#[test]
	fn five_field_cron_is_accepted() {
		let info = TriggerInfo::cron("*/15 * * * *");
		let trigger = build_trigger(key(), &info, at(10, 32, 0)).unwrap();
		assert_eq!(trigger.next_fire_time, Some(at(10, 45, 0)));
	}

	#[test]
	fn invalid_repeat_and_interval() {
		assert!(matches!(
			build_trigger(key(), &TriggerInfo::interval(-2, 1000), at(10, 0, 0)),
			Err(TriggerError::InvalidRepeatCount(-2))
		));
		assert!(matches!(
			build_trigger(key(), &TriggerInfo::interval(3, 0), at(10, 0, 0)),
			Err(TriggerError::ZeroInterval)
		));
	}

	#[test]
	fn fire_time_after_is_strict() {
		let info = TriggerInfo::interval(REPEAT_FOREVER, 1000);
		let trigger = build_trigger(key(), &info, at(10, 0, 0)).unwrap();
		assert_eq!(trigger.fire_time_after(at(10, 0, 5)), Some(at(10, 0, 6)));
		assert_eq!(trigger.fire_time_after(at(9, 0, 0)), Some(at(10, 0, 0)));
	}

	#[test]
	fn cron_do_nothing_skips_to_next_slot() {
		let info = TriggerInfo::cron("0 0 * * * ?").misfire_policy(MisfirePolicy::DoNothing);
		let mut trigger = build_trigger(key(), &info, at(10, 30, 0)).unwrap();

		trigger.update_after_misfire(at(13, 10, 0));
		assert_eq!(trigger.next_fire_time, Some(at(14, 0, 0)));
	}

	#[test]
	fn cron_fire_and_proceed_fires_now() {
		let info = TriggerInfo::cron("0 0 * * * ?").misfire_policy(MisfirePolicy::FireAndProceed);
		let mut trigger = build_trigger(key(), &info, at(10, 30, 0)).unwrap();

		trigger.update_after_misfire(at(13, 10, 0));
		assert_eq!(trigger.next_fire_time, Some(at(13, 10, 0)));
		trigger.triggered();
		assert_eq!(trigger.next_fire_time, Some(at(14, 0, 0)));
	}

	#[test]
	fn interval_next_with_remaining_consumes_missed() {
		let info =
			TriggerInfo::interval(5, 60_000).misfire_policy(MisfirePolicy::NextWithRemainingCount);
		let mut trigger = build_trigger(key(), &info, at(10, 0, 0)).unwrap();

		trigger.update_after_misfire(at(10, 2, 30));
		assert_eq!(trigger.next_fire_time, Some(at(10, 3, 0)));
		assert_eq!(trigger.times_triggered, 3);
	}

	#[test]
	fn interval_next_with_existing_keeps_count() {
		let info =
			TriggerInfo::interval(2, 60_000).misfire_policy(MisfirePolicy::NextWithExistingCount);
		let mut trigger = build_trigger(key(), &info, at(10, 0, 0)).unwrap();

		trigger.update_after_misfire(at(10, 5, 30));
		let mut fired = Vec::new();
		while let Some(next) = trigger.next_fire_time {
			fired.push(next);
			trigger.triggered();
		}
		assert_eq!(fired, vec![at(10, 6, 0), at(10, 7, 0), at(10, 8, 0)]);
	}

	#[test]
	fn interval_now_with_remaining_rebases_at_now() {
		let info =
			TriggerInfo::interval(4, 60_000).misfire_policy(MisfirePolicy::NowWithRemainingCount);
		let mut trigger = build_trigger(key(), &info, at(10, 0, 0)).unwrap();

		// slots 10:00, 10:01 and 10:02 were missed
		trigger.update_after_misfire(at(10, 2, 30));
		let mut fired = Vec::new();
		while let Some(next) = trigger.next_fire_time {
			fired.push(next);
			trigger.triggered();
		}
		assert_eq!(fired, vec![at(10, 2, 30), at(10, 3, 30), at(10, 4, 30)]);
	}

	#[test]
	fn once_misfire_fires_now() {
		let mut trigger = build_trigger(key(), &TriggerInfo::once(), at(10, 0, 0)).unwrap();
		trigger.update_after_misfire(at(11, 0, 0));
		assert_eq!(trigger.next_fire_time, Some(at(11, 0, 0)));
		trigger.triggered();
		assert_eq!(trigger.next_fire_time, None);
	}

	#[test]
	fn misfire_threshold() {
		let trigger = build_trigger(key(), &TriggerInfo::once(), at(10, 0, 0)).unwrap();
		assert!(!trigger.is_misfired(at(10, 0, 30), Duration::seconds(60)));
		assert!(trigger.is_misfired(at(10, 1, 1), Duration::seconds(60)));
	}
}
