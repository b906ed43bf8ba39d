// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process job engine.
//!
//! Keeps jobs and triggers in memory and fires them from a tokio loop (or
//! from explicit [`MemoryJobEngine::fire_due`] calls). Every fired job runs
//! on its own tokio task, so a slow job body never holds up other triggers
//! and a job that allows concurrent execution may overlap itself. Exhausted
//! triggers are removed together with their job, after listeners saw the
//! final `trigger_complete`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::config::TasksConfig;
use crate::engine::{
	EngineError, EngineResult, JobDetail, JobEngine, JobKey, RescheduleOutcome, TriggerListener,
	TriggerState,
};
use crate::trigger::EngineTrigger;

const DEFAULT_MISFIRE_THRESHOLD: Duration = Duration::from_secs(60);

/// Executes the body of a fired job.
#[async_trait]
pub trait JobRunner: Send + Sync {
	/// Whether jobs of `task_class` can be run at all. A trigger whose job
	/// cannot be resolved moves to the error state and stops firing.
	fn resolves(&self, _task_class: &str) -> bool {
		true
	}

	async fn run(&self, job: &JobDetail, fire_time: DateTime<Utc>);
}

struct Entry {
	job: JobDetail,
	trigger: EngineTrigger,
	paused: bool,
	/// Runs of this job currently executing
	running: usize,
	error: bool,
}

impl Entry {
	fn new(job: JobDetail, trigger: EngineTrigger) -> Self {
		Self {
			job,
			trigger,
			paused: false,
			running: 0,
			error: false,
		}
	}

	fn blocked(&self) -> bool {
		self.running > 0 && self.job.concurrent_execution_disallowed
	}

	fn is_due(&self, now: DateTime<Utc>) -> bool {
		!self.paused
			&& !self.error
			&& !self.blocked()
			&& self.trigger.next_fire_time.is_some_and(|next| next <= now)
	}

	fn state(&self) -> TriggerState {
		if self.paused {
			TriggerState::Paused
		} else if self.error {
			TriggerState::Error
		} else if self.blocked() {
			TriggerState::Blocked
		} else {
			TriggerState::Normal
		}
	}
}

enum Step {
	Skip,
	Misfired {
		misfired: EngineTrigger,
		exhausted: Option<EngineTrigger>,
	},
	Fire {
		misfired: Option<EngineTrigger>,
		job: JobDetail,
		trigger: EngineTrigger,
	},
}

pub struct MemoryJobEngine {
	misfire_threshold: chrono::Duration,
	entries: Mutex<BTreeMap<JobKey, Entry>>,
	listeners: RwLock<Vec<(String, Arc<dyn TriggerListener>)>>,
	runner: Option<Arc<dyn JobRunner>>,
	shutdown_tx: broadcast::Sender<()>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryJobEngine {
	pub fn new(misfire_threshold: Duration) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			misfire_threshold: chrono::Duration::from_std(misfire_threshold)
				.unwrap_or(chrono::Duration::MAX),
			entries: Mutex::new(BTreeMap::new()),
			listeners: RwLock::new(Vec::new()),
			runner: None,
			shutdown_tx,
			handle: Mutex::new(None),
		}
	}

	pub fn from_config(config: &TasksConfig) -> Self {
		Self::new(config.misfire_threshold())
	}

	pub fn with_runner(mut self, runner: Arc<dyn JobRunner>) -> Self {
		self.runner = Some(runner);
		self
	}

	/// Spawn the firing loop. Calling this on a running engine is a no-op.
	///
	/// Each tick only dispatches due jobs; their bodies run on separate
	/// tasks. Shutdown waits for jobs already running.
	#[instrument(skip(self))]
	pub async fn start(self: &Arc<Self>, tick: Duration) {
		let mut handle = self.handle.lock().await;
		if handle.is_some() {
			return;
		}

		let engine = Arc::clone(self);
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		*handle = Some(tokio::spawn(async move {
			let mut running = JoinSet::new();
			loop {
				tokio::select! {
					_ = tokio::time::sleep(tick) => {
						engine.dispatch_due(Utc::now(), &mut running).await;
						while running.try_join_next().is_some() {}
					}
					_ = shutdown_rx.recv() => {
						info!(in_flight = running.len(), "Shutting down task engine");
						break;
					}
				}
			}
			while running.join_next().await.is_some() {}
		}));

		info!(tick_ms = tick.as_millis() as u64, "Task engine started");
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());
		if let Some(handle) = self.handle.lock().await.take() {
			let _ = handle.await;
		}
		info!("Task engine shut down");
	}

	/// Fire every unpaused trigger whose next fire time is at or before
	/// `now`, once each, and wait for the fired jobs to finish. Jobs fired by
	/// one call run concurrently. Returns how many jobs ran.
	pub async fn fire_due(self: &Arc<Self>, now: DateTime<Utc>) -> usize {
		let mut running = JoinSet::new();
		self.dispatch_due(now, &mut running).await;

		let mut ran = 0;
		while let Some(result) = running.join_next().await {
			if matches!(result, Ok(true)) {
				ran += 1;
			}
		}
		ran
	}

	async fn dispatch_due(self: &Arc<Self>, now: DateTime<Utc>, running: &mut JoinSet<bool>) {
		let due: Vec<JobKey> = self
			.entries
			.lock()
			.await
			.iter()
			.filter(|(_, entry)| entry.is_due(now))
			.map(|(key, _)| key.clone())
			.collect();

		for key in due {
			match self.prepare(&key, now).await {
				Step::Skip => {}
				Step::Misfired {
					misfired,
					exhausted,
				} => {
					self.dispatch_misfired(&misfired).await;
					if let Some(exhausted) = exhausted {
						self.dispatch_complete(&exhausted).await;
					}
				}
				Step::Fire {
					misfired,
					job,
					trigger,
				} => {
					if let Some(misfired) = misfired {
						self.dispatch_misfired(&misfired).await;
					}
					let engine = Arc::clone(self);
					running.spawn(async move { engine.execute(job, trigger).await });
				}
			}
		}
	}

	/// Advance the stored trigger under the lock and decide what to do.
	async fn prepare(&self, key: &JobKey, now: DateTime<Utc>) -> Step {
		let mut entries = self.entries.lock().await;
		let Some(entry) = entries.get_mut(key) else {
			return Step::Skip;
		};
		if !entry.is_due(now) {
			return Step::Skip;
		}

		let mut misfired = None;
		if entry.trigger.is_misfired(now, self.misfire_threshold) {
			misfired = Some(entry.trigger.clone());
			entry.trigger.update_after_misfire(now);
			warn!(job = %key, "Trigger misfired");
		}

		let next_fire_time = entry.trigger.next_fire_time;
		match next_fire_time {
			None => {
				// a run still in flight removes the entry when it finishes
				let exhausted = if entry.running == 0 {
					entries.remove(key).map(|entry| entry.trigger)
				} else {
					Some(entry.trigger.clone())
				};
				return match misfired {
					Some(misfired) => Step::Misfired {
						misfired,
						exhausted,
					},
					None => Step::Skip,
				};
			}
			Some(next) if next > now => {
				return match misfired {
					Some(misfired) => Step::Misfired {
						misfired,
						exhausted: None,
					},
					None => Step::Skip,
				};
			}
			Some(_) => {}
		}

		if let Some(runner) = &self.runner {
			if !runner.resolves(&entry.job.task_class) {
				warn!(job = %key, task_class = %entry.job.task_class, "Cannot resolve job, trigger moved to error state");
				entry.error = true;
				return Step::Skip;
			}
		}

		entry.trigger.triggered();
		entry.running += 1;
		Step::Fire {
			misfired,
			job: entry.job.clone(),
			trigger: entry.trigger.clone(),
		}
	}

	async fn execute(&self, job: JobDetail, trigger: EngineTrigger) -> bool {
		let listeners = self.listeners_for(&job.key.group).await;

		let mut vetoed = false;
		for listener in &listeners {
			listener.trigger_fired(&trigger).await;
			if listener.veto_job_execution(&trigger).await {
				debug!(job = %job.key, listener = listener.name(), "Job execution vetoed");
				vetoed = true;
			}
		}

		if !vetoed {
			if let (Some(runner), Some(fire_time)) = (&self.runner, trigger.previous_fire_time) {
				let runner = Arc::clone(runner);
				let body = job.clone();
				let result =
					tokio::spawn(async move { runner.run(&body, fire_time).await }).await;
				if let Err(e) = result {
					error!(job = %job.key, error = %e, "Job body failed");
				}
			}
		}

		{
			let mut entries = self.entries.lock().await;
			let exhausted = match entries.get_mut(&job.key) {
				Some(entry) => {
					entry.running = entry.running.saturating_sub(1);
					entry.running == 0 && entry.trigger.next_fire_time.is_none()
				}
				None => false,
			};
			if exhausted {
				entries.remove(&job.key);
			}
		}

		for listener in &listeners {
			listener.trigger_complete(&trigger).await;
		}
		!vetoed
	}

	async fn listeners_for(&self, group: &str) -> Vec<Arc<dyn TriggerListener>> {
		self.listeners
			.read()
			.await
			.iter()
			.filter(|(g, _)| g == group)
			.map(|(_, listener)| Arc::clone(listener))
			.collect()
	}

	async fn dispatch_misfired(&self, trigger: &EngineTrigger) {
		for listener in self.listeners_for(&trigger.key.group).await {
			listener.trigger_misfired(trigger).await;
		}
	}

	async fn dispatch_complete(&self, trigger: &EngineTrigger) {
		for listener in self.listeners_for(&trigger.key.group).await {
			listener.trigger_complete(trigger).await;
		}
	}
}

impl Default for MemoryJobEngine {
	fn default() -> Self {
		Self::new(DEFAULT_MISFIRE_THRESHOLD)
	}
}

#[async_trait]
impl JobEngine for MemoryJobEngine {
	async fn schedule_job(&self, job: JobDetail, trigger: EngineTrigger) -> EngineResult<()> {
		if job.key != trigger.key {
			return Err(EngineError::Other(format!(
				"trigger {} does not belong to job {}",
				trigger.key, job.key
			)));
		}
		if trigger.next_fire_time.is_none() {
			return Err(EngineError::WillNeverFire(job.key));
		}

		let mut entries = self.entries.lock().await;
		if entries.contains_key(&job.key) {
			return Err(EngineError::AlreadyExists(job.key));
		}
		entries.insert(job.key.clone(), Entry::new(job, trigger));
		Ok(())
	}

	async fn reschedule_job(
		&self,
		key: &JobKey,
		trigger: EngineTrigger,
	) -> EngineResult<RescheduleOutcome> {
		let mut entries = self.entries.lock().await;
		let Some(entry) = entries.get_mut(key) else {
			return Ok(RescheduleOutcome::NotFound);
		};
		let next_fire_time = trigger.next_fire_time;
		if next_fire_time.is_none() {
			return Err(EngineError::WillNeverFire(key.clone()));
		}
		entry.trigger = trigger;
		entry.paused = false;
		entry.error = false;
		Ok(RescheduleOutcome::Replaced { next_fire_time })
	}

	async fn pause_job(&self, key: &JobKey) -> EngineResult<()> {
		if let Some(entry) = self.entries.lock().await.get_mut(key) {
			entry.paused = true;
		}
		Ok(())
	}

	async fn resume_job(&self, key: &JobKey) -> EngineResult<()> {
		if let Some(entry) = self.entries.lock().await.get_mut(key) {
			entry.paused = false;
		}
		Ok(())
	}

	async fn delete_job(&self, key: &JobKey) -> EngineResult<bool> {
		Ok(self.entries.lock().await.remove(key).is_some())
	}

	async fn check_exists(&self, key: &JobKey) -> EngineResult<bool> {
		Ok(self.entries.lock().await.contains_key(key))
	}

	async fn trigger_state(&self, key: &JobKey) -> EngineResult<TriggerState> {
		Ok(self
			.entries
			.lock()
			.await
			.get(key)
			.map_or(TriggerState::None, Entry::state))
	}

	async fn trigger(&self, key: &JobKey) -> EngineResult<Option<EngineTrigger>> {
		Ok(self
			.entries
			.lock()
			.await
			.get(key)
			.map(|entry| entry.trigger.clone()))
	}

	async fn set_next_fire_time(
		&self,
		key: &JobKey,
		next_fire_time: DateTime<Utc>,
	) -> EngineResult<bool> {
		match self.entries.lock().await.get_mut(key) {
			Some(entry) => {
				entry.trigger.set_next_fire_time(Some(next_fire_time));
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn trigger_keys(&self, group: &str) -> EngineResult<Vec<JobKey>> {
		Ok(self
			.entries
			.lock()
			.await
			.keys()
			.filter(|key| key.group == group)
			.cloned()
			.collect())
	}

	/// A listener with the same name on the same group is replaced.
	async fn add_trigger_listener(
		&self,
		group: &str,
		listener: Arc<dyn TriggerListener>,
	) -> EngineResult<()> {
		let mut listeners = self.listeners.write().await;
		match listeners
			.iter_mut()
			.find(|(g, existing)| g == group && existing.name() == listener.name())
		{
			Some((_, existing)) => {
				debug!(group = %group, listener = listener.name(), "Trigger listener replaced");
				*existing = listener;
			}
			None => {
				debug!(group = %group, listener = listener.name(), "Trigger listener added");
				listeners.push((group.to_string(), listener));
			}
		}
		Ok(())
	}

	async fn remove_trigger_listener(&self, group: &str, name: &str) -> EngineResult<bool> {
		let mut listeners = self.listeners.write().await;
		let before = listeners.len();
		listeners.retain(|(g, listener)| !(g == group && listener.name() == name));
		Ok(listeners.len() < before)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::manager::TaskManager;
	use crate::repository::{InMemoryTaskRepository, TaskRepository};
	use crate::trigger::build_trigger;
	use chrono::TimeZone;
	use loom_tasks_core::{MisfirePolicy, TaskGroup, TaskInfo, TenantId, TriggerInfo};
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Mutex as StdMutex;
	use tokio::sync::Notify;

	const GROUP: &str = "tenant:1:type:test";

	fn t0() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2026, 1, 19, 10, 0, 0).unwrap()
	}

	fn secs(n: i64) -> chrono::Duration {
		chrono::Duration::seconds(n)
	}

	fn job(name: &str, concurrent_execution_disallowed: bool) -> JobDetail {
		JobDetail {
			key: JobKey::new(GROUP, name),
			task_class: "noop".to_string(),
			properties: Default::default(),
			concurrent_execution_disallowed,
		}
	}

	fn trigger(name: &str, info: &TriggerInfo) -> EngineTrigger {
		build_trigger(JobKey::new(GROUP, name), info, t0()).unwrap()
	}

	#[derive(Default)]
	struct CountingRunner {
		runs: AtomicUsize,
	}

	#[async_trait]
	impl JobRunner for CountingRunner {
		fn resolves(&self, task_class: &str) -> bool {
			task_class != "missing"
		}

		async fn run(&self, _job: &JobDetail, _fire_time: DateTime<Utc>) {
			self.runs.fetch_add(1, Ordering::SeqCst);
		}
	}

	#[derive(Default)]
	struct RecordingListener {
		events: StdMutex<Vec<String>>,
		veto: bool,
	}

	impl RecordingListener {
		fn events(&self) -> Vec<String> {
			self.events.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl TriggerListener for RecordingListener {
		fn name(&self) -> &str {
			"recording"
		}

		async fn trigger_fired(&self, trigger: &EngineTrigger) {
			self.events
				.lock()
				.unwrap()
				.push(format!("fired:{}", trigger.key.name));
		}

		async fn veto_job_execution(&self, _trigger: &EngineTrigger) -> bool {
			self.veto
		}

		async fn trigger_misfired(&self, trigger: &EngineTrigger) {
			self.events
				.lock()
				.unwrap()
				.push(format!("misfired:{}", trigger.key.name));
		}

		async fn trigger_complete(&self, trigger: &EngineTrigger) {
			let suffix = if trigger.next_fire_time.is_none() { ":final" } else { "" };
			self.events
				.lock()
				.unwrap()
				.push(format!("complete:{}{}", trigger.key.name, suffix));
		}
	}

	#[tokio::test]
	async fn duplicate_schedule_is_rejected() {
		let engine = MemoryJobEngine::default();
		let info = TriggerInfo::interval(-1, 1000);
		engine
			.schedule_job(job("a", false), trigger("a", &info))
			.await
			.unwrap();
		let err = engine
			.schedule_job(job("a", false), trigger("a", &info))
			.await
			.unwrap_err();
		assert!(matches!(err, EngineError::AlreadyExists(_)));
	}

	#[tokio::test]
	async fn single_fire_trigger_is_removed_after_final_complete() {
		let runner = Arc::new(CountingRunner::default());
		let engine = Arc::new(MemoryJobEngine::default().with_runner(runner.clone()));
		let listener = Arc::new(RecordingListener::default());
		engine
			.add_trigger_listener(GROUP, listener.clone())
			.await
			.unwrap();

		engine
			.schedule_job(job("once", false), trigger("once", &TriggerInfo::once()))
			.await
			.unwrap();

		assert_eq!(engine.fire_due(t0()).await, 1);
		assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
		assert_eq!(listener.events(), vec!["fired:once", "complete:once:final"]);
		assert!(!engine.check_exists(&JobKey::new(GROUP, "once")).await.unwrap());
	}

	#[tokio::test]
	async fn listeners_only_see_their_group() {
		let engine = Arc::new(MemoryJobEngine::default());
		let listener = Arc::new(RecordingListener::default());
		engine
			.add_trigger_listener("tenant:2:type:test", listener.clone())
			.await
			.unwrap();
		engine
			.schedule_job(job("once", false), trigger("once", &TriggerInfo::once()))
			.await
			.unwrap();

		engine.fire_due(t0()).await;
		assert!(listener.events().is_empty());
	}

	#[tokio::test]
	async fn same_named_listener_is_replaced_and_removable() {
		let engine = Arc::new(MemoryJobEngine::default());
		let first = Arc::new(RecordingListener::default());
		let second = Arc::new(RecordingListener::default());
		engine.add_trigger_listener(GROUP, first.clone()).await.unwrap();
		engine.add_trigger_listener(GROUP, second.clone()).await.unwrap();
		assert_eq!(engine.listeners.read().await.len(), 1);

		engine
			.schedule_job(job("once", false), trigger("once", &TriggerInfo::once()))
			.await
			.unwrap();
		engine.fire_due(t0()).await;
		assert!(first.events().is_empty());
		assert_eq!(second.events().len(), 2);

		assert!(engine.remove_trigger_listener(GROUP, "recording").await.unwrap());
		assert!(!engine.remove_trigger_listener(GROUP, "recording").await.unwrap());
		assert!(engine.listeners.read().await.is_empty());
	}

	#[tokio::test]
	async fn rebuilt_manager_keeps_one_completion_listener() {
		let engine = Arc::new(MemoryJobEngine::default());
		let group = TaskGroup::new(TenantId(1), "test").unwrap();
		let repo = Arc::new(InMemoryTaskRepository::new(group));
		repo.add_task(&TaskInfo::new("once", "noop", TriggerInfo::once()).unwrap())
			.await
			.unwrap();

		for _ in 0..3 {
			TaskManager::new(engine.clone(), repo.clone()).await.unwrap();
		}
		assert_eq!(engine.listeners_for(GROUP).await.len(), 1);
	}

	#[tokio::test]
	async fn paused_triggers_do_not_fire() {
		let engine = Arc::new(MemoryJobEngine::default());
		let key = JobKey::new(GROUP, "a");
		engine
			.schedule_job(job("a", false), trigger("a", &TriggerInfo::interval(-1, 1000)))
			.await
			.unwrap();

		engine.pause_job(&key).await.unwrap();
		assert_eq!(engine.trigger_state(&key).await.unwrap(), TriggerState::Paused);
		assert_eq!(engine.fire_due(t0() + secs(5)).await, 0);

		engine.resume_job(&key).await.unwrap();
		assert_eq!(engine.trigger_state(&key).await.unwrap(), TriggerState::Normal);
		assert_eq!(engine.fire_due(t0() + secs(5)).await, 1);
	}

	#[tokio::test]
	async fn late_trigger_reports_misfire() {
		let engine = Arc::new(MemoryJobEngine::new(Duration::from_secs(60)));
		let listener = Arc::new(RecordingListener::default());
		engine
			.add_trigger_listener(GROUP, listener.clone())
			.await
			.unwrap();
		let info = TriggerInfo::cron("0 0 * * * ?").misfire_policy(MisfirePolicy::DoNothing);
		engine
			.schedule_job(job("hourly", false), trigger("hourly", &info))
			.await
			.unwrap();

		// due at 10:00, engine wakes at 11:30
		assert_eq!(engine.fire_due(t0() + secs(5400)).await, 0);
		assert_eq!(listener.events(), vec!["misfired:hourly"]);

		let stored = engine
			.trigger(&JobKey::new(GROUP, "hourly"))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(stored.next_fire_time, Some(t0() + secs(7200)));
	}

	#[tokio::test]
	async fn misfire_past_end_time_completes_without_running() {
		let runner = Arc::new(CountingRunner::default());
		let engine = Arc::new(MemoryJobEngine::default().with_runner(runner.clone()));
		let listener = Arc::new(RecordingListener::default());
		engine
			.add_trigger_listener(GROUP, listener.clone())
			.await
			.unwrap();
		let info = TriggerInfo::cron("0 * * * * ?")
			.misfire_policy(MisfirePolicy::DoNothing)
			.ending_at(t0() + secs(180));
		engine
			.schedule_job(job("minutely", false), trigger("minutely", &info))
			.await
			.unwrap();

		assert_eq!(engine.fire_due(t0() + secs(600)).await, 0);
		assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
		assert_eq!(
			listener.events(),
			vec!["misfired:minutely", "complete:minutely:final"]
		);
		assert!(!engine.check_exists(&JobKey::new(GROUP, "minutely")).await.unwrap());
	}

	#[tokio::test]
	async fn vetoed_job_does_not_run() {
		let runner = Arc::new(CountingRunner::default());
		let engine = Arc::new(MemoryJobEngine::default().with_runner(runner.clone()));
		let listener = Arc::new(RecordingListener {
			veto: true,
			..Default::default()
		});
		engine
			.add_trigger_listener(GROUP, listener.clone())
			.await
			.unwrap();
		engine
			.schedule_job(job("a", false), trigger("a", &TriggerInfo::interval(-1, 1000)))
			.await
			.unwrap();

		assert_eq!(engine.fire_due(t0()).await, 0);
		assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn unresolvable_job_moves_to_error() {
		let engine = Arc::new(
			MemoryJobEngine::default().with_runner(Arc::new(CountingRunner::default())),
		);
		let key = JobKey::new(GROUP, "broken");
		let mut broken = job("broken", false);
		broken.task_class = "missing".to_string();
		engine
			.schedule_job(broken, trigger("broken", &TriggerInfo::once()))
			.await
			.unwrap();

		assert_eq!(engine.fire_due(t0()).await, 0);
		assert_eq!(engine.trigger_state(&key).await.unwrap(), TriggerState::Error);
	}

	struct PanickingRunner;

	#[async_trait]
	impl JobRunner for PanickingRunner {
		async fn run(&self, _job: &JobDetail, _fire_time: DateTime<Utc>) {
			panic!("job body failed");
		}
	}

	#[tokio::test]
	async fn panicking_body_does_not_leave_job_blocked() {
		let engine = Arc::new(MemoryJobEngine::default().with_runner(Arc::new(PanickingRunner)));
		let key = JobKey::new(GROUP, "serial");
		engine
			.schedule_job(job("serial", true), trigger("serial", &TriggerInfo::interval(-1, 1000)))
			.await
			.unwrap();

		assert_eq!(engine.fire_due(t0()).await, 1);
		assert_eq!(engine.trigger_state(&key).await.unwrap(), TriggerState::Normal);
		assert_eq!(engine.fire_due(t0() + secs(1)).await, 1);
	}

	struct BlockingRunner {
		started: Arc<Notify>,
		release: Arc<Notify>,
	}

	#[async_trait]
	impl JobRunner for BlockingRunner {
		async fn run(&self, _job: &JobDetail, _fire_time: DateTime<Utc>) {
			self.started.notify_one();
			self.release.notified().await;
		}
	}

	#[tokio::test]
	async fn non_concurrent_job_is_blocked_while_running() {
		let started = Arc::new(Notify::new());
		let release = Arc::new(Notify::new());
		let engine = Arc::new(MemoryJobEngine::default().with_runner(Arc::new(BlockingRunner {
			started: started.clone(),
			release: release.clone(),
		})));
		let key = JobKey::new(GROUP, "serial");
		engine
			.schedule_job(job("serial", true), trigger("serial", &TriggerInfo::interval(-1, 1000)))
			.await
			.unwrap();

		let firing = {
			let engine = Arc::clone(&engine);
			tokio::spawn(async move { engine.fire_due(t0()).await })
		};
		started.notified().await;
		assert_eq!(engine.trigger_state(&key).await.unwrap(), TriggerState::Blocked);
		assert_eq!(engine.fire_due(t0() + secs(1)).await, 0);

		release.notify_one();
		assert_eq!(firing.await.unwrap(), 1);
		assert_eq!(engine.trigger_state(&key).await.unwrap(), TriggerState::Normal);
	}

	/// Records how many bodies of the slow job overlap and whether the fast
	/// job ran while a slow body was still executing.
	#[derive(Default)]
	struct OverlapRunner {
		active_slow: AtomicUsize,
		max_active_slow: AtomicUsize,
		fast_during_slow: AtomicUsize,
	}

	#[async_trait]
	impl JobRunner for OverlapRunner {
		async fn run(&self, job: &JobDetail, _fire_time: DateTime<Utc>) {
			if job.key.name == "slow" {
				let active = self.active_slow.fetch_add(1, Ordering::SeqCst) + 1;
				self.max_active_slow.fetch_max(active, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_millis(300)).await;
				self.active_slow.fetch_sub(1, Ordering::SeqCst);
			} else if self.active_slow.load(Ordering::SeqCst) > 0 {
				self.fast_during_slow.fetch_add(1, Ordering::SeqCst);
			}
		}
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn firing_loop_runs_jobs_concurrently() {
		let runner = Arc::new(OverlapRunner::default());
		let engine = Arc::new(MemoryJobEngine::default().with_runner(runner.clone()));
		let now = Utc::now();
		engine
			.schedule_job(
				job("slow", false),
				build_trigger(
					JobKey::new(GROUP, "slow"),
					&TriggerInfo::interval(-1, 50),
					now,
				)
				.unwrap(),
			)
			.await
			.unwrap();
		engine
			.schedule_job(
				job("fast", false),
				build_trigger(
					JobKey::new(GROUP, "fast"),
					&TriggerInfo::once().starting_at(now + chrono::Duration::milliseconds(100)),
					now,
				)
				.unwrap(),
			)
			.await
			.unwrap();

		engine.start(Duration::from_millis(10)).await;
		tokio::time::timeout(Duration::from_secs(5), async {
			while runner.max_active_slow.load(Ordering::SeqCst) < 2
				|| runner.fast_during_slow.load(Ordering::SeqCst) == 0
			{
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.unwrap();
		engine.delete_job(&JobKey::new(GROUP, "slow")).await.unwrap();
		engine.shutdown().await;

		assert!(runner.max_active_slow.load(Ordering::SeqCst) >= 2);
		assert_eq!(runner.fast_during_slow.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn replace_trigger_resumes_and_reports_next_fire() {
		let engine = MemoryJobEngine::default();
		let key = JobKey::new(GROUP, "a");
		assert_eq!(
			engine
				.reschedule_job(&key, trigger("a", &TriggerInfo::once()))
				.await
				.unwrap(),
			RescheduleOutcome::NotFound
		);

		engine
			.schedule_job(job("a", false), trigger("a", &TriggerInfo::interval(-1, 1000)))
			.await
			.unwrap();
		engine.pause_job(&key).await.unwrap();

		let replacement = trigger("a", &TriggerInfo::once().starting_at(t0() + secs(30)));
		assert_eq!(
			engine.reschedule_job(&key, replacement).await.unwrap(),
			RescheduleOutcome::Replaced {
				next_fire_time: Some(t0() + secs(30))
			}
		);
		assert_eq!(engine.trigger_state(&key).await.unwrap(), TriggerState::Normal);
	}

	#[tokio::test]
	async fn firing_loop_runs_until_shutdown() {
		let runner = Arc::new(CountingRunner::default());
		let engine = Arc::new(MemoryJobEngine::default().with_runner(runner.clone()));
		let info = TriggerInfo::once();
		let key = JobKey::new(GROUP, "soon");
		engine
			.schedule_job(
				job("soon", false),
				build_trigger(key.clone(), &info, Utc::now()).unwrap(),
			)
			.await
			.unwrap();

		engine.start(Duration::from_millis(10)).await;
		tokio::time::timeout(Duration::from_secs(5), async {
			while engine.check_exists(&key).await.unwrap() {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		})
		.await
		.unwrap();
		engine.shutdown().await;

		assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
	}
}
