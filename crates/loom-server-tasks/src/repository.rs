// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Durable task definitions, scoped to one task group.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;

use loom_tasks_core::{TaskGroup, TaskInfo};

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, Error)]
pub enum RepositoryError {
	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("internal error: {0}")]
	Internal(String),
}

/// Storage for task definitions and their paused/finished flags.
///
/// Each repository instance serves exactly one [`TaskGroup`]. Flag updates
/// for unknown task names are no-ops.
#[async_trait]
pub trait TaskRepository: Send + Sync {
	fn group(&self) -> &TaskGroup;

	async fn get_task(&self, name: &str) -> Result<Option<TaskInfo>>;
	async fn get_all_tasks(&self) -> Result<Vec<TaskInfo>>;
	/// Insert or replace a definition. Replacing keeps the paused flag and
	/// clears the finished flag.
	async fn add_task(&self, info: &TaskInfo) -> Result<()>;
	async fn delete_task(&self, name: &str) -> Result<bool>;

	async fn is_task_paused(&self, name: &str) -> Result<bool>;
	async fn set_task_paused(&self, name: &str, paused: bool) -> Result<()>;
	async fn is_task_finished(&self, name: &str) -> Result<bool>;
	async fn set_task_finished(&self, name: &str, finished: bool) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredTask {
	info: TaskInfo,
	paused: bool,
	finished: bool,
}

/// Process-local repository.
pub struct InMemoryTaskRepository {
	group: TaskGroup,
	tasks: RwLock<HashMap<String, StoredTask>>,
}

impl InMemoryTaskRepository {
	pub fn new(group: TaskGroup) -> Self {
		Self {
			group,
			tasks: RwLock::new(HashMap::new()),
		}
	}
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
	fn group(&self) -> &TaskGroup {
		&self.group
	}

	async fn get_task(&self, name: &str) -> Result<Option<TaskInfo>> {
		Ok(self.tasks.read().await.get(name).map(|t| t.info.clone()))
	}

	async fn get_all_tasks(&self) -> Result<Vec<TaskInfo>> {
		let tasks = self.tasks.read().await;
		let mut all: Vec<TaskInfo> = tasks.values().map(|t| t.info.clone()).collect();
		all.sort_by(|a, b| a.name.cmp(&b.name));
		Ok(all)
	}

	async fn add_task(&self, info: &TaskInfo) -> Result<()> {
		let mut tasks = self.tasks.write().await;
		let paused = tasks.get(&info.name).is_some_and(|t| t.paused);
		tasks.insert(
			info.name.clone(),
			StoredTask {
				info: info.clone(),
				paused,
				finished: false,
			},
		);
		Ok(())
	}

	async fn delete_task(&self, name: &str) -> Result<bool> {
		Ok(self.tasks.write().await.remove(name).is_some())
	}

	async fn is_task_paused(&self, name: &str) -> Result<bool> {
		Ok(self.tasks.read().await.get(name).is_some_and(|t| t.paused))
	}

	async fn set_task_paused(&self, name: &str, paused: bool) -> Result<()> {
		if let Some(task) = self.tasks.write().await.get_mut(name) {
			task.paused = paused;
		}
		Ok(())
	}

	async fn is_task_finished(&self, name: &str) -> Result<bool> {
		Ok(self.tasks.read().await.get(name).is_some_and(|t| t.finished))
	}

	async fn set_task_finished(&self, name: &str, finished: bool) -> Result<()> {
		if let Some(task) = self.tasks.write().await.get_mut(name) {
			task.finished = finished;
		}
		Ok(())
	}
}

/// SQLite implementation of the task repository.
#[derive(Clone)]
pub struct SqliteTaskRepository {
	pool: SqlitePool,
	group: TaskGroup,
	group_key: String,
}

impl SqliteTaskRepository {
	pub fn new(pool: SqlitePool, group: TaskGroup) -> Self {
		let group_key = group.key();
		Self {
			pool,
			group,
			group_key,
		}
	}

	/// Run the bundled migrations. Safe to run more than once.
	#[tracing::instrument(skip(self))]
	pub async fn migrate(&self) -> Result<()> {
		let m1 = include_str!("../migrations/001_create_scheduled_tasks.sql");
		sqlx::query(m1).execute(&self.pool).await?;
		Ok(())
	}

	async fn flag(&self, column: Flag, name: &str) -> Result<bool> {
		let sql = format!(
			"SELECT {} FROM scheduled_tasks WHERE group_key = ? AND name = ?",
			column.as_str()
		);
		let value: Option<i64> = sqlx::query_scalar(&sql)
			.bind(&self.group_key)
			.bind(name)
			.fetch_optional(&self.pool)
			.await?;
		Ok(value.is_some_and(|v| v != 0))
	}

	async fn set_flag(&self, column: Flag, name: &str, value: bool) -> Result<()> {
		let sql = format!(
			"UPDATE scheduled_tasks SET {} = ?, updated_at = ? WHERE group_key = ? AND name = ?",
			column.as_str()
		);
		sqlx::query(&sql)
			.bind(i64::from(value))
			.bind(Utc::now().to_rfc3339())
			.bind(&self.group_key)
			.bind(name)
			.execute(&self.pool)
			.await?;
		Ok(())
	}
}

#[derive(Debug, Clone, Copy)]
enum Flag {
	Paused,
	Finished,
}

impl Flag {
	fn as_str(self) -> &'static str {
		match self {
			Self::Paused => "paused",
			Self::Finished => "finished",
		}
	}
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
	fn group(&self) -> &TaskGroup {
		&self.group
	}

	#[instrument(skip(self))]
	async fn get_task(&self, name: &str) -> Result<Option<TaskInfo>> {
		let row = sqlx::query_as::<_, TaskRow>(
			r#"
			SELECT name, task_class, properties, trigger_info
			FROM scheduled_tasks
			WHERE group_key = ? AND name = ?
			"#,
		)
		.bind(&self.group_key)
		.bind(name)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self))]
	async fn get_all_tasks(&self) -> Result<Vec<TaskInfo>> {
		let rows = sqlx::query_as::<_, TaskRow>(
			r#"
			SELECT name, task_class, properties, trigger_info
			FROM scheduled_tasks
			WHERE group_key = ?
			ORDER BY name
			"#,
		)
		.bind(&self.group_key)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	#[instrument(skip(self, info), fields(task = %info.name))]
	async fn add_task(&self, info: &TaskInfo) -> Result<()> {
		let properties = serde_json::to_string(&info.properties)?;
		let trigger = serde_json::to_string(&info.trigger)?;
		let now = Utc::now().to_rfc3339();

		sqlx::query(
			r#"
			INSERT INTO scheduled_tasks (
				group_key, name, task_class, properties, trigger_info,
				paused, finished, created_at, updated_at
			)
			VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)
			ON CONFLICT (group_key, name) DO UPDATE SET
				task_class = excluded.task_class,
				properties = excluded.properties,
				trigger_info = excluded.trigger_info,
				finished = 0,
				updated_at = excluded.updated_at
			"#,
		)
		.bind(&self.group_key)
		.bind(&info.name)
		.bind(&info.task_class)
		.bind(properties)
		.bind(trigger)
		.bind(&now)
		.bind(&now)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self))]
	async fn delete_task(&self, name: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM scheduled_tasks WHERE group_key = ? AND name = ?")
			.bind(&self.group_key)
			.bind(name)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	async fn is_task_paused(&self, name: &str) -> Result<bool> {
		self.flag(Flag::Paused, name).await
	}

	#[instrument(skip(self))]
	async fn set_task_paused(&self, name: &str, paused: bool) -> Result<()> {
		self.set_flag(Flag::Paused, name, paused).await
	}

	async fn is_task_finished(&self, name: &str) -> Result<bool> {
		self.flag(Flag::Finished, name).await
	}

	#[instrument(skip(self))]
	async fn set_task_finished(&self, name: &str, finished: bool) -> Result<()> {
		self.set_flag(Flag::Finished, name, finished).await
	}
}

#[derive(sqlx::FromRow)]
struct TaskRow {
	name: String,
	task_class: String,
	properties: String,
	trigger_info: String,
}

impl TryFrom<TaskRow> for TaskInfo {
	type Error = RepositoryError;

	fn try_from(row: TaskRow) -> Result<Self> {
		if !TaskInfo::validate_name(&row.name) {
			return Err(RepositoryError::Internal(format!(
				"Invalid task name: {:?}",
				row.name
			)));
		}
		Ok(TaskInfo {
			name: row.name,
			task_class: row.task_class,
			properties: serde_json::from_str(&row.properties)?,
			trigger: serde_json::from_str(&row.trigger_info)?,
		})
	}
}
