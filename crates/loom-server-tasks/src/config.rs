// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Task manager configuration.
//!
//! Values are layered from built-in defaults, the `[tasks]` table of a TOML
//! file, and `LOOM_SERVER_TASKS_<FIELD>` environment variables, in that order
//! of precedence.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

use loom_tasks_core::{TaskGroup, TenantId};

const DEFAULT_TASK_TYPE: &str = "default";
const DEFAULT_MISFIRE_THRESHOLD_MS: u64 = 60_000;
const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TasksConfigLayer {
	pub tenant_id: Option<i64>,
	pub task_type: Option<String>,
	pub misfire_threshold_ms: Option<u64>,
	pub tick_interval_ms: Option<u64>,
	pub database_url: Option<String>,
}

impl TasksConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.tenant_id.is_some() {
			self.tenant_id = other.tenant_id;
		}
		if other.task_type.is_some() {
			self.task_type = other.task_type;
		}
		if other.misfire_threshold_ms.is_some() {
			self.misfire_threshold_ms = other.misfire_threshold_ms;
		}
		if other.tick_interval_ms.is_some() {
			self.tick_interval_ms = other.tick_interval_ms;
		}
		if other.database_url.is_some() {
			self.database_url = other.database_url;
		}
	}

	pub fn finalize(self) -> TasksConfig {
		TasksConfig {
			tenant_id: self.tenant_id.unwrap_or(TenantId::SUPER_TENANT.0),
			task_type: self
				.task_type
				.unwrap_or_else(|| DEFAULT_TASK_TYPE.to_string()),
			misfire_threshold_ms: self
				.misfire_threshold_ms
				.unwrap_or(DEFAULT_MISFIRE_THRESHOLD_MS),
			tick_interval_ms: self.tick_interval_ms.unwrap_or(DEFAULT_TICK_INTERVAL_MS),
			database_url: self.database_url,
		}
	}

	/// Read the layer from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Read the layer through `lookup`, which maps a variable name to its
	/// value. Empty values count as unset.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
		Ok(Self {
			tenant_id: parse_var(&var, "LOOM_SERVER_TASKS_TENANT_ID")?,
			task_type: var("LOOM_SERVER_TASKS_TASK_TYPE"),
			misfire_threshold_ms: parse_var(&var, "LOOM_SERVER_TASKS_MISFIRE_THRESHOLD_MS")?,
			tick_interval_ms: parse_var(&var, "LOOM_SERVER_TASKS_TICK_INTERVAL_MS")?,
			database_url: var("LOOM_SERVER_TASKS_DATABASE_URL"),
		})
	}

	/// Read the `[tasks]` table of a TOML file. A missing file yields an
	/// empty layer.
	pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
		if !path.exists() {
			debug!(path = %path.display(), "config file not found, skipping");
			return Ok(Self::default());
		}

		debug!(path = %path.display(), "loading config file");
		let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
			path: path.to_path_buf(),
			source: e,
		})?;

		let file: FileLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: path.to_path_buf(),
			source: e,
		})?;

		trace!("parsed tasks config layer from TOML");
		Ok(file.tasks.unwrap_or_default())
	}
}

#[derive(Debug, Default, Deserialize)]
struct FileLayer {
	tasks: Option<TasksConfigLayer>,
}

fn parse_var<T, V>(var: &V, name: &str) -> Result<Option<T>, ConfigError>
where
	T: std::str::FromStr,
	V: Fn(&str) -> Option<String>,
{
	match var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid numeric value '{v}'"),
		}),
		None => Ok(None),
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TasksConfig {
	pub tenant_id: i64,
	pub task_type: String,
	pub misfire_threshold_ms: u64,
	pub tick_interval_ms: u64,
	pub database_url: Option<String>,
}

impl TasksConfig {
	pub fn group(&self) -> Result<TaskGroup, ConfigError> {
		TaskGroup::new(TenantId(self.tenant_id), self.task_type.clone()).map_err(|e| {
			ConfigError::InvalidValue {
				key: "task_type".to_string(),
				message: e.to_string(),
			}
		})
	}

	pub fn misfire_threshold(&self) -> Duration {
		Duration::from_millis(self.misfire_threshold_ms)
	}

	pub fn tick_interval(&self) -> Duration {
		Duration::from_millis(self.tick_interval_ms)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		self.group()?;
		if self.tick_interval_ms == 0 {
			return Err(ConfigError::InvalidValue {
				key: "tick_interval_ms".to_string(),
				message: "must be greater than zero".to_string(),
			});
		}
		Ok(())
	}
}

impl Default for TasksConfig {
	fn default() -> Self {
		TasksConfigLayer::default().finalize()
	}
}

/// Merge defaults, the optional TOML file and the environment, then validate.
pub fn load_config_from_sources(config_path: Option<&Path>) -> Result<TasksConfig, ConfigError> {
	let mut merged = TasksConfigLayer::default();
	if let Some(path) = config_path {
		debug!(source = "toml-config", "loading configuration source");
		merged.merge(TasksConfigLayer::from_toml_file(path)?);
	}
	debug!(source = "environment", "loading configuration source");
	merged.merge(TasksConfigLayer::from_env()?);

	let config = merged.finalize();
	config.validate()?;
	Ok(config)
}
