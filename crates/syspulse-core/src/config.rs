use crate::error::{Error, Result};
use crate::restart::Backoff;
use crate::types::LogConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_NAME: &str = "syspulse";

#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
	#[serde(default = "default_log_filter")]
	pub log_filter: String,
	#[serde(default)]
	pub daemon: DaemonConfig,
	#[serde(default)]
	pub logs: LogConfig,
	#[serde(default)]
	pub restart: RestartConfig,
	#[serde(default)]
	pub lifecycle: LifecycleConfig,
}

impl Default for GlobalConfig {
	fn default() -> Self {
		Self {
			log_filter: default_log_filter(),
			daemon: DaemonConfig::default(),
			logs: LogConfig::default(),
			restart: RestartConfig::default(),
			lifecycle: LifecycleConfig::default(),
		}
	}
}

fn default_log_filter() -> String {
	"info".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
	pub data_dir: Option<PathBuf>,
	pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestartConfig {
	#[serde(default = "default_backoff_base")]
	pub backoff_base_ms: u64,
	#[serde(default = "default_backoff_max")]
	pub backoff_max_ms: u64,
}

impl Default for RestartConfig {
	fn default() -> Self {
		Self {
			backoff_base_ms: default_backoff_base(),
			backoff_max_ms: default_backoff_max(),
		}
	}
}

fn default_backoff_base() -> u64 {
	1000
}
fn default_backoff_max() -> u64 {
	300_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
	/// Default bound for `start` with `wait` when the caller gives none.
	#[serde(default = "default_start_timeout")]
	pub start_timeout_secs: u64,
	/// How long to wait for a SIGKILLed process group to be reaped.
	#[serde(default = "default_kill_grace")]
	pub kill_grace_secs: u64,
}

impl Default for LifecycleConfig {
	fn default() -> Self {
		Self {
			start_timeout_secs: default_start_timeout(),
			kill_grace_secs: default_kill_grace(),
		}
	}
}

fn default_start_timeout() -> u64 {
	30
}
fn default_kill_grace() -> u64 {
	5
}

/// Runtime settings handed to the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
	pub data_dir: PathBuf,
	/// Write definitions to `<data_dir>/daemons.json` on add/remove.
	pub persist: bool,
	pub default_log: LogConfig,
	pub backoff: Backoff,
	pub start_timeout: Duration,
	pub kill_grace: Duration,
}

impl SupervisorConfig {
	pub fn new(data_dir: impl Into<PathBuf>) -> Self {
		GlobalConfig::default().supervisor_config(data_dir.into())
	}

	pub fn log_dir(&self) -> PathBuf {
		self.data_dir.join("logs")
	}

	pub fn store_path(&self) -> PathBuf {
		self.data_dir.join("daemons.json")
	}
}

impl GlobalConfig {
	/// Read `path` when given, otherwise the default location. Only an
	/// explicitly named file is required to exist.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		match path {
			Some(path) => Self::from_file(path),
			None => {
				let path = default_config_path();
				if path.exists() {
					Self::from_file(&path)
				} else {
					Ok(Self::default())
				}
			}
		}
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.map_err(|e| Error::Config(format!("failed to read {}: {}", path.display(), e)))?;
		Self::parse(&content).map_err(|e| match e {
			Error::Config(msg) => Error::Config(format!("{}: {}", path.display(), msg)),
			other => other,
		})
	}

	pub fn parse(content: &str) -> Result<Self> {
		toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
	}

	pub fn supervisor_config(&self, data_dir: PathBuf) -> SupervisorConfig {
		SupervisorConfig {
			data_dir,
			persist: true,
			default_log: self.logs.clone(),
			backoff: Backoff {
				base: Duration::from_millis(self.restart.backoff_base_ms),
				max: Duration::from_millis(self.restart.backoff_max_ms),
			},
			start_timeout: Duration::from_secs(self.lifecycle.start_timeout_secs),
			kill_grace: Duration::from_secs(self.lifecycle.kill_grace_secs),
		}
	}
}

pub fn default_config_path() -> PathBuf {
	syspulse_ipc::DaemonPaths::new(APP_NAME).config_dir().join("config.toml")
}
