use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::restart::Backoff;
use crate::schedule::CronSchedule;

/// Immutable definition of a managed process. Replaced only by
/// remove-then-add.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Daemon {
	pub name: String,
	pub command: Vec<String>,
	#[serde(default)]
	pub working_dir: Option<PathBuf>,
	#[serde(default)]
	pub env: BTreeMap<String, String>,
	#[serde(default)]
	pub tags: BTreeSet<String>,
	#[serde(default = "default_stop_timeout")]
	pub stop_timeout_secs: u64,
	#[serde(default)]
	pub health_check: Option<HealthCheck>,
	#[serde(default)]
	pub resource_limits: Option<ResourceLimits>,
	#[serde(default)]
	pub log_config: Option<LogConfig>,
	#[serde(default)]
	pub restart_policy: RestartPolicy,
	/// Cron expression. A scheduled daemon rests in `Scheduled` and is
	/// started each time the expression fires.
	#[serde(default)]
	pub schedule: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
}

impl Daemon {
	pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
		Self {
			name: name.into(),
			command,
			working_dir: None,
			env: BTreeMap::new(),
			tags: BTreeSet::new(),
			stop_timeout_secs: default_stop_timeout(),
			health_check: None,
			resource_limits: None,
			log_config: None,
			restart_policy: RestartPolicy::default(),
			schedule: None,
			description: None,
		}
	}

	/// Reject definitions the supervisor cannot run or store.
	pub fn validate(&self) -> Result<(), String> {
		if self.name.trim().is_empty() {
			return Err("name must not be empty".into());
		}
		if self.name.starts_with('.') || self.name.contains('/') || self.name.contains('\\') {
			return Err(format!("name '{}' must not contain path separators or start with '.'", self.name));
		}
		match self.command.first() {
			Some(program) if !program.is_empty() => {}
			_ => return Err(format!("{}: command must not be empty", self.name)),
		}
		if let Some(check) = &self.health_check {
			if check.interval_secs == 0 {
				return Err(format!("{}: health check interval must be positive", self.name));
			}
			if check.target.trim().is_empty() {
				return Err(format!("{}: health check target must not be empty", self.name));
			}
		}
		if let Some(expr) = &self.schedule {
			CronSchedule::parse(expr).map_err(|e| format!("{}: {}", self.name, e))?;
		}
		Ok(())
	}
}

fn default_stop_timeout() -> u64 {
	30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckType {
	Http,
	Tcp,
	Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
	#[serde(rename = "type")]
	pub check_type: HealthCheckType,
	/// URL, `host:port`, or a shell command line depending on `check_type`.
	pub target: String,
	#[serde(default = "default_interval")]
	pub interval_secs: u64,
	#[serde(default = "default_probe_timeout")]
	pub timeout_secs: u64,
	/// Consecutive failures before the instance is marked unhealthy.
	#[serde(default = "default_retries")]
	pub retries: u32,
	#[serde(default)]
	pub start_period_secs: u64,
}

fn default_interval() -> u64 {
	30
}
fn default_probe_timeout() -> u64 {
	5
}
fn default_retries() -> u32 {
	3
}

/// Applied with `setrlimit` in the child right before exec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
	#[serde(default)]
	pub max_memory_bytes: Option<u64>,
	/// Reserved; accepted and reported but not enforced.
	#[serde(default)]
	pub max_cpu_percent: Option<f64>,
	#[serde(default)]
	pub max_open_files: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
	#[serde(default = "default_max_size")]
	pub max_size_bytes: u64,
	#[serde(default = "default_retain")]
	pub retain_count: u32,
}

impl Default for LogConfig {
	fn default() -> Self {
		Self {
			max_size_bytes: default_max_size(),
			retain_count: default_retain(),
		}
	}
}

fn default_max_size() -> u64 {
	10 * 1024 * 1024
}
fn default_retain() -> u32 {
	5
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicyType {
	#[default]
	Never,
	Always,
	OnFailure,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartPolicy {
	#[serde(default)]
	pub policy: RestartPolicyType,
	/// `None` means unlimited.
	#[serde(default)]
	pub max_retries: Option<u32>,
	/// Override the supervisor-wide backoff for this daemon.
	#[serde(default)]
	pub backoff_base_ms: Option<u64>,
	#[serde(default)]
	pub backoff_max_ms: Option<u64>,
}

impl RestartPolicy {
	pub fn backoff(&self, default: Backoff) -> Backoff {
		Backoff {
			base: self.backoff_base_ms.map(Duration::from_millis).unwrap_or(default.base),
			max: self.backoff_max_ms.map(Duration::from_millis).unwrap_or(default.max),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonStatus {
	Stopped,
	Starting,
	Running,
	Stopping,
	Failed,
	/// Idle, waiting for the next cron fire.
	Scheduled,
}

impl DaemonStatus {
	pub fn can_transition_to(&self, target: DaemonStatus) -> bool {
		use DaemonStatus::*;
		matches!(
			(self, target),
			(Stopped, Starting)
				| (Stopped, Scheduled)
				| (Starting, Running)
				| (Starting, Stopped)
				| (Starting, Scheduled)
				| (Running, Stopping)
				| (Running, Failed)
				| (Stopping, Stopped)
				| (Failed, Starting)
				| (Failed, Stopped)
				| (Failed, Scheduled)
				| (Scheduled, Starting)
				| (Scheduled, Stopped)
		)
	}
}

impl std::fmt::Display for DaemonStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			DaemonStatus::Stopped => write!(f, "stopped"),
			DaemonStatus::Starting => write!(f, "starting"),
			DaemonStatus::Running => write!(f, "running"),
			DaemonStatus::Stopping => write!(f, "stopping"),
			DaemonStatus::Failed => write!(f, "failed"),
			DaemonStatus::Scheduled => write!(f, "scheduled"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
	Unknown,
	Healthy,
	Unhealthy,
	NotConfigured,
}

/// Runtime record for one registered [`Daemon`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonInstance {
	pub name: String,
	pub state: DaemonStatus,
	pub pid: Option<u32>,
	pub restart_count: u32,
	pub health: HealthStatus,
	/// Unix seconds.
	pub started_at: Option<u64>,
	pub stopped_at: Option<u64>,
	/// Negative values are the signal that terminated the process.
	pub last_exit_code: Option<i32>,
	pub stdout_log: Option<PathBuf>,
	pub stderr_log: Option<PathBuf>,
	/// Unix seconds of the next cron fire while `Scheduled`.
	#[serde(default)]
	pub next_run_at: Option<u64>,
}

impl DaemonInstance {
	pub fn new(daemon: &Daemon) -> Self {
		Self {
			name: daemon.name.clone(),
			state: resting_state(daemon),
			pid: None,
			restart_count: 0,
			health: idle_health(daemon),
			started_at: None,
			stopped_at: None,
			last_exit_code: None,
			stdout_log: None,
			stderr_log: None,
			next_run_at: None,
		}
	}
}

/// Where an instance settles when a run ends without an operator stop.
pub fn resting_state(daemon: &Daemon) -> DaemonStatus {
	if daemon.schedule.is_some() {
		DaemonStatus::Scheduled
	} else {
		DaemonStatus::Stopped
	}
}

/// Health reported while no probe result is available.
pub fn idle_health(daemon: &Daemon) -> HealthStatus {
	if daemon.health_check.is_some() {
		HealthStatus::Unknown
	} else {
		HealthStatus::NotConfigured
	}
}

pub fn now_secs() -> u64 {
	std::time::SystemTime::now()
		.duration_since(std::time::UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use super::*;
	use DaemonStatus::*;

	const ALL: [DaemonStatus; 6] = [Stopped, Starting, Running, Stopping, Failed, Scheduled];

	#[test]
	fn lifecycle_transitions() {
		let valid = [
			(Stopped, Starting),
			(Stopped, Scheduled),
			(Starting, Running),
			(Starting, Stopped),
			(Starting, Scheduled),
			(Running, Stopping),
			(Running, Failed),
			(Stopping, Stopped),
			(Failed, Starting),
			(Failed, Stopped),
			(Failed, Scheduled),
			(Scheduled, Starting),
			(Scheduled, Stopped),
		];
		for from in ALL {
			for to in ALL {
				assert_eq!(
					from.can_transition_to(to),
					valid.contains(&(from, to)),
					"{:?} -> {:?}",
					from,
					to
				);
			}
		}
	}

	#[test]
	fn scheduled_definition_rests_in_scheduled() {
		let mut daemon = Daemon::new("backup", vec!["true".into()]);
		daemon.schedule = Some("0 3 * * *".into());
		assert!(daemon.validate().is_ok());
		assert_eq!(DaemonInstance::new(&daemon).state, Scheduled);

		daemon.schedule = Some("whenever".into());
		assert!(daemon.validate().unwrap_err().contains("invalid schedule"));
	}

	#[test]
	fn restart_policy_overrides_backoff() {
		let default = Backoff {
			base: Duration::from_secs(1),
			max: Duration::from_secs(300),
		};
		let policy: RestartPolicy =
			serde_json::from_str(r#"{"policy":"always","backoff_base_ms":250}"#).unwrap();
		let backoff = policy.backoff(default);
		assert_eq!(backoff.base, Duration::from_millis(250));
		assert_eq!(backoff.max, Duration::from_secs(300));
		assert_eq!(RestartPolicy::default().backoff(default), default);
	}

	#[test]
	fn definition_defaults_from_minimal_json() {
		let daemon: Daemon = serde_json::from_str(r#"{"name":"web","command":["sleep","5"]}"#).unwrap();
		assert_eq!(daemon.stop_timeout_secs, 30);
		assert_eq!(daemon.restart_policy.policy, RestartPolicyType::Never);
		assert_eq!(daemon.restart_policy.max_retries, None);
		assert!(daemon.health_check.is_none());
		assert!(daemon.schedule.is_none());
		assert!(daemon.validate().is_ok());
	}

	#[test]
	fn health_check_uses_type_key() {
		let check: HealthCheck =
			serde_json::from_str(r#"{"type":"tcp","target":"127.0.0.1:80"}"#).unwrap();
		assert_eq!(check.check_type, HealthCheckType::Tcp);
		assert_eq!((check.interval_secs, check.timeout_secs, check.retries), (30, 5, 3));
	}

	#[test]
	fn validate_rejects_bad_definitions() {
		assert!(Daemon::new("", vec!["true".into()]).validate().is_err());
		assert!(Daemon::new("a/b", vec!["true".into()]).validate().is_err());
		assert!(Daemon::new("..", vec!["true".into()]).validate().is_err());
		assert!(Daemon::new("ok", vec![]).validate().is_err());

		let mut daemon = Daemon::new("ok", vec!["true".into()]);
		daemon.health_check = Some(HealthCheck {
			check_type: HealthCheckType::Command,
			target: "true".into(),
			interval_secs: 0,
			timeout_secs: 1,
			retries: 1,
			start_period_secs: 0,
		});
		assert!(daemon.validate().is_err());
	}

	#[test]
	fn new_instance_is_stopped() {
		let daemon = Daemon::new("web", vec!["true".into()]);
		let instance = DaemonInstance::new(&daemon);
		assert_eq!(instance.state, Stopped);
		assert_eq!(instance.pid, None);
		assert_eq!(instance.restart_count, 0);
		assert_eq!(instance.health, HealthStatus::NotConfigured);
	}
}
