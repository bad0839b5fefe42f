use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, MutexGuard, RwLock};
use tokio::task::JoinSet;

use crate::config::SupervisorConfig;
use crate::error::{Error, Result};
use crate::health;
use crate::logs::{LogManager, Stream};
use crate::output::pipe_output;
use crate::process::{self, ProcessHandle};
use crate::restart::{self, Decision};
use crate::schedule::CronSchedule;
use crate::store::DefinitionStore;
use crate::types::*;

/// Owns every registered daemon and drives their lifecycles.
///
/// Lifecycle operations on one name are mutually exclusive: a second
/// start/stop/restart/remove arriving while one is in flight fails with
/// `InvalidState` instead of queueing. Different names never contend.
pub struct Supervisor {
	config: SupervisorConfig,
	registry: RwLock<HashMap<String, Arc<Slot>>>,
	logs: LogManager,
	store: Option<DefinitionStore>,
	persist_lock: Mutex<()>,
	shutting_down: AtomicBool,
	shutdown_tx: watch::Sender<bool>,
}

struct Slot {
	daemon: Daemon,
	schedule: Option<CronSchedule>,
	record: watch::Sender<Record>,
	op: Mutex<()>,
	run: std::sync::Mutex<Option<Run>>,
	/// Turns true when the slot leaves the registry; ends the cron timer.
	retired: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
struct Record {
	instance: DaemonInstance,
	/// Bumped on every launch and every planned stop so stale watchers and
	/// pending restarts can tell they lost the race.
	generation: u64,
}

struct Run {
	generation: u64,
	process: ProcessHandle,
	cancel: watch::Sender<bool>,
}

impl Slot {
	fn new(daemon: Daemon) -> Result<Arc<Self>> {
		let schedule = daemon
			.schedule
			.as_deref()
			.map(CronSchedule::parse)
			.transpose()
			.map_err(Error::InvalidDefinition)?;
		let instance = DaemonInstance::new(&daemon);
		let (record, _) = watch::channel(Record {
			instance,
			generation: 0,
		});
		let (retired, _) = watch::channel(false);
		Ok(Arc::new(Self {
			daemon,
			schedule,
			record,
			op: Mutex::new(()),
			run: std::sync::Mutex::new(None),
			retired,
		}))
	}

	fn name(&self) -> &str {
		&self.daemon.name
	}

	fn snapshot(&self) -> DaemonInstance {
		self.record.borrow().instance.clone()
	}

	fn state(&self) -> DaemonStatus {
		self.record.borrow().instance.state
	}

	fn generation(&self) -> u64 {
		self.record.borrow().generation
	}

	fn resting(&self) -> DaemonStatus {
		resting_state(&self.daemon)
	}

	fn retire(&self) {
		let _ = self.retired.send(true);
	}

	/// Operator-stopped instances report no upcoming fire.
	fn set_next_run(&self, at: Option<u64>) {
		self.record.send_if_modified(|r| {
			let next = if r.instance.state == DaemonStatus::Stopped { None } else { at };
			if r.instance.next_run_at == next {
				return false;
			}
			r.instance.next_run_at = next;
			true
		});
	}

	fn begin(&self) -> Result<MutexGuard<'_, ()>> {
		self.op
			.try_lock()
			.map_err(|_| Error::invalid_state(self.name(), "operation already in progress"))
	}

	/// Move to `to` if the table allows it and, when given, the generation
	/// still matches. Returns whether the record changed.
	fn transition(&self, generation: Option<u64>, to: DaemonStatus, apply: impl FnOnce(&mut Record)) -> bool {
		self.record.send_if_modified(|r| {
			if generation.is_some_and(|g| g != r.generation) {
				return false;
			}
			if !r.instance.state.can_transition_to(to) {
				tracing::debug!(daemon = %r.instance.name, "ignoring {} -> {}", r.instance.state, to);
				return false;
			}
			r.instance.state = to;
			apply(r);
			true
		})
	}

	/// Returns false once the run that produced `status` is gone.
	fn set_health(&self, generation: u64, status: HealthStatus) -> bool {
		let mut current = true;
		self.record.send_if_modified(|r| {
			if r.generation != generation || r.instance.state != DaemonStatus::Running {
				current = false;
				return false;
			}
			if r.instance.health == status {
				return false;
			}
			r.instance.health = status;
			true
		});
		current
	}

	fn take_run(&self, generation: Option<u64>) -> Option<Run> {
		let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
		match (&*run, generation) {
			(Some(r), Some(g)) if r.generation != g => None,
			_ => run.take(),
		}
	}

	fn set_run(&self, run: Run) {
		*self.run.lock().unwrap_or_else(|e| e.into_inner()) = Some(run);
	}

	fn settle(&self, record: &mut Record, exit_code: Option<i32>) {
		record.instance.pid = None;
		record.instance.stopped_at = Some(now_secs());
		record.instance.health = idle_health(&self.daemon);
		if exit_code.is_some() {
			record.instance.last_exit_code = exit_code;
		}
	}
}

impl Run {
	fn cancel(&self) {
		let _ = self.cancel.send(true);
	}
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> Arc<Self> {
		let store = config.persist.then(|| DefinitionStore::new(config.store_path()));
		let (shutdown_tx, _) = watch::channel(false);
		Arc::new(Self {
			logs: LogManager::new(config.log_dir()),
			config,
			registry: RwLock::new(HashMap::new()),
			store,
			persist_lock: Mutex::new(()),
			shutting_down: AtomicBool::new(false),
			shutdown_tx,
		})
	}

	/// Re-register persisted definitions as idle instances.
	pub async fn restore(self: &Arc<Self>) -> Result<usize> {
		let Some(store) = &self.store else {
			return Ok(0);
		};
		let daemons = store.load()?;
		let mut registry = self.registry.write().await;
		let mut restored = 0;
		for daemon in daemons {
			if let Err(e) = daemon.validate() {
				tracing::warn!("skipping stored definition: {}", e);
				continue;
			}
			if registry.contains_key(&daemon.name) {
				continue;
			}
			let slot = Slot::new(daemon)?;
			self.arm(&slot);
			registry.insert(slot.name().to_string(), slot);
			restored += 1;
		}
		tracing::info!(count = restored, path = %store.path().display(), "restored definitions");
		Ok(restored)
	}

	pub async fn add(self: &Arc<Self>, daemon: Daemon) -> Result<DaemonInstance> {
		daemon.validate().map_err(Error::InvalidDefinition)?;
		let name = daemon.name.clone();
		let instance = {
			let mut registry = self.registry.write().await;
			if registry.contains_key(&name) {
				return Err(Error::DaemonAlreadyExists(name));
			}
			let slot = Slot::new(daemon)?;
			self.arm(&slot);
			let instance = slot.snapshot();
			registry.insert(name.clone(), slot);
			instance
		};
		tracing::info!(daemon = %name, "added");
		self.persist().await;
		Ok(instance)
	}

	pub async fn start(self: &Arc<Self>, name: &str, wait: bool, timeout: Option<Duration>) -> Result<DaemonInstance> {
		let slot = self.slot(name).await?;
		let generation = {
			let _guard = slot.begin()?;
			match slot.state() {
				DaemonStatus::Stopped | DaemonStatus::Failed | DaemonStatus::Scheduled => {}
				state => return Err(Error::invalid_state(name, format!("already {}", state))),
			}
			self.launch(&slot, false)?
		};

		if wait {
			self.wait_ready(&slot, generation, timeout.unwrap_or(self.config.start_timeout))
				.await
		} else {
			Ok(slot.snapshot())
		}
	}

	pub async fn stop(self: &Arc<Self>, name: &str, force: bool, timeout: Option<Duration>) -> Result<DaemonInstance> {
		let slot = self.slot(name).await?;
		let _guard = slot.begin()?;
		self.stop_locked(&slot, force, timeout).await
	}

	/// Stop (if needed) and start again under a single exclusive section.
	/// Operator restarts do not count towards `restart_count`.
	pub async fn restart(self: &Arc<Self>, name: &str, force: bool, wait: bool) -> Result<DaemonInstance> {
		let slot = self.slot(name).await?;
		let generation = {
			let _guard = slot.begin()?;
			if matches!(slot.state(), DaemonStatus::Running | DaemonStatus::Failed) {
				self.stop_locked(&slot, force, None).await?;
			}
			self.launch(&slot, false)?
		};

		if wait {
			self.wait_ready(&slot, generation, self.config.start_timeout).await
		} else {
			Ok(slot.snapshot())
		}
	}

	pub async fn remove(self: &Arc<Self>, name: &str, force: bool) -> Result<()> {
		let slot = self.slot(name).await?;
		{
			let _guard = slot.begin()?;
			match slot.state() {
				DaemonStatus::Stopped | DaemonStatus::Scheduled => {}
				DaemonStatus::Running | DaemonStatus::Failed if force => {
					self.stop_locked(&slot, true, None).await?;
				}
				state => {
					return Err(Error::invalid_state(
						name,
						format!("cannot remove while {}; stop it first or force", state),
					));
				}
			}
			self.registry.write().await.remove(name);
			slot.retire();
		}
		tracing::info!(daemon = %name, "removed");
		self.persist().await;
		Ok(())
	}

	pub async fn status(&self, name: &str) -> Result<DaemonInstance> {
		Ok(self.slot(name).await?.snapshot())
	}

	pub async fn list(&self) -> Vec<DaemonInstance> {
		let registry = self.registry.read().await;
		let mut instances: Vec<DaemonInstance> = registry.values().map(|s| s.snapshot()).collect();
		instances.sort_by(|a, b| a.name.cmp(&b.name));
		instances
	}

	pub async fn logs(&self, name: &str, lines: usize, stderr: bool) -> Result<Vec<String>> {
		self.slot(name).await?;
		let stream = if stderr { Stream::Stderr } else { Stream::Stdout };
		let logs = self.logs.clone();
		let name = name.to_string();
		tokio::task::spawn_blocking(move || logs.tail(&name, stream, lines))
			.await
			.map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
			.map_err(Error::from)
	}

	/// Liveness of the supervisor itself.
	pub fn is_running(&self) -> bool {
		!self.shutting_down.load(Ordering::SeqCst)
	}

	/// Stop every instance in parallel, then fire the shutdown signal.
	/// Later calls wait for the first one to finish.
	pub async fn shutdown(self: &Arc<Self>) {
		if self.shutting_down.swap(true, Ordering::SeqCst) {
			let mut rx = self.shutdown_tx.subscribe();
			let _ = rx.wait_for(|done| *done).await;
			return;
		}

		tracing::info!("shutting down, stopping all daemons");
		let slots: Vec<Arc<Slot>> = self.registry.read().await.values().cloned().collect();
		let mut set = JoinSet::new();
		for slot in slots {
			slot.retire();
			let sup = Arc::clone(self);
			set.spawn(async move {
				let _guard = slot.op.lock().await;
				if matches!(slot.state(), DaemonStatus::Running | DaemonStatus::Failed) {
					if let Err(e) = sup.stop_locked(&slot, false, None).await {
						tracing::error!(daemon = %slot.name(), "stop during shutdown failed: {}", e);
					}
				}
			});
		}
		while set.join_next().await.is_some() {}

		tracing::info!("all daemons stopped");
		let _ = self.shutdown_tx.send(true);
	}

	/// Turns true once [`shutdown`](Self::shutdown) has finished.
	pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
		self.shutdown_tx.subscribe()
	}

	async fn slot(&self, name: &str) -> Result<Arc<Slot>> {
		self.registry
			.read()
			.await
			.get(name)
			.cloned()
			.ok_or_else(|| Error::DaemonNotFound(name.to_string()))
	}

	async fn persist(&self) {
		let Some(store) = &self.store else {
			return;
		};
		let _guard = self.persist_lock.lock().await;
		let daemons: Vec<Daemon> = self
			.registry
			.read()
			.await
			.values()
			.map(|s| s.daemon.clone())
			.collect();
		if let Err(e) = store.save(daemons) {
			tracing::error!(path = %store.path().display(), "failed to persist definitions: {}", e);
		}
	}

	/// Spawn a new run. Caller holds the slot's op lock and has checked that
	/// the instance is idle. `automatic` restarts are counted.
	fn launch(self: &Arc<Self>, slot: &Arc<Slot>, automatic: bool) -> Result<u64> {
		let name = slot.name();
		if !self.is_running() {
			return Err(Error::invalid_state(name, "supervisor is shutting down"));
		}

		let log_config = slot.daemon.log_config.clone().unwrap_or_else(|| self.config.default_log.clone());
		let stdout_log = self.logs.capture(name, Stream::Stdout, &log_config)?;
		let stderr_log = self.logs.capture(name, Stream::Stderr, &log_config)?;

		let mut generation = 0;
		let started = slot.transition(None, DaemonStatus::Starting, |r| {
			r.generation += 1;
			generation = r.generation;
			if automatic {
				r.instance.restart_count += 1;
			}
			r.instance.pid = None;
			r.instance.health = idle_health(&slot.daemon);
			r.instance.stdout_log = Some(stdout_log.path().to_path_buf());
			r.instance.stderr_log = Some(stderr_log.path().to_path_buf());
		});
		if !started {
			return Err(Error::invalid_state(name, format!("cannot start while {}", slot.state())));
		}

		let spawned = process::spawn(&slot.daemon).and_then(|mut child| {
			if let Some(stdout) = child.stdout.take() {
				tokio::spawn(pipe_output(stdout, stdout_log));
			}
			if let Some(stderr) = child.stderr.take() {
				tokio::spawn(pipe_output(stderr, stderr_log));
			}
			ProcessHandle::watch(child)
		});
		let process = match spawned {
			Ok(p) => p,
			Err(e) => {
				tracing::error!(daemon = %name, "start failed: {}", e);
				slot.transition(Some(generation), slot.resting(), |r| slot.settle(r, None));
				return Err(e);
			}
		};

		let pid = process.pid();
		let (cancel, cancel_rx) = watch::channel(false);
		slot.set_run(Run {
			generation,
			process: process.clone(),
			cancel,
		});
		slot.transition(Some(generation), DaemonStatus::Running, |r| {
			r.instance.pid = Some(pid);
			r.instance.started_at = Some(now_secs());
			r.instance.stopped_at = None;
		});
		tracing::info!(daemon = %name, pid, "started");

		let sup = Arc::clone(self);
		let watched = Arc::clone(slot);
		tokio::spawn(async move {
			let code = process.wait().await;
			sup.on_exit(watched, generation, code);
		});

		if let Some(check) = slot.daemon.health_check.clone() {
			let monitored = Arc::clone(slot);
			tokio::spawn(health::monitor(check, cancel_rx, move |status| {
				monitored.set_health(generation, status)
			}));
		}

		Ok(generation)
	}

	async fn wait_ready(&self, slot: &Arc<Slot>, generation: u64, timeout: Duration) -> Result<DaemonInstance> {
		let needs_health = slot.daemon.health_check.is_some();
		let mut rx = slot.record.subscribe();
		let waited = tokio::time::timeout(
			timeout,
			rx.wait_for(|r| {
				r.generation != generation
					|| r.instance.state != DaemonStatus::Running
					|| !needs_health
					|| r.instance.health == HealthStatus::Healthy
			}),
		)
		.await;

		match waited {
			Err(_) => Err(Error::Timeout(format!(
				"{}: not ready within {}s",
				slot.name(),
				timeout.as_secs_f64()
			))),
			Ok(Err(_)) => Err(Error::Process(format!("{}: instance record closed", slot.name()))),
			Ok(Ok(r)) if r.generation == generation && r.instance.state == DaemonStatus::Running => {
				Ok(r.instance.clone())
			}
			Ok(Ok(r)) => Err(Error::Process(format!(
				"{}: exited during startup (exit code {})",
				slot.name(),
				r.instance
					.last_exit_code
					.map(|c| c.to_string())
					.unwrap_or_else(|| "unknown".into())
			))),
		}
	}

	/// Caller holds the slot's op lock.
	async fn stop_locked(&self, slot: &Arc<Slot>, force: bool, timeout: Option<Duration>) -> Result<DaemonInstance> {
		let name = slot.name();
		match slot.state() {
			DaemonStatus::Stopped => Err(Error::invalid_state(name, "already stopped")),
			DaemonStatus::Failed => {
				// drops any pending automatic restart
				slot.transition(None, DaemonStatus::Stopped, |r| {
					r.generation += 1;
					r.instance.next_run_at = None;
				});
				tracing::info!(daemon = %name, "stopped after failure");
				Ok(slot.snapshot())
			}
			DaemonStatus::Scheduled => {
				slot.transition(None, DaemonStatus::Stopped, |r| {
					r.generation += 1;
					r.instance.next_run_at = None;
				});
				tracing::info!(daemon = %name, "unscheduled");
				Ok(slot.snapshot())
			}
			DaemonStatus::Running => {
				let run = slot.take_run(None);
				slot.transition(None, DaemonStatus::Stopping, |r| r.generation += 1);

				let mut result = Ok(None);
				if let Some(run) = run {
					run.cancel();
					let grace = timeout.unwrap_or(Duration::from_secs(slot.daemon.stop_timeout_secs));
					result = run
						.process
						.stop(grace, self.config.kill_grace, force)
						.await
						.map(Some);
				}

				let exit_code = result.as_ref().ok().copied().flatten();
				slot.transition(None, DaemonStatus::Stopped, |r| {
					slot.settle(r, exit_code);
					r.instance.next_run_at = None;
				});
				match result {
					Ok(_) => {
						tracing::info!(daemon = %name, exit_code = ?exit_code, "stopped");
						Ok(slot.snapshot())
					}
					Err(e) => {
						tracing::error!(daemon = %name, "stop failed: {}", e);
						Err(e)
					}
				}
			}
			state => Err(Error::invalid_state(name, format!("cannot stop while {}", state))),
		}
	}

	/// Exit watcher callback. Only an exit of the current run while Running
	/// counts as unplanned.
	fn on_exit(self: &Arc<Self>, slot: Arc<Slot>, generation: u64, code: i32) {
		let failed = slot.transition(Some(generation), DaemonStatus::Failed, |r| slot.settle(r, Some(code)));
		if !failed {
			return;
		}
		if let Some(run) = slot.take_run(Some(generation)) {
			run.cancel();
		}
		tracing::warn!(daemon = %slot.name(), exit_code = code, "exited unexpectedly");

		let restarts = slot.snapshot().restart_count;
		let decision = if self.is_running() {
			let backoff = slot.daemon.restart_policy.backoff(self.config.backoff);
			restart::decide(&slot.daemon.restart_policy, restarts, code, &backoff)
		} else {
			Decision::GiveUp
		};

		let delay = match decision {
			Decision::GiveUp => {
				let rest = slot.resting();
				slot.transition(Some(generation), rest, |_| {});
				tracing::info!(daemon = %slot.name(), restarts, "not restarting, now {}", rest);
				return;
			}
			Decision::RestartNow => Duration::ZERO,
			Decision::RestartAfter(delay) => restart::jitter(delay),
		};

		tracing::info!(daemon = %slot.name(), "restarting in {:?}", delay);
		let sup = Arc::clone(self);
		tokio::spawn(async move {
			sup.auto_restart(slot, generation, delay).await;
		});
	}

	async fn auto_restart(self: Arc<Self>, slot: Arc<Slot>, generation: u64, delay: Duration) {
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		let _guard = slot.op.lock().await;
		if !self.is_running() || slot.generation() != generation || slot.state() != DaemonStatus::Failed {
			return;
		}

		if let Err(e) = self.launch(&slot, true) {
			tracing::error!(daemon = %slot.name(), "automatic restart failed: {}", e);
			slot.transition(None, slot.resting(), |_| {});
		}
	}

	/// Start the cron timer of a scheduled slot. The timer holds only a weak
	/// reference and ends once the slot is retired.
	fn arm(self: &Arc<Self>, slot: &Arc<Slot>) {
		let Some(schedule) = slot.schedule.clone() else {
			return;
		};
		tracing::info!(daemon = %slot.name(), schedule = %schedule.expr(), "scheduled");
		let retired = slot.retired.subscribe();
		tokio::spawn(run_schedule(Arc::downgrade(self), Arc::clone(slot), schedule, retired));
	}

	/// Cron fire. Only an instance resting in `Scheduled` is started; a run
	/// still in progress or an operator stop skips the fire.
	fn fire_scheduled(self: &Arc<Self>, slot: &Arc<Slot>) {
		let Ok(_guard) = slot.begin() else {
			tracing::debug!(daemon = %slot.name(), "cron fire skipped, operation in progress");
			return;
		};
		let state = slot.state();
		if state != DaemonStatus::Scheduled {
			tracing::debug!(daemon = %slot.name(), "cron fire skipped while {}", state);
			return;
		}
		tracing::info!(daemon = %slot.name(), "cron fire");
		if let Err(e) = self.launch(slot, false) {
			tracing::error!(daemon = %slot.name(), "scheduled start failed: {}", e);
		}
	}
}

async fn run_schedule(
	supervisor: Weak<Supervisor>,
	slot: Arc<Slot>,
	schedule: CronSchedule,
	mut retired: watch::Receiver<bool>,
) {
	let mut last: Option<DateTime<Utc>> = None;
	loop {
		let now = Utc::now();
		let from = last.map_or(now, |l| l.max(now));
		let Some(at) = schedule.next_after(from) else {
			tracing::warn!(daemon = %slot.name(), "schedule has no further fire times");
			return;
		};
		slot.set_next_run(u64::try_from(at.timestamp()).ok());

		let wait = (at - now).to_std().unwrap_or(Duration::ZERO);
		tokio::select! {
			_ = tokio::time::sleep(wait) => {}
			_ = retired.changed() => return,
		}
		if *retired.borrow() {
			return;
		}
		last = Some(at);

		let Some(sup) = supervisor.upgrade() else {
			return;
		};
		sup.fire_scheduled(&slot);
	}
}
