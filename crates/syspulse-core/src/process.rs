use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::types::{Daemon, ResourceLimits};

/// Spawn the daemon's command in its own process group with piped output.
pub fn spawn(daemon: &Daemon) -> Result<Child> {
	let (program, args) = daemon
		.command
		.split_first()
		.ok_or_else(|| Error::InvalidDefinition(format!("{}: command must not be empty", daemon.name)))?;

	let mut cmd = Command::new(program);
	cmd.args(args)
		.envs(&daemon.env)
		.stdin(Stdio::null())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(false)
		.process_group(0);

	if let Some(dir) = &daemon.working_dir {
		cmd.current_dir(dir);
	}

	if let Some(limits) = daemon.resource_limits.clone() {
		// SAFETY: only async-signal-safe setrlimit calls run between fork and exec.
		unsafe {
			cmd.pre_exec(move || apply_limits(&limits));
		}
	}

	cmd.spawn()
		.map_err(|e| Error::Process(format!("failed to spawn {} for {}: {}", program, daemon.name, e)))
}

fn apply_limits(limits: &ResourceLimits) -> std::io::Result<()> {
	use nix::sys::resource::{setrlimit, Resource};

	if let Some(bytes) = limits.max_memory_bytes {
		setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
	}
	if let Some(files) = limits.max_open_files {
		setrlimit(Resource::RLIMIT_NOFILE, files, files)?;
	}
	Ok(())
}

/// Exit code as reported to callers: the process's own code, or the negated
/// signal number when a signal ended it.
pub fn exit_code(status: ExitStatus) -> i32 {
	status
		.code()
		.or_else(|| status.signal().map(|sig| -sig))
		.unwrap_or(-1)
}

/// Cheap, cloneable view of a live child. The child itself is owned by a
/// reaper task that publishes the exit code once.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
	pid: u32,
	exit: watch::Receiver<Option<i32>>,
}

impl ProcessHandle {
	/// Take ownership of `child` and reap it in the background.
	pub fn watch(mut child: Child) -> Result<Self> {
		let pid = child
			.id()
			.ok_or_else(|| Error::Process("child exited before its pid was read".into()))?;
		let (tx, rx) = watch::channel(None);

		tokio::spawn(async move {
			let code = match child.wait().await {
				Ok(status) => exit_code(status),
				Err(e) => {
					tracing::error!(pid, "wait failed: {}", e);
					-1
				}
			};
			let _ = tx.send(Some(code));
		});

		Ok(Self { pid, exit: rx })
	}

	pub fn pid(&self) -> u32 {
		self.pid
	}

	pub fn exit_code(&self) -> Option<i32> {
		*self.exit.borrow()
	}

	pub async fn wait(&self) -> i32 {
		let mut rx = self.exit.clone();
		let code = match rx.wait_for(|code| code.is_some()).await {
			Ok(code) => code.unwrap_or(-1),
			Err(_) => -1,
		};
		code
	}

	pub async fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
		tokio::time::timeout(timeout, self.wait()).await.ok()
	}

	/// Signal the whole process group. A group that is already gone is not an
	/// error.
	pub fn signal(&self, sig: Signal) -> Result<()> {
		match killpg(Pid::from_raw(self.pid as i32), sig) {
			Ok(()) | Err(Errno::ESRCH) => Ok(()),
			Err(e) => Err(Error::Process(format!("failed to send {} to pid {}: {}", sig, self.pid, e))),
		}
	}

	/// SIGTERM, wait up to `grace`, then SIGKILL and wait up to `kill_grace`.
	/// `force` skips straight to SIGKILL.
	pub async fn stop(&self, grace: Duration, kill_grace: Duration, force: bool) -> Result<i32> {
		if let Some(code) = self.exit_code() {
			return Ok(code);
		}

		if !force {
			self.signal(Signal::SIGTERM)?;
			if let Some(code) = self.wait_timeout(grace).await {
				return Ok(code);
			}
			tracing::warn!(pid = self.pid, "no exit after {:?}, sending SIGKILL", grace);
		}

		self.signal(Signal::SIGKILL)?;
		self.wait_timeout(kill_grace)
			.await
			.ok_or_else(|| Error::Process(format!("pid {} survived SIGKILL", self.pid)))
	}
}
