use std::process::Stdio;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::types::{HealthCheck, HealthCheckType, HealthStatus};

/// Run one probe. Any error, including a timeout, counts as a failure.
pub async fn probe(check: &HealthCheck, client: &reqwest::Client) -> bool {
	let timeout = Duration::from_secs(check.timeout_secs.max(1));
	match check.check_type {
		HealthCheckType::Http => match client.get(&check.target).timeout(timeout).send().await {
			Ok(resp) => resp.status().is_success(),
			Err(e) => {
				tracing::debug!(url = %check.target, "http probe failed: {}", e);
				false
			}
		},
		HealthCheckType::Tcp => {
			matches!(
				tokio::time::timeout(timeout, TcpStream::connect(check.target.as_str())).await,
				Ok(Ok(_))
			)
		}
		HealthCheckType::Command => {
			let child = Command::new("sh")
				.args(["-c", &check.target])
				.stdin(Stdio::null())
				.stdout(Stdio::null())
				.stderr(Stdio::null())
				.kill_on_drop(true)
				.spawn();
			let mut child = match child {
				Ok(c) => c,
				Err(e) => {
					tracing::warn!(command = %check.target, "probe spawn failed: {}", e);
					return false;
				}
			};
			match tokio::time::timeout(timeout, child.wait()).await {
				Ok(Ok(status)) => status.success(),
				_ => false,
			}
		}
	}
}

/// Consecutive-failure bookkeeping for one monitored instance.
#[derive(Debug, Clone)]
pub struct HealthTracker {
	threshold: u32,
	consecutive_failures: u32,
	status: HealthStatus,
}

impl HealthTracker {
	pub fn new(retries: u32) -> Self {
		Self {
			threshold: retries.max(1),
			consecutive_failures: 0,
			status: HealthStatus::Unknown,
		}
	}

	pub fn record(&mut self, ok: bool) -> HealthStatus {
		if ok {
			self.consecutive_failures = 0;
			self.status = HealthStatus::Healthy;
		} else {
			self.consecutive_failures = self.consecutive_failures.saturating_add(1);
			if self.consecutive_failures >= self.threshold {
				self.status = HealthStatus::Unhealthy;
			}
		}
		self.status
	}

	pub fn consecutive_failures(&self) -> u32 {
		self.consecutive_failures
	}

	pub fn status(&self) -> HealthStatus {
		self.status
	}
}

/// Probe `check` until `cancel` turns true or `report` returns false.
///
/// The first probe runs as soon as the start period has passed, later ones
/// every `interval_secs`.
pub async fn monitor<F>(check: HealthCheck, mut cancel: watch::Receiver<bool>, mut report: F)
where
	F: FnMut(HealthStatus) -> bool,
{
	let client = match reqwest::Client::builder().build() {
		Ok(c) => c,
		Err(e) => {
			tracing::error!("failed to build http client: {}", e);
			return;
		}
	};

	if check.start_period_secs > 0 {
		tokio::select! {
			_ = tokio::time::sleep(Duration::from_secs(check.start_period_secs)) => {}
			_ = cancelled(&mut cancel) => return,
		}
	}

	let mut ticker = tokio::time::interval(Duration::from_secs(check.interval_secs.max(1)));
	ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
	let mut tracker = HealthTracker::new(check.retries);

	loop {
		tokio::select! {
			_ = ticker.tick() => {}
			_ = cancelled(&mut cancel) => return,
		}

		let ok = tokio::select! {
			ok = probe(&check, &client) => ok,
			_ = cancelled(&mut cancel) => return,
		};

		let previous = tracker.status();
		let status = tracker.record(ok);
		if status != previous {
			tracing::info!(probe = %check.target, "health {:?} -> {:?}", previous, status);
		}
		if !report(status) {
			return;
		}
	}
}

async fn cancelled(rx: &mut watch::Receiver<bool>) {
	let _ = rx.wait_for(|c| *c).await;
}
