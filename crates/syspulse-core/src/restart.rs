use std::time::Duration;

use crate::types::{RestartPolicy, RestartPolicyType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
	RestartNow,
	RestartAfter(Duration),
	GiveUp,
}

/// Exponential delay between automatic restarts, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
	pub base: Duration,
	pub max: Duration,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			base: Duration::from_secs(1),
			max: Duration::from_secs(300),
		}
	}
}

impl Backoff {
	/// Delay before restart number `restarts + 1`. The first restart is
	/// immediate; afterwards `base * 2^(restarts - 1)`.
	pub fn delay(&self, restarts: u32) -> Duration {
		if restarts == 0 {
			return Duration::ZERO;
		}
		let factor = 1u32.checked_shl(restarts - 1).unwrap_or(u32::MAX);
		self.base.saturating_mul(factor).min(self.max)
	}
}

/// Spread a restart delay by up to 10% so daemons that crashed together do
/// not come back in lockstep.
pub fn jitter(delay: Duration) -> Duration {
	if delay.is_zero() {
		return delay;
	}
	delay + delay.mul_f64(rand::random::<f64>() * 0.1)
}

/// Decide what happens after an unplanned exit. `restart_count` is the number
/// of automatic restarts already performed for this run.
pub fn decide(policy: &RestartPolicy, restart_count: u32, exit_code: i32, backoff: &Backoff) -> Decision {
	let wants_restart = match policy.policy {
		RestartPolicyType::Never => false,
		RestartPolicyType::Always => true,
		RestartPolicyType::OnFailure => exit_code != 0,
	};
	if !wants_restart {
		return Decision::GiveUp;
	}
	if let Some(max) = policy.max_retries {
		if restart_count >= max {
			return Decision::GiveUp;
		}
	}

	match backoff.delay(restart_count) {
		d if d.is_zero() => Decision::RestartNow,
		d => Decision::RestartAfter(d),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn policy(policy: RestartPolicyType, max_retries: Option<u32>) -> RestartPolicy {
		RestartPolicy {
			policy,
			max_retries,
			..Default::default()
		}
	}

	#[test]
	fn never_gives_up() {
		let b = Backoff::default();
		assert_eq!(decide(&policy(RestartPolicyType::Never, None), 0, 1, &b), Decision::GiveUp);
		assert_eq!(decide(&policy(RestartPolicyType::Never, Some(5)), 0, 0, &b), Decision::GiveUp);
	}

	#[test]
	fn always_restarts_on_clean_exit() {
		let b = Backoff::default();
		assert_eq!(decide(&policy(RestartPolicyType::Always, None), 0, 0, &b), Decision::RestartNow);
	}

	#[test]
	fn on_failure_ignores_clean_exit() {
		let b = Backoff::default();
		let p = policy(RestartPolicyType::OnFailure, None);
		assert_eq!(decide(&p, 0, 0, &b), Decision::GiveUp);
		assert_eq!(decide(&p, 0, 2, &b), Decision::RestartNow);
		// killed by a signal
		assert_eq!(decide(&p, 0, -9, &b), Decision::RestartNow);
	}

	#[test]
	fn max_retries_is_respected() {
		let b = Backoff::default();
		let p = policy(RestartPolicyType::OnFailure, Some(2));
		assert_eq!(decide(&p, 0, 1, &b), Decision::RestartNow);
		assert_eq!(decide(&p, 1, 1, &b), Decision::RestartAfter(Duration::from_secs(1)));
		assert_eq!(decide(&p, 2, 1, &b), Decision::GiveUp);

		let none = policy(RestartPolicyType::Always, Some(0));
		assert_eq!(decide(&none, 0, 1, &b), Decision::GiveUp);
	}

	#[test]
	fn backoff_doubles_up_to_cap() {
		let b = Backoff {
			base: Duration::from_millis(100),
			max: Duration::from_millis(1000),
		};
		assert_eq!(b.delay(0), Duration::ZERO);
		assert_eq!(b.delay(1), Duration::from_millis(100));
		assert_eq!(b.delay(2), Duration::from_millis(200));
		assert_eq!(b.delay(4), Duration::from_millis(800));
		assert_eq!(b.delay(5), Duration::from_millis(1000));
		assert_eq!(b.delay(64), Duration::from_millis(1000));
	}

	#[test]
	fn jitter_stays_within_ten_percent() {
		assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
		let base = Duration::from_secs(10);
		for _ in 0..100 {
			let d = jitter(base);
			assert!(d >= base && d <= Duration::from_secs(11), "{:?}", d);
		}
	}
}
