use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Parsed cron expression of a scheduled daemon.
///
/// Accepts the usual five fields (`min hour dom mon dow`) as well as the six
/// and seven field forms with a leading seconds column. Times are UTC.
#[derive(Debug, Clone)]
pub struct CronSchedule {
	expr: String,
	schedule: Schedule,
}

impl CronSchedule {
	pub fn parse(expr: &str) -> Result<Self, String> {
		let normalized = normalize(expr);
		let schedule =
			Schedule::from_str(&normalized).map_err(|e| format!("invalid schedule '{}': {}", expr, e))?;
		if schedule.upcoming(Utc).next().is_none() {
			return Err(format!("schedule '{}' never fires", expr));
		}
		Ok(Self {
			expr: expr.to_string(),
			schedule,
		})
	}

	pub fn expr(&self) -> &str {
		&self.expr
	}

	/// First fire time strictly after `after`.
	pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
		self.schedule.after(&after).next()
	}
}

fn normalize(expr: &str) -> String {
	let expr = expr.trim();
	if expr.split_whitespace().count() == 5 {
		format!("0 {}", expr)
	} else {
		expr.to_string()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn five_fields_fire_on_the_minute() {
		let s = CronSchedule::parse("*/15 * * * *").unwrap();
		let from = Utc.with_ymd_and_hms(2024, 5, 1, 10, 7, 30).unwrap();
		assert_eq!(s.next_after(from), Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap()));
		assert_eq!(s.expr(), "*/15 * * * *");
	}

	#[test]
	fn seconds_field_is_honoured() {
		let s = CronSchedule::parse("*/10 * * * * *").unwrap();
		let from = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 3).unwrap();
		assert_eq!(s.next_after(from), Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 10).unwrap()));
	}

	#[test]
	fn every_second_fires_within_a_second() {
		let s = CronSchedule::parse("* * * * * *").unwrap();
		let now = Utc::now();
		let at = s.next_after(now).unwrap();
		assert!(at > now);
		assert!(at - now <= chrono::Duration::seconds(1));
	}

	#[test]
	fn rejects_garbage() {
		assert!(CronSchedule::parse("every tuesday").is_err());
		assert!(CronSchedule::parse("").is_err());
		assert!(CronSchedule::parse("61 * * * *").is_err());
	}
}
