use std::time::{Duration, Instant};

use log::info;

/// Projects how long the rest of a multi-condition run will take.
///
/// The first condition gives the initial estimate of the whole run; after
/// every later one the projection uses the mean time per condition so far.
#[derive(Debug, Clone)]
pub struct TimeEstimator {
	total: usize,
	done: usize,
	started: Option<Instant>,
}

impl TimeEstimator {

	pub fn new(total:usize) -> Self { Self{ total, done: 0, started: None } }

	pub fn completed(&self) -> usize { self.done }

	pub fn begin_condition(&mut self) {
		if self.started.is_none() {
			self.started = Some(Instant::now());
		}
	}

	/// Returns the projected remaining time.
	pub fn end_condition(&mut self) -> Duration {
		let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
		self.done += 1;
		let remaining = project_remaining(elapsed, self.done, self.total);
		if self.done == 1 {
			info!("Total measurement time: {}", format_hms(elapsed * self.total as u32));
		} else {
			info!("Time from start: {}, remaining: {}", format_hms(elapsed), format_hms(remaining));
		}
		remaining
	}

}

pub fn project_remaining(elapsed:Duration, done:usize, total:usize) -> Duration {
	if done == 0 || done >= total {
		return Duration::ZERO;
	}
	(elapsed / done as u32) * (total - done) as u32
}

pub fn format_hms(d:Duration) -> String {
	let secs = d.as_secs();
	format!("{} h, {} mm, {} ss", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn projection_uses_mean_condition_time() {
		assert_eq!(project_remaining(Duration::from_secs(30), 3, 10), Duration::from_secs(70));
		assert_eq!(project_remaining(Duration::from_secs(30), 10, 10), Duration::ZERO);
		assert_eq!(project_remaining(Duration::from_secs(30), 0, 10), Duration::ZERO);
	}

	#[test]
	fn formats_hours_minutes_seconds() {
		assert_eq!(format_hms(Duration::from_secs(3 * 3600 + 25 * 60 + 7)), "3 h, 25 mm, 7 ss");
	}

	#[test]
	fn counts_conditions() {
		let mut t = TimeEstimator::new(2);
		t.begin_condition();
		t.end_condition();
		t.begin_condition();
		assert_eq!(t.end_condition(), Duration::ZERO);
		assert_eq!(t.completed(), 2);
	}
}
