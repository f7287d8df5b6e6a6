use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

const WAIT_SLICE:Duration = Duration::from_millis(50);

/// Cooperative stop request shared between the operator and every loop of a run.
///
/// Loops call [`check`](Self::check) at their head; nothing in flight is
/// interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
	flag: Arc<AtomicBool>,
}

impl CancelToken {

	pub fn new() -> Self { Self::default() }

	pub fn cancel(&self) { self.flag.store(true, Ordering::SeqCst); }

	pub fn is_cancelled(&self) -> bool { self.flag.load(Ordering::SeqCst) }

	pub fn check(&self) -> Result<()> {
		if self.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
	}

	/// Sleeps for `d` in short slices. Returns `true` as soon as the token
	/// is cancelled.
	pub fn wait(&self, d:Duration) -> bool {
		let deadline = Instant::now() + d;
		loop {
			if self.is_cancelled() {
				return true;
			}
			let now = Instant::now();
			if now >= deadline {
				return false;
			}
			thread::sleep((deadline - now).min(WAIT_SLICE));
		}
	}

}
