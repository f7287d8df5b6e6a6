use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::DeviceCommunicationError;
use super::TemperatureDevice;

/// Minimum spacing between two thermometer queries from any thread
pub const DEFAULT_QUERY_FLOOR:Duration = Duration::from_secs(1);

struct Guarded<D> {
	device: D,
	last_read: Option<Instant>,
}

/// Shared access to one temperature controller.
///
/// Every access goes through a single lock, so the sweep and the background
/// logger can never interleave commands on the wire. Temperature reads also
/// respect a minimum interval counted from the previous read by anyone.
pub struct SensorGuard<D> {
	inner: Arc<Mutex<Guarded<D>>>,
	min_interval: Duration,
}

impl<D> Clone for SensorGuard<D> {
	fn clone(&self) -> Self {
		Self{ inner: Arc::clone(&self.inner), min_interval: self.min_interval }
	}
}

impl<D: TemperatureDevice> SensorGuard<D> {

	pub fn new(device:D, min_interval:Duration) -> Self {
		Self{ inner: Arc::new(Mutex::new(Guarded{ device, last_read: None })), min_interval }
	}

	pub fn min_interval(&self) -> Duration { self.min_interval }

	fn lock(&self) -> Result<MutexGuard<'_, Guarded<D>>, DeviceCommunicationError> {
		self.inner.lock().map_err(|_| DeviceCommunicationError::response("temperature sensor lock poisoned"))
	}

	pub fn try_read(&self) -> Result<f64, DeviceCommunicationError> {
		let mut g = self.lock()?;
		if let Some(last) = g.last_read {
			let elapsed = last.elapsed();
			if elapsed < self.min_interval {
				thread::sleep(self.min_interval - elapsed);
			}
		}
		let res = g.device.read_temperature();
		g.last_read = Some(Instant::now());
		res
	}

	/// Present temperature, or 0 if the read failed. A zero can never pass a
	/// stability check, so a glitch only restarts the count.
	pub fn read(&self) -> f64 {
		match self.try_read() {
			Ok(t) => t,
			Err(e) => {
				warn!("Error in measuring temperature: {}", e);
				0.0
			}
		}
	}

	/// Runs a command sequence on the device while holding the lock.
	pub fn with_device<R, F>(&self, f:F) -> Result<R, DeviceCommunicationError>
	where F: FnOnce(&mut D) -> Result<R, DeviceCommunicationError> {
		let mut g = self.lock()?;
		f(&mut g.device)
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::temperature::SimulatedCryostat;

	#[test]
	fn failed_reads_become_zero() {
		let mut cryo = SimulatedCryostat::at(0.5);
		cryo.fail_reads(1);
		let guard = SensorGuard::new(cryo, Duration::ZERO);
		assert_eq!(guard.read(), 0.0);
		assert_eq!(guard.read(), 0.5);
	}

	#[test]
	fn clones_share_one_device() {
		let guard = SensorGuard::new(SimulatedCryostat::at(0.1), Duration::ZERO);
		let other = guard.clone();
		let handle = thread::spawn(move || {
			other.with_device(|d| d.set_setpoint(0.2)).unwrap();
			other.read()
		});
		handle.join().unwrap();
		assert_eq!(guard.read(), 0.2);
	}
}
