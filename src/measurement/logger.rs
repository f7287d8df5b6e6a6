use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info};

use crate::error::Result;
use crate::temperature::{SensorGuard, TemperatureDevice};
use super::cancel::CancelToken;
use super::feed::{PlotFeed, TAB_TEMPERATURE};

/// Readings kept for the live temperature plot
pub const TEMPERATURE_WINDOW:usize = 100;

// Longest uninterrupted sleep, so a stop request is noticed quickly
const POLL_SLICE:Duration = Duration::from_millis(50);

/// Keeps the newest `capacity` items, evicting the oldest.
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer<T> {
	items: VecDeque<T>,
	capacity: usize,
}

impl<T> RingBuffer<T> {

	/// A zero capacity is bumped to one.
	pub fn new(capacity:usize) -> Self {
		let capacity = capacity.max(1);
		Self{ items: VecDeque::with_capacity(capacity), capacity }
	}

	pub fn push(&mut self, item:T) {
		if self.items.len() >= self.capacity {
			self.items.pop_front();
		}
		self.items.push_back(item);
	}

	pub fn len(&self) -> usize { self.items.len() }

	pub fn is_empty(&self) -> bool { self.items.is_empty() }

	pub fn capacity(&self) -> usize { self.capacity }

	/// Oldest first.
	pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ { self.items.iter() }

	pub fn back(&self) -> Option<&T> { self.items.back() }

}

impl<T: Clone> RingBuffer<T> {
	pub fn to_vec(&self) -> Vec<T> { self.items.iter().cloned().collect() }
}

impl<T> Default for RingBuffer<T> {
	fn default() -> Self { Self::new(TEMPERATURE_WINDOW) }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSample {
	/// Seconds since the logger started
	pub elapsed: f64,
	/// K, 0 if the read failed
	pub temperature: f64,
}

/// Latest readings, shared between the logger thread and its readers.
pub type TemperatureWindow = Arc<Mutex<RingBuffer<TemperatureSample>>>;

/// Background thread polling the shared thermometer until stopped or until
/// the run is cancelled.
///
/// Its readings go through the same [`SensorGuard`] as the temperature
/// sweep, so the two never talk over each other.
pub struct ThermometerLogger {
	window: TemperatureWindow,
	stop: CancelToken,
	handle: Option<JoinHandle<()>>,
}

impl ThermometerLogger {

	pub fn spawn<D>(sensor:SensorGuard<D>, interval:Duration, cancel:CancelToken, feed:PlotFeed) -> Result<Self>
	where D: TemperatureDevice + 'static {
		let window:TemperatureWindow = Arc::new(Mutex::new(RingBuffer::new(TEMPERATURE_WINDOW)));
		let stop = CancelToken::new();

		let shared = Arc::clone(&window);
		let stop_flag = stop.clone();
		let handle = thread::Builder::new()
			.name("thermometer".to_owned())
			.spawn(move || {
				info!("Thermometer logger started");
				let start = Instant::now();
				while !stop_flag.is_cancelled() && !cancel.is_cancelled() {
					let temperature = sensor.read();
					let sample = TemperatureSample{ elapsed: start.elapsed().as_secs_f64(), temperature };
					match shared.lock() {
						Ok(mut w) => w.push(sample),
						Err(_) => {
							error!("Temperature window lock poisoned, logger stops");
							break;
						}
					}
					feed.append(TAB_TEMPERATURE, 0, vec![(sample.elapsed, temperature)]);
					debug!("Thermometer: {} K", temperature);
					nap(interval, &stop_flag, &cancel);
				}
				info!("Thermometer logger stopped");
			})?;

		Ok(Self{ window, stop, handle: Some(handle) })
	}

	pub fn window(&self) -> TemperatureWindow { Arc::clone(&self.window) }

	pub fn latest(&self) -> Option<f64> {
		latest_temperature(&self.window)
	}

	pub fn samples(&self) -> Vec<TemperatureSample> {
		self.window.lock().map(|w| w.to_vec()).unwrap_or_default()
	}

	/// Stops the thread and waits for it.
	pub fn stop(mut self) -> Vec<TemperatureSample> {
		self.join();
		self.samples()
	}

	fn join(&mut self) {
		self.stop.cancel();
		if let Some(handle) = self.handle.take() {
			if handle.join().is_err() {
				error!("Thermometer logger thread panicked");
			}
		}
	}

}

impl Drop for ThermometerLogger {
	fn drop(&mut self) { self.join(); }
}

pub fn latest_temperature(window:&TemperatureWindow) -> Option<f64> {
	window.lock().ok().and_then(|w| w.back().map(|s| s.temperature))
}

fn nap(total:Duration, stop:&CancelToken, cancel:&CancelToken) {
	let deadline = Instant::now() + total;
	loop {
		if stop.is_cancelled() || cancel.is_cancelled() {
			return;
		}
		let now = Instant::now();
		if now >= deadline {
			return;
		}
		thread::sleep((deadline - now).min(POLL_SLICE));
	}
}
