//! The capability interface every source/sense instrument satisfies.
//!
//! Sweep and control code only ever sees [`BiasSource`], [`Sense`] or their
//! union [`EquipmentAdapter`]. Concrete instruments live in
//! [`crate::devices`]; the variants here are the debug, simulated and
//! recording stand-ins selected through [`AdapterKind`].

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::DeviceCommunicationError;

mod simulated;

pub use simulated::{JunctionParams, SimulatedJunction};

/// Something that can be commanded to an output level (current or voltage,
/// fixed when the adapter is constructed).
pub trait BiasSource: Send {
	fn set_output(&mut self, value:f64) -> Result<(), DeviceCommunicationError>;

	fn get_output(&mut self) -> Result<f64, DeviceCommunicationError>;
}

/// Something that returns one (possibly averaged) reading per call.
pub trait Sense: Send {
	fn measure_now(&mut self, channel:u8) -> Result<f64, DeviceCommunicationError>;
}

pub trait EquipmentAdapter: BiasSource + Sense {}

/// A microwave generator irradiating the sample.
pub trait SignalGenerator: Send {
	fn set_frequency(&mut self, ghz:f64) -> Result<(), DeviceCommunicationError>;

	fn set_power(&mut self, dbm:f64) -> Result<(), DeviceCommunicationError>;

	fn set_rf_output(&mut self, on:bool) -> Result<(), DeviceCommunicationError>;
}

impl<T: BiasSource + Sense> EquipmentAdapter for T {}

impl<T: BiasSource + ?Sized> BiasSource for Box<T> {
	fn set_output(&mut self, value:f64) -> Result<(), DeviceCommunicationError> { (**self).set_output(value) }
	fn get_output(&mut self) -> Result<f64, DeviceCommunicationError> { (**self).get_output() }
}

impl<T: Sense + ?Sized> Sense for Box<T> {
	fn measure_now(&mut self, channel:u8) -> Result<f64, DeviceCommunicationError> { (**self).measure_now(channel) }
}

impl<T: SignalGenerator + ?Sized> SignalGenerator for Box<T> {
	fn set_frequency(&mut self, ghz:f64) -> Result<(), DeviceCommunicationError> { (**self).set_frequency(ghz) }
	fn set_power(&mut self, dbm:f64) -> Result<(), DeviceCommunicationError> { (**self).set_power(dbm) }
	fn set_rf_output(&mut self, on:bool) -> Result<(), DeviceCommunicationError> { (**self).set_rf_output(on) }
}

/// Which adapter implementation a run should be wired with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
	/// Disconnected debug adapter, outputs are remembered and readings are zero
	Null,
	/// Software junction model
	Simulated,
	/// Real instruments over VXI-11
	Vxi11,
}

impl Default for AdapterKind {
	fn default() -> Self { AdapterKind::Simulated }
}

/// A bias source and a voltmeter used together as one adapter.
pub struct Bench<S, M> {
	source: S,
	sense: M,
}

impl<S: BiasSource, M: Sense> Bench<S, M> {

	pub fn new(source:S, sense:M) -> Self { Self{ source, sense } }

	pub fn source(&mut self) -> &mut S { &mut self.source }

	pub fn sense(&mut self) -> &mut M { &mut self.sense }

	pub fn into_parts(self) -> (S, M) { (self.source, self.sense) }

}

impl<S: BiasSource, M: Sense> BiasSource for Bench<S, M> {
	fn set_output(&mut self, value:f64) -> Result<(), DeviceCommunicationError> { self.source.set_output(value) }
	fn get_output(&mut self) -> Result<f64, DeviceCommunicationError> { self.source.get_output() }
}

impl<S: BiasSource, M: Sense> Sense for Bench<S, M> {
	fn measure_now(&mut self, channel:u8) -> Result<f64, DeviceCommunicationError> { self.sense.measure_now(channel) }
}

/// Debug adapter used when an instrument is disconnected.
#[derive(Debug, Default, Clone)]
pub struct NullAdapter {
	output: f64,
}

impl NullAdapter {
	pub fn new() -> Self { Self::default() }
}

impl BiasSource for NullAdapter {
	fn set_output(&mut self, value:f64) -> Result<(), DeviceCommunicationError> {
		self.output = value;
		Ok(())
	}

	fn get_output(&mut self) -> Result<f64, DeviceCommunicationError> { Ok(self.output) }
}

impl Sense for NullAdapter {
	fn measure_now(&mut self, _channel:u8) -> Result<f64, DeviceCommunicationError> { Ok(0.0) }
}

/// Remembers every commanded output; the history stays readable after the
/// adapter has been moved into a sweeper or a thread.
#[derive(Debug, Clone)]
pub struct RecordingAdapter {
	history: Arc<Mutex<Vec<f64>>>,
	output: f64,
	fail_after: Option<usize>,
}

impl RecordingAdapter {

	pub fn new() -> Self { Self::starting_at(0.0) }

	pub fn starting_at(output:f64) -> Self {
		Self{ history: Arc::new(Mutex::new(Vec::new())), output, fail_after: None }
	}

	/// Makes every `set_output` after the first `n` fail with an I/O error.
	pub fn failing_after(mut self, n:usize) -> Self {
		self.fail_after = Some(n);
		self
	}

	pub fn history(&self) -> Arc<Mutex<Vec<f64>>> { Arc::clone(&self.history) }

	pub fn commands(&self) -> Vec<f64> {
		self.history.lock().map(|h| h.clone()).unwrap_or_default()
	}

}

impl Default for RecordingAdapter {
	fn default() -> Self { Self::new() }
}

impl BiasSource for RecordingAdapter {

	fn set_output(&mut self, value:f64) -> Result<(), DeviceCommunicationError> {
		let mut history = self.history.lock()
			.map_err(|_| DeviceCommunicationError::response("recording history poisoned"))?;
		if let Some(n) = self.fail_after {
			if history.len() >= n {
				return Err(DeviceCommunicationError::Io(std::io::Error::new(
					std::io::ErrorKind::TimedOut, "simulated instrument timeout")));
			}
		}
		history.push(value);
		self.output = value;
		Ok(())
	}

	fn get_output(&mut self) -> Result<f64, DeviceCommunicationError> { Ok(self.output) }

}

impl Sense for RecordingAdapter {
	fn measure_now(&mut self, _channel:u8) -> Result<f64, DeviceCommunicationError> { Ok(self.output) }
}

/// Generator stand-in for dry runs; keeps every command as text.
#[derive(Debug, Clone, Default)]
pub struct RecordingGenerator {
	log: Arc<Mutex<Vec<String>>>,
}

impl RecordingGenerator {

	pub fn new() -> Self { Self::default() }

	pub fn log(&self) -> Arc<Mutex<Vec<String>>> { Arc::clone(&self.log) }

	pub fn commands(&self) -> Vec<String> {
		self.log.lock().map(|l| l.clone()).unwrap_or_default()
	}

	fn push(&mut self, cmd:String) -> Result<(), DeviceCommunicationError> {
		self.log.lock()
			.map_err(|_| DeviceCommunicationError::response("recording history poisoned"))?
			.push(cmd);
		Ok(())
	}

}

impl SignalGenerator for RecordingGenerator {
	fn set_frequency(&mut self, ghz:f64) -> Result<(), DeviceCommunicationError> { self.push(format!("FREQ {}", ghz)) }
	fn set_power(&mut self, dbm:f64) -> Result<(), DeviceCommunicationError> { self.push(format!("POW {}", dbm)) }
	fn set_rf_output(&mut self, on:bool) -> Result<(), DeviceCommunicationError> {
		self.push(format!("OUTP {}", if on { "ON" } else { "OFF" }))
	}
}
