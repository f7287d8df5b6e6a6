//! Setpoint-and-settle temperature sweeps.
//!
//! For every setpoint the controller re-derives excitation, heater range and
//! PID from [`ControlTables`], then polls the thermometer until the reading
//! is within tolerance and stays there for a number of consecutive polls.
//! Stability is best effort: when the attempt budget runs out a warning is
//! logged and the last reading is used anyway.

use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{DeviceCommunicationError, Error, Result};
use crate::measurement::CancelToken;
use crate::sweep::arange;

mod bands;
mod sensor;
mod simulated;

pub use bands::{BandTable, ControlSettings, ControlTables, Pid, PidSetting};
pub use sensor::{SensorGuard, DEFAULT_QUERY_FLOOR};
pub use simulated::SimulatedCryostat;

/// Highest temperature a sweep may ask for before the mixture boils off, K
pub const MAX_TEMP:f64 = 1.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
	ClosedLoop,
	OpenLoop,
	Off,
}

/// Whatever a controller had configured before a run, restored afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedParameters {
	pub pid: Pid,
	/// Raw input/excitation configuration as the instrument reported it
	pub input: String,
}

/// One temperature controller family.
pub trait TemperatureDevice: Send {
	fn read_temperature(&mut self) -> std::result::Result<f64, DeviceCommunicationError>;

	/// Points the controller at the thermometer channel used for control.
	fn select_channel(&mut self) -> std::result::Result<(), DeviceCommunicationError>;

	fn set_setpoint(&mut self, kelvin:f64) -> std::result::Result<(), DeviceCommunicationError>;

	fn set_excitation(&mut self, setting:u8) -> std::result::Result<(), DeviceCommunicationError>;

	/// Range 0 turns the heater off.
	fn set_heater_range(&mut self, range:u8) -> std::result::Result<(), DeviceCommunicationError>;

	fn set_pid(&mut self, pid:&Pid) -> std::result::Result<(), DeviceCommunicationError>;

	fn set_control_mode(&mut self, mode:ControlMode) -> std::result::Result<(), DeviceCommunicationError>;

	fn save_parameters(&mut self) -> std::result::Result<SavedParameters, DeviceCommunicationError>;

	fn restore_parameters(&mut self, saved:&SavedParameters) -> std::result::Result<(), DeviceCommunicationError>;

	fn default_tables(&self) -> ControlTables { ControlTables::lakeshore370() }
}

impl<T: TemperatureDevice + ?Sized> TemperatureDevice for Box<T> {
	fn read_temperature(&mut self) -> std::result::Result<f64, DeviceCommunicationError> { (**self).read_temperature() }
	fn select_channel(&mut self) -> std::result::Result<(), DeviceCommunicationError> { (**self).select_channel() }
	fn set_setpoint(&mut self, kelvin:f64) -> std::result::Result<(), DeviceCommunicationError> { (**self).set_setpoint(kelvin) }
	fn set_excitation(&mut self, setting:u8) -> std::result::Result<(), DeviceCommunicationError> { (**self).set_excitation(setting) }
	fn set_heater_range(&mut self, range:u8) -> std::result::Result<(), DeviceCommunicationError> { (**self).set_heater_range(range) }
	fn set_pid(&mut self, pid:&Pid) -> std::result::Result<(), DeviceCommunicationError> { (**self).set_pid(pid) }
	fn set_control_mode(&mut self, mode:ControlMode) -> std::result::Result<(), DeviceCommunicationError> { (**self).set_control_mode(mode) }
	fn save_parameters(&mut self) -> std::result::Result<SavedParameters, DeviceCommunicationError> { (**self).save_parameters() }
	fn restore_parameters(&mut self, saved:&SavedParameters) -> std::result::Result<(), DeviceCommunicationError> { (**self).restore_parameters(saved) }
	fn default_tables(&self) -> ControlTables { (**self).default_tables() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
	/// Sweeps and controls the temperature
	Active,
	/// Only reads the thermometer
	Passive,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityParams {
	/// K
	pub tolerance: f64,
	/// Consecutive in-tolerance polls needed
	pub confirmations: usize,
	/// Wait before each confirmation poll
	pub settle_delay: Duration,
	/// Wait between polls while still approaching the setpoint
	pub approach_delay: Duration,
	/// Confirmation polls allowed before giving up
	pub max_attempts: usize,
	/// Approach polls allowed before moving on to confirmation
	pub max_approach_polls: usize,
}

impl Default for StabilityParams {
	fn default() -> Self {
		Self{
			tolerance: 0.001,
			confirmations: 3,
			settle_delay: Duration::from_secs(3),
			approach_delay: Duration::from_secs(1),
			max_attempts: 50,
			max_approach_polls: 3600,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
	Confirming(usize),
	Stable,
	/// Out of attempts
	Exhausted,
}

/// Counts consecutive in-tolerance polls; any miss starts the count over.
#[derive(Debug, Clone)]
pub struct StabilityTracker {
	tolerance: f64,
	required: usize,
	max_attempts: usize,
	count: usize,
	attempts: usize,
}

impl StabilityTracker {

	pub fn new(params:&StabilityParams) -> Self {
		Self{
			tolerance: params.tolerance,
			required: params.confirmations,
			max_attempts: params.max_attempts,
			count: 0,
			attempts: 0,
		}
	}

	pub fn is_stable(&self) -> bool { self.count >= self.required }

	pub fn count(&self) -> usize { self.count }

	/// Feeds one `measured - setpoint` difference.
	pub fn observe(&mut self, delta:f64) -> Stability {
		self.attempts += 1;
		if delta.abs() <= self.tolerance { self.count += 1; } else { self.count = 0; }

		if self.is_stable() { Stability::Stable }
		else if self.attempts > self.max_attempts { Stability::Exhausted }
		else { Stability::Confirming(self.count) }
	}

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetpointReport {
	pub setpoint: f64,
	/// Last measured temperature, the value to record for this step
	pub temperature: f64,
	pub polls: usize,
	pub stable: bool,
	pub settings: ControlSettings,
}

#[derive(Debug, Clone)]
pub struct TemperatureOptions {
	pub mode: OperatingMode,
	/// First setpoint; the present temperature if `None`
	pub start: Option<f64>,
	/// Exclusive end of the sweep
	pub stop: f64,
	pub step: f64,
	pub max_temperature: f64,
	/// Band tables; the device family's defaults if `None`
	pub tables: Option<ControlTables>,
	pub stability: StabilityParams,
	pub query_floor: Duration,
}

impl Default for TemperatureOptions {
	fn default() -> Self {
		Self{
			mode: OperatingMode::Active,
			start: None,
			stop: MAX_TEMP,
			step: 0.1,
			max_temperature: MAX_TEMP,
			tables: None,
			stability: StabilityParams::default(),
			query_floor: DEFAULT_QUERY_FLOOR,
		}
	}
}

pub struct TemperatureController<D: TemperatureDevice> {
	sensor: SensorGuard<D>,
	tables: ControlTables,
	saved: SavedParameters,
	mode: OperatingMode,
	setpoints: Vec<f64>,
	max_temperature: f64,
	stability: StabilityParams,
	applied: Option<ControlSettings>,
	shut_down: bool,
}

impl<D: TemperatureDevice> TemperatureController<D> {

	pub fn new(device:D, opts:TemperatureOptions) -> Result<Self> {
		let tables = opts.tables.clone().unwrap_or_else(|| device.default_tables());
		tables.validate()?;
		if opts.mode == OperatingMode::Active && !(opts.step > 0.0) {
			return Err(Error::invalid(format!("temperature step must be positive, got {}", opts.step)));
		}

		info!("Connecting temperature controller");
		let sensor = SensorGuard::new(device, opts.query_floor);
		let saved = sensor.with_device(|d| d.save_parameters())?;
		debug!("Saved controller parameters: PID {}, input {:?}", saved.pid, saved.input);
		// A passive controller is only ever queried
		if opts.mode == OperatingMode::Active {
			sensor.with_device(|d| d.select_channel())?;
		}

		let mut ctrl = Self{
			sensor,
			tables,
			saved,
			mode: opts.mode,
			setpoints: Vec::new(),
			max_temperature: opts.max_temperature,
			stability: opts.stability,
			applied: None,
			// Nothing to undo until the first setpoint goes out
			shut_down: true,
		};

		if ctrl.mode == OperatingMode::Active {
			let initial = match opts.start {
				Some(t) => t,
				None => ctrl.sensor.read(),
			};
			ctrl.set_setpoints(arange(initial, opts.stop, opts.step))?;

			ctrl.shut_down = false;
			ctrl.sensor.with_device(|d| {
				d.set_setpoint(initial)?;
				d.set_control_mode(ControlMode::ClosedLoop)
			})?;
			ctrl.apply_settings(initial)?;
		}

		info!("Temperature controller connected in {:?} mode", ctrl.mode);
		Ok(ctrl)
	}

	pub fn mode(&self) -> OperatingMode { self.mode }

	pub fn tables(&self) -> &ControlTables { &self.tables }

	pub fn applied(&self) -> Option<&ControlSettings> { self.applied.as_ref() }

	/// A handle for other threads (the background logger) sharing the sensor.
	pub fn sensor(&self) -> SensorGuard<D> { self.sensor.clone() }

	/// Present temperature; 0 if the read failed.
	pub fn temperature(&self) -> f64 { self.sensor.read() }

	pub fn temperature_range(&self) -> Result<&[f64]> {
		match self.mode {
			OperatingMode::Active => Ok(&self.setpoints),
			OperatingMode::Passive => Err(Error::PassiveMode),
		}
	}

	/// Replaces the setpoint list; every entry must respect the maximum temperature.
	pub fn set_setpoints(&mut self, setpoints:Vec<f64>) -> Result<()> {
		if self.mode == OperatingMode::Passive {
			return Err(Error::PassiveMode);
		}
		let limit = self.max_temperature;
		if let Some(&setpoint) = setpoints.iter().find(|t| !(**t <= limit)) {
			return Err(Error::TemperatureLimit{ setpoint, limit });
		}
		self.setpoints = setpoints;
		Ok(())
	}

	pub fn settings_for(&self, t:f64) -> ControlSettings {
		self.tables.settings_for(t, self.saved.pid)
	}

	/// Pushes the band parameters for `t` to the device.
	pub fn apply_settings(&mut self, t:f64) -> Result<ControlSettings> {
		let s = self.settings_for(t);
		self.sensor.with_device(|d| {
			d.set_excitation(s.excitation)?;
			d.set_pid(&s.pid)?;
			d.set_heater_range(s.heater_range)
		})?;
		info!("T = {} K: excitation {}, heater range {}, PID {}", t, s.excitation, s.heater_range, s.pid);
		self.applied = Some(s);
		Ok(s)
	}

	pub fn sweep(&mut self, cancel:CancelToken) -> Result<TemperatureSweep<'_, D>> {
		if self.mode == OperatingMode::Passive {
			return Err(Error::PassiveMode);
		}
		Ok(TemperatureSweep{ controller: self, cancel, next: 0 })
	}

	/// Commands `t` and blocks until the temperature is confirmed stable or
	/// the attempt budget is used up.
	pub fn settle(&mut self, t:f64, cancel:&CancelToken) -> Result<SetpointReport> {
		cancel.check()?;
		if !(t <= self.max_temperature) {
			return Err(Error::TemperatureLimit{ setpoint: t, limit: self.max_temperature });
		}

		self.sensor.with_device(|d| d.set_setpoint(t))?;
		let settings = self.apply_settings(t)?;
		let p = self.stability;

		let mut actual = self.sensor.read();
		let mut polls = 1;
		info!("Heating, target temperature {} K, now {} K", t, actual);

		let mut approach = 0;
		while (actual - t).abs() >= p.tolerance {
			cancel.check()?;
			if approach >= p.max_approach_polls {
				warn!("Temperature did not reach {} K after {} polls, checking stability anyway", t, approach);
				break;
			}
			thread::sleep(p.approach_delay);
			actual = self.sensor.read();
			polls += 1;
			approach += 1;
		}

		debug!("Temperature is set, waiting to be stable");
		let mut tracker = StabilityTracker::new(&p);
		let stable = if tracker.is_stable() { true } else {
			loop {
				cancel.check()?;
				thread::sleep(p.settle_delay);
				actual = self.sensor.read();
				polls += 1;
				match tracker.observe(actual - t) {
					Stability::Stable => break true,
					Stability::Exhausted => {
						warn!("Cannot stabilise at {} K (last reading {} K), continuing", t, actual);
						break false;
					},
					Stability::Confirming(n) => debug!("Now {} K, must be {} K, stable {} times", actual, t, n),
				}
			}
		};

		info!("Temperature was set: {} K", actual);
		Ok(SetpointReport{ setpoint: t, temperature: actual, polls, stable, settings })
	}

	/// Turns the heater off and restores the saved parameters. Runs once; the
	/// controller does it on drop if nobody called it.
	pub fn shutdown(&mut self) -> Result<()> {
		if self.shut_down {
			return Ok(());
		}
		self.shut_down = true;
		if self.mode == OperatingMode::Passive {
			return Ok(());
		}

		let saved = self.saved.clone();
		self.sensor.with_device(|d| {
			d.set_heater_range(0)?;
			d.set_control_mode(ControlMode::Off)?;
			d.restore_parameters(&saved)
		})?;
		info!("Heater is off, previous controller parameters restored");
		Ok(())
	}

}

impl<D: TemperatureDevice> Drop for TemperatureController<D> {
	fn drop(&mut self) {
		if let Err(e) = self.shutdown() {
			error!("Could not restore temperature controller: {}", e);
		}
	}
}

/// Iterator over the setpoints of a controller. Stops after the first error.
pub struct TemperatureSweep<'a, D: TemperatureDevice> {
	controller: &'a mut TemperatureController<D>,
	cancel: CancelToken,
	next: usize,
}

impl<'a, D: TemperatureDevice> TemperatureSweep<'a, D> {
	pub fn len(&self) -> usize { self.controller.setpoints.len() }

	pub fn is_empty(&self) -> bool { self.controller.setpoints.is_empty() }
}

impl<'a, D: TemperatureDevice> Iterator for TemperatureSweep<'a, D> {
	type Item = Result<SetpointReport>;

	fn next(&mut self) -> Option<Self::Item> {
		let t = *self.controller.setpoints.get(self.next)?;
		self.next += 1;
		let res = self.controller.settle(t, &self.cancel);
		if res.is_err() {
			self.next = self.controller.setpoints.len();
		}
		Some(res)
	}
}
