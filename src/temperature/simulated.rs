use std::collections::VecDeque;
use std::io;

use crate::error::DeviceCommunicationError;
use super::{ControlMode, Pid, SavedParameters, TemperatureDevice};

/// Offline temperature controller.
///
/// The mixing chamber relaxes toward the setpoint by `relax` of the remaining
/// difference on every read (1.0 = instantly). Scripted readings, if any, are
/// returned first, which lets tests replay an exact approach.
#[derive(Debug, Clone)]
pub struct SimulatedCryostat {
	temperature: f64,
	setpoint: f64,
	relax: f64,
	scripted: VecDeque<f64>,
	failures: usize,
	pid: Pid,
	/// Every command, in the order received
	pub log: Vec<String>,
}

impl SimulatedCryostat {

	pub fn at(temperature:f64) -> Self {
		Self{
			temperature,
			setpoint: temperature,
			relax: 1.0,
			scripted: VecDeque::new(),
			failures: 0,
			pid: Pid::new(1.0, 2.0, 3.0),
			log: Vec::new(),
		}
	}

	pub fn relaxing(mut self, relax:f64) -> Self {
		self.relax = relax.max(0.0).min(1.0);
		self
	}

	pub fn with_readings<I: IntoIterator<Item = f64>>(mut self, readings:I) -> Self {
		self.scripted.extend(readings);
		self
	}

	/// The next `n` reads fail.
	pub fn fail_reads(&mut self, n:usize) { self.failures = n; }

	pub fn setpoint(&self) -> f64 { self.setpoint }

}

impl TemperatureDevice for SimulatedCryostat {

	fn read_temperature(&mut self) -> Result<f64, DeviceCommunicationError> {
		if self.failures > 0 {
			self.failures -= 1;
			return Err(io::Error::new(io::ErrorKind::TimedOut, "simulated bridge timeout").into());
		}
		if let Some(t) = self.scripted.pop_front() {
			self.temperature = t;
			return Ok(t);
		}
		self.temperature += (self.setpoint - self.temperature) * self.relax;
		Ok(self.temperature)
	}

	fn select_channel(&mut self) -> Result<(), DeviceCommunicationError> {
		self.log.push("SCAN".to_owned());
		Ok(())
	}

	fn set_setpoint(&mut self, kelvin:f64) -> Result<(), DeviceCommunicationError> {
		self.log.push(format!("SETP {}", kelvin));
		self.setpoint = kelvin;
		Ok(())
	}

	fn set_excitation(&mut self, setting:u8) -> Result<(), DeviceCommunicationError> {
		self.log.push(format!("EXC {}", setting));
		Ok(())
	}

	fn set_heater_range(&mut self, range:u8) -> Result<(), DeviceCommunicationError> {
		self.log.push(format!("HTR {}", range));
		Ok(())
	}

	fn set_pid(&mut self, pid:&Pid) -> Result<(), DeviceCommunicationError> {
		self.log.push(format!("PID {}", pid));
		self.pid = *pid;
		Ok(())
	}

	fn set_control_mode(&mut self, mode:ControlMode) -> Result<(), DeviceCommunicationError> {
		self.log.push(format!("MODE {:?}", mode));
		Ok(())
	}

	fn save_parameters(&mut self) -> Result<SavedParameters, DeviceCommunicationError> {
		Ok(SavedParameters{ pid: self.pid, input: "simulated".to_owned() })
	}

	fn restore_parameters(&mut self, saved:&SavedParameters) -> Result<(), DeviceCommunicationError> {
		self.log.push(format!("RESTORE {} {}", saved.input, saved.pid));
		self.pid = saved.pid;
		Ok(())
	}

}
