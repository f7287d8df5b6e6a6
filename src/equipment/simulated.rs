use rand::distributions::{IndependentSample, Range};
use serde::{Deserialize, Serialize};

use crate::error::DeviceCommunicationError;
use super::{BiasSource, Sense};

/// Parameters of the simulated hysteretic junction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JunctionParams {
	/// Switching (critical) current, A
	pub ic: f64,
	/// Retrapping current, A
	pub ir: f64,
	/// Normal-state resistance, Ohm
	pub rn: f64,
	/// Series resistor converting commanded volts to amperes; `None` for a current source
	pub load_resistance: Option<f64>,
	/// Amplifier gain applied to the returned voltage
	pub gain: f64,
	/// Constant voltage offset added before the gain
	pub offset: f64,
	/// Peak amplitude of uniform voltage noise
	pub noise: f64,
}

impl Default for JunctionParams {
	fn default() -> Self {
		Self{ ic: 1.0e-6, ir: 0.4e-6, rn: 100.0, load_resistance: None, gain: 1.0, offset: 0.0, noise: 0.0 }
	}
}

/// Offline stand-in for a source/voltmeter pair wired to a Josephson junction.
///
/// The junction stays superconducting until |I| exceeds `ic` and, once
/// switched, stays resistive until |I| falls below `ir`.
#[derive(Debug, Clone)]
pub struct SimulatedJunction {
	params: JunctionParams,
	output: f64,
	normal: bool,
}

impl SimulatedJunction {

	pub fn new(params:JunctionParams) -> Self {
		Self{ params, output: 0.0, normal: false }
	}

	pub fn params(&self) -> &JunctionParams { &self.params }

	pub fn is_normal(&self) -> bool { self.normal }

	fn current(&self) -> f64 {
		match self.params.load_resistance {
			Some(r) if r != 0.0 => self.output / r,
			_ => self.output,
		}
	}

}

impl BiasSource for SimulatedJunction {

	fn set_output(&mut self, value:f64) -> Result<(), DeviceCommunicationError> {
		self.output = value;
		let i = self.current().abs();
		if self.normal && i < self.params.ir {
			self.normal = false;
		} else if !self.normal && i > self.params.ic {
			self.normal = true;
		}
		Ok(())
	}

	fn get_output(&mut self) -> Result<f64, DeviceCommunicationError> { Ok(self.output) }

}

impl Sense for SimulatedJunction {

	fn measure_now(&mut self, _channel:u8) -> Result<f64, DeviceCommunicationError> {
		let v = if self.normal { self.params.rn * self.current() } else { 0.0 };
		let noise = if self.params.noise > 0.0 {
			let mut rng = rand::thread_rng();
			Range::new(-self.params.noise, self.params.noise).ind_sample(&mut rng)
		} else { 0.0 };
		Ok((v + self.params.offset + noise) * self.params.gain)
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn switches_and_retraps_with_hysteresis() {
		let mut j = SimulatedJunction::new(JunctionParams::default());
		j.set_output(0.9e-6).unwrap();
		assert_eq!(j.measure_now(1).unwrap(), 0.0);

		j.set_output(1.1e-6).unwrap();
		assert!(j.is_normal());
		assert!((j.measure_now(1).unwrap() - 1.1e-4).abs() < 1e-12);

		// Still resistive between ir and ic on the way back
		j.set_output(0.5e-6).unwrap();
		assert!(j.is_normal());

		j.set_output(0.3e-6).unwrap();
		assert!(!j.is_normal());
	}

	#[test]
	fn voltage_mode_divides_by_load() {
		let params = JunctionParams{ load_resistance: Some(1.0e6), gain: 100.0, ..JunctionParams::default() };
		let mut j = SimulatedJunction::new(params);
		j.set_output(2.0).unwrap(); // 2 uA
		assert!(j.is_normal());
		assert!((j.measure_now(1).unwrap() - 2.0e-6 * 100.0 * 100.0).abs() < 1e-9);
	}
}
