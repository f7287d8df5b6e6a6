use std::thread;
use std::time::Duration;

use log::{error, info};

use crate::equipment::{BiasSource, Sense};
use crate::error::{DeviceCommunicationError, Error, Result};
use crate::scpi::{Identity, ScpiSession};
use crate::sweep::linspace;
use super::identify;

/// The 2182A front end returns readings divided by this
pub const NANOVOLTMETER_SCALE:f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceMode {
	/// Outputs are amperes
	Current,
	/// Outputs are volts across a series resistor, A = V / R
	Voltage { load_resistance: f64 },
}

/// Keithley 6200 series precision current source.
pub struct Keithley6200<S: ScpiSession> {
	session: S,
	mode: SourceMode,
	ramp_steps: usize,
	ramp_delay: Duration,
	pub idn: Identity,
}

impl<S: ScpiSession> Keithley6200<S> {

	pub fn new(mut session:S, mode:SourceMode, max_current:f64) -> Result<Self> {
		if let SourceMode::Voltage{ load_resistance } = mode {
			if !(load_resistance > 0.0) {
				return Err(Error::invalid("voltage mode needs a positive load resistance"));
			}
		}

		let idn = identify(&mut session, "62")?;
		for cmd in ["CLEar", "CURRent:FILTer ON", "CURRent:RANGe:AUTO OFF", "OUTPut:ISHield OLOW",
		            "OUTPut:LTEarth OFF", "CURRent:COMPliance 15"].iter() {
			session.write(cmd)?;
		}
		session.write(&format!("CURRent:RANGe {}", max_current))?;
		session.write("OUTPut ON")?;

		Ok(Self{ session, mode, ramp_steps: 20, ramp_delay: Duration::from_millis(100), idn })
	}

	/// How the output is walked to zero when the driver is dropped.
	pub fn with_ramp_down(mut self, steps:usize, delay:Duration) -> Self {
		self.ramp_steps = steps;
		self.ramp_delay = delay;
		self
	}

	fn amps(&self, value:f64) -> f64 {
		match self.mode {
			SourceMode::Current => value,
			SourceMode::Voltage{ load_resistance } => value / load_resistance,
		}
	}

	fn ramp_to_zero(&mut self) -> std::result::Result<(), DeviceCommunicationError> {
		let now = self.session.query_f64("CURRent?")?;
		for curr in linspace(now, 0.0, self.ramp_steps.max(2)) {
			self.session.write(&format!("CURRent {}", curr))?;
			thread::sleep(self.ramp_delay);
		}
		Ok(())
	}

}

impl<S: ScpiSession> BiasSource for Keithley6200<S> {

	fn set_output(&mut self, value:f64) -> std::result::Result<(), DeviceCommunicationError> {
		let amps = self.amps(value);
		self.session.write(&format!("CURRent {}", amps))
	}

	/// In voltage mode the read-back current is converted back to volts.
	fn get_output(&mut self) -> std::result::Result<f64, DeviceCommunicationError> {
		let amps = self.session.query_f64("CURRent?")?;
		Ok(match self.mode {
			SourceMode::Current => amps,
			SourceMode::Voltage{ load_resistance } => amps * load_resistance,
		})
	}

}

impl<S: ScpiSession> Drop for Keithley6200<S> {
	fn drop(&mut self) {
		info!("Switching Keithley 6200 current off");
		if let Err(e) = self.ramp_to_zero() {
			error!("Keithley 6200 could not ramp to zero: {}", e);
		}
	}
}

/// Keithley 2182A nanovoltmeter.
pub struct Keithley2182A<S: ScpiSession> {
	session: S,
	channel: u8,
	pub idn: Identity,
}

impl<S: ScpiSession> Keithley2182A<S> {

	pub fn new(mut session:S) -> Result<Self> {
		let idn = identify(&mut session, "2182")?;
		for cmd in ["SENSe:VOLTage", "SENSe:VOLTage:NPLCycles 5", "SYSTem:FAZero OFF", "SYSTem:AZERo OFF",
		            "SYSTem:LSYNc ON", "SENSe:VOLTage:CHANnel1:RANGe:AUTO ON", "SENSe:VOLTage:CHANnel1:LPASs OFF",
		            "INITiate"].iter() {
			session.write(cmd)?;
		}

		let mut dev = Self{ session, channel: 0, idn };
		dev.select(1)?;
		Ok(dev)
	}

	pub fn channel(&self) -> u8 { self.channel }

	fn select(&mut self, channel:u8) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("SENSe:CHANnel {}", channel))?;
		self.session.write("INITiate:CONTinuous OFF")?;
		self.channel = channel;
		Ok(())
	}

}

impl<S: ScpiSession> Sense for Keithley2182A<S> {

	/// Volts.
	fn measure_now(&mut self, channel:u8) -> std::result::Result<f64, DeviceCommunicationError> {
		if channel != self.channel {
			self.select(channel)?;
		}
		Ok(self.session.query_f64(":READ?")? * NANOVOLTMETER_SCALE)
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scpi::ScriptedSession;

	fn k6200() -> ScriptedSession {
		ScriptedSession::new().always("*IDN?", "KEITHLEY INSTRUMENTS INC.,MODEL 6221,4321,D03")
	}

	#[test]
	fn voltage_mode_divides_by_load() {
		let mut script = k6200().always("CURRent?", "1.0E-6");
		{
			let mut src = Keithley6200::new(&mut script, SourceMode::Voltage{ load_resistance: 1e6 }, 2e-5).unwrap()
				.with_ramp_down(2, Duration::ZERO);
			src.set_output(0.5).unwrap();
			assert!((src.get_output().unwrap() - 1.0).abs() < 1e-12);
		}
		let written = script.written();
		assert!(written.contains(&"CURRent 0.0000005"));
		assert!(written.contains(&"OUTPut ON"));
		// ramp down from the read-back 1 uA
		assert_eq!(&written[written.len() - 2..], &["CURRent 0.000001", "CURRent 0"]);
	}

	#[test]
	fn voltage_mode_needs_a_resistor() {
		let res = Keithley6200::new(k6200(), SourceMode::Voltage{ load_resistance: 0.0 }, 2e-5);
		assert!(matches!(res, Err(Error::InvalidParameter(_))));
	}

	#[test]
	fn refuses_the_wrong_instrument() {
		let script = ScriptedSession::new().always("*IDN?", "YOKOGAWA,GS210,1,1.0");
		assert!(matches!(Keithley2182A::new(script), Err(Error::Device(DeviceCommunicationError::WrongInstrument{ .. }))));
	}

	#[test]
	fn nanovoltmeter_switches_channel_on_demand() {
		let script = ScriptedSession::new()
			.always("*IDN?", "KEITHLEY INSTRUMENTS INC.,MODEL 2182A,1234,C02")
			.always(":READ?", "+1.5E-05");
		let mut dvm = Keithley2182A::new(script).unwrap();
		assert_eq!(dvm.channel(), 1);
		assert!((dvm.measure_now(1).unwrap() - 1.5e-3).abs() < 1e-15);
		dvm.measure_now(2).unwrap();
		assert_eq!(dvm.channel(), 2);
		assert!(dvm.session.log.contains(&"SENSe:CHANnel 2".to_owned()));
	}
}
