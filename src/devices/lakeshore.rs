use crate::error::{DeviceCommunicationError, Error, Result};
use crate::scpi::{Identity, ScpiSession};
use crate::temperature::{ControlMode, ControlTables, Pid, SavedParameters, TemperatureDevice};
use super::identify;

/// Thermometer channel of the mixing chamber on the 370 bridge
pub const DEFAULT_370_CHANNEL:u8 = 6;

/// LakeShore 370 AC resistance bridge.
pub struct LakeShore370<S: ScpiSession> {
	session: S,
	channel: u8,
	pub idn: Identity,
}

impl<S: ScpiSession> LakeShore370<S> {

	pub fn new(mut session:S, channel:u8) -> Result<Self> {
		let idn = identify(&mut session, "370")?;
		Ok(Self{ session, channel, idn })
	}

	pub fn channel(&self) -> u8 { self.channel }

}

impl<S: ScpiSession> TemperatureDevice for LakeShore370<S> {

	fn read_temperature(&mut self) -> std::result::Result<f64, DeviceCommunicationError> {
		self.session.query_f64(&format!("RDGK? {}", self.channel))
	}

	fn select_channel(&mut self) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("SCAN {},0", self.channel))
	}

	fn set_setpoint(&mut self, kelvin:f64) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("SETP {}", kelvin))
	}

	// voltage excitation, 6.32 kOhm range, autorange on, excitation on
	fn set_excitation(&mut self, setting:u8) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("RDGRNG {}, 0, {}, 14, 1, 0", self.channel, setting))
	}

	fn set_heater_range(&mut self, range:u8) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("HTRRNG {}", range))
	}

	fn set_pid(&mut self, pid:&Pid) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("PID {}", pid))
	}

	fn set_control_mode(&mut self, mode:ControlMode) -> std::result::Result<(), DeviceCommunicationError> {
		let code = match mode {
			ControlMode::ClosedLoop => 1,
			ControlMode::OpenLoop => 3,
			ControlMode::Off => 4,
		};
		self.session.write(&format!("CMODE {}", code))
	}

	fn save_parameters(&mut self) -> std::result::Result<SavedParameters, DeviceCommunicationError> {
		let input = self.session.query(&format!("RDGRNG? {}", self.channel))?.trim().to_owned();
		let pid = Pid::parse(&self.session.query("PID?")?)?;
		Ok(SavedParameters{ pid, input })
	}

	fn restore_parameters(&mut self, saved:&SavedParameters) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("RDGRNG {}, {}", self.channel, saved.input))?;
		self.set_pid(&saved.pid)
	}

	fn default_tables(&self) -> ControlTables { ControlTables::lakeshore370() }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputChannel {
	A,
	B,
}

impl InputChannel {
	fn letter(self) -> char {
		match self {
			InputChannel::A => 'A',
			InputChannel::B => 'B',
		}
	}

	fn index(self) -> u8 {
		match self {
			InputChannel::A => 1,
			InputChannel::B => 2,
		}
	}
}

// INTYPE fields: sensor type, autorange, range, compensation, units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InputType([i32; 5]);

impl InputType {
	fn parse(reply:&str) -> std::result::Result<Self, DeviceCommunicationError> {
		let fields:Vec<i32> = reply.trim().split(',')
			.map(|f| f.trim().parse::<i32>())
			.collect::<std::result::Result<_, _>>()
			.map_err(|_| DeviceCommunicationError::response(format!("bad INTYPE reply {:?}", reply)))?;
		if fields.len() != 5 {
			return Err(DeviceCommunicationError::response(format!("expected five INTYPE fields in {:?}", reply)));
		}
		Ok(Self([fields[0], fields[1], fields[2], fields[3], fields[4]]))
	}
}

/// LakeShore 335 controller with a sensor input and a heater output.
pub struct LakeShore335<S: ScpiSession> {
	session: S,
	input: InputChannel,
	heater: u8,
	intype: Option<InputType>,
	pub idn: Identity,
}

impl<S: ScpiSession> LakeShore335<S> {

	/// `heater` is output 1 or 2.
	pub fn new(mut session:S, input:InputChannel, heater:u8) -> Result<Self> {
		if heater != 1 && heater != 2 {
			return Err(Error::invalid(format!("heater output must be 1 or 2, got {}", heater)));
		}
		let idn = identify(&mut session, "335")?;
		Ok(Self{ session, input, heater, intype: None, idn })
	}

	fn input_type(&mut self) -> std::result::Result<InputType, DeviceCommunicationError> {
		match self.intype {
			Some(t) => Ok(t),
			None => {
				let t = InputType::parse(&self.session.query(&format!("INTYPE? {}", self.input.letter()))?)?;
				self.intype = Some(t);
				Ok(t)
			}
		}
	}

}

impl<S: ScpiSession> TemperatureDevice for LakeShore335<S> {

	fn read_temperature(&mut self) -> std::result::Result<f64, DeviceCommunicationError> {
		self.session.query_f64(&format!("KRDG? {}", self.input.letter()))
	}

	fn select_channel(&mut self) -> std::result::Result<(), DeviceCommunicationError> {
		self.set_control_mode(ControlMode::ClosedLoop)
	}

	fn set_setpoint(&mut self, kelvin:f64) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("SETP {},{}", self.heater, kelvin))
	}

	fn set_excitation(&mut self, setting:u8) -> std::result::Result<(), DeviceCommunicationError> {
		let InputType([sensor, autorange, _, compensation, units]) = self.input_type()?;
		self.session.write(&format!("INTYPE {},{},{},{},{},{}",
			self.input.letter(), sensor, autorange, setting, compensation, units))
	}

	fn set_heater_range(&mut self, range:u8) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("RANGE {},{}", self.heater, range))
	}

	fn set_pid(&mut self, pid:&Pid) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("PID {},{}", self.heater, pid))
	}

	fn set_control_mode(&mut self, mode:ControlMode) -> std::result::Result<(), DeviceCommunicationError> {
		let code = match mode {
			ControlMode::ClosedLoop => 1,
			ControlMode::OpenLoop => 3,
			ControlMode::Off => 0,
		};
		self.session.write(&format!("OUTMODE {},{},{},1", self.heater, code, self.input.index()))
	}

	fn save_parameters(&mut self) -> std::result::Result<SavedParameters, DeviceCommunicationError> {
		let input = self.session.query(&format!("INTYPE? {}", self.input.letter()))?.trim().to_owned();
		self.intype = Some(InputType::parse(&input)?);
		let pid = Pid::parse(&self.session.query(&format!("PID? {}", self.heater))?)?;
		Ok(SavedParameters{ pid, input })
	}

	fn restore_parameters(&mut self, saved:&SavedParameters) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("INTYPE {},{}", self.input.letter(), saved.input))?;
		self.set_pid(&saved.pid)
	}

	fn default_tables(&self) -> ControlTables { ControlTables::lakeshore335() }

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::measurement::CancelToken;
	use crate::scpi::ScriptedSession;
	use crate::temperature::{OperatingMode, StabilityParams, TemperatureController, TemperatureOptions};
	use std::time::Duration;

	fn options(start:f64, stop:f64) -> TemperatureOptions {
		TemperatureOptions{
			start: Some(start),
			stop,
			step: 0.1,
			stability: StabilityParams{ settle_delay: Duration::ZERO, approach_delay: Duration::ZERO, ..StabilityParams::default() },
			query_floor: Duration::ZERO,
			..TemperatureOptions::default()
		}
	}

	#[test]
	fn bridge_runs_a_controlled_sweep_and_restores() {
		let mut script = ScriptedSession::new()
			.always("*IDN?", "LSCI,MODEL370,370A1B,04102008")
			.always("RDGRNG?", "0, 5, 14, 1, 0")
			.always("PID?", "+0001.0,+0002.0,+0003")
			.always("RDGK?", "+0.100000E+00");
		{
			let bridge = LakeShore370::new(&mut script, DEFAULT_370_CHANNEL).unwrap();
			let mut ctrl = TemperatureController::new(bridge, options(0.1, 0.15)).unwrap();
			let reports:Vec<_> = ctrl.sweep(CancelToken::new()).unwrap().collect();
			assert_eq!(reports.len(), 1);
			assert!(reports[0].as_ref().unwrap().stable);
		}
		let written = script.written();
		assert_eq!(&written[..6], &[
			"SCAN 6,0", "SETP 0.1", "CMODE 1", "RDGRNG 6, 0, 2, 14, 1, 0", "PID 1,2,3", "HTRRNG 7",
		]);
		assert_eq!(&written[written.len() - 4..], &["HTRRNG 0", "CMODE 4", "RDGRNG 6, 0, 5, 14, 1, 0", "PID 1,2,3"]);
	}

	#[test]
	fn controller_keeps_sensor_settings_when_changing_excitation() {
		let mut script = ScriptedSession::new()
			.always("*IDN?", "LSCI,MODEL335,LSA1234,1.4")
			.always("INTYPE?", "3,1,4,1,1")
			.always("PID?", "50,20,0")
			.always("KRDG?", "4.2");
		{
			let mut ls = LakeShore335::new(&mut script, InputChannel::B, 2).unwrap();
			let saved = ls.save_parameters().unwrap();
			assert_eq!(saved.pid, Pid::new(50.0, 20.0, 0.0));
			ls.set_excitation(1).unwrap();
			ls.set_pid(&Pid::new(5.0, 2.0, 0.0)).unwrap();
			assert_eq!(ls.read_temperature().unwrap(), 4.2);
			ls.restore_parameters(&saved).unwrap();
		}
		assert_eq!(script.written(), vec!["INTYPE B,3,1,1,1,1", "PID 2,5,2,0", "INTYPE B,3,1,4,1,1", "PID 2,50,20,0"]);
	}

	#[test]
	fn passive_controller_only_reads() {
		let mut script = ScriptedSession::new()
			.always("*IDN?", "LSCI,MODEL335,LSA1234,1.4")
			.always("INTYPE?", "3,1,4,1,1")
			.always("PID?", "50,20,0")
			.always("KRDG?", "4.2");
		{
			let ls = LakeShore335::new(&mut script, InputChannel::A, 1).unwrap();
			let opts = TemperatureOptions{ mode: OperatingMode::Passive, ..options(4.0, 5.0) };
			let mut ctrl = TemperatureController::new(ls, opts).unwrap();
			assert_eq!(ctrl.temperature(), 4.2);
			assert!(ctrl.shutdown().is_ok());
		}
		assert!(script.written().is_empty(), "{:?}", script.written());
		assert!(script.log.iter().any(|c| c == "KRDG? A"));
	}

	#[test]
	fn heater_output_is_checked() {
		let script = ScriptedSession::new().always("*IDN?", "LSCI,MODEL335,LSA1234,1.4");
		assert!(matches!(LakeShore335::new(script, InputChannel::A, 3), Err(Error::InvalidParameter(_))));
	}
}
