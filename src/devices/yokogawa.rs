use log::{error, info};

use crate::equipment::BiasSource;
use crate::error::{DeviceCommunicationError, Result};
use crate::scpi::{Identity, ScpiSession};
use super::identify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFunction {
	Voltage,
	Current,
}

impl SourceFunction {
	fn mnemonic(self) -> &'static str {
		match self {
			SourceFunction::Voltage => "VOLT",
			SourceFunction::Current => "CURR",
		}
	}
}

/// Yokogawa GS200 DC voltage/current source. The output is zeroed and
/// switched off when the driver is dropped.
pub struct YokogawaGs200<S: ScpiSession> {
	session: S,
	pub function: SourceFunction,
	pub idn: Identity,
}

impl<S: ScpiSession> YokogawaGs200<S> {

	/// `range` is passed through as the instrument expects it, e.g. `1E+0`.
	pub fn new(mut session:S, function:SourceFunction, range:&str) -> Result<Self> {
		let idn = identify(&mut session, "GS2")?;
		session.write("SYSTem:REMote")?;
		session.write(&format!("SOUR:FUNC {}", function.mnemonic()))?;
		session.write(&format!("SOUR:RANGe {}", range))?;
		session.write("OUTPut ON")?;
		Ok(Self{ session, function, idn })
	}

}

impl<S: ScpiSession> BiasSource for YokogawaGs200<S> {

	fn set_output(&mut self, value:f64) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!(":SOURce:LEVel {}", value))
	}

	fn get_output(&mut self) -> std::result::Result<f64, DeviceCommunicationError> {
		self.session.query_f64("SOURce:LEVel?")
	}

}

impl<S: ScpiSession> Drop for YokogawaGs200<S> {
	fn drop(&mut self) {
		let res = self.set_output(0.0).and_then(|_| self.session.write("OUTPut OFF"));
		match res {
			Ok(()) => info!("Yokogawa disconnecting, output was set to 0"),
			Err(e) => error!("Yokogawa could not switch its output off: {}", e),
		}
	}
}
