use log::{error, info};

use crate::equipment::{BiasSource, SignalGenerator};
use crate::error::{DeviceCommunicationError, Result};
use crate::scpi::{Identity, ScpiSession};
use super::identify;

/// Over-current protection level, A
pub const PROTECTION_LEVEL:f64 = 4.0;

/// Keysight E3633A supply driving a field coil. Outputs are amperes.
///
/// There is no ramp logic here; [`crate::field::GradualStrategy`] does that.
pub struct KeysightE3633A<S: ScpiSession> {
	session: S,
	pub idn: Identity,
}

impl<S: ScpiSession> KeysightE3633A<S> {

	pub fn new(mut session:S) -> Result<Self> {
		let idn = identify(&mut session, "E3633A")?;
		session.write("INITiate:IMMediate")?;
		session.write(&format!("CURRent:PROTection:LEVel {}", PROTECTION_LEVEL))?;
		session.write("CURRent:PROTection:STATe ON")?;
		session.write("OUTPut ON")?;
		Ok(Self{ session, idn })
	}

}

impl<S: ScpiSession> BiasSource for KeysightE3633A<S> {

	fn set_output(&mut self, value:f64) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!(":SOURce:CURRent:LEVel {}", value))
	}

	fn get_output(&mut self) -> std::result::Result<f64, DeviceCommunicationError> {
		self.session.query_f64("SOURce:CURRent:LEVel?")
	}

}

/// Keysight N51xx analog signal generator (MXG/EXG) feeding the microwave line.
/// The RF output is switched off when the driver is dropped.
pub struct KeysightN51<S: ScpiSession> {
	session: S,
	pub idn: Identity,
}

impl<S: ScpiSession> KeysightN51<S> {

	pub fn new(mut session:S) -> Result<Self> {
		let idn = identify(&mut session, "N51")?;
		Ok(Self{ session, idn })
	}

}

impl<S: ScpiSession> SignalGenerator for KeysightN51<S> {

	fn set_frequency(&mut self, ghz:f64) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!(":SOURce:FREQuency:FIXed {}GHz", ghz))
	}

	fn set_power(&mut self, dbm:f64) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!(":SOURce:POWer:LEVel:IMMediate:AMPLitude {}dBm", dbm))
	}

	fn set_rf_output(&mut self, on:bool) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(if on { ":OUTPut:STATe ON" } else { ":OUTPut:STATe OFF" })
	}

}

impl<S: ScpiSession> Drop for KeysightN51<S> {
	fn drop(&mut self) {
		match self.set_rf_output(false) {
			Ok(()) => info!("Keysight generator output off"),
			Err(e) => error!("Keysight generator could not switch its output off: {}", e),
		}
	}
}
