use log::{info, warn};

use crate::error::{DeviceCommunicationError, Result};
use crate::field::{MagnetController, DIRECT_COIL_CONSTANT};
use crate::scpi::{Identity, ScpiSession};
use super::identify;

/// Persistent switch heater current, mA
pub const PSWITCH_HEATER_CURRENT:u32 = 20;

// Values reported by STATE?
const STATE_QUENCH:i32 = 7;

/// Field units configured on the front panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldUnits {
	KiloGauss,
	Tesla,
}

impl FieldUnits {
	/// Gauss in one unit.
	fn gauss(self) -> f64 {
		match self {
			FieldUnits::KiloGauss => 1.0e3,
			FieldUnits::Tesla => 1.0e4,
		}
	}
}

/// American Magnetics 430 superconducting magnet programmer.
pub struct Ami430<S: ScpiSession> {
	session: S,
	units: FieldUnits,
	/// G/A
	coil_constant: f64,
	pub idn: Identity,
}

impl<S: ScpiSession> Ami430<S> {

	pub fn new(mut session:S, units:FieldUnits) -> Result<Self> {
		let idn = identify(&mut session, "430")?;
		session.write("CONFigure:QUench:DETect 3")?;
		info!("AMI430 quench detection configured, coil constant {} G/A", DIRECT_COIL_CONSTANT);
		Ok(Self{ session, units, coil_constant: DIRECT_COIL_CONSTANT, idn })
	}

	pub fn with_coil_constant(mut self, gauss_per_amp:f64) -> Self {
		self.coil_constant = gauss_per_amp;
		self
	}

	pub fn state(&mut self) -> std::result::Result<i32, DeviceCommunicationError> {
		Ok(self.session.query_f64("STATE?")? as i32)
	}

}

impl<S: ScpiSession> MagnetController for Ami430<S> {

	fn coil_constant(&self) -> f64 { self.coil_constant }

	fn ramp_to_field(&mut self, field:f64) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write(&format!("CONFigure:FIELD:TARGet {}", field / self.units.gauss()))?;
		self.session.write("RAMP")
	}

	fn ramp_to_zero(&mut self) -> std::result::Result<(), DeviceCommunicationError> {
		self.session.write("ZERO")
	}

	fn actual_field(&mut self) -> std::result::Result<f64, DeviceCommunicationError> {
		Ok(self.session.query_f64("CURRent:MAGnet?")? * self.coil_constant)
	}

	fn set_persistent_switch(&mut self, heated:bool) -> std::result::Result<(), DeviceCommunicationError> {
		let (current, state) = if heated { (PSWITCH_HEATER_CURRENT, 1) } else { (0, 0) };
		self.session.write(&format!("CONFigure:PSwitch:CURRent {}", current))?;
		self.session.write(&format!("PSwitch {}", state))
	}

	fn quenched(&mut self) -> std::result::Result<bool, DeviceCommunicationError> {
		let quench = self.state()? == STATE_QUENCH;
		if quench {
			warn!("AMI430 reports a quench");
		}
		Ok(quench)
	}

}
