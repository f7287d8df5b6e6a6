
// Instrument drivers, organised by manufacturer. Every driver is generic over the session it talks through so the
// same code runs against a VXI-11 link or a scripted stand-in, and each one is only ever used by the rest of the crate
// through the capability traits (BiasSource, Sense, SignalGenerator, MagnetController, TemperatureDevice)

use std::time::Duration;

use log::info;

use crate::error::DeviceCommunicationError;
use crate::scpi::{Identity, ScpiSession, Throttled};
use crate::vxi11::CoreClient;

pub mod ami430;
pub mod keithley;
pub mod keysight;
pub mod lakeshore;
pub mod yokogawa;

pub use ami430::{Ami430, FieldUnits};
pub use keithley::{Keithley2182A, Keithley6200, SourceMode};
pub use keysight::{KeysightE3633A, KeysightN51};
pub use lakeshore::{InputChannel, LakeShore335, LakeShore370};
pub use yokogawa::{SourceFunction, YokogawaGs200};

/// Opens a throttled VXI-11 session to `host`.
pub fn open(host:&str, tx_throttle:Duration) -> Result<Throttled<CoreClient>, DeviceCommunicationError> {
	let core = CoreClient::connect(host)?;
	Ok(Throttled::new(core, tx_throttle))
}

// Every driver checks it is talking to the model it was written for before sending anything else
fn identify<S: ScpiSession>(session:&mut S, expected:&'static str) -> Result<Identity, DeviceCommunicationError> {
	let idn = Identity::query(session)?;
	idn.expect_model(expected)?;
	info!("Connected to {} {} (s/n {})", idn.manufacturer, idn.model, idn.serial_num);
	Ok(idn)
}
