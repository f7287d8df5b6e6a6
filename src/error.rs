use std::io;

use thiserror::Error;

/// Failure talking to a physical instrument.
///
/// Adapters surface every transport or protocol problem through this type; the
/// sweep loops propagate it untouched so the top-level cleanup path can run.
#[derive(Debug, Error)]
pub enum DeviceCommunicationError {
	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	#[error("RPC call rejected: {0}")]
	Rpc(&'static str),

	#[error("VXI-11 {operation} failed: {reason} (code {code})")]
	Vxi11 { operation: &'static str, code: i32, reason: &'static str },

	#[error("no VXI-11 link is open")]
	NotLinked,

	#[error("unexpected instrument response: {0}")]
	UnexpectedResponse(String),

	#[error("connected to {idn:?} but expected a {expected}")]
	WrongInstrument { expected: &'static str, idn: String },
}

impl DeviceCommunicationError {
	pub(crate) fn response(msg: impl Into<String>) -> Self {
		DeviceCommunicationError::UnexpectedResponse(msg.into())
	}
}

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Device(#[from] DeviceCommunicationError),

	#[error("invalid parameter: {0}")]
	InvalidParameter(String),

	#[error("measurement cancelled")]
	Cancelled,

	#[error("field {field} G exceeds the magnet limit of {limit} G")]
	FieldLimit { field: f64, limit: f64 },

	#[error("setpoint {setpoint} K exceeds the allowed maximum of {limit} K")]
	TemperatureLimit { setpoint: f64, limit: f64 },

	#[error("magnet quench detected")]
	Quench,

	#[error("temperature sweeps are only allowed in active mode")]
	PassiveMode,

	#[error("I/O error: {0}")]
	Io(#[from] io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("CBOR error: {0}")]
	Cbor(#[from] serde_cbor::Error),
}

impl Error {
	pub(crate) fn invalid(msg: impl Into<String>) -> Self {
		Error::InvalidParameter(msg.into())
	}
}

pub type Result<T> = std::result::Result<T, Error>;
