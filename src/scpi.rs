//! Text command sessions with SCPI instruments.
//!
//! Drivers in [`crate::devices`] only need to write a command or ask a query,
//! so they are generic over [`ScpiSession`]. The VXI-11 [`CoreClient`] is the
//! real implementation; [`ScriptedSession`] stands in for an instrument in
//! tests and dry runs.

use std::collections::VecDeque;
use std::str;
use std::thread;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::DeviceCommunicationError;
use crate::vxi11::CoreClient;

lazy_static! {
	static ref IDN_RE: Regex   = Regex::new("([^,]+),([^,]+),([^,]+),([^,\\s]+)").unwrap();
	static ref FLOAT_RE: Regex = Regex::new("[-+]?(?:\\d+\\.?\\d*|\\.\\d+)(?:[eE][-+]?\\d+)?").unwrap();
}

pub const DEFAULT_TX_THROTTLE_DURATION_SEC:f32 = 0.1;

pub trait ScpiSession: Send {
	fn write(&mut self, cmd:&str) -> Result<(), DeviceCommunicationError>;

	fn query(&mut self, cmd:&str) -> Result<String, DeviceCommunicationError>;

	/// Asks `cmd` and parses the first number in the reply.
	fn query_f64(&mut self, cmd:&str) -> Result<f64, DeviceCommunicationError> {
		let res = self.query(cmd)?;
		parse_f64(&res)
	}
}

pub fn parse_f64(res:&str) -> Result<f64, DeviceCommunicationError> {
	FLOAT_RE.find(res)
		.and_then(|m| m.as_str().parse::<f64>().ok())
		.ok_or_else(|| DeviceCommunicationError::response(format!("no number in {:?}", res.trim())))
}

impl ScpiSession for CoreClient {

	fn write(&mut self, cmd:&str) -> Result<(), DeviceCommunicationError> {
		CoreClient::write(self, cmd.as_bytes())
	}

	fn query(&mut self, cmd:&str) -> Result<String, DeviceCommunicationError> {
		let bytes = self.ask(cmd.as_bytes())?;
		str::from_utf8(&bytes)
			.map(|s| s.trim_end().to_owned())
			.map_err(|_| DeviceCommunicationError::response("reply is not valid UTF-8"))
	}

}

impl<T: ScpiSession + ?Sized> ScpiSession for Box<T> {
	fn write(&mut self, cmd:&str) -> Result<(), DeviceCommunicationError> { (**self).write(cmd) }
	fn query(&mut self, cmd:&str) -> Result<String, DeviceCommunicationError> { (**self).query(cmd) }
}

impl<T: ScpiSession + ?Sized> ScpiSession for &mut T {
	fn write(&mut self, cmd:&str) -> Result<(), DeviceCommunicationError> { (**self).write(cmd) }
	fn query(&mut self, cmd:&str) -> Result<String, DeviceCommunicationError> { (**self).query(cmd) }
}

/// Enforces a minimum spacing between consecutive commands.
///
/// Several of the older instruments drop commands that arrive faster than
/// their parser can handle them.
pub struct Throttled<S> {
	inner: S,
	interval: Duration,
	last_tx: Option<Instant>,
}

impl<S: ScpiSession> Throttled<S> {

	pub fn new(inner:S, interval:Duration) -> Self {
		Self{ inner, interval, last_tx: None }
	}

	pub fn with_default_interval(inner:S) -> Self {
		Self::new(inner, Duration::from_secs_f32(DEFAULT_TX_THROTTLE_DURATION_SEC))
	}

	pub fn into_inner(self) -> S { self.inner }

	fn wait_turn(&mut self) {
		if let Some(last) = self.last_tx {
			let elapsed = last.elapsed();
			if elapsed < self.interval {
				thread::sleep(self.interval - elapsed);
			}
		}
		self.last_tx = Some(Instant::now());
	}

}

impl<S: ScpiSession> ScpiSession for Throttled<S> {

	fn write(&mut self, cmd:&str) -> Result<(), DeviceCommunicationError> {
		self.wait_turn();
		self.inner.write(cmd)
	}

	fn query(&mut self, cmd:&str) -> Result<String, DeviceCommunicationError> {
		self.wait_turn();
		self.inner.query(cmd)
	}

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
	pub manufacturer: String,
	pub model: String,
	pub serial_num: String,
	pub fw_version: String,
}

impl Identity {

	pub fn parse(idn:&str) -> Result<Self, DeviceCommunicationError> {
		let caps = IDN_RE.captures(idn)
			.ok_or_else(|| DeviceCommunicationError::response(format!("malformed *IDN? reply {:?}", idn)))?;
		let field = |i:usize| caps.get(i).map(|m| m.as_str().trim().to_owned()).unwrap_or_default();
		Ok(Self{ manufacturer: field(1), model: field(2), serial_num: field(3), fw_version: field(4) })
	}

	pub fn query<S: ScpiSession + ?Sized>(session:&mut S) -> Result<Self, DeviceCommunicationError> {
		let idn = session.query("*IDN?")?;
		Self::parse(&idn)
	}

	/// Fails unless the model string contains `expected`.
	pub fn expect_model(&self, expected:&'static str) -> Result<(), DeviceCommunicationError> {
		if self.model.contains(expected) { Ok(()) }
		else {
			Err(DeviceCommunicationError::WrongInstrument{
				expected,
				idn: format!("{},{},{},{}", self.manufacturer, self.model, self.serial_num, self.fw_version),
			})
		}
	}

}

/// An in-memory instrument: logs every command and answers queries from a script.
///
/// Queries with no scripted reply left fail with an unexpected-response error,
/// which is how tests provoke communication failures.
#[derive(Debug, Default)]
pub struct ScriptedSession {
	pub log: Vec<String>,
	replies: VecDeque<(String, String)>,
	fallback: Vec<(String, String)>,
}

impl ScriptedSession {

	pub fn new() -> Self { Self::default() }

	/// Queues a one-shot reply for the next query starting with `prefix`.
	pub fn reply(mut self, prefix:&str, answer:&str) -> Self {
		self.replies.push_back((prefix.to_owned(), answer.to_owned()));
		self
	}

	/// Answers every query starting with `prefix` once one-shot replies are used up.
	pub fn always(mut self, prefix:&str, answer:&str) -> Self {
		self.fallback.push((prefix.to_owned(), answer.to_owned()));
		self
	}

	pub fn written(&self) -> Vec<&str> {
		self.log.iter().filter(|c| !c.ends_with('?') && !c.contains("? ")).map(|c| c.as_str()).collect()
	}

}

impl ScpiSession for ScriptedSession {

	fn write(&mut self, cmd:&str) -> Result<(), DeviceCommunicationError> {
		self.log.push(cmd.to_owned());
		Ok(())
	}

	fn query(&mut self, cmd:&str) -> Result<String, DeviceCommunicationError> {
		self.log.push(cmd.to_owned());
		if let Some(pos) = self.replies.iter().position(|(p, _)| cmd.starts_with(p.as_str())) {
			if let Some((_, answer)) = self.replies.remove(pos) {
				return Ok(answer);
			}
		}
		self.fallback.iter()
			.find(|(p, _)| cmd.starts_with(p.as_str()))
			.map(|(_, a)| a.clone())
			.ok_or_else(|| DeviceCommunicationError::response(format!("no scripted reply for {:?}", cmd)))
	}

}
