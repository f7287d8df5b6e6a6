use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DeviceCommunicationError, Error, Result};
use crate::scpi::parse_f64;

/// A step function of temperature.
///
/// `bands` are `(edge, value)` pairs with ascending edges; the first band
/// whose edge is not exceeded wins and anything hotter than the last edge
/// gets `fallback`. With `inclusive` a temperature equal to an edge belongs to
/// that band, otherwise to the next one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandTable<T> {
	bands: Vec<(f64, T)>,
	fallback: T,
	#[serde(default = "inclusive_default")]
	inclusive: bool,
}

fn inclusive_default() -> bool { true }

impl<T> BandTable<T> {

	/// Bands hold temperatures `<= edge`.
	pub fn at_most(bands:Vec<(f64, T)>, fallback:T) -> Result<Self> {
		Self::build(bands, fallback, true)
	}

	/// Bands hold temperatures `< edge`.
	pub fn below(bands:Vec<(f64, T)>, fallback:T) -> Result<Self> {
		Self::build(bands, fallback, false)
	}

	pub fn constant(value:T) -> Self {
		Self{ bands: Vec::new(), fallback: value, inclusive: true }
	}

	fn build(bands:Vec<(f64, T)>, fallback:T, inclusive:bool) -> Result<Self> {
		let table = Self{ bands, fallback, inclusive };
		table.validate()?;
		Ok(table)
	}

	/// Edges must be finite and strictly ascending.
	pub fn validate(&self) -> Result<()> {
		if self.bands.iter().any(|(e, _)| !e.is_finite()) {
			return Err(Error::invalid("band edges must be finite"));
		}
		if self.bands.windows(2).any(|w| w[1].0 <= w[0].0) {
			return Err(Error::invalid("band edges must be strictly ascending"));
		}
		Ok(())
	}

	pub fn lookup(&self, t:f64) -> &T {
		self.bands.iter()
			.find(|(edge, _)| if self.inclusive { t <= *edge } else { t < *edge })
			.map(|(_, v)| v)
			.unwrap_or(&self.fallback)
	}

	pub fn edges(&self) -> impl Iterator<Item = f64> + '_ { self.bands.iter().map(|(e, _)| *e) }

}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pid {
	pub p: f64,
	pub i: f64,
	pub d: f64,
}

impl Pid {

	pub fn new(p:f64, i:f64, d:f64) -> Self { Self{ p, i, d } }

	/// Parses a `PID?` reply such as `+0010.0,+0020.0,+0020`.
	pub fn parse(reply:&str) -> std::result::Result<Self, DeviceCommunicationError> {
		let parts:Vec<&str> = reply.trim().split(',').collect();
		if parts.len() != 3 {
			return Err(DeviceCommunicationError::response(format!("expected three PID terms in {:?}", reply)));
		}
		Ok(Self{ p: parse_f64(parts[0])?, i: parse_f64(parts[1])?, d: parse_f64(parts[2])? })
	}

}

impl fmt::Display for Pid {
	fn fmt(&self, f:&mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{},{},{}", self.p, self.i, self.d)
	}
}

/// PID for a band: fixed terms, or whatever the controller had before we
/// touched it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PidSetting {
	Saved,
	Fixed(Pid),
}

impl PidSetting {
	pub fn resolve(&self, saved:Pid) -> Pid {
		match self {
			PidSetting::Saved => saved,
			PidSetting::Fixed(pid) => *pid,
		}
	}
}

/// The parameters a controller gets for one setpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControlSettings {
	pub excitation: u8,
	pub heater_range: u8,
	pub pid: Pid,
}

/// The three independent temperature → parameter lookups, in kelvin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlTables {
	pub excitation: BandTable<u8>,
	pub heater_range: BandTable<u8>,
	pub pid: BandTable<PidSetting>,
}

impl ControlTables {

	/// Resistance bridge tables; excitation edges were found by experiment.
	pub fn lakeshore370() -> Self {
		Self{
			excitation: BandTable{
				bands: vec![(0.100, 2), (0.350, 3), (0.400, 5), (0.600, 6), (1.500, 7), (1.800, 8), (6.000, 10)],
				fallback: 12,
				inclusive: true,
			},
			heater_range: BandTable{ bands: vec![(5.0, 7)], fallback: 8, inclusive: false },
			pid: BandTable{
				bands: vec![(1.5, PidSetting::Saved)],
				fallback: PidSetting::Fixed(Pid::new(10.0, 20.0, 20.0)),
				inclusive: true,
			},
		}
	}

	pub fn lakeshore335() -> Self {
		Self{
			excitation: BandTable::constant(1),
			heater_range: BandTable::constant(1),
			pid: BandTable::constant(PidSetting::Fixed(Pid::new(5.0, 2.0, 0.0))),
		}
	}

	pub fn validate(&self) -> Result<()> {
		self.excitation.validate()?;
		self.heater_range.validate()?;
		self.pid.validate()
	}

	pub fn settings_for(&self, t:f64, saved_pid:Pid) -> ControlSettings {
		ControlSettings{
			excitation: *self.excitation.lookup(t),
			heater_range: *self.heater_range.lookup(t),
			pid: self.pid.lookup(t).resolve(saved_pid),
		}
	}

}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn excitation_changes_exactly_at_edges() {
		let t = ControlTables::lakeshore370();
		let expected:[(f64, u8, u8); 7] = [(0.100, 2, 3), (0.350, 3, 5), (0.400, 5, 6), (0.600, 6, 7), (1.500, 7, 8), (1.800, 8, 10), (6.000, 10, 12)];
		for (edge, below, above) in expected.iter() {
			assert_eq!(*t.excitation.lookup(edge - 0.001), *below, "below {}", edge);
			assert_eq!(*t.excitation.lookup(*edge), *below, "at {}", edge);
			assert_eq!(*t.excitation.lookup(edge + 0.001), *above, "above {}", edge);
		}
		assert_eq!(*t.excitation.lookup(0.099), 2);
		assert_eq!(*t.excitation.lookup(0.101), 3);
	}

	#[test]
	fn heater_range_edge_is_exclusive() {
		let t = ControlTables::lakeshore370();
		assert_eq!(*t.heater_range.lookup(4.99), 7);
		assert_eq!(*t.heater_range.lookup(5.0), 8);
	}

	#[test]
	fn pid_falls_back_to_saved_when_cold() {
		let t = ControlTables::lakeshore370();
		let saved = Pid::new(1.0, 2.0, 3.0);
		assert_eq!(t.settings_for(0.02, saved).pid, saved);
		assert_eq!(t.settings_for(1.5, saved).pid, saved);
		assert_eq!(t.settings_for(1.6, saved).pid, Pid::new(10.0, 20.0, 20.0));
	}

	#[test]
	fn constant_tables_ignore_temperature() {
		let t = ControlTables::lakeshore335();
		let s = t.settings_for(300.0, Pid::new(0.0, 0.0, 0.0));
		assert_eq!((s.excitation, s.heater_range), (1, 1));
		assert_eq!(s.pid.to_string(), "5,2,0");
	}

	#[test]
	fn unsorted_edges_are_rejected() {
		assert!(BandTable::at_most(vec![(1.0, 1u8), (0.5, 2)], 3).is_err());
		assert!(BandTable::below(vec![(0.5, 1u8), (1.0, 2)], 3).is_ok());
	}

	#[test]
	fn parses_pid_replies() {
		assert_eq!(Pid::parse("+0010.0,+0020.0,+0020\r\n").unwrap(), Pid::new(10.0, 20.0, 20.0));
		assert!(Pid::parse("10,20").is_err());
	}

	#[test]
	fn tables_round_trip_through_json() {
		let t = ControlTables::lakeshore370();
		let json = serde_json::to_string(&t).unwrap();
		let back:ControlTables = serde_json::from_str(&json).unwrap();
		assert_eq!(back, t);
	}
}
