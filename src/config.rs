//! Run configuration, read from JSON.
//!
//! Every field has a default so a config file only has to name what differs
//! from the usual setup. Delays are given in seconds.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::analysis::DEFAULT_PEAK_THRESHOLD;
use crate::equipment::{AdapterKind, JunctionParams};
use crate::error::{Error, Result};
use crate::field::{self, DirectParams, GradualParams, DIRECT_COIL_CONSTANT, DIRECT_RAMP_RATE, GRADUAL_COIL_CONSTANT, MAX_MAGNET_FIELD};
use crate::measurement::{self, FieldScanMode, FieldScanParams, IvParams, ResistanceLogParams, RfSweep, RfSweepKind};
use crate::persist::OutputFormat;
use crate::temperature::{ControlTables, OperatingMode, StabilityParams, TemperatureOptions, MAX_TEMP};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiasConfig {
	pub max_amplitude: f64,
	pub step: f64,
	/// Ohm, only for voltage sources
	pub load_resistance: Option<f64>,
	pub gain: f64,
	pub step_delay: f64,
	pub channel: u8,
	pub resistance_fraction: f64,
	pub threshold: f64,
}

impl Default for BiasConfig {
	fn default() -> Self {
		Self{
			max_amplitude: 1.0e-6,
			step: 1.0e-8,
			load_resistance: None,
			gain: 1.0,
			step_delay: 0.1,
			channel: 1,
			resistance_fraction: 0.1,
			threshold: DEFAULT_PEAK_THRESHOLD,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStrategyKind {
	/// Current supply stepped in small increments
	Gradual,
	/// Magnet controller given absolute targets
	Direct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
	/// Fields run from `-range` to `range`, G
	pub range: f64,
	pub step: f64,
	pub strategy: FieldStrategyKind,
	/// G/A
	pub coil_constant: f64,
	pub ramp_steps: usize,
	pub ramp_delay: f64,
	/// A/s
	pub ramp_rate: f64,
	pub margin: f64,
	pub switch_delay: f64,
	pub max_field: f64,
}

impl Default for FieldConfig {
	fn default() -> Self {
		Self{
			range: 100.0,
			step: 10.0,
			strategy: FieldStrategyKind::Gradual,
			coil_constant: GRADUAL_COIL_CONSTANT,
			ramp_steps: 15,
			ramp_delay: 0.5,
			ramp_rate: DIRECT_RAMP_RATE,
			margin: 5.0,
			switch_delay: 40.0,
			max_field: MAX_MAGNET_FIELD,
		}
	}
}

impl FieldConfig {

	pub fn fields(&self) -> Result<Vec<f64>> { field::field_range(self.range, self.step) }

	pub fn gradual_params(&self) -> GradualParams {
		GradualParams{
			coil_constant: self.coil_constant,
			ramp_steps: self.ramp_steps,
			ramp_delay: secs(self.ramp_delay),
			max_field: self.max_field,
		}
	}

	pub fn direct_params(&self) -> DirectParams {
		DirectParams{
			ramp_rate: self.ramp_rate,
			margin: secs(self.margin),
			switch_delay: secs(self.switch_delay),
			max_field: self.max_field,
		}
	}

	/// Coil constant for the selected strategy; the magnet controller's own
	/// unless one was given explicitly.
	pub fn effective_coil_constant(&self) -> f64 {
		match self.strategy {
			FieldStrategyKind::Direct if self.coil_constant == GRADUAL_COIL_CONSTANT => DIRECT_COIL_CONSTANT,
			_ => self.coil_constant,
		}
	}

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerModel {
	Ls370,
	Ls335,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureConfig {
	pub mode: OperatingMode,
	pub controller: ControllerModel,
	/// Bridge channel (370) or input A = 1, B = 2 (335)
	pub channel: u8,
	/// Heater output of a 335
	pub heater: u8,
	pub start: Option<f64>,
	pub stop: f64,
	pub step: f64,
	pub tolerance: f64,
	pub confirmations: usize,
	pub settle_delay: f64,
	pub approach_delay: f64,
	pub max_attempts: usize,
	pub max_approach_polls: usize,
	pub query_floor: f64,
	pub max_temperature: f64,
	/// Thermometer logger period
	pub log_interval: f64,
	pub tables: Option<ControlTables>,
}

impl Default for TemperatureConfig {
	fn default() -> Self {
		let stability = StabilityParams::default();
		Self{
			mode: OperatingMode::Active,
			controller: ControllerModel::Ls370,
			channel: 6,
			heater: 1,
			start: None,
			stop: MAX_TEMP,
			step: 0.1,
			tolerance: stability.tolerance,
			confirmations: stability.confirmations,
			settle_delay: 3.0,
			approach_delay: 1.0,
			max_attempts: stability.max_attempts,
			max_approach_polls: stability.max_approach_polls,
			query_floor: 1.0,
			max_temperature: MAX_TEMP,
			log_interval: 1.0,
			tables: None,
		}
	}
}

impl TemperatureConfig {

	pub fn stability(&self) -> StabilityParams {
		StabilityParams{
			tolerance: self.tolerance,
			confirmations: self.confirmations,
			settle_delay: secs(self.settle_delay),
			approach_delay: secs(self.approach_delay),
			max_attempts: self.max_attempts,
			max_approach_polls: self.max_approach_polls,
		}
	}

	pub fn log_period(&self) -> Duration { secs(self.log_interval) }

	pub fn options(&self) -> TemperatureOptions {
		TemperatureOptions{
			mode: self.mode,
			start: self.start,
			stop: self.stop,
			step: self.step,
			max_temperature: self.max_temperature,
			tables: self.tables.clone(),
			stability: self.stability(),
			query_floor: secs(self.query_floor),
		}
	}

}

/// Network addresses of the instruments, per role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentsConfig {
	pub adapter: AdapterKind,
	pub source: Option<String>,
	pub voltmeter: Option<String>,
	pub magnet: Option<String>,
	pub thermometer: Option<String>,
	/// Second source driving the gate
	pub gate: Option<String>,
	/// Microwave generator of a Shapiro-step run
	pub generator: Option<String>,
	/// Minimum spacing between commands to one instrument
	pub tx_throttle: f64,
	/// Used with the simulated adapter
	pub junction: JunctionParams,
}

impl Default for InstrumentsConfig {
	fn default() -> Self {
		Self{
			adapter: AdapterKind::default(),
			source: None,
			voltmeter: None,
			magnet: None,
			thermometer: None,
			gate: None,
			generator: None,
			tx_throttle: 0.1,
			junction: JunctionParams::default(),
		}
	}
}

impl InstrumentsConfig {

	pub fn host<'a>(host:&'a Option<String>, role:&str) -> Result<&'a str> {
		host.as_deref().ok_or_else(|| Error::invalid(format!("no address configured for the {}", role)))
	}

	pub fn throttle(&self) -> Duration { secs(self.tx_throttle) }

}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
	pub directory: PathBuf,
	pub sample: String,
	pub formats: Vec<OutputFormat>,
	/// Also write the five voltage matrices of a field or temperature sweep
	pub matrices: bool,
}

impl Default for OutputConfig {
	fn default() -> Self {
		Self{
			directory: PathBuf::from("data"),
			sample: "sample".to_owned(),
			formats: vec![OutputFormat::Dat],
			matrices: true,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
	pub count: usize,
	pub threshold: f64,
	pub bins: usize,
}

impl Default for StatsConfig {
	fn default() -> Self {
		Self{ count: 100, threshold: 3.0, bins: 20 }
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
	/// Gate voltages run from `-amplitude` to `amplitude`, V
	pub amplitude: f64,
	pub points: usize,
	/// Range string of the gate source
	pub range: String,
}

impl Default for GateConfig {
	fn default() -> Self {
		Self{ amplitude: 10.0, points: 11, range: "1E+1".to_owned() }
	}
}

impl GateConfig {
	pub fn voltages(&self) -> Vec<f64> { measurement::gate_voltages(self.amplitude, self.points) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapiroConfig {
	pub kind: RfSweepKind,
	/// `[start, stop)` in dBm or GHz
	pub start: f64,
	pub stop: f64,
	pub step: f64,
	/// GHz when sweeping power, dBm when sweeping frequency
	pub fixed: f64,
}

impl Default for ShapiroConfig {
	fn default() -> Self {
		Self{ kind: RfSweepKind::Power, start: -18.0, stop: 5.0, step: 0.5, fixed: 2.5 }
	}
}

impl ShapiroConfig {
	pub fn plan(&self) -> Result<RfSweep> { RfSweep::new(self.kind, self.start, self.stop, self.step, self.fixed) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResistanceLogConfig {
	/// Seconds between curves
	pub interval: f64,
	pub max_temperature: f64,
	pub max_curves: Option<usize>,
}

impl Default for ResistanceLogConfig {
	fn default() -> Self {
		let p = ResistanceLogParams::default();
		Self{ interval: p.interval.as_secs_f64(), max_temperature: p.max_temperature, max_curves: p.max_curves }
	}
}

impl ResistanceLogConfig {
	pub fn params(&self) -> ResistanceLogParams {
		ResistanceLogParams{ interval: secs(self.interval), max_temperature: self.max_temperature, max_curves: self.max_curves }
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldScanConfig {
	/// G
	pub from: f64,
	/// G, exclusive
	pub to: f64,
	pub step: f64,
	/// First bias current, A
	pub bias_start: f64,
	/// Last bias current, A
	pub bias_end: f64,
	pub bias_points: usize,
	pub mode: FieldScanMode,
}

impl Default for FieldScanConfig {
	fn default() -> Self {
		Self{
			from: -200.0,
			to: 200.0,
			step: 50.0,
			bias_start: 2.25e-6,
			bias_end: 2.69e-6,
			bias_points: 30,
			mode: FieldScanMode::UpDown,
		}
	}
}

impl FieldScanConfig {
	pub fn params(&self) -> FieldScanParams {
		FieldScanParams{
			from: self.from,
			to: self.to,
			step: self.step,
			currents: measurement::bias_currents(self.bias_start, self.bias_end, self.bias_points),
			mode: self.mode,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
	pub bias: BiasConfig,
	pub field: FieldConfig,
	pub temperature: TemperatureConfig,
	pub instruments: InstrumentsConfig,
	pub output: OutputConfig,
	pub stats: StatsConfig,
	pub gate: GateConfig,
	pub shapiro: ShapiroConfig,
	pub resistance_log: ResistanceLogConfig,
	pub field_scan: FieldScanConfig,
}

impl RunConfig {

	pub fn from_json_str(s:&str) -> Result<Self> {
		let cfg:Self = serde_json::from_str(s)?;
		cfg.validate()?;
		Ok(cfg)
	}

	pub fn from_file(path:&Path) -> Result<Self> {
		let text = fs::read_to_string(path)?;
		Self::from_json_str(&text)
	}

	pub fn validate(&self) -> Result<()> {
		let b = &self.bias;
		if !(b.max_amplitude >= 0.0) {
			return Err(Error::invalid(format!("bias amplitude must not be negative, got {}", b.max_amplitude)));
		}
		positive("bias step", b.step)?;
		self.iv_params().validate()?;

		let f = &self.field;
		positive("field step", f.step)?;
		positive("coil constant", f.coil_constant)?;
		positive("magnet ramp rate", f.ramp_rate)?;
		if !(f.range.abs() <= f.max_field) {
			return Err(Error::FieldLimit{ field: f.range, limit: f.max_field });
		}

		let t = &self.temperature;
		positive("temperature step", t.step)?;
		positive("temperature tolerance", t.tolerance)?;
		if let Some(tables) = &t.tables {
			tables.validate()?;
		}

		let g = &self.gate;
		if !(g.amplitude.is_finite()) || g.points == 0 {
			return Err(Error::invalid(format!("gate sweep of {} points up to {} V is not sweepable", g.points, g.amplitude)));
		}
		self.shapiro.plan()?;
		if !(self.resistance_log.max_temperature > 0.0) {
			return Err(Error::invalid(format!("R(T) temperature limit must be positive, got {}", self.resistance_log.max_temperature)));
		}
		let scan = &self.field_scan;
		scan.params().validate()?;
		for field in [scan.from, scan.to].iter() {
			if !(field.abs() <= f.max_field) {
				return Err(Error::FieldLimit{ field: *field, limit: f.max_field });
			}
		}

		for (what, d) in [("step delay", b.step_delay), ("ramp delay", f.ramp_delay), ("settle delay", t.settle_delay),
			("approach delay", t.approach_delay), ("query floor", t.query_floor), ("thermometer log interval", t.log_interval),
			("transmit throttle", self.instruments.tx_throttle), ("switch delay", f.switch_delay), ("ramp margin", f.margin),
			("R(T) interval", self.resistance_log.interval)].iter() {
			if !(d.is_finite() && *d >= 0.0 && *d <= MAX_DELAY) {
				return Err(Error::invalid(format!("{} must be between 0 and {} s, got {}", what, MAX_DELAY, d)));
			}
		}
		Ok(())
	}

	pub fn iv_params(&self) -> IvParams {
		let b = &self.bias;
		IvParams{
			max_amplitude: b.max_amplitude,
			step: b.step,
			load_resistance: b.load_resistance,
			gain: b.gain,
			step_delay: secs(b.step_delay),
			channel: b.channel,
			resistance_fraction: b.resistance_fraction,
			threshold: b.threshold,
		}
	}

	pub fn to_json(&self) -> Result<String> { Ok(serde_json::to_string_pretty(self)?) }

}

fn positive(what:&str, v:f64) -> Result<()> {
	if v > 0.0 { Ok(()) } else { Err(Error::invalid(format!("{} must be positive, got {}", what, v))) }
}

/// Longest delay a config may ask for, s
pub const MAX_DELAY:f64 = 86_400.0;

fn secs(s:f64) -> Duration {
	if s.is_finite() && s > 0.0 { Duration::from_secs_f64(s.min(MAX_DELAY)) } else { Duration::ZERO }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_object_gives_defaults() {
		let cfg = RunConfig::from_json_str("{}").unwrap();
		assert_eq!(cfg, RunConfig::default());
		assert_eq!(cfg.iv_params(), IvParams::default());
		assert_eq!(cfg.temperature.stability(), StabilityParams::default());
		assert_eq!(cfg.field.gradual_params(), GradualParams::default());
		assert_eq!(cfg.field.direct_params(), DirectParams::default());
	}

	#[test]
	fn partial_sections_keep_other_defaults() {
		let cfg = RunConfig::from_json_str(r#"{
			"bias": { "max_amplitude": 2e-6, "step_delay": 0 },
			"field": { "strategy": "direct" },
			"instruments": { "adapter": "null" },
			"output": { "formats": ["dat", "json"] }
		}"#).unwrap();
		assert_eq!(cfg.bias.max_amplitude, 2e-6);
		assert_eq!(cfg.iv_params().step_delay, Duration::ZERO);
		assert_eq!(cfg.bias.step, 1.0e-8);
		assert_eq!(cfg.field.effective_coil_constant(), DIRECT_COIL_CONSTANT);
		assert_eq!(cfg.instruments.adapter, AdapterKind::Null);
		assert_eq!(cfg.output.formats, vec![OutputFormat::Dat, OutputFormat::Json]);
	}

	#[test]
	fn huge_delays_are_clamped_rather_than_panicking() {
		let mut cfg = RunConfig::default();
		cfg.temperature.log_interval = 1.0e300;
		assert_eq!(cfg.temperature.log_period(), Duration::from_secs_f64(MAX_DELAY));
		cfg.temperature.log_interval = f64::NAN;
		assert_eq!(cfg.temperature.log_period(), Duration::ZERO);
	}

	#[test]
	fn field_beyond_the_magnet_is_rejected() {
		let res = RunConfig::from_json_str(r#"{ "field": { "range": 90000 } }"#);
		assert!(matches!(res, Err(Error::FieldLimit{ .. })));
	}

	#[test]
	fn bad_numbers_are_rejected() {
		for json in [r#"{ "bias": { "step": 0 } }"#, r#"{ "bias": { "max_amplitude": -1 } }"#,
			r#"{ "bias": { "gain": 0 } }"#, r#"{ "temperature": { "settle_delay": -3 } }"#,
			r#"{ "temperature": { "log_interval": 1e300 } }"#, r#"{ "temperature": { "log_interval": -1 } }"#].iter() {
			assert!(matches!(RunConfig::from_json_str(json), Err(Error::InvalidParameter(_))), "{}", json);
		}
	}

	#[test]
	fn extra_run_sections_convert_to_plans() {
		let cfg = RunConfig::from_json_str(r#"{
			"gate": { "amplitude": 2, "points": 5 },
			"shapiro": { "kind": "frequency", "start": 1, "stop": 2, "step": 0.25, "fixed": -10 },
			"resistance_log": { "interval": 0, "max_curves": 4 },
			"field_scan": { "from": -100, "to": 100, "bias_start": 1e-6, "bias_end": 2e-6, "bias_points": 3, "mode": "alternate_down_first" }
		}"#).unwrap();
		assert_eq!(cfg.gate.voltages(), vec![-2.0, -1.0, 0.0, 1.0, 2.0]);
		assert_eq!(cfg.gate.range, "1E+1");

		let plan = cfg.shapiro.plan().unwrap();
		assert_eq!(plan.kind, RfSweepKind::Frequency);
		assert_eq!(plan.values, vec![1.0, 1.25, 1.5, 1.75]);

		let log = cfg.resistance_log.params();
		assert_eq!(log.interval, Duration::ZERO);
		assert_eq!(log.max_curves, Some(4));
		assert_eq!(log.max_temperature, 20.0);

		let scan = cfg.field_scan.params();
		assert_eq!(scan.currents.len(), 3);
		assert!((scan.currents[1] - 1.5e-6).abs() < 1e-15);
		assert_eq!(scan.mode, FieldScanMode::AlternateDownFirst);
		assert_eq!(scan.step, 50.0);
	}

	#[test]
	fn bad_extra_sections_are_rejected() {
		for json in [r#"{ "gate": { "points": 0 } }"#, r#"{ "shapiro": { "step": 0 } }"#,
			r#"{ "shapiro": { "start": 5, "stop": 1 } }"#, r#"{ "field_scan": { "bias_points": 0 } }"#,
			r#"{ "field_scan": { "from": 100, "to": -100 } }"#, r#"{ "resistance_log": { "interval": -1 } }"#].iter() {
			assert!(matches!(RunConfig::from_json_str(json), Err(Error::InvalidParameter(_))), "{}", json);
		}
		let res = RunConfig::from_json_str(r#"{ "field_scan": { "to": 90000 } }"#);
		assert!(matches!(res, Err(Error::FieldLimit{ .. })));
	}

	#[test]
	fn config_survives_a_file_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("run.json");
		let mut cfg = RunConfig::default();
		cfg.temperature.tables = Some(ControlTables::lakeshore335());
		fs::write(&path, cfg.to_json().unwrap()).unwrap();
		assert_eq!(RunConfig::from_file(&path).unwrap(), cfg);
	}
}
