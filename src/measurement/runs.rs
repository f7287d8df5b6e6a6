use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::analysis::{estimate_resistance, CriticalCurrentStats};
use crate::equipment::{BiasSource, EquipmentAdapter, SignalGenerator};
use crate::error::{Error, Result};
use crate::field::{fields_ascending, fields_descending, FieldStrategy, FieldSweeper};
use crate::sweep::{arange, linspace};
use crate::temperature::{TemperatureController, TemperatureDevice};
use super::MeasurementContext;
use super::cleanup::{rf_off, zero_output, CleanupGuard};
use super::feed::{TAB_CRITICAL, TAB_FIELD_SCAN, TAB_RESISTANCE};
use super::iv::{IvCurve, IvParams, IvSweep};
use super::timing::TimeEstimator;

/// Everything extracted from the I-V curve at one swept condition.
#[derive(Debug, Clone)]
pub struct ConditionResult {
	/// Field in G, temperature in K, or the repetition number
	pub condition: f64,
	/// Last known sample temperature, K
	pub temperature: Option<f64>,
	pub curve: IvCurve,
	/// `(Ic-, Ic+)`, A
	pub critical: (f64, f64),
	/// `(Ir-, Ir+)`, A
	pub retrapping: (f64, f64),
	/// Ohm
	pub resistance: f64,
}

impl ConditionResult {

	pub fn evaluate(condition:f64, temperature:Option<f64>, curve:IvCurve, params:&IvParams) -> Self {
		Self::with_threshold(condition, temperature, curve, params, params.threshold)
	}

	fn with_threshold(condition:f64, temperature:Option<f64>, curve:IvCurve, params:&IvParams, threshold:f64) -> Self {
		let critical = curve.critical_currents(threshold);
		let retrapping = curve.retrapping_currents(threshold);
		let resistance = curve.resistance(params.resistance_fraction);
		Self{ condition, temperature, curve, critical, retrapping, resistance }
	}

	fn publish(&self, ctx:&MeasurementContext) {
		let x = self.condition;
		ctx.feed.append(TAB_RESISTANCE, 0, vec![(x, self.resistance)]);
		ctx.feed.append(TAB_CRITICAL, 0, vec![(x, self.critical.0)]);
		ctx.feed.append(TAB_CRITICAL, 1, vec![(x, self.critical.1)]);
		ctx.feed.redraw(TAB_RESISTANCE);
		ctx.feed.redraw(TAB_CRITICAL);
	}

}

/// One I-V curve per field of `sweeper`.
///
/// The bias output is zero whenever the field moves: it is zeroed before the
/// first field and every I-V curve ends at zero. Cancellation is checked
/// before the magnet is asked for the next field.
///
/// On success the field is finalized back to zero. On error or cancellation
/// the bias output is zeroed first and then the field is driven to zero
/// through [`FieldSweeper::error_cleanup`].
pub fn run_field_sweep<A, S>(iv:&IvSweep, adapter:&mut A, sweeper:&mut FieldSweeper<S>, ctx:&MeasurementContext) -> Result<Vec<ConditionResult>>
where A: EquipmentAdapter, S: FieldStrategy {
	let outcome = {
		let mut source = CleanupGuard::new("bias source", adapter, zero_output);
		let mut timer = TimeEstimator::new(sweeper.fields().len());
		let mut results = Vec::new();

		let res = (|| -> Result<()> {
			ctx.cancel.check()?;
			zero_output(&mut *source)?;
			loop {
				ctx.cancel.check()?;
				let field = match sweeper.step() {
					Some(field) => field?,
					None => break,
				};
				timer.begin_condition();
				info!("Measuring I-V at B = {} G", field);

				let curve = iv.run(&mut *source, ctx)?;
				let result = ConditionResult::evaluate(field, ctx.latest_temperature(), curve, iv.params());
				result.publish(ctx);
				results.push(result);
				timer.end_condition();
			}
			Ok(())
		})();
		res.and_then(|_| source.finish()).map(|_| results)
	};

	let outcome = outcome.and_then(|results| sweeper.finalize().map(|_| results));
	if let Err(e) = &outcome {
		warn!("Field sweep stopped: {}", e);
		if let Err(cleanup) = sweeper.error_cleanup() {
			error!("Field cleanup failed: {}", cleanup);
		}
	}
	outcome
}

/// One I-V curve per stabilised setpoint of `controller`.
///
/// Each condition is labelled with the last measured temperature rather than
/// the nominal setpoint. On error or cancellation the bias output is zeroed
/// and the heater is shut down.
pub fn run_temperature_sweep<A, D>(iv:&IvSweep, adapter:&mut A, controller:&mut TemperatureController<D>, ctx:&MeasurementContext) -> Result<Vec<ConditionResult>>
where A: EquipmentAdapter, D: TemperatureDevice {
	let outcome = {
		let mut source = CleanupGuard::new("bias source", adapter, zero_output);
		let mut results = Vec::new();

		let res = (|| -> Result<()> {
			let mut timer = TimeEstimator::new(controller.temperature_range()?.len());
			for report in controller.sweep(ctx.cancel.clone())? {
				let report = report?;
				timer.begin_condition();
				info!("Measuring I-V at T = {} K (setpoint {} K)", report.temperature, report.setpoint);

				let curve = iv.run(&mut *source, ctx)?;
				let result = ConditionResult::evaluate(report.temperature, Some(report.temperature), curve, iv.params());
				result.publish(ctx);
				results.push(result);
				timer.end_condition();
			}
			Ok(())
		})();
		res.and_then(|_| source.finish()).map(|_| results)
	};

	if let Err(e) = &outcome {
		warn!("Temperature sweep stopped: {}", e);
		if let Err(cleanup) = controller.shutdown() {
			error!("Temperature controller cleanup failed: {}", cleanup);
		}
	}
	outcome
}

#[derive(Debug, Clone)]
pub struct RepeatedRun {
	pub results: Vec<ConditionResult>,
	/// Ic+ of every repetition
	pub samples: Vec<f64>,
	pub stats: Option<CriticalCurrentStats>,
}

/// The same I-V curve `count` times, collecting Ic+ statistics.
///
/// `threshold` replaces the usual peak threshold: far from the transition
/// a larger one suppresses noise peaks.
pub fn run_repeated<A>(iv:&IvSweep, adapter:&mut A, count:usize, threshold:f64, bins:usize, ctx:&MeasurementContext) -> Result<RepeatedRun>
where A: EquipmentAdapter {
	let mut source = CleanupGuard::new("bias source", adapter, zero_output);
	let mut timer = TimeEstimator::new(count);
	let mut results = Vec::with_capacity(count);

	for n in 0..count {
		ctx.cancel.check()?;
		timer.begin_condition();
		info!("Critical current statistics, curve {} of {}", n + 1, count);
		ctx.feed.title(TAB_CRITICAL, format!("Critical current variability stats, curve {} of {}", n + 1, count));

		let curve = iv.run(&mut *source, ctx)?;
		let result = ConditionResult::with_threshold((n + 1) as f64, ctx.latest_temperature(), curve, iv.params(), threshold);
		info!("Ic- {}, Ic+ {}", result.critical.0, result.critical.1);
		results.push(result);
		timer.end_condition();
	}
	source.finish()?;

	let samples:Vec<f64> = results.iter().map(|r| r.critical.1).collect();
	let stats = CriticalCurrentStats::from_samples(&samples, bins);
	if let Some(s) = &stats {
		info!("Ic+ = {} +- {} A over {} curves", s.mean, s.std_dev, s.count);
	}
	Ok(RepeatedRun{ results, samples, stats })
}

/// `points` bias currents from `start` to `end` inclusive.
pub fn bias_currents(start:f64, end:f64, points:usize) -> Vec<f64> {
	linspace(start, end, points)
}

/// `points` gate voltages from `-amplitude` to `+amplitude` inclusive.
pub fn gate_voltages(amplitude:f64, points:usize) -> Vec<f64> {
	linspace(-amplitude.abs(), amplitude.abs(), points)
}

/// One I-V curve per output of a second source driving the gate.
///
/// The bias output is zeroed before the first gate voltage. On error or
/// cancellation the bias is zeroed first and the gate after it.
pub fn run_gate_sweep<A, G>(iv:&IvSweep, adapter:&mut A, gate:&mut G, voltages:&[f64], ctx:&MeasurementContext) -> Result<Vec<ConditionResult>>
where A: EquipmentAdapter, G: BiasSource {
	// Locals drop in reverse: the bias guard fires before the gate guard
	let mut gate = CleanupGuard::new("gate source", gate, zero_output);
	let mut source = CleanupGuard::new("bias source", adapter, zero_output);
	let mut timer = TimeEstimator::new(voltages.len());
	let mut results = Vec::with_capacity(voltages.len());

	ctx.cancel.check()?;
	zero_output(&mut *source)?;
	for &v in voltages.iter() {
		ctx.cancel.check()?;
		timer.begin_condition();
		gate.set_output(v)?;
		info!("Measuring I-V at V_gate = {} V", v);

		let curve = iv.run(&mut *source, ctx)?;
		let result = ConditionResult::evaluate(v, ctx.latest_temperature(), curve, iv.params());
		result.publish(ctx);
		results.push(result);
		timer.end_condition();
	}
	source.finish()?;
	gate.finish()?;
	Ok(results)
}

/// Which generator setting a Shapiro-step run sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RfSweepKind {
	/// Power in dBm at a fixed frequency
	Power,
	/// Frequency in GHz at a fixed power
	Frequency,
}

impl RfSweepKind {

	/// Axis caption of the swept setting.
	pub fn caption(self) -> &'static str {
		match self {
			RfSweepKind::Power => "Power, dBm",
			RfSweepKind::Frequency => "Freq, GHz",
		}
	}

	/// Name of the measurement in output folders.
	pub fn measurement(self) -> &'static str {
		match self {
			RfSweepKind::Power => "Shapiro_power",
			RfSweepKind::Frequency => "Shapiro_freq",
		}
	}

}

#[derive(Debug, Clone, PartialEq)]
pub struct RfSweep {
	pub kind: RfSweepKind,
	/// Swept values, `[start, stop)`
	pub values: Vec<f64>,
	/// Frequency (GHz) for a power sweep, power (dBm) for a frequency sweep
	pub fixed: f64,
}

impl RfSweep {

	pub fn new(kind:RfSweepKind, start:f64, stop:f64, step:f64, fixed:f64) -> Result<Self> {
		if !(step > 0.0) || !fixed.is_finite() {
			return Err(Error::invalid(format!("{} sweep needs a positive step and a finite fixed value, got step {} and {}", kind.caption(), step, fixed)));
		}
		let values = arange(start, stop, step);
		if values.is_empty() {
			return Err(Error::invalid(format!("{} sweep [{}, {}) is empty", kind.caption(), start, stop)));
		}
		Ok(Self{ kind, values, fixed })
	}

}

/// One I-V curve per generator setting of `sweep` with the RF output on.
///
/// On error or cancellation the bias is zeroed first, then the RF output is
/// switched off.
pub fn run_shapiro_sweep<A, G>(iv:&IvSweep, adapter:&mut A, generator:&mut G, sweep:&RfSweep, ctx:&MeasurementContext) -> Result<Vec<ConditionResult>>
where A: EquipmentAdapter, G: SignalGenerator {
	let mut rf = CleanupGuard::new("microwave generator", generator, rf_off);
	let mut source = CleanupGuard::new("bias source", adapter, zero_output);
	let mut timer = TimeEstimator::new(sweep.values.len());
	let mut results = Vec::with_capacity(sweep.values.len());

	ctx.cancel.check()?;
	zero_output(&mut *source)?;
	match sweep.kind {
		RfSweepKind::Power => rf.set_frequency(sweep.fixed)?,
		RfSweepKind::Frequency => rf.set_power(sweep.fixed)?,
	}
	rf.set_rf_output(true)?;

	for &value in sweep.values.iter() {
		ctx.cancel.check()?;
		timer.begin_condition();
		match sweep.kind {
			RfSweepKind::Power => rf.set_power(value)?,
			RfSweepKind::Frequency => rf.set_frequency(value)?,
		}
		info!("Measuring I-V at {} = {}", sweep.kind.caption(), value);

		let curve = iv.run(&mut *source, ctx)?;
		let result = ConditionResult::evaluate(value, ctx.latest_temperature(), curve, iv.params());
		result.publish(ctx);
		results.push(result);
		timer.end_condition();
	}
	source.finish()?;
	rf.finish()?;
	Ok(results)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResistanceLogParams {
	/// Wait between the end of one curve and the start of the next
	pub interval: Duration,
	/// The log ends once the sample reaches this temperature, K
	pub max_temperature: f64,
	pub max_curves: Option<usize>,
}

impl Default for ResistanceLogParams {
	fn default() -> Self {
		Self{ interval: Duration::from_secs(10), max_temperature: 20.0, max_curves: None }
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResistancePoint {
	/// Sample temperature read just before the curve, K
	pub temperature: f64,
	/// Fitted over the whole curve, Ohm
	pub resistance: f64,
	pub timestamp: DateTime<Local>,
}

/// Logs R(T) while the cryostat drifts on its own.
///
/// The controller is only read, so it is normally opened passive. Every
/// `interval` a full I-V curve is taken and a line is fitted through all of
/// it. The log is open-ended: it ends without error when the run is
/// cancelled, when the temperature reaches `max_temperature`, or after
/// `max_curves` curves. The bias is zero between curves.
pub fn run_resistance_log<A, D>(iv:&IvSweep, adapter:&mut A, controller:&TemperatureController<D>, params:&ResistanceLogParams, ctx:&MeasurementContext) -> Result<Vec<ResistancePoint>>
where A: EquipmentAdapter, D: TemperatureDevice {
	let mut source = CleanupGuard::new("bias source", adapter, zero_output);
	let mut points = Vec::new();

	loop {
		if ctx.cancel.is_cancelled() {
			info!("R(T) log stopped by the operator");
			break;
		}
		if params.max_curves.map_or(false, |n| points.len() >= n) {
			info!("R(T) log finished after {} curves", points.len());
			break;
		}
		let temperature = controller.temperature();
		if temperature >= params.max_temperature {
			info!("R(T) log finished, T = {} K reached the {} K limit", temperature, params.max_temperature);
			break;
		}

		let curve = match iv.run(&mut *source, ctx) {
			Ok(curve) => curve,
			Err(Error::Cancelled) => continue,
			Err(e) => return Err(e),
		};
		let resistance = estimate_resistance(&curve.currents(), &curve.voltages());
		info!("T = {} K, R = {} Ohm", temperature, resistance);
		ctx.feed.append(TAB_RESISTANCE, 0, vec![(temperature, resistance)]);
		ctx.feed.redraw(TAB_RESISTANCE);
		points.push(ResistancePoint{ temperature, resistance, timestamp: Local::now() });

		if params.max_curves.map_or(true, |n| points.len() < n) {
			ctx.cancel.wait(params.interval);
		}
	}
	source.finish()?;
	Ok(points)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldDirection {
	Up,
	Down,
}

/// Order of field passes in a V(B) scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldScanMode {
	Up,
	Down,
	/// Up then down at every bias
	UpDown,
	/// Down then up at every bias
	DownUp,
	/// One pass per bias, alternating, starting upward
	AlternateUpFirst,
	/// One pass per bias, alternating, starting downward
	AlternateDownFirst,
}

impl FieldScanMode {

	/// Passes made at the `k`-th bias.
	pub fn directions(self, k:usize) -> Vec<FieldDirection> {
		use FieldDirection::{Down, Up};
		let even = k % 2 == 0;
		match self {
			FieldScanMode::Up => vec![Up],
			FieldScanMode::Down => vec![Down],
			FieldScanMode::UpDown => vec![Up, Down],
			FieldScanMode::DownUp => vec![Down, Up],
			FieldScanMode::AlternateUpFirst => vec![if even { Up } else { Down }],
			FieldScanMode::AlternateDownFirst => vec![if even { Down } else { Up }],
		}
	}

}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldScanParams {
	/// G
	pub from: f64,
	/// G, exclusive
	pub to: f64,
	pub step: f64,
	/// Bias currents held during each pass, A
	pub currents: Vec<f64>,
	pub mode: FieldScanMode,
}

impl FieldScanParams {

	/// Up passes cover `[from, to)`, down passes `(from, to]` from the top.
	pub fn fields(&self, direction:FieldDirection) -> Vec<f64> {
		match direction {
			FieldDirection::Up => fields_ascending(self.from, self.to, self.step),
			FieldDirection::Down => fields_descending(self.from, self.to, self.step),
		}
	}

	pub fn validate(&self) -> Result<()> {
		if !(self.step > 0.0) || !(self.to > self.from) {
			return Err(Error::invalid(format!("field scan [{}, {}) with step {} is empty", self.from, self.to, self.step)));
		}
		if self.currents.is_empty() {
			return Err(Error::invalid("field scan needs at least one bias current"));
		}
		Ok(())
	}

}

/// Voltage against field at one bias current, in the order measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldTrace {
	/// A
	pub current: f64,
	pub direction: FieldDirection,
	pub fields: Vec<f64>,
	/// V, gain corrected
	pub voltages: Vec<f64>,
	/// V/I, 0 at zero bias
	pub resistances: Vec<f64>,
}

impl FieldTrace {

	fn new(current:f64, direction:FieldDirection) -> Self {
		Self{ current, direction, fields: Vec::new(), voltages: Vec::new(), resistances: Vec::new() }
	}

	fn push(&mut self, field:f64, voltage:f64) {
		let resistance = if self.current != 0.0 { voltage / self.current } else { 0.0 };
		self.fields.push(field);
		self.voltages.push(voltage);
		self.resistances.push(resistance);
	}

}

/// V(B): for each bias current, the field is swept through the passes of
/// `params.mode` and the voltage is read at every field.
///
/// Each pass is its own field sweep that ends back at zero field. On error
/// or cancellation the bias is zeroed first, then the field.
pub fn run_field_scan<A, S>(params:&FieldScanParams, iv:&IvParams, adapter:&mut A, strategy:&mut S, ctx:&MeasurementContext) -> Result<Vec<FieldTrace>>
where A: EquipmentAdapter, S: FieldStrategy {
	params.validate()?;
	let mut source = CleanupGuard::new("bias source", adapter, zero_output);
	let passes:usize = (0..params.currents.len()).map(|k| params.mode.directions(k).len()).sum();
	let mut timer = TimeEstimator::new(passes);
	let mut traces = Vec::with_capacity(passes);

	for (k, &current) in params.currents.iter().enumerate() {
		ctx.cancel.check()?;
		source.set_output(iv.output_for(current))?;
		ctx.feed.title(TAB_FIELD_SCAN, format!("I = {:.5e} A", current));

		for direction in params.mode.directions(k) {
			timer.begin_condition();
			info!("Ramping field {:?} at I = {} A", direction, current);
			let mut sweeper = FieldSweeper::new(&mut *strategy, params.fields(direction))?;
			let pass = scan_pass(&mut sweeper, &mut *source, iv, FieldTrace::new(current, direction), ctx)
				.and_then(|trace| sweeper.finalize().map(|_| trace));
			match pass {
				Ok(trace) => traces.push(trace),
				Err(e) => {
					warn!("Field scan stopped: {}", e);
					if let Err(z) = zero_output(&mut *source) {
						error!("Could not zero the bias source: {}", z);
					}
					if let Err(cleanup) = sweeper.error_cleanup() {
						error!("Field cleanup failed: {}", cleanup);
					}
					return Err(e);
				},
			}
			timer.end_condition();
		}
	}
	source.finish()?;
	Ok(traces)
}

fn scan_pass<A, S>(sweeper:&mut FieldSweeper<S>, adapter:&mut A, iv:&IvParams, mut trace:FieldTrace, ctx:&MeasurementContext) -> Result<FieldTrace>
where A: EquipmentAdapter, S: FieldStrategy {
	loop {
		ctx.cancel.check()?;
		let field = match sweeper.step() {
			Some(field) => field?,
			None => break,
		};
		if !iv.step_delay.is_zero() {
			thread::sleep(iv.step_delay);
		}
		let voltage = adapter.measure_now(iv.channel)? / iv.gain;
		debug!("B = {} G, V = {} V", field, voltage);
		trace.push(field, voltage);

		let series = match trace.direction { FieldDirection::Up => 0, FieldDirection::Down => 1 };
		ctx.feed.append(TAB_FIELD_SCAN, series, vec![(field, voltage)]);
		ctx.feed.redraw(TAB_FIELD_SCAN);
	}
	Ok(trace)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;
	use crate::equipment::{JunctionParams, RecordingAdapter, RecordingGenerator, SimulatedJunction};
	use crate::field::{DirectParams, DirectStrategy, FieldState, GradualParams, GradualStrategy, SimulatedMagnet};
	use crate::measurement::CancelToken;
	use crate::temperature::{OperatingMode, SimulatedCryostat, StabilityParams, TemperatureOptions};

	fn iv() -> IvSweep {
		IvSweep::new(IvParams{ max_amplitude: 2.0e-6, step: 1.0e-7, step_delay: Duration::ZERO, ..IvParams::default() }).unwrap()
	}

	fn coil(source:RecordingAdapter) -> GradualStrategy<RecordingAdapter> {
		GradualStrategy::new(source, GradualParams{ ramp_steps: 3, ramp_delay: Duration::ZERO, ..GradualParams::default() }).unwrap()
	}

	#[test]
	fn field_sweep_measures_every_field_and_returns_to_zero() {
		let magnet = RecordingAdapter::new();
		let history = magnet.history();
		let mut sweeper = FieldSweeper::new(coil(magnet), vec![-100.0, 0.0, 100.0]).unwrap();
		let mut junction = SimulatedJunction::new(JunctionParams::default());

		let results = run_field_sweep(&iv(), &mut junction, &mut sweeper, &MeasurementContext::default()).unwrap();
		assert_eq!(results.iter().map(|r| r.condition).collect::<Vec<_>>(), vec![-100.0, 0.0, 100.0]);
		assert!(results.iter().all(|r| (r.resistance - 100.0).abs() < 1e-6));
		assert_eq!(sweeper.state(), FieldState::Done);
		assert_eq!(history.lock().unwrap().last(), Some(&0.0));
		assert_eq!(junction.get_output().unwrap(), 0.0);
	}

	#[test]
	fn cancelled_field_sweep_still_cleans_up() {
		let magnet = RecordingAdapter::new();
		let history = magnet.history();
		let mut sweeper = FieldSweeper::new(coil(magnet), vec![100.0, 200.0]).unwrap();
		let ctx = MeasurementContext::default();
		ctx.cancel.cancel();
		let mut source = RecordingAdapter::starting_at(0.3);

		let res = run_field_sweep(&iv(), &mut source, &mut sweeper, &ctx);
		assert!(matches!(res, Err(Error::Cancelled)));
		assert_eq!(source.commands(), vec![0.0]);
		assert_eq!(sweeper.state(), FieldState::Done);
		// the magnet is never sent toward a field once the run is cancelled
		let h = history.lock().unwrap();
		assert!(!h.is_empty());
		assert!(h.iter().all(|c| *c == 0.0), "{:?}", *h);
	}

	#[test]
	fn bias_is_zeroed_before_the_first_field() {
		let magnet = RecordingAdapter::new().failing_after(0);
		let mut sweeper = FieldSweeper::new(coil(magnet), vec![100.0]).unwrap();
		let mut source = RecordingAdapter::starting_at(0.3);

		let res = run_field_sweep(&iv(), &mut source, &mut sweeper, &MeasurementContext::default());
		assert!(matches!(res, Err(Error::Device(_))));
		assert!(source.commands().iter().all(|c| *c == 0.0));
		assert_eq!(source.commands().first(), Some(&0.0));
	}

	#[test]
	fn failed_return_to_zero_is_retried() {
		let mut magnet = SimulatedMagnet::new();
		magnet.zero_failures = 1;
		let params = DirectParams{ ramp_rate: 1.0e9, margin: Duration::ZERO, switch_delay: Duration::ZERO, ..DirectParams::default() };
		let mut sweeper = FieldSweeper::new(DirectStrategy::new(magnet, params).unwrap(), vec![100.0, 200.0]).unwrap();
		let mut junction = SimulatedJunction::new(JunctionParams::default());

		let res = run_field_sweep(&iv(), &mut junction, &mut sweeper, &MeasurementContext::default());
		assert!(matches!(res, Err(Error::Device(_))));
		assert_eq!(sweeper.state(), FieldState::Done);
		assert_eq!(junction.get_output().unwrap(), 0.0);
		let m = sweeper.strategy_mut().magnet();
		assert_eq!(m.commands.last(), Some(&0.0));
		assert!(!m.switch_heated);
	}

	#[test]
	fn failing_source_zeroes_field() {
		let magnet = RecordingAdapter::new();
		let history = magnet.history();
		let mut sweeper = FieldSweeper::new(coil(magnet), vec![100.0, 200.0]).unwrap();
		// survives the zero reading and a few points, then times out
		let mut source = RecordingAdapter::new().failing_after(5);

		let res = run_field_sweep(&iv(), &mut source, &mut sweeper, &MeasurementContext::default());
		assert!(matches!(res, Err(Error::Device(_))));
		assert_eq!(sweeper.state(), FieldState::Done);
		assert_eq!(history.lock().unwrap().last(), Some(&0.0));
	}

	#[test]
	fn temperature_sweep_labels_with_measured_temperature() {
		let opts = TemperatureOptions{
			start: Some(0.1),
			stop: 0.35,
			step: 0.1,
			stability: StabilityParams{ settle_delay: Duration::ZERO, approach_delay: Duration::ZERO, ..StabilityParams::default() },
			query_floor: Duration::ZERO,
			..TemperatureOptions::default()
		};
		let mut ctrl = TemperatureController::new(SimulatedCryostat::at(0.1), opts).unwrap();
		let mut junction = SimulatedJunction::new(JunctionParams::default());

		let results = run_temperature_sweep(&iv(), &mut junction, &mut ctrl, &MeasurementContext::default()).unwrap();
		assert_eq!(results.len(), 3);
		for (r, t) in results.iter().zip([0.1, 0.2, 0.3].iter()) {
			assert!((r.condition - t).abs() < 1e-9);
			assert_eq!(r.temperature, Some(r.condition));
		}
	}

	#[test]
	fn repeated_curves_give_statistics() {
		let mut junction = SimulatedJunction::new(JunctionParams::default());
		let run = run_repeated(&iv(), &mut junction, 4, 3.0, 5, &MeasurementContext::default()).unwrap();
		assert_eq!(run.samples.len(), 4);
		let stats = run.stats.unwrap();
		assert_eq!(stats.count, 4);
		// a noiseless junction switches at the same bias every time
		assert!(stats.std_dev < 1e-15);
		assert!(stats.mean > 0.8e-6 && stats.mean < 1.3e-6);
	}

	#[test]
	fn cancelled_repetition_zeroes_the_source() {
		let ctx = MeasurementContext::new(CancelToken::new(), Default::default());
		ctx.cancel.cancel();
		let mut source = RecordingAdapter::starting_at(1.0);
		assert!(run_repeated(&iv(), &mut source, 3, 3.0, 5, &ctx).is_err());
		assert_eq!(source.commands(), vec![0.0]);
	}

	#[test]
	fn gate_sweep_labels_with_gate_voltage() {
		let mut gate = RecordingAdapter::new();
		let mut junction = SimulatedJunction::new(JunctionParams::default());
		let voltages = gate_voltages(1.0, 3);
		assert_eq!(voltages, vec![-1.0, 0.0, 1.0]);

		let results = run_gate_sweep(&iv(), &mut junction, &mut gate, &voltages, &MeasurementContext::default()).unwrap();
		assert_eq!(results.iter().map(|r| r.condition).collect::<Vec<_>>(), voltages);
		assert_eq!(gate.commands(), vec![-1.0, 0.0, 1.0, 0.0]);
		assert_eq!(junction.get_output().unwrap(), 0.0);
	}

	#[test]
	fn cancelled_gate_sweep_zeroes_both_sources() {
		let ctx = MeasurementContext::default();
		ctx.cancel.cancel();
		let mut gate = RecordingAdapter::starting_at(5.0);
		let mut source = RecordingAdapter::starting_at(0.3);

		let res = run_gate_sweep(&iv(), &mut source, &mut gate, &[1.0, 2.0], &ctx);
		assert!(matches!(res, Err(Error::Cancelled)));
		assert_eq!(source.commands(), vec![0.0]);
		assert_eq!(gate.commands(), vec![0.0]);
	}

	#[test]
	fn shapiro_power_sweep_drives_the_generator() {
		let mut generator = RecordingGenerator::new();
		let mut junction = SimulatedJunction::new(JunctionParams::default());
		let sweep = RfSweep::new(RfSweepKind::Power, -2.0, 1.0, 1.0, 2.5).unwrap();
		assert_eq!(sweep.values, vec![-2.0, -1.0, 0.0]);

		let results = run_shapiro_sweep(&iv(), &mut junction, &mut generator, &sweep, &MeasurementContext::default()).unwrap();
		assert_eq!(results.len(), 3);
		assert_eq!(generator.commands(), vec!["FREQ 2.5", "OUTP ON", "POW -2", "POW -1", "POW 0", "OUTP OFF"]);
	}

	#[test]
	fn shapiro_frequency_sweep_holds_the_power() {
		let mut generator = RecordingGenerator::new();
		let mut junction = SimulatedJunction::new(JunctionParams::default());
		let sweep = RfSweep::new(RfSweepKind::Frequency, 1.0, 2.0, 0.5, -10.0).unwrap();

		run_shapiro_sweep(&iv(), &mut junction, &mut generator, &sweep, &MeasurementContext::default()).unwrap();
		assert_eq!(generator.commands(), vec!["POW -10", "OUTP ON", "FREQ 1", "FREQ 1.5", "OUTP OFF"]);
		assert_eq!(RfSweepKind::Frequency.measurement(), "Shapiro_freq");
	}

	#[test]
	fn cancelled_shapiro_sweep_turns_rf_off() {
		let ctx = MeasurementContext::default();
		ctx.cancel.cancel();
		let mut generator = RecordingGenerator::new();
		let mut source = RecordingAdapter::starting_at(0.3);
		let sweep = RfSweep::new(RfSweepKind::Power, 0.0, 1.0, 0.5, 2.5).unwrap();

		let res = run_shapiro_sweep(&iv(), &mut source, &mut generator, &sweep, &ctx);
		assert!(matches!(res, Err(Error::Cancelled)));
		assert_eq!(source.commands(), vec![0.0]);
		assert_eq!(generator.commands(), vec!["OUTP OFF"]);
	}

	#[test]
	fn rf_sweep_rejects_unusable_ranges() {
		assert!(RfSweep::new(RfSweepKind::Power, 0.0, 1.0, 0.0, 2.5).is_err());
		assert!(RfSweep::new(RfSweepKind::Power, 1.0, 0.0, 0.5, 2.5).is_err());
		assert!(RfSweep::new(RfSweepKind::Frequency, 1.0, 2.0, 0.5, f64::NAN).is_err());
	}

	fn passive(cryostat:SimulatedCryostat) -> TemperatureController<SimulatedCryostat> {
		let opts = TemperatureOptions{ mode: OperatingMode::Passive, query_floor: Duration::ZERO, ..TemperatureOptions::default() };
		TemperatureController::new(cryostat, opts).unwrap()
	}

	fn quick_log(max_temperature:f64, max_curves:Option<usize>) -> ResistanceLogParams {
		ResistanceLogParams{ interval: Duration::ZERO, max_temperature, max_curves }
	}

	#[test]
	fn resistance_log_ends_at_the_temperature_limit() {
		let ctrl = passive(SimulatedCryostat::at(4.2).with_readings(vec![4.2, 4.5, 21.0]));
		// the recording adapter reads back its own output, so V = I
		let mut source = RecordingAdapter::new();

		let points = run_resistance_log(&iv(), &mut source, &ctrl, &quick_log(20.0, None), &MeasurementContext::default()).unwrap();
		assert_eq!(points.iter().map(|p| p.temperature).collect::<Vec<_>>(), vec![4.2, 4.5]);
		assert!(points.iter().all(|p| (p.resistance - 1.0).abs() < 1e-9));
		assert_eq!(source.commands().last(), Some(&0.0));
	}

	#[test]
	fn resistance_log_ends_after_max_curves() {
		let ctrl = passive(SimulatedCryostat::at(1.0));
		let mut source = RecordingAdapter::new();

		let points = run_resistance_log(&iv(), &mut source, &ctrl, &quick_log(20.0, Some(3)), &MeasurementContext::default()).unwrap();
		assert_eq!(points.len(), 3);
	}

	#[test]
	fn cancelled_resistance_log_keeps_what_it_has() {
		let ctx = MeasurementContext::default();
		ctx.cancel.cancel();
		let ctrl = passive(SimulatedCryostat::at(1.0));
		let mut source = RecordingAdapter::starting_at(0.3);

		let points = run_resistance_log(&iv(), &mut source, &ctrl, &quick_log(20.0, None), &ctx).unwrap();
		assert!(points.is_empty());
		assert_eq!(source.commands(), vec![0.0]);
	}

	fn scan(currents:Vec<f64>, mode:FieldScanMode) -> FieldScanParams {
		FieldScanParams{ from: -100.0, to: 100.0, step: 50.0, currents, mode }
	}

	fn quick_iv_params() -> IvParams {
		IvParams{ step_delay: Duration::ZERO, ..IvParams::default() }
	}

	#[test]
	fn field_scan_mode_orders_passes() {
		use FieldDirection::{Down, Up};
		assert_eq!(FieldScanMode::UpDown.directions(1), vec![Up, Down]);
		assert_eq!(FieldScanMode::DownUp.directions(0), vec![Down, Up]);
		assert_eq!(FieldScanMode::AlternateUpFirst.directions(0), vec![Up]);
		assert_eq!(FieldScanMode::AlternateUpFirst.directions(1), vec![Down]);
		assert_eq!(FieldScanMode::AlternateDownFirst.directions(2), vec![Down]);

		let p = scan(vec![1.0e-6], FieldScanMode::Up);
		assert_eq!(p.fields(Up), vec![-100.0, -50.0, 0.0, 50.0]);
		assert_eq!(p.fields(Down), vec![100.0, 50.0, 0.0, -50.0]);
	}

	#[test]
	fn field_scan_records_voltage_against_field() {
		let magnet = RecordingAdapter::new();
		let history = magnet.history();
		let mut strategy = coil(magnet);
		let mut source = RecordingAdapter::new();
		let params = scan(vec![1.0e-6, 2.0e-6], FieldScanMode::DownUp);

		let traces = run_field_scan(&params, &quick_iv_params(), &mut source, &mut strategy, &MeasurementContext::default()).unwrap();
		let dirs:Vec<FieldDirection> = traces.iter().map(|t| t.direction).collect();
		assert_eq!(dirs, vec![FieldDirection::Down, FieldDirection::Up, FieldDirection::Down, FieldDirection::Up]);
		assert_eq!(traces[0].fields, vec![100.0, 50.0, 0.0, -50.0]);
		assert_eq!(traces[3].current, 2.0e-6);
		// V reads back the bias, so V/I is one everywhere
		assert!(traces.iter().all(|t| t.voltages.iter().all(|v| *v == t.current)));
		assert!(traces.iter().all(|t| t.resistances.iter().all(|r| (r - 1.0).abs() < 1e-12)));
		assert_eq!(source.commands().last(), Some(&0.0));
		assert_eq!(history.lock().unwrap().last(), Some(&0.0));
	}

	#[test]
	fn zero_bias_gives_zero_resistance() {
		let mut strategy = coil(RecordingAdapter::new());
		let mut source = RecordingAdapter::new();
		let traces = run_field_scan(&scan(vec![0.0], FieldScanMode::Up), &quick_iv_params(), &mut source, &mut strategy, &MeasurementContext::default()).unwrap();
		assert!(traces[0].resistances.iter().all(|r| *r == 0.0));
	}

	// Cancels the run once the field has been set `after` times
	struct CancellingCoil {
		inner: GradualStrategy<RecordingAdapter>,
		cancel: CancelToken,
		after: usize,
	}

	impl FieldStrategy for CancellingCoil {
		fn max_field(&self) -> f64 { self.inner.max_field() }
		fn prepare(&mut self, first:f64) -> Result<()> { self.inner.prepare(first) }
		fn set_one(&mut self, field:f64) -> Result<()> {
			self.after = self.after.saturating_sub(1);
			if self.after == 0 {
				self.cancel.cancel();
			}
			self.inner.set_one(field)
		}
		fn finalize(&mut self) -> Result<()> { self.inner.finalize() }
	}

	#[test]
	fn cancelled_field_scan_zeroes_bias_and_field() {
		let magnet = RecordingAdapter::new();
		let history = magnet.history();
		let ctx = MeasurementContext::default();
		let mut strategy = CancellingCoil{ inner: coil(magnet), cancel: ctx.cancel.clone(), after: 2 };
		let mut source = RecordingAdapter::new();

		let res = run_field_scan(&scan(vec![1.0e-6], FieldScanMode::UpDown), &quick_iv_params(), &mut source, &mut strategy, &ctx);
		assert!(matches!(res, Err(Error::Cancelled)));
		assert_eq!(source.commands().first(), Some(&1.0e-6));
		assert_eq!(source.commands().last(), Some(&0.0));
		assert_eq!(history.lock().unwrap().last(), Some(&0.0));
	}
}
