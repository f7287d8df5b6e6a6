use std::thread;
use std::time::Duration;

use chrono::{DateTime, Local};
use log::{debug, info};

use crate::analysis::{estimate_resistance, find_critical_currents, DEFAULT_PEAK_THRESHOLD};
use crate::equipment::EquipmentAdapter;
use crate::error::{Error, Result};
use crate::sweep::SweepSequence;
use super::MeasurementContext;
use super::feed::TAB_IV;

/// One bias point of an I-V curve. Never modified after it is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementPoint {
	/// Commanded output, in the source's unit
	pub bias: f64,
	/// A
	pub current: f64,
	/// V, gain and offset corrected
	pub response: f64,
	pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IvParams {
	/// Peak output of the bias source
	pub max_amplitude: f64,
	pub step: f64,
	/// Series resistor for a voltage source; `None` when the source outputs amperes
	pub load_resistance: Option<f64>,
	/// Amplifier gain in front of the voltmeter
	pub gain: f64,
	/// Wait between setting a bias and reading the response
	pub step_delay: Duration,
	/// Voltmeter channel
	pub channel: u8,
	/// Share of the range at both ends used to fit the normal resistance
	pub resistance_fraction: f64,
	/// Peak threshold for critical current detection, in mean |dV|
	pub threshold: f64,
}

impl Default for IvParams {
	fn default() -> Self {
		Self{
			max_amplitude: 1.0e-6,
			step: 1.0e-8,
			load_resistance: None,
			gain: 1.0,
			step_delay: Duration::from_millis(100),
			channel: 1,
			resistance_fraction: 0.1,
			threshold: DEFAULT_PEAK_THRESHOLD,
		}
	}
}

impl IvParams {

	pub fn validate(&self) -> Result<()> {
		if !(self.gain.is_finite() && self.gain != 0.0) {
			return Err(Error::invalid(format!("amplifier gain must be non-zero, got {}", self.gain)));
		}
		if let Some(r) = self.load_resistance {
			if !(r > 0.0) {
				return Err(Error::invalid(format!("load resistance must be positive, got {}", r)));
			}
		}
		if !(self.resistance_fraction > 0.0 && self.resistance_fraction <= 1.0) {
			return Err(Error::invalid(format!("resistance fraction must be in (0, 1], got {}", self.resistance_fraction)));
		}
		Ok(())
	}

	/// Amperes flowing for a commanded output.
	pub fn current_of(&self, bias:f64) -> f64 {
		match self.load_resistance {
			Some(r) => bias / r,
			None => bias,
		}
	}

	/// Commanded output that drives `current` amperes; inverse of [`current_of`](Self::current_of).
	pub fn output_for(&self, current:f64) -> f64 {
		match self.load_resistance {
			Some(r) => current * r,
			None => current,
		}
	}

}

/// A full bias period measured at one condition.
#[derive(Debug, Clone)]
pub struct IvCurve {
	sequence: SweepSequence,
	points: Vec<MeasurementPoint>,
	zero_offset: f64,
}

impl IvCurve {

	pub fn new(sequence:SweepSequence, zero_offset:f64) -> Self {
		let points = Vec::with_capacity(sequence.len());
		Self{ sequence, points, zero_offset }
	}

	pub fn push(&mut self, point:MeasurementPoint) { self.points.push(point); }

	pub fn sequence(&self) -> &SweepSequence { &self.sequence }

	pub fn points(&self) -> &[MeasurementPoint] { &self.points }

	/// Voltmeter reading at zero bias, already divided by the gain.
	pub fn zero_offset(&self) -> f64 { self.zero_offset }

	pub fn is_complete(&self) -> bool { self.points.len() == self.sequence.len() }

	pub fn biases(&self) -> Vec<f64> { self.points.iter().map(|p| p.bias).collect() }

	pub fn currents(&self) -> Vec<f64> { self.points.iter().map(|p| p.current).collect() }

	pub fn voltages(&self) -> Vec<f64> { self.points.iter().map(|p| p.response).collect() }

	/// `(currents, voltages)` measured sweeping away from zero, by ascending current.
	pub fn critical_branch(&self) -> (Vec<f64>, Vec<f64>) {
		(self.sequence.split(&self.currents()).0, self.sequence.split(&self.voltages()).0)
	}

	/// `(currents, voltages)` measured sweeping toward zero, by ascending current.
	pub fn retrapping_branch(&self) -> (Vec<f64>, Vec<f64>) {
		(self.sequence.split(&self.currents()).1, self.sequence.split(&self.voltages()).1)
	}

	/// `(Ic-, Ic+)`
	pub fn critical_currents(&self, threshold:f64) -> (f64, f64) {
		let (i, v) = self.critical_branch();
		find_critical_currents(&i, &v, threshold)
	}

	/// `(Ir-, Ir+)`
	pub fn retrapping_currents(&self, threshold:f64) -> (f64, f64) {
		let (i, v) = self.retrapping_branch();
		find_critical_currents(&i, &v, threshold)
	}

	/// Normal resistance fitted on the points within `fraction` of either
	/// end of the bias range.
	pub fn resistance(&self, fraction:f64) -> f64 {
		let edge = (1.0 - fraction) * self.sequence.max_amplitude();
		let (i, v):(Vec<f64>, Vec<f64>) = self.points.iter()
			.filter(|p| p.bias.abs() > edge)
			.map(|p| (p.current, p.response))
			.unzip();
		estimate_resistance(&i, &v)
	}

}

/// Measures I-V curves over one [`SweepSequence`].
#[derive(Debug, Clone)]
pub struct IvSweep {
	params: IvParams,
	sequence: SweepSequence,
}

impl IvSweep {

	pub fn new(params:IvParams) -> Result<Self> {
		params.validate()?;
		let sequence = SweepSequence::build(params.max_amplitude, params.step)?;
		Ok(Self{ params, sequence })
	}

	pub fn params(&self) -> &IvParams { &self.params }

	pub fn sequence(&self) -> &SweepSequence { &self.sequence }

	/// Runs one period. The zero-bias reading taken first is subtracted from
	/// every point; the output is left at zero afterwards.
	///
	/// Cancellation is checked before every point. An error or cancellation
	/// leaves the output where it was; callers guard the source with a
	/// [`CleanupGuard`](super::CleanupGuard).
	pub fn run<A: EquipmentAdapter>(&self, adapter:&mut A, ctx:&MeasurementContext) -> Result<IvCurve> {
		let p = &self.params;
		ctx.cancel.check()?;

		let zero = adapter.measure_now(p.channel)? / p.gain;
		debug!("Zero-bias offset {} V", zero);
		let mut curve = IvCurve::new(self.sequence.clone(), zero);

		for bias in self.sequence.iter() {
			ctx.cancel.check()?;
			adapter.set_output(bias)?;
			thread::sleep(p.step_delay);
			let response = adapter.measure_now(p.channel)? / p.gain - zero;
			let current = p.current_of(bias);

			curve.push(MeasurementPoint{ bias, current, response, timestamp: Local::now() });
			ctx.feed.append(TAB_IV, 0, vec![(current, response)]);
		}
		adapter.set_output(0.0)?;

		let r = curve.resistance(p.resistance_fraction);
		info!("I-V curve of {} points done, R = {:.6} Ohm", curve.points().len(), r);
		ctx.feed.title(TAB_IV, format!("Resistance is {:.6} Ohm", r));
		ctx.feed.redraw(TAB_IV);
		Ok(curve)
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::equipment::{JunctionParams, RecordingAdapter, SimulatedJunction};

	fn params() -> IvParams {
		IvParams{ max_amplitude: 2.0e-6, step: 1.0e-7, step_delay: Duration::ZERO, ..IvParams::default() }
	}

	#[test]
	fn junction_curve_has_hysteresis() {
		let iv = IvSweep::new(params()).unwrap();
		let mut junction = SimulatedJunction::new(JunctionParams::default());
		let curve = iv.run(&mut junction, &MeasurementContext::default()).unwrap();
		assert!(curve.is_complete());

		let (ic_neg, ic_pos) = curve.critical_currents(DEFAULT_PEAK_THRESHOLD);
		let (ir_neg, ir_pos) = curve.retrapping_currents(DEFAULT_PEAK_THRESHOLD);
		assert!(ic_pos > 0.8e-6 && ic_pos < 1.3e-6, "Ic+ = {}", ic_pos);
		assert!(ic_neg < -0.8e-6 && ic_neg > -1.3e-6, "Ic- = {}", ic_neg);
		assert!(ir_pos > 0.2e-6 && ir_pos < 0.6e-6, "Ir+ = {}", ir_pos);
		assert!(ir_neg < -0.2e-6 && ir_neg > -0.6e-6, "Ir- = {}", ir_neg);

		assert!((curve.resistance(0.1) - 100.0).abs() < 1e-6);
	}

	#[test]
	fn offset_and_gain_are_removed() {
		let junction = JunctionParams{ offset: 1.0e-5, gain: 100.0, ..JunctionParams::default() };
		let iv = IvSweep::new(IvParams{ gain: 100.0, ..params() }).unwrap();
		let curve = iv.run(&mut SimulatedJunction::new(junction), &MeasurementContext::default()).unwrap();
		assert!((curve.zero_offset() - 1.0e-5).abs() < 1e-18);
		// superconducting at zero bias
		assert!(curve.points()[0].response.abs() < 1e-15);
	}

	#[test]
	fn voltage_source_bias_goes_through_the_resistor() {
		let iv = IvSweep::new(IvParams{ max_amplitude: 2.0, step: 0.5, load_resistance: Some(1.0e6), ..params() }).unwrap();
		let curve = iv.run(&mut RecordingAdapter::new(), &MeasurementContext::default()).unwrap();
		assert_eq!(curve.points()[1].bias, 0.5);
		assert_eq!(curve.points()[1].current, 0.5e-6);
	}

	#[test]
	fn points_follow_the_sequence_and_output_ends_at_zero() {
		let iv = IvSweep::new(IvParams{ max_amplitude: 1.0, step: 0.5, ..params() }).unwrap();
		let mut adapter = RecordingAdapter::new();
		let curve = iv.run(&mut adapter, &MeasurementContext::default()).unwrap();
		assert_eq!(curve.biases(), iv.sequence().values().to_vec());
		let mut expected = iv.sequence().values().to_vec();
		expected.push(0.0);
		assert_eq!(adapter.commands(), expected);
	}

	#[test]
	fn cancellation_stops_before_the_next_point() {
		let ctx = MeasurementContext::default();
		ctx.cancel.cancel();
		let iv = IvSweep::new(params()).unwrap();
		let mut adapter = RecordingAdapter::new();
		assert!(matches!(iv.run(&mut adapter, &ctx), Err(Error::Cancelled)));
		assert!(adapter.commands().is_empty());
	}

	#[test]
	fn zero_gain_is_rejected() {
		assert!(matches!(IvSweep::new(IvParams{ gain: 0.0, ..params() }), Err(Error::InvalidParameter(_))));
	}
}
