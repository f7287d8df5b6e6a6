//! Measurement runs: I-V curves over a swept outer condition.
//!
//! A run owns nothing global. Everything a thread needs is in the
//! [`MeasurementContext`] it is handed: the cancellation token checked at
//! every loop head, the plot feed, and the window of recent thermometer
//! readings kept by a [`ThermometerLogger`].

mod cancel;
mod cleanup;
mod feed;
mod iv;
mod logger;
mod runs;
mod timing;

pub use cancel::CancelToken;
pub use cleanup::{rf_off, zero_output, CleanupGuard};
pub use feed::{PlotEvent, PlotFeed, TAB_CRITICAL, TAB_FIELD_SCAN, TAB_IV, TAB_RESISTANCE, TAB_TEMPERATURE};
pub use iv::{IvCurve, IvParams, IvSweep, MeasurementPoint};
pub use logger::{latest_temperature, RingBuffer, TemperatureSample, TemperatureWindow, ThermometerLogger, TEMPERATURE_WINDOW};
pub use runs::{
	bias_currents, gate_voltages, run_field_scan, run_field_sweep, run_gate_sweep, run_repeated, run_resistance_log,
	run_shapiro_sweep, run_temperature_sweep, ConditionResult, FieldDirection, FieldScanMode, FieldScanParams,
	FieldTrace, RepeatedRun, ResistanceLogParams, ResistancePoint, RfSweep, RfSweepKind,
};
pub use timing::{format_hms, project_remaining, TimeEstimator};

#[derive(Debug, Clone, Default)]
pub struct MeasurementContext {
	pub cancel: CancelToken,
	pub feed: PlotFeed,
	pub temperatures: Option<TemperatureWindow>,
}

impl MeasurementContext {

	pub fn new(cancel:CancelToken, feed:PlotFeed) -> Self {
		Self{ cancel, feed, temperatures: None }
	}

	pub fn with_temperatures(mut self, window:TemperatureWindow) -> Self {
		self.temperatures = Some(window);
		self
	}

	pub fn latest_temperature(&self) -> Option<f64> {
		self.temperatures.as_ref().and_then(latest_temperature)
	}

}
