//! Magnetic field sweeps with mandatory ramp-in and ramp-out.
//!
//! A [`FieldSweeper`] walks a list of target fields (in gauss) through a
//! [`FieldStrategy`]. The strategy decides how a field is reached: a plain
//! current supply has to be walked there in small steps
//! ([`GradualStrategy`]), a magnet controller ramps on its own and only has
//! to be waited for ([`DirectStrategy`]).
//!
//! ```text
//! Idle --prepare--> Preparing --> Ready --next--> AtField(f) --next--> ...
//! Ready / AtField --finalize--> Finalizing --> Done
//! any --error_cleanup--> ErrorCleanup --> Done
//! ```
//!
//! `Done` is only ever entered after the field has been driven back to zero.
//! A sweeper dropped in any other state (other than `Idle`) cleans up on its
//! own.

use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::equipment::BiasSource;
use crate::error::{DeviceCommunicationError, Error, Result};
use crate::sweep::{arange, linspace};

/// Field limit of the superconducting magnet, G
pub const MAX_MAGNET_FIELD:f64 = 80.0e3;
/// Coil constant of the copper coil driven by a plain supply, G/A
pub const GRADUAL_COIL_CONSTANT:f64 = 100.0;
/// Coil constant of the superconducting magnet, G/A
pub const DIRECT_COIL_CONSTANT:f64 = 1068.0;
/// Magnet controller ramp rate, A/s
pub const DIRECT_RAMP_RATE:f64 = 0.027;

/// `n = floor(range / step)` points from `-range` to `+range` inclusive.
pub fn field_range(range:f64, step:f64) -> Result<Vec<f64>> {
	if !(step > 0.0) || !(range >= 0.0) {
		return Err(Error::invalid(format!("field range {} with step {} is not sweepable", range, step)));
	}
	Ok(linspace(-range, range, (range / step).floor() as usize))
}

/// `[from, to)` going up.
pub fn fields_ascending(from:f64, to:f64, step:f64) -> Vec<f64> {
	arange(from, to, step.abs())
}

/// `(from, to]` going down, the reverse pass of [`fields_ascending`].
pub fn fields_descending(from:f64, to:f64, step:f64) -> Vec<f64> {
	arange(to, from, -step.abs())
}

/// How a physical field source is driven.
pub trait FieldStrategy: Send {
	/// Largest |field| this source may be asked for, G.
	fn max_field(&self) -> f64;

	/// Brings the field from wherever it is to the vicinity of `first`.
	fn prepare(&mut self, first:f64) -> Result<()>;

	/// Commands one field; the caller already ramped close to it.
	fn set_one(&mut self, field:f64) -> Result<()>;

	/// Returns the field to zero and leaves the source safe.
	fn finalize(&mut self) -> Result<()>;
}

impl<T: FieldStrategy + ?Sized> FieldStrategy for Box<T> {
	fn max_field(&self) -> f64 { (**self).max_field() }
	fn prepare(&mut self, first:f64) -> Result<()> { (**self).prepare(first) }
	fn set_one(&mut self, field:f64) -> Result<()> { (**self).set_one(field) }
	fn finalize(&mut self) -> Result<()> { (**self).finalize() }
}

// Lets one strategy serve several short-lived sweepers
impl<'a, T: FieldStrategy + ?Sized> FieldStrategy for &'a mut T {
	fn max_field(&self) -> f64 { (**self).max_field() }
	fn prepare(&mut self, first:f64) -> Result<()> { (**self).prepare(first) }
	fn set_one(&mut self, field:f64) -> Result<()> { (**self).set_one(field) }
	fn finalize(&mut self) -> Result<()> { (**self).finalize() }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldState {
	Idle,
	Preparing,
	Ready,
	AtField(f64),
	Finalizing,
	Done,
	ErrorCleanup,
}

pub struct FieldSweeper<S: FieldStrategy> {
	strategy: S,
	fields: Vec<f64>,
	next_index: usize,
	state: FieldState,
}

impl<S: FieldStrategy> FieldSweeper<S> {

	/// Fails with [`Error::FieldLimit`] if any target exceeds the source's limit.
	pub fn new(strategy:S, fields:Vec<f64>) -> Result<Self> {
		let limit = strategy.max_field();
		if let Some(&field) = fields.iter().find(|f| !(f.abs() <= limit)) {
			return Err(Error::FieldLimit{ field, limit });
		}
		Ok(Self{ strategy, fields, next_index: 0, state: FieldState::Idle })
	}

	pub fn state(&self) -> FieldState { self.state }

	pub fn fields(&self) -> &[f64] { &self.fields }

	pub fn strategy(&self) -> &S { &self.strategy }

	pub fn strategy_mut(&mut self) -> &mut S { &mut self.strategy }

	pub fn current_field(&self) -> Option<f64> {
		match self.state {
			FieldState::AtField(f) => Some(f),
			_ => None,
		}
	}

	pub fn prepare(&mut self) -> Result<()> {
		if self.state != FieldState::Idle {
			return Err(Error::invalid(format!("prepare() called in state {:?}", self.state)));
		}

		let first = self.fields.first().copied().unwrap_or(0.0);
		info!("Preparing field sweep of {} points, ramping to {} G", self.fields.len(), first);
		self.state = FieldState::Preparing;
		self.guarded(|s| s.prepare(first))?;
		self.state = FieldState::Ready;
		Ok(())
	}

	/// Moves to the next target field, preparing first if needed. `None`
	/// once every field has been visited.
	pub fn step(&mut self) -> Option<Result<f64>> {
		match self.state {
			FieldState::Idle => if let Err(e) = self.prepare() { return Some(Err(e)); },
			FieldState::Ready | FieldState::AtField(_) => {},
			_ => return None,
		}

		let field = *self.fields.get(self.next_index)?;
		self.next_index += 1;

		debug!("Setting field {} G", field);
		if let Err(e) = self.guarded(|s| s.set_one(field)) {
			return Some(Err(e));
		}
		self.state = FieldState::AtField(field);
		Some(Ok(field))
	}

	pub fn finalize(&mut self) -> Result<()> {
		match self.state {
			FieldState::Done => return Ok(()),
			FieldState::Ready | FieldState::AtField(_) => {},
			other => return Err(Error::invalid(format!("finalize() called in state {:?}", other))),
		}

		info!("Field sweep finished, returning field to zero");
		self.state = FieldState::Finalizing;
		self.guarded(|s| s.finalize())?;
		self.state = FieldState::Done;
		Ok(())
	}

	/// Drives the field back to zero from any state. Once that has succeeded
	/// further calls do nothing.
	pub fn error_cleanup(&mut self) -> Result<()> {
		if self.state == FieldState::Done {
			return Ok(());
		}

		warn!("Field sweep interrupted in state {:?}, returning field to zero", self.state);
		self.state = FieldState::ErrorCleanup;
		self.strategy.finalize()?;
		self.state = FieldState::Done;
		info!("Field returned to zero");
		Ok(())
	}

	// Any failure while the field is live sends the sweeper through cleanup
	// before the original error is handed back
	fn guarded<F>(&mut self, op:F) -> Result<()>
	where F: FnOnce(&mut S) -> Result<()> {
		op(&mut self.strategy).map_err(|e| {
			if let Err(cleanup) = self.error_cleanup() {
				error!("Cleanup after field error failed: {}", cleanup);
			}
			e
		})
	}

}

impl<S: FieldStrategy> Iterator for FieldSweeper<S> {
	type Item = Result<f64>;

	fn next(&mut self) -> Option<Self::Item> { self.step() }
}

impl<S: FieldStrategy> Drop for FieldSweeper<S> {
	fn drop(&mut self) {
		if !matches!(self.state, FieldState::Idle | FieldState::Done) {
			if let Err(e) = self.error_cleanup() {
				error!("Could not return field to zero on drop: {}", e);
			}
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradualParams {
	/// G/A
	pub coil_constant: f64,
	pub ramp_steps: usize,
	pub ramp_delay: Duration,
	pub max_field: f64,
}

impl Default for GradualParams {
	fn default() -> Self {
		Self{
			coil_constant: GRADUAL_COIL_CONSTANT,
			ramp_steps: 15,
			ramp_delay: Duration::from_millis(500),
			max_field: MAX_MAGNET_FIELD,
		}
	}
}

/// Plain current supply driving a coil: every large change is walked in
/// `ramp_steps` equal steps, `ramp_delay` apart.
pub struct GradualStrategy<B: BiasSource> {
	source: B,
	params: GradualParams,
}

impl<B: BiasSource> GradualStrategy<B> {

	pub fn new(source:B, params:GradualParams) -> Result<Self> {
		if !(params.coil_constant > 0.0) {
			return Err(Error::invalid(format!("coil constant must be positive, got {}", params.coil_constant)));
		}
		Ok(Self{ source, params })
	}

	pub fn source(&mut self) -> &mut B { &mut self.source }

	pub fn field_to_current(&self, field:f64) -> f64 { field / self.params.coil_constant }

	pub fn current_to_field(&self, current:f64) -> f64 { current * self.params.coil_constant }

	fn ramp_to(&mut self, target:f64) -> Result<()> {
		let now = self.source.get_output()?;
		for curr in linspace(now, target, self.params.ramp_steps.max(2)) {
			self.source.set_output(curr)?;
			debug!("Ramping field: {:.3} G", self.current_to_field(curr));
			thread::sleep(self.params.ramp_delay);
		}
		Ok(())
	}

}

impl<B: BiasSource> FieldStrategy for GradualStrategy<B> {

	fn max_field(&self) -> f64 { self.params.max_field }

	fn prepare(&mut self, first:f64) -> Result<()> {
		let target = self.field_to_current(first);
		self.ramp_to(target)
	}

	fn set_one(&mut self, field:f64) -> Result<()> {
		let target = self.field_to_current(field);
		self.source.set_output(target)?;
		Ok(())
	}

	fn finalize(&mut self) -> Result<()> { self.ramp_to(0.0) }

}

/// A superconducting magnet controller with its own ramp logic.
pub trait MagnetController: Send {
	/// G/A
	fn coil_constant(&self) -> f64;

	/// Starts ramping to `field` G; returns without waiting.
	fn ramp_to_field(&mut self, field:f64) -> std::result::Result<(), DeviceCommunicationError>;

	fn ramp_to_zero(&mut self) -> std::result::Result<(), DeviceCommunicationError>;

	/// Field computed from the measured magnet current, G.
	fn actual_field(&mut self) -> std::result::Result<f64, DeviceCommunicationError>;

	/// Heats (`true`) or cools the persistent switch; returns without waiting.
	fn set_persistent_switch(&mut self, heated:bool) -> std::result::Result<(), DeviceCommunicationError>;

	fn quenched(&mut self) -> std::result::Result<bool, DeviceCommunicationError> { Ok(false) }
}

impl<T: MagnetController + ?Sized> MagnetController for Box<T> {
	fn coil_constant(&self) -> f64 { (**self).coil_constant() }
	fn ramp_to_field(&mut self, field:f64) -> std::result::Result<(), DeviceCommunicationError> { (**self).ramp_to_field(field) }
	fn ramp_to_zero(&mut self) -> std::result::Result<(), DeviceCommunicationError> { (**self).ramp_to_zero() }
	fn actual_field(&mut self) -> std::result::Result<f64, DeviceCommunicationError> { (**self).actual_field() }
	fn set_persistent_switch(&mut self, heated:bool) -> std::result::Result<(), DeviceCommunicationError> { (**self).set_persistent_switch(heated) }
	fn quenched(&mut self) -> std::result::Result<bool, DeviceCommunicationError> { (**self).quenched() }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DirectParams {
	/// A/s
	pub ramp_rate: f64,
	/// Extra wait on top of every computed ramp time
	pub margin: Duration,
	/// Heating or cooling time of the persistent switch
	pub switch_delay: Duration,
	pub max_field: f64,
}

impl Default for DirectParams {
	fn default() -> Self {
		Self{
			ramp_rate: DIRECT_RAMP_RATE,
			margin: Duration::from_secs(5),
			switch_delay: Duration::from_secs(40),
			max_field: MAX_MAGNET_FIELD,
		}
	}
}

/// Single absolute-target commands, each followed by a wait of
/// `|ΔI| / ramp_rate + margin`.
pub struct DirectStrategy<M: MagnetController> {
	magnet: M,
	params: DirectParams,
	now_field: f64,
	switch_heated: bool,
}

impl<M: MagnetController> DirectStrategy<M> {

	pub fn new(magnet:M, params:DirectParams) -> Result<Self> {
		if !(params.ramp_rate > 0.0) {
			return Err(Error::invalid(format!("ramp rate must be positive, got {}", params.ramp_rate)));
		}
		Ok(Self{ magnet, params, now_field: 0.0, switch_heated: false })
	}

	pub fn magnet(&mut self) -> &mut M { &mut self.magnet }

	/// Time the controller needs to go from the present field to `target`.
	pub fn ramp_time(&self, target:f64) -> Duration {
		let delta_current = (target - self.now_field).abs() / self.magnet.coil_constant();
		Duration::from_secs_f64(delta_current / self.params.ramp_rate) + self.params.margin
	}

	fn wait_for_ramp(&self, target:f64) {
		let wait = self.ramp_time(target);
		info!("Ramping magnet to {} G, waiting {:.1} s", target, wait.as_secs_f64());
		thread::sleep(wait);
	}

}

impl<M: MagnetController> FieldStrategy for DirectStrategy<M> {

	fn max_field(&self) -> f64 { self.params.max_field }

	fn prepare(&mut self, first:f64) -> Result<()> {
		if !self.switch_heated {
			info!("Heating persistent switch");
			self.magnet.set_persistent_switch(true)?;
			self.switch_heated = true;
			thread::sleep(self.params.switch_delay);
		}
		self.set_one(first)
	}

	fn set_one(&mut self, field:f64) -> Result<()> {
		self.magnet.ramp_to_field(field)?;
		self.wait_for_ramp(field);
		if self.magnet.quenched()? {
			error!("Magnet quench detected while ramping to {} G", field);
			return Err(Error::Quench);
		}
		self.now_field = field;

		match self.magnet.actual_field() {
			Ok(actual) => debug!("Actual field is {} G", actual),
			Err(e) => warn!("Could not read back the magnet field: {}", e),
		}
		Ok(())
	}

	fn finalize(&mut self) -> Result<()> {
		self.magnet.ramp_to_zero()?;
		self.wait_for_ramp(0.0);
		self.now_field = 0.0;

		if self.switch_heated {
			info!("Cooling persistent switch");
			self.magnet.set_persistent_switch(false)?;
			self.switch_heated = false;
			thread::sleep(self.params.switch_delay);
		}
		Ok(())
	}

}

/// Magnet controller stand-in for dry runs: the field follows every command
/// immediately and the command history is kept.
#[derive(Debug, Clone, Default)]
pub struct SimulatedMagnet {
	pub commands: Vec<f64>,
	pub switch_heated: bool,
	/// Quench as soon as |field| exceeds this, G
	pub quench_above: Option<f64>,
	/// The next this many `ramp_to_zero` calls fail
	pub zero_failures: usize,
	field: f64,
}

impl SimulatedMagnet {
	pub fn new() -> Self { Self::default() }
}

impl MagnetController for SimulatedMagnet {

	fn coil_constant(&self) -> f64 { DIRECT_COIL_CONSTANT }

	fn ramp_to_field(&mut self, field:f64) -> std::result::Result<(), DeviceCommunicationError> {
		self.commands.push(field);
		self.field = field;
		Ok(())
	}

	fn ramp_to_zero(&mut self) -> std::result::Result<(), DeviceCommunicationError> {
		if self.zero_failures > 0 {
			self.zero_failures -= 1;
			return Err(DeviceCommunicationError::response("simulated magnet did not accept RAMP:ZERO"));
		}
		self.ramp_to_field(0.0)
	}

	fn actual_field(&mut self) -> std::result::Result<f64, DeviceCommunicationError> { Ok(self.field) }

	fn set_persistent_switch(&mut self, heated:bool) -> std::result::Result<(), DeviceCommunicationError> {
		self.switch_heated = heated;
		Ok(())
	}

	fn quenched(&mut self) -> std::result::Result<bool, DeviceCommunicationError> {
		Ok(self.quench_above.map_or(false, |limit| self.field.abs() > limit))
	}

}
