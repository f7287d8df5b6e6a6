use std::ops::{Deref, DerefMut};

use log::{error, info, warn};

use crate::equipment::{BiasSource, SignalGenerator};
use crate::error::Result;

/// Borrows a piece of equipment for the length of a measurement and makes it
/// safe again when the borrow ends.
///
/// [`finish`](Self::finish) runs the cleanup on a normal exit. If the guard
/// is dropped without it (an error was propagated with `?`, or the run was
/// cancelled) the same cleanup runs from `Drop`.
pub struct CleanupGuard<'a, T: ?Sized, F>
where F: FnMut(&mut T) -> Result<()> {
	what: &'static str,
	value: &'a mut T,
	cleanup: F,
	armed: bool,
}

impl<'a, T: ?Sized, F> CleanupGuard<'a, T, F>
where F: FnMut(&mut T) -> Result<()> {

	pub fn new(what:&'static str, value:&'a mut T, cleanup:F) -> Self {
		Self{ what, value, cleanup, armed: true }
	}

	/// Runs the cleanup now and disarms the guard.
	pub fn finish(mut self) -> Result<()> {
		self.armed = false;
		(self.cleanup)(&mut *self.value)?;
		info!("{} left in a safe state", self.what);
		Ok(())
	}

	/// Hands the equipment back without cleaning up.
	pub fn disarm(mut self) { self.armed = false; }

}

impl<'a, T: ?Sized, F> Deref for CleanupGuard<'a, T, F>
where F: FnMut(&mut T) -> Result<()> {
	type Target = T;

	fn deref(&self) -> &T { &*self.value }
}

impl<'a, T: ?Sized, F> DerefMut for CleanupGuard<'a, T, F>
where F: FnMut(&mut T) -> Result<()> {
	fn deref_mut(&mut self) -> &mut T { &mut *self.value }
}

impl<'a, T: ?Sized, F> Drop for CleanupGuard<'a, T, F>
where F: FnMut(&mut T) -> Result<()> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}
		warn!("Measurement interrupted, turning {} off", self.what);
		if let Err(e) = (self.cleanup)(&mut *self.value) {
			error!("Could not make {} safe: {}", self.what, e);
		}
	}
}

/// Cleanup for a bias source: output to zero.
pub fn zero_output<B: BiasSource + ?Sized>(source:&mut B) -> Result<()> {
	source.set_output(0.0)?;
	Ok(())
}

/// Cleanup for a microwave generator: RF output off.
pub fn rf_off<G: SignalGenerator + ?Sized>(generator:&mut G) -> Result<()> {
	generator.set_rf_output(false)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::equipment::RecordingAdapter;
	use crate::error::Error;

	fn fails_midway(source:&mut RecordingAdapter) -> Result<()> {
		let mut guard = CleanupGuard::new("bias source", source, zero_output);
		guard.set_output(1.0)?;
		Err(Error::Cancelled)
	}

	#[test]
	fn early_return_runs_cleanup() {
		let mut source = RecordingAdapter::new();
		assert!(fails_midway(&mut source).is_err());
		assert_eq!(source.commands(), vec![1.0, 0.0]);
	}

	#[test]
	fn finish_cleans_once() {
		let mut source = RecordingAdapter::new();
		let mut guard = CleanupGuard::new("bias source", &mut source, zero_output);
		guard.set_output(0.5).unwrap();
		guard.finish().unwrap();
		assert_eq!(source.commands(), vec![0.5, 0.0]);
	}

	#[test]
	fn disarmed_guard_leaves_output_alone() {
		let mut source = RecordingAdapter::new();
		let mut guard = CleanupGuard::new("bias source", &mut source, zero_output);
		guard.set_output(0.5).unwrap();
		guard.disarm();
		assert_eq!(source.commands(), vec![0.5]);
	}
}
