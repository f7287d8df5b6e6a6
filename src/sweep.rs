//! The triangular bias waveform and its critical/retrapping branch split.
//!
//! One period runs `0 → +max → -max → 0` as three segments built like
//! half-open `arange` ranges:
//!
//! ```text
//! up   = [0, max)     ascending
//! down = [max, -max)  descending
//! back = [-max, 0)    ascending
//! ```
//!
//! The down segment is cut in half, giving four quarters. Quarters 1 and 3
//! sweep away from zero and make up the critical branch; quarters 2 and 4
//! sweep toward zero and make up the retrapping branch. Branches are always
//! reassembled by index range, never by matching values.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// Absorbs float error in (stop - start) / step so that a value landing on the
// open end of a range is not emitted
const ARANGE_EPS:f64 = 1e-9;

/// Half-open `[start, stop)` range with a fixed (possibly negative) step.
pub(crate) fn arange(start:f64, stop:f64, step:f64) -> Vec<f64> {
	if step == 0.0 || !step.is_finite() {
		return Vec::new();
	}
	let n = ((stop - start) / step - ARANGE_EPS).ceil().max(0.0) as usize;
	(0..n).map(|i| start + i as f64 * step).collect()
}

/// `n` evenly spaced points including both ends.
pub(crate) fn linspace(start:f64, stop:f64, n:usize) -> Vec<f64> {
	match n {
		0 => Vec::new(),
		1 => vec![start],
		_ => (0..n).map(|i| start + (stop - start) * i as f64 / (n - 1) as f64).collect(),
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quarter {
	/// 0 → +max
	Q1,
	/// +max → 0
	Q2,
	/// 0 → -max
	Q3,
	/// -max → 0
	Q4,
}

impl Quarter {
	pub const ALL:[Quarter; 4] = [Quarter::Q1, Quarter::Q2, Quarter::Q3, Quarter::Q4];

	/// Quarters sweeping away from zero belong to the critical branch.
	pub fn is_critical(self) -> bool {
		matches!(self, Quarter::Q1 | Quarter::Q3)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segments {
	pub up: usize,
	pub down: usize,
	pub back: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSequence {
	max_amplitude: f64,
	step_size: f64,
	values: Vec<f64>,
	segments: Segments,
}

impl SweepSequence {

	pub fn build(max_amplitude:f64, step_size:f64) -> Result<Self> {
		if !step_size.is_finite() || step_size <= 0.0 {
			return Err(Error::invalid(format!("sweep step must be positive, got {}", step_size)));
		}
		if !max_amplitude.is_finite() || max_amplitude < 0.0 {
			return Err(Error::invalid(format!("sweep amplitude must be non-negative, got {}", max_amplitude)));
		}

		let (up, down, back) = if step_size >= max_amplitude {
			(vec![0.0], vec![max_amplitude, -max_amplitude], vec![0.0])
		} else {
			(
				arange(0.0, max_amplitude, step_size),
				arange(max_amplitude, -max_amplitude, -step_size),
				arange(-max_amplitude, 0.0, step_size),
			)
		};

		let segments = Segments{ up: up.len(), down: down.len(), back: back.len() };
		let mut values = up;
		values.extend(down);
		values.extend(back);

		Ok(Self{ max_amplitude, step_size, values, segments })
	}

	pub fn max_amplitude(&self) -> f64 { self.max_amplitude }

	pub fn step_size(&self) -> f64 { self.step_size }

	pub fn values(&self) -> &[f64] { &self.values }

	pub fn len(&self) -> usize { self.values.len() }

	pub fn is_empty(&self) -> bool { self.values.is_empty() }

	pub fn segments(&self) -> Segments { self.segments }

	pub fn iter(&self) -> impl Iterator<Item = f64> + '_ { self.values.iter().copied() }

	/// Index range of one quarter within [`values`](Self::values).
	pub fn quarter_range(&self, q:Quarter) -> Range<usize> {
		let Segments{ up, down, back } = self.segments;
		let mid = up + down / 2;
		match q {
			Quarter::Q1 => 0..up,
			Quarter::Q2 => up..mid,
			Quarter::Q3 => mid..up + down,
			Quarter::Q4 => up + down..up + down + back,
		}
	}

	pub fn quarter_of(&self, index:usize) -> Option<Quarter> {
		Quarter::ALL.iter().copied().find(|q| self.quarter_range(*q).contains(&index))
	}

	/// Sequence indices of the critical branch, ordered by ascending bias.
	pub fn critical_indices(&self) -> Vec<usize> {
		self.quarter_range(Quarter::Q3).rev()
			.chain(self.quarter_range(Quarter::Q1))
			.collect()
	}

	/// Sequence indices of the retrapping branch, ordered by ascending bias.
	pub fn retrapping_indices(&self) -> Vec<usize> {
		self.quarter_range(Quarter::Q4)
			.chain(self.quarter_range(Quarter::Q2).rev())
			.collect()
	}

	/// Splits any per-index data recorded along this sequence into
	/// `(critical, retrapping)` branches.
	///
	/// A partially recorded period (a cancelled sweep) is split as far as it
	/// goes; indices beyond the data are skipped.
	pub fn split<T: Clone>(&self, data:&[T]) -> (Vec<T>, Vec<T>) {
		let pick = |idx:Vec<usize>| idx.into_iter().filter_map(|i| data.get(i).cloned()).collect();
		(pick(self.critical_indices()), pick(self.retrapping_indices()))
	}

	/// Ascending bias values for plot axes: the down segment, reversed.
	pub fn current_axis(&self) -> Vec<f64> {
		let Segments{ up, down, .. } = self.segments;
		self.values[up..up + down].iter().map(|v| -v).collect()
	}

}

impl<'a> IntoIterator for &'a SweepSequence {
	type Item = &'a f64;
	type IntoIter = std::slice::Iter<'a, f64>;

	fn into_iter(self) -> Self::IntoIter { self.values.iter() }
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	#[test]
	fn builds_triangle_like_arange() {
		let s = SweepSequence::build(1.0, 0.5).unwrap();
		assert_eq!(s.values(), &[0.0, 0.5, 1.0, 0.5, 0.0, -0.5, -1.0, -0.5]);
		assert_eq!(s.segments(), Segments{ up: 2, down: 4, back: 2 });
	}

	#[test]
	fn quarters_follow_direction_of_travel() {
		let s = SweepSequence::build(1.0, 0.5).unwrap();
		assert_eq!(s.quarter_range(Quarter::Q1), 0..2);
		assert_eq!(s.quarter_range(Quarter::Q2), 2..4);
		assert_eq!(s.quarter_range(Quarter::Q3), 4..6);
		assert_eq!(s.quarter_range(Quarter::Q4), 6..8);
		assert_eq!(s.quarter_of(5), Some(Quarter::Q3));
		assert_eq!(s.quarter_of(8), None);
	}

	#[test]
	fn branches_are_ordered_by_bias() {
		let s = SweepSequence::build(1.0, 0.5).unwrap();
		let (crit, retr) = s.split(s.values());
		assert_eq!(crit, vec![-0.5, 0.0, 0.0, 0.5]);
		assert_eq!(retr, vec![-1.0, -0.5, 0.5, 1.0]);
	}

	#[test]
	fn degenerate_step_gives_pivots() {
		let s = SweepSequence::build(1.0, 2.0).unwrap();
		assert_eq!(s.values(), &[0.0, 1.0, -1.0, 0.0]);

		let zero = SweepSequence::build(0.0, 0.1).unwrap();
		assert_eq!(zero.len(), 4);
		assert!(zero.iter().all(|v| v == 0.0));
	}

	#[test]
	fn rejects_bad_parameters() {
		assert!(SweepSequence::build(1.0, 0.0).is_err());
		assert!(SweepSequence::build(1.0, -0.1).is_err());
		assert!(SweepSequence::build(-1.0, 0.1).is_err());
		assert!(SweepSequence::build(f64::NAN, 0.1).is_err());
	}

	#[test]
	fn current_axis_is_ascending() {
		let s = SweepSequence::build(1.0, 0.1).unwrap();
		let axis = s.current_axis();
		assert_eq!(axis.len(), 20);
		assert!(axis.windows(2).all(|w| w[1] > w[0]));
		assert!((axis[0] + 1.0).abs() < 1e-12);
	}

	#[test]
	fn partial_data_splits_without_panicking() {
		let s = SweepSequence::build(1.0, 0.5).unwrap();
		let (crit, retr) = s.split(&s.values()[..3]);
		assert_eq!(crit, vec![0.0, 0.5]);
		assert_eq!(retr, vec![1.0]);
	}

	proptest! {
		#[test]
		fn sequence_closes_near_zero(max in 1e-6f64..10.0, frac in 0.001f64..2.0) {
			let step = max * frac;
			let s = SweepSequence::build(max, step).unwrap();
			let first = s.values()[0];
			let last = *s.values().last().unwrap();
			prop_assert!(first.abs() <= step);
			prop_assert!(last.abs() <= step + 1e-12);

			let peak = s.iter().fold(0.0f64, |m, v| m.max(v.abs()));
			prop_assert!((peak - max).abs() <= step + 1e-12);
		}

		#[test]
		fn every_index_lands_in_exactly_one_branch(max in 1e-6f64..10.0, frac in 0.001f64..2.0) {
			let s = SweepSequence::build(max, max * frac).unwrap();
			let mut seen = vec![0u8; s.len()];
			for i in s.critical_indices().into_iter().chain(s.retrapping_indices()) {
				seen[i] += 1;
			}
			prop_assert!(seen.iter().all(|&c| c == 1));
			prop_assert_eq!(s.critical_indices().len() + s.retrapping_indices().len(), s.len());
		}
	}
}
