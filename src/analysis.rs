//! Estimators applied to measured I-V branches.
//!
//! Everything here is heuristic and runs inside long unattended sweeps, so the
//! public estimators return a neutral `0` for degenerate input instead of an
//! error. Only [`LinearFitProblem::solve`] reports failure, for callers that
//! want to know.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PEAK_THRESHOLD:f64 = 1.5;

/// Discrete first derivative with unit spacing: central differences inside,
/// one-sided differences at both ends.
pub fn gradient(y:&[f64]) -> Vec<f64> {
	let n = y.len();
	match n {
		0 => Vec::new(),
		1 => vec![0.0],
		_ => (0..n).map(|i| {
			if i == 0 { y[1] - y[0] }
			else if i == n - 1 { y[n - 1] - y[n - 2] }
			else { (y[i + 1] - y[i - 1]) / 2.0 }
		}).collect(),
	}
}

/// Point-wise dV/dI along a branch. Points where the bias does not change give 0.
pub fn differential_resistance(currents:&[f64], voltages:&[f64]) -> Vec<f64> {
	let dv = gradient(voltages);
	let di = gradient(currents);
	dv.iter().zip(di.iter())
		.map(|(v, i)| if *i == 0.0 { 0.0 } else { v / i })
		.collect()
}

// 1-D least squares linear fit
#[derive(Debug, Default, Clone)]
pub struct LinearFitProblem {
	pub points: Vec<(f64, f64)>
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
	pub slope: f64,
	pub intercept: f64,
}

impl LinearFitProblem {

	pub fn from_xy(x:&[f64], y:&[f64]) -> Self {
		Self{ points: x.iter().copied().zip(y.iter().copied()).collect() }
	}

	pub fn solve(&self) -> Result<LinearFit, &'static str> {
		if self.points.is_empty() {
			return Err("No points to fit");
		}

		// Centre the data first; the raw normal equations lose every digit
		// when currents are ~1e-6 A
		let n = self.points.len() as f64;
		let mx = self.points.iter().map(|(x, _)| *x).sum::<f64>() / n;
		let my = self.points.iter().map(|(_, y)| *y).sum::<f64>() / n;
		let sxx:f64 = self.points.iter().map(|(x, _)| (x - mx).powi(2)).sum();
		let sxy:f64 = self.points.iter().map(|(x, y)| (x - mx) * (y - my)).sum();

		if sxx == 0.0 || !sxx.is_finite() || !sxy.is_finite() {
			Err("Singular least squares problem")
		} else {
			let slope = sxy / sxx;
			Ok(LinearFit{ slope, intercept: my - slope * mx })
		}
	}

}

/// Resistance of a branch as the magnitude of the fitted dV/dI slope; 0 when
/// the fit is singular or the input is unusable.
pub fn estimate_resistance(currents:&[f64], voltages:&[f64]) -> f64 {
	if currents.len() != voltages.len() {
		return 0.0;
	}
	LinearFitProblem::from_xy(currents, voltages).solve()
		.map(|fit| fit.slope.abs())
		.unwrap_or(0.0)
}

/// Locates the two switching points of a full I-V branch ordered by bias.
///
/// Indices whose |dV| exceeds `threshold` times the mean |dV| are candidates;
/// those in the lower half of the branch give the negative transition and the
/// rest give the positive one, each as the truncated mean candidate index.
/// Returns `(0, 0)` unless both halves have a candidate.
pub fn find_critical_currents(currents:&[f64], voltages:&[f64], threshold:f64) -> (f64, f64) {
	let n = voltages.len();
	if n == 0 || currents.len() < n || voltages.iter().any(|v| !v.is_finite()) {
		return (0.0, 0.0);
	}

	let r:Vec<f64> = gradient(voltages).into_iter().map(f64::abs).collect();
	let avg = r.iter().sum::<f64>() / n as f64;

	let half = n / 2;
	let mut left = (0usize, 0usize);
	let mut right = (0usize, 0usize);
	for (i, _) in r.iter().enumerate().filter(|(_, ri)| **ri > threshold * avg) {
		let side = if i < half { &mut left } else { &mut right };
		side.0 += i;
		side.1 += 1;
	}

	if left.1 == 0 || right.1 == 0 {
		return (0.0, 0.0);
	}
	(currents[left.0 / left.1], currents[right.0 / right.1])
}

/// Summary of critical currents collected over repeated sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalCurrentStats {
	pub count: usize,
	pub mean: f64,
	/// Population standard deviation
	pub std_dev: f64,
	pub min: f64,
	pub max: f64,
	/// `(bin lower edge, count)` with equal-width bins spanning `min..=max`
	pub histogram: Vec<(f64, usize)>,
}

impl CriticalCurrentStats {

	/// `None` if there are no finite samples or `bins` is zero.
	pub fn from_samples(samples:&[f64], bins:usize) -> Option<Self> {
		let values:Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
		if values.is_empty() || bins == 0 {
			return None;
		}

		let count = values.len();
		let mean = values.iter().sum::<f64>() / count as f64;
		let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
		let min = values.iter().copied().fold(f64::INFINITY, f64::min);
		let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

		let width = (max - min) / bins as f64;
		let mut counts = vec![0usize; bins];
		for v in values.iter() {
			let k = if width > 0.0 { (((v - min) / width) as usize).min(bins - 1) } else { 0 };
			counts[k] += 1;
		}
		let histogram = counts.into_iter().enumerate()
			.map(|(k, c)| (min + k as f64 * width, c))
			.collect();

		Some(Self{ count, mean, std_dev: var.sqrt(), min, max, histogram })
	}

}
