//! Persistence of finished measurements.
//!
//! Everything leaves the core as a [`DataTable`], an ordered set of named
//! columns. Tables are written as space separated text (one row per sample,
//! values in scientific notation with eight decimals), JSON or CBOR, into a
//! per-run directory laid out by [`OutputLayout`].

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use log::info;
use serde::{Deserialize, Serialize};

use crate::analysis::gradient;
use crate::error::Result;
use crate::measurement::{ConditionResult, FieldDirection, FieldTrace, IvCurve, ResistancePoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
	Dat,
	Json,
	Cbor,
}

impl OutputFormat {
	pub fn extension(self) -> &'static str {
		match self {
			OutputFormat::Dat => "dat",
			OutputFormat::Json => "json",
			OutputFormat::Cbor => "cbor",
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
	columns: Vec<(String, Vec<f64>)>,
}

impl DataTable {

	pub fn new() -> Self { Self::default() }

	pub fn with_column(mut self, name:impl Into<String>, values:Vec<f64>) -> Self {
		self.push_column(name, values);
		self
	}

	pub fn push_column(&mut self, name:impl Into<String>, values:Vec<f64>) {
		self.columns.push((name.into(), values));
	}

	pub fn columns(&self) -> &[(String, Vec<f64>)] { &self.columns }

	pub fn column(&self, name:&str) -> Option<&[f64]> {
		self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_slice())
	}

	/// Length of the longest column.
	pub fn rows(&self) -> usize {
		self.columns.iter().map(|(_, v)| v.len()).max().unwrap_or(0)
	}

	/// Header row, then one line per row. Short columns leave empty cells.
	///
	/// Values stay in SI units, so a fixed-point format would flatten
	/// nanoampere currents to zero.
	pub fn write_delimited<W: Write>(&self, mut w:W) -> io::Result<()> {
		let header:Vec<String> = self.columns.iter().map(|(n, _)| quote(n)).collect();
		writeln!(w, "{}", header.join(" "))?;
		for row in 0..self.rows() {
			let cells:Vec<String> = self.columns.iter()
				.map(|(_, v)| v.get(row).map(|x| format!("{:.8e}", x)).unwrap_or_default())
				.collect();
			writeln!(w, "{}", cells.join(" "))?;
		}
		Ok(())
	}

	pub fn to_json(&self) -> Result<String> {
		Ok(serde_json::to_string_pretty(self)?)
	}

	pub fn to_cbor(&self) -> Result<Vec<u8>> {
		Ok(serde_cbor::to_vec(self)?)
	}

	pub fn from_cbor(bytes:&[u8]) -> Result<Self> {
		Ok(serde_cbor::from_slice(bytes)?)
	}

	pub fn save(&self, path:&Path, format:OutputFormat) -> Result<()> {
		match format {
			OutputFormat::Dat => {
				let mut w = BufWriter::new(File::create(path)?);
				self.write_delimited(&mut w)?;
				w.flush()?;
			},
			OutputFormat::Json => fs::write(path, self.to_json()?)?,
			OutputFormat::Cbor => fs::write(path, self.to_cbor()?)?,
		}
		info!("Data were saved to {}", path.display());
		Ok(())
	}

}

fn quote(name:&str) -> String {
	if name.contains(char::is_whitespace) { format!("\"{}\"", name) } else { name.to_owned() }
}

/// One I-V curve in measurement order.
pub fn curve_table(curve:&IvCurve) -> DataTable {
	DataTable::new()
		.with_column("I, A", curve.currents())
		.with_column("U, V", curve.voltages())
}

/// One row per swept condition with everything extracted from its curve.
pub fn results_table(caption:&str, results:&[ConditionResult]) -> DataTable {
	DataTable::new()
		.with_column(caption, column(results, |r| r.condition))
		.with_column("T, K", column(results, |r| r.temperature.unwrap_or(0.0)))
		.with_column("Ic-, A", column(results, |r| r.critical.0))
		.with_column("Ic+, A", column(results, |r| r.critical.1))
		.with_column("Ir-, A", column(results, |r| r.retrapping.0))
		.with_column("Ir+, A", column(results, |r| r.retrapping.1))
		.with_column("R, Ohm", column(results, |r| r.resistance))
}

/// R(T) log, one row per curve.
pub fn resistance_table(points:&[ResistancePoint]) -> DataTable {
	DataTable::new()
		.with_column("R, Ohm", points.iter().map(|p| p.resistance).collect())
		.with_column("T, K", points.iter().map(|p| p.temperature).collect())
}

/// V(B) passes of one direction side by side on an ascending field axis,
/// a `V_<I>` and an `R_<I>` column per bias current. `None` if no pass went
/// that way.
pub fn field_scan_table(traces:&[FieldTrace], direction:FieldDirection) -> Option<DataTable> {
	let mut passes = traces.iter().filter(|t| t.direction == direction).peekable();
	let first = passes.peek()?;
	let ascending = |v:&[f64]| -> Vec<f64> {
		let mut v = v.to_vec();
		if direction == FieldDirection::Down {
			v.reverse();
		}
		v
	};

	let mut table = DataTable::new().with_column("B, G", ascending(&first.fields));
	for t in passes {
		table.push_column(format!("V_{:.5e}", t.current), ascending(&t.voltages));
		table.push_column(format!("R_{:.5e}", t.current), ascending(&t.resistances));
	}
	Some(table)
}

fn column<F: Fn(&ConditionResult) -> f64>(results:&[ConditionResult], f:F) -> Vec<f64> {
	results.iter().map(f).collect()
}

/// Replaces characters that are not allowed in file names.
pub fn sanitize(name:&str) -> String {
	name.chars()
		.map(|c| if matches!(c, ':' | '/' | '\\' | '*' | '?' | '"' | '<' | '>' | '|') { '_' } else { c })
		.collect()
}

/// `<root>/<dd-mm-YYYY>_<sample>/<HH-MM>_<measurement>/`
///
/// The timestamp is taken once so that every file of a run carries the same
/// date and minute.
#[derive(Debug, Clone)]
pub struct OutputLayout {
	dir: PathBuf,
	prefix: String,
}

impl OutputLayout {

	pub fn new(root:impl AsRef<Path>, sample:&str, measurement:&str, stamp:DateTime<Local>) -> Self {
		let sample = sanitize(sample);
		let measurement = sanitize(measurement);
		let dir = root.as_ref()
			.join(format!("{}_{}", stamp.format("%d-%m-%Y"), sample))
			.join(format!("{}_{}", stamp.format("%H-%M"), measurement));
		let prefix = format!("{}_{}", stamp.format("%d-%m-%Y_%H-%M"), measurement);
		Self{ dir, prefix }
	}

	pub fn dir(&self) -> &Path { &self.dir }

	pub fn create(&self) -> Result<&Path> {
		fs::create_dir_all(&self.dir)?;
		Ok(&self.dir)
	}

	/// A path that does not exist yet; `_1`, `_2`, ... are appended as needed.
	pub fn file_name(&self, caption:&str, ext:&str) -> PathBuf {
		let caption = sanitize(caption);
		let mut path = self.dir.join(format!("{}_{}.{}", self.prefix, caption, ext));
		let mut k = 0;
		while path.exists() {
			k += 1;
			path = self.dir.join(format!("{}_{}_{}.{}", self.prefix, caption, k, ext));
		}
		path
	}

	pub fn save(&self, caption:&str, table:&DataTable, format:OutputFormat) -> Result<PathBuf> {
		self.create()?;
		let path = self.file_name(caption, format.extension());
		table.save(&path, format)?;
		Ok(path)
	}

	/// Writes the parameter log as `<prefix>_params.log`.
	pub fn save_journal(&self, journal:&RunJournal) -> Result<PathBuf> {
		self.create()?;
		let path = self.file_name("params", "log");
		journal.save(&path)?;
		Ok(path)
	}

}

/// Voltage matrices over (bias, condition), one column per condition.
#[derive(Debug, Clone, Default)]
pub struct SweepMatrix {
	axis: Vec<f64>,
	critical_axis: Vec<f64>,
	retrapping_axis: Vec<f64>,
	conditions: Vec<f64>,
	raw: Vec<Vec<f64>>,
	critical: Vec<Vec<f64>>,
	retrapping: Vec<Vec<f64>>,
}

impl SweepMatrix {

	pub fn new() -> Self { Self::default() }

	pub fn from_results(results:&[ConditionResult]) -> Self {
		let mut m = Self::new();
		for r in results {
			m.push(r.condition, &r.curve);
		}
		m
	}

	/// Adds one condition. The row axes are taken from the first curve.
	pub fn push(&mut self, condition:f64, curve:&IvCurve) {
		let (crit_i, crit_v) = curve.critical_branch();
		let (retr_i, retr_v) = curve.retrapping_branch();
		if self.conditions.is_empty() {
			self.axis = curve.currents();
			self.critical_axis = crit_i;
			self.retrapping_axis = retr_i;
		}
		self.conditions.push(condition);
		self.raw.push(curve.voltages());
		self.critical.push(crit_v);
		self.retrapping.push(retr_v);
	}

	pub fn conditions(&self) -> &[f64] { &self.conditions }

	/// `(caption suffix, table)` for the raw, critical and retrapping voltages
	/// and the derivatives of both branches.
	pub fn tables(&self, rows_header:&str) -> Vec<(&'static str, DataTable)> {
		let build = |axis:&[f64], data:&[Vec<f64>], derive:bool| {
			let mut t = DataTable::new().with_column(rows_header, axis.to_vec());
			for (c, v) in self.conditions.iter().zip(data) {
				t.push_column(format!("{}", c), if derive { gradient(v) } else { v.clone() });
			}
			t
		};
		vec![
			("matrix", build(&self.axis, &self.raw, false)),
			("matrix_Ic", build(&self.critical_axis, &self.critical, false)),
			("matrix_Ir", build(&self.retrapping_axis, &self.retrapping, false)),
			("matrix_Ic_derivative", build(&self.critical_axis, &self.critical, true)),
			("matrix_Ir_derivative", build(&self.retrapping_axis, &self.retrapping, true)),
		]
	}

}

/// Parameter log of a run, one line per entry.
#[derive(Debug, Clone, Default)]
pub struct RunJournal {
	lines: Vec<String>,
}

impl RunJournal {

	pub fn new() -> Self { Self::default() }

	pub fn add_entry(&mut self, text:impl Into<String>) { self.lines.push(text.into()); }

	/// `B = 10 G; temp = 0.02`
	pub fn add_parameters(&mut self, caption:&str, value:f64, units:&str, params:&[(&str, String)]) {
		let mut line = format!("{} = {} {}", caption, value, units);
		for (name, v) in params {
			line.push_str(&format!("; {} = {}", name, v));
		}
		self.lines.push(line);
	}

	pub fn lines(&self) -> &[String] { &self.lines }

	pub fn save(&self, path:&Path) -> Result<()> {
		let mut w = BufWriter::new(File::create(path)?);
		for line in &self.lines {
			writeln!(w, "{}", line)?;
		}
		w.flush()?;
		info!("Log was saved to {}", path.display());
		Ok(())
	}

}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	fn trace(current:f64, direction:FieldDirection, fields:Vec<f64>) -> FieldTrace {
		let voltages:Vec<f64> = fields.iter().map(|b| b / 1000.0).collect();
		let resistances = voltages.iter().map(|v| v / current).collect();
		FieldTrace{ current, direction, fields, voltages, resistances }
	}

	#[test]
	fn field_scan_tables_align_passes_on_ascending_field() {
		let traces = vec![
			trace(1.0e-6, FieldDirection::Up, vec![-50.0, 0.0]),
			trace(1.0e-6, FieldDirection::Down, vec![50.0, 0.0]),
			trace(2.0e-6, FieldDirection::Up, vec![-50.0, 0.0]),
		];
		let up = field_scan_table(&traces, FieldDirection::Up).unwrap();
		let names:Vec<&str> = up.columns().iter().map(|(n, _)| n.as_str()).collect();
		assert_eq!(names, vec!["B, G", "V_1.00000e-6", "R_1.00000e-6", "V_2.00000e-6", "R_2.00000e-6"]);
		assert_eq!(up.column("V_2.00000e-6"), Some(&[-0.05, 0.0][..]));

		let down = field_scan_table(&traces, FieldDirection::Down).unwrap();
		assert_eq!(down.column("B, G"), Some(&[0.0, 50.0][..]));
		assert_eq!(down.column("V_1.00000e-6"), Some(&[0.0, 0.05][..]));

		assert!(field_scan_table(&traces[..1], FieldDirection::Down).is_none());
	}

	#[test]
	fn resistance_log_table_columns() {
		let points = vec![
			ResistancePoint{ temperature: 4.2, resistance: 10.0, timestamp: Local::now() },
			ResistancePoint{ temperature: 5.0, resistance: 12.0, timestamp: Local::now() },
		];
		let t = resistance_table(&points);
		assert_eq!(t.column("R, Ohm"), Some(&[10.0, 12.0][..]));
		assert_eq!(t.column("T, K"), Some(&[4.2, 5.0][..]));
	}

	#[test]
	fn delimited_output_has_header_and_scientific_values() {
		let t = DataTable::new()
			.with_column("I, A", vec![1.0e-6, 2.0e-6])
			.with_column("U", vec![0.5]);
		let mut out = Vec::new();
		t.write_delimited(&mut out).unwrap();
		assert_eq!(String::from_utf8(out).unwrap(), "\"I, A\" U\n1.00000000e-6 5.00000000e-1\n2.00000000e-6 \n");
	}

	#[test]
	fn nanoscale_values_survive_delimited_output() {
		let currents = vec![1.5e-9, 2.5e-9, -1.234567891e-8];
		let voltages = vec![3.0e-9, 0.0, -7.0e-12];
		let t = DataTable::new()
			.with_column("I, A", currents.clone())
			.with_column("U, V", voltages.clone());
		let mut out = Vec::new();
		t.write_delimited(&mut out).unwrap();

		let text = String::from_utf8(out).unwrap();
		let rows:Vec<Vec<f64>> = text.lines().skip(1)
			.map(|l| l.split(' ').map(|c| c.parse::<f64>().unwrap()).collect())
			.collect();
		assert_eq!(rows.len(), 3);
		for (row, (i, u)) in rows.iter().zip(currents.iter().zip(voltages.iter())) {
			assert!((row[0] - i).abs() <= i.abs() * 1e-8, "{} vs {}", row[0], i);
			assert!((row[1] - u).abs() <= u.abs() * 1e-8, "{} vs {}", row[1], u);
		}
		assert_ne!(rows[0][0], 0.0);
	}

	#[test]
	fn cbor_round_trip_keeps_column_order() {
		let t = DataTable::new().with_column("z", vec![1.0]).with_column("a", vec![2.0, 3.0]);
		let back = DataTable::from_cbor(&t.to_cbor().unwrap()).unwrap();
		assert_eq!(back, t);
		assert_eq!(back.columns()[0].0, "z");
	}

	#[test]
	fn layout_uses_date_and_sample_folders() {
		let stamp = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap();
		let layout = OutputLayout::new("/data", "S1:A/B", "I_V_B", stamp);
		assert_eq!(layout.dir(), Path::new("/data/07-03-2024_S1_A_B/09-05_I_V_B"));
		assert_eq!(layout.file_name("params", "log"), Path::new("/data/07-03-2024_S1_A_B/09-05_I_V_B/07-03-2024_09-05_I_V_B_params.log"));
	}

	#[test]
	fn existing_files_get_a_counter() {
		let root = tempfile::tempdir().unwrap();
		let stamp = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 0).unwrap();
		let layout = OutputLayout::new(root.path(), "chip", "I_V", stamp);
		let table = DataTable::new().with_column("x", vec![1.0]);

		let first = layout.save("data", &table, OutputFormat::Dat).unwrap();
		let second = layout.save("data", &table, OutputFormat::Dat).unwrap();
		assert_ne!(first, second);
		assert!(second.to_string_lossy().ends_with("_data_1.dat"));
		assert_eq!(fs::read_to_string(&first).unwrap(), "x\n1.00000000e0\n");
	}

	#[test]
	fn journal_alone_creates_the_run_folder() {
		let root = tempfile::tempdir().unwrap();
		let layout = OutputLayout::new(root.path(), "chip", "I_V", Local::now());
		assert!(!layout.dir().exists());
		let mut j = RunJournal::new();
		j.add_entry("Gain=1");
		let path = layout.save_journal(&j).unwrap();
		assert_eq!(fs::read_to_string(path).unwrap(), "Gain=1\n");
	}

	#[test]
	fn journal_formats_parameter_lines() {
		let mut j = RunJournal::new();
		j.add_parameters("B", 10.0, "G", &[("temp", "0.02".to_owned())]);
		assert_eq!(j.lines(), &["B = 10 G; temp = 0.02".to_owned()]);
	}

	#[test]
	fn sanitize_replaces_reserved_characters() {
		assert_eq!(sanitize("a:b/c\\d*e?f\"g<h>i|j"), "a_b_c_d_e_f_g_h_i_j");
	}
}
