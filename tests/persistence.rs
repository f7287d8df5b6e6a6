use std::fs;
use std::time::Duration;

use chrono::{Local, TimeZone};

use cryosweep::config::RunConfig;
use cryosweep::equipment::{JunctionParams, RecordingAdapter, SimulatedJunction};
use cryosweep::field::{FieldSweeper, GradualParams, GradualStrategy};
use cryosweep::measurement::{run_field_sweep, IvSweep, MeasurementContext};
use cryosweep::persist::{curve_table, results_table, DataTable, OutputFormat, OutputLayout, RunJournal, SweepMatrix};

fn quick_config() -> RunConfig {
	RunConfig::from_json_str(r#"{ "bias": { "max_amplitude": 2e-6, "step": 1e-7, "step_delay": 0 } }"#).unwrap()
}

#[test]
fn curve_is_written_in_every_format() {
	let cfg = quick_config();
	let iv = IvSweep::new(cfg.iv_params()).unwrap();
	let curve = iv.run(&mut SimulatedJunction::new(JunctionParams::default()), &MeasurementContext::default()).unwrap();
	let table = curve_table(&curve);

	let root = tempfile::tempdir().unwrap();
	let stamp = Local.with_ymd_and_hms(2023, 11, 2, 14, 30, 0).unwrap();
	let layout = OutputLayout::new(root.path(), "JJ 4", "I_V", stamp);

	let dat = layout.save("data", &table, OutputFormat::Dat).unwrap();
	let text = fs::read_to_string(&dat).unwrap();
	let mut lines = text.lines();
	assert_eq!(lines.next(), Some("\"I, A\" \"U, V\""));
	assert_eq!(lines.count(), curve.points().len());
	assert!(dat.starts_with(root.path().join("02-11-2023_JJ 4").join("14-30_I_V")));

	let json = layout.save("data", &table, OutputFormat::Json).unwrap();
	let back:DataTable = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
	assert_eq!(back.column("U, V").map(|v| v.len()), Some(curve.points().len()));

	let cbor = layout.save("data", &table, OutputFormat::Cbor).unwrap();
	assert_eq!(DataTable::from_cbor(&fs::read(&cbor).unwrap()).unwrap(), table);
}

#[test]
fn field_sweep_matrices_and_journal() {
	let cfg = quick_config();
	let iv = IvSweep::new(cfg.iv_params()).unwrap();
	let params = GradualParams{ ramp_steps: 2, ramp_delay: Duration::ZERO, ..GradualParams::default() };
	let mut sweeper = FieldSweeper::new(GradualStrategy::new(RecordingAdapter::new(), params).unwrap(), vec![-10.0, 0.0, 10.0]).unwrap();
	let mut junction = SimulatedJunction::new(JunctionParams::default());
	let results = run_field_sweep(&iv, &mut junction, &mut sweeper, &MeasurementContext::default()).unwrap();

	let summary = results_table("B, G", &results);
	assert_eq!(summary.column("B, G"), Some(&[-10.0, 0.0, 10.0][..]));
	assert_eq!(summary.rows(), 3);

	let matrix = SweepMatrix::from_results(&results);
	let tables = matrix.tables("I, A");
	let names:Vec<&str> = tables.iter().map(|(n, _)| *n).collect();
	assert_eq!(names, vec!["matrix", "matrix_Ic", "matrix_Ir", "matrix_Ic_derivative", "matrix_Ir_derivative"]);
	for (_, t) in tables.iter() {
		// current axis plus one column per field
		assert_eq!(t.columns().len(), 4);
	}
	let (crit_i, _) = results[0].curve.critical_branch();
	assert_eq!(tables[1].1.column("I, A"), Some(crit_i.as_slice()));

	let root = tempfile::tempdir().unwrap();
	let layout = OutputLayout::new(root.path(), "chip", "I_V_B", Local::now());
	let mut journal = RunJournal::new();
	journal.add_entry("CurrentRange=0.000002; CurrentStep=0.0000001; Gain=1; IVPointDelay=0 sec");
	for r in results.iter() {
		journal.add_parameters("B", r.condition, "G", &[]);
	}
	layout.create().unwrap();
	let path = layout.file_name("params", "log");
	journal.save(&path).unwrap();
	let text = fs::read_to_string(&path).unwrap();
	assert_eq!(text.lines().nth(2), Some("B = 0 G"));
}
