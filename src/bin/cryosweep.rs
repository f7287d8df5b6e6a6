use std::path::PathBuf;

use chrono::Local;
use clap::{Parser, Subcommand};
use log::{error, info};

use cryosweep::config::{ControllerModel, FieldStrategyKind, InstrumentsConfig, RunConfig};
use cryosweep::devices::{self, Ami430, FieldUnits, InputChannel, Keithley2182A, Keithley6200, KeysightE3633A, KeysightN51, LakeShore335, LakeShore370, SourceFunction, SourceMode, YokogawaGs200};
use cryosweep::equipment::{AdapterKind, Bench, BiasSource, EquipmentAdapter, NullAdapter, RecordingGenerator, SignalGenerator, SimulatedJunction};
use cryosweep::error::Result;
use cryosweep::field::{DirectStrategy, FieldStrategy, FieldSweeper, GradualStrategy, SimulatedMagnet};
use cryosweep::measurement::{self, zero_output, CancelToken, CleanupGuard, ConditionResult, FieldDirection, IvSweep, MeasurementContext, PlotFeed, RfSweepKind, ThermometerLogger};
use cryosweep::persist::{self, DataTable, OutputLayout, RunJournal, SweepMatrix};
use cryosweep::temperature::{OperatingMode, SimulatedCryostat, TemperatureController, TemperatureDevice, TemperatureOptions};

/// Critical current and resistance of a junction against field, temperature or time
#[derive(Parser)]
#[command(name = "cryosweep")]
#[command(author, version, about, long_about = None)]
struct Cli {
	/// Verbosity level (-v for info, -vv for debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,

	/// JSON run configuration; built-in defaults if omitted
	#[arg(long, value_name = "FILE")]
	config: Option<PathBuf>,

	/// Use the simulated junction, magnet and cryostat instead of instruments
	#[arg(long)]
	simulate: bool,

	/// Sample name used for the output folder
	#[arg(long)]
	sample: Option<String>,

	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// A single I-V curve
	Iv,
	/// One I-V curve per field from -range to +range
	Field,
	/// One I-V curve per stabilised temperature setpoint
	Temperature,
	/// Repeated I-V curves and the spread of the critical current
	Stats {
		/// Number of curves, overrides the config
		#[arg(short = 'n', long)]
		count: Option<usize>,
	},
	/// One I-V curve per gate voltage from -amplitude to +amplitude
	Gate,
	/// One I-V curve per microwave power or frequency
	Shapiro,
	/// R(T) while the cryostat drifts, until the temperature limit or the curve count
	Rt {
		/// Number of curves, overrides the config
		#[arg(short = 'n', long)]
		count: Option<usize>,
	},
	/// Voltage against field at a list of fixed bias currents
	Vb,
}

fn main() -> Result<()> {
	let cli = Cli::parse();

	let log_level = match cli.verbose {
		0 => "warn",
		1 => "info",
		_ => "debug",
	};
	env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

	let mut cfg = match &cli.config {
		Some(path) => RunConfig::from_file(path)?,
		None => RunConfig::default(),
	};
	if cli.simulate {
		cfg.instruments.adapter = AdapterKind::Simulated;
	}
	if let Some(sample) = cli.sample {
		cfg.output.sample = sample;
	}

	let ctx = MeasurementContext::new(CancelToken::new(), PlotFeed::disconnected());
	let res = match cli.command {
		Commands::Iv => run_iv(&cfg, &ctx),
		Commands::Field => run_field(&cfg, &ctx),
		Commands::Temperature => run_temperature(&cfg, &ctx),
		Commands::Stats{ count } => run_stats(&cfg, count.unwrap_or(cfg.stats.count), &ctx),
		Commands::Gate => run_gate(&cfg, &ctx),
		Commands::Shapiro => run_shapiro(&cfg, &ctx),
		Commands::Rt{ count } => run_rt(&cfg, count.or(cfg.resistance_log.max_curves), &ctx),
		Commands::Vb => run_vb(&cfg, &ctx),
	};
	if let Err(e) = &res {
		error!("Measurement failed: {}", e);
	}
	res
}

fn open_adapter(cfg:&RunConfig) -> Result<Box<dyn EquipmentAdapter>> {
	let inst = &cfg.instruments;
	match inst.adapter {
		AdapterKind::Null => Ok(Box::new(NullAdapter::new())),
		AdapterKind::Simulated => Ok(Box::new(SimulatedJunction::new(inst.junction))),
		AdapterKind::Vxi11 => {
			let source_session = devices::open(InstrumentsConfig::host(&inst.source, "bias source")?, inst.throttle())?;
			let sense = Keithley2182A::new(devices::open(InstrumentsConfig::host(&inst.voltmeter, "voltmeter")?, inst.throttle())?)?;
			match cfg.bias.load_resistance {
				// Bias in volts through a series resistor
				Some(_) => {
					let source = YokogawaGs200::new(source_session, SourceFunction::Voltage, "1E+0")?;
					Ok(Box::new(Bench::new(source, sense)))
				},
				None => {
					let source = Keithley6200::new(source_session, SourceMode::Current, cfg.bias.max_amplitude)?;
					Ok(Box::new(Bench::new(source, sense)))
				},
			}
		},
	}
}

fn open_field_strategy(cfg:&RunConfig) -> Result<Box<dyn FieldStrategy>> {
	let f = &cfg.field;
	let inst = &cfg.instruments;
	match (inst.adapter, f.strategy) {
		(AdapterKind::Vxi11, FieldStrategyKind::Gradual) => {
			let supply = KeysightE3633A::new(devices::open(InstrumentsConfig::host(&inst.magnet, "magnet supply")?, inst.throttle())?)?;
			Ok(Box::new(GradualStrategy::new(supply, f.gradual_params())?))
		},
		(AdapterKind::Vxi11, FieldStrategyKind::Direct) => {
			let magnet = Ami430::new(devices::open(InstrumentsConfig::host(&inst.magnet, "magnet controller")?, inst.throttle())?, FieldUnits::KiloGauss)?
				.with_coil_constant(f.effective_coil_constant());
			Ok(Box::new(DirectStrategy::new(magnet, f.direct_params())?))
		},
		(_, FieldStrategyKind::Gradual) => Ok(Box::new(GradualStrategy::new(NullAdapter::new(), f.gradual_params())?)),
		(_, FieldStrategyKind::Direct) => Ok(Box::new(DirectStrategy::new(SimulatedMagnet::new(), f.direct_params())?)),
	}
}

fn open_thermometer(cfg:&RunConfig) -> Result<Box<dyn TemperatureDevice>> {
	let t = &cfg.temperature;
	let inst = &cfg.instruments;
	if inst.adapter != AdapterKind::Vxi11 {
		return Ok(Box::new(SimulatedCryostat::at(t.start.unwrap_or(0.05))));
	}

	let session = devices::open(InstrumentsConfig::host(&inst.thermometer, "temperature controller")?, inst.throttle())?;
	match t.controller {
		ControllerModel::Ls370 => Ok(Box::new(LakeShore370::new(session, t.channel)?)),
		ControllerModel::Ls335 => {
			let input = if t.channel == 2 { InputChannel::B } else { InputChannel::A };
			Ok(Box::new(LakeShore335::new(session, input, t.heater)?))
		},
	}
}

fn open_gate(cfg:&RunConfig) -> Result<Box<dyn BiasSource>> {
	let inst = &cfg.instruments;
	match inst.adapter {
		AdapterKind::Vxi11 => {
			let session = devices::open(InstrumentsConfig::host(&inst.gate, "gate source")?, inst.throttle())?;
			Ok(Box::new(YokogawaGs200::new(session, SourceFunction::Voltage, &cfg.gate.range)?))
		},
		_ => Ok(Box::new(NullAdapter::new())),
	}
}

fn open_generator(cfg:&RunConfig) -> Result<Box<dyn SignalGenerator>> {
	let inst = &cfg.instruments;
	match inst.adapter {
		AdapterKind::Vxi11 => {
			let session = devices::open(InstrumentsConfig::host(&inst.generator, "microwave generator")?, inst.throttle())?;
			Ok(Box::new(KeysightN51::new(session)?))
		},
		_ => Ok(Box::new(RecordingGenerator::new())),
	}
}

fn journal(cfg:&RunConfig) -> RunJournal {
	let b = &cfg.bias;
	let mut j = RunJournal::new();
	j.add_entry(format!("CurrentRange={}; CurrentStep={}; Gain={}; IVPointDelay={} sec", b.max_amplitude, b.step, b.gain, b.step_delay));
	j
}

fn save(cfg:&RunConfig, layout:&OutputLayout, caption:&str, table:&DataTable) -> Result<()> {
	for format in cfg.output.formats.iter() {
		layout.save(caption, table, *format)?;
	}
	Ok(())
}

fn save_sweep(cfg:&RunConfig, layout:&OutputLayout, caption:&str, results:&[ConditionResult], journal:&RunJournal) -> Result<()> {
	save(cfg, layout, "data", &persist::results_table(caption, results))?;
	if cfg.output.matrices {
		for (suffix, table) in SweepMatrix::from_results(results).tables("I, A").iter() {
			save(cfg, layout, suffix, table)?;
		}
	}
	layout.save_journal(journal)?;
	Ok(())
}

fn run_iv(cfg:&RunConfig, ctx:&MeasurementContext) -> Result<()> {
	let iv = IvSweep::new(cfg.iv_params())?;
	let mut adapter = open_adapter(cfg)?;
	let curve = {
		let mut source = CleanupGuard::new("bias source", &mut adapter, zero_output);
		let curve = iv.run(&mut *source, ctx)?;
		source.finish()?;
		curve
	};

	let (ic_neg, ic_pos) = curve.critical_currents(cfg.bias.threshold);
	info!("Ic- {} A, Ic+ {} A, R {} Ohm", ic_neg, ic_pos, curve.resistance(cfg.bias.resistance_fraction));

	let layout = OutputLayout::new(&cfg.output.directory, &cfg.output.sample, "I_V", Local::now());
	save(cfg, &layout, "data", &persist::curve_table(&curve))?;
	layout.save_journal(&journal(cfg))?;
	Ok(())
}

fn run_field(cfg:&RunConfig, ctx:&MeasurementContext) -> Result<()> {
	let iv = IvSweep::new(cfg.iv_params())?;
	let mut adapter = open_adapter(cfg)?;
	let mut sweeper = FieldSweeper::new(open_field_strategy(cfg)?, cfg.field.fields()?)?;
	let layout = OutputLayout::new(&cfg.output.directory, &cfg.output.sample, "I_V_B", Local::now());

	let results = measurement::run_field_sweep(&iv, &mut adapter, &mut sweeper, ctx)?;

	let mut j = journal(cfg);
	for r in results.iter() {
		let temp = r.temperature.map(|t| t.to_string()).unwrap_or_else(|| "-".to_owned());
		j.add_parameters("B", r.condition, "G", &[("temp", temp)]);
	}
	save_sweep(cfg, &layout, "B, G", &results, &j)
}

fn run_temperature(cfg:&RunConfig, ctx:&MeasurementContext) -> Result<()> {
	let iv = IvSweep::new(cfg.iv_params())?;
	let mut adapter = open_adapter(cfg)?;
	let mut controller = TemperatureController::new(open_thermometer(cfg)?, cfg.temperature.options())?;
	let layout = OutputLayout::new(&cfg.output.directory, &cfg.output.sample, "I_V_T", Local::now());

	let logger = ThermometerLogger::spawn(controller.sensor(), cfg.temperature.log_period(), ctx.cancel.clone(), ctx.feed.clone())?;
	let sweep_ctx = ctx.clone().with_temperatures(logger.window());

	let res = measurement::run_temperature_sweep(&iv, &mut adapter, &mut controller, &sweep_ctx);
	let readings = logger.stop();
	controller.shutdown()?;
	let results = res?;

	let mut j = journal(cfg);
	for r in results.iter() {
		j.add_parameters("T", r.condition, "K", &[]);
	}
	save_sweep(cfg, &layout, "T, K", &results, &j)?;

	let log = DataTable::new()
		.with_column("t, s", readings.iter().map(|s| s.elapsed).collect())
		.with_column("T, K", readings.iter().map(|s| s.temperature).collect());
	save(cfg, &layout, "thermometer", &log)
}

fn run_stats(cfg:&RunConfig, count:usize, ctx:&MeasurementContext) -> Result<()> {
	let iv = IvSweep::new(cfg.iv_params())?;
	let mut adapter = open_adapter(cfg)?;
	let layout = OutputLayout::new(&cfg.output.directory, &cfg.output.sample, "Ic_stats", Local::now());

	let run = measurement::run_repeated(&iv, &mut adapter, count, cfg.stats.threshold, cfg.stats.bins, ctx)?;

	let mut j = journal(cfg);
	if let Some(s) = &run.stats {
		j.add_entry(format!("Ic+ = {} A; std = {} A; min = {} A; max = {} A; N = {}", s.mean, s.std_dev, s.min, s.max, s.count));
		let histogram = DataTable::new()
			.with_column("Ic, A", s.histogram.iter().map(|(edge, _)| *edge).collect())
			.with_column("N", s.histogram.iter().map(|(_, n)| *n as f64).collect());
		save(cfg, &layout, "histogram", &histogram)?;
	}
	save(cfg, &layout, "data", &persist::results_table("N", &run.results))?;
	layout.save_journal(&j)?;
	Ok(())
}

fn run_gate(cfg:&RunConfig, ctx:&MeasurementContext) -> Result<()> {
	let iv = IvSweep::new(cfg.iv_params())?;
	let mut adapter = open_adapter(cfg)?;
	let mut gate = open_gate(cfg)?;
	let layout = OutputLayout::new(&cfg.output.directory, &cfg.output.sample, "I_V_Gate", Local::now());

	let results = measurement::run_gate_sweep(&iv, &mut adapter, &mut gate, &cfg.gate.voltages(), ctx)?;

	let mut j = journal(cfg);
	j.add_entry(format!("GateAmplitude={} V; GatePoints={}", cfg.gate.amplitude, cfg.gate.points));
	for r in results.iter() {
		j.add_parameters("V_gate", r.condition, "V", &[]);
	}
	save_sweep(cfg, &layout, "V_gate, V", &results, &j)
}

fn run_shapiro(cfg:&RunConfig, ctx:&MeasurementContext) -> Result<()> {
	let iv = IvSweep::new(cfg.iv_params())?;
	let plan = cfg.shapiro.plan()?;
	let mut adapter = open_adapter(cfg)?;
	let mut generator = open_generator(cfg)?;
	let layout = OutputLayout::new(&cfg.output.directory, &cfg.output.sample, plan.kind.measurement(), Local::now());

	let results = measurement::run_shapiro_sweep(&iv, &mut adapter, &mut generator, &plan, ctx)?;

	let mut j = journal(cfg);
	j.add_entry(format!("Swept {} over [{}, {}) step {}; fixed {}", plan.kind.caption(), cfg.shapiro.start, cfg.shapiro.stop, cfg.shapiro.step, plan.fixed));
	let (name, units) = match plan.kind {
		RfSweepKind::Power => ("P", "dBm"),
		RfSweepKind::Frequency => ("f", "GHz"),
	};
	for r in results.iter() {
		j.add_parameters(name, r.condition, units, &[]);
	}
	save_sweep(cfg, &layout, plan.kind.caption(), &results, &j)
}

fn run_rt(cfg:&RunConfig, max_curves:Option<usize>, ctx:&MeasurementContext) -> Result<()> {
	let iv = IvSweep::new(cfg.iv_params())?;
	let mut adapter = open_adapter(cfg)?;
	let opts = TemperatureOptions{ mode: OperatingMode::Passive, ..cfg.temperature.options() };
	let controller = TemperatureController::new(open_thermometer(cfg)?, opts)?;
	let layout = OutputLayout::new(&cfg.output.directory, &cfg.output.sample, "R_T", Local::now());
	let params = measurement::ResistanceLogParams{ max_curves, ..cfg.resistance_log.params() };

	let points = measurement::run_resistance_log(&iv, &mut adapter, &controller, &params, ctx)?;

	let mut j = journal(cfg);
	j.add_entry(format!("Interval={} sec; MaxTemperature={} K", cfg.resistance_log.interval, params.max_temperature));
	save(cfg, &layout, "data", &persist::resistance_table(&points))?;
	layout.save_journal(&j)?;
	Ok(())
}

fn run_vb(cfg:&RunConfig, ctx:&MeasurementContext) -> Result<()> {
	let params = cfg.field_scan.params();
	let mut adapter = open_adapter(cfg)?;
	let mut strategy = open_field_strategy(cfg)?;
	let layout = OutputLayout::new(&cfg.output.directory, &cfg.output.sample, "V_B", Local::now());

	let traces = measurement::run_field_scan(&params, &cfg.iv_params(), &mut adapter, &mut strategy, ctx)?;

	let mut j = journal(cfg);
	j.add_entry(format!("Field=[{}, {}) step {} G; Mode={:?}", params.from, params.to, params.step, params.mode));
	for t in traces.iter() {
		j.add_parameters("I", t.current, "A", &[("direction", format!("{:?}", t.direction))]);
	}
	for (direction, caption) in [(FieldDirection::Up, "data_up"), (FieldDirection::Down, "data_down")].iter() {
		if let Some(table) = persist::field_scan_table(&traces, *direction) {
			save(cfg, &layout, caption, &table)?;
		}
	}
	layout.save_journal(&j)?;
	Ok(())
}
