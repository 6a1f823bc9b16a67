//! Gridsim - Power Network Simulator
//!
//! Runs the reference scenario: a 10 kV source behind 1 Ω feeds a load
//! through an inductive line. At the switch time a second load is connected
//! in parallel through a switch.
//!
//! # Usage
//!
//! ```bash
//! gridsim --time-step 1e-3 --final-time 0.3 --switch-time 0.1 > samples.csv
//! ```

use std::io::Write;

use clap::Parser;
use gridsim_core::components::{
    Inductor, MnaComponent, Resistor, Switch, VoltageSourceNorton,
};
use gridsim_core::simulation::WriterSink;
use gridsim_core::{
    BackendKind, Complex64, DataLogger, Domain, GridError, MnaScalar, Result, RunSummary,
    SchedulerKind, Simulation, SimulationConfig, SolverConfig, SystemTopology,
    DEFAULT_FREQUENCY,
};
use log::{info, LevelFilter, Log, Metadata, Record};

/// Source voltage in V
const SOURCE_VOLTAGE: f64 = 10_000.0;
/// Source internal resistance in Ω
const SOURCE_RESISTANCE: f64 = 1.0;

/// Power network simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Time step in seconds
    #[arg(short = 't', long, default_value_t = 1e-3)]
    time_step: f64,

    /// Simulated duration in seconds
    #[arg(short = 'f', long, default_value_t = 0.3)]
    final_time: f64,

    /// Time at which the extra load is switched in
    #[arg(long, default_value_t = 0.1)]
    switch_time: f64,

    /// Load resistance before the switch in Ω
    #[arg(long, default_value_t = 1000.0)]
    load: f64,

    /// Total load resistance after the switch in Ω
    #[arg(long, default_value_t = 800.0)]
    switched_load: f64,

    /// Line inductance in H
    #[arg(long, default_value_t = 1.0)]
    line_inductance: f64,

    /// Line resistance in Ω, 0 for a purely inductive line
    #[arg(long, default_value_t = 0.0)]
    line_resistance: f64,

    /// Numeric domain: emt or dp
    #[arg(short, long, default_value = "emt", value_parser = parse_domain)]
    domain: Domain,

    /// Scheduler: sequential or level
    #[arg(short, long, default_value = "sequential")]
    scheduler: String,

    /// Worker threads for the level scheduler
    #[arg(long, default_value_t = 2)]
    threads: usize,

    /// Solver backend: host or accelerator
    #[arg(short, long, default_value = "host", value_parser = parse_backend)]
    backend: BackendKind,

    /// Switch by activating a second topology instead of a switch event
    #[arg(long)]
    topology_switch: bool,

    /// Record every n-th step
    #[arg(long, default_value_t = 1)]
    down_sampling: u64,

    /// Log level: off, error, warn, info, debug, trace
    #[arg(short, long, default_value = "warn", value_parser = parse_level)]
    log_level: LevelFilter,
}

fn parse_domain(name: &str) -> std::result::Result<Domain, String> {
    Domain::from_name(name).ok_or_else(|| format!("unknown domain '{}'", name))
}

fn parse_backend(name: &str) -> std::result::Result<BackendKind, String> {
    BackendKind::from_name(name).ok_or_else(|| format!("unknown backend '{}'", name))
}

fn parse_level(name: &str) -> std::result::Result<LevelFilter, String> {
    name.parse()
        .map_err(|_| format!("unknown log level '{}'", name))
}

/// Writes log records to stderr.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        std::io::stderr().flush().ok();
    }
}

static LOGGER: StderrLogger = StderrLogger;

impl Args {
    fn scheduler_kind(&self) -> Result<SchedulerKind> {
        match self.scheduler.to_lowercase().as_str() {
            "sequential" | "seq" => Ok(SchedulerKind::Sequential),
            "level" | "parallel" => Ok(SchedulerKind::Level {
                threads: self.threads,
            }),
            other => Err(GridError::invalid_simulation_param(format!(
                "unknown scheduler '{}'",
                other
            ))),
        }
    }

    /// Resistance that, in parallel with the base load, gives the switched load.
    fn extra_load(&self) -> Result<f64> {
        if !(self.switched_load > 0.0 && self.switched_load < self.load) {
            return Err(GridError::invalid_simulation_param(format!(
                "switched load {} must be positive and below the base load {}",
                self.switched_load, self.load
            )));
        }
        Ok(1.0 / (1.0 / self.switched_load - 1.0 / self.load))
    }
}

/// Source on n1, line from n1 to n2, load on n2, switched load on n3.
fn build_topology<T: MnaScalar>(args: &Args, closed: bool) -> Result<SystemTopology<T>> {
    let mut topo = SystemTopology::new(DEFAULT_FREQUENCY);
    let gnd = topo.ground();
    let n1 = topo.add_node("n1")?;
    let n2 = topo.add_node("n2")?;
    let n3 = topo.add_node("n3")?;

    let mut source = VoltageSourceNorton::new(
        "vs",
        Complex64::new(SOURCE_VOLTAGE, 0.0),
        None,
        SOURCE_RESISTANCE,
    )?;
    source.connect(&[gnd.clone(), n1.clone()])?;
    topo.add_component(source)?;

    let mut line = Inductor::new("line", args.line_inductance)?;
    if args.line_resistance > 0.0 {
        let nl = topo.add_node("nl")?;
        let mut resistance = Resistor::new("line_r", args.line_resistance)?;
        resistance.connect(&[n1, nl.clone()])?;
        topo.add_component(resistance)?;
        line.connect(&[nl, n2.clone()])?;
    } else {
        line.connect(&[n1, n2.clone()])?;
    }
    topo.add_component(line)?;

    let mut load = Resistor::new("load", args.load)?;
    load.connect(&[n2.clone(), gnd.clone()])?;
    topo.add_component(load)?;

    let mut switch = Switch::new("sw", closed)?;
    switch.connect(&[n2, n3.clone()])?;
    topo.add_component(switch)?;

    let mut extra = Resistor::new("extra_load", args.extra_load()?)?;
    extra.connect(&[n3, gnd])?;
    topo.add_component(extra)?;
    Ok(topo)
}

fn run<T: MnaScalar>(args: &Args) -> Result<RunSummary> {
    let config = SimulationConfig::new()
        .with_time_step(args.time_step)
        .with_final_time(args.final_time)
        .with_domain(args.domain)
        .with_solver(SolverConfig::new().with_backend(args.backend))
        .with_scheduler(args.scheduler_kind()?)
        .with_log_level(args.log_level)
        .with_init_from_powerflow(false);

    let mut sim = Simulation::<T>::new("gridsim", build_topology(args, false)?, config)?;
    if args.topology_switch {
        let variant = sim.add_system_topology(build_topology(args, true)?)?;
        sim.set_switch_time(args.switch_time, variant)?;
    } else {
        sim.add_switch_event(args.switch_time, "sw", true)?;
    }

    let logger = DataLogger::new("samples", WriterSink::new("stdout", std::io::stdout()))
        .with_down_sampling(args.down_sampling)
        .with_attribute("n1.V")
        .with_attribute("n2.V")
        .with_attribute("line.i_intf");
    sim.add_logger(logger)?;
    sim.run()
}

fn main() -> Result<()> {
    let args = Args::parse();

    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(args.log_level);
    }

    let summary = match args.domain {
        Domain::Emt => run::<f64>(&args)?,
        Domain::Dp => run::<Complex64>(&args)?,
    };
    info!(
        "done: {} steps to t = {} s, {} switches, {} factorizations",
        summary.steps, summary.final_time, summary.switches_applied, summary.factorizations
    );

    Ok(())
}
