//! Simulation driver.
//!
//! A [`Simulation`] owns the topology variants, builds a solver and a
//! schedule for the active one, and advances time step by step. Two kinds of
//! events change the network between steps:
//! - switch events set the state of a switch in the active topology, which
//!   selects another precomputed system matrix;
//! - switch times activate another topology variant, seeded from the last
//!   solution of the previous one.

mod logger;

pub use logger::{DataLogger, LogSink, MemorySink, Sample, WriterSink};

use log::{debug, info, trace, LevelFilter};

use crate::attribute::{Attribute, AttributeHandle};
use crate::circuit::{Domain, MnaScalar, SystemTopology};
use crate::error::{GridError, Result};
use crate::scheduler::{Scheduler, SchedulerKind};
use crate::solver::{BackendKind, MnaSolver, Seed, SolverConfig};

/// Default simulation time step (seconds).
pub const DEFAULT_TIME_STEP: f64 = 1e-3;

/// Default simulated duration (seconds).
pub const DEFAULT_FINAL_TIME: f64 = 1.0;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub time_step: f64,
    pub final_time: f64,
    /// Must match the scalar type of the simulation.
    pub domain: Domain,
    pub solver: SolverConfig,
    pub scheduler: SchedulerKind,
    /// Gates the simulation's own per-step diagnostics.
    pub log_level: LevelFilter,
    /// Initialize components from the node power-flow voltages.
    pub init_from_powerflow: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            time_step: DEFAULT_TIME_STEP,
            final_time: DEFAULT_FINAL_TIME,
            domain: Domain::Emt,
            solver: SolverConfig::default(),
            scheduler: SchedulerKind::default(),
            log_level: LevelFilter::Info,
            init_from_powerflow: true,
        }
    }
}

impl SimulationConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_step(mut self, time_step: f64) -> Self {
        self.time_step = time_step;
        self
    }

    pub fn with_final_time(mut self, final_time: f64) -> Self {
        self.final_time = final_time;
        self
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    pub fn with_solver(mut self, solver: SolverConfig) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.solver.backend = backend;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerKind) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    pub fn with_init_from_powerflow(mut self, enabled: bool) -> Self {
        self.init_from_powerflow = enabled;
        self
    }

    /// Number of steps covering `final_time`.
    pub fn step_count(&self) -> u64 {
        (self.final_time / self.time_step).round() as u64
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.time_step.is_finite() && self.time_step > 0.0) {
            return Err(GridError::invalid_simulation_param(format!(
                "time step must be positive, got {}",
                self.time_step
            )));
        }
        if !(self.final_time.is_finite() && self.final_time >= self.time_step) {
            return Err(GridError::invalid_simulation_param(format!(
                "final time {} must cover at least one step of {}",
                self.final_time, self.time_step
            )));
        }
        if let SchedulerKind::Level { threads: 0 } = self.scheduler {
            return Err(GridError::invalid_simulation_param(
                "level scheduler needs at least one thread",
            ));
        }
        self.solver.validate()
    }
}

/// Sets the state of a switch in the active topology.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchEvent {
    pub time: f64,
    pub switch: String,
    pub closed: bool,
}

/// Outcome of [`Simulation::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub steps: u64,
    pub final_time: f64,
    /// Switch events and topology switches applied
    pub switches_applied: usize,
    /// Factorizations over all topology variants
    pub factorizations: u64,
    /// Topology variant active at the end
    pub variant: usize,
}

/// A time-domain simulation of a network.
pub struct Simulation<T: MnaScalar> {
    name: String,
    config: SimulationConfig,
    /// Topology variants; index 0 is the initial topology
    variants: Vec<SystemTopology<T>>,
    /// (time, variant) sorted by time
    switch_times: Vec<(f64, usize)>,
    switch_events: Vec<SwitchEvent>,
    next_switch_time: usize,
    next_switch_event: usize,
    loggers: Vec<DataLogger>,
    solver: Option<MnaSolver<T>>,
    scheduler: Option<Box<dyn Scheduler>>,
    active_variant: usize,
    step: u64,
    time: f64,
    switches_applied: usize,
    /// Factorizations of solvers already replaced
    retired_factorizations: u64,
}

impl<T: MnaScalar> std::fmt::Debug for Simulation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("active_variant", &self.active_variant)
            .field("step", &self.step)
            .field("time", &self.time)
            .finish_non_exhaustive()
    }
}

impl<T: MnaScalar> Simulation<T> {
    pub fn new(name: &str, topology: SystemTopology<T>, config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        if config.domain != T::DOMAIN {
            return Err(GridError::invalid_simulation_param(format!(
                "configured domain {} does not match the {} scalar type",
                config.domain,
                T::DOMAIN
            )));
        }
        Ok(Self {
            name: name.to_string(),
            config,
            variants: vec![topology],
            switch_times: Vec::new(),
            switch_events: Vec::new(),
            next_switch_time: 0,
            next_switch_event: 0,
            loggers: Vec::new(),
            solver: None,
            scheduler: None,
            active_variant: 0,
            step: 0,
            time: 0.0,
            switches_applied: 0,
            retired_factorizations: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Register a topology variant. Returns its index.
    pub fn add_system_topology(&mut self, topology: SystemTopology<T>) -> Result<usize> {
        self.ensure_not_started("add a topology")?;
        self.variants.push(topology);
        Ok(self.variants.len() - 1)
    }

    /// Activate topology `variant` at `time`.
    ///
    /// Node voltages and component states carry over from the running
    /// solution. Switches take the states declared in `variant`, so a switch
    /// event applied to the previous topology does not carry over.
    pub fn set_switch_time(&mut self, time: f64, variant: usize) -> Result<()> {
        self.ensure_not_started("add a switch time")?;
        self.check_event_time(time)?;
        if variant >= self.variants.len() {
            return Err(GridError::VariantNotFound {
                index: variant,
                available: self.variants.len(),
            });
        }
        self.switch_times.push((time, variant));
        self.switch_times.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(())
    }

    /// Set switch `switch` of the active topology to `closed` at `time`.
    pub fn add_switch_event(&mut self, time: f64, switch: &str, closed: bool) -> Result<()> {
        self.ensure_not_started("add a switch event")?;
        self.check_event_time(time)?;
        let known = self
            .variants
            .iter()
            .any(|v| v.component(switch).map_or(false, |c| c.as_switch().is_some()));
        if !known {
            return Err(GridError::ComponentNotFound {
                component: switch.to_string(),
            });
        }
        self.switch_events.push(SwitchEvent {
            time,
            switch: switch.to_string(),
            closed,
        });
        self.switch_events.sort_by(|a, b| a.time.total_cmp(&b.time));
        Ok(())
    }

    pub fn add_logger(&mut self, logger: DataLogger) -> Result<()> {
        self.ensure_not_started("add a logger")?;
        self.loggers.push(logger);
        Ok(())
    }

    fn ensure_not_started(&self, action: &str) -> Result<()> {
        if self.solver.is_some() {
            return Err(GridError::invalid_simulation_param(format!(
                "cannot {} after initialization",
                action
            )));
        }
        Ok(())
    }

    fn check_event_time(&self, time: f64) -> Result<()> {
        if !(time.is_finite() && time >= 0.0) {
            return Err(GridError::invalid_simulation_param(format!(
                "event time must be finite and non-negative, got {}",
                time
            )));
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.solver.is_some()
    }

    /// Build the solver and schedule for the initial topology.
    pub fn initialize(&mut self) -> Result<()> {
        self.ensure_not_started("initialize")?;
        info!(
            "{}: initializing {} simulation, dt = {} s, final time = {} s, {} variants",
            self.name,
            T::DOMAIN,
            self.config.time_step,
            self.config.final_time,
            self.variants.len()
        );
        self.activate(0, None)
    }

    /// Build a solver for `variant` and a schedule over its tasks and the
    /// loggers, then replace the active ones.
    fn activate(&mut self, variant: usize, seed: Option<&Seed<T>>) -> Result<()> {
        let topology = self
            .variants
            .get(variant)
            .ok_or(GridError::VariantNotFound {
                index: variant,
                available: self.variants.len(),
            })?
            .try_clone()?;
        let mut solver = MnaSolver::new(
            &format!("{}.v{}", self.name, variant),
            topology,
            self.config.time_step,
            self.config.solver.clone(),
        )?;
        match seed {
            Some(seed) => solver.initialize_with_seed(false, seed)?,
            None => solver.initialize(self.config.init_from_powerflow)?,
        }

        let mut tasks = solver.tasks();
        for logger in &self.loggers {
            tasks.push(logger.task(|name| resolve_attribute(&solver, name))?);
        }
        let mut scheduler = self.config.scheduler.build()?;
        scheduler.create_schedule(&tasks)?;
        debug!(
            "{}: {} scheduler over {} tasks",
            self.name,
            scheduler.name(),
            tasks.len()
        );

        if let Some(mut previous) = self.solver.replace(solver) {
            self.retired_factorizations += previous.factorizations()?;
            previous.teardown()?;
        }
        self.scheduler = Some(scheduler);
        self.active_variant = variant;
        Ok(())
    }

    /// Switch to topology `variant` now, seeded from the current solution.
    pub fn switch_to(&mut self, variant: usize) -> Result<()> {
        let seed = self.export_seed()?;
        info!(
            "{}: switching from variant {} to {} at t = {}",
            self.name, self.active_variant, variant, self.time
        );
        self.activate(variant, Some(&seed))?;
        self.switches_applied += 1;
        Ok(())
    }

    /// Snapshot of the active solver's state.
    pub fn export_seed(&self) -> Result<Seed<T>> {
        self.active_solver()?.export_seed(self.time)
    }

    pub fn solver(&self) -> Option<&MnaSolver<T>> {
        self.solver.as_ref()
    }

    fn active_solver(&self) -> Result<&MnaSolver<T>> {
        self.solver.as_ref().ok_or_else(|| GridError::InvalidSolverState {
            solver: self.name.clone(),
            expected: "initialized",
            actual: "uninitialized",
        })
    }

    /// Look up an attribute of the active topology by its qualified name.
    pub fn attribute(&self, name: &str) -> Result<AttributeHandle> {
        resolve_attribute(self.active_solver()?, name)
    }

    pub fn active_variant(&self) -> usize {
        self.active_variant
    }

    /// Time of the last solved step.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn steps(&self) -> u64 {
        self.step
    }

    pub fn switches_applied(&self) -> usize {
        self.switches_applied
    }

    pub fn factorizations(&self) -> Result<u64> {
        let active = match &self.solver {
            Some(solver) => solver.factorizations()?,
            None => 0,
        };
        Ok(self.retired_factorizations + active)
    }

    /// Apply every event due at `time`. Topology switches go first so switch
    /// events address the topology active for this step.
    fn apply_events(&mut self, time: f64) -> Result<()> {
        let tolerance = self.config.time_step * 1e-6;
        while let Some(&(at, variant)) = self.switch_times.get(self.next_switch_time) {
            if at > time + tolerance {
                break;
            }
            self.next_switch_time += 1;
            self.switch_to(variant)?;
        }
        while let Some(event) = self.switch_events.get(self.next_switch_event) {
            if event.time > time + tolerance {
                break;
            }
            let event = event.clone();
            self.next_switch_event += 1;
            let component = self.active_solver()?.component(&event.switch)?;
            let state: Attribute<bool> = component.attributes().get("is_closed")?;
            state.set(event.closed)?;
            self.switches_applied += 1;
            info!(
                "{}: switch '{}' {} at t = {}",
                self.name,
                event.switch,
                if event.closed { "closed" } else { "opened" },
                time
            );
        }
        Ok(())
    }

    /// Solve one step at `steps() * time_step`.
    pub fn step(&mut self) -> Result<f64> {
        if self.solver.is_none() {
            self.initialize()?;
        }
        let time = self.step as f64 * self.config.time_step;
        self.apply_events(time)?;
        let scheduler = self.scheduler.as_mut().ok_or_else(|| GridError::InvalidSolverState {
            solver: self.name.clone(),
            expected: "scheduled",
            actual: "unscheduled",
        })?;
        scheduler.step(time, self.step)?;
        if self.config.log_level >= LevelFilter::Trace {
            trace!("{}: step {} at t = {}", self.name, self.step, time);
        }
        self.time = time;
        self.step += 1;
        Ok(time)
    }

    /// Run until the configured final time.
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.solver.is_none() {
            self.initialize()?;
        }
        let total = self.config.step_count();
        while self.step < total {
            self.step()?;
        }
        for logger in &self.loggers {
            logger.flush()?;
        }
        let summary = RunSummary {
            steps: self.step,
            final_time: self.step as f64 * self.config.time_step,
            switches_applied: self.switches_applied,
            factorizations: self.factorizations()?,
            variant: self.active_variant,
        };
        info!(
            "{}: finished {} steps, {} switches, {} factorizations",
            self.name, summary.steps, summary.switches_applied, summary.factorizations
        );
        Ok(summary)
    }
}

/// Resolve `<owner>.<attribute>` against a solver's nodes and components.
/// The owner is everything before the last dot, so virtual nodes such as
/// `vs.branch` resolve as well.
fn resolve_attribute<T: MnaScalar>(solver: &MnaSolver<T>, name: &str) -> Result<AttributeHandle> {
    let (owner, attribute) = name
        .rsplit_once('.')
        .ok_or_else(|| GridError::AttributeNotFound {
            owner: solver.name().to_string(),
            name: name.to_string(),
        })?;
    if owner == solver.name() {
        return solver.attributes().handle(attribute);
    }
    if let Ok(node) = solver.node(owner) {
        return node.attribute(attribute);
    }
    let component = solver.component(owner)?;
    component.attributes().handle(attribute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{MnaComponent, Resistor, Switch, VoltageSource};
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    fn divider() -> SystemTopology<f64> {
        let mut topo = SystemTopology::new(50.0);
        let n1 = topo.add_node("n1").unwrap();
        let n2 = topo.add_node("n2").unwrap();
        let mut vs = VoltageSource::new("vs", Complex64::new(10.0, 0.0), None).unwrap();
        vs.connect(&[topo.ground(), n1.clone()]).unwrap();
        let mut r1 = Resistor::new("r1", 1.0).unwrap();
        r1.connect(&[n1, n2.clone()]).unwrap();
        let mut sw = Switch::with_resistances("sw", 1e9, 1.0, false).unwrap();
        sw.connect(&[n2, topo.ground()]).unwrap();
        topo.add_component(vs).unwrap();
        topo.add_component(r1).unwrap();
        topo.add_component(sw).unwrap();
        topo
    }

    fn config() -> SimulationConfig {
        SimulationConfig::new()
            .with_time_step(0.01)
            .with_final_time(0.1)
            .with_init_from_powerflow(false)
    }

    #[test]
    fn test_domain_must_match_scalar() {
        let err = Simulation::new("s", divider(), config().with_domain(Domain::Dp)).unwrap_err();
        assert!(matches!(err, GridError::InvalidSimulationParam { .. }));
    }

    #[test]
    fn test_config_validation() {
        assert!(config().with_time_step(0.0).validate().is_err());
        assert!(config().with_final_time(0.001).validate().is_err());
        assert!(config()
            .with_scheduler(SchedulerKind::Level { threads: 0 })
            .validate()
            .is_err());
        assert_eq!(config().step_count(), 10);
    }

    #[test]
    fn test_switch_event_applied_between_steps() {
        let mut sim = Simulation::new("s", divider(), config()).unwrap();
        let sink = MemorySink::new();
        sim.add_logger(DataLogger::new("log", sink.clone()).with_attribute("n2.V"))
            .unwrap();
        sim.add_switch_event(0.05, "sw", true).unwrap();
        assert!(sim.add_switch_event(0.05, "r1", true).is_err());

        let summary = sim.run().unwrap();
        assert_eq!(summary.steps, 10);
        assert_eq!(summary.switches_applied, 1);
        assert_eq!(summary.factorizations, 2);

        let series = sink.real_series("n2.V").unwrap();
        assert_eq!(series.len(), 10);
        for (t, v) in series {
            let expected = if t < 0.05 - 1e-9 { 10.0 } else { 5.0 };
            assert_relative_eq!(v, expected, epsilon = 1e-6);
        }
        assert!(sim.add_logger(DataLogger::new("late", MemorySink::new())).is_err());
    }

    #[test]
    fn test_attribute_resolution() {
        let mut sim = Simulation::new("s", divider(), config()).unwrap();
        assert!(sim.attribute("n1.V").is_err());
        sim.initialize().unwrap();
        assert_eq!(sim.attribute("n1.V").unwrap().kind(), "real");
        assert_eq!(sim.attribute("r1.R").unwrap().kind(), "real");
        assert!(sim.attribute("vs.branch.V").is_ok());
        assert!(sim.attribute("s.v0.left_vector").is_ok());
        assert!(sim.attribute("nothing").is_err());
        assert!(sim.attribute("r9.R").is_err());
    }

    #[test]
    fn test_topology_switch_reseeds() {
        let mut sim = Simulation::new("s", divider(), config()).unwrap();
        let mut closed = divider();
        closed
            .component_mut("sw")
            .unwrap()
            .attributes()
            .get::<bool>("is_closed")
            .unwrap()
            .set(true)
            .unwrap();
        let variant = sim.add_system_topology(closed).unwrap();
        sim.set_switch_time(0.05, variant).unwrap();
        assert!(sim.set_switch_time(0.05, 7).is_err());

        let summary = sim.run().unwrap();
        assert_eq!(summary.variant, 1);
        assert_eq!(summary.switches_applied, 1);
        // Two variants per solver, one solver per topology.
        assert_eq!(summary.factorizations, 4);
        let v2 = sim.solver().unwrap().node("n2").unwrap().voltage().unwrap();
        assert_relative_eq!(v2, 5.0, epsilon = 1e-6);
    }
}
