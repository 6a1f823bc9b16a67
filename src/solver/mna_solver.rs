//! The MNA solver: index assignment, assembly, factorization and the
//! per-step solve task.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, trace};
use nalgebra::{DMatrix, DVector};

use super::backend::SolverBackend;
use super::mna::MatrixStamp;
use super::tearing::TearSystem;
use super::SolverConfig;
use crate::attribute::{AccessFlags, Attribute, AttributeList, AttributeRef};
use crate::circuit::{validate_topology, MnaScalar, NodeRef, SystemTopology};
use crate::components::{ComponentState, MnaComponent};
use crate::error::{GridError, Result};
use crate::scheduler::{Task, TaskRef};

/// Lifecycle of a solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    Uninitialized,
    /// System matrices stamped
    Assembled,
    /// Every system matrix factorized
    Factorized,
    /// At least one step solved
    Stepping,
    Torndown,
}

impl SolverState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SolverState::Uninitialized => "uninitialized",
            SolverState::Assembled => "assembled",
            SolverState::Factorized => "factorized",
            SolverState::Stepping => "stepping",
            SolverState::Torndown => "torn down",
        }
    }
}

impl fmt::Display for SolverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known state of a solver, used to start another topology variant
/// where this one stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed<T> {
    pub time: f64,
    /// Voltages of network and virtual nodes by name
    pub node_voltages: HashMap<String, T>,
    /// Component interface states by component name
    pub component_states: HashMap<String, ComponentState<T>>,
}

impl<T> Default for Seed<T> {
    fn default() -> Self {
        Self {
            time: 0.0,
            node_voltages: HashMap::new(),
            component_states: HashMap::new(),
        }
    }
}

/// Mutable solve state shared by the solver's tasks.
struct SolveCore<T: MnaScalar> {
    label: String,
    backend: Box<dyn SolverBackend<T>>,
    dimension: usize,
    right_vectors: Vec<Attribute<DVector<T>>>,
    switches: Vec<Attribute<bool>>,
    tearing: Option<TearSystem<T>>,
    left_vector: Attribute<DVector<T>>,
    nodes: Vec<NodeRef<T>>,
    factorizations: u64,
    solves: u64,
    /// Matrix key and step of the solve awaiting completion
    issued: Option<(usize, u64)>,
}

impl<T: MnaScalar> SolveCore<T> {
    fn switch_key(&self) -> Result<usize> {
        let mut key = 0;
        for (bit, state) in self.switches.iter().enumerate() {
            if state.get()? {
                key |= 1 << bit;
            }
        }
        Ok(key)
    }

    /// Sum the right-hand-side contributions and start the solve.
    fn issue(&mut self, step: u64) -> Result<()> {
        let mut rhs = DVector::zeros(self.dimension);
        for rv in &self.right_vectors {
            rv.with(|v| {
                if v.len() == rhs.len() {
                    rhs += v;
                    Ok(())
                } else {
                    Err(GridError::DimensionMismatch {
                        context: format!("{}: {}", self.label, rv.name()),
                        index: v.len(),
                        dimension: rhs.len(),
                    })
                }
            })??;
        }
        let key = self.switch_key()?;
        self.backend.solve(key, rhs, step)?;
        self.issued = Some((key, step));
        Ok(())
    }

    /// Wait for the issued solve, apply the tearing correction and publish.
    fn complete(&mut self) -> Result<()> {
        let (key, step) = self.issued.take().ok_or_else(|| GridError::InvalidSolverState {
            solver: self.label.clone(),
            expected: "solve issued",
            actual: "idle",
        })?;
        let y = self.backend.publish()?;
        let x = match self.tearing.as_mut() {
            Some(tearing) => {
                if tearing.refresh(key, step)? {
                    self.factorizations += 1;
                }
                tearing.correct(key, y, step)?
            }
            None => y,
        };
        for (index, node) in self.nodes.iter().enumerate() {
            node.voltage_writer().set(x[index])?;
        }
        self.left_vector.set(x)?;
        self.solves += 1;
        trace!("{}: published solution of step {} (matrix {})", self.label, step, key);
        Ok(())
    }
}

fn lock<'a, T: MnaScalar>(
    core: &'a Mutex<SolveCore<T>>,
    label: &str,
) -> Result<MutexGuard<'a, SolveCore<T>>> {
    core.lock().map_err(|_| GridError::InvalidSolverState {
        solver: label.to_string(),
        expected: "usable",
        actual: "poisoned",
    })
}

/// Solver for one topology variant.
///
/// Owns the system matrices and the solution vector. Components only see the
/// solution through a read-only back-reference and contribute to the system
/// through bounded stamp handles.
pub struct MnaSolver<T: MnaScalar> {
    name: String,
    config: SolverConfig,
    time_step: f64,
    frequency: f64,
    state: SolverState,
    topology: Option<SystemTopology<T>>,
    /// System nodes in matrix index order
    nodes: Vec<NodeRef<T>>,
    components: Vec<Arc<dyn MnaComponent<T>>>,
    torn: HashSet<String>,
    attributes: AttributeList,
    left_vector: Attribute<DVector<T>>,
    /// Assembled system matrix per switch state combination
    matrices: Vec<DMatrix<T>>,
    core: Option<Arc<Mutex<SolveCore<T>>>>,
    tasks: Vec<TaskRef>,
}

impl<T: MnaScalar> fmt::Debug for MnaSolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MnaSolver")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("dimension", &self.nodes.len())
            .field("variants", &self.matrices.len())
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

impl<T: MnaScalar> MnaSolver<T> {
    pub fn new(
        name: &str,
        topology: SystemTopology<T>,
        time_step: f64,
        config: SolverConfig,
    ) -> Result<Self> {
        if !(time_step.is_finite() && time_step > 0.0) {
            return Err(GridError::invalid_simulation_param(format!(
                "time step must be positive, got {}",
                time_step
            )));
        }
        config.validate()?;
        let mut attributes = AttributeList::new(name);
        let left_vector =
            attributes.declare("left_vector", DVector::<T>::zeros(0), AccessFlags::READ)?;
        Ok(Self {
            name: name.to_string(),
            config,
            time_step,
            frequency: topology.frequency(),
            state: SolverState::Uninitialized,
            topology: Some(topology),
            nodes: Vec::new(),
            components: Vec::new(),
            torn: HashSet::new(),
            attributes,
            left_vector,
            matrices: Vec::new(),
            core: None,
            tasks: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SolverState {
        match (self.state, self.solves()) {
            (SolverState::Factorized, Ok(n)) if n > 0 => SolverState::Stepping,
            (state, _) => state,
        }
    }

    pub fn time_step(&self) -> f64 {
        self.time_step
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Number of unknowns.
    pub fn dimension(&self) -> usize {
        self.nodes.len()
    }

    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    /// Read-only handle to the solution vector.
    pub fn left_vector(&self) -> Attribute<DVector<T>> {
        self.left_vector.read_only()
    }

    /// System nodes in matrix index order, virtual nodes last.
    pub fn nodes(&self) -> &[NodeRef<T>] {
        &self.nodes
    }

    pub fn node(&self, name: &str) -> Result<NodeRef<T>> {
        self.nodes
            .iter()
            .find(|n| n.name() == name)
            .cloned()
            .ok_or_else(|| GridError::NodeNotFound {
                node: name.to_string(),
            })
    }

    pub fn components(&self) -> &[Arc<dyn MnaComponent<T>>] {
        &self.components
    }

    pub fn component(&self, name: &str) -> Result<Arc<dyn MnaComponent<T>>> {
        self.components
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| GridError::ComponentNotFound {
                component: name.to_string(),
            })
    }

    pub fn is_torn(&self, name: &str) -> bool {
        self.torn.contains(name)
    }

    /// Assembled system matrix for a switch state combination.
    pub fn system_matrix(&self, key: usize) -> Result<&DMatrix<T>> {
        self.matrices.get(key).ok_or(GridError::VariantNotFound {
            index: key,
            available: self.matrices.len(),
        })
    }

    /// Number of precomputed system matrices.
    pub fn variant_count(&self) -> usize {
        self.matrices.len()
    }

    /// Tasks to schedule every step: component tasks plus the solve task
    /// and, for asynchronous backends, the synchronization task.
    pub fn tasks(&self) -> Vec<TaskRef> {
        self.tasks.clone()
    }

    fn core(&self) -> Result<&Arc<Mutex<SolveCore<T>>>> {
        self.core.as_ref().ok_or_else(|| GridError::InvalidSolverState {
            solver: self.name.clone(),
            expected: "initialized",
            actual: self.state.as_str(),
        })
    }

    /// Factorizations performed so far, tear matrices included.
    pub fn factorizations(&self) -> Result<u64> {
        Ok(lock(self.core()?, &self.name)?.factorizations)
    }

    pub fn solves(&self) -> Result<u64> {
        Ok(lock(self.core()?, &self.name)?.solves)
    }

    /// Key of the system matrix selected by the current switch states.
    pub fn switch_key(&self) -> Result<usize> {
        lock(self.core()?, &self.name)?.switch_key()
    }

    /// Index nodes, initialize components, assemble and factorize.
    pub fn initialize(&mut self, from_powerflow: bool) -> Result<()> {
        self.setup(from_powerflow, None)
    }

    /// Like [`initialize`](Self::initialize), then overwrite node voltages
    /// and component states with those recorded in `seed`.
    pub fn initialize_with_seed(&mut self, from_powerflow: bool, seed: &Seed<T>) -> Result<()> {
        self.setup(from_powerflow, Some(seed))
    }

    fn setup(&mut self, from_powerflow: bool, seed: Option<&Seed<T>>) -> Result<()> {
        if self.state != SolverState::Uninitialized {
            return Err(GridError::InvalidSolverState {
                solver: self.name.clone(),
                expected: "uninitialized",
                actual: self.state.as_str(),
            });
        }
        let topology = self.topology.take().ok_or_else(|| GridError::InvalidSolverState {
            solver: self.name.clone(),
            expected: "a topology",
            actual: "uninitialized",
        })?;
        validate_topology(&topology)?;
        let omega = topology.omega();
        let (frequency, topology_nodes, mut components, tear_names) = topology.into_parts();
        self.torn = tear_names.into_iter().collect();

        // Topology nodes first, then the virtual nodes of components kept in
        // the main system.
        let mut nodes = topology_nodes;
        for component in &components {
            if !self.torn.contains(component.name()) {
                nodes.extend(component.virtual_nodes().iter().cloned());
            }
        }
        for (index, node) in nodes.iter().enumerate() {
            node.assign_matrix_index(index)?;
        }
        let dimension = nodes.len();
        if dimension == 0 {
            return Err(GridError::invalid_topology("system has no unknowns"));
        }

        if from_powerflow {
            for component in components.iter_mut() {
                component.initialize_from_powerflow(frequency)?;
            }
        }
        if let Some(seed) = seed {
            for component in components.iter_mut() {
                match seed.component_states.get(component.name()) {
                    Some(state) => component.import_state(state)?,
                    None => debug!("{}: no seed state for '{}'", self.name, component.name()),
                }
            }
        }

        let initial = nodes
            .iter()
            .map(|node| {
                if let Some(v) = seed.and_then(|s| s.node_voltages.get(node.name())) {
                    return Ok(*v);
                }
                if from_powerflow {
                    Ok(T::from_phasor(node.initial_voltage()?))
                } else {
                    Ok(T::default())
                }
            })
            .collect::<Result<Vec<T>>>()?;
        for (node, v) in nodes.iter().zip(&initial) {
            node.voltage_writer().set(*v)?;
        }
        self.left_vector.set(DVector::from_vec(initial))?;

        for component in components.iter_mut() {
            if self.torn.contains(component.name()) {
                component.mna_tear_initialize(omega, self.time_step, &self.left_vector)?;
            } else {
                component.mna_initialize(omega, self.time_step, &self.left_vector)?;
            }
        }

        let components: Vec<Arc<dyn MnaComponent<T>>> =
            components.into_iter().map(Arc::from).collect();
        let (torn, main): (Vec<_>, Vec<_>) = components
            .iter()
            .cloned()
            .partition(|c| self.torn.contains(c.name()));
        let ground_parts: Vec<Arc<dyn MnaComponent<T>>> = torn
            .iter()
            .flat_map(|c| c.mna_tear_ground_components())
            .collect();
        let stamped: Vec<Arc<dyn MnaComponent<T>>> =
            main.iter().chain(ground_parts.iter()).cloned().collect();
        let switches: Vec<Arc<dyn MnaComponent<T>>> = main
            .iter()
            .filter(|c| c.as_switch().is_some())
            .cloned()
            .collect();
        if switches.len() > self.config.max_switches {
            return Err(GridError::invalid_topology(format!(
                "{} switches exceed the limit of {}",
                switches.len(),
                self.config.max_switches
            )));
        }

        let matrices = self.assemble(dimension, &stamped, &switches)?;
        self.state = SolverState::Assembled;

        let mut backend = self.config.build_backend::<T>(&self.name)?;
        for (key, matrix) in matrices.iter().enumerate() {
            backend.assemble(key, matrix.clone())?;
            backend.factorize(key, 0)?;
        }
        backend.synchronize()?;
        let mut factorizations = matrices.len() as u64;

        let switch_states: Vec<Attribute<bool>> = switches
            .iter()
            .filter_map(|c| c.as_switch().map(|s| s.state_attribute()))
            .collect();
        let tearing = if torn.is_empty() {
            None
        } else {
            let mut tearing = TearSystem::new(
                &self.name,
                torn.clone(),
                dimension,
                self.config.pivot_tolerance,
            )?;
            for key in 0..matrices.len() {
                tearing.project(key, backend.as_mut())?;
            }
            let mut key = 0;
            for (bit, state) in switch_states.iter().enumerate() {
                if state.get()? {
                    key |= 1 << bit;
                }
            }
            if tearing.refresh(key, 0)? {
                factorizations += 1;
            }
            Some(tearing)
        };
        self.state = SolverState::Factorized;

        let mut tasks = Vec::new();
        for component in &stamped {
            tasks.extend(Arc::clone(component).mna_tasks()?);
        }
        let right_vectors: Vec<Attribute<DVector<T>>> =
            stamped.iter().flat_map(|c| c.right_vectors()).collect();

        let mut dependencies: Vec<AttributeRef> =
            right_vectors.iter().map(Attribute::reference).collect();
        dependencies.extend(switch_states.iter().map(Attribute::reference));
        for component in &torn {
            if let Some(switch) = component.as_switch() {
                dependencies.push(switch.state_attribute().reference());
            }
        }
        let mut published = vec![self.left_vector.reference()];
        published.extend(nodes.iter().map(|n| n.voltage_attribute().reference()));
        for component in &torn {
            published.extend(component.base().interface_references());
        }

        let asynchronous = backend.is_asynchronous();
        let core = Arc::new(Mutex::new(SolveCore {
            label: self.name.clone(),
            backend,
            dimension,
            right_vectors,
            switches: switch_states,
            tearing,
            left_vector: self.left_vector.clone(),
            nodes: nodes.clone(),
            factorizations,
            solves: 0,
            issued: None,
        }));

        if asynchronous {
            let issued = Attribute::new(format!("{}.solve_issued", self.name), (), AccessFlags::READ);
            let solve_core = Arc::clone(&core);
            let label = self.name.clone();
            tasks.push(
                Task::new(format!("{}.Solve", self.name), move |_, step| {
                    lock(&solve_core, &label)?.issue(step)
                })
                .with_dependencies(dependencies)
                .with_modified(issued.reference())
                .into_ref(),
            );
            let sync_core = Arc::clone(&core);
            let label = self.name.clone();
            tasks.push(
                Task::new(format!("{}.Synchronize", self.name), move |_, _| {
                    lock(&sync_core, &label)?.complete()
                })
                .with_dependency(issued.reference())
                .with_modified_attributes(published)
                .into_ref(),
            );
        } else {
            let solve_core = Arc::clone(&core);
            let label = self.name.clone();
            tasks.push(
                Task::new(format!("{}.Solve", self.name), move |_, step| {
                    let mut core = lock(&solve_core, &label)?;
                    core.issue(step)?;
                    core.complete()
                })
                .with_dependencies(dependencies)
                .with_modified_attributes(published)
                .into_ref(),
            );
        }

        info!(
            "{}: initialized {} domain system, {} unknowns, {} components ({} torn), {} variants, {} tasks",
            self.name,
            T::DOMAIN,
            dimension,
            main.len() + torn.len(),
            torn.len(),
            matrices.len(),
            tasks.len()
        );

        self.nodes = nodes;
        self.components = components;
        self.matrices = matrices;
        self.core = Some(core);
        self.tasks = tasks;
        Ok(())
    }

    /// Stamp the shared part once, then one matrix per switch state
    /// combination. Bit `k` of the key is the state of switch `k`.
    fn assemble(
        &self,
        dimension: usize,
        stamped: &[Arc<dyn MnaComponent<T>>],
        switches: &[Arc<dyn MnaComponent<T>>],
    ) -> Result<Vec<DMatrix<T>>> {
        let mut base = DMatrix::zeros(dimension, dimension);
        {
            let mut stamp = MatrixStamp::new(&mut base, &self.name);
            for component in stamped.iter().filter(|c| c.as_switch().is_none()) {
                component.mna_apply_system_matrix_stamp(&mut stamp)?;
            }
        }
        let variants = 1usize << switches.len();
        let mut matrices = Vec::with_capacity(variants);
        for key in 0..variants {
            let mut matrix = base.clone();
            {
                let mut stamp = MatrixStamp::new(&mut matrix, &self.name);
                for (bit, component) in switches.iter().enumerate() {
                    if let Some(switch) = component.as_switch() {
                        let closed = (key >> bit) & 1 == 1;
                        switch.mna_apply_switch_system_matrix_stamp(closed, &mut stamp)?;
                    }
                }
            }
            debug!("{}: assembled system matrix {}", self.name, key);
            matrices.push(matrix);
        }
        Ok(matrices)
    }

    /// Snapshot node voltages and component states.
    pub fn export_seed(&self, time: f64) -> Result<Seed<T>> {
        let mut seed = Seed {
            time,
            ..Seed::default()
        };
        for node in &self.nodes {
            seed.node_voltages
                .insert(node.name().to_string(), node.voltage()?);
        }
        for component in &self.components {
            seed.component_states
                .insert(component.name().to_string(), component.export_state()?);
        }
        Ok(seed)
    }

    /// Wait for outstanding work and release the backend.
    pub fn teardown(&mut self) -> Result<()> {
        if let Some(core) = self.core.take() {
            lock(&core, &self.name)?.backend.synchronize()?;
        }
        self.tasks.clear();
        self.state = SolverState::Torndown;
        info!("{}: torn down", self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{CurrentSource, Resistor, Switch, VoltageSource};
    use crate::scheduler::topological_order;
    use crate::solver::BackendKind;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    fn run_step<T: MnaScalar>(solver: &MnaSolver<T>, step: u64) {
        for task in topological_order(&solver.tasks()).unwrap() {
            task.execute(step as f64 * solver.time_step(), step).unwrap();
        }
    }

    /// 10 V source, 1 Ω series, 1 Ω load behind a switch in parallel with a
    /// fixed 1 Ω load.
    fn divider(backend: BackendKind) -> MnaSolver<f64> {
        let mut topo = SystemTopology::new(50.0);
        let n1 = topo.add_node("n1").unwrap();
        let n2 = topo.add_node("n2").unwrap();
        let n3 = topo.add_node("n3").unwrap();
        let mut vs = VoltageSource::new("vs", Complex64::new(10.0, 0.0), None).unwrap();
        vs.connect(&[topo.ground(), n1.clone()]).unwrap();
        let mut r1 = Resistor::new("r1", 1.0).unwrap();
        r1.connect(&[n1, n2.clone()]).unwrap();
        let mut r2 = Resistor::new("r2", 1.0).unwrap();
        r2.connect(&[n2.clone(), topo.ground()]).unwrap();
        let mut sw = Switch::with_resistances("sw", 1e9, 1e-6, false).unwrap();
        sw.connect(&[n2, n3.clone()]).unwrap();
        let mut r3 = Resistor::new("r3", 1.0).unwrap();
        r3.connect(&[n3, topo.ground()]).unwrap();
        let components: Vec<Box<dyn MnaComponent<f64>>> = vec![
            Box::new(vs),
            Box::new(r1),
            Box::new(r2),
            Box::new(sw),
            Box::new(r3),
        ];
        for c in components {
            topo.add_boxed(c).unwrap();
        }
        let config = SolverConfig::new().with_backend(backend);
        let mut solver = MnaSolver::new("solver", topo, 1e-3, config).unwrap();
        solver.initialize(false).unwrap();
        solver
    }

    #[test]
    fn test_state_machine() {
        let topo = SystemTopology::<f64>::new(50.0);
        let solver = MnaSolver::new("s", topo, 1e-3, SolverConfig::new()).unwrap();
        assert_eq!(solver.state(), SolverState::Uninitialized);
        assert!(solver.factorizations().is_err());

        let mut solver = divider(BackendKind::Host);
        assert_eq!(solver.state(), SolverState::Factorized);
        assert!(solver.initialize(false).is_err());
        run_step(&solver, 1);
        assert_eq!(solver.state(), SolverState::Stepping);
        solver.teardown().unwrap();
        assert_eq!(solver.state(), SolverState::Torndown);
    }

    #[test]
    fn test_index_assignment_puts_virtual_nodes_last() {
        let solver = divider(BackendKind::Host);
        let names: Vec<_> = solver.nodes().iter().map(|n| n.name().to_string()).collect();
        assert_eq!(names, ["n1", "n2", "n3", "vs.branch"]);
        assert_eq!(solver.node("vs.branch").unwrap().matrix_index(), Some(3));
    }

    #[test]
    fn test_switch_selects_precomputed_matrix() {
        let solver = divider(BackendKind::Host);
        assert_eq!(solver.variant_count(), 2);
        assert_eq!(solver.factorizations().unwrap(), 2);

        run_step(&solver, 1);
        assert_relative_eq!(solver.node("n2").unwrap().voltage().unwrap(), 5.0, epsilon = 1e-6);

        let sw = solver.component("sw").unwrap();
        let state: Attribute<bool> = sw.attributes().get("is_closed").unwrap();
        state.set(true).unwrap();
        assert_eq!(solver.switch_key().unwrap(), 1);
        run_step(&solver, 2);
        assert_relative_eq!(
            solver.node("n2").unwrap().voltage().unwrap(),
            10.0 / 3.0,
            epsilon = 1e-5
        );
        // Switching reuses the precomputed factorization.
        assert_eq!(solver.factorizations().unwrap(), 2);
    }

    #[test]
    fn test_accelerator_adds_synchronize_task() {
        let host = divider(BackendKind::Host);
        let accel = divider(BackendKind::Accelerator);
        assert_eq!(accel.tasks().len(), host.tasks().len() + 1);
        assert!(accel
            .tasks()
            .iter()
            .any(|t| t.name() == "solver.Synchronize"));
        run_step(&host, 1);
        run_step(&accel, 1);
        assert_eq!(
            host.left_vector().get().unwrap(),
            accel.left_vector().get().unwrap()
        );
    }

    #[test]
    fn test_singular_system_fails_initialization() {
        let mut topo = SystemTopology::<f64>::new(50.0);
        let n1 = topo.add_node("n1").unwrap();
        let mut cs = CurrentSource::new("cs", Complex64::new(1.0, 0.0), None).unwrap();
        cs.connect(&[topo.ground(), n1]).unwrap();
        topo.add_component(cs).unwrap();
        let mut solver = MnaSolver::new("s", topo, 1e-3, SolverConfig::new()).unwrap();
        let err = solver.initialize(false).unwrap_err();
        assert!(matches!(err, GridError::SingularMatrix { ref matrix, step: 0, .. } if matrix == "s[0]"));
    }

    #[test]
    fn test_seed_contains_nodes_and_components() {
        let solver = divider(BackendKind::Host);
        run_step(&solver, 1);
        let seed = solver.export_seed(1e-3).unwrap();
        assert_eq!(seed.node_voltages.len(), 4);
        assert_eq!(seed.component_states.len(), 5);
        assert_relative_eq!(seed.node_voltages["n1"], 10.0, epsilon = 1e-9);
        assert_relative_eq!(
            seed.component_states["r1"].intf_current,
            -5.0,
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_rejects_bad_time_step() {
        let topo = SystemTopology::<f64>::new(50.0);
        assert!(matches!(
            MnaSolver::new("s", topo, 0.0, SolverConfig::new()),
            Err(GridError::InvalidSimulationParam { .. })
        ));
    }
}
