//! Component models and the MNA stamping contract.
//!
//! This module provides the [`MnaComponent`] trait every electrical element
//! implements, plus the generic models used to exercise it:
//! - Linear: Resistor, Inductor, Capacitor
//! - Sources: VoltageSource, VoltageSourceNorton, CurrentSource
//! - Controls: Switch
//! - Lines: PiLine (compound of the linear elements)
//!
//! ## Lifecycle
//!
//! Components are built and connected while the topology is assembled, then
//! `initialize_from_powerflow` and `mna_initialize` run with exclusive
//! access. After initialization the solver shares each component behind an
//! `Arc`; from then on all per-step state lives in attributes and the
//! component's tasks run with shared access only.
//!
//! ## Conventions
//!
//! The interface voltage is `V(terminal 1) - V(terminal 0)` and the interface
//! current flows from terminal 1 to terminal 0 through the device.

mod controls;
mod line;
mod linear;
mod sources;

pub use controls::Switch;
pub use line::PiLine;
pub use linear::{Capacitor, Inductor, Resistor};
pub use sources::{CurrentSource, VoltageSource, VoltageSourceNorton};

use std::sync::Arc;

use nalgebra::DVector;
use num_complex::Complex64;

use crate::attribute::{AccessFlags, Attribute, AttributeList, AttributeRef, WeakAttribute};
use crate::circuit::{MnaScalar, NodeRef, SimNode, Terminal};
use crate::error::{GridError, Result};
use crate::scheduler::{Task, TaskRef};
use crate::solver::{MatrixStamp, VectorStamp};

/// Interface state transferred between topology variants.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentState<T> {
    pub intf_voltage: T,
    pub intf_current: T,
    /// Model-specific internal state, such as the states of sub-components
    pub internal: Vec<T>,
}

/// State and bookkeeping shared by all component implementations.
#[derive(Debug)]
pub struct ComponentBase<T: MnaScalar> {
    name: String,
    terminals: Vec<Terminal<T>>,
    virtual_nodes: Vec<NodeRef<T>>,
    attributes: AttributeList,
    intf_voltage: Attribute<T>,
    intf_current: Attribute<T>,
    /// Right-hand-side contribution, present for components with sources
    /// or history terms
    right_vector: Option<Attribute<DVector<T>>>,
    /// Solution vector owned by the solver
    left_vector: Option<WeakAttribute<DVector<T>>>,
}

impl<T: MnaScalar> ComponentBase<T> {
    pub fn new(name: &str, terminal_count: usize) -> Result<Self> {
        let mut attributes = AttributeList::new(name);
        let intf_voltage = attributes.declare("v_intf", T::default(), AccessFlags::READ)?;
        let intf_current = attributes.declare("i_intf", T::default(), AccessFlags::READ)?;
        Ok(Self {
            name: name.to_string(),
            terminals: vec![Terminal::default(); terminal_count],
            virtual_nodes: Vec::new(),
            attributes,
            intf_voltage,
            intf_current,
            right_vector: None,
            left_vector: None,
        })
    }

    /// Declare the `right_vector` attribute.
    pub fn with_right_vector(mut self) -> Result<Self> {
        let rv = self
            .attributes
            .declare("right_vector", DVector::<T>::zeros(0), AccessFlags::READ)?;
        self.right_vector = Some(rv);
        Ok(self)
    }

    /// Create a virtual node named `<component>.<suffix>`.
    pub fn with_virtual_node(mut self, suffix: &str) -> Self {
        self.virtual_nodes
            .push(SimNode::new_virtual(&format!("{}.{}", self.name, suffix)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &AttributeList {
        &self.attributes
    }

    pub fn attributes_mut(&mut self) -> &mut AttributeList {
        &mut self.attributes
    }

    pub fn terminals(&self) -> &[Terminal<T>] {
        &self.terminals
    }

    pub fn virtual_nodes(&self) -> &[NodeRef<T>] {
        &self.virtual_nodes
    }

    pub fn connect(&mut self, nodes: &[NodeRef<T>]) -> Result<()> {
        if nodes.len() != self.terminals.len() {
            return Err(GridError::TerminalCount {
                component: self.name.clone(),
                expected: self.terminals.len(),
                actual: nodes.len(),
            });
        }
        for (terminal, node) in self.terminals.iter_mut().zip(nodes) {
            terminal.connect(Arc::clone(node));
        }
        Ok(())
    }

    /// Node attached to terminal `index`.
    pub fn node(&self, index: usize) -> Result<&NodeRef<T>> {
        self.terminals
            .get(index)
            .and_then(Terminal::node)
            .ok_or_else(|| GridError::UnconnectedTerminal {
                component: self.name.clone(),
                terminal: index,
            })
    }

    pub fn check_connected(&self) -> Result<()> {
        for index in 0..self.terminals.len() {
            self.node(index)?;
        }
        Ok(())
    }

    pub fn virtual_node(&self, index: usize) -> Result<&NodeRef<T>> {
        self.virtual_nodes.get(index).ok_or_else(|| {
            GridError::invalid_topology(format!(
                "component '{}' has no virtual node {}",
                self.name, index
            ))
        })
    }

    /// Matrix index of terminal `index`, `None` when grounded.
    pub fn matrix_index(&self, index: usize) -> Result<Option<usize>> {
        node_matrix_index(self.node(index)?)
    }

    /// Matrix index of virtual node `index`.
    pub fn virtual_index(&self, index: usize) -> Result<usize> {
        let node = self.virtual_node(index)?;
        node.matrix_index().ok_or_else(|| {
            GridError::invalid_topology(format!("virtual node '{}' has no matrix index", node.name()))
        })
    }

    /// Power-flow voltage at terminal `index`.
    pub fn initial_voltage(&self, index: usize) -> Result<Complex64> {
        self.node(index)?.initial_voltage()
    }

    pub fn intf_voltage(&self) -> &Attribute<T> {
        &self.intf_voltage
    }

    pub fn intf_current(&self) -> &Attribute<T> {
        &self.intf_current
    }

    pub fn right_vector(&self) -> Option<&Attribute<DVector<T>>> {
        self.right_vector.as_ref()
    }

    /// Keep a read-only back-reference to the solution vector and size the
    /// right-hand-side contribution to match.
    pub fn attach_left_vector(&mut self, left_vector: &Attribute<DVector<T>>) -> Result<()> {
        let dimension = left_vector.with(|x| x.len())?;
        if let Some(rv) = &self.right_vector {
            rv.set(DVector::zeros(dimension))?;
        }
        self.left_vector = Some(left_vector.read_only().downgrade());
        Ok(())
    }

    pub fn left_vector(&self) -> Result<Attribute<DVector<T>>> {
        self.left_vector
            .as_ref()
            .ok_or_else(|| GridError::InvalidSolverState {
                solver: self.name.clone(),
                expected: "MNA-initialized",
                actual: "uninitialized",
            })?
            .upgrade()
    }

    /// `x[terminal 1] - x[terminal 0]`.
    pub fn voltage_across(&self, x: &DVector<T>) -> Result<T> {
        let v1 = vector_value(x, self.matrix_index(1)?, &self.name)?;
        let v0 = vector_value(x, self.matrix_index(0)?, &self.name)?;
        Ok(v1 - v0)
    }

    pub fn export_state(&self) -> Result<ComponentState<T>> {
        Ok(ComponentState {
            intf_voltage: self.intf_voltage.get()?,
            intf_current: self.intf_current.get()?,
            internal: Vec::new(),
        })
    }

    pub fn import_state(&self, state: &ComponentState<T>) -> Result<()> {
        self.intf_voltage.set(state.intf_voltage)?;
        self.intf_current.set(state.intf_current)
    }

    /// Interface attribute references, as modified by post-step tasks.
    pub fn interface_references(&self) -> [AttributeRef; 2] {
        [self.intf_voltage.reference(), self.intf_current.reference()]
    }
}

/// Matrix index of a node, `None` for ground.
pub fn node_matrix_index<T: MnaScalar>(node: &SimNode<T>) -> Result<Option<usize>> {
    if node.is_ground() {
        return Ok(None);
    }
    node.matrix_index()
        .map(Some)
        .ok_or_else(|| GridError::invalid_topology(format!("node '{}' has no matrix index", node.name())))
}

/// Vector entry at `index`, zero for ground.
pub fn vector_value<T: MnaScalar>(x: &DVector<T>, index: Option<usize>, context: &str) -> Result<T> {
    match index {
        None => Ok(T::default()),
        Some(i) if i < x.len() => Ok(x[i]),
        Some(i) => Err(GridError::DimensionMismatch {
            context: context.to_string(),
            index: i,
            dimension: x.len(),
        }),
    }
}

/// A component whose open/closed state selects between two matrix stamps.
pub trait MnaSwitch<T: MnaScalar> {
    /// Writable `is_closed` attribute.
    fn state_attribute(&self) -> Attribute<bool>;

    fn is_closed(&self) -> Result<bool> {
        self.state_attribute().get()
    }

    /// Stamp the admittance of the given state, regardless of the current one.
    fn mna_apply_switch_system_matrix_stamp(
        &self,
        closed: bool,
        matrix: &mut MatrixStamp<'_, T>,
    ) -> Result<()>;
}

/// Capability set of an element taking part in a nodal-analysis solve.
pub trait MnaComponent<T: MnaScalar>: Send + Sync {
    fn base(&self) -> &ComponentBase<T>;

    fn base_mut(&mut self) -> &mut ComponentBase<T>;

    /// Short model name used in diagnostics.
    fn type_name(&self) -> &'static str;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn attributes(&self) -> &AttributeList {
        self.base().attributes()
    }

    fn terminals(&self) -> &[Terminal<T>] {
        self.base().terminals()
    }

    fn virtual_nodes(&self) -> &[NodeRef<T>] {
        self.base().virtual_nodes()
    }

    fn connect(&mut self, nodes: &[NodeRef<T>]) -> Result<()> {
        self.base_mut().connect(nodes)
    }

    /// Unconnected copy with the same parameters and fresh state.
    fn clone_named(&self, name: &str) -> Result<Box<dyn MnaComponent<T>>>;

    /// Steady-state interface voltage and current from the node power-flow
    /// voltages. Fails on an unconnected terminal.
    fn initialize_from_powerflow(&mut self, frequency: f64) -> Result<()>;

    /// Compute the per-step coefficients for the given angular frequency
    /// and step size, and attach to the solution vector.
    fn mna_initialize(
        &mut self,
        omega: f64,
        time_step: f64,
        left_vector: &Attribute<DVector<T>>,
    ) -> Result<()>;

    /// Add the admittance contribution to a freshly zeroed system matrix.
    fn mna_apply_system_matrix_stamp(&self, matrix: &mut MatrixStamp<'_, T>) -> Result<()>;

    /// Add the source and history contribution for the coming step.
    fn mna_apply_right_side_vector_stamp(&self, _rhs: &mut VectorStamp<'_, T>) -> Result<()> {
        Ok(())
    }

    fn mna_update_voltage(&self, left_vector: &DVector<T>) -> Result<()>;

    fn mna_update_current(&self, left_vector: &DVector<T>) -> Result<()>;

    /// Body of the pre-step task: refresh time-dependent values and restamp
    /// the right-hand-side contribution.
    fn mna_pre_step(&self, _time: f64) -> Result<()> {
        restamp_right_vector(self)
    }

    /// Body of the post-step task.
    fn mna_post_step(&self, left_vector: &DVector<T>) -> Result<()> {
        self.mna_update_voltage(left_vector)?;
        self.mna_update_current(left_vector)
    }

    /// Tasks run every step.
    fn mna_tasks(self: Arc<Self>) -> Result<Vec<TaskRef>>;

    /// Right-hand-side contributions the solver sums every step.
    fn right_vectors(&self) -> Vec<Attribute<DVector<T>>> {
        self.base().right_vector().map(Attribute::read_only).into_iter().collect()
    }

    fn as_switch(&self) -> Option<&dyn MnaSwitch<T>> {
        None
    }

    fn export_state(&self) -> Result<ComponentState<T>> {
        self.base().export_state()
    }

    fn import_state(&mut self, state: &ComponentState<T>) -> Result<()> {
        self.base().import_state(state)
    }

    // ============ Tearing ============

    fn supports_tearing(&self) -> bool {
        false
    }

    /// Prepare the branch law `v = Z i + e` used when torn from the system.
    /// Sub-components returned by [`mna_tear_ground_components`] are
    /// MNA-initialized here against `left_vector`.
    ///
    /// [`mna_tear_ground_components`]: MnaComponent::mna_tear_ground_components
    fn mna_tear_initialize(
        &mut self,
        _omega: f64,
        _time_step: f64,
        _left_vector: &Attribute<DVector<T>>,
    ) -> Result<()> {
        Err(GridError::unsupported(self.name(), "tearing"))
    }

    /// Sub-components that stay in the main system when this one is torn.
    fn mna_tear_ground_components(&self) -> Vec<Arc<dyn MnaComponent<T>>> {
        Vec::new()
    }

    /// Add the branch impedance `Z` at `(index, index)` of the tear matrix.
    fn mna_tear_apply_matrix_stamp(
        &self,
        _tear_matrix: &mut MatrixStamp<'_, T>,
        _index: usize,
    ) -> Result<()> {
        Err(GridError::unsupported(self.name(), "tearing"))
    }

    /// Add the branch source term `e` at `index` of the tear voltage vector.
    fn mna_tear_apply_voltage_stamp(
        &self,
        _voltage: &mut VectorStamp<'_, T>,
        _index: usize,
    ) -> Result<()> {
        Err(GridError::unsupported(self.name(), "tearing"))
    }

    /// Store the branch voltage and current recovered by the tearing solve.
    fn mna_tear_post_step(&self, _voltage: T, _current: T) -> Result<()> {
        Err(GridError::unsupported(self.name(), "tearing"))
    }
}

/// Zero the component's right-hand-side contribution and stamp it again.
pub fn restamp_right_vector<T, C>(component: &C) -> Result<()>
where
    T: MnaScalar,
    C: MnaComponent<T> + ?Sized,
{
    let Some(rv) = component.base().right_vector() else {
        return Ok(());
    };
    rv.update(|v| {
        v.fill(T::default());
        let mut stamp = VectorStamp::new(v, component.name());
        component.mna_apply_right_side_vector_stamp(&mut stamp)
    })?
}

/// Pre-step task writing the component's right-hand-side contribution.
pub fn pre_step_task<T, C>(component: &Arc<C>) -> Result<Task>
where
    T: MnaScalar,
    C: MnaComponent<T> + 'static,
{
    let rv = component.base().right_vector().ok_or_else(|| {
        GridError::invalid_topology(format!(
            "component '{}' has no right-hand-side contribution",
            component.name()
        ))
    })?;
    let modified = rv.reference();
    let comp = Arc::clone(component);
    Ok(Task::new(format!("{}.MnaPreStep", component.name()), move |time, _| {
        comp.mna_pre_step(time)
    })
    .with_modified(modified))
}

/// Post-step task reading the solution vector back into the interface
/// attributes.
pub fn post_step_task<T, C>(component: &Arc<C>) -> Result<Task>
where
    T: MnaScalar,
    C: MnaComponent<T> + 'static,
{
    let left_vector = component.base().left_vector()?;
    let comp = Arc::clone(component);
    let lv = left_vector.clone();
    Ok(Task::new(format!("{}.MnaPostStep", component.name()), move |_, _| {
        lv.with(|x| comp.mna_post_step(x))?
    })
    .with_dependency(left_vector.reference())
    .with_modified_attributes(component.base().interface_references()))
}

/// Exclusive access to a sub-component that has not been shared yet.
pub(crate) fn exclusive<'a, C>(sub: &'a mut Arc<C>, owner: &str) -> Result<&'a mut C> {
    Arc::get_mut(sub).ok_or_else(|| GridError::InvalidSolverState {
        solver: owner.to_string(),
        expected: "exclusively owned sub-components",
        actual: "shared",
    })
}

/// Validate a strictly positive, finite parameter.
pub(crate) fn positive(component: &str, param: &str, value: f64) -> Result<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(GridError::invalid_parameter(
            component,
            param,
            format!("must be positive and finite, got {}", value),
        ))
    }
}
