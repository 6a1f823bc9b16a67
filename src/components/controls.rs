//! Control components: Switch.

use std::sync::Arc;

use log::debug;
use nalgebra::DVector;

use super::{positive, post_step_task, ComponentBase, MnaComponent, MnaSwitch};
use crate::attribute::{AccessFlags, Attribute};
use crate::circuit::MnaScalar;
use crate::error::{GridError, Result};
use crate::scheduler::TaskRef;
use crate::solver::{MatrixStamp, VectorStamp};

/// A switch modeled as a resistance that takes one of two values.
///
/// The state lives in the writable `is_closed` attribute. The solver keeps a
/// factorized system matrix per switch state combination and picks the one
/// matching the current states before each solve.
#[derive(Debug)]
pub struct Switch<T: MnaScalar> {
    base: ComponentBase<T>,
    open_resistance: f64,
    closed_resistance: f64,
    is_closed: Attribute<bool>,
}

impl<T: MnaScalar> Switch<T> {
    /// Resistance when closed.
    pub const R_CLOSED: f64 = 0.01;
    /// Resistance when open.
    pub const R_OPEN: f64 = 1e9;

    /// Create a new switch with the default open/closed resistances.
    pub fn new(name: &str, closed: bool) -> Result<Self> {
        Self::with_resistances(name, Self::R_OPEN, Self::R_CLOSED, closed)
    }

    pub fn with_resistances(
        name: &str,
        open_resistance: f64,
        closed_resistance: f64,
        closed: bool,
    ) -> Result<Self> {
        let open_resistance = positive(name, "R_open", open_resistance)?;
        let closed_resistance = positive(name, "R_closed", closed_resistance)?;
        if closed_resistance >= open_resistance {
            return Err(GridError::invalid_parameter(
                name,
                "R_closed",
                "must be smaller than the open resistance",
            ));
        }
        let mut base = ComponentBase::new(name, 2)?;
        let attributes = base.attributes_mut();
        attributes.declare("R_open", open_resistance, AccessFlags::READ)?;
        attributes.declare("R_closed", closed_resistance, AccessFlags::READ)?;
        let is_closed = attributes.declare("is_closed", closed, AccessFlags::READ_WRITE)?;
        Ok(Self {
            base,
            open_resistance,
            closed_resistance,
            is_closed,
        })
    }

    pub fn resistance(&self, closed: bool) -> f64 {
        if closed {
            self.closed_resistance
        } else {
            self.open_resistance
        }
    }

    fn conductance(&self, closed: bool) -> T {
        T::from_real(1.0 / self.resistance(closed))
    }

    /// Set the switch state.
    pub fn set_state(&self, closed: bool) -> Result<()> {
        self.is_closed.set(closed)
    }

    /// Toggle the switch state.
    pub fn toggle(&self) -> Result<()> {
        self.is_closed.update(|closed| *closed = !*closed)
    }
}

impl<T: MnaScalar> MnaSwitch<T> for Switch<T> {
    fn state_attribute(&self) -> Attribute<bool> {
        self.is_closed.public()
    }

    fn mna_apply_switch_system_matrix_stamp(
        &self,
        closed: bool,
        matrix: &mut MatrixStamp<'_, T>,
    ) -> Result<()> {
        matrix.add_admittance(
            self.base.matrix_index(0)?,
            self.base.matrix_index(1)?,
            self.conductance(closed),
        )
    }
}

impl<T: MnaScalar> MnaComponent<T> for Switch<T> {
    fn base(&self) -> &ComponentBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase<T> {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "Switch"
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn MnaComponent<T>>> {
        Ok(Box::new(Switch::<T>::with_resistances(
            name,
            self.open_resistance,
            self.closed_resistance,
            self.is_closed.get()?,
        )?))
    }

    fn initialize_from_powerflow(&mut self, _frequency: f64) -> Result<()> {
        self.base.check_connected()?;
        let v = self.base.initial_voltage(1)? - self.base.initial_voltage(0)?;
        let closed = self.is_closed.get()?;
        let i = v / self.resistance(closed);
        self.base.intf_voltage().set(T::from_phasor(v))?;
        self.base.intf_current().set(T::from_phasor(i))?;
        debug!(
            "{}: initialized from power flow, closed = {}, v = {}",
            self.base.name(),
            closed,
            v
        );
        Ok(())
    }

    fn mna_initialize(
        &mut self,
        _omega: f64,
        _time_step: f64,
        left_vector: &Attribute<DVector<T>>,
    ) -> Result<()> {
        self.base.attach_left_vector(left_vector)
    }

    fn mna_apply_system_matrix_stamp(&self, matrix: &mut MatrixStamp<'_, T>) -> Result<()> {
        self.mna_apply_switch_system_matrix_stamp(self.is_closed.get()?, matrix)
    }

    fn mna_update_voltage(&self, left_vector: &DVector<T>) -> Result<()> {
        self.base
            .intf_voltage()
            .set(self.base.voltage_across(left_vector)?)
    }

    fn mna_update_current(&self, _left_vector: &DVector<T>) -> Result<()> {
        let v = self.base.intf_voltage().get()?;
        let g = self.conductance(self.is_closed.get()?);
        self.base.intf_current().set(v * g)
    }

    fn mna_tasks(self: Arc<Self>) -> Result<Vec<TaskRef>> {
        let post = post_step_task::<T, _>(&self)?.with_dependency(self.is_closed.reference());
        Ok(vec![post.into_ref()])
    }

    fn as_switch(&self) -> Option<&dyn MnaSwitch<T>> {
        Some(self)
    }

    fn supports_tearing(&self) -> bool {
        true
    }

    fn mna_tear_initialize(
        &mut self,
        _omega: f64,
        _time_step: f64,
        _left_vector: &Attribute<DVector<T>>,
    ) -> Result<()> {
        Ok(())
    }

    fn mna_tear_apply_matrix_stamp(
        &self,
        tear_matrix: &mut MatrixStamp<'_, T>,
        index: usize,
    ) -> Result<()> {
        let r = self.resistance(self.is_closed.get()?);
        tear_matrix.add(index, index, T::from_real(r))
    }

    fn mna_tear_apply_voltage_stamp(
        &self,
        _voltage: &mut VectorStamp<'_, T>,
        _index: usize,
    ) -> Result<()> {
        Ok(())
    }

    fn mna_tear_post_step(&self, voltage: T, current: T) -> Result<()> {
        self.base.intf_voltage().set(voltage)?;
        self.base.intf_current().set(current)
    }
}
