//! Independent sources: ideal voltage source, voltage source behind a
//! resistance, and current source.
//!
//! Source references are phasors. Without a source frequency the value is
//! constant: a DC value in the real domain, a fixed phasor in the complex
//! domain. With a source frequency `f` the value at time `t` is
//! `V * exp(j(2πf - ω)t)`, where `ω` is the shift of the domain, so the real
//! domain sees `Re(V * exp(j2πft))`.

use std::f64::consts::PI;
use std::sync::Arc;

use log::debug;
use nalgebra::DVector;
use num_complex::Complex64;

use super::{
    positive, post_step_task, pre_step_task, restamp_right_vector, ComponentBase, MnaComponent,
};
use crate::attribute::{AccessFlags, Attribute};
use crate::circuit::MnaScalar;
use crate::error::{GridError, Result};
use crate::scheduler::TaskRef;
use crate::solver::{MatrixStamp, VectorStamp};

/// Value of a phasor reference at `time`.
fn source_value<T: MnaScalar>(reference: Complex64, frequency: Option<f64>, omega: f64, time: f64) -> T {
    match frequency {
        None => T::from_phasor(reference),
        Some(f) => {
            let angle = (2.0 * PI * f - T::phasor_shift(omega)) * time;
            T::from_phasor(reference * Complex64::from_polar(1.0, angle))
        }
    }
}

fn check_frequency(name: &str, frequency: Option<f64>) -> Result<Option<f64>> {
    match frequency {
        Some(f) if !f.is_finite() || f < 0.0 => Err(GridError::invalid_parameter(
            name,
            "f_src",
            format!("must be finite and non-negative, got {}", f),
        )),
        other => Ok(other),
    }
}

/// An ideal voltage source.
///
/// Adds one virtual node whose unknown is the branch current through the
/// source. `V_ref = V(terminal 1) - V(terminal 0)`.
#[derive(Debug)]
pub struct VoltageSource<T: MnaScalar> {
    base: ComponentBase<T>,
    voltage_ref: Attribute<Complex64>,
    frequency: Option<f64>,
    omega: f64,
}

impl<T: MnaScalar> VoltageSource<T> {
    /// Create a new voltage source.
    pub fn new(name: &str, voltage: Complex64, frequency: Option<f64>) -> Result<Self> {
        let frequency = check_frequency(name, frequency)?;
        let mut base = ComponentBase::new(name, 2)?
            .with_right_vector()?
            .with_virtual_node("branch");
        let voltage_ref = base
            .attributes_mut()
            .declare("V_ref", voltage, AccessFlags::READ_WRITE)?;
        Ok(Self {
            base,
            voltage_ref,
            frequency,
            omega: 0.0,
        })
    }

    pub fn voltage_ref(&self) -> Result<Complex64> {
        self.voltage_ref.get()
    }

    pub fn set_parameters(&mut self, voltage: Complex64, frequency: Option<f64>) -> Result<()> {
        self.frequency = check_frequency(self.base.name(), frequency)?;
        self.voltage_ref.set(voltage)
    }
}

impl<T: MnaScalar> MnaComponent<T> for VoltageSource<T> {
    fn base(&self) -> &ComponentBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase<T> {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "VoltageSource"
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn MnaComponent<T>>> {
        Ok(Box::new(VoltageSource::<T>::new(
            name,
            self.voltage_ref.get()?,
            self.frequency,
        )?))
    }

    fn initialize_from_powerflow(&mut self, _frequency: f64) -> Result<()> {
        self.base.check_connected()?;
        let v = self.voltage_ref.get()?;
        self.base.intf_voltage().set(T::from_phasor(v))?;
        let node = self.base.virtual_node(0)?;
        node.set_initial_voltage(Complex64::new(0.0, 0.0))?;
        debug!("{}: initialized from power flow, v = {}", self.base.name(), v);
        Ok(())
    }

    fn mna_initialize(
        &mut self,
        omega: f64,
        _time_step: f64,
        left_vector: &Attribute<DVector<T>>,
    ) -> Result<()> {
        self.omega = omega;
        self.base.attach_left_vector(left_vector)
    }

    fn mna_apply_system_matrix_stamp(&self, matrix: &mut MatrixStamp<'_, T>) -> Result<()> {
        matrix.add_voltage_branch(
            self.base.matrix_index(1)?,
            self.base.matrix_index(0)?,
            self.base.virtual_index(0)?,
        )
    }

    fn mna_apply_right_side_vector_stamp(&self, rhs: &mut VectorStamp<'_, T>) -> Result<()> {
        rhs.add(self.base.virtual_index(0)?, self.base.intf_voltage().get()?)
    }

    fn mna_pre_step(&self, time: f64) -> Result<()> {
        let v = source_value(self.voltage_ref.get()?, self.frequency, self.omega, time);
        self.base.intf_voltage().set(v)?;
        restamp_right_vector(self)
    }

    fn mna_update_voltage(&self, left_vector: &DVector<T>) -> Result<()> {
        self.base
            .intf_voltage()
            .set(self.base.voltage_across(left_vector)?)
    }

    fn mna_update_current(&self, left_vector: &DVector<T>) -> Result<()> {
        let branch = self.base.virtual_index(0)?;
        let current = super::vector_value(left_vector, Some(branch), self.base.name())?;
        self.base.intf_current().set(current)
    }

    fn mna_tasks(self: Arc<Self>) -> Result<Vec<TaskRef>> {
        let pre = pre_step_task::<T, _>(&self)?
            .with_dependency(self.voltage_ref.reference())
            .with_modified(self.base.intf_voltage().reference());
        let post = post_step_task::<T, _>(&self)?;
        Ok(vec![pre.into_ref(), post.into_ref()])
    }
}

/// A voltage source behind a series resistance, stamped as its Norton
/// equivalent: conductance `1/R` in parallel with a current source `V/R`.
#[derive(Debug)]
pub struct VoltageSourceNorton<T: MnaScalar> {
    base: ComponentBase<T>,
    voltage_ref: Attribute<Complex64>,
    /// Open-circuit source voltage of the running step
    source_voltage: Attribute<T>,
    frequency: Option<f64>,
    resistance: f64,
    conductance: T,
    omega: f64,
}

impl<T: MnaScalar> VoltageSourceNorton<T> {
    pub fn new(
        name: &str,
        voltage: Complex64,
        frequency: Option<f64>,
        resistance: f64,
    ) -> Result<Self> {
        let frequency = check_frequency(name, frequency)?;
        let resistance = positive(name, "R", resistance)?;
        let mut base = ComponentBase::new(name, 2)?.with_right_vector()?;
        let attributes = base.attributes_mut();
        let voltage_ref = attributes.declare("V_ref", voltage, AccessFlags::READ_WRITE)?;
        let source_voltage = attributes.declare("v_src", T::from_phasor(voltage), AccessFlags::READ)?;
        attributes.declare("R", resistance, AccessFlags::READ)?;
        Ok(Self {
            base,
            voltage_ref,
            source_voltage,
            frequency,
            resistance,
            conductance: T::from_real(1.0 / resistance),
            omega: 0.0,
        })
    }

    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    pub fn voltage_ref(&self) -> Result<Complex64> {
        self.voltage_ref.get()
    }
}

impl<T: MnaScalar> MnaComponent<T> for VoltageSourceNorton<T> {
    fn base(&self) -> &ComponentBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase<T> {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "VoltageSourceNorton"
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn MnaComponent<T>>> {
        Ok(Box::new(VoltageSourceNorton::<T>::new(
            name,
            self.voltage_ref.get()?,
            self.frequency,
            self.resistance,
        )?))
    }

    fn initialize_from_powerflow(&mut self, _frequency: f64) -> Result<()> {
        self.base.check_connected()?;
        let v = self.base.initial_voltage(1)? - self.base.initial_voltage(0)?;
        let v_src = self.voltage_ref.get()?;
        let i = (v - v_src) / self.resistance;
        self.base.intf_voltage().set(T::from_phasor(v))?;
        self.base.intf_current().set(T::from_phasor(i))?;
        self.source_voltage.set(T::from_phasor(v_src))?;
        debug!(
            "{}: initialized from power flow, v = {}, i = {}",
            self.base.name(),
            v,
            i
        );
        Ok(())
    }

    fn mna_initialize(
        &mut self,
        omega: f64,
        _time_step: f64,
        left_vector: &Attribute<DVector<T>>,
    ) -> Result<()> {
        self.omega = omega;
        self.base.attach_left_vector(left_vector)
    }

    fn mna_apply_system_matrix_stamp(&self, matrix: &mut MatrixStamp<'_, T>) -> Result<()> {
        matrix.add_admittance(
            self.base.matrix_index(0)?,
            self.base.matrix_index(1)?,
            self.conductance,
        )
    }

    fn mna_apply_right_side_vector_stamp(&self, rhs: &mut VectorStamp<'_, T>) -> Result<()> {
        let v_src = self.source_voltage.get()?;
        rhs.add_current(
            self.base.matrix_index(0)?,
            self.base.matrix_index(1)?,
            v_src * self.conductance,
        )
    }

    fn mna_pre_step(&self, time: f64) -> Result<()> {
        let v = source_value(self.voltage_ref.get()?, self.frequency, self.omega, time);
        self.source_voltage.set(v)?;
        restamp_right_vector(self)
    }

    fn mna_update_voltage(&self, left_vector: &DVector<T>) -> Result<()> {
        self.base
            .intf_voltage()
            .set(self.base.voltage_across(left_vector)?)
    }

    /// `i = (v - v_src) / R`, flowing from terminal 1 to terminal 0.
    fn mna_update_current(&self, _left_vector: &DVector<T>) -> Result<()> {
        let v = self.base.intf_voltage().get()?;
        let v_src = self.source_voltage.get()?;
        self.base.intf_current().set((v - v_src) * self.conductance)
    }

    fn mna_tasks(self: Arc<Self>) -> Result<Vec<TaskRef>> {
        let source = self.source_voltage.reference();
        let pre = pre_step_task::<T, _>(&self)?
            .with_dependency(self.voltage_ref.reference())
            .with_modified(source.clone());
        let post = post_step_task::<T, _>(&self)?.with_dependency(source);
        Ok(vec![pre.into_ref(), post.into_ref()])
    }
}

/// An ideal current source. `I_ref` is injected into the node at terminal 1
/// and drawn from the node at terminal 0; the interface current reports
/// `I_ref`.
#[derive(Debug)]
pub struct CurrentSource<T: MnaScalar> {
    base: ComponentBase<T>,
    current_ref: Attribute<Complex64>,
    frequency: Option<f64>,
    omega: f64,
}

impl<T: MnaScalar> CurrentSource<T> {
    pub fn new(name: &str, current: Complex64, frequency: Option<f64>) -> Result<Self> {
        let frequency = check_frequency(name, frequency)?;
        let mut base = ComponentBase::new(name, 2)?.with_right_vector()?;
        let current_ref = base
            .attributes_mut()
            .declare("I_ref", current, AccessFlags::READ_WRITE)?;
        Ok(Self {
            base,
            current_ref,
            frequency,
            omega: 0.0,
        })
    }
}

impl<T: MnaScalar> MnaComponent<T> for CurrentSource<T> {
    fn base(&self) -> &ComponentBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase<T> {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "CurrentSource"
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn MnaComponent<T>>> {
        Ok(Box::new(CurrentSource::<T>::new(
            name,
            self.current_ref.get()?,
            self.frequency,
        )?))
    }

    fn initialize_from_powerflow(&mut self, _frequency: f64) -> Result<()> {
        self.base.check_connected()?;
        let v = self.base.initial_voltage(1)? - self.base.initial_voltage(0)?;
        self.base.intf_voltage().set(T::from_phasor(v))?;
        self.base
            .intf_current()
            .set(T::from_phasor(self.current_ref.get()?))
    }

    fn mna_initialize(
        &mut self,
        omega: f64,
        _time_step: f64,
        left_vector: &Attribute<DVector<T>>,
    ) -> Result<()> {
        self.omega = omega;
        self.base.attach_left_vector(left_vector)
    }

    fn mna_apply_system_matrix_stamp(&self, _matrix: &mut MatrixStamp<'_, T>) -> Result<()> {
        Ok(())
    }

    fn mna_apply_right_side_vector_stamp(&self, rhs: &mut VectorStamp<'_, T>) -> Result<()> {
        rhs.add_current(
            self.base.matrix_index(0)?,
            self.base.matrix_index(1)?,
            self.base.intf_current().get()?,
        )
    }

    fn mna_pre_step(&self, time: f64) -> Result<()> {
        let i = source_value(self.current_ref.get()?, self.frequency, self.omega, time);
        self.base.intf_current().set(i)?;
        restamp_right_vector(self)
    }

    fn mna_update_voltage(&self, left_vector: &DVector<T>) -> Result<()> {
        self.base
            .intf_voltage()
            .set(self.base.voltage_across(left_vector)?)
    }

    fn mna_update_current(&self, _left_vector: &DVector<T>) -> Result<()> {
        Ok(())
    }

    fn mna_tasks(self: Arc<Self>) -> Result<Vec<TaskRef>> {
        let pre = pre_step_task::<T, _>(&self)?
            .with_dependency(self.current_ref.reference())
            .with_modified(self.base.intf_current().reference());
        let post = post_step_task::<T, _>(&self)?;
        Ok(vec![pre.into_ref(), post.into_ref()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::SimNode;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    #[test]
    fn test_source_value_constant_and_rotating() {
        let v = Complex64::new(10.0, 0.0);
        assert_eq!(source_value::<f64>(v, None, 314.0, 0.3), 10.0);
        // Quarter period of a 50 Hz source in the real domain
        let emt: f64 = source_value(v, Some(50.0), 2.0 * PI * 50.0, 0.005);
        assert_relative_eq!(emt, 0.0, epsilon = 1e-9);
        // Same frequency as the system: constant envelope
        let dp: Complex64 = source_value(v, Some(50.0), 2.0 * PI * 50.0, 0.005);
        assert_relative_eq!(dp.re, 10.0, epsilon = 1e-9);
        assert_relative_eq!(dp.im, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ideal_source_stamps_branch_row() {
        let n = SimNode::new("n1");
        n.assign_matrix_index(0).unwrap();
        let mut vs =
            VoltageSource::<f64>::new("vs", Complex64::new(5.0, 0.0), None).unwrap();
        vs.connect(&[SimNode::ground(), n]).unwrap();
        vs.virtual_nodes()[0].assign_matrix_index(1).unwrap();
        let lv = Attribute::new("lv", DVector::<f64>::zeros(2), AccessFlags::READ);
        vs.mna_initialize(0.0, 1e-3, &lv).unwrap();

        let mut m = DMatrix::zeros(2, 2);
        vs.mna_apply_system_matrix_stamp(&mut MatrixStamp::new(&mut m, "t"))
            .unwrap();
        assert_eq!(m, DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 1.0, 0.0]));

        vs.mna_pre_step(0.0).unwrap();
        let rv = vs.base().right_vector().unwrap().get().unwrap();
        assert_eq!(rv.as_slice(), &[0.0, 5.0]);
    }

    #[test]
    fn test_norton_source_injects_into_terminal_one() {
        let n = SimNode::new("n1");
        n.assign_matrix_index(0).unwrap();
        let mut vs =
            VoltageSourceNorton::<f64>::new("vs", Complex64::new(10.0, 0.0), None, 2.0).unwrap();
        vs.connect(&[SimNode::ground(), n]).unwrap();
        let lv = Attribute::new("lv", DVector::<f64>::zeros(1), AccessFlags::READ);
        vs.mna_initialize(0.0, 1e-3, &lv).unwrap();
        vs.mna_pre_step(0.0).unwrap();
        let rv = vs.base().right_vector().unwrap().get().unwrap();
        assert_eq!(rv[0], 5.0);

        // Open circuit: node at the source voltage, no current
        vs.mna_post_step(&DVector::from_vec(vec![10.0])).unwrap();
        assert_eq!(vs.base().intf_current().get().unwrap(), 0.0);
    }

    #[test]
    fn test_current_source_direction() {
        let n = SimNode::new("n1");
        n.assign_matrix_index(0).unwrap();
        let mut cs = CurrentSource::<f64>::new("cs", Complex64::new(3.0, 0.0), None).unwrap();
        cs.connect(&[SimNode::ground(), n]).unwrap();
        let lv = Attribute::new("lv", DVector::<f64>::zeros(1), AccessFlags::READ);
        cs.mna_initialize(0.0, 1e-3, &lv).unwrap();
        cs.mna_pre_step(0.0).unwrap();
        assert_eq!(cs.base().right_vector().unwrap().get().unwrap()[0], 3.0);
    }

    #[test]
    fn test_negative_frequency_rejected() {
        assert!(CurrentSource::<f64>::new("cs", Complex64::new(1.0, 0.0), Some(-1.0)).is_err());
    }
}
