//! Linear passive components: Resistor, Inductor, Capacitor.

use std::f64::consts::PI;
use std::sync::Arc;

use log::{debug, warn};
use nalgebra::DVector;
use num_complex::Complex64;

use super::{
    positive, post_step_task, pre_step_task, restamp_right_vector, ComponentBase, MnaComponent,
};
use crate::attribute::{AccessFlags, Attribute};
use crate::circuit::MnaScalar;
use crate::error::Result;
use crate::scheduler::TaskRef;
use crate::solver::{MatrixStamp, VectorStamp};

/// An ideal resistor.
#[derive(Debug)]
pub struct Resistor<T: MnaScalar> {
    base: ComponentBase<T>,
    resistance: f64,
    resistance_attr: Attribute<f64>,
    conductance: T,
}

impl<T: MnaScalar> Resistor<T> {
    /// Create a new resistor.
    pub fn new(name: &str, resistance: f64) -> Result<Self> {
        let resistance = positive(name, "R", resistance)?;
        let mut base = ComponentBase::new(name, 2)?;
        let resistance_attr = base.attributes_mut().declare("R", resistance, AccessFlags::READ)?;
        Ok(Self {
            base,
            resistance,
            resistance_attr,
            conductance: T::from_real(1.0 / resistance),
        })
    }

    pub fn set_parameters(&mut self, resistance: f64) -> Result<()> {
        self.resistance = positive(self.base.name(), "R", resistance)?;
        self.conductance = T::from_real(1.0 / self.resistance);
        self.resistance_attr.set(self.resistance)
    }

    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    /// Set the interface state directly, used by compound components.
    pub(crate) fn set_interface(&self, voltage: T) -> Result<()> {
        self.base.intf_voltage().set(voltage)?;
        self.base.intf_current().set(voltage * self.conductance)
    }
}

impl<T: MnaScalar> MnaComponent<T> for Resistor<T> {
    fn base(&self) -> &ComponentBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase<T> {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "Resistor"
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn MnaComponent<T>>> {
        Ok(Box::new(Resistor::<T>::new(name, self.resistance)?))
    }

    fn initialize_from_powerflow(&mut self, _frequency: f64) -> Result<()> {
        self.base.check_connected()?;
        let v = self.base.initial_voltage(1)? - self.base.initial_voltage(0)?;
        self.set_interface(T::from_phasor(v))?;
        debug!("{}: initialized from power flow, v = {}", self.base.name(), v);
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
        matrix.add_admittance(
            self.base.matrix_index(0)?,
            self.base.matrix_index(1)?,
            self.conductance,
        )
    }

    fn mna_update_voltage(&self, left_vector: &DVector<T>) -> Result<()> {
        self.base
            .intf_voltage()
            .set(self.base.voltage_across(left_vector)?)
    }

    fn mna_update_current(&self, _left_vector: &DVector<T>) -> Result<()> {
        let v = self.base.intf_voltage().get()?;
        self.base.intf_current().set(v * self.conductance)
    }

    fn mna_tasks(self: Arc<Self>) -> Result<Vec<TaskRef>> {
        Ok(vec![post_step_task::<T, _>(&self)?.into_ref()])
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
        tear_matrix.add(index, index, T::from_real(self.resistance))
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

/// An inductor.
///
/// Discretized with the trapezoidal rule. In the phasor domain the
/// derivative picks up the `jω` shift of the system frequency:
///   i(k) = G_eq * v(k) + I_hist
///   G_eq = 1 / (2L/dt + jωL)
///   I_hist = G_eq * v(k-1) + F * i(k-1),  F = (2L/dt - jωL) / (2L/dt + jωL)
///
/// In the real domain `ω` is zero.
#[derive(Debug)]
pub struct Inductor<T: MnaScalar> {
    base: ComponentBase<T>,
    inductance: f64,
    inductance_attr: Attribute<f64>,
    /// Companion conductance
    equiv_cond: T,
    /// Weight of the previous current in the history term
    prev_curr_fac: T,
    /// History current source of the running step
    history: Attribute<T>,
}

impl<T: MnaScalar> Inductor<T> {
    /// Create a new inductor.
    pub fn new(name: &str, inductance: f64) -> Result<Self> {
        let inductance = positive(name, "L", inductance)?;
        let mut base = ComponentBase::new(name, 2)?.with_right_vector()?;
        let inductance_attr = base.attributes_mut().declare("L", inductance, AccessFlags::READ)?;
        let history = base
            .attributes_mut()
            .declare("i_hist", T::default(), AccessFlags::READ)?;
        Ok(Self {
            base,
            inductance,
            inductance_attr,
            equiv_cond: T::default(),
            prev_curr_fac: T::default(),
            history,
        })
    }

    pub fn set_parameters(&mut self, inductance: f64) -> Result<()> {
        self.inductance = positive(self.base.name(), "L", inductance)?;
        self.inductance_attr.set(self.inductance)
    }

    pub fn inductance(&self) -> f64 {
        self.inductance
    }

    pub fn equivalent_conductance(&self) -> T {
        self.equiv_cond
    }

    fn compute_coefficients(&mut self, omega: f64, time_step: f64) {
        let a = T::from_real(2.0 * self.inductance / time_step);
        let b = T::from_parts(0.0, T::phasor_shift(omega) * self.inductance);
        self.equiv_cond = T::one() / (a + b);
        self.prev_curr_fac = (a - b) / (a + b);
    }

    /// History term from the interface state of the previous step.
    fn update_history(&self) -> Result<T> {
        let v = self.base.intf_voltage().get()?;
        let i = self.base.intf_current().get()?;
        let history = self.equiv_cond * v + self.prev_curr_fac * i;
        self.history.set(history)?;
        Ok(history)
    }

    pub(crate) fn set_interface(&self, voltage: T, current: T) -> Result<()> {
        self.base.intf_voltage().set(voltage)?;
        self.base.intf_current().set(current)
    }

    /// Steady-state current for a phasor voltage at `frequency`.
    pub(crate) fn steady_state_current(&self, voltage: Complex64, frequency: f64) -> Complex64 {
        let reactance = 2.0 * PI * frequency * self.inductance;
        if reactance == 0.0 {
            warn!(
                "{}: zero frequency, initial current set to zero",
                self.base.name()
            );
            return Complex64::new(0.0, 0.0);
        }
        voltage / Complex64::new(0.0, reactance)
    }
}

impl<T: MnaScalar> MnaComponent<T> for Inductor<T> {
    fn base(&self) -> &ComponentBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase<T> {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "Inductor"
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn MnaComponent<T>>> {
        Ok(Box::new(Inductor::<T>::new(name, self.inductance)?))
    }

    fn initialize_from_powerflow(&mut self, frequency: f64) -> Result<()> {
        self.base.check_connected()?;
        let v = self.base.initial_voltage(1)? - self.base.initial_voltage(0)?;
        let i = self.steady_state_current(v, frequency);
        self.set_interface(T::from_phasor(v), T::from_phasor(i))?;
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
        time_step: f64,
        left_vector: &Attribute<DVector<T>>,
    ) -> Result<()> {
        self.compute_coefficients(omega, time_step);
        self.base.attach_left_vector(left_vector)?;
        self.update_history()?;
        Ok(())
    }

    fn mna_apply_system_matrix_stamp(&self, matrix: &mut MatrixStamp<'_, T>) -> Result<()> {
        matrix.add_admittance(
            self.base.matrix_index(0)?,
            self.base.matrix_index(1)?,
            self.equiv_cond,
        )
    }

    fn mna_apply_right_side_vector_stamp(&self, rhs: &mut VectorStamp<'_, T>) -> Result<()> {
        let history = self.history.get()?;
        rhs.add_current(self.base.matrix_index(1)?, self.base.matrix_index(0)?, history)
    }

    fn mna_pre_step(&self, _time: f64) -> Result<()> {
        self.update_history()?;
        restamp_right_vector(self)
    }

    fn mna_update_voltage(&self, left_vector: &DVector<T>) -> Result<()> {
        self.base
            .intf_voltage()
            .set(self.base.voltage_across(left_vector)?)
    }

    fn mna_update_current(&self, _left_vector: &DVector<T>) -> Result<()> {
        let v = self.base.intf_voltage().get()?;
        let history = self.history.get()?;
        self.base.intf_current().set(self.equiv_cond * v + history)
    }

    fn mna_tasks(self: Arc<Self>) -> Result<Vec<TaskRef>> {
        let [v, i] = self.base.interface_references();
        let history = self.history.reference();
        let pre = pre_step_task::<T, _>(&self)?
            .with_prev_step_dependencies([v, i])
            .with_modified(history.clone());
        let post = post_step_task::<T, _>(&self)?.with_dependency(history);
        Ok(vec![pre.into_ref(), post.into_ref()])
    }

    fn supports_tearing(&self) -> bool {
        true
    }

    fn mna_tear_initialize(
        &mut self,
        omega: f64,
        time_step: f64,
        _left_vector: &Attribute<DVector<T>>,
    ) -> Result<()> {
        self.compute_coefficients(omega, time_step);
        self.update_history()?;
        Ok(())
    }

    fn mna_tear_apply_matrix_stamp(
        &self,
        tear_matrix: &mut MatrixStamp<'_, T>,
        index: usize,
    ) -> Result<()> {
        tear_matrix.add(index, index, T::one() / self.equiv_cond)
    }

    /// Source term `e = -I_hist / G_eq` of the branch law.
    fn mna_tear_apply_voltage_stamp(
        &self,
        voltage: &mut VectorStamp<'_, T>,
        index: usize,
    ) -> Result<()> {
        let history = self.update_history()?;
        voltage.add(index, -history / self.equiv_cond)
    }

    fn mna_tear_post_step(&self, voltage: T, current: T) -> Result<()> {
        self.set_interface(voltage, current)
    }
}

/// A capacitor.
///
/// Trapezoidal companion model:
///   i(k) = G_eq * v(k) + I_hist
///   G_eq = 2C/dt + jωC
///   I_hist = -((2C/dt - jωC) * v(k-1) + i(k-1))
#[derive(Debug)]
pub struct Capacitor<T: MnaScalar> {
    base: ComponentBase<T>,
    capacitance: f64,
    capacitance_attr: Attribute<f64>,
    equiv_cond: T,
    /// Weight of the previous voltage in the history term
    prev_volt_fac: T,
    history: Attribute<T>,
}

impl<T: MnaScalar> Capacitor<T> {
    /// Create a new capacitor.
    pub fn new(name: &str, capacitance: f64) -> Result<Self> {
        let capacitance = positive(name, "C", capacitance)?;
        let mut base = ComponentBase::new(name, 2)?.with_right_vector()?;
        let capacitance_attr = base
            .attributes_mut()
            .declare("C", capacitance, AccessFlags::READ)?;
        let history = base
            .attributes_mut()
            .declare("i_hist", T::default(), AccessFlags::READ)?;
        Ok(Self {
            base,
            capacitance,
            capacitance_attr,
            equiv_cond: T::default(),
            prev_volt_fac: T::default(),
            history,
        })
    }

    pub fn set_parameters(&mut self, capacitance: f64) -> Result<()> {
        self.capacitance = positive(self.base.name(), "C", capacitance)?;
        self.capacitance_attr.set(self.capacitance)
    }

    pub fn capacitance(&self) -> f64 {
        self.capacitance
    }

    fn update_history(&self) -> Result<T> {
        let v = self.base.intf_voltage().get()?;
        let i = self.base.intf_current().get()?;
        let history = -(self.prev_volt_fac * v + i);
        self.history.set(history)?;
        Ok(history)
    }

    pub(crate) fn set_steady_state(&self, voltage: Complex64, frequency: f64) -> Result<()> {
        let i = voltage * Complex64::new(0.0, 2.0 * PI * frequency * self.capacitance);
        self.base.intf_voltage().set(T::from_phasor(voltage))?;
        self.base.intf_current().set(T::from_phasor(i))
    }
}

impl<T: MnaScalar> MnaComponent<T> for Capacitor<T> {
    fn base(&self) -> &ComponentBase<T> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ComponentBase<T> {
        &mut self.base
    }

    fn type_name(&self) -> &'static str {
        "Capacitor"
    }

    fn clone_named(&self, name: &str) -> Result<Box<dyn MnaComponent<T>>> {
        Ok(Box::new(Capacitor::<T>::new(name, self.capacitance)?))
    }

    fn initialize_from_powerflow(&mut self, frequency: f64) -> Result<()> {
        self.base.check_connected()?;
        let v = self.base.initial_voltage(1)? - self.base.initial_voltage(0)?;
        self.set_steady_state(v, frequency)?;
        debug!("{}: initialized from power flow, v = {}", self.base.name(), v);
        Ok(())
    }

    fn mna_initialize(
        &mut self,
        omega: f64,
        time_step: f64,
        left_vector: &Attribute<DVector<T>>,
    ) -> Result<()> {
        let a = T::from_real(2.0 * self.capacitance / time_step);
        let b = T::from_parts(0.0, T::phasor_shift(omega) * self.capacitance);
        self.equiv_cond = a + b;
        self.prev_volt_fac = a - b;
        self.base.attach_left_vector(left_vector)?;
        self.update_history()?;
        Ok(())
    }

    fn mna_apply_system_matrix_stamp(&self, matrix: &mut MatrixStamp<'_, T>) -> Result<()> {
        matrix.add_admittance(
            self.base.matrix_index(0)?,
            self.base.matrix_index(1)?,
            self.equiv_cond,
        )
    }

    fn mna_apply_right_side_vector_stamp(&self, rhs: &mut VectorStamp<'_, T>) -> Result<()> {
        let history = self.history.get()?;
        rhs.add_current(self.base.matrix_index(1)?, self.base.matrix_index(0)?, history)
    }

    fn mna_pre_step(&self, _time: f64) -> Result<()> {
        self.update_history()?;
        restamp_right_vector(self)
    }

    fn mna_update_voltage(&self, left_vector: &DVector<T>) -> Result<()> {
        self.base
            .intf_voltage()
            .set(self.base.voltage_across(left_vector)?)
    }

    fn mna_update_current(&self, _left_vector: &DVector<T>) -> Result<()> {
        let v = self.base.intf_voltage().get()?;
        let history = self.history.get()?;
        self.base.intf_current().set(self.equiv_cond * v + history)
    }

    fn mna_tasks(self: Arc<Self>) -> Result<Vec<TaskRef>> {
        let [v, i] = self.base.interface_references();
        let history = self.history.reference();
        let pre = pre_step_task::<T, _>(&self)?
            .with_prev_step_dependencies([v, i])
            .with_modified(history.clone());
        let post = post_step_task::<T, _>(&self)?.with_dependency(history);
        Ok(vec![pre.into_ref(), post.into_ref()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AccessFlags, AttributeHandle};
    use crate::circuit::{NodeRef, SimNode};
    use crate::error::GridError;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;

    fn connected<C: MnaComponent<f64>>(mut comp: C, n: &NodeRef<f64>) -> C {
        n.assign_matrix_index(0).unwrap();
        comp.connect(&[SimNode::ground(), Arc::clone(n)]).unwrap();
        comp
    }

    fn left_vector(dim: usize) -> Attribute<DVector<f64>> {
        Attribute::new("solver.left_vector", DVector::zeros(dim), AccessFlags::READ)
    }

    #[test]
    fn test_resistor_stamp_and_update() {
        let n = SimNode::new("n1");
        let mut r = connected(Resistor::<f64>::new("r1", 4.0).unwrap(), &n);
        let lv = left_vector(1);
        r.mna_initialize(0.0, 1e-3, &lv).unwrap();
        let mut m = DMatrix::zeros(1, 1);
        r.mna_apply_system_matrix_stamp(&mut MatrixStamp::new(&mut m, "t"))
            .unwrap();
        assert_eq!(m[(0, 0)], 0.25);
        r.mna_post_step(&DVector::from_vec(vec![8.0])).unwrap();
        assert_eq!(r.base().intf_current().get().unwrap(), 2.0);
    }

    #[test]
    fn test_untyped_lookup_cannot_write_parameters() {
        let r = Resistor::<f64>::new("load", 1000.0).unwrap();
        let handle = r.attributes().handle("R").unwrap();
        let AttributeHandle::Real(resistance) = handle else {
            panic!("R should be a real attribute");
        };
        assert!(matches!(
            resistance.set(5.0),
            Err(GridError::AttributeAccess { .. })
        ));
        assert_eq!(resistance.get().unwrap(), 1000.0);
        assert_eq!(r.attributes().get::<f64>("R").unwrap().get().unwrap(), 1000.0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        assert!(Resistor::<f64>::new("r", 0.0).is_err());
        assert!(Inductor::<f64>::new("l", -1.0).is_err());
        assert!(Capacitor::<Complex64>::new("c", f64::INFINITY).is_err());
    }

    #[test]
    fn test_inductor_companion_emt() {
        let n = SimNode::new("n1");
        let mut l = connected(Inductor::<f64>::new("l1", 0.5).unwrap(), &n);
        let lv = left_vector(1);
        l.mna_initialize(2.0 * PI * 50.0, 1e-3, &lv).unwrap();
        assert_relative_eq!(l.equivalent_conductance(), 1e-3);

        // One step with 1 V across from rest: i = G * v
        let l = Arc::new(l);
        l.mna_pre_step(0.0).unwrap();
        l.mna_post_step(&DVector::from_vec(vec![1.0])).unwrap();
        assert_relative_eq!(l.base().intf_current().get().unwrap(), 1e-3);

        // Next step: history = G*v + i = 2e-3, right vector stamped at node 1
        l.mna_pre_step(1e-3).unwrap();
        let rv = l.base().right_vector().unwrap().get().unwrap();
        assert_relative_eq!(rv[0], -2e-3);
    }

    #[test]
    fn test_inductor_phasor_coefficients() {
        let n = SimNode::new("n1");
        n.assign_matrix_index(0).unwrap();
        let mut l = Inductor::<Complex64>::new("l1", 0.1).unwrap();
        l.connect(&[SimNode::ground(), n]).unwrap();
        let lv = Attribute::new("lv", DVector::<Complex64>::zeros(1), AccessFlags::READ);
        let omega = 2.0 * PI * 50.0;
        let dt = 1e-4;
        l.mna_initialize(omega, dt, &lv).unwrap();
        let expected = Complex64::new(1.0, 0.0) / Complex64::new(2.0 * 0.1 / dt, omega * 0.1);
        assert_relative_eq!(l.equivalent_conductance().re, expected.re, epsilon = 1e-15);
        assert_relative_eq!(l.equivalent_conductance().im, expected.im, epsilon = 1e-15);
    }

    #[test]
    fn test_inductor_powerflow_init() {
        let n: NodeRef<Complex64> =
            SimNode::with_initial_voltage("n1", Complex64::new(100.0, 0.0)).unwrap();
        let mut l = Inductor::<Complex64>::new("l1", 1.0 / (2.0 * PI * 50.0)).unwrap();
        l.connect(&[SimNode::ground(), n]).unwrap();
        l.initialize_from_powerflow(50.0).unwrap();
        let i = l.base().intf_current().get().unwrap();
        assert_relative_eq!(i.re, 0.0, epsilon = 1e-9);
        assert_relative_eq!(i.im, -100.0, epsilon = 1e-9);

        // Zero frequency leaves the current at zero
        l.initialize_from_powerflow(0.0).unwrap();
        assert_eq!(l.base().intf_current().get().unwrap(), Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_capacitor_companion_emt() {
        let n = SimNode::new("n1");
        let mut c = connected(Capacitor::<f64>::new("c1", 1e-3).unwrap(), &n);
        let lv = left_vector(1);
        c.mna_initialize(0.0, 1e-3, &lv).unwrap();
        let mut m = DMatrix::zeros(1, 1);
        c.mna_apply_system_matrix_stamp(&mut MatrixStamp::new(&mut m, "t"))
            .unwrap();
        assert_relative_eq!(m[(0, 0)], 2.0);

        c.mna_pre_step(0.0).unwrap();
        c.mna_post_step(&DVector::from_vec(vec![1.0])).unwrap();
        assert_relative_eq!(c.base().intf_current().get().unwrap(), 2.0);

        // history = -(2 * 1 + 2) = -4, stamped as a current into node 1
        c.mna_pre_step(1e-3).unwrap();
        let rv = c.base().right_vector().unwrap().get().unwrap();
        assert_relative_eq!(rv[0], 4.0);
    }

    #[test]
    fn test_unconnected_terminal_fails_powerflow_init() {
        let mut r = Resistor::<f64>::new("r1", 1.0).unwrap();
        assert!(r.initialize_from_powerflow(50.0).is_err());
    }

    #[test]
    fn test_clone_named_is_independent() {
        let r = Resistor::<f64>::new("r1", 10.0).unwrap();
        let copy = r.clone_named("r2").unwrap();
        assert_eq!(copy.name(), "r2");
        assert!(!copy.terminals()[0].is_connected());
        let attr: Attribute<f64> = copy.attributes().get("R").unwrap();
        assert_eq!(attr.get().unwrap(), 10.0);
    }
}
