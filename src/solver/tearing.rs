//! Diakoptics: solving torn branches through a reduced system.
//!
//! Torn branches are removed from the main matrix `A`. Each obeys the branch
//! law `v = Z i + e` and couples to the main system through an incidence
//! column `c` (`+1` at terminal 1, `-1` at terminal 0). With `C` collecting
//! those columns, the branch currents follow from
//!
//! ```text
//! (Cᵀ A⁻¹ C + Z) i = Cᵀ A⁻¹ b - e
//! ```
//!
//! and the node solution is corrected by `x = A⁻¹ b - A⁻¹ C i`.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

use super::backend::SolverBackend;
use super::mna::{pivot_ratio, MatrixStamp, VectorStamp};
use crate::circuit::MnaScalar;
use crate::components::MnaComponent;
use crate::error::{GridError, Result};

/// Reduced tear system for one main-system solver.
pub(crate) struct TearSystem<T: MnaScalar> {
    label: String,
    components: Vec<Arc<dyn MnaComponent<T>>>,
    incidence: DMatrix<T>,
    /// `A⁻¹ C` per main matrix key
    projected: HashMap<usize, DMatrix<T>>,
    /// Factorized reduced matrix with the main key and torn switch states it
    /// was built for
    factor: Option<(usize, Vec<bool>, LU<T, Dyn, Dyn>)>,
    pivot_tolerance: f64,
}

impl<T: MnaScalar> TearSystem<T> {
    pub fn new(
        label: &str,
        components: Vec<Arc<dyn MnaComponent<T>>>,
        dimension: usize,
        pivot_tolerance: f64,
    ) -> Result<Self> {
        let mut incidence = DMatrix::zeros(dimension, components.len());
        for (k, component) in components.iter().enumerate() {
            let base = component.base();
            let mut stamp = MatrixStamp::new(&mut incidence, label);
            if let Some(row) = base.matrix_index(1)? {
                stamp.add(row, k, T::one())?;
            }
            if let Some(row) = base.matrix_index(0)? {
                stamp.add(row, k, -T::one())?;
            }
        }
        debug!(
            "{}: tearing {} branches out of a {}-dimensional system",
            label,
            components.len(),
            dimension
        );
        Ok(Self {
            label: label.to_string(),
            components,
            incidence,
            projected: HashMap::new(),
            factor: None,
            pivot_tolerance,
        })
    }

    pub fn components(&self) -> &[Arc<dyn MnaComponent<T>>] {
        &self.components
    }

    /// Compute `A⁻¹ C` for main matrix `key` if not done yet.
    pub fn project(&mut self, key: usize, backend: &mut dyn SolverBackend<T>) -> Result<()> {
        if self.projected.contains_key(&key) {
            return Ok(());
        }
        let mut projected = DMatrix::zeros(self.incidence.nrows(), self.incidence.ncols());
        for k in 0..self.incidence.ncols() {
            backend.solve(key, self.incidence.column(k).into_owned(), 0)?;
            projected.set_column(k, &backend.publish()?);
        }
        self.projected.insert(key, projected);
        Ok(())
    }

    fn switch_states(&self) -> Result<Vec<bool>> {
        self.components
            .iter()
            .filter_map(|c| c.as_switch())
            .map(|s| s.is_closed())
            .collect()
    }

    /// Make sure the reduced matrix matches main matrix `key` and the
    /// current torn switch states. Returns whether it was refactorized.
    pub fn refresh(&mut self, key: usize, step: u64) -> Result<bool> {
        let states = self.switch_states()?;
        if let Some((k, s, _)) = &self.factor {
            if *k == key && *s == states {
                return Ok(false);
            }
        }

        let projected = self
            .projected
            .get(&key)
            .ok_or(GridError::VariantNotFound {
                index: key,
                available: self.projected.len(),
            })?;
        let m = self.components.len();
        let mut reduced = self.incidence.transpose() * projected;
        {
            let mut stamp = MatrixStamp::new(&mut reduced, &self.label);
            for (k, component) in self.components.iter().enumerate() {
                component.mna_tear_apply_matrix_stamp(&mut stamp, k)?;
            }
        }
        let lu = reduced.lu();
        let ratio = pivot_ratio(&lu.u());
        if ratio == 0.0 || ratio < self.pivot_tolerance {
            return Err(GridError::SingularMatrix {
                matrix: format!("{}.tear", self.label),
                step,
                pivot_ratio: ratio,
            });
        }
        debug!(
            "{}: factorized {}x{} tear matrix at step {}",
            self.label, m, m, step
        );
        self.factor = Some((key, states, lu));
        Ok(true)
    }

    /// Correct the main-system solution `y = A⁻¹ b` and hand each torn
    /// component its branch voltage and current.
    pub fn correct(&self, key: usize, y: DVector<T>, step: u64) -> Result<DVector<T>> {
        let (_, _, lu) = self.factor.as_ref().ok_or_else(|| GridError::InvalidSolverState {
            solver: self.label.clone(),
            expected: "factorized tear matrix",
            actual: "unfactorized",
        })?;
        let projected = self
            .projected
            .get(&key)
            .ok_or(GridError::VariantNotFound {
                index: key,
                available: self.projected.len(),
            })?;

        let mut e = DVector::zeros(self.components.len());
        {
            let mut stamp = VectorStamp::new(&mut e, &self.label);
            for (k, component) in self.components.iter().enumerate() {
                component.mna_tear_apply_voltage_stamp(&mut stamp, k)?;
            }
        }
        let rhs = self.incidence.transpose() * &y - e;
        let currents = lu.solve(&rhs).ok_or_else(|| GridError::SingularMatrix {
            matrix: format!("{}.tear", self.label),
            step,
            pivot_ratio: 0.0,
        })?;
        let x = y - projected * &currents;
        let voltages = self.incidence.transpose() * &x;
        for (k, component) in self.components.iter().enumerate() {
            component.mna_tear_post_step(voltages[k], currents[k])?;
        }
        trace!("{}: tear correction at step {}", self.label, step);
        Ok(x)
    }
}
