//! Bounded write handles into the solver-owned system matrix and vectors.
//!
//! Components never see the matrices themselves. During assembly the solver
//! lends out a [`MatrixStamp`] (add-only access to the system matrix) and,
//! every step, a [`VectorStamp`] into the component's own right-hand-side
//! contribution. Every write is bounds-checked against the system dimension.

use nalgebra::{DMatrix, DVector};

use crate::circuit::MnaScalar;
use crate::error::{GridError, Result};

/// Add-only handle into a square system matrix.
pub struct MatrixStamp<'a, T: MnaScalar> {
    matrix: &'a mut DMatrix<T>,
    context: &'a str,
}

impl<'a, T: MnaScalar> MatrixStamp<'a, T> {
    pub fn new(matrix: &'a mut DMatrix<T>, context: &'a str) -> Self {
        Self { matrix, context }
    }

    pub fn dimension(&self) -> usize {
        self.matrix.nrows()
    }

    fn check(&self, index: usize) -> Result<()> {
        if index < self.matrix.nrows() && index < self.matrix.ncols() {
            Ok(())
        } else {
            Err(GridError::DimensionMismatch {
                context: self.context.to_string(),
                index,
                dimension: self.matrix.nrows(),
            })
        }
    }

    /// Add to matrix element at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        self.check(row)?;
        self.check(col)?;
        self.matrix[(row, col)] += value;
        Ok(())
    }

    /// Stamp an admittance between two nodes. `None` is ground.
    ///   A[n1,n1] += Y
    ///   A[n2,n2] += Y
    ///   A[n1,n2] -= Y
    ///   A[n2,n1] -= Y
    pub fn add_admittance(&mut self, n1: Option<usize>, n2: Option<usize>, y: T) -> Result<()> {
        if let Some(i) = n1 {
            self.add(i, i, y)?;
        }
        if let Some(j) = n2 {
            self.add(j, j, y)?;
        }
        if let (Some(i), Some(j)) = (n1, n2) {
            self.add(i, j, -y)?;
            self.add(j, i, -y)?;
        }
        Ok(())
    }

    /// Stamp the incidence of an ideal voltage source whose branch current
    /// is the unknown at `branch`.
    ///   V[n+] - V[n-] = E
    pub fn add_voltage_branch(
        &mut self,
        n_pos: Option<usize>,
        n_neg: Option<usize>,
        branch: usize,
    ) -> Result<()> {
        let one = T::one();
        if let Some(i) = n_pos {
            self.add(branch, i, one)?;
            self.add(i, branch, one)?;
        }
        if let Some(j) = n_neg {
            self.add(branch, j, -one)?;
            self.add(j, branch, -one)?;
        }
        Ok(())
    }
}

/// Add-only handle into a vector of the system dimension.
pub struct VectorStamp<'a, T: MnaScalar> {
    vector: &'a mut DVector<T>,
    context: &'a str,
}

impl<'a, T: MnaScalar> VectorStamp<'a, T> {
    pub fn new(vector: &'a mut DVector<T>, context: &'a str) -> Self {
        Self { vector, context }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    pub fn add(&mut self, row: usize, value: T) -> Result<()> {
        if row >= self.vector.len() {
            return Err(GridError::DimensionMismatch {
                context: self.context.to_string(),
                index: row,
                dimension: self.vector.len(),
            });
        }
        self.vector[row] += value;
        Ok(())
    }

    /// Stamp a current `i` flowing through a branch from `from` to `to`:
    /// it leaves node `from` and enters node `to`.
    pub fn add_current(&mut self, from: Option<usize>, to: Option<usize>, i: T) -> Result<()> {
        if let Some(f) = from {
            self.add(f, -i)?;
        }
        if let Some(t) = to {
            self.add(t, i)?;
        }
        Ok(())
    }
}

/// Ratio of the smallest to the largest pivot magnitude of an upper
/// triangular factor. Zero for an empty or exactly singular factor.
pub fn pivot_ratio<T: MnaScalar>(u: &DMatrix<T>) -> f64 {
    let n = u.nrows().min(u.ncols());
    if n == 0 {
        return 0.0;
    }
    let mut min = f64::INFINITY;
    let mut max = 0.0_f64;
    for k in 0..n {
        let p = u[(k, k)].modulus();
        min = min.min(p);
        max = max.max(p);
    }
    if max == 0.0 || !max.is_finite() {
        0.0
    } else {
        min / max
    }
}

/// Whether `matrix` is symmetric within `tolerance`.
pub fn is_symmetric<T: MnaScalar>(matrix: &DMatrix<T>, tolerance: f64) -> bool {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return false;
    }
    for i in 0..n {
        for j in (i + 1)..n {
            if (matrix[(i, j)] - matrix[(j, i)]).modulus() > tolerance {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    #[test]
    fn test_admittance_stamp_is_symmetric() {
        let mut m = DMatrix::<f64>::zeros(2, 2);
        let mut stamp = MatrixStamp::new(&mut m, "test");
        stamp.add_admittance(Some(0), Some(1), 0.5).unwrap();
        stamp.add_admittance(Some(1), None, 0.25).unwrap();
        assert_eq!(m[(0, 0)], 0.5);
        assert_eq!(m[(1, 1)], 0.75);
        assert_eq!(m[(0, 1)], -0.5);
        assert!(is_symmetric(&m, 0.0));
    }

    #[test]
    fn test_out_of_range_stamp_fails() {
        let mut m = DMatrix::<Complex64>::zeros(2, 2);
        let mut stamp = MatrixStamp::new(&mut m, "variant 0");
        let err = stamp
            .add_admittance(Some(0), Some(2), Complex64::new(1.0, 0.0))
            .unwrap_err();
        assert!(matches!(
            err,
            GridError::DimensionMismatch { index: 2, dimension: 2, .. }
        ));

        let mut v = DVector::<f64>::zeros(1);
        let mut stamp = VectorStamp::new(&mut v, "rhs");
        assert!(stamp.add(1, 1.0).is_err());
    }

    #[test]
    fn test_current_stamp_direction() {
        let mut v = DVector::<f64>::zeros(2);
        VectorStamp::new(&mut v, "rhs")
            .add_current(Some(0), Some(1), 2.0)
            .unwrap();
        assert_eq!(v[0], -2.0);
        assert_eq!(v[1], 2.0);
    }

    #[test]
    fn test_voltage_branch_incidence() {
        let mut m = DMatrix::<f64>::zeros(2, 2);
        MatrixStamp::new(&mut m, "test")
            .add_voltage_branch(Some(0), None, 1)
            .unwrap();
        assert_eq!(m[(0, 1)], 1.0);
        assert_eq!(m[(1, 0)], 1.0);
        assert_eq!(m[(1, 1)], 0.0);
    }

    #[test]
    fn test_pivot_ratio() {
        let u = DMatrix::from_row_slice(2, 2, &[4.0_f64, 1.0, 0.0, 1e-3]);
        assert_relative_eq!(pivot_ratio(&u), 2.5e-4);
        let singular = DMatrix::from_row_slice(2, 2, &[1.0_f64, 1.0, 0.0, 0.0]);
        assert_eq!(pivot_ratio(&singular), 0.0);
    }
}
