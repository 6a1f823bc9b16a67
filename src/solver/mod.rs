//! MNA (Modified Nodal Analysis) solver.
//!
//! This module provides the numerical engine for network simulation.
//!
//! ## Modified Nodal Analysis
//!
//! MNA assembles a system of equations Ax = b where:
//! - x contains node voltages and branch currents
//! - A is the admittance/coefficient matrix
//! - b is the sum of the components' right-hand-side contributions
//!
//! The matrix structure is:
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! where:
//! - G is the conductance matrix (node equations)
//! - B, C connect voltage sources to nodes
//! - D is usually 0 (for ideal voltage sources)
//! - v is the vector of node voltages
//! - j is the vector of voltage source currents
//! - i is the sum of current sources into each node
//! - e is the vector of voltage source values
//!
//! ## Solve loop
//!
//! The solver assembles one matrix per switch state combination at
//! initialization and factorizes each once. Every step its solve task sums
//! the right-hand-side contributions, selects the factorization matching the
//! current switch states and publishes the solution. Factorization and solve
//! go through a [`SolverBackend`], either on the calling thread
//! ([`HostBackend`]) or on a dedicated stream thread
//! ([`AcceleratorBackend`]).

mod backend;
mod mna;
mod mna_solver;
mod tearing;

pub use backend::{AcceleratorBackend, HostBackend, SolverBackend};
pub use mna::{is_symmetric, pivot_ratio, MatrixStamp, VectorStamp};
pub use mna_solver::{MnaSolver, Seed, SolverState};

use std::fmt;

use crate::error::{GridError, Result};

/// Smallest accepted ratio between the smallest and largest pivot.
pub const DEFAULT_PIVOT_TOLERANCE: f64 = 1e-12;

/// Maximum number of switches per topology. Each switch doubles the number
/// of precomputed system matrices.
pub const DEFAULT_MAX_SWITCHES: usize = 8;

/// Where factorization and solve run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Synchronous on the thread running the solve task.
    #[default]
    Host,
    /// Asynchronous on a dedicated execution stream, joined by a separate
    /// synchronization task.
    Accelerator,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Host => write!(f, "host"),
            BackendKind::Accelerator => write!(f, "accelerator"),
        }
    }
}

impl BackendKind {
    /// Parse from a string.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "host" | "cpu" => Some(BackendKind::Host),
            "accelerator" | "gpu" => Some(BackendKind::Accelerator),
            _ => None,
        }
    }
}

/// Configuration for the solver.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    pub backend: BackendKind,
    /// Factorizations with a smaller pivot ratio are rejected as singular.
    pub pivot_tolerance: f64,
    pub max_switches: usize,
    /// Reject solutions containing NaN or infinite entries.
    pub check_finite: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            pivot_tolerance: DEFAULT_PIVOT_TOLERANCE,
            max_switches: DEFAULT_MAX_SWITCHES,
            check_finite: true,
        }
    }
}

impl SolverConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_pivot_tolerance(mut self, tolerance: f64) -> Self {
        self.pivot_tolerance = tolerance;
        self
    }

    pub fn with_max_switches(mut self, max_switches: usize) -> Self {
        self.max_switches = max_switches;
        self
    }

    pub fn with_check_finite(mut self, check_finite: bool) -> Self {
        self.check_finite = check_finite;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pivot_tolerance >= 0.0 && self.pivot_tolerance < 1.0) {
            return Err(GridError::invalid_simulation_param(format!(
                "pivot tolerance must be in [0, 1), got {}",
                self.pivot_tolerance
            )));
        }
        if self.max_switches > 16 {
            return Err(GridError::invalid_simulation_param(format!(
                "at most 16 switches per topology are supported, got {}",
                self.max_switches
            )));
        }
        Ok(())
    }

    /// Build the configured backend. `label` names the matrices in errors.
    pub fn build_backend<T: crate::circuit::MnaScalar>(
        &self,
        label: &str,
    ) -> Result<Box<dyn SolverBackend<T>>> {
        let host = HostBackend::new(label, self.pivot_tolerance, self.check_finite);
        Ok(match self.backend {
            BackendKind::Host => Box::new(host),
            BackendKind::Accelerator => Box::new(AcceleratorBackend::spawn(host)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_from_name() {
        assert_eq!(BackendKind::from_name("GPU"), Some(BackendKind::Accelerator));
        assert_eq!(BackendKind::from_name("host"), Some(BackendKind::Host));
        assert_eq!(BackendKind::from_name("fpga"), None);
    }

    #[test]
    fn test_config_validation() {
        assert!(SolverConfig::new().validate().is_ok());
        assert!(SolverConfig::new().with_pivot_tolerance(-1.0).validate().is_err());
        assert!(SolverConfig::new().with_max_switches(17).validate().is_err());
    }
}
