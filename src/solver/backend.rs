//! Factorization and solve strategies.
//!
//! Matrices are addressed by a key chosen by the solver (one key per switch
//! state combination). Both backends fulfill the same contract: a matrix is
//! assembled under a key, factorized once and then solved against any
//! number of right-hand sides.

use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use log::{debug, trace};
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};

use super::mna::pivot_ratio;
use crate::circuit::MnaScalar;
use crate::error::{GridError, Result};

/// Strategy executing the numerical part of a step.
pub trait SolverBackend<T: MnaScalar>: Send {
    fn name(&self) -> &'static str;

    /// Whether `solve` returns before the solution is available. The solver
    /// schedules a separate synchronization task for such backends.
    fn is_asynchronous(&self) -> bool {
        false
    }

    /// Store the matrix for `key`, replacing earlier contents and dropping
    /// its factorization.
    fn assemble(&mut self, key: usize, matrix: DMatrix<T>) -> Result<()>;

    /// LU-factorize the matrix stored for `key`.
    fn factorize(&mut self, key: usize, step: u64) -> Result<()>;

    /// Solve the factorized system `key` for `rhs`.
    fn solve(&mut self, key: usize, rhs: DVector<T>, step: u64) -> Result<()>;

    /// Wait until all issued work has completed. Returns the first error
    /// raised by that work.
    fn synchronize(&mut self) -> Result<()>;

    /// Synchronize and take the most recent solution.
    fn publish(&mut self) -> Result<DVector<T>>;
}

/// Synchronous dense LU on the calling thread.
pub struct HostBackend<T: MnaScalar> {
    label: String,
    pivot_tolerance: f64,
    check_finite: bool,
    matrices: HashMap<usize, DMatrix<T>>,
    factors: HashMap<usize, LU<T, Dyn, Dyn>>,
    solution: Option<DVector<T>>,
}

impl<T: MnaScalar> HostBackend<T> {
    pub fn new(label: &str, pivot_tolerance: f64, check_finite: bool) -> Self {
        Self {
            label: label.to_string(),
            pivot_tolerance,
            check_finite,
            matrices: HashMap::new(),
            factors: HashMap::new(),
            solution: None,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn matrix_name(&self, key: usize) -> String {
        format!("{}[{}]", self.label, key)
    }
}

impl<T: MnaScalar> SolverBackend<T> for HostBackend<T> {
    fn name(&self) -> &'static str {
        "host"
    }

    fn assemble(&mut self, key: usize, matrix: DMatrix<T>) -> Result<()> {
        if !matrix.is_square() {
            return Err(GridError::DimensionMismatch {
                context: self.matrix_name(key),
                index: matrix.ncols(),
                dimension: matrix.nrows(),
            });
        }
        self.factors.remove(&key);
        self.matrices.insert(key, matrix);
        Ok(())
    }

    fn factorize(&mut self, key: usize, step: u64) -> Result<()> {
        let matrix = self
            .matrices
            .get(&key)
            .ok_or(GridError::VariantNotFound {
                index: key,
                available: self.matrices.len(),
            })?;
        let lu = matrix.clone().lu();
        let ratio = pivot_ratio(&lu.u());
        if ratio == 0.0 || ratio < self.pivot_tolerance {
            return Err(GridError::SingularMatrix {
                matrix: self.matrix_name(key),
                step,
                pivot_ratio: ratio,
            });
        }
        debug!(
            "{}: factorized {}x{} matrix, pivot ratio {:.3e}",
            self.matrix_name(key),
            matrix.nrows(),
            matrix.ncols(),
            ratio
        );
        self.factors.insert(key, lu);
        Ok(())
    }

    fn solve(&mut self, key: usize, rhs: DVector<T>, step: u64) -> Result<()> {
        let dimension = self.matrices.get(&key).map_or(0, |m| m.nrows());
        let lu = self
            .factors
            .get(&key)
            .ok_or_else(|| GridError::InvalidSolverState {
                solver: self.matrix_name(key),
                expected: "factorized",
                actual: "unfactorized",
            })?;
        if rhs.len() != dimension {
            return Err(GridError::DimensionMismatch {
                context: self.matrix_name(key),
                index: rhs.len(),
                dimension,
            });
        }
        let x = lu.solve(&rhs).ok_or_else(|| GridError::SingularMatrix {
            matrix: self.matrix_name(key),
            step,
            pivot_ratio: 0.0,
        })?;
        if self.check_finite {
            if let Some(index) = x.iter().position(|v| !v.modulus().is_finite()) {
                return Err(GridError::NonFiniteSolution {
                    matrix: self.matrix_name(key),
                    step,
                    index,
                });
            }
        }
        trace!("{}: solved step {}", self.matrix_name(key), step);
        self.solution = Some(x);
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }

    fn publish(&mut self) -> Result<DVector<T>> {
        self.solution
            .take()
            .ok_or_else(|| GridError::InvalidSolverState {
                solver: self.label.clone(),
                expected: "solved",
                actual: "without solution",
            })
    }
}

enum Command<T: MnaScalar> {
    Assemble { key: usize, matrix: DMatrix<T> },
    Factorize { key: usize, step: u64 },
    Solve { key: usize, rhs: DVector<T>, step: u64 },
}

enum Completion<T> {
    Done,
    Solved(DVector<T>),
    Failed(GridError),
}

/// Offloads factorization and solve to a dedicated execution stream.
///
/// Commands are queued in order and return immediately. Errors raised on the
/// stream surface at the next [`synchronize`](SolverBackend::synchronize)
/// and are never downgraded to a host fallback.
pub struct AcceleratorBackend<T: MnaScalar> {
    label: String,
    commands: Option<Sender<Command<T>>>,
    completions: Receiver<Completion<T>>,
    stream: Option<JoinHandle<()>>,
    in_flight: usize,
    solution: Option<DVector<T>>,
}

impl<T: MnaScalar> AcceleratorBackend<T> {
    /// Start the execution stream. `device` performs the work on it.
    pub fn spawn(device: HostBackend<T>) -> Result<Self> {
        let label = device.label().to_string();
        let (command_tx, command_rx) = mpsc::channel();
        let (completion_tx, completion_rx) = mpsc::channel();
        let stream = thread::Builder::new()
            .name(format!("gridsim-stream-{}", label))
            .spawn(move || run_stream(device, command_rx, completion_tx))
            .map_err(|e| {
                GridError::accelerator(format!("failed to start execution stream: {}", e))
            })?;
        debug!("{}: execution stream started", label);
        Ok(Self {
            label,
            commands: Some(command_tx),
            completions: completion_rx,
            stream: Some(stream),
            in_flight: 0,
            solution: None,
        })
    }

    /// Number of commands issued but not yet synchronized.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn submit(&mut self, command: Command<T>) -> Result<()> {
        let sender = self
            .commands
            .as_ref()
            .ok_or_else(|| GridError::accelerator(format!("{}: stream closed", self.label)))?;
        sender
            .send(command)
            .map_err(|_| GridError::accelerator(format!("{}: stream terminated", self.label)))?;
        self.in_flight += 1;
        Ok(())
    }
}

fn run_stream<T: MnaScalar>(
    mut device: HostBackend<T>,
    commands: Receiver<Command<T>>,
    completions: Sender<Completion<T>>,
) {
    for command in commands {
        let result = match command {
            Command::Assemble { key, matrix } => {
                device.assemble(key, matrix).map(|_| Completion::Done)
            }
            Command::Factorize { key, step } => {
                device.factorize(key, step).map(|_| Completion::Done)
            }
            Command::Solve { key, rhs, step } => device
                .solve(key, rhs, step)
                .and_then(|_| device.publish())
                .map(Completion::Solved),
        };
        let completion = result.unwrap_or_else(Completion::Failed);
        if completions.send(completion).is_err() {
            break;
        }
    }
    debug!("{}: execution stream stopped", device.label());
}

impl<T: MnaScalar> SolverBackend<T> for AcceleratorBackend<T> {
    fn name(&self) -> &'static str {
        "accelerator"
    }

    fn is_asynchronous(&self) -> bool {
        true
    }

    fn assemble(&mut self, key: usize, matrix: DMatrix<T>) -> Result<()> {
        self.submit(Command::Assemble { key, matrix })
    }

    fn factorize(&mut self, key: usize, step: u64) -> Result<()> {
        self.submit(Command::Factorize { key, step })
    }

    fn solve(&mut self, key: usize, rhs: DVector<T>, step: u64) -> Result<()> {
        self.submit(Command::Solve { key, rhs, step })
    }

    fn synchronize(&mut self) -> Result<()> {
        let mut first_error = None;
        while self.in_flight > 0 {
            let completion = match self.completions.recv() {
                Ok(completion) => completion,
                Err(_) => {
                    self.in_flight = 0;
                    return Err(GridError::accelerator(format!(
                        "{}: stream terminated with work in flight",
                        self.label
                    )));
                }
            };
            self.in_flight -= 1;
            match completion {
                Completion::Done => {}
                Completion::Solved(x) => self.solution = Some(x),
                Completion::Failed(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn publish(&mut self) -> Result<DVector<T>> {
        self.synchronize()?;
        self.solution
            .take()
            .ok_or_else(|| GridError::InvalidSolverState {
                solver: self.label.clone(),
                expected: "solved",
                actual: "without solution",
            })
    }
}

impl<T: MnaScalar> Drop for AcceleratorBackend<T> {
    fn drop(&mut self) {
        // Closing the command channel ends the stream loop.
        self.commands.take();
        if let Some(stream) = self.stream.take() {
            if stream.join().is_err() {
                log::error!("{}: execution stream panicked", self.label);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use num_complex::Complex64;

    fn system() -> (DMatrix<f64>, DVector<f64>) {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 3.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        (a, b)
    }

    #[test]
    fn test_host_solves() {
        let (a, b) = system();
        let mut host = HostBackend::new("t", 1e-12, true);
        host.assemble(0, a).unwrap();
        host.factorize(0, 0).unwrap();
        host.solve(0, b, 1).unwrap();
        let x = host.publish().unwrap();
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(x[1], 1.0, epsilon = 1e-12);
        assert!(host.publish().is_err());
    }

    #[test]
    fn test_host_rejects_singular() {
        let mut host = HostBackend::<f64>::new("t", 1e-12, true);
        host.assemble(0, DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]))
            .unwrap();
        let err = host.factorize(0, 7).unwrap_err();
        assert!(matches!(err, GridError::SingularMatrix { step: 7, .. }));
        assert!(err.is_numerical());
    }

    #[test]
    fn test_host_requires_factorization() {
        let (a, b) = system();
        let mut host = HostBackend::new("t", 1e-12, true);
        host.assemble(0, a).unwrap();
        assert!(matches!(
            host.solve(0, b, 0),
            Err(GridError::InvalidSolverState { .. })
        ));
        assert!(matches!(
            host.factorize(3, 0),
            Err(GridError::VariantNotFound { index: 3, .. })
        ));
    }

    #[test]
    fn test_accelerator_matches_host() {
        let a = DMatrix::from_row_slice(
            2,
            2,
            &[
                Complex64::new(2.0, 1.0),
                Complex64::new(-1.0, 0.0),
                Complex64::new(-1.0, 0.0),
                Complex64::new(3.0, -0.5),
            ],
        );
        let b = DVector::from_vec(vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 2.0)]);

        let mut host = HostBackend::new("h", 1e-12, true);
        host.assemble(0, a.clone()).unwrap();
        host.factorize(0, 0).unwrap();
        host.solve(0, b.clone(), 0).unwrap();
        let expected = host.publish().unwrap();

        let mut accel = AcceleratorBackend::spawn(HostBackend::new("a", 1e-12, true)).unwrap();
        accel.assemble(0, a).unwrap();
        accel.factorize(0, 0).unwrap();
        accel.solve(0, b, 0).unwrap();
        assert_eq!(accel.in_flight(), 3);
        let got = accel.publish().unwrap();
        assert_eq!(accel.in_flight(), 0);
        assert_eq!(got, expected);
    }

    #[test]
    fn test_accelerator_surfaces_errors_at_synchronize() {
        let mut accel = AcceleratorBackend::spawn(HostBackend::<f64>::new("a", 1e-12, true)).unwrap();
        accel
            .assemble(0, DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]))
            .unwrap();
        // Issuing succeeds; the failure is reported at the barrier.
        accel.factorize(0, 4).unwrap();
        assert!(matches!(
            accel.synchronize(),
            Err(GridError::SingularMatrix { step: 4, .. })
        ));
        accel.synchronize().unwrap();
    }
}
