//! # Gridsim Core
//!
//! Time-domain simulation of electrical power networks.
//!
//! This library provides:
//! - Modified Nodal Analysis (MNA) with trapezoidal companion models
//! - Electromagnetic transient (EMT, `f64`) and dynamic phasor (DP,
//!   `Complex64`) domains from the same generic component code
//! - Switch handling through precomputed system matrices
//! - Diakoptics (tearing) for splitting branches out of the main system
//! - A dependency-driven task scheduler, sequential or level-parallel
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`attribute`] - Named, shared, access-controlled simulation values
//! - [`circuit`] - Nodes, terminals, topologies and their validation
//! - [`components`] - Component models (R, L, C, sources, switch, pi-line)
//! - [`scheduler`] - Task dependency resolution and execution
//! - [`solver`] - MNA assembly, factorization and solving
//! - [`simulation`] - Step loop, topology switching and data loggers
//!
//! ## Usage
//!
//! ```no_run
//! use gridsim_core::components::{MnaComponent, Resistor, VoltageSource};
//! use gridsim_core::{Complex64, Simulation, SimulationConfig, SystemTopology};
//!
//! # fn main() -> gridsim_core::Result<()> {
//! let mut topology = SystemTopology::<f64>::new(50.0);
//! let n1 = topology.add_node("n1")?;
//! let mut source = VoltageSource::new("vs", Complex64::new(230.0, 0.0), None)?;
//! source.connect(&[topology.ground(), n1.clone()])?;
//! let mut load = Resistor::new("load", 10.0)?;
//! load.connect(&[n1, topology.ground()])?;
//! topology.add_component(source)?;
//! topology.add_component(load)?;
//!
//! let config = SimulationConfig::new().with_time_step(1e-4).with_final_time(0.1);
//! let mut sim = Simulation::new("demo", topology, config)?;
//! let summary = sim.run()?;
//! println!("{} steps", summary.steps);
//! # Ok(())
//! # }
//! ```
//!
//! ## Simulation Method
//!
//! For each time step:
//!
//! 1. Components update their history terms and stamp the right-hand side
//! 2. The solver picks the factorized system matrix of the current switch
//!    states and solves for node voltages and branch currents
//! 3. Components read their interface voltages and currents back
//!
//! The system matrix only changes with switch states, so every switch
//! combination is factorized once up front.

pub mod attribute;
pub mod circuit;
pub mod components;
pub mod error;
pub mod scheduler;
pub mod simulation;
pub mod solver;

// Re-export main types for convenience
pub use circuit::{Domain, MnaScalar, SystemTopology};
pub use error::{GridError, Result};
pub use num_complex::Complex64;
pub use scheduler::SchedulerKind;
pub use simulation::{DataLogger, RunSummary, Simulation, SimulationConfig};
pub use solver::{BackendKind, MnaSolver, SolverConfig};

/// Default system frequency in Hz
pub const DEFAULT_FREQUENCY: f64 = 50.0;
