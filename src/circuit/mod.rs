//! Network representation and validation.
//!
//! This module provides the nodes, terminals and [`SystemTopology`] a solver
//! is built from, and the numeric domain trait [`MnaScalar`] every generic
//! type in the crate is parameterized by.

mod node;
mod topology;
mod types;
mod validate;

pub use node::{NodeRef, SimNode, Terminal, GROUND_NAMES};
pub use topology::SystemTopology;
pub use types::*;
pub use validate::validate_topology;
