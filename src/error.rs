//! Error types for the grid simulator.
//!
//! This module provides a unified error type [`GridError`] that covers
//! configuration problems detected before a run starts, attribute access
//! violations, numerical failures during stepping, and accelerator faults.

use thiserror::Error;

/// Result type alias using [`GridError`].
pub type Result<T> = std::result::Result<T, GridError>;

/// Unified error type for all simulator operations.
#[derive(Error, Debug)]
pub enum GridError {
    // ============ Configuration Errors ============
    /// A component terminal has no node attached
    #[error("Terminal {terminal} of component '{component}' is not connected")]
    UnconnectedTerminal { component: String, terminal: usize },

    /// Wrong number of nodes passed to `connect`
    #[error("Component '{component}' expects {expected} terminal nodes, got {actual}")]
    TerminalCount {
        component: String,
        expected: usize,
        actual: usize,
    },

    /// A stamp or vector access outside the system dimension
    #[error("Dimension mismatch in {context}: index {index} outside dimension {dimension}")]
    DimensionMismatch {
        context: String,
        index: usize,
        dimension: usize,
    },

    /// The task graph contains a cycle
    #[error("Dependency cycle between tasks: {}", tasks.join(" -> "))]
    DependencyCycle { tasks: Vec<String> },

    /// Node not found in topology
    #[error("Node '{node}' not found in topology")]
    NodeNotFound { node: String },

    /// Component not found in topology
    #[error("Component '{component}' not found in topology")]
    ComponentNotFound { component: String },

    /// Node present in the topology but referenced by no terminal
    #[error("Floating node '{node}' - no component terminal references it")]
    FloatingNode { node: String },

    /// Duplicate node name
    #[error("Duplicate node name '{name}'")]
    DuplicateNode { name: String },

    /// Duplicate component name
    #[error("Duplicate component name '{name}'")]
    DuplicateComponent { name: String },

    /// Node already carries a different matrix index
    #[error("Node '{node}' already has matrix index {assigned}, cannot reassign to {requested}")]
    NodeIndexConflict {
        node: String,
        assigned: usize,
        requested: usize,
    },

    /// Invalid parameter value
    #[error("Invalid parameter '{param}' for component '{component}': {message}")]
    InvalidParameter {
        component: String,
        param: String,
        message: String,
    },

    /// Invalid topology
    #[error("Invalid topology: {message}")]
    InvalidTopology { message: String },

    /// Invalid simulation parameter
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },

    /// Component does not implement a capability the run requires
    #[error("Component '{component}' does not support {capability}")]
    Unsupported {
        component: String,
        capability: &'static str,
    },

    /// Requested topology variant was never registered
    #[error("Topology variant {index} not registered ({available} available)")]
    VariantNotFound { index: usize, available: usize },

    /// Operation not valid in the current solver state
    #[error("Solver '{solver}' is {actual}, operation requires {expected}")]
    InvalidSolverState {
        solver: String,
        expected: &'static str,
        actual: &'static str,
    },

    // ============ Attribute Errors ============
    /// Attribute not found on its owner
    #[error("Attribute '{name}' not found on '{owner}'")]
    AttributeNotFound { owner: String, name: String },

    /// Attribute declared twice on the same owner
    #[error("Attribute '{name}' already declared on '{owner}'")]
    DuplicateAttribute { owner: String, name: String },

    /// Caller lacks the capability for the requested access
    #[error("Attribute '{name}' is not {access}able through this handle")]
    AttributeAccess { name: String, access: &'static str },

    /// Typed lookup against an attribute of another kind
    #[error("Attribute '{name}' holds {actual}, requested {requested}")]
    AttributeType {
        name: String,
        requested: &'static str,
        actual: &'static str,
    },

    /// A lock guarding attribute state was poisoned by a panicking task
    #[error("Attribute '{name}' was poisoned by a panicking writer")]
    AttributePoisoned { name: String },

    /// Weak attribute reference whose owner has been dropped
    #[error("Attribute '{name}' no longer exists")]
    AttributeExpired { name: String },

    // ============ Numerical Errors ============
    /// Matrix is singular and cannot be factorized
    #[error("Singular system matrix '{matrix}' at step {step} (pivot ratio {pivot_ratio:.2e})")]
    SingularMatrix {
        matrix: String,
        step: u64,
        pivot_ratio: f64,
    },

    /// Solve produced a non-finite value
    #[error("Non-finite solution in '{matrix}' at step {step}, unknown {index}")]
    NonFiniteSolution {
        matrix: String,
        step: u64,
        index: usize,
    },

    // ============ Accelerator Errors ============
    /// Accelerator stream or device failure
    #[error("Accelerator error: {message}")]
    Accelerator { message: String },

    /// Failure building the worker thread pool
    #[error("Thread pool error: {message}")]
    ThreadPool { message: String },

    // ============ I/O Errors ============
    /// Error writing logged samples
    #[error("Failed to write samples for '{sink}': {source}")]
    SinkWrite {
        sink: String,
        #[source]
        source: std::io::Error,
    },
}

impl GridError {
    /// Create an invalid parameter error
    pub fn invalid_parameter(
        component: impl Into<String>,
        param: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            component: component.into(),
            param: param.into(),
            message: message.into(),
        }
    }

    /// Create an invalid topology error
    pub fn invalid_topology(message: impl Into<String>) -> Self {
        Self::InvalidTopology {
            message: message.into(),
        }
    }

    /// Create an invalid simulation parameter error
    pub fn invalid_simulation_param(message: impl Into<String>) -> Self {
        Self::InvalidSimulationParam {
            message: message.into(),
        }
    }

    /// Create an accelerator error
    pub fn accelerator(message: impl Into<String>) -> Self {
        Self::Accelerator {
            message: message.into(),
        }
    }

    /// Create an unsupported-capability error
    pub fn unsupported(component: impl Into<String>, capability: &'static str) -> Self {
        Self::Unsupported {
            component: component.into(),
            capability,
        }
    }

    /// Whether the error was raised by the numerical core rather than by
    /// configuration.
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Self::SingularMatrix { .. } | Self::NonFiniteSolution { .. }
        )
    }
}
