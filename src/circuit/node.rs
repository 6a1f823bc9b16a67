//! Simulation nodes and component terminals.

use std::sync::{Arc, OnceLock};

use num_complex::Complex64;

use super::types::{MnaScalar, NodeKind};
use crate::attribute::{AccessFlags, Attribute, AttributeHandle, AttributeKind};
use crate::error::{GridError, Result};

/// Shared handle to a node. Components and the topology hold clones of it.
pub type NodeRef<T> = Arc<SimNode<T>>;

/// Names that always resolve to the reference node.
pub const GROUND_NAMES: [&str; 3] = ["gnd", "GND", "0"];

/// A node of the network.
///
/// The matrix index is assigned once by the solver during initialization.
/// Assigning a different index afterwards fails, so indices stay stable for
/// the lifetime of the node.
#[derive(Debug)]
pub struct SimNode<T: MnaScalar> {
    name: String,
    kind: NodeKind,
    index: OnceLock<usize>,
    /// Voltage published by the solver after each solve
    voltage: Attribute<T>,
    /// Power-flow voltage used for initialization
    initial_voltage: Attribute<Complex64>,
}

impl<T: MnaScalar> SimNode<T> {
    fn with_kind(name: &str, kind: NodeKind) -> NodeRef<T> {
        Arc::new(Self {
            name: name.to_string(),
            kind,
            index: OnceLock::new(),
            voltage: Attribute::new(format!("{}.v", name), T::default(), AccessFlags::READ),
            initial_voltage: Attribute::new(
                format!("{}.v_init", name),
                Complex64::new(0.0, 0.0),
                AccessFlags::READ_WRITE,
            ),
        })
    }

    /// Create a user-visible network node.
    pub fn new(name: &str) -> NodeRef<T> {
        Self::with_kind(name, NodeKind::Network)
    }

    /// Create a network node with a power-flow initial voltage.
    pub fn with_initial_voltage(name: &str, voltage: Complex64) -> Result<NodeRef<T>> {
        let node = Self::new(name);
        node.set_initial_voltage(voltage)?;
        Ok(node)
    }

    /// Create an internal node owned by a component.
    pub fn new_virtual(name: &str) -> NodeRef<T> {
        Self::with_kind(name, NodeKind::Virtual)
    }

    /// Create the reference node.
    pub fn ground() -> NodeRef<T> {
        Self::with_kind(GROUND_NAMES[0], NodeKind::Ground)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn is_ground(&self) -> bool {
        self.kind == NodeKind::Ground
    }

    pub fn is_virtual(&self) -> bool {
        self.kind == NodeKind::Virtual
    }

    /// Matrix index, `None` for ground or before the solver assigned one.
    pub fn matrix_index(&self) -> Option<usize> {
        self.index.get().copied()
    }

    pub(crate) fn assign_matrix_index(&self, index: usize) -> Result<()> {
        if self.is_ground() {
            return Err(GridError::invalid_topology(
                "ground node cannot carry a matrix index",
            ));
        }
        let assigned = *self.index.get_or_init(|| index);
        if assigned != index {
            return Err(GridError::NodeIndexConflict {
                node: self.name.clone(),
                assigned,
                requested: index,
            });
        }
        Ok(())
    }

    /// Read-only handle to the node voltage attribute.
    pub fn voltage_attribute(&self) -> Attribute<T> {
        self.voltage.public()
    }

    pub(crate) fn voltage_writer(&self) -> &Attribute<T> {
        &self.voltage
    }

    pub fn voltage(&self) -> Result<T> {
        if self.is_ground() {
            return Ok(T::default());
        }
        self.voltage.get()
    }

    pub fn initial_voltage(&self) -> Result<Complex64> {
        if self.is_ground() {
            return Ok(Complex64::new(0.0, 0.0));
        }
        self.initial_voltage.get()
    }

    pub fn set_initial_voltage(&self, voltage: Complex64) -> Result<()> {
        if self.is_ground() {
            return Err(GridError::invalid_topology(
                "ground node voltage is fixed at zero",
            ));
        }
        self.initial_voltage.set(voltage)
    }

    /// Look up a node attribute by name. `v`/`V` is the solved voltage,
    /// `v_init` the power-flow voltage.
    pub fn attribute(&self, name: &str) -> Result<AttributeHandle> {
        match name {
            "v" | "V" => Ok(T::into_handle(self.voltage.public())),
            "v_init" => Ok(Complex64::into_handle(self.initial_voltage.public())),
            _ => Err(GridError::AttributeNotFound {
                owner: self.name.clone(),
                name: name.to_string(),
            }),
        }
    }
}

/// Connection point of a component.
#[derive(Debug)]
pub struct Terminal<T: MnaScalar> {
    node: Option<NodeRef<T>>,
}

impl<T: MnaScalar> Clone for Terminal<T> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
        }
    }
}

impl<T: MnaScalar> Default for Terminal<T> {
    fn default() -> Self {
        Self { node: None }
    }
}

impl<T: MnaScalar> Terminal<T> {
    pub fn connected(node: NodeRef<T>) -> Self {
        Self { node: Some(node) }
    }

    pub fn node(&self) -> Option<&NodeRef<T>> {
        self.node.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.node.is_some()
    }

    pub fn connect(&mut self, node: NodeRef<T>) {
        self.node = Some(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_assigned_once() {
        let node: NodeRef<f64> = SimNode::new("n1");
        assert_eq!(node.matrix_index(), None);
        node.assign_matrix_index(3).unwrap();
        node.assign_matrix_index(3).unwrap();
        let err = node.assign_matrix_index(4).unwrap_err();
        assert!(matches!(
            err,
            GridError::NodeIndexConflict { assigned: 3, requested: 4, .. }
        ));
        assert_eq!(node.matrix_index(), Some(3));
    }

    #[test]
    fn test_ground_has_no_index_and_zero_voltage() {
        let gnd: NodeRef<Complex64> = SimNode::ground();
        assert!(gnd.is_ground());
        assert!(gnd.assign_matrix_index(0).is_err());
        assert_eq!(gnd.voltage().unwrap(), Complex64::new(0.0, 0.0));
        assert!(gnd.set_initial_voltage(Complex64::new(1.0, 0.0)).is_err());
    }

    #[test]
    fn test_voltage_attribute_is_read_only_for_lookups() {
        let node: NodeRef<f64> = SimNode::new("n2");
        let handle = node.attribute("V").unwrap();
        assert_eq!(handle.name(), "n2.v");
        assert!(node.voltage_attribute().set(1.0).is_err());
        node.voltage_writer().set(5.0).unwrap();
        assert_eq!(node.voltage().unwrap(), 5.0);
        assert!(node.attribute("i").is_err());
    }

    #[test]
    fn test_terminal_connection() {
        let mut terminal: Terminal<f64> = Terminal::default();
        assert!(!terminal.is_connected());
        terminal.connect(SimNode::new("n1"));
        assert_eq!(terminal.node().map(|n| n.name()), Some("n1"));
    }
}
