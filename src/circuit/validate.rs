//! Topology validation.

use std::collections::HashSet;

use log::debug;

use super::topology::SystemTopology;
use super::types::MnaScalar;
use crate::error::{GridError, Result};

/// Validate a topology for simulation.
///
/// Checks:
/// - At least one component
/// - Unique node and component names
/// - Every terminal connected to ground or a node of this topology
/// - Every node referenced by some terminal
/// - Tear-set members exist and support tearing
pub fn validate_topology<T: MnaScalar>(topology: &SystemTopology<T>) -> Result<()> {
    if topology.components().is_empty() {
        return Err(GridError::invalid_topology("topology has no components"));
    }

    let mut node_names = HashSet::new();
    for node in topology.nodes() {
        if !node_names.insert(node.name()) {
            return Err(GridError::DuplicateNode {
                name: node.name().to_string(),
            });
        }
    }

    let mut component_names = HashSet::new();
    for component in topology.components() {
        if !component_names.insert(component.name()) {
            return Err(GridError::DuplicateComponent {
                name: component.name().to_string(),
            });
        }
        for (index, terminal) in component.terminals().iter().enumerate() {
            let node = terminal.node().ok_or_else(|| GridError::UnconnectedTerminal {
                component: component.name().to_string(),
                terminal: index,
            })?;
            if node.is_ground() {
                continue;
            }
            let registered = topology
                .nodes()
                .iter()
                .any(|n| std::sync::Arc::ptr_eq(n, node));
            if !registered {
                return Err(GridError::invalid_topology(format!(
                    "component '{}' terminal {} is connected to node '{}' outside the topology",
                    component.name(),
                    index,
                    node.name()
                )));
            }
        }
    }

    let referenced = topology.referenced_nodes();
    if let Some(node) = topology
        .nodes()
        .iter()
        .find(|n| !referenced.contains(n.name()))
    {
        return Err(GridError::FloatingNode {
            node: node.name().to_string(),
        });
    }

    for name in topology.tear_components() {
        if !topology.component(name)?.supports_tearing() {
            return Err(GridError::unsupported(name.as_str(), "tearing"));
        }
    }

    debug!(
        "topology valid: {} nodes, {} components, {} torn",
        topology.nodes().len(),
        topology.components().len(),
        topology.tear_components().len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::SimNode;
    use crate::components::{MnaComponent, Resistor};

    #[test]
    fn test_empty_topology() {
        let topo = SystemTopology::<f64>::new(50.0);
        assert!(matches!(
            validate_topology(&topo),
            Err(GridError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_unconnected_terminal() {
        let mut topo = SystemTopology::<f64>::new(50.0);
        topo.add_component(Resistor::new("r1", 1.0).unwrap()).unwrap();
        assert!(matches!(
            validate_topology(&topo),
            Err(GridError::UnconnectedTerminal { terminal: 0, .. })
        ));
    }

    #[test]
    fn test_floating_node() {
        let mut topo = SystemTopology::<f64>::new(50.0);
        let n1 = topo.add_node("n1").unwrap();
        topo.add_node("n2").unwrap();
        let mut r = Resistor::new("r1", 1.0).unwrap();
        r.connect(&[topo.ground(), n1]).unwrap();
        topo.add_component(r).unwrap();
        assert!(matches!(
            validate_topology(&topo),
            Err(GridError::FloatingNode { node }) if node == "n2"
        ));
    }

    #[test]
    fn test_foreign_node() {
        let mut topo = SystemTopology::<f64>::new(50.0);
        let mut r = Resistor::new("r1", 1.0).unwrap();
        r.connect(&[topo.ground(), SimNode::new("elsewhere")]).unwrap();
        topo.add_component(r).unwrap();
        assert!(matches!(
            validate_topology(&topo),
            Err(GridError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_valid_topology() {
        let mut topo = SystemTopology::<f64>::new(50.0);
        let n1 = topo.add_node("n1").unwrap();
        let mut r = Resistor::new("r1", 1.0).unwrap();
        r.connect(&[topo.ground(), n1]).unwrap();
        topo.add_component(r).unwrap();
        validate_topology(&topo).unwrap();
    }
}
