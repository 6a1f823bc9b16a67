//! System topology: the ordered set of nodes and components to simulate.

use std::collections::HashSet;
use std::f64::consts::PI;
use std::fmt;

use log::debug;

use super::node::{NodeRef, SimNode, GROUND_NAMES};
use super::types::MnaScalar;
use crate::components::MnaComponent;
use crate::error::{GridError, Result};

/// A network ready to be handed to a solver.
///
/// Nodes and components keep their insertion order; the solver assigns matrix
/// indices and stamps in that order.
pub struct SystemTopology<T: MnaScalar> {
    /// System frequency in Hz
    frequency: f64,
    ground: NodeRef<T>,
    nodes: Vec<NodeRef<T>>,
    components: Vec<Box<dyn MnaComponent<T>>>,
    /// Components removed from the main system and solved by tearing
    tear_components: Vec<String>,
}

impl<T: MnaScalar> fmt::Debug for SystemTopology<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemTopology")
            .field("frequency", &self.frequency)
            .field(
                "nodes",
                &self.nodes.iter().map(|n| n.name()).collect::<Vec<_>>(),
            )
            .field(
                "components",
                &self
                    .components
                    .iter()
                    .map(|c| format!("{} ({})", c.name(), c.type_name()))
                    .collect::<Vec<_>>(),
            )
            .field("tear_components", &self.tear_components)
            .finish()
    }
}

impl<T: MnaScalar> SystemTopology<T> {
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            ground: SimNode::ground(),
            nodes: Vec::new(),
            components: Vec::new(),
            tear_components: Vec::new(),
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// Angular system frequency.
    pub fn omega(&self) -> f64 {
        2.0 * PI * self.frequency
    }

    pub fn ground(&self) -> NodeRef<T> {
        self.ground.clone()
    }

    /// Create and register a network node.
    pub fn add_node(&mut self, name: &str) -> Result<NodeRef<T>> {
        if GROUND_NAMES.contains(&name) {
            return Err(GridError::invalid_topology(format!(
                "'{}' is reserved for the reference node",
                name
            )));
        }
        if self.nodes.iter().any(|n| n.name() == name) {
            return Err(GridError::DuplicateNode {
                name: name.to_string(),
            });
        }
        let node = SimNode::new(name);
        self.nodes.push(node.clone());
        Ok(node)
    }

    /// Look up a node by name. Ground aliases resolve to the reference node.
    pub fn node(&self, name: &str) -> Result<NodeRef<T>> {
        if GROUND_NAMES.contains(&name) {
            return Ok(self.ground.clone());
        }
        self.nodes
            .iter()
            .find(|n| n.name() == name)
            .cloned()
            .ok_or_else(|| GridError::NodeNotFound {
                node: name.to_string(),
            })
    }

    pub fn nodes(&self) -> &[NodeRef<T>] {
        &self.nodes
    }

    pub fn add_component<C: MnaComponent<T> + 'static>(&mut self, component: C) -> Result<()> {
        self.add_boxed(Box::new(component))
    }

    pub fn add_boxed(&mut self, component: Box<dyn MnaComponent<T>>) -> Result<()> {
        if self.components.iter().any(|c| c.name() == component.name()) {
            return Err(GridError::DuplicateComponent {
                name: component.name().to_string(),
            });
        }
        debug!(
            "topology: added {} '{}'",
            component.type_name(),
            component.name()
        );
        self.components.push(component);
        Ok(())
    }

    pub fn component(&self, name: &str) -> Result<&dyn MnaComponent<T>> {
        self.components
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
            .ok_or_else(|| GridError::ComponentNotFound {
                component: name.to_string(),
            })
    }

    pub fn component_mut(&mut self, name: &str) -> Result<&mut Box<dyn MnaComponent<T>>> {
        self.components
            .iter_mut()
            .find(|c| c.name() == name)
            .ok_or_else(|| GridError::ComponentNotFound {
                component: name.to_string(),
            })
    }

    pub fn components(&self) -> &[Box<dyn MnaComponent<T>>] {
        &self.components
    }

    /// Mark a component to be removed from the main system and solved by
    /// tearing.
    pub fn tear_component(&mut self, name: &str) -> Result<()> {
        let component = self.component(name)?;
        if !component.supports_tearing() {
            return Err(GridError::unsupported(name, "tearing"));
        }
        if !self.tear_components.iter().any(|t| t == name) {
            self.tear_components.push(name.to_string());
        }
        Ok(())
    }

    pub fn tear_components(&self) -> &[String] {
        &self.tear_components
    }

    pub fn is_torn(&self, name: &str) -> bool {
        self.tear_components.iter().any(|t| t == name)
    }

    /// Deep copy with fresh nodes and independent components.
    ///
    /// Node initial voltages and the tear set are carried over. Components
    /// are rebuilt from their parameters and reconnected by node name, so
    /// the copy shares no mutable state with `self`.
    pub fn try_clone(&self) -> Result<Self> {
        let mut copy = Self::new(self.frequency);
        for node in &self.nodes {
            let fresh = copy.add_node(node.name())?;
            fresh.set_initial_voltage(node.initial_voltage()?)?;
        }
        for component in &self.components {
            let mut fresh = component.clone_named(component.name())?;
            let nodes = component
                .terminals()
                .iter()
                .enumerate()
                .map(|(index, terminal)| {
                    let node = terminal.node().ok_or_else(|| GridError::UnconnectedTerminal {
                        component: component.name().to_string(),
                        terminal: index,
                    })?;
                    copy.node(node.name())
                })
                .collect::<Result<Vec<_>>>()?;
            fresh.connect(&nodes)?;
            copy.add_boxed(fresh)?;
        }
        copy.tear_components = self.tear_components.clone();
        Ok(copy)
    }

    /// Nodes referenced by at least one component terminal.
    pub(crate) fn referenced_nodes(&self) -> HashSet<String> {
        self.components
            .iter()
            .flat_map(|c| c.terminals().iter())
            .filter_map(|t| t.node())
            .filter(|n| !n.is_ground())
            .map(|n| n.name().to_string())
            .collect()
    }

    pub fn into_parts(
        self,
    ) -> (
        f64,
        Vec<NodeRef<T>>,
        Vec<Box<dyn MnaComponent<T>>>,
        Vec<String>,
    ) {
        (
            self.frequency,
            self.nodes,
            self.components,
            self.tear_components,
        )
    }
}
