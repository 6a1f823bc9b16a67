//! Numeric domains and node identifiers.

use std::fmt;

use nalgebra::{ComplexField, DVector};
use num_complex::Complex64;

use crate::attribute::{Attribute, AttributeHandle, AttributeKind};

/// Formulation used to represent time-varying quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    /// Electromagnetic transient: instantaneous real values.
    Emt,
    /// Dynamic phasor: complex envelopes around the system frequency.
    Dp,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Emt => write!(f, "EMT"),
            Domain::Dp => write!(f, "DP"),
        }
    }
}

impl Domain {
    /// Parse from a string.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "emt" => Some(Domain::Emt),
            "dp" | "phasor" => Some(Domain::Dp),
            _ => None,
        }
    }
}

/// Scalar type of the system matrix, one per [`Domain`].
///
/// Implemented for `f64` (EMT) and `Complex64` (DP).
pub trait MnaScalar:
    ComplexField<RealField = f64> + Copy + Default + fmt::Debug + AttributeKind
{
    const DOMAIN: Domain;
    const VECTOR_KIND: &'static str;

    /// Domain value of a power-flow phasor. The real domain keeps the real part.
    fn from_phasor(phasor: Complex64) -> Self;

    fn to_phasor(self) -> Complex64;

    /// Angular frequency the companion models shift by. Zero in EMT.
    fn phasor_shift(omega: f64) -> f64;

    fn vector_handle(attr: Attribute<DVector<Self>>) -> AttributeHandle;

    fn vector_attribute(handle: &AttributeHandle) -> Option<Attribute<DVector<Self>>>;

    fn from_parts(re: f64, im: f64) -> Self {
        Self::from_phasor(Complex64::new(re, im))
    }
}

impl MnaScalar for f64 {
    const DOMAIN: Domain = Domain::Emt;
    const VECTOR_KIND: &'static str = "real vector";

    fn from_phasor(phasor: Complex64) -> Self {
        phasor.re
    }

    fn to_phasor(self) -> Complex64 {
        Complex64::new(self, 0.0)
    }

    fn phasor_shift(_omega: f64) -> f64 {
        0.0
    }

    fn vector_handle(attr: Attribute<DVector<Self>>) -> AttributeHandle {
        AttributeHandle::RealVector(attr)
    }

    fn vector_attribute(handle: &AttributeHandle) -> Option<Attribute<DVector<Self>>> {
        match handle {
            AttributeHandle::RealVector(a) => Some(a.clone()),
            _ => None,
        }
    }
}

impl MnaScalar for Complex64 {
    const DOMAIN: Domain = Domain::Dp;
    const VECTOR_KIND: &'static str = "complex vector";

    fn from_phasor(phasor: Complex64) -> Self {
        phasor
    }

    fn to_phasor(self) -> Complex64 {
        self
    }

    fn phasor_shift(omega: f64) -> f64 {
        omega
    }

    fn vector_handle(attr: Attribute<DVector<Self>>) -> AttributeHandle {
        AttributeHandle::ComplexVector(attr)
    }

    fn vector_attribute(handle: &AttributeHandle) -> Option<Attribute<DVector<Self>>> {
        match handle {
            AttributeHandle::ComplexVector(a) => Some(a.clone()),
            _ => None,
        }
    }
}

/// Role of a node in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Reference node, never part of the unknown vector.
    Ground,
    /// User-visible network node.
    Network,
    /// Internal node introduced by a component.
    Virtual,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Ground => write!(f, "ground"),
            NodeKind::Network => write!(f, "network"),
            NodeKind::Virtual => write!(f, "virtual"),
        }
    }
}
