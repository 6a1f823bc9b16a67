//! Per-owner typed attribute registry.

use std::collections::BTreeMap;
use std::fmt;

use nalgebra::DVector;
use num_complex::Complex64;

use super::{AccessFlags, Attribute, AttributeRef};
use crate::circuit::MnaScalar;
use crate::error::{GridError, Result};

/// A registered attribute of one of the supported kinds.
#[derive(Debug, Clone)]
pub enum AttributeHandle {
    Real(Attribute<f64>),
    Complex(Attribute<Complex64>),
    Bool(Attribute<bool>),
    RealVector(Attribute<DVector<f64>>),
    ComplexVector(Attribute<DVector<Complex64>>),
}

impl AttributeHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Real(_) => f64::KIND,
            Self::Complex(_) => Complex64::KIND,
            Self::Bool(_) => bool::KIND,
            Self::RealVector(_) => <DVector<f64>>::KIND,
            Self::ComplexVector(_) => <DVector<Complex64>>::KIND,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Real(a) => a.name(),
            Self::Complex(a) => a.name(),
            Self::Bool(a) => a.name(),
            Self::RealVector(a) => a.name(),
            Self::ComplexVector(a) => a.name(),
        }
    }

    pub fn reference(&self) -> AttributeRef {
        match self {
            Self::Real(a) => a.reference(),
            Self::Complex(a) => a.reference(),
            Self::Bool(a) => a.reference(),
            Self::RealVector(a) => a.reference(),
            Self::ComplexVector(a) => a.reference(),
        }
    }

    /// Handle restricted to the declared flags.
    pub fn public(&self) -> Self {
        match self {
            Self::Real(a) => Self::Real(a.public()),
            Self::Complex(a) => Self::Complex(a.public()),
            Self::Bool(a) => Self::Bool(a.public()),
            Self::RealVector(a) => Self::RealVector(a.public()),
            Self::ComplexVector(a) => Self::ComplexVector(a.public()),
        }
    }

    /// Snapshot of the current value.
    pub fn sample(&self) -> Result<AttributeValue> {
        match self {
            Self::Real(a) => a.get().map(AttributeValue::Real),
            Self::Complex(a) => a.get().map(AttributeValue::Complex),
            Self::Bool(a) => a.get().map(AttributeValue::Bool),
            Self::RealVector(a) => a.with(|v| AttributeValue::RealVector(v.iter().copied().collect())),
            Self::ComplexVector(a) => {
                a.with(|v| AttributeValue::ComplexVector(v.iter().copied().collect()))
            }
        }
    }
}

/// Value types that can live in an [`AttributeList`].
pub trait AttributeKind: Clone + Send + Sync + Sized + 'static {
    const KIND: &'static str;

    fn into_handle(attr: Attribute<Self>) -> AttributeHandle;

    fn from_handle(handle: &AttributeHandle) -> Option<Attribute<Self>>;
}

macro_rules! attribute_kind {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl AttributeKind for $ty {
            const KIND: &'static str = $kind;

            fn into_handle(attr: Attribute<Self>) -> AttributeHandle {
                AttributeHandle::$variant(attr)
            }

            fn from_handle(handle: &AttributeHandle) -> Option<Attribute<Self>> {
                match handle {
                    AttributeHandle::$variant(a) => Some(a.clone()),
                    _ => None,
                }
            }
        }
    };
}

attribute_kind!(f64, Real, "real");
attribute_kind!(Complex64, Complex, "complex");
attribute_kind!(bool, Bool, "bool");

impl<T: MnaScalar> AttributeKind for DVector<T> {
    const KIND: &'static str = T::VECTOR_KIND;

    fn into_handle(attr: Attribute<Self>) -> AttributeHandle {
        T::vector_handle(attr)
    }

    fn from_handle(handle: &AttributeHandle) -> Option<Attribute<Self>> {
        T::vector_attribute(handle)
    }
}

/// Snapshot of an attribute value, as delivered to log sinks.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Real(f64),
    Complex(Complex64),
    Bool(bool),
    RealVector(Vec<f64>),
    ComplexVector(Vec<Complex64>),
}

impl AttributeValue {
    /// Real scalar view: real part for complex values, 1/0 for booleans.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            Self::Complex(c) => Some(c.re),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<Complex64> {
        match self {
            Self::Real(v) => Some(Complex64::new(*v, 0.0)),
            Self::Complex(c) => Some(*c),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn complex(f: &mut fmt::Formatter<'_>, c: &Complex64) -> fmt::Result {
            write!(f, "{}{:+}j", c.re, c.im)
        }
        match self {
            Self::Real(v) => write!(f, "{}", v),
            Self::Complex(c) => complex(f, c),
            Self::Bool(b) => write!(f, "{}", b),
            Self::RealVector(v) => {
                for (i, x) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ";")?;
                    }
                    write!(f, "{}", x)?;
                }
                Ok(())
            }
            Self::ComplexVector(v) => {
                for (i, c) in v.iter().enumerate() {
                    if i > 0 {
                        write!(f, ";")?;
                    }
                    complex(f, c)?;
                }
                Ok(())
            }
        }
    }
}

/// Mapping from attribute name to typed handle for one owner.
#[derive(Debug, Clone)]
pub struct AttributeList {
    owner: String,
    entries: BTreeMap<String, AttributeHandle>,
}

impl AttributeList {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Register a new attribute and return the owner handle.
    pub fn declare<T: AttributeKind>(
        &mut self,
        name: &str,
        value: T,
        flags: AccessFlags,
    ) -> Result<Attribute<T>> {
        let attr = Attribute::new(format!("{}.{}", self.owner, name), value, flags);
        self.register(name, &attr)?;
        Ok(attr)
    }

    /// Expose an attribute created elsewhere under this owner.
    pub fn register<T: AttributeKind>(&mut self, name: &str, attr: &Attribute<T>) -> Result<()> {
        if self.entries.contains_key(name) {
            return Err(GridError::DuplicateAttribute {
                owner: self.owner.clone(),
                name: name.to_string(),
            });
        }
        self.entries.insert(name.to_string(), T::into_handle(attr.clone()));
        Ok(())
    }

    /// Typed lookup; the handle carries only the declared flags.
    pub fn get<T: AttributeKind>(&self, name: &str) -> Result<Attribute<T>> {
        let handle = self.entry(name)?;
        T::from_handle(handle)
            .map(|a| a.public())
            .ok_or_else(|| GridError::AttributeType {
                name: name.to_string(),
                requested: T::KIND,
                actual: handle.kind(),
            })
    }

    /// Untyped lookup; like [`get`](Self::get), the handle carries only the
    /// declared flags.
    pub fn handle(&self, name: &str) -> Result<AttributeHandle> {
        self.entry(name).map(AttributeHandle::public)
    }

    fn entry(&self, name: &str) -> Result<&AttributeHandle> {
        self.entries
            .get(name)
            .ok_or_else(|| GridError::AttributeNotFound {
                owner: self.owner.clone(),
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_lookup_typed() {
        let mut list = AttributeList::new("r1");
        let owner = list.declare("R", 10.0_f64, AccessFlags::READ_WRITE).unwrap();
        let looked_up: Attribute<f64> = list.get("R").unwrap();
        looked_up.set(20.0).unwrap();
        assert_eq!(owner.get().unwrap(), 20.0);
        assert_eq!(owner.name(), "r1.R");
    }

    #[test]
    fn test_lookup_with_wrong_type_fails() {
        let mut list = AttributeList::new("sw");
        list.declare("is_closed", true, AccessFlags::READ_WRITE).unwrap();
        let err = list.get::<f64>("is_closed").unwrap_err();
        assert!(matches!(
            err,
            GridError::AttributeType { requested: "real", actual: "bool", .. }
        ));
    }

    #[test]
    fn test_duplicate_and_missing() {
        let mut list = AttributeList::new("c1");
        list.declare("C", 1e-6_f64, AccessFlags::READ).unwrap();
        assert!(matches!(
            list.declare("C", 2e-6_f64, AccessFlags::READ),
            Err(GridError::DuplicateAttribute { .. })
        ));
        assert!(matches!(
            list.get::<f64>("L"),
            Err(GridError::AttributeNotFound { .. })
        ));
    }

    #[test]
    fn test_read_only_lookup_blocks_writes() {
        let mut list = AttributeList::new("gen");
        let owner = list.declare("w_r", 314.0_f64, AccessFlags::READ).unwrap();
        assert!(list.get::<f64>("w_r").unwrap().set(0.0).is_err());
        owner.set(300.0).unwrap();
        assert_eq!(list.get::<f64>("w_r").unwrap().get().unwrap(), 300.0);
    }

    #[test]
    fn test_vector_kinds_and_sampling() {
        let mut list = AttributeList::new("solver");
        list.declare("left_vector", DVector::from_vec(vec![1.0_f64, 2.0]), AccessFlags::READ)
            .unwrap();
        list.declare(
            "phasors",
            DVector::from_vec(vec![Complex64::new(0.0, 1.0)]),
            AccessFlags::READ,
        )
        .unwrap();
        assert!(list.get::<DVector<Complex64>>("left_vector").is_err());
        let sample = list.handle("left_vector").unwrap().sample().unwrap();
        assert_eq!(sample, AttributeValue::RealVector(vec![1.0, 2.0]));
        assert_eq!(sample.to_string(), "1;2");
        let phasors = list.handle("phasors").unwrap().sample().unwrap();
        assert_eq!(phasors.to_string(), "0+1j");
    }
}
