//! Named, typed, capability-checked state slots.
//!
//! Attributes are the unit of state shared between components, the solver
//! and the scheduler. Every task declares the attributes it reads and the
//! attributes it writes; the scheduler derives execution order from those
//! declarations alone.
//!
//! ## Capabilities
//!
//! An [`Attribute`] handle carries its own [`AccessFlags`]. The owner that
//! declares an attribute receives a handle with full access, while handles
//! obtained by name lookup from an [`AttributeList`] only carry the flags the
//! attribute was declared with. A write through a read-only handle fails with
//! [`GridError::AttributeAccess`](crate::error::GridError::AttributeAccess).

mod cell;
mod list;

pub use cell::{Attribute, WeakAttribute};
pub use list::{AttributeHandle, AttributeKind, AttributeList, AttributeValue};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::BitOr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Read/write capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags {
    pub read: bool,
    pub write: bool,
}

impl AccessFlags {
    pub const NONE: AccessFlags = AccessFlags {
        read: false,
        write: false,
    };
    pub const READ: AccessFlags = AccessFlags {
        read: true,
        write: false,
    };
    pub const WRITE: AccessFlags = AccessFlags {
        read: false,
        write: true,
    };
    pub const READ_WRITE: AccessFlags = AccessFlags {
        read: true,
        write: true,
    };

    /// Intersection of two capability sets.
    pub fn restrict(self, other: AccessFlags) -> AccessFlags {
        AccessFlags {
            read: self.read && other.read,
            write: self.write && other.write,
        }
    }
}

impl BitOr for AccessFlags {
    type Output = AccessFlags;

    fn bitor(self, rhs: AccessFlags) -> AccessFlags {
        AccessFlags {
            read: self.read || rhs.read,
            write: self.write || rhs.write,
        }
    }
}

/// Unique attribute identity. Id 0 is reserved for the external sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttributeId(pub u64);

impl AttributeId {
    pub const EXTERNAL: AttributeId = AttributeId(0);

    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        AttributeId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for AttributeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Type-erased attribute identity used for dependency tracking.
///
/// Equality and hashing consider only the id; the name is kept for
/// diagnostics.
#[derive(Debug, Clone)]
pub struct AttributeRef {
    id: AttributeId,
    name: Arc<str>,
}

impl AttributeRef {
    pub(crate) fn new(id: AttributeId, name: Arc<str>) -> Self {
        Self { id, name }
    }

    /// Sentinel for side effects the scheduler cannot track (logging, I/O).
    pub fn external() -> Self {
        Self {
            id: AttributeId::EXTERNAL,
            name: Arc::from("<external>"),
        }
    }

    pub fn id(&self) -> AttributeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_external(&self) -> bool {
        self.id == AttributeId::EXTERNAL
    }
}

impl PartialEq for AttributeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for AttributeRef {}

impl Hash for AttributeRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for AttributeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_union_and_restrict() {
        assert_eq!(AccessFlags::READ | AccessFlags::WRITE, AccessFlags::READ_WRITE);
        assert_eq!(AccessFlags::READ_WRITE.restrict(AccessFlags::READ), AccessFlags::READ);
        assert_eq!(AccessFlags::WRITE.restrict(AccessFlags::READ), AccessFlags::NONE);
    }

    #[test]
    fn test_external_sentinel_identity() {
        let a = AttributeRef::external();
        let b = AttributeRef::external();
        assert!(a.is_external());
        assert_eq!(a, b);
        assert_ne!(AttributeId::next(), AttributeId::EXTERNAL);
    }
}
