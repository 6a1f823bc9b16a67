//! Shared attribute cells and their capability-carrying handles.

use std::fmt;
use std::sync::{Arc, RwLock, Weak};

use super::{AccessFlags, AttributeId, AttributeRef};
use crate::error::{GridError, Result};

struct AttributeCell<T> {
    id: AttributeId,
    name: Arc<str>,
    declared: AccessFlags,
    value: RwLock<T>,
}

/// A handle to a named, shared value.
///
/// Cloning a handle is cheap and keeps the capability of the original.
pub struct Attribute<T> {
    cell: Arc<AttributeCell<T>>,
    access: AccessFlags,
}

impl<T> Clone for Attribute<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            access: self.access,
        }
    }
}

impl<T> fmt::Debug for Attribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("id", &self.cell.id)
            .field("name", &self.cell.name)
            .field("access", &self.access)
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Attribute<T> {
    /// Create an attribute with `declared` flags. The returned handle is the
    /// owner handle and has full access.
    pub fn new(name: impl Into<String>, value: T, declared: AccessFlags) -> Self {
        let name: String = name.into();
        Self {
            cell: Arc::new(AttributeCell {
                id: AttributeId::next(),
                name: Arc::from(name.as_str()),
                declared,
                value: RwLock::new(value),
            }),
            access: AccessFlags::READ_WRITE,
        }
    }

    pub fn id(&self) -> AttributeId {
        self.cell.id
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    /// Flags the attribute was declared with.
    pub fn declared_flags(&self) -> AccessFlags {
        self.cell.declared
    }

    /// Capability of this particular handle.
    pub fn access(&self) -> AccessFlags {
        self.access
    }

    /// Handle restricted to the declared flags, as handed out by lookups.
    pub fn public(&self) -> Self {
        self.restricted(self.cell.declared)
    }

    /// Handle restricted to read access.
    pub fn read_only(&self) -> Self {
        self.restricted(AccessFlags::READ)
    }

    fn restricted(&self, flags: AccessFlags) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
            access: self.access.restrict(flags),
        }
    }

    /// Type-erased identity for dependency declarations.
    pub fn reference(&self) -> AttributeRef {
        AttributeRef::new(self.cell.id, Arc::clone(&self.cell.name))
    }

    pub fn downgrade(&self) -> WeakAttribute<T> {
        WeakAttribute {
            cell: Arc::downgrade(&self.cell),
            name: Arc::clone(&self.cell.name),
            access: self.access,
        }
    }

    /// Whether both handles point at the same cell.
    pub fn same_as(&self, other: &Attribute<T>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    fn check(&self, write: bool) -> Result<()> {
        let allowed = if write { self.access.write } else { self.access.read };
        if allowed {
            Ok(())
        } else {
            Err(GridError::AttributeAccess {
                name: self.cell.name.to_string(),
                access: if write { "writ" } else { "read" },
            })
        }
    }

    fn poisoned(&self) -> GridError {
        GridError::AttributePoisoned {
            name: self.cell.name.to_string(),
        }
    }

    pub fn get(&self) -> Result<T> {
        self.with(T::clone)
    }

    pub fn set(&self, value: T) -> Result<()> {
        self.update(|slot| *slot = value)
    }

    /// Borrow the current value.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        self.check(false)?;
        let guard = self.cell.value.read().map_err(|_| self.poisoned())?;
        Ok(f(&guard))
    }

    /// Mutate the current value in place.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        self.check(true)?;
        let mut guard = self.cell.value.write().map_err(|_| self.poisoned())?;
        Ok(f(&mut guard))
    }
}

/// Non-owning back-reference to an attribute.
pub struct WeakAttribute<T> {
    cell: Weak<AttributeCell<T>>,
    name: Arc<str>,
    access: AccessFlags,
}

impl<T> Clone for WeakAttribute<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
            name: Arc::clone(&self.name),
            access: self.access,
        }
    }
}

impl<T> fmt::Debug for WeakAttribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakAttribute")
            .field("name", &self.name)
            .field("alive", &(self.cell.strong_count() > 0))
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> WeakAttribute<T> {
    pub fn upgrade(&self) -> Result<Attribute<T>> {
        self.cell
            .upgrade()
            .map(|cell| Attribute {
                cell,
                access: self.access,
            })
            .ok_or_else(|| GridError::AttributeExpired {
                name: self.name.to_string(),
            })
    }
}
