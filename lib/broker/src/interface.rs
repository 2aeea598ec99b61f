use crate::{downcast_arc, erase_arc, Broker, BrokerError, Scope};
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct InterfaceToken {
    id: u64,
    scope: Scope,
}

pub(crate) struct Entry {
    token: u64,
    registrant: &'static str,
    refcount: Arc<AtomicUsize>,
    imp: Arc<dyn Any + Send + Sync>,
}

/// A refcounted interface reference. Dropping it releases the reference the
/// same way an explicit call to `Broker::release_interface` would; the two
/// are equivalent, the RAII path just can't be forgotten.
pub struct InterfaceHandle<T: ?Sized> {
    imp: Arc<T>,
    refcount: Arc<AtomicUsize>,
}

impl<T: ?Sized> std::ops::Deref for InterfaceHandle<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.imp
    }
}

impl<T: ?Sized> Clone for InterfaceHandle<T> {
    fn clone(&self) -> Self {
        self.refcount.fetch_add(1, Ordering::AcqRel);
        InterfaceHandle {
            imp: self.imp.clone(),
            refcount: self.refcount.clone(),
        }
    }
}

impl<T: ?Sized> Drop for InterfaceHandle<T> {
    fn drop(&mut self) {
        self.refcount.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Broker {
    /// Registers `imp` under `name` at `scope`. Registering again under the
    /// same `(name, scope)` replaces the previous entry for lookup purposes
    /// (the auth-chain override pattern of spec.md §4.6 relies on this: the
    /// new module first calls `get_interface` to capture its own handle on
    /// the previous implementation, *then* registers itself, so the old
    /// implementation keeps working through the handle the new module is
    /// still holding even once the broker's table has moved on).
    pub fn register_interface<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &'static str,
        scope: Scope,
        imp: Arc<T>,
        registrant: &'static str,
    ) -> InterfaceToken {
        let id = self.next_id();

        let entry = Entry {
            token: id,
            registrant,
            refcount: Arc::new(AtomicUsize::new(0)),
            imp: erase_arc(imp),
        };

        self.interfaces.write().unwrap().insert((name, scope), entry);

        InterfaceToken { id, scope }
    }

    /// Looks up `name`, walking from `scope` up to `Scope::Global` if no
    /// arena-scoped registration exists. Increments the refcount on success.
    pub fn get_interface<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &'static str,
        scope: Scope,
    ) -> Option<InterfaceHandle<T>> {
        let interfaces = self.interfaces.read().unwrap();

        let entry = interfaces
            .get(&(name, scope))
            .or_else(|| match scope {
                Scope::Arena(_) => interfaces.get(&(name, Scope::Global)),
                Scope::Global => None,
            })?;

        let imp = downcast_arc::<T>(&entry.imp)?;
        entry.refcount.fetch_add(1, Ordering::AcqRel);

        Some(InterfaceHandle {
            imp,
            refcount: entry.refcount.clone(),
        })
    }

    /// Decrements the refcount taken out by `get_interface`. Equivalent to
    /// dropping the handle; provided so call sites that prefer the
    /// imperative spec.md §4.1 contract can spell it out explicitly.
    pub fn release_interface<T: ?Sized>(&self, handle: InterfaceHandle<T>) {
        drop(handle)
    }

    /// Unregisters the interface identified by `token`. Fails with `InUse`
    /// if any `InterfaceHandle` taken out against the current registration
    /// at that `(name, scope)` is still alive, and with `NotFound` if the
    /// token no longer names the live registration (e.g. it was superseded
    /// by a later `register_interface` call, or already unregistered).
    pub fn unregister_interface(&self, name: &'static str, token: InterfaceToken) -> Result<(), BrokerError> {
        let mut interfaces = self.interfaces.write().unwrap();

        match interfaces.get(&(name, token.scope)) {
            Some(entry) if entry.token == token.id => {
                if entry.refcount.load(Ordering::Acquire) > 0 {
                    return Err(BrokerError::InUse);
                }
            }
            _ => return Err(BrokerError::NotFound),
        }

        interfaces.remove(&(name, token.scope));
        Ok(())
    }

    /// Returns the name of the module that currently owns the registration
    /// at `(name, scope)`, for diagnostics.
    pub fn registrant(&self, name: &'static str, scope: Scope) -> Option<&'static str> {
        self.interfaces
            .read()
            .unwrap()
            .get(&(name, scope))
            .map(|entry| entry.registrant)
    }
}

impl InterfaceToken {
    pub fn scope(&self) -> Scope {
        self.scope
    }
}
