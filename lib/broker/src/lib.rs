//! The module / interface broker (spec.md §4.1).
//!
//! A small typed registry standing in for the source system's runtime
//! reflection: every interface has a name and a scope (global or per-arena),
//! and is handed out as a refcounted, type-checked handle. Advisor lists and
//! process-wide callbacks use the same copy-on-write snapshot mechanism so
//! that iterating them never blocks a concurrent register/unregister.
//!
//! Grounded on `neutronium::registry` (keyed-lookup capability dispatch) and
//! `authenticator::core::Authenticator`'s `AtomicU64` sequence counter.

mod advisor;
mod callback;
mod interface;

pub use advisor::AdvisorToken;
pub use callback::CallbackToken;
pub use interface::{InterfaceHandle, InterfaceToken};

use hashbrown::HashMap;
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Identifies an arena-scoped registration. Opaque to this crate; `zonecore`
/// is the one authority on what an arena id actually means.
pub type ArenaId = u32;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Scope {
    Global,
    Arena(ArenaId),
}

#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum BrokerError {
    /// No interface/advisor/callback is registered under that name & scope.
    NotFound,
    /// `unregister_interface` was called while the refcount was still > 0.
    InUse,
}

pub struct Broker {
    sequence: AtomicU64,
    interfaces: RwLock<HashMap<(&'static str, Scope), interface::Entry>>,
    advisors: RwLock<HashMap<(&'static str, Scope), Arc<Vec<advisor::Entry>>>>,
    callbacks: RwLock<HashMap<&'static str, Arc<Vec<callback::Entry>>>>,
}

impl Broker {
    pub fn new() -> Broker {
        Broker {
            sequence: AtomicU64::new(1),
            interfaces: RwLock::new(HashMap::new()),
            advisors: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
        }
    }

    fn next_id(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for Broker {
    fn default() -> Broker {
        Broker::new()
    }
}

unsafe impl Send for Broker {}
unsafe impl Sync for Broker {}

pub(crate) fn downcast_arc<T: ?Sized + Send + Sync + 'static>(
    any: &Arc<dyn Any + Send + Sync>,
) -> Option<Arc<T>> {
    any.downcast_ref::<Arc<T>>().cloned()
}

pub(crate) fn erase_arc<T: ?Sized + Send + Sync + 'static>(imp: Arc<T>) -> Arc<dyn Any + Send + Sync> {
    Arc::new(imp)
}

#[cfg(test)]
mod tests;
