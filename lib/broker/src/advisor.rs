use crate::{downcast_arc, erase_arc, Broker, Scope};
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct AdvisorToken {
    id: u64,
    scope: Scope,
}

pub(crate) struct Entry {
    token: u64,
    imp: Arc<dyn Any + Send + Sync>,
}

impl Broker {
    /// Appends `imp` to the ordered advisor list for `(name, scope)`. The
    /// list is copy-on-write: existing snapshots returned by `get_advisors`
    /// are unaffected by later registrations.
    pub fn register_advisor<T: ?Sized + Send + Sync + 'static>(
        &self,
        name: &'static str,
        scope: Scope,
        imp: Arc<T>,
    ) -> AdvisorToken {
        let id = self.next_id();
        let entry = Entry {
            token: id,
            imp: erase_arc(imp),
        };

        let mut advisors = self.advisors.write().unwrap();
        let mut list = advisors
            .get(&(name, scope))
            .map(|arc| arc.clone_entries())
            .unwrap_or_default();
        list.push(entry);
        advisors.insert((name, scope), Arc::new(list));

        AdvisorToken { id, scope }
    }

    /// Removes the advisor identified by `token` from the `(name, scope)`
    /// list. A no-op (not an error) if it is already gone, matching the
    /// "no advisor appears in a snapshot after its unregister completes"
    /// invariant without requiring callers to track liveness themselves.
    pub fn unregister_advisor(&self, name: &'static str, token: AdvisorToken) {
        let mut advisors = self.advisors.write().unwrap();

        if let Some(current) = advisors.get(&(name, token.scope)) {
            let filtered: Vec<Entry> = current
                .iter()
                .filter(|entry| entry.token != token.id)
                .map(Entry::shallow_clone)
                .collect();
            advisors.insert((name, token.scope), Arc::new(filtered));
        }
    }

    /// Returns a lock-free snapshot of the advisor list for `(name, scope)`,
    /// in registration order. Querying only the global scope is intentional
    /// when the caller wants zone-wide advisors only (the caller decides
    /// whether to additionally query the arena scope and combine results).
    pub fn get_advisors<T: ?Sized + Send + Sync + 'static>(&self, name: &'static str, scope: Scope) -> Vec<Arc<T>> {
        self.advisors
            .read()
            .unwrap()
            .get(&(name, scope))
            .map(|list| list.iter().filter_map(|entry| downcast_arc::<T>(&entry.imp)).collect())
            .unwrap_or_default()
    }
}

impl Entry {
    fn shallow_clone(&self) -> Entry {
        Entry {
            token: self.token,
            imp: self.imp.clone(),
        }
    }
}

trait CloneEntries {
    fn clone_entries(&self) -> Vec<Entry>;
}

impl CloneEntries for Vec<Entry> {
    fn clone_entries(&self) -> Vec<Entry> {
        self.iter().map(Entry::shallow_clone).collect()
    }
}
