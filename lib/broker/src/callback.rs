use crate::Broker;
use std::any::Any;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct CallbackToken {
    id: u64,
}

pub(crate) struct Entry {
    token: u64,
    imp: Arc<dyn Any + Send + Sync>,
}

impl Broker {
    /// Registers a process-wide callback under `kind` (e.g. a `PlayerAction`
    /// fan-out point). Same copy-on-write snapshot discipline as advisors.
    pub fn register_callback<T: ?Sized + Send + Sync + 'static>(
        &self,
        kind: &'static str,
        imp: Arc<T>,
    ) -> CallbackToken {
        let id = self.next_id();

        let mut callbacks = self.callbacks.write().unwrap();
        let mut list: Vec<Entry> = callbacks
            .get(kind)
            .map(|list| list.iter().map(Entry::shallow_clone).collect())
            .unwrap_or_default();
        list.push(Entry {
            token: id,
            imp: Arc::new(imp),
        });
        callbacks.insert(kind, Arc::new(list));

        CallbackToken { id }
    }

    pub fn unregister_callback(&self, kind: &'static str, token: CallbackToken) {
        let mut callbacks = self.callbacks.write().unwrap();

        if let Some(current) = callbacks.get(kind) {
            let filtered: Vec<Entry> = current
                .iter()
                .filter(|entry| entry.token != token.id)
                .map(Entry::shallow_clone)
                .collect();
            callbacks.insert(kind, Arc::new(filtered));
        }
    }

    /// Snapshot of every callback registered under `kind`, in registration
    /// order. The lifecycle engine fans out `PlayerAction` to this list with
    /// no broker lock held.
    pub fn callbacks<T: ?Sized + Send + Sync + 'static>(&self, kind: &'static str) -> Vec<Arc<T>> {
        self.callbacks
            .read()
            .unwrap()
            .get(kind)
            .map(|list| {
                list.iter()
                    .filter_map(|entry| entry.imp.downcast_ref::<Arc<T>>().cloned())
                    .collect()
            })
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
