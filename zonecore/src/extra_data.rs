//! Per-player/per-arena "extra data" slots (spec.md §4.2, design note
//! "Extra-data slots"). A small integer keyed table on each object plus a
//! central registry of `(key -> factory)`, replacing per-subclass fields.

use std::any::Any;
use std::sync::{Arc, Mutex, RwLock};

pub type SlotId = u32;

type Factory = Arc<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// Central `(key -> factory)` registry shared by every object of one kind
/// (all players, or all arenas). Slot ids are small positive integers and
/// are reused once freed.
pub struct SlotRegistry {
    factories: RwLock<Vec<Option<Factory>>>,
    free_ids: Mutex<Vec<SlotId>>,
}

impl SlotRegistry {
    pub fn new() -> SlotRegistry {
        SlotRegistry {
            factories: RwLock::new(Vec::new()),
            free_ids: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new slot kind, returning the key future `ExtraDataTable`s
    /// should use to store/fetch their value for it.
    pub fn allocate_data<F>(&self, factory: F) -> SlotId
    where
        F: Fn() -> Box<dyn Any + Send + Sync> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(factory);
        let mut factories = self.factories.write().unwrap();

        if let Some(id) = self.free_ids.lock().unwrap().pop() {
            factories[id as usize] = Some(factory);
            return id;
        }

        let id = factories.len() as SlotId;
        factories.push(Some(factory));
        id
    }

    /// Releases a slot key. The id becomes eligible for reuse by a future
    /// `allocate_data` call.
    pub fn free_data(&self, id: SlotId) {
        self.factories.write().unwrap()[id as usize] = None;
        self.free_ids.lock().unwrap().push(id);
    }

    /// Snapshot of every slot currently allocated, for initializing a
    /// freshly allocated object's table.
    fn active_slots(&self) -> Vec<(SlotId, Factory)> {
        self.factories
            .read()
            .unwrap()
            .iter()
            .enumerate()
            .filter_map(|(id, factory)| factory.clone().map(|f| (id as SlotId, f)))
            .collect()
    }

    /// Initializes `table`'s slot for `id` if it doesn't already have one
    /// (spec.md §4.2 "slot is immediately initialized for every existing
    /// object"). Used by the owning store to backfill a slot registered
    /// after an object was already created.
    pub(crate) fn backfill(&self, id: SlotId, table: &mut ExtraDataTable) {
        if table.slots.contains_key(&id) {
            return;
        }
        if let Some(factory) = self.factories.read().unwrap().get(id as usize).and_then(|f| f.clone()) {
            table.slots.insert(id, factory());
        }
    }
}

impl Default for SlotRegistry {
    fn default() -> SlotRegistry {
        SlotRegistry::new()
    }
}

/// Sparse, type-erased per-object storage. Initialized with every slot the
/// registry knows about at construction time (the invariant in spec.md §4.2:
/// "slot is immediately initialized for every existing object").
#[derive(Default)]
pub struct ExtraDataTable {
    slots: hashbrown::HashMap<SlotId, Box<dyn Any + Send + Sync>>,
}

impl ExtraDataTable {
    pub fn new(registry: &SlotRegistry) -> ExtraDataTable {
        let slots = registry
            .active_slots()
            .into_iter()
            .map(|(id, factory)| (id, factory()))
            .collect();

        ExtraDataTable { slots }
    }

    pub fn get<T: 'static>(&self, id: SlotId) -> Option<&T> {
        self.slots.get(&id).and_then(|v| v.downcast_ref())
    }

    pub fn get_mut<T: 'static>(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots.get_mut(&id).and_then(|v| v.downcast_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_data_initializes_existing_objects() {
        let registry = SlotRegistry::new();
        let key = registry.allocate_data(|| Box::new(0u32));

        let table = ExtraDataTable::new(&registry);
        assert_eq!(*table.get::<u32>(key).unwrap(), 0);
    }

    #[test]
    fn slot_ids_are_reused_after_free() {
        let registry = SlotRegistry::new();
        let key_a = registry.allocate_data(|| Box::new(1u32));
        registry.free_data(key_a);
        let key_b = registry.allocate_data(|| Box::new(2u32));
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn new_table_does_not_see_freed_slots() {
        let registry = SlotRegistry::new();
        let key = registry.allocate_data(|| Box::new(1u32));
        registry.free_data(key);

        let table = ExtraDataTable::new(&registry);
        assert!(table.get::<u32>(key).is_none());
    }
}
