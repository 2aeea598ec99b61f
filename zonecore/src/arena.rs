//! Arena store (spec.md §3 "Arena", §4.2).

use crate::extra_data::{ExtraDataTable, SlotId, SlotRegistry};
use hashbrown::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub type ArenaId = u32;

/// Arena lifecycle, spec.md §4.2 "Arena status" rules: an arena only moves
/// forward through this chain, never backward, and is removed from the
/// active table once it reaches `Destroyed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaStatus {
    DoInit0,
    DoInit1,
    DoInit2,
    Running,
    DoDestroy1,
    DoDestroy2,
    WaitHolds,
    Destroyed,
}

pub struct Arena {
    id: ArenaId,
    /// Base name, e.g. "turf"; distinct from `full_name` which includes the
    /// numeric suffix used to disambiguate multiple instances of one base.
    pub base_name: String,
    pub suffix: Option<u32>,
    pub status: ArenaStatus,
    pub specific_player_count: u32,
    pub total_player_count: u32,
    /// When `total_player_count` last dropped to zero while `Running`; the
    /// arena engine destroys it once this has stood for
    /// `ARENA_DESTROY_GRACE` (spec.md §4.2 "destroyed when empty for the
    /// configured grace period").
    empty_since: Option<Instant>,
    extra: ExtraDataTable,
}

impl Arena {
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// The name as clients see it: base name plus suffix if present, e.g.
    /// "turf2".
    pub fn full_name(&self) -> String {
        match self.suffix {
            Some(n) => format!("{}{}", self.base_name, n),
            None => self.base_name.clone(),
        }
    }

    pub fn extra_data<T: 'static>(&self, key: SlotId) -> Option<&T> {
        self.extra.get(key)
    }

    pub fn extra_data_mut<T: 'static>(&mut self, key: SlotId) -> Option<&mut T> {
        self.extra.get_mut(key)
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

pub struct ArenaStore {
    registry: SlotRegistry,
    inner: RwLock<Inner>,
}

struct Inner {
    arenas: HashMap<ArenaId, Arena>,
    by_full_name: HashMap<String, ArenaId>,
    next_id: ArenaId,
}

impl ArenaStore {
    pub fn new() -> ArenaStore {
        ArenaStore {
            registry: SlotRegistry::new(),
            inner: RwLock::new(Inner {
                arenas: HashMap::new(),
                by_full_name: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    pub fn slot_registry(&self) -> &SlotRegistry {
        &self.registry
    }

    /// Registers a new extra-data slot kind and immediately initializes it
    /// on every arena that already exists (spec.md §4.2 "slot is
    /// immediately initialized for every existing object").
    pub fn allocate_data<F>(&self, factory: F) -> SlotId
    where
        F: Fn() -> Box<dyn std::any::Any + Send + Sync> + Send + Sync + 'static,
    {
        let id = self.registry.allocate_data(factory);
        let mut inner = self.inner.write().unwrap();
        for arena in inner.arenas.values_mut() {
            self.registry.backfill(id, &mut arena.extra);
        }
        id
    }

    /// Creates an arena with `base_name`, choosing the lowest unused numeric
    /// suffix for that base name if one is needed so that `full_name()` is
    /// unique across the whole zone (spec.md §4.2 "Arena naming").
    pub fn create(&self, base_name: &str, want_suffix: Option<u32>) -> ArenaId {
        let mut inner = self.inner.write().unwrap();
        let base = base_name.trim();

        let suffix = match want_suffix {
            Some(n) => Some(n),
            None => {
                if !inner.by_full_name.contains_key(&normalize(base)) {
                    None
                } else {
                    let mut n = 1;
                    loop {
                        let candidate = format!("{}{}", base, n);
                        if !inner.by_full_name.contains_key(&normalize(&candidate)) {
                            break Some(n);
                        }
                        n += 1;
                    }
                }
            }
        };

        let id = inner.next_id;
        inner.next_id += 1;

        let arena = Arena {
            id,
            base_name: base.to_string(),
            suffix,
            status: ArenaStatus::DoInit0,
            specific_player_count: 0,
            total_player_count: 0,
            empty_since: None,
            extra: ExtraDataTable::new(&self.registry),
        };

        let full = normalize(&arena.full_name());
        inner.by_full_name.insert(full, id);
        inner.arenas.insert(id, arena);
        id
    }

    /// Removes an arena from the active table. Callers must have already
    /// driven its status to `Destroyed` and moved every player out.
    pub fn remove(&self, id: ArenaId) -> Option<Arena> {
        let mut inner = self.inner.write().unwrap();
        let arena = inner.arenas.remove(&id)?;
        inner.by_full_name.remove(&normalize(&arena.full_name()));
        Some(arena)
    }

    pub fn with_arena<R>(&self, id: ArenaId, f: impl FnOnce(&Arena) -> R) -> Option<R> {
        self.inner.read().unwrap().arenas.get(&id).map(f)
    }

    pub fn with_arena_mut<R>(&self, id: ArenaId, f: impl FnOnce(&mut Arena) -> R) -> Option<R> {
        self.inner.write().unwrap().arenas.get_mut(&id).map(f)
    }

    pub fn find_by_name<R>(&self, full_name: &str, f: impl FnOnce(&Arena) -> R) -> Option<R> {
        let inner = self.inner.read().unwrap();
        let id = *inner.by_full_name.get(&normalize(full_name))?;
        inner.arenas.get(&id).map(f)
    }

    pub fn with_all<R>(&self, f: impl FnOnce(&HashMap<ArenaId, Arena>) -> R) -> R {
        f(&self.inner.read().unwrap().arenas)
    }

    pub fn with_all_mut<R>(&self, f: impl FnOnce(&mut HashMap<ArenaId, Arena>) -> R) -> R {
        f(&mut self.inner.write().unwrap().arenas)
    }

    pub fn ids(&self) -> Vec<ArenaId> {
        self.inner.read().unwrap().arenas.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().arenas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ArenaStore {
    fn default() -> ArenaStore {
        ArenaStore::new()
    }
}

/// How long a `Running` arena may sit at zero players before the engine
/// starts tearing it down (spec.md §4.2).
pub const ARENA_DESTROY_GRACE: Duration = Duration::from_secs(60);

/// Advances every arena's status one step (spec.md §4.2 "progressed by the
/// arena engine"). Each status is a single mainloop-tick step rather than a
/// jump straight to `Running`/`Destroyed`, mirroring the rest of this
/// crate's tick-driven subsystems (`security::rotate_if_due`,
/// `lag::LagAction::due`). Returns the ids removed from the store this tick.
///
/// `DoInit1`/`DoInit2` and `DoDestroy1`/`DoDestroy2`/`WaitHolds` exist for a
/// future module that needs to hold an arena in one of those phases (e.g.
/// while a map file loads); nothing in this core currently registers such a
/// hold, so they pass through on the very next tick.
pub fn advance_arena_engine(arenas: &ArenaStore, now: Instant) -> Vec<ArenaId> {
    let mut destroyed = Vec::new();

    arenas.with_all_mut(|table| {
        for arena in table.values_mut() {
            arena.status = match arena.status {
                ArenaStatus::DoInit0 => ArenaStatus::DoInit1,
                ArenaStatus::DoInit1 => ArenaStatus::DoInit2,
                ArenaStatus::DoInit2 => ArenaStatus::Running,
                ArenaStatus::Running => {
                    if arena.total_player_count == 0 {
                        match arena.empty_since {
                            Some(since) if now.duration_since(since) >= ARENA_DESTROY_GRACE => ArenaStatus::DoDestroy1,
                            Some(_) => ArenaStatus::Running,
                            None => {
                                arena.empty_since = Some(now);
                                ArenaStatus::Running
                            }
                        }
                    } else {
                        arena.empty_since = None;
                        ArenaStatus::Running
                    }
                }
                ArenaStatus::DoDestroy1 => ArenaStatus::DoDestroy2,
                ArenaStatus::DoDestroy2 => ArenaStatus::WaitHolds,
                ArenaStatus::WaitHolds => ArenaStatus::Destroyed,
                ArenaStatus::Destroyed => {
                    destroyed.push(arena.id());
                    ArenaStatus::Destroyed
                }
            };
        }
    });

    for id in &destroyed {
        arenas.remove(*id);
    }
    destroyed
}
