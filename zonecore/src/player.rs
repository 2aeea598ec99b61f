//! Player store (spec.md §3 "Player", §4.2).

use crate::arena::ArenaId;
use crate::extra_data::{ExtraDataTable, SlotId, SlotRegistry};
use hashbrown::HashMap;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};

pub type PlayerId = u32;

/// Minimum delay before a freed player id may be reissued (spec.md §3).
pub const ID_REUSE_DELAY: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    LegacyClient,
    ModernClient,
    ChatClient,
    Fake,
}

/// The lifecycle state machine of spec.md §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Uninitialized,
    WaitAuth,
    Connected,
    NeedGlobalSync,
    WaitGlobalSync1,
    DoGlobalCallbacks,
    SendLoginResponse,
    LoggedIn,
    DoFreqAndArenaSync,
    WaitArenaSync1,
    ArenaRespAndCBS,
    Playing,
    LeavingArena,
    DoArenaSync2,
    WaitArenaSync2,
    LeavingZone,
    WaitGlobalSync2,
    TimeWait,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PositionSnapshot {
    pub x: i16,
    pub y: i16,
    pub vel_x: i16,
    pub vel_y: i16,
    pub rotation: u8,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PositionFlags {
    pub has_sent_position: bool,
    pub has_sent_weapon: bool,
    pub no_ship: bool,
    pub no_flags_balls: bool,
}

pub struct Player {
    id: PlayerId,
    pub name: String,
    pub squad: String,
    pub machine_id: u32,
    pub permanent_id: u64,
    pub client_kind: ClientKind,
    pub authenticated: bool,
    pub state: PlayerState,
    /// Terminal state to fall into once `LoggedIn` is reached again, e.g.
    /// `LeavingZone` after `KickPlayer` (spec.md §4.5 rules).
    pub when_logged_in: Option<PlayerState>,
    /// Set when another login for the same name supersedes this player; the
    /// new player (by id) is held in `WaitAuth` until this one reaches
    /// `WaitGlobalSync2` (spec.md §4.5 rules).
    pub replaced_by: Option<PlayerId>,
    /// The reverse link: set on the new player while it waits for
    /// `replaced_by`'s target (the old player it superseded) to finish
    /// leaving.
    pub replacing: Option<PlayerId>,
    pub arena: Option<ArenaId>,
    pub new_arena: Option<ArenaId>,
    pub ship: i8,
    pub freq: i16,
    pub position: PositionSnapshot,
    pub flags: PositionFlags,
    pub remote_addr: SocketAddr,
    pub connect_time: Instant,
    extra: ExtraDataTable,
}

impl Player {
    pub fn id(&self) -> PlayerId {
        self.id
    }

    pub fn extra_data<T: 'static>(&self, key: SlotId) -> Option<&T> {
        self.extra.get(key)
    }

    pub fn extra_data_mut<T: 'static>(&mut self, key: SlotId) -> Option<&mut T> {
        self.extra.get_mut(key)
    }
}

pub struct PlayerStore {
    registry: SlotRegistry,
    inner: RwLock<Inner>,
}

struct Inner {
    players: HashMap<PlayerId, Player>,
    by_name: HashMap<String, PlayerId>,
    free_ids: Vec<PlayerId>,
    reuse_queue: VecDeque<(PlayerId, Instant)>,
    next_id: PlayerId,
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

impl PlayerStore {
    pub fn new() -> PlayerStore {
        PlayerStore {
            registry: SlotRegistry::new(),
            inner: RwLock::new(Inner {
                players: HashMap::new(),
                by_name: HashMap::new(),
                free_ids: Vec::new(),
                reuse_queue: VecDeque::new(),
                next_id: 1,
            }),
        }
    }

    pub fn slot_registry(&self) -> &SlotRegistry {
        &self.registry
    }

    /// Registers a new extra-data slot kind and immediately initializes it
    /// on every player that already exists (spec.md §4.2 "slot is
    /// immediately initialized for every existing object" — allocating
    /// directly on the bare registry only covers players created
    /// afterward).
    pub fn allocate_data<F>(&self, factory: F) -> SlotId
    where
        F: Fn() -> Box<dyn std::any::Any + Send + Sync> + Send + Sync + 'static,
    {
        let id = self.registry.allocate_data(factory);
        let mut inner = self.inner.write().unwrap();
        for player in inner.players.values_mut() {
            self.registry.backfill(id, &mut player.extra);
        }
        id
    }

    /// Allocates a new player id and inserts a fully-initialized `Player`.
    /// Reclaims ids parked on the reuse queue whose `ID_REUSE_DELAY` has
    /// elapsed before minting a brand new one.
    pub fn allocate(&self, name: String, machine_id: u32, client_kind: ClientKind, remote_addr: SocketAddr, now: Instant) -> PlayerId {
        let mut inner = self.inner.write().unwrap();

        while let Some(&(id, freed_at)) = inner.reuse_queue.front() {
            if now.duration_since(freed_at) >= ID_REUSE_DELAY {
                inner.reuse_queue.pop_front();
                inner.free_ids.push(id);
            } else {
                break;
            }
        }

        let id = inner.free_ids.pop().unwrap_or_else(|| {
            let id = inner.next_id;
            inner.next_id += 1;
            id
        });

        let player = Player {
            id,
            name: name.clone(),
            squad: String::new(),
            machine_id,
            permanent_id: 0,
            client_kind,
            authenticated: false,
            state: PlayerState::Uninitialized,
            when_logged_in: None,
            replaced_by: None,
            replacing: None,
            arena: None,
            new_arena: None,
            ship: -1,
            freq: -1,
            position: PositionSnapshot::default(),
            flags: PositionFlags::default(),
            remote_addr,
            connect_time: now,
            extra: ExtraDataTable::new(&self.registry),
        };

        inner.by_name.insert(normalize_name(&name), id);
        inner.players.insert(id, player);
        id
    }

    /// Two-phase free (spec.md §3): removes the player from the active set
    /// and returns it so the caller can fan out the "player freed" callback
    /// with no lock held; the extra-data table is dropped when the returned
    /// `Player` is dropped, and the id is parked on the reuse queue.
    pub fn free(&self, id: PlayerId, now: Instant) -> Option<Player> {
        let mut inner = self.inner.write().unwrap();
        let player = inner.players.remove(&id)?;
        inner.by_name.remove(&normalize_name(&player.name));
        inner.reuse_queue.push_back((id, now));
        Some(player)
    }

    pub fn with_player<R>(&self, id: PlayerId, f: impl FnOnce(&Player) -> R) -> Option<R> {
        self.inner.read().unwrap().players.get(&id).map(f)
    }

    pub fn with_player_mut<R>(&self, id: PlayerId, f: impl FnOnce(&mut Player) -> R) -> Option<R> {
        self.inner.write().unwrap().players.get_mut(&id).map(f)
    }

    pub fn find_by_name<R>(&self, name: &str, f: impl FnOnce(&Player) -> R) -> Option<R> {
        let inner = self.inner.read().unwrap();
        let id = *inner.by_name.get(&normalize_name(name))?;
        inner.players.get(&id).map(f)
    }

    /// Finds the player whose connection originated from `addr`. Used to
    /// recover the player id tied to a connection once its real login
    /// identity becomes known.
    pub fn find_by_addr<R>(&self, addr: &SocketAddr, f: impl FnOnce(&Player) -> R) -> Option<R> {
        let inner = self.inner.read().unwrap();
        inner.players.values().find(|p| p.remote_addr == *addr).map(f)
    }

    /// Runs `f` against a read-locked snapshot of the whole player table.
    pub fn with_all<R>(&self, f: impl FnOnce(&HashMap<PlayerId, Player>) -> R) -> R {
        f(&self.inner.read().unwrap().players)
    }

    /// Runs `f` against a write-locked view of the whole player table. The
    /// lifecycle scan uses this to collect state transitions and apply them
    /// in one critical section, deferring all side effects until the lock
    /// is released (spec.md §4.5 "Rules").
    pub fn with_all_mut<R>(&self, f: impl FnOnce(&mut HashMap<PlayerId, Player>) -> R) -> R {
        f(&mut self.inner.write().unwrap().players)
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.inner.read().unwrap().players.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PlayerStore {
    fn default() -> PlayerStore {
        PlayerStore::new()
    }
}

/// Expands a target specification into a concrete set of player ids
/// (spec.md §4.2 "target-to-set").
#[derive(Debug, Clone)]
pub enum Target {
    Single(PlayerId),
    Arena(ArenaId),
    Team { arena: ArenaId, freq: i16 },
    Zone,
    Set(Vec<PlayerId>),
}

impl Target {
    pub fn expand(&self, store: &PlayerStore) -> Vec<PlayerId> {
        match self {
            Target::Single(id) => vec![*id],
            Target::Set(ids) => ids.clone(),
            Target::Zone => store.ids(),
            Target::Arena(arena) => store.with_all(|players| {
                players
                    .values()
                    .filter(|p| p.arena == Some(*arena))
                    .map(Player::id)
                    .collect()
            }),
            Target::Team { arena, freq } => store.with_all(|players| {
                players
                    .values()
                    .filter(|p| p.arena == Some(*arena) && p.freq == *freq)
                    .map(Player::id)
                    .collect()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000)
    }

    #[test]
    fn allocate_then_free_then_immediate_allocate_does_not_reuse_id() {
        let store = PlayerStore::new();
        let now = Instant::now();

        let p1 = store.allocate("Alice".into(), 1, ClientKind::LegacyClient, addr(), now);
        store.free(p1, now).unwrap();
        let p2 = store.allocate("Bob".into(), 2, ClientKind::LegacyClient, addr(), now);

        assert_ne!(p1, p2);
    }

    #[test]
    fn allocate_after_reuse_delay_may_reuse_id() {
        let store = PlayerStore::new();
        let now = Instant::now();

        let p1 = store.allocate("Alice".into(), 1, ClientKind::LegacyClient, addr(), now);
        store.free(p1, now).unwrap();

        // Force another id to be minted in between so p1 isn't just "the next id".
        let later = now + ID_REUSE_DELAY + Duration::from_millis(100);
        let p2 = store.allocate("Carl".into(), 3, ClientKind::LegacyClient, addr(), later);

        assert_eq!(p1, p2);
    }

    #[test]
    fn find_by_name_is_case_insensitive_and_trimmed() {
        let store = PlayerStore::new();
        let now = Instant::now();
        let id = store.allocate("  Alice ".into(), 1, ClientKind::LegacyClient, addr(), now);

        assert_eq!(store.find_by_name("alice", |p| p.id()), Some(id));
        assert_eq!(store.find_by_name(" ALICE", |p| p.id()), Some(id));
    }

    #[test]
    fn extra_data_slot_initialized_on_allocate() {
        let store = PlayerStore::new();
        let key = store.allocate_data(|| Box::new(42u32));
        let now = Instant::now();
        let id = store.allocate("Alice".into(), 1, ClientKind::LegacyClient, addr(), now);

        assert_eq!(store.with_player(id, |p| *p.extra_data::<u32>(key).unwrap()), Some(42));
    }

    #[test]
    fn extra_data_slot_registered_after_allocate_backfills_existing_players() {
        let store = PlayerStore::new();
        let now = Instant::now();
        let id = store.allocate("Alice".into(), 1, ClientKind::LegacyClient, addr(), now);

        let key = store.allocate_data(|| Box::new(7u32));

        assert_eq!(store.with_player(id, |p| *p.extra_data::<u32>(key).unwrap()), Some(7));
    }
}
