//! The player lifecycle state machine (spec.md §4.5). Modeled per the
//! design note in spec.md §9 ("the per-player state machine with async
//! persist/auth"): a plain record plus an enum tag, transitions carried out
//! by a single scanning function; asynchronous completions (auth, persist)
//! post back into `PersistCompletions`/`AuthCompletions` rather than
//! resuming a suspended function.

use crate::arena::{ArenaId, ArenaStatus, ArenaStore};
use crate::auth::AuthOutcome;
use crate::player::{PlayerId, PlayerState, PlayerStore};
use broker::Broker;
use hashbrown::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub type ActionCallback = dyn Fn(PlayerId) + Send + Sync;

pub const CB_CONNECT: &str = "player_action::connect";
pub const CB_ENTER_ARENA: &str = "player_action::enter_arena";
pub const CB_LEAVE_ARENA: &str = "player_action::leave_arena";
pub const CB_DISCONNECT: &str = "player_action::disconnect";

#[derive(Debug, Clone, Copy)]
pub struct Transition {
    pub player: PlayerId,
    pub from: PlayerState,
    pub to: PlayerState,
}

/// Posted-back completions from asynchronous work (auth chain, persist
/// load/save). The lifecycle scan consumes these instead of blocking.
#[derive(Default)]
pub struct Completions {
    auth_done: Mutex<HashMap<PlayerId, AuthOutcome>>,
    global_load_done: Mutex<HashSet<PlayerId>>,
    arena_load_done: Mutex<HashSet<PlayerId>>,
    global_save_done: Mutex<HashSet<PlayerId>>,
}

impl Completions {
    pub fn new() -> Completions {
        Completions::default()
    }

    pub fn complete_auth(&self, player: PlayerId, outcome: AuthOutcome) {
        self.auth_done.lock().unwrap().insert(player, outcome);
    }

    pub fn complete_global_load(&self, player: PlayerId) {
        self.global_load_done.lock().unwrap().insert(player);
    }

    pub fn complete_arena_load(&self, player: PlayerId) {
        self.arena_load_done.lock().unwrap().insert(player);
    }

    pub fn complete_global_save(&self, player: PlayerId) {
        self.global_save_done.lock().unwrap().insert(player);
    }
}

/// Asynchronous persist backend; completion is posted back via
/// `Completions` from whatever thread finishes the I/O (spec.md §5
/// "Persist load/save is asynchronous").
pub trait PersistBackend: Send + Sync {
    fn load_global(&self, player: PlayerId);
    fn load_arena(&self, player: PlayerId, arena: ArenaId);
    fn save_global(&self, player: PlayerId);
}

pub struct LifecycleEngine {
    broker: Arc<Broker>,
    persist: Arc<dyn PersistBackend>,
}

impl LifecycleEngine {
    pub fn new(broker: Arc<Broker>, persist: Arc<dyn PersistBackend>) -> LifecycleEngine {
        LifecycleEngine { broker, persist }
    }

    /// One 100ms tick of the lifecycle scan (spec.md §4.5 "Single writer").
    /// Collects transitions under the player-store write lock, then
    /// performs side effects (callbacks, persist kickoffs) with no lock
    /// held. Returns the transitions applied, plus the set of players whose
    /// `TimeWait` hold is over and may now be freed by the caller once the
    /// transport confirms the disconnect has drained.
    pub fn scan(&self, players: &PlayerStore, arenas: &ArenaStore, completions: &Completions) -> Vec<Transition> {
        let mut transitions = Vec::new();

        players.with_all_mut(|table| {
            // Maps a replacing (new) player id to the replaced (old)
            // player's state as of the start of this tick, so a held
            // `WaitAuth` player can check whether it's been released
            // without needing the whole table inside `next_state`.
            let holds: HashMap<PlayerId, PlayerState> =
                table.values().filter_map(|p| p.replaced_by.map(|new_id| (new_id, p.state))).collect();

            for player in table.values_mut() {
                if player.state == PlayerState::WaitAuth && player.replacing.is_some() {
                    if let Some(&old_state) = holds.get(&player.id()) {
                        if old_state != PlayerState::WaitGlobalSync2 && old_state != PlayerState::TimeWait {
                            continue;
                        }
                    }
                    player.replacing = None;
                }

                if let Some(to) = next_state(player.state, player.id(), arenas, completions) {
                    transitions.push(Transition { player: player.id(), from: player.state, to });
                    player.state = to;
                    if to == PlayerState::LoggedIn || to == PlayerState::Connected {
                        if let Some(target) = player.when_logged_in.take() {
                            transitions.push(Transition { player: player.id(), from: to, to: target });
                            player.state = target;
                        }
                    }
                }
            }
        });

        for t in &transitions {
            self.apply_side_effects(*t, players, arenas);
        }

        transitions
    }

    fn apply_side_effects(&self, t: Transition, players: &PlayerStore, arenas: &ArenaStore) {
        match t.to {
            PlayerState::WaitGlobalSync1 => self.persist.load_global(t.player),
            PlayerState::DoGlobalCallbacks => self.fire(CB_CONNECT, t.player),
            PlayerState::WaitArenaSync1 => {
                if let Some(arena) = players.with_player(t.player, |p| p.new_arena).flatten() {
                    self.persist.load_arena(t.player, arena);
                }
            }
            PlayerState::Playing => {
                if let Some((arena, ship)) = players.with_player(t.player, |p| (p.arena, p.ship)).and_then(|(a, s)| a.map(|a| (a, s))) {
                    arenas.with_arena_mut(arena, |a| {
                        a.total_player_count += 1;
                        if ship >= 0 {
                            a.specific_player_count += 1;
                        }
                    });
                }
                self.fire(CB_ENTER_ARENA, t.player);
            }
            PlayerState::DoArenaSync2 => {
                if let Some((arena, ship)) = players.with_player_mut(t.player, |p| {
                    let left = p.arena.take();
                    (left, p.ship)
                }) {
                    if let Some(arena) = arena {
                        arenas.with_arena_mut(arena, |a| {
                            a.total_player_count = a.total_player_count.saturating_sub(1);
                            if ship >= 0 {
                                a.specific_player_count = a.specific_player_count.saturating_sub(1);
                            }
                        });
                    }
                }
                self.fire(CB_LEAVE_ARENA, t.player);
            }
            PlayerState::WaitGlobalSync2 => {
                self.fire(CB_DISCONNECT, t.player);
                self.persist.save_global(t.player);
            }
            _ => {}
        }
    }

    fn fire(&self, kind: &'static str, player: PlayerId) {
        for cb in self.broker.callbacks::<ActionCallback>(kind) {
            cb(player);
        }
    }
}

fn next_state(state: PlayerState, player: PlayerId, arenas: &ArenaStore, completions: &Completions) -> Option<PlayerState> {
    match state {
        PlayerState::WaitAuth => {
            let outcome = completions.auth_done.lock().unwrap().remove(&player)?;
            Some(match outcome {
                AuthOutcome::Accept { .. } => PlayerState::NeedGlobalSync,
                AuthOutcome::Reject { .. } => PlayerState::Connected,
            })
        }
        PlayerState::NeedGlobalSync => Some(PlayerState::WaitGlobalSync1),
        PlayerState::WaitGlobalSync1 => {
            if completions.global_load_done.lock().unwrap().remove(&player) {
                Some(PlayerState::DoGlobalCallbacks)
            } else {
                None
            }
        }
        PlayerState::DoGlobalCallbacks => Some(PlayerState::SendLoginResponse),
        PlayerState::SendLoginResponse => Some(PlayerState::LoggedIn),
        PlayerState::DoFreqAndArenaSync => Some(PlayerState::WaitArenaSync1),
        PlayerState::WaitArenaSync1 => {
            if completions.arena_load_done.lock().unwrap().remove(&player) {
                Some(PlayerState::ArenaRespAndCBS)
            } else {
                None
            }
        }
        PlayerState::ArenaRespAndCBS => Some(PlayerState::Playing),
        PlayerState::LeavingArena => Some(PlayerState::DoArenaSync2),
        PlayerState::DoArenaSync2 => Some(PlayerState::WaitArenaSync2),
        PlayerState::WaitArenaSync2 => Some(PlayerState::LoggedIn),
        PlayerState::LeavingZone => Some(PlayerState::WaitGlobalSync2),
        PlayerState::WaitGlobalSync2 => {
            if completions.global_save_done.lock().unwrap().remove(&player) {
                Some(PlayerState::TimeWait)
            } else {
                None
            }
        }
        // LoggedIn/Connected: advance only if a new arena assignment is
        // waiting and that arena is running; the `when_logged_in` bounce is
        // handled by the caller right after this state is reached.
        PlayerState::LoggedIn | PlayerState::Connected => None,
        PlayerState::Uninitialized | PlayerState::Playing | PlayerState::TimeWait => None,
    }
}

/// Begins a connecting player's auth flow: moves it from `Uninitialized` to
/// `WaitAuth` (spec.md §4.5). The actual `Authenticate` call and its
/// `Completions::complete_auth` post-back may happen from any thread.
pub fn begin_auth(players: &PlayerStore, player: PlayerId) {
    players.with_player_mut(player, |p| p.state = PlayerState::WaitAuth);
}

/// Assigns a new arena and kicks off the switch once the player reaches
/// `LoggedIn`/`Connected` (spec.md §4.5 "if NewArena && NewArena.Running").
/// Call sites should also call `advance_into_arena_sync` once the player is
/// observed at `LoggedIn`.
pub fn request_arena(players: &PlayerStore, player: PlayerId, arena: ArenaId) {
    players.with_player_mut(player, |p| p.new_arena = Some(arena));
}

/// Checks whether a `LoggedIn`/`Connected` player has a pending, running
/// arena assignment and if so drives it into `DoFreqAndArenaSync`. Run by
/// the caller after `LifecycleEngine::scan` returns, since it needs the
/// arena store read lock separately.
pub fn advance_into_arena_sync(players: &PlayerStore, arenas: &ArenaStore, player: PlayerId) -> bool {
    players
        .with_player_mut(player, |p| {
            if p.state != PlayerState::LoggedIn && p.state != PlayerState::Connected {
                return false;
            }
            let Some(arena) = p.new_arena else { return false };
            let running = arenas.with_arena(arena, |a| a.status == ArenaStatus::Running).unwrap_or(false);
            if running {
                p.arena = Some(arena);
                p.state = PlayerState::DoFreqAndArenaSync;
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
}

/// Marks `old` as superseded by a second login for the same name, `new`
/// (spec.md §4.5 "Re-login" rule): `old` is kicked towards `LeavingZone`
/// and `new` is held in `WaitAuth` until `old` reaches `WaitGlobalSync2`.
pub fn begin_replacement(players: &PlayerStore, old: PlayerId, new: PlayerId) {
    players.with_player_mut(old, |p| p.replaced_by = Some(new));
    players.with_player_mut(new, |p| p.replacing = Some(old));
    kick_player(players, old);
}

/// Sets `WhenLoggedIn = LeavingZone` and, if the player is currently
/// `Playing`, moves it directly to `LeavingArena` (spec.md §4.5 rules,
/// "`KickPlayer`").
pub fn kick_player(players: &PlayerStore, player: PlayerId) {
    players.with_player_mut(player, |p| {
        if p.state == PlayerState::Playing {
            p.state = PlayerState::LeavingArena;
        }
        p.when_logged_in = Some(PlayerState::LeavingZone);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::ClientKind;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Mutex as StdMutex;
    use std::time::Instant;

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000)
    }

    struct NoopPersist {
        global_loads: StdMutex<Vec<PlayerId>>,
    }

    impl PersistBackend for NoopPersist {
        fn load_global(&self, player: PlayerId) {
            self.global_loads.lock().unwrap().push(player);
        }
        fn load_arena(&self, _player: PlayerId, _arena: ArenaId) {}
        fn save_global(&self, _player: PlayerId) {}
    }

    #[test]
    fn auth_success_advances_to_need_global_sync_then_kicks_off_persist() {
        let players = PlayerStore::new();
        let arenas = ArenaStore::new();
        let broker = Arc::new(Broker::new());
        let persist = Arc::new(NoopPersist { global_loads: StdMutex::new(Vec::new()) });
        let engine = LifecycleEngine::new(broker, persist.clone());
        let completions = Completions::new();

        let id = players.allocate("Alice".into(), 1, ClientKind::LegacyClient, addr(), Instant::now());
        begin_auth(&players, id);
        completions.complete_auth(id, AuthOutcome::Accept { name: "Alice".into(), squad: String::new() });

        let t1 = engine.scan(&players, &arenas, &completions);
        assert_eq!(t1[0].to, PlayerState::NeedGlobalSync);

        let t2 = engine.scan(&players, &arenas, &completions);
        assert_eq!(t2[0].to, PlayerState::WaitGlobalSync1);
        assert_eq!(persist.global_loads.lock().unwrap().as_slice(), &[id]);
    }

    #[test]
    fn auth_failure_lands_on_connected() {
        let players = PlayerStore::new();
        let arenas = ArenaStore::new();
        let broker = Arc::new(Broker::new());
        let persist = Arc::new(NoopPersist { global_loads: StdMutex::new(Vec::new()) });
        let engine = LifecycleEngine::new(broker, persist);
        let completions = Completions::new();

        let id = players.allocate("Bob".into(), 1, ClientKind::LegacyClient, addr(), Instant::now());
        begin_auth(&players, id);
        completions.complete_auth(
            id,
            AuthOutcome::Reject { code: crate::transport::wire::LoginResponseCode::BadPassword, custom_text: None },
        );

        let t = engine.scan(&players, &arenas, &completions);
        assert_eq!(t[0].to, PlayerState::Connected);
    }

    #[test]
    fn full_login_chain_reaches_logged_in() {
        let players = PlayerStore::new();
        let arenas = ArenaStore::new();
        let broker = Arc::new(Broker::new());
        let persist = Arc::new(NoopPersist { global_loads: StdMutex::new(Vec::new()) });
        let engine = LifecycleEngine::new(broker, persist);
        let completions = Completions::new();

        let id = players.allocate("Alice".into(), 1, ClientKind::LegacyClient, addr(), Instant::now());
        begin_auth(&players, id);
        completions.complete_auth(id, AuthOutcome::Accept { name: "Alice".into(), squad: String::new() });

        engine.scan(&players, &arenas, &completions); // -> NeedGlobalSync
        engine.scan(&players, &arenas, &completions); // -> WaitGlobalSync1 (persist kicked off)
        completions.complete_global_load(id);
        engine.scan(&players, &arenas, &completions); // -> DoGlobalCallbacks
        engine.scan(&players, &arenas, &completions); // -> SendLoginResponse
        engine.scan(&players, &arenas, &completions); // -> LoggedIn

        assert_eq!(players.with_player(id, |p| p.state), Some(PlayerState::LoggedIn));
    }

    #[test]
    fn replacing_player_is_held_while_old_is_still_connected() {
        let players = PlayerStore::new();
        let arenas = ArenaStore::new();
        let broker = Arc::new(Broker::new());
        let persist = Arc::new(NoopPersist { global_loads: StdMutex::new(Vec::new()) });
        let engine = LifecycleEngine::new(broker, persist);
        let completions = Completions::new();

        let old = players.allocate("Alice".into(), 1, ClientKind::LegacyClient, addr(), Instant::now());
        players.with_player_mut(old, |p| p.state = PlayerState::Playing);

        let new = players.allocate("Alice2".into(), 2, ClientKind::LegacyClient, addr(), Instant::now());
        begin_auth(&players, new);
        begin_replacement(&players, old, new);
        completions.complete_auth(new, AuthOutcome::Accept { name: "Alice".into(), squad: String::new() });

        let transitions = engine.scan(&players, &arenas, &completions);
        assert!(transitions.iter().all(|t| t.player != new));
        assert_eq!(players.with_player(old, |p| p.state), Some(PlayerState::LeavingArena));
    }

    #[test]
    fn replaced_player_is_released_once_old_reaches_wait_global_sync2() {
        let players = PlayerStore::new();
        let arenas = ArenaStore::new();
        let broker = Arc::new(Broker::new());
        let persist = Arc::new(NoopPersist { global_loads: StdMutex::new(Vec::new()) });
        let engine = LifecycleEngine::new(broker, persist);
        let completions = Completions::new();

        let old = players.allocate("Alice".into(), 1, ClientKind::LegacyClient, addr(), Instant::now());
        players.with_player_mut(old, |p| p.state = PlayerState::WaitGlobalSync2);

        let new = players.allocate("Alice2".into(), 2, ClientKind::LegacyClient, addr(), Instant::now());
        begin_auth(&players, new);
        begin_replacement(&players, old, new);
        completions.complete_auth(new, AuthOutcome::Accept { name: "Alice".into(), squad: String::new() });

        let transitions = engine.scan(&players, &arenas, &completions);
        let released = transitions.iter().find(|t| t.player == new);
        assert_eq!(released.map(|t| t.to), Some(PlayerState::NeedGlobalSync));
    }

    #[test]
    fn kick_player_while_playing_moves_directly_to_leaving_arena() {
        let players = PlayerStore::new();
        let id = players.allocate("Alice".into(), 1, ClientKind::LegacyClient, addr(), Instant::now());
        players.with_player_mut(id, |p| p.state = PlayerState::Playing);

        kick_player(&players, id);

        assert_eq!(players.with_player(id, |p| p.state), Some(PlayerState::LeavingArena));
        assert_eq!(players.with_player(id, |p| p.when_logged_in), Some(Some(PlayerState::LeavingZone)));
    }
}
