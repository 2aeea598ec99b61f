use broker::Broker;
use clap::{App, Arg};
use flux::logging::{self, debug, info, warn, LoggingConfig};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};
use zonecore::arena::{self, ArenaStore};
use zonecore::auth::{extend_chain, Authenticate, AuthOutcome, BanFilter, LoginRequest};
use zonecore::config::ZoneConfig;
use zonecore::directory::{Beacon, PUBLISH_INTERVAL};
use zonecore::lag::{LagAction, LagActionConfig, LagCollector};
use zonecore::lifecycle::{self, Completions, LifecycleEngine, PersistBackend};
use zonecore::placement::place_player;
use zonecore::player::{ClientKind, PlayerStore};
use zonecore::security::{validate_response, SecurityManager};
use zonecore::transport::endpoint::{ConnectionChange, ConnectionId, ConnectionInitHandler, Endpoint};
use zonecore::transport::limiter::LimiterConfig;
use zonecore::transport::wire::{ArenaMessage, LoginPacket, LoginResponse, LoginResponseCode, SecurityResponse};

mod config;
mod signals;

use config::ZoneServerConfig as Bootstrap;

/// Reached only by a graceful `?shutdown`-style admin action, which lives
/// in a chat/command module external to this core.
#[allow(dead_code)]
const EXIT_CLEAN: i32 = 0;
const EXIT_FATAL_INIT: i32 = 1;
const EXIT_MODULE_LOAD_FAILURE: i32 = 2;
/// Reached only by an admin-triggered module reload, external to this core.
#[allow(dead_code)]
const EXIT_RESTART: i32 = 3;
const EXIT_SHUTDOWN: i32 = 4;

/// Claims every connection attempt; the bootstrap server ships with no
/// further connection-policy module installed (spec.md §4.3 "Connection
/// init" is a chain; this is its terminal, catch-all link).
struct AcceptAllInit {
    limiter: LimiterConfig,
}

impl ConnectionInitHandler for AcceptAllInit {
    fn try_claim(&self, _addr: SocketAddr, _client_kind: u8, _key: i32) -> Option<LimiterConfig> {
        Some(self.limiter)
    }
}

/// Stand-in persist backend: completes every load/save immediately
/// (spec.md §1 Non-goals: "the persistence executor" is an external
/// collaborator). Real deployments register their own `PersistBackend`.
struct ImmediatePersist {
    completions: Arc<Completions>,
}

impl PersistBackend for ImmediatePersist {
    fn load_global(&self, player: zonecore::player::PlayerId) {
        self.completions.complete_global_load(player);
    }
    fn load_arena(&self, player: zonecore::player::PlayerId, _arena: zonecore::arena::ArenaId) {
        self.completions.complete_arena_load(player);
    }
    fn save_global(&self, player: zonecore::player::PlayerId) {
        self.completions.complete_global_save(player);
    }
}

fn main() {
    let matches = App::new("zoneserver")
        .version("1.0")
        .author("Bush Hammer Industries")
        .about("Runs a zone server.")
        .arg(Arg::with_name("MODULE_CONFIG").help("Path to the module config file").required(true))
        .arg(Arg::with_name("ZONE_CONFIG").help("Path to the zone config file").required(true))
        .arg(Arg::with_name("log-dir").long("log-dir").takes_value(true).help("Directory for daily-rotated log files"))
        .get_matches();

    let module_config_path = matches.value_of("MODULE_CONFIG").unwrap();
    let zone_config_path = matches.value_of("ZONE_CONFIG").unwrap();
    let log_dir = matches.value_of("log-dir").map(PathBuf::from);

    let (log, reopen_handle) = logging::init_reopenable(LoggingConfig { terminal: true, file_dir: log_dir.clone(), ..Default::default() });

    info!(log, "starting zone server"; "module_config" => module_config_path, "zone_config" => zone_config_path);

    let modules = match load_module_list(module_config_path) {
        Ok(modules) => modules,
        Err(err) => {
            warn!(log, "failed loading module config"; "error" => %err);
            process::exit(EXIT_MODULE_LOAD_FAILURE);
        }
    };
    debug!(log, "module list loaded"; "count" => modules.len());

    let zone_config = match ZoneConfig::load(zone_config_path) {
        Ok(config) => config,
        Err(err) => {
            warn!(log, "failed loading zone config"; "error" => %err);
            process::exit(EXIT_FATAL_INIT);
        }
    };

    let bootstrap = Bootstrap::default();

    let signal_flags = match signals::SignalFlags::install() {
        Ok(flags) => flags,
        Err(err) => {
            warn!(log, "failed installing signal handlers"; "error" => %err);
            process::exit(EXIT_FATAL_INIT);
        }
    };

    let exit_code = run(
        log.clone(),
        reopen_handle,
        zone_config.server.bind_address,
        zone_config.zone.name.clone(),
        bootstrap.limiter_config(),
        signal_flags,
    );
    info!(log, "zone server stopped"; "exit_code" => exit_code);
    process::exit(exit_code);
}

fn load_module_list(path: impl AsRef<Path>) -> Result<Vec<String>, serdeconv::Error> {
    serdeconv::from_toml_file::<ModuleList, _>(path).map(|list| list.modules)
}

#[derive(serde_derive::Deserialize)]
struct ModuleList {
    #[serde(default)]
    modules: Vec<String>,
}

fn run(
    log: logging::Logger,
    reopen_handle: Arc<logging::ReopenHandle>,
    bind_addr: SocketAddr,
    zone_name: String,
    limiter: LimiterConfig,
    signal_flags: signals::SignalFlags,
) -> i32 {
    let broker = Arc::new(Broker::new());
    let players = PlayerStore::new();
    let arenas = ArenaStore::new();
    let completions = Arc::new(Completions::new());
    let persist = Arc::new(ImmediatePersist { completions: completions.clone() });
    let lifecycle = LifecycleEngine::new(broker.clone(), persist.clone());
    let placement_config = zonecore::config::MapConfigHandle::new();
    let public_arena_names = vec![zone_name];

    let auth_chain = extend_chain(&broker, &log, |previous| Arc::new(BanFilter::new(previous, &log)));

    let mut security = SecurityManager::new();
    let mut lag_collector = LagCollector::new();
    let mut lag_action = LagAction::new(LagActionConfig::default());
    let mut rng = rand::thread_rng();

    let mut endpoint = match Endpoint::new(bind_addr, Duration::from_secs(30), log.new(logging::o!())) {
        Ok(endpoint) => endpoint,
        Err(err) => {
            warn!(log, "failed binding endpoint"; "addr" => %bind_addr, "error" => %err);
            return EXIT_FATAL_INIT;
        }
    };
    endpoint.register_init_handler(Box::new(AcceptAllInit { limiter }));

    let mut last_beacon = Instant::now() - PUBLISH_INTERVAL;

    info!(log, "zone server listening"; "addr" => %bind_addr);

    loop {
        let now = Instant::now();

        for action in signal_flags.drain() {
            match action {
                signals::Action::Quit => {
                    info!(log, "quit requested by signal");
                    return EXIT_SHUTDOWN;
                }
                signals::Action::ReopenLog => {
                    info!(log, "reopening log file on SIGHUP");
                    reopen_handle.reopen();
                }
                signals::Action::PersistSave => {
                    info!(log, "persist save requested");
                    for id in players.ids() {
                        persist.save_global(id);
                    }
                }
                signals::Action::BroadcastMessageFile => {
                    if let Some(message) = signals::take_message_file(&PathBuf::from("."), &log) {
                        info!(log, "broadcasting message"; "message" => %message);
                        let mut bytes = Vec::new();
                        let _ = ArenaMessage { text: &message }.write(&mut bytes);
                        for conn_id in endpoint.connection_ids() {
                            if let Some(conn) = endpoint.connection_mut(conn_id) {
                                conn.queue_reliable(bytes.clone(), now);
                            }
                        }
                    }
                }
            }
        }

        let (changes, deliveries) = match endpoint.poll_once(now, Duration::from_millis(100)) {
            Ok(result) => result,
            Err(err) => {
                warn!(log, "endpoint poll failed"; "error" => %err);
                continue;
            }
        };

        for change in changes {
            match change {
                ConnectionChange::Connected(_id, addr) => {
                    let player = players.allocate(format!("unnamed@{}", addr), 0, ClientKind::LegacyClient, addr, now);
                    lifecycle::begin_auth(&players, player);
                    debug!(log, "connection accepted"; "addr" => %addr, "player" => player);
                }
                ConnectionChange::Disconnected(_id, addr) => {
                    debug!(log, "connection lost"; "addr" => %addr);
                    lag_collector.remove(0);
                }
            }
        }

        for (id, payload) in deliveries {
            handle_application_payload(&log, &mut endpoint, &players, &auth_chain, &completions, &mut security, id, &payload, now);
        }

        for destroyed in arena::advance_arena_engine(&arenas, now) {
            debug!(log, "arena destroyed"; "arena" => destroyed);
        }

        let transitions = lifecycle.scan(&players, &arenas, &completions);
        for t in &transitions {
            if t.to == zonecore::player::PlayerState::LoggedIn {
                if let Some(name) = place_player(None, &public_arena_names, &arenas, &placement_config) {
                    let arena = arenas.find_by_name(&name, |a| a.id()).unwrap_or_else(|| arenas.create(&name, None));
                    lifecycle::request_arena(&players, t.player, arena);
                }
            }
            if t.to == zonecore::player::PlayerState::LoggedIn || t.to == zonecore::player::PlayerState::Connected {
                lifecycle::advance_into_arena_sync(&players, &arenas, t.player);
            }
        }

        let arena_ids = arenas.ids();
        for (arena, challenge) in security.rotate_if_due(&arena_ids, now, &mut rng) {
            debug!(log, "rotating seeds"; "arena" => arena, "timestamp" => challenge.timestamp);

            let mut bytes = Vec::new();
            let _ = challenge.write(&mut bytes);
            let mut challenged = Vec::new();
            players.with_all(|all| {
                for player in all.values() {
                    if player.arena != Some(arena) {
                        continue;
                    }
                    if let Some(conn_id) = endpoint.connection_id_for_addr(&player.remote_addr) {
                        if let Some(conn) = endpoint.connection_mut(conn_id) {
                            conn.queue_reliable(bytes.clone(), now);
                            challenged.push(player.id());
                        }
                    }
                }
            });
            for player in challenged {
                security.mark_challenged(player, now);
            }
        }

        for player in security.overdue(now) {
            debug!(log, "kicking player for overdue security response"; "player" => player);
            lifecycle::kick_player(&players, player);
        }

        for player in lag_action.due(&players.ids(), now) {
            if let Some(stats) = lag_collector.stats(player) {
                let verdict = lag_action.evaluate(stats, now);
                if verdict.force_spectator {
                    debug!(log, "forcing spectator for lag"; "player" => player);
                }
            }
            lag_action.mark_checked(player, now);
        }

        endpoint.retry_reliable_sends(now);

        if let Err(err) = endpoint.flush_outbound(now) {
            warn!(log, "flush failed"; "error" => %err);
        }

        if now.saturating_duration_since(last_beacon) >= PUBLISH_INTERVAL {
            last_beacon = now;
            let beacon = Beacon {
                port: bind_addr.port(),
                players: players.len() as u16,
                scorekeeping: true,
                name: "zone".to_string(),
                password: String::new(),
                description: String::new(),
            };
            debug!(log, "directory beacon ready"; "bytes" => beacon.to_bytes().len());
        }
    }
}

/// Expected checksums for `validate_response` (spec.md §4.7 "Response
/// validation"). Real map/executable checksumming is an external Non-goal
/// (spec.md §1), and `LoginResponse` itself always advertises zero for
/// these, so zero is also what a conforming client's response carries.
const EXPECTED_MAP_CHECKSUM: u32 = 0;
const EXPECTED_SETTINGS_CHECKSUM: u32 = 0;
const EXPECTED_EXE_CHECKSUM: u32 = 0;

/// Handles one delivered application payload: the login packet and the
/// security response. Every other application-layer packet (position,
/// chat, ...) belongs to a gameplay module external to this core (spec.md
/// §1 Non-goals).
#[allow(clippy::too_many_arguments)]
fn handle_application_payload(
    log: &logging::Logger,
    endpoint: &mut Endpoint,
    players: &PlayerStore,
    auth_chain: &Arc<dyn Authenticate>,
    completions: &Completions,
    security: &mut SecurityManager,
    connection: ConnectionId,
    payload: &[u8],
    now: Instant,
) {
    match payload.first() {
        Some(&0x01) | Some(&0x24) => handle_login(log, endpoint, players, auth_chain, completions, connection, payload, now),
        Some(&0x1A) => handle_security_response(log, endpoint, players, security, connection, payload, now),
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_login(
    log: &logging::Logger,
    endpoint: &mut Endpoint,
    players: &PlayerStore,
    auth_chain: &Arc<dyn Authenticate>,
    completions: &Completions,
    connection: ConnectionId,
    payload: &[u8],
    now: Instant,
) {
    let login = match LoginPacket::parse(payload) {
        Ok(login) => login,
        Err(_) => return,
    };
    let remote_addr = match endpoint.connection(connection) {
        Some(c) => c.remote_addr,
        None => return,
    };

    // The player record for this physical connection was already allocated
    // at `ConnectionChange::Connected` time, under a placeholder name.
    let player = match players.find_by_addr(&remote_addr, |p| p.id()) {
        Some(id) => id,
        None => return,
    };

    let outcome = auth_chain.authenticate(&LoginRequest {
        name: login.name.clone(),
        squad: String::new(),
        machine_id: login.machine_id,
        password: login.password.clone(),
    });

    // A different, already-active player under the same name is a
    // re-login collision (spec.md §4.5 "Re-login"): the old connection is
    // kicked towards leaving while this one waits for it to clear.
    if let AuthOutcome::Accept { ref name, .. } = outcome {
        if let Some(existing) = players.find_by_name(name, |p| p.id()) {
            if existing != player {
                lifecycle::begin_replacement(players, existing, player);
            }
        }
        players.with_player_mut(player, |p| {
            p.name = name.clone();
            p.machine_id = login.machine_id;
        });
    }

    let response = match &outcome {
        AuthOutcome::Accept { .. } => {
            debug!(log, "login accepted"; "player" => player, "name" => %login.name);
            LoginResponse { code: LoginResponseCode::Ok, server_version: 1, map_checksum: 0, code_checksum: 0, news_checksum: 0, custom_text: None }
        }
        AuthOutcome::Reject { code, custom_text } => {
            debug!(log, "login rejected"; "player" => player, "code" => ?code);
            LoginResponse { code: *code, server_version: 1, map_checksum: 0, code_checksum: 0, news_checksum: 0, custom_text: custom_text.clone() }
        }
    };

    let mut bytes = Vec::new();
    let _ = response.write(&mut bytes);
    if let Some(conn) = endpoint.connection_mut(connection) {
        conn.queue_reliable(bytes, now);
    }

    completions.complete_auth(player, outcome);
}

/// Validates a security response (spec.md §4.7 rules 4-5): clears the
/// player's pending challenge and kicks on a checksum mismatch.
fn handle_security_response(
    log: &logging::Logger,
    endpoint: &Endpoint,
    players: &PlayerStore,
    security: &mut SecurityManager,
    connection: ConnectionId,
    payload: &[u8],
) {
    let response = match SecurityResponse::parse(payload) {
        Ok(response) => response,
        Err(_) => return,
    };
    let remote_addr = match endpoint.connection(connection) {
        Some(c) => c.remote_addr,
        None => return,
    };
    let player = match players.find_by_addr(&remote_addr, |p| p.id()) {
        Some(id) => id,
        None => return,
    };

    security.mark_responded(player);

    if let Err(failure) = validate_response(&response, EXPECTED_MAP_CHECKSUM, EXPECTED_SETTINGS_CHECKSUM, EXPECTED_EXE_CHECKSUM) {
        flux::malicious!(log, "security response failed validation"; "player" => player, "failure" => ?failure);
        lifecycle::kick_player(players, player);
    }
}
