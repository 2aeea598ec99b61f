//! Seed sync (spec.md §4.7): periodic green/door seed rotation, challenge
//! dispatch, and response validation. The seed-minting RNG usage is
//! grounded on `authenticator::core::Authenticator::create_token`'s use of
//! `flux::crypto::random_bytes`, generalized to the `rand` crate since the
//! teacher's `crypto` module was AEAD-token-specific and not reusable here.

use crate::arena::ArenaId;
use crate::player::PlayerId;
use crate::transport::wire::{SecurityChallenge, SecurityResponse};
use flux::time::timestamp_ticks;
use hashbrown::{HashMap, HashSet};
use rand::RngCore;
use std::time::{Duration, Instant};

/// The current seed state for one arena.
#[derive(Debug, Clone, Copy)]
pub struct SeedInfo {
    pub green_seed: u32,
    pub door_seed: u32,
    pub timestamp: u32,
    pub key: u32,
}

/// A per-arena override installed via `OverrideArenaSeedInfo` (spec.md
/// §4.7 "Seed override"). While active, the arena is excluded from the
/// periodic challenge.
#[derive(Debug, Clone, Copy)]
pub struct SeedOverride {
    pub green_seed: u32,
    pub door_seed: u32,
    pub timestamp: u32,
}

pub struct SecurityManager {
    current: HashMap<ArenaId, SeedInfo>,
    overrides: HashMap<ArenaId, SeedOverride>,
    /// Players sent a challenge and awaiting a response, with the deadline
    /// after which they are kicked (spec.md §4.7 rule 4).
    pending: HashMap<PlayerId, Instant>,
    suppressed: HashSet<PlayerId>,
    last_rotation: Option<Instant>,
}

pub const ROTATION_PERIOD: Duration = Duration::from_secs(60);
pub const RESPONSE_DEADLINE: Duration = Duration::from_secs(15);

impl SecurityManager {
    pub fn new() -> SecurityManager {
        SecurityManager {
            current: HashMap::new(),
            overrides: HashMap::new(),
            pending: HashMap::new(),
            suppressed: HashSet::new(),
            last_rotation: None,
        }
    }

    /// Sets whether `player` may suppress the kick-for-no-response rule
    /// (spec.md §4.7 "per-player suppress capability").
    pub fn set_suppress_kickoff(&mut self, player: PlayerId, suppressed: bool) {
        if suppressed {
            self.suppressed.insert(player);
        } else {
            self.suppressed.remove(&player);
        }
    }

    pub fn override_arena_seed_info(&mut self, arena: ArenaId, green: u32, door: u32, timestamp: u32) {
        self.overrides.insert(arena, SeedOverride { green_seed: green, door_seed: door, timestamp });
    }

    pub fn remove_arena_override(&mut self, arena: ArenaId) {
        self.overrides.remove(&arena);
    }

    /// The seeds a newly entering player (or a reconnecting arena) should
    /// see right now: the override if one is active, otherwise the current
    /// rotation (spec.md §4.7 "Arena entry always sends the current
    /// seeds").
    pub fn current_seeds(&self, arena: ArenaId) -> Option<SecurityChallenge> {
        if let Some(ov) = self.overrides.get(&arena) {
            return Some(SecurityChallenge { green_seed: ov.green_seed, door_seed: ov.door_seed, timestamp: ov.timestamp, key: 0 });
        }
        self.current.get(&arena).map(|s| SecurityChallenge { green_seed: s.green_seed, door_seed: s.door_seed, timestamp: s.timestamp, key: s.key })
    }

    /// Runs one rotation if `ROTATION_PERIOD` has elapsed since the last
    /// one. Returns the list of `(arena, challenge)` pairs to send reliably
    /// to every eligible player in that arena (spec.md §4.7 rules 1-3); the
    /// caller is responsible for the per-player eligibility filter
    /// ("does not have an override and has sent a position packet").
    pub fn rotate_if_due(&mut self, arenas: &[ArenaId], now: Instant, rng: &mut dyn RngCore) -> Vec<(ArenaId, SecurityChallenge)> {
        if let Some(last) = self.last_rotation {
            if now.saturating_duration_since(last) < ROTATION_PERIOD {
                return Vec::new();
            }
        }
        self.last_rotation = Some(now);

        let mut challenges = Vec::new();
        let timestamp = timestamp_ticks();

        for &arena in arenas {
            if self.overrides.contains_key(&arena) {
                continue;
            }
            let info = SeedInfo {
                green_seed: rng.next_u32(),
                door_seed: rng.next_u32(),
                timestamp,
                key: rng.next_u32(),
            };
            self.current.insert(arena, info);
            challenges.push((
                arena,
                SecurityChallenge { green_seed: info.green_seed, door_seed: info.door_seed, timestamp: info.timestamp, key: info.key },
            ));
        }

        challenges
    }

    /// Marks a player as having been sent a challenge, starting the
    /// response deadline.
    pub fn mark_challenged(&mut self, player: PlayerId, now: Instant) {
        self.pending.insert(player, now + RESPONSE_DEADLINE);
    }

    pub fn mark_responded(&mut self, player: PlayerId) {
        self.pending.remove(&player);
    }

    /// Players whose response deadline has passed and who haven't
    /// suppressed the kick (spec.md §4.7 rule 4).
    pub fn overdue(&self, now: Instant) -> Vec<PlayerId> {
        self.pending
            .iter()
            .filter(|(player, deadline)| **deadline <= now && !self.suppressed.contains(player))
            .map(|(player, _)| *player)
            .collect()
    }
}

impl Default for SecurityManager {
    fn default() -> SecurityManager {
        SecurityManager::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    MapChecksumMismatch,
    SettingsChecksumMismatch,
    ExeChecksumMismatch,
}

/// Validates a security response against the server's expectations for
/// this player (spec.md §4.7 "Response validation"). Mismatches are the
/// caller's responsibility to log at `Malicious` and act on per
/// `SecurityKickoff`.
pub fn validate_response(
    response: &SecurityResponse,
    expected_map_checksum: u32,
    expected_settings_checksum: u32,
    expected_exe_checksum: u32,
) -> Result<(), ValidationFailure> {
    if response.map_checksum != expected_map_checksum {
        return Err(ValidationFailure::MapChecksumMismatch);
    }
    if response.settings_checksum != expected_settings_checksum {
        return Err(ValidationFailure::SettingsChecksumMismatch);
    }
    if response.exe_checksum != expected_exe_checksum {
        return Err(ValidationFailure::ExeChecksumMismatch);
    }
    Ok(())
}
