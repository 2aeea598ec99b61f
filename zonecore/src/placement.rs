//! Arena placement algorithm (spec.md §4.8): decides which arena a
//! connecting player should land in.

use crate::arena::ArenaStore;
use crate::config::ConfigHandle;

const MAX_PASSES: u32 = 10;
const MAX_ARENA_NAME_LEN: usize = 16;
const DEFAULT_DESIRED_PLAYING: i64 = 15;

/// Resolves the arena name a connecting player should be placed into.
/// `connect_as` is the `ConnectAs` label on the listen endpoint the player
/// connected through, if any; `public_names` is the configured global list
/// of public base names (spec.md §4.8 step 1).
pub fn place_player(connect_as: Option<&str>, public_names: &[String], arenas: &ArenaStore, config: &dyn ConfigHandle) -> Option<String> {
    let owned;
    let candidates: &[String] = match connect_as {
        Some(name) => {
            owned = vec![name.to_string()];
            &owned
        }
        None => public_names,
    };

    let mut fallback: Option<String> = None;

    for pass in 0..MAX_PASSES {
        for base in candidates {
            let candidate = if pass == 0 { base.clone() } else { format!("{}{}", base, pass) };

            if candidate.len() > MAX_ARENA_NAME_LEN {
                continue;
            }

            match arenas.find_by_name(&candidate, |arena| arena.specific_player_count) {
                None => {
                    if fallback.is_none() {
                        fallback = Some(candidate);
                    }
                }
                Some(playing) => {
                    let desired = config.get_int("General", "DesiredPlaying", DEFAULT_DESIRED_PLAYING);
                    if (playing as i64) < desired {
                        return Some(candidate);
                    }
                }
            }
        }
    }

    fallback
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfigHandle;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn prefers_arena_under_desired_playing() {
        let arenas = ArenaStore::new();
        let foo = arenas.create("foo", None);
        arenas.with_arena_mut(foo, |a| a.specific_player_count = 2).unwrap();
        let bar = arenas.create("bar", None);
        arenas.with_arena_mut(bar, |a| a.specific_player_count = 1).unwrap();

        let mut config = MapConfigHandle::new();
        config.set("General", "DesiredPlaying", "2");

        let placed = place_player(None, &names(&["foo", "bar"]), &arenas, &config);
        assert_eq!(placed.as_deref(), Some("bar"));
    }

    #[test]
    fn falls_back_to_first_seen_nonexistent_arena() {
        let arenas = ArenaStore::new();
        let foo = arenas.create("foo", None);
        arenas.with_arena_mut(foo, |a| a.specific_player_count = 10).unwrap();

        let mut config = MapConfigHandle::new();
        config.set("General", "DesiredPlaying", "2");

        let placed = place_player(None, &names(&["foo"]), &arenas, &config);
        assert_eq!(placed.as_deref(), Some("foo1"));
    }

    #[test]
    fn connect_as_restricts_candidates_to_a_single_family() {
        let arenas = ArenaStore::new();
        let config = MapConfigHandle::new();

        let placed = place_player(Some("pub100"), &names(&["foo", "bar"]), &arenas, &config);
        assert_eq!(placed.as_deref(), Some("pub100"));
    }

    #[test]
    fn placement_is_idempotent_for_a_stable_population() {
        let arenas = ArenaStore::new();
        let foo = arenas.create("foo", None);
        arenas.with_arena_mut(foo, |a| a.specific_player_count = 20).unwrap();

        let mut config = MapConfigHandle::new();
        config.set("General", "DesiredPlaying", "2");

        let first = place_player(None, &names(&["foo"]), &arenas, &config);
        let second = place_player(None, &names(&["foo"]), &arenas, &config);
        assert_eq!(first, second);
    }
}
