//! Config lookup abstraction (spec.md §4.3) plus the on-disk server config,
//! the latter grounded on `game::core::config::GameConfig`.

use hashbrown::HashMap;
use serde_derive::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Read-only key/value lookup over a section-keyed config source, with
/// fallback to a parent handle (spec.md §4.3: arena config falls back to
/// the zone-wide default when a key is unset for that arena).
pub trait ConfigHandle: Send + Sync {
    fn get_str(&self, section: &str, key: &str) -> Option<&str>;

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get_str(section, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        match self.get_str(section, key) {
            Some("1") | Some("true") | Some("yes") => true,
            Some("0") | Some("false") | Some("no") => false,
            _ => default,
        }
    }
}

/// An in-memory `ConfigHandle`, keyed by `(section, key)`. Used directly by
/// tests, and as the building block for the arena `.conf` overlay described
/// in spec.md §4.3 ("arena config is the zone default overlaid with
/// per-arena keys").
#[derive(Default)]
pub struct MapConfigHandle {
    entries: HashMap<(String, String), String>,
    fallback: Option<Box<dyn ConfigHandle>>,
}

impl MapConfigHandle {
    pub fn new() -> MapConfigHandle {
        MapConfigHandle {
            entries: HashMap::new(),
            fallback: None,
        }
    }

    pub fn with_fallback(fallback: Box<dyn ConfigHandle>) -> MapConfigHandle {
        MapConfigHandle {
            entries: HashMap::new(),
            fallback: Some(fallback),
        }
    }

    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        self.entries.insert((section.to_string(), key.to_string()), value.into());
    }
}

impl ConfigHandle for MapConfigHandle {
    fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        if let Some(v) = self.entries.get(&(section.to_string(), key.to_string())) {
            return Some(v.as_str());
        }
        self.fallback.as_ref().and_then(|f| f.get_str(section, key))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ZoneConfig {
    pub server: Server,
    pub zone: Zone,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Server {
    pub bind_address: SocketAddr,
    pub directory_server: Option<SocketAddr>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Zone {
    pub name: String,
    pub max_players: u32,
}

impl Default for ZoneConfig {
    fn default() -> ZoneConfig {
        ZoneConfig {
            server: Server {
                bind_address: "0.0.0.0:5000".parse().unwrap(),
                directory_server: None,
            },
            zone: Zone {
                name: "Unnamed Zone".to_string(),
                max_players: 512,
            },
        }
    }
}

impl ZoneConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<ZoneConfig, serdeconv::Error> {
        serdeconv::from_toml_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_entry_wins_over_fallback() {
        let mut parent = MapConfigHandle::new();
        parent.set("general", "fps", "100");

        let mut child = MapConfigHandle::with_fallback(Box::new(parent));
        child.set("general", "fps", "60");

        assert_eq!(child.get_int("general", "fps", -1), 60);
    }

    #[test]
    fn missing_key_falls_back_to_parent() {
        let mut parent = MapConfigHandle::new();
        parent.set("general", "fps", "100");

        let child = MapConfigHandle::with_fallback(Box::new(parent));

        assert_eq!(child.get_int("general", "fps", -1), 100);
    }

    #[test]
    fn missing_key_with_no_fallback_uses_default() {
        let handle = MapConfigHandle::new();
        assert_eq!(handle.get_int("general", "fps", 42), 42);
        assert!(!handle.get_bool("general", "enabled", false));
    }
}
