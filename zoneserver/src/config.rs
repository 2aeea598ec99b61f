//! The bootstrap config the CLI surface loads before anything else exists:
//! where to find the module config and zone config, and the bandwidth
//! defaults handed to every new connection's limiter. Grounded on
//! `game::core::config::GameConfig::load`.

use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use zonecore::transport::limiter::LimiterConfig;

#[derive(Debug, Deserialize, Serialize)]
pub struct ZoneServerConfig {
    pub bind_address: String,
    pub module_config_path: PathBuf,
    pub zone_config_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub bandwidth: BandwidthDefaults,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct BandwidthDefaults {
    pub limit_low: f64,
    pub limit_high: f64,
    pub initial_limit: f64,
}

impl Default for ZoneServerConfig {
    fn default() -> ZoneServerConfig {
        ZoneServerConfig {
            bind_address: "0.0.0.0:5000".to_string(),
            module_config_path: PathBuf::from("modules.toml"),
            zone_config_path: PathBuf::from("zone.toml"),
            log_dir: None,
            bandwidth: BandwidthDefaults::default(),
        }
    }
}

impl Default for BandwidthDefaults {
    fn default() -> BandwidthDefaults {
        let limiter = LimiterConfig::default();
        BandwidthDefaults {
            limit_low: limiter.limit_low,
            limit_high: limiter.limit_high,
            initial_limit: limiter.initial_limit,
        }
    }
}

impl ZoneServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<ZoneServerConfig, serdeconv::Error> {
        serdeconv::from_toml_file(path)
    }

    pub fn limiter_config(&self) -> LimiterConfig {
        let mut limiter = LimiterConfig::default();
        limiter.limit_low = self.bandwidth.limit_low;
        limiter.limit_high = self.bandwidth.limit_high;
        limiter.initial_limit = self.bandwidth.initial_limit;
        limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bandwidth_matches_limiter_default() {
        let config = ZoneServerConfig::default();
        let limiter = LimiterConfig::default();
        assert_eq!(config.bandwidth.limit_low, limiter.limit_low);
        assert_eq!(config.bandwidth.limit_high, limiter.limit_high);
    }
}
