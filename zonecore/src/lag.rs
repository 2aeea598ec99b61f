//! Lag collector and lag action (spec.md §4.9).

use crate::player::PlayerId;
use hashbrown::HashMap;
use std::time::{Duration, Instant};

/// EWMA smoothing factor alpha = 1/8.
const EWMA_ALPHA: f64 = 1.0 / 8.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct Histogram {
    pub current: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    samples: u32,
}

impl Histogram {
    pub fn record(&mut self, value: f64) {
        self.current = value;
        if self.samples == 0 {
            self.average = value;
            self.min = value;
            self.max = value;
        } else {
            self.average = self.average + EWMA_ALPHA * (value - self.average);
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.samples += 1;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlayerLagStats {
    pub position_ping: Histogram,
    pub reliable_rtt: Histogram,
    pub client_ping: Histogram,
    pub time_sync_drift: Histogram,
    pub packetloss_s2c: f64,
    pub packetloss_c2s: f64,
    pub weaponloss: f64,
    pub last_packet_at: Option<Instant>,
}

/// Thread-safe-by-construction (callers hold their own lock); records the
/// four sample kinds described in spec.md §4.9.
#[derive(Default)]
pub struct LagCollector {
    stats: HashMap<PlayerId, PlayerLagStats>,
}

impl LagCollector {
    pub fn new() -> LagCollector {
        LagCollector::default()
    }

    pub fn record_position_ping(&mut self, player: PlayerId, one_way_ms: f64, now: Instant) {
        let entry = self.stats.entry(player).or_default();
        entry.position_ping.record(one_way_ms * 2.0);
        entry.last_packet_at = Some(now);
    }

    pub fn record_reliable_rtt(&mut self, player: PlayerId, rtt_ms: f64) {
        self.stats.entry(player).or_default().reliable_rtt.record(rtt_ms);
    }

    pub fn record_client_ping(&mut self, player: PlayerId, ping_ms: f64) {
        self.stats.entry(player).or_default().client_ping.record(ping_ms);
    }

    pub fn record_time_sync_drift(&mut self, player: PlayerId, drift_ms: f64, packetloss_s2c: f64, packetloss_c2s: f64) {
        let entry = self.stats.entry(player).or_default();
        entry.time_sync_drift.record(drift_ms);
        entry.packetloss_s2c = packetloss_s2c;
        entry.packetloss_c2s = packetloss_c2s;
    }

    pub fn stats(&self, player: PlayerId) -> Option<&PlayerLagStats> {
        self.stats.get(&player)
    }

    pub fn remove(&mut self, player: PlayerId) {
        self.stats.remove(&player);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LagActionConfig {
    pub check_interval: Duration,
    pub spike_to_spec: Duration,
    pub ping_to_spec: f64,
    pub packetloss_to_spec: f64,
    pub no_flags_balls_ping: f64,
    pub start_ignoring_ping: f64,
    pub ignore_all_ping: f64,
    pub start_ignoring_loss: f64,
    pub ignore_all_loss: f64,
}

impl Default for LagActionConfig {
    fn default() -> LagActionConfig {
        LagActionConfig {
            check_interval: Duration::from_secs(3),
            spike_to_spec: Duration::from_secs(6),
            ping_to_spec: 500.0,
            packetloss_to_spec: 0.3,
            no_flags_balls_ping: 300.0,
            start_ignoring_ping: 200.0,
            ignore_all_ping: 600.0,
            start_ignoring_loss: 0.1,
            ignore_all_loss: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagVerdict {
    pub force_spectator: bool,
    pub no_flags_balls: bool,
    pub ignore_weapons_ratio: f64,
}

fn ramp(value: f64, start: f64, end: f64) -> f64 {
    if end <= start {
        return if value >= end { 1.0 } else { 0.0 };
    }
    ((value - start) / (end - start)).clamp(0.0, 1.0)
}

/// Round-robins through currently-playing players; each candidate's
/// verdict is computed from the collector and applied by the caller on the
/// mainloop thread (spec.md §4.9 "Lag-action").
pub struct LagAction {
    config: LagActionConfig,
    last_checked: HashMap<PlayerId, Instant>,
}

impl LagAction {
    pub fn new(config: LagActionConfig) -> LagAction {
        LagAction { config, last_checked: HashMap::new() }
    }

    /// Players eligible for a check right now (not checked within
    /// `CheckInterval`).
    pub fn due(&self, candidates: &[PlayerId], now: Instant) -> Vec<PlayerId> {
        candidates
            .iter()
            .copied()
            .filter(|p| {
                self.last_checked
                    .get(p)
                    .map(|last| now.saturating_duration_since(*last) >= self.config.check_interval)
                    .unwrap_or(true)
            })
            .collect()
    }

    pub fn mark_checked(&mut self, player: PlayerId, now: Instant) {
        self.last_checked.insert(player, now);
    }

    pub fn evaluate(&self, stats: &PlayerLagStats, now: Instant) -> LagVerdict {
        let idle = stats.last_packet_at.map(|t| now.saturating_duration_since(t)).unwrap_or(Duration::ZERO);

        if idle > self.config.spike_to_spec {
            return LagVerdict { force_spectator: true, no_flags_balls: true, ignore_weapons_ratio: 1.0 };
        }

        let avg_ping = stats.client_ping.average.max(stats.reliable_rtt.average);
        if avg_ping > self.config.ping_to_spec || stats.packetloss_s2c > self.config.packetloss_to_spec {
            return LagVerdict { force_spectator: true, no_flags_balls: true, ignore_weapons_ratio: 1.0 };
        }

        let no_flags_balls = avg_ping > self.config.no_flags_balls_ping;

        let ignore_weapons_ratio = ramp(avg_ping, self.config.start_ignoring_ping, self.config.ignore_all_ping)
            .max(ramp(stats.packetloss_s2c, self.config.start_ignoring_loss, self.config.ignore_all_loss))
            .max(ramp(stats.weaponloss, self.config.start_ignoring_loss, self.config.ignore_all_loss));

        LagVerdict { force_spectator: false, no_flags_balls, ignore_weapons_ratio }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_tracks_min_max_and_ewma() {
        let mut h = Histogram::default();
        h.record(100.0);
        h.record(200.0);
        assert_eq!(h.min, 100.0);
        assert_eq!(h.max, 200.0);
        assert_eq!(h.current, 200.0);
        assert!((h.average - 112.5).abs() < 1e-9);
    }

    #[test]
    fn due_skips_recently_checked_players() {
        let mut action = LagAction::new(LagActionConfig::default());
        let now = Instant::now();
        action.mark_checked(1, now);

        assert_eq!(action.due(&[1, 2], now), vec![2]);
        assert_eq!(action.due(&[1, 2], now + Duration::from_secs(4)), vec![1, 2]);
    }

    #[test]
    fn stale_connection_forces_spectator() {
        let action = LagAction::new(LagActionConfig::default());
        let now = Instant::now();
        let mut stats = PlayerLagStats::default();
        stats.last_packet_at = Some(now - Duration::from_secs(10));

        let verdict = action.evaluate(&stats, now);
        assert!(verdict.force_spectator);
    }

    #[test]
    fn high_ping_forces_spectator_even_with_recent_packet() {
        let action = LagAction::new(LagActionConfig::default());
        let now = Instant::now();
        let mut stats = PlayerLagStats::default();
        stats.last_packet_at = Some(now);
        stats.client_ping.record(1000.0);

        let verdict = action.evaluate(&stats, now);
        assert!(verdict.force_spectator);
    }

    #[test]
    fn moderate_ping_sets_no_flags_balls_without_spectating() {
        let action = LagAction::new(LagActionConfig::default());
        let now = Instant::now();
        let mut stats = PlayerLagStats::default();
        stats.last_packet_at = Some(now);
        stats.client_ping.record(350.0);

        let verdict = action.evaluate(&stats, now);
        assert!(!verdict.force_spectator);
        assert!(verdict.no_flags_balls);
        assert!(verdict.ignore_weapons_ratio > 0.0 && verdict.ignore_weapons_ratio < 1.0);
    }

    #[test]
    fn low_ping_is_clean() {
        let action = LagAction::new(LagActionConfig::default());
        let now = Instant::now();
        let mut stats = PlayerLagStats::default();
        stats.last_packet_at = Some(now);
        stats.client_ping.record(50.0);

        let verdict = action.evaluate(&stats, now);
        assert!(!verdict.force_spectator);
        assert!(!verdict.no_flags_balls);
        assert_eq!(verdict.ignore_weapons_ratio, 0.0);
    }
}
