//! Per-connection AIMD bandwidth limiter (spec.md §4.4).

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    UnrelLow = 0,
    UnrelNormal = 1,
    UnrelHigh = 2,
    Reliable = 3,
    Ack = 4,
}

const PRIORITY_COUNT: usize = 5;
const SLICE_HZ: f64 = 8.0;

#[derive(Debug, Clone, Copy)]
pub struct LimiterConfig {
    /// Percentage weight per priority, summing to 100 (default 20/40/20/15/5).
    pub weights: [u32; PRIORITY_COUNT],
    pub limit_low: f64,
    pub limit_high: f64,
    pub initial_limit: f64,
    pub max_burst: f64,
    /// AIMD scale constant `S`.
    pub s: f64,
    pub use_hit_limit: bool,
    pub max_packet: f64,
    pub client_can_buffer: u32,
}

impl Default for LimiterConfig {
    fn default() -> LimiterConfig {
        LimiterConfig {
            weights: [20, 40, 20, 15, 5],
            limit_low: 2000.0,
            limit_high: 60000.0,
            initial_limit: 5000.0,
            max_burst: 4096.0,
            s: 1024.0,
            use_hit_limit: false,
            max_packet: 512.0,
            client_can_buffer: 60,
        }
    }
}

/// Per-connection token-bucket bandwidth limiter with AIMD adjustment.
pub struct Limiter {
    config: LimiterConfig,
    tokens: [f64; PRIORITY_COUNT],
    limit: f64,
    last_slice_at: Instant,
    hit_limit: bool,
}

impl Limiter {
    pub fn new(config: LimiterConfig, now: Instant) -> Limiter {
        let limit = config.initial_limit;
        Limiter {
            config,
            tokens: [0.0; PRIORITY_COUNT],
            limit,
            last_slice_at: now,
            hit_limit: false,
        }
    }

    pub fn limit(&self) -> f64 {
        self.limit
    }

    pub fn hit_limit(&self) -> bool {
        self.hit_limit
    }

    /// Advances the token buckets by the whole number of 1/8-second slices
    /// elapsed since the last call (spec.md §4.4 "Iteration").
    pub fn iter(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_slice_at).as_secs_f64();
        let slices = (elapsed * SLICE_HZ).floor();
        if slices < 1.0 {
            return;
        }

        for (p, weight) in self.config.weights.iter().enumerate() {
            let gain = slices * self.limit * (*weight as f64) / 100.0 / SLICE_HZ;
            self.tokens[p] = (self.tokens[p] + gain).min(self.config.max_burst);
        }

        self.last_slice_at += Duration::from_secs_f64(slices / SLICE_HZ);
    }

    /// Attempts to admit `bytes` at `priority`, borrowing from successively
    /// lower-priority buckets on shortfall (spec.md §4.4 "Admission"). No
    /// partial consumption: on exhaustion every tentative debit is rolled
    /// back and `hit_limit` is set.
    pub fn check(&mut self, bytes: f64, priority: Priority) -> bool {
        let mut remaining = bytes;
        let mut debits = [0.0f64; PRIORITY_COUNT];

        let mut p = priority as i32;
        while p >= 0 && remaining > 0.0 {
            let idx = p as usize;
            let take = remaining.min(self.tokens[idx]);
            debits[idx] = take;
            remaining -= take;
            p -= 1;
        }

        if remaining > 0.0 {
            self.hit_limit = true;
            return false;
        }

        for (idx, debit) in debits.iter().enumerate() {
            self.tokens[idx] -= debit;
        }
        true
    }

    /// Additive-increase step on a received ACK (spec.md §4.4 "Adjustment").
    pub fn on_ack(&mut self) {
        let mut increment = self.config.s * self.config.s / self.limit;
        if self.config.use_hit_limit && self.hit_limit {
            increment *= 4.0;
            self.hit_limit = false;
        }
        self.limit = (self.limit + increment).clamp(self.config.limit_low, self.config.limit_high);
    }

    /// Multiplicative-decrease step on a reliable-packet retry.
    pub fn on_retry(&mut self) {
        let s2 = self.config.s * self.config.s;
        let discriminant = (self.limit * self.limit - 4.0 * s2).max(0.0);
        self.limit = ((self.limit + discriminant.sqrt()) / 2.0).clamp(self.config.limit_low, self.config.limit_high);
    }

    /// Gates how deep the reliable send window may grow.
    pub fn can_buffer_packets(&self) -> u32 {
        let raw = self.limit / self.config.max_packet;
        (raw as u32).clamp(1, self.config.client_can_buffer)
    }
}
