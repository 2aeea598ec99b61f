#![allow(clippy::new_without_default)]

pub mod logging;
pub mod time;
pub mod util;

/// Re-exported so downstream crates don't each need a direct `slog` dependency
/// just to build child loggers.
pub use slog;
