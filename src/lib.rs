//! droid-fleet - device-fleet manager for Android test harnesses
//!
//! Discovers devices attached to a host, tracks their lifecycle, hands
//! them out to test jobs, and recovers them when they stop responding.

pub mod commands;

// Re-export crates
pub use droid_fleet_bridge as bridge;
pub use droid_fleet_core as core;
pub use droid_fleet_manager as manager;

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "droid-fleet";
