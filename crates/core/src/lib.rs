//! droid-fleet core
//!
//! Shared error, configuration, and event types used across the fleet
//! manager crates.

pub mod config;
pub mod error;
pub mod events;

pub use config::FleetConfig;
pub use error::{FleetError, Result};
pub use events::{EventBus, EventSubscription, FleetEvent};
