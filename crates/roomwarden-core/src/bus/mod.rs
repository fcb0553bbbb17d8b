//! Occupancy event bus — voice-state changes flowing from the platform
//! listener to the trigger handler.

pub mod queue;
pub mod types;

pub use queue::EventBus;
pub use types::OccupancyEvent;
