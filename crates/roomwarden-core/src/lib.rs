//! Roomwarden Core — registry, data model, configuration, and event bus.
//!
//! This crate contains:
//! - **ids**: strongly-typed external snowflake ids
//! - **types**: registry records (rooms, temp channels, countdowns, recalls, extensions)
//! - **registry**: the durable record store with batched, atomic commits
//! - **clock**: injectable wall clock
//! - **bus**: occupancy event bus feeding the trigger handler
//! - **config**: schema, loading, env overrides

pub mod bus;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod registry;
pub mod types;
pub mod utils;

pub use clock::{date_at_offset, Clock, ManualClock, SystemClock};
pub use error::RegistryError;
pub use ids::{ChannelId, GuildId, MessageId, UserId};
pub use registry::{Changeset, Mutation, Registry, RegistryState};
