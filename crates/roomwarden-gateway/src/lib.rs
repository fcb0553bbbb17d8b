//! Roomwarden Gateway — the chat platform as seen by the reconciler.
//!
//! This crate provides:
//! - **base**: the `Gateway` trait and the platform objects it resolves
//! - **error**: `GatewayError`, the typed failure taxonomy
//! - **memory**: `MemoryGateway`, a scriptable in-memory platform
//! - **voice**: `VoiceStateCache`, voice occupancy shared with the listener
//! - **discord** / **listener** (feature `discord`): REST client and
//!   gateway websocket listener

pub mod base;
pub mod error;
pub mod memory;
pub mod voice;

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(feature = "discord")]
pub mod listener;

pub use base::{ChannelInfo, ChannelKind, Gateway, GuildInfo, VoiceChannelSpec};
pub use error::GatewayError;
pub use memory::{GatewayOp, GatewayStats, MemoryGateway};
pub use voice::VoiceStateCache;
