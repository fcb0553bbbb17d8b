//! Configuration system — schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use roomwarden_core::config;
//!
//! let cfg = config::load_config(None);
//! println!("Room scan every {}s", cfg.scan.room_instance_secs);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    Config, CountdownConfig, DiscordConfig, RegistryConfig, ScanConfig, TriggerConfig,
};
