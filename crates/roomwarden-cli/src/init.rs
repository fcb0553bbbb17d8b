//! `roomwarden init` — write a default configuration.
//!
//! Creates `~/.roomwarden/config.json` with defaults (kept if it already
//! exists) and the directory the registry will live in.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;

use roomwarden_core::config::{get_config_path, load_config, save_config};
use roomwarden_core::utils::registry_path;

use crate::helpers::ok_mark;

/// Run the init command.
pub fn run() -> Result<()> {
    println!();
    println!("{}", "Roomwarden — Setup".cyan().bold());
    println!();

    let created = init_at(&get_config_path())?;
    let config_path = get_config_path();
    if created {
        println!("  {} created config at {}", ok_mark(), config_path.display());
    } else {
        println!("  {} config already exists at {}", ok_mark(), config_path.display());
    }

    let config = load_config(Some(&config_path));
    let registry = registry_path(&config.registry.path);
    if let Some(dir) = registry.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    println!("  {} registry at {}", ok_mark(), registry.display());

    println!();
    println!("  Next steps:");
    println!("    1. Put your bot token in {} (discord.token)", config_path.display());
    println!("    2. Add a lobby: roomwarden rooms add --name Lounge --guild <ID> --lobby <ID>");
    println!("    3. Start: roomwarden run");
    println!();
    Ok(())
}

/// Write defaults to `path` unless a file is already there.
/// Returns whether a file was written.
fn init_at(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let config = load_config(Some(path));
    save_config(&config, Some(path))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_defaults_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");

        assert!(init_at(&path).unwrap());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("roomInstanceSecs"));

        std::fs::write(&path, "{}").unwrap();
        assert!(!init_at(&path).unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }
}
