use anyhow::{Context, Result};
use crate::RelayConfig;

pub fn check_config(cfg: &RelayConfig) -> Result<()> {
    anyhow::ensure!(!cfg.binary.trim().is_empty(), "relay.binary is empty");
    anyhow::ensure!(!cfg.input.trim().is_empty(), "relay.input is empty");
    anyhow::ensure!(cfg.port != 0, "relay.port must be fixed; the player is pointed at it");
    anyhow::ensure!(cfg.startup_ms <= 10_000, "relay.startup_ms should be <= 10000");
    Ok(())
}

/// Runs `<binary> -version`; only spawnability matters.
pub fn check_binary(cfg: &RelayConfig) -> Result<()> {
    std::process::Command::new(&cfg.binary)
        .arg("-version")
        .output()
        .with_context(|| format!("run {} -version", cfg.binary))?;
    Ok(())
}
