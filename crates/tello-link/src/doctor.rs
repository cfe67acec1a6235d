use anyhow::Result;
use crate::LinkConfig;

pub fn check_link(cfg: &LinkConfig) -> Result<()> {
    anyhow::ensure!(cfg.local_port != 0, "link.local_port must be fixed (the drone replies to it)");
    anyhow::ensure!(!cfg.drone_addr.ip().is_unspecified(), "link.drone_addr is unspecified");
    anyhow::ensure!(cfg.drone_addr.port() != 0, "link.drone_addr port missing");
    anyhow::ensure!(
        cfg.recv_buffer >= 512,
        "link.recv_buffer too small; telemetry lines need >= 512 bytes"
    );
    Ok(())
}
