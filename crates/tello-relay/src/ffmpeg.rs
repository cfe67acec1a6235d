use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::{stream_url, RelayConfig, RelayError, VideoRelay};

/// Supervises one `ffmpeg` child that reads the drone stream and serves it
/// as MPEG-TS over HTTP on 127.0.0.1.
pub struct FfmpegRelay {
    cfg: RelayConfig,
    configured: OnceCell<()>,
    child: Mutex<Option<Child>>,
}

impl FfmpegRelay {
    pub fn new(cfg: RelayConfig) -> Self {
        Self { cfg, configured: OnceCell::new(), child: Mutex::new(None) }
    }

    pub async fn is_running(&self) -> bool {
        match self.child.lock().await.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn args(&self, port: u16) -> Vec<String> {
        // ffmpeg -fflags nobuffer -i <input> -c copy -f mpegts -listen 1 <url>
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-fflags".into(),
            "nobuffer".into(),
            "-i".into(),
            self.cfg.input.clone(),
            "-c".into(),
            "copy".into(),
            "-f".into(),
            "mpegts".into(),
            "-listen".into(),
            "1".into(),
            stream_url(port),
        ]
    }

    async fn check_version(&self) -> Result<(), RelayError> {
        let out = Command::new(&self.cfg.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RelayError::Unavailable { binary: self.cfg.binary.clone(), source })?;
        let version = String::from_utf8_lossy(&out.stdout);
        debug!("relay: {}", version.lines().next().unwrap_or("(no version output)"));
        Ok(())
    }
}

#[async_trait]
impl VideoRelay for FfmpegRelay {
    async fn configure(&self) -> Result<(), RelayError> {
        self.configured.get_or_try_init(|| self.check_version()).await?;
        Ok(())
    }

    async fn start(&self, port: u16) -> Result<(), RelayError> {
        self.configure().await?;

        let mut slot = self.child.lock().await;
        if let Some(mut old) = slot.take() {
            warn!("relay: already running, restarting");
            if let Err(e) = old.kill().await {
                debug!("relay: kill previous: {}", e);
            }
        }

        let mut child = Command::new(&self.cfg.binary)
            .args(self.args(port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(RelayError::Spawn)?;

        tokio::time::sleep(Duration::from_millis(self.cfg.startup_ms)).await;
        match child.try_wait() {
            Ok(None) => {}
            Ok(Some(status)) => return Err(RelayError::Exited(status.to_string())),
            Err(e) => return Err(RelayError::Spawn(e)),
        }

        info!("relay: serving {}", stream_url(port));
        *slot = Some(child);
        Ok(())
    }

    async fn stop(&self) -> Result<(), RelayError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };
        child.kill().await.map_err(RelayError::Stop)?;
        info!("relay: stopped");
        Ok(())
    }
}
