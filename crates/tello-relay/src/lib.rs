pub mod doctor;
pub mod ffmpeg;

use async_trait::async_trait;
use serde::Deserialize;

pub use ffmpeg::FfmpegRelay;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay executable (looked up on PATH).
    pub binary: String,

    /// Where the drone's H.264 elementary stream lands after `streamon`.
    pub input: String,

    /// Local HTTP port the relayed stream is served on.
    pub port: u16,

    /// How long a freshly spawned relay must survive before `start` resolves.
    pub startup_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".into(),
            input: "udp://0.0.0.0:11111".into(),
            port: 8080,
            startup_ms: 300,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("relay binary '{binary}' unavailable: {source}")]
    Unavailable {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spawn relay: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("relay exited during startup ({0})")]
    Exited(String),

    #[error("stop relay: {0}")]
    Stop(#[source] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Republishes the decoded drone video as a local URL.
#[async_trait]
pub trait VideoRelay: Send + Sync {
    /// One-time setup; repeated calls are no-ops.
    async fn configure(&self) -> Result<(), RelayError>;

    /// Resolves once `stream_url(port)` is servable.
    async fn start(&self, port: u16) -> Result<(), RelayError>;

    async fn stop(&self) -> Result<(), RelayError>;
}

pub fn stream_url(port: u16) -> String {
    format!("http://127.0.0.1:{}", port)
}
