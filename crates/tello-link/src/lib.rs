pub mod doctor;
pub mod drone;
pub mod stats;

use async_trait::async_trait;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tello_proto::{Command, ParseError, TelemetrySnapshot};

pub use drone::DroneLink;
pub use stats::LinkStats;

pub const DEFAULT_LOCAL_PORT: u16 = 9000;
pub const DEFAULT_DRONE_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 10, 1)), 8889);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Local interface to bind. The firmware answers whoever sent the command.
    pub bind_ip: IpAddr,

    /// Fixed local port; replies and telemetry both arrive here.
    pub local_port: u16,

    /// Drone command endpoint.
    pub drone_addr: SocketAddr,

    /// Receive buffer per datagram (bytes).
    pub recv_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_port: DEFAULT_LOCAL_PORT,
            drone_addr: DEFAULT_DRONE_ADDR,
            recv_buffer: 2048,
        }
    }
}

impl LinkConfig {
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.local_port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link is not open")]
    NotOpen,

    #[error("bind {addr} failed: {source}")]
    BindFailure {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("send '{command}' failed: {source}")]
    TransmitFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// What the link reports upward.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Telemetry(TelemetrySnapshot),
    /// A datagram looked like telemetry but could not be read. Not fatal.
    ParseFailure(ParseError),
    /// The socket died; the link has already closed itself.
    TransportError(String),
}

pub trait TelemetryObserver: Send + Sync {
    fn on_event(&self, event: LinkEvent);
}

impl<F> TelemetryObserver for F
where
    F: Fn(LinkEvent) + Send + Sync,
{
    fn on_event(&self, event: LinkEvent) {
        self(event)
    }
}

/// Command channel to the drone. `send` success means "handed to the
/// transport", never "acknowledged".
#[async_trait]
pub trait Link: Send + Sync {
    /// Bind and start receiving. Opening an open link only replaces the observer.
    async fn open(&self, observer: Arc<dyn TelemetryObserver>) -> Result<(), LinkError>;

    async fn send(&self, command: Command) -> Result<(), LinkError>;

    /// Best-effort release; safe when already closed.
    fn close(&self);

    fn is_open(&self) -> bool;
}
