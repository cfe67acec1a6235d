pub mod collab;
pub mod session;
pub mod state;

use std::time::Duration;

pub use collab::{Clock, NoOrientation, OrientationLock, TokioClock};
pub use session::{ConnectStep, Session, SessionError, StepError};
pub use state::{Phase, SessionState};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fixed wait after `command` and after `streamon`; the firmware has no
    /// synchronous acknowledgement to wait on instead.
    pub grace: Duration,

    /// Port handed to the relay; the stream URL is derived from it.
    pub relay_port: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { grace: Duration::from_millis(500), relay_port: 8080 }
    }
}
