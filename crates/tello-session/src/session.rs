use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use tello_link::{Link, LinkError, LinkEvent, TelemetryObserver};
use tello_proto::Command;
use tello_relay::{stream_url, RelayError, VideoRelay};

use crate::collab::{Clock, OrientationLock};
use crate::state::{Phase, SessionState};
use crate::SessionConfig;

const FAULT_QUEUE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStep {
    OpenLink,
    Handshake,
    EnableStream,
    StartRelay,
    GoLive,
}

impl fmt::Display for ConnectStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectStep::OpenLink => "open link",
            ConnectStep::Handshake => "handshake",
            ConnectStep::EnableStream => "stream enable",
            ConnectStep::StartRelay => "relay start",
            ConnectStep::GoLive => "go live",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("disconnect requested while connecting")]
    Interrupted,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The first failure of a connect sequence; teardown outcome is never
    /// substituted for it.
    #[error("connect failed at {step}: {source}")]
    Orchestration {
        step: ConnectStep,
        #[source]
        source: StepError,
    },
}

impl SessionError {
    fn at(step: ConnectStep, source: impl Into<StepError>) -> Self {
        SessionError::Orchestration { step, source: source.into() }
    }

    pub fn step(&self) -> ConnectStep {
        match self {
            SessionError::Orchestration { step, .. } => *step,
        }
    }

    pub fn cause(&self) -> &StepError {
        match self {
            SessionError::Orchestration { source, .. } => source,
        }
    }
}

/// Connection lifecycle for one drone: Idle -> Connecting -> Live ->
/// Disconnecting -> Idle. Methods take `&self`, so a `disconnect` may run
/// while a `connect` is still in flight.
pub struct Session<L, R, O, C> {
    cfg: SessionConfig,
    link: L,
    relay: R,
    orientation: O,
    clock: Arc<C>,
    state: Arc<watch::Sender<SessionState>>,
    attempt: AtomicU64,
    faults_tx: mpsc::Sender<String>,
    faults_rx: Mutex<mpsc::Receiver<String>>,
}

impl<L, R, O, C> Session<L, R, O, C>
where
    L: Link,
    R: VideoRelay,
    O: OrientationLock,
    C: Clock + 'static,
{
    pub fn new(cfg: SessionConfig, link: L, relay: R, orientation: O, clock: C) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let (faults_tx, faults_rx) = mpsc::channel(FAULT_QUEUE);
        Self {
            cfg,
            link,
            relay,
            orientation,
            clock: Arc::new(clock),
            state: Arc::new(state),
            attempt: AtomicU64::new(0),
            faults_tx,
            faults_rx: Mutex::new(faults_rx),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn stream_url(&self) -> String {
        stream_url(self.cfg.relay_port)
    }

    /// Next transport failure reported by the link. The owner is expected
    /// to `disconnect` in response.
    pub async fn next_fault(&self) -> Option<String> {
        self.faults_rx.lock().await.recv().await
    }

    /// Flight command passthrough (takeoff, land, rc, ...).
    pub async fn command(&self, command: Command) -> Result<(), LinkError> {
        self.link.send(command).await
    }

    /// No-op unless Idle. On failure the full teardown runs before the
    /// original error is returned.
    pub async fn connect(&self) -> Result<(), SessionError> {
        let mut seen = Phase::Idle;
        let begun = self.state.send_if_modified(|s| {
            seen = s.phase;
            if s.phase != Phase::Idle {
                return false;
            }
            s.phase = Phase::Connecting;
            s.last_error = None;
            true
        });
        if !begun {
            info!("session: connect ignored while {:?}", seen);
            return Ok(());
        }

        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst) + 1;
        let _finally = ClearConnecting {
            state: &*self.state,
            attempt: &self.attempt,
            mine: attempt,
        };
        info!("session: connecting");

        if let Err(err) = self.run_steps(attempt).await {
            return self.fail(err, attempt).await;
        }

        let live = self.state.send_if_modified(|s| {
            if s.phase != Phase::Connecting || !self.current(attempt) {
                return false;
            }
            s.phase = Phase::Live;
            true
        });
        if !live {
            let err = SessionError::at(ConnectStep::GoLive, StepError::Interrupted);
            return self.fail(err, attempt).await;
        }

        self.orientation.lock();
        info!("session: live, video at {}", self.stream_url());
        Ok(())
    }

    fn current(&self, attempt: u64) -> bool {
        self.attempt.load(Ordering::SeqCst) == attempt
    }

    /// Stops before `next` once a disconnect (or a newer connect) has taken
    /// over.
    fn still_current(&self, attempt: u64, next: ConnectStep) -> Result<(), SessionError> {
        if self.current(attempt) {
            Ok(())
        } else {
            Err(SessionError::at(next, StepError::Interrupted))
        }
    }

    async fn run_steps(&self, attempt: u64) -> Result<(), SessionError> {
        let observer: Arc<dyn TelemetryObserver> = Arc::new(SessionObserver {
            state: self.state.clone(),
            faults: self.faults_tx.clone(),
            clock: self.clock.clone(),
        });

        self.link
            .open(observer)
            .await
            .map_err(|e| SessionError::at(ConnectStep::OpenLink, e))?;
        self.still_current(attempt, ConnectStep::Handshake)?;

        self.link
            .send(Command::Command)
            .await
            .map_err(|e| SessionError::at(ConnectStep::Handshake, e))?;
        self.clock.sleep(self.cfg.grace).await;
        self.still_current(attempt, ConnectStep::EnableStream)?;

        self.link
            .send(Command::StreamOn)
            .await
            .map_err(|e| SessionError::at(ConnectStep::EnableStream, e))?;
        self.clock.sleep(self.cfg.grace).await;
        self.still_current(attempt, ConnectStep::StartRelay)?;

        self.relay
            .start(self.cfg.relay_port)
            .await
            .map_err(|e| SessionError::at(ConnectStep::StartRelay, e))?;
        Ok(())
    }

    async fn fail(&self, err: SessionError, attempt: u64) -> Result<(), SessionError> {
        warn!("session: {}", err);
        // A superseded attempt must not tear down what a newer connect owns.
        if !self.current(attempt) {
            let phase = self.state.borrow().phase;
            match phase {
                Phase::Idle => {}
                Phase::Disconnecting => {
                    // The running teardown may have closed the link before our open landed.
                    self.link.close();
                    return Err(err);
                }
                Phase::Connecting | Phase::Live => return Err(err),
            }
        }
        self.disconnect().await;
        let msg = err.to_string();
        self.state.send_modify(|s| s.last_error = Some(msg));
        Err(err)
    }

    /// Accepted from any state. Every step runs even if an earlier one failed;
    /// nothing is reported to the caller.
    pub async fn disconnect(&self) {
        self.attempt.fetch_add(1, Ordering::SeqCst);
        self.state.send_modify(|s| s.phase = Phase::Disconnecting);

        if let Err(e) = self.relay.stop().await {
            warn!("session: relay stop failed: {}", e);
        }
        if let Err(e) = self.link.send(Command::StreamOff).await {
            debug!("session: streamoff not delivered: {}", e);
        }
        self.link.close();
        self.orientation.unlock();

        self.state.send_modify(|s| {
            s.phase = Phase::Idle;
            s.last_error = None;
        });
        info!("session: disconnected");
    }
}

/// Leaves Connecting on every exit path of `connect`, including a dropped
/// future.
struct ClearConnecting<'a> {
    state: &'a watch::Sender<SessionState>,
    attempt: &'a AtomicU64,
    mine: u64,
}

impl Drop for ClearConnecting<'_> {
    fn drop(&mut self) {
        if self.attempt.load(Ordering::SeqCst) != self.mine {
            return;
        }
        self.state.send_if_modified(|s| {
            if s.phase != Phase::Connecting {
                return false;
            }
            s.phase = Phase::Idle;
            true
        });
    }
}

struct SessionObserver<C> {
    state: Arc<watch::Sender<SessionState>>,
    faults: mpsc::Sender<String>,
    clock: Arc<C>,
}

impl<C: Clock> TelemetryObserver for SessionObserver<C> {
    fn on_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Telemetry(snapshot) => {
                let now = self.clock.now();
                self.state.send_modify(|s| s.apply_telemetry(snapshot, now));
            }
            LinkEvent::ParseFailure(e) => {
                debug!("session: telemetry skipped: {}", e);
            }
            LinkEvent::TransportError(msg) => {
                warn!("session: transport error: {}", msg);
                self.state.send_modify(|s| {
                    s.last_error = Some(msg.clone());
                    if s.phase == Phase::Live {
                        s.phase = Phase::Disconnecting;
                    }
                });
                if self.faults.try_send(msg).is_err() {
                    debug!("session: fault queue full, dropping notice");
                }
            }
        }
    }
}
