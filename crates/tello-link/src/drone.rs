use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tello_proto::{classify, Command, Inbound};

use crate::{Link, LinkConfig, LinkError, LinkEvent, LinkStats, TelemetryObserver};

/// UDP endpoint shared by command replies and the telemetry broadcast.
pub struct DroneLink {
    cfg: LinkConfig,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    endpoint: Option<Endpoint>,
    observer: Option<Arc<dyn TelemetryObserver>>,
    next_id: u64,
    stats: LinkStats,
    /// Aborted readers that may still own the socket fd.
    retired: Vec<JoinHandle<()>>,
}

struct Endpoint {
    id: u64,
    socket: Arc<UdpSocket>,
    reader: JoinHandle<()>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

impl Inner {
    fn release(&mut self) -> bool {
        self.observer = None;
        match self.endpoint.take() {
            Some(ep) => {
                // The fd closes only once the aborted reader drops its Arc<UdpSocket>.
                ep.reader.abort();
                self.retired.push(ep.reader);
                true
            }
            None => false,
        }
    }
}

impl DroneLink {
    pub fn new(cfg: LinkConfig) -> Self {
        Self { cfg, inner: Arc::new(Mutex::new(Inner::default())) }
    }

    /// Address actually bound, when open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        lock(&self.inner).endpoint.as_ref().and_then(|ep| ep.socket.local_addr().ok())
    }

    pub fn stats(&self) -> LinkStats {
        lock(&self.inner).stats.clone()
    }
}

impl Drop for DroneLink {
    fn drop(&mut self) {
        lock(&self.inner).release();
    }
}

#[async_trait]
impl Link for DroneLink {
    async fn open(&self, observer: Arc<dyn TelemetryObserver>) -> Result<(), LinkError> {
        let retired = {
            let mut inner = lock(&self.inner);
            if inner.endpoint.is_some() {
                debug!("link: already open, observer replaced");
                inner.observer = Some(observer);
                return Ok(());
            }
            std::mem::take(&mut inner.retired)
        };
        for reader in retired {
            // Wait for the previous socket to be dropped so the fixed port is free again.
            if let Err(e) = reader.await {
                if !e.is_cancelled() {
                    warn!("link: previous reader ended badly: {}", e);
                }
            }
        }

        let addr = self.cfg.local_addr();
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| LinkError::BindFailure { addr, source })?;
        let socket = Arc::new(socket);

        let mut inner = lock(&self.inner);
        if inner.endpoint.is_some() {
            // Another open won the race while we were binding; ours is dropped here.
            inner.observer = Some(observer);
            return Ok(());
        }
        inner.next_id += 1;
        let id = inner.next_id;
        let buf_len = self.cfg.recv_buffer.max(64);
        let reader = tokio::spawn(read_loop(id, socket.clone(), self.inner.clone(), buf_len));
        inner.endpoint = Some(Endpoint { id, socket, reader });
        inner.observer = Some(observer);
        info!("link: bound {} -> drone {}", addr, self.cfg.drone_addr);
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<(), LinkError> {
        let socket = {
            let inner = lock(&self.inner);
            inner.endpoint.as_ref().map(|ep| ep.socket.clone())
        };
        let socket = socket.ok_or(LinkError::NotOpen)?;

        let wire = command.wire();
        socket
            .send_to(wire.as_bytes(), self.cfg.drone_addr)
            .await
            .map_err(|source| LinkError::TransmitFailure { command: wire.clone(), source })?;
        debug!("link: sent '{}'", wire);
        Ok(())
    }

    fn close(&self) {
        if lock(&self.inner).release() {
            info!("link: closed");
        }
    }

    fn is_open(&self) -> bool {
        lock(&self.inner).endpoint.is_some()
    }
}

async fn read_loop(id: u64, socket: Arc<UdpSocket>, inner: Arc<Mutex<Inner>>, buf_len: usize) {
    let mut buf = vec![0u8; buf_len];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((n, from)) => dispatch(&inner, &buf[..n], from),
            Err(e) => {
                transport_failed(&inner, id, e);
                break;
            }
        }
    }
}

/// classify -> parse -> notify, run to completion for each datagram.
fn dispatch(inner: &Mutex<Inner>, datagram: &[u8], from: SocketAddr) {
    let inbound = classify(datagram);
    let observer = {
        let mut g = lock(inner);
        g.stats.last_rx = Some(Instant::now());
        match &inbound {
            Inbound::Telemetry(Ok(_)) => g.stats.telemetry += 1,
            Inbound::Telemetry(Err(_)) => g.stats.parse_failures += 1,
            Inbound::Reply(text) => {
                g.stats.replies += 1;
                g.stats.last_reply = Some(text.clone());
            }
        }
        g.observer.clone()
    };

    let event = match inbound {
        Inbound::Reply(text) => {
            info!("drone {}: {}", from, text);
            return;
        }
        Inbound::Telemetry(Ok(snapshot)) => LinkEvent::Telemetry(snapshot),
        Inbound::Telemetry(Err(e)) => {
            warn!("telemetry from {} dropped: {}", from, e);
            LinkEvent::ParseFailure(e)
        }
    };
    if let Some(observer) = observer {
        observer.on_event(event);
    }
}

fn transport_failed(inner: &Mutex<Inner>, id: u64, err: std::io::Error) {
    let observer = {
        let mut g = lock(inner);
        if g.endpoint.as_ref().map(|ep| ep.id) != Some(id) {
            // Endpoint already replaced or closed; nothing of ours to tear down.
            return;
        }
        let observer = g.observer.clone();
        g.release();
        observer
    };
    warn!("link: socket error, closed: {}", err);
    if let Some(observer) = observer {
        observer.on_event(LinkEvent::TransportError(err.to_string()));
    }
}
