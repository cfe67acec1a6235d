use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use tello_link::{
    doctor as link_doctor, DroneLink, Link, LinkConfig, LinkEvent, TelemetryObserver,
};
use tello_proto::{Command, TelemetrySnapshot};
use tello_relay::{doctor as relay_doctor, FfmpegRelay, RelayConfig, VideoRelay};
use tello_session::{NoOrientation, Session, SessionConfig, SessionState, TokioClock};

#[derive(Debug, Parser)]
#[command(name = "tello", version, about = "Tello remote: command link, telemetry and video relay")]
struct Cli {
    /// TOML config; every key has a default.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Validate config and check the relay binary.
    Doctor,
    /// Connect, relay video, and read flight commands from stdin until Ctrl-C.
    Fly,
    /// Handshake and send a single command (takeoff, land, emergency, rc a b c d, ...).
    Send { command: String },
    /// Handshake and print telemetry for a while.
    Listen {
        #[arg(long, default_value_t = 10)]
        seconds: u64,
    },
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    link: LinkConfig,
    relay: RelayConfig,
    session: SessionCfg,
}

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct SessionCfg {
    grace_ms: u64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self { grace_ms: 500 }
    }
}

impl Config {
    fn grace(&self) -> Duration {
        Duration::from_millis(self.session.grace_ms)
    }

    fn session(&self) -> SessionConfig {
        SessionConfig { grace: self.grace(), relay_port: self.relay.port }
    }
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let Some(path) = path else { return Ok(Config::default()) };
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;

    match cli.cmd {
        Cmd::Doctor => doctor(&cfg)?,
        Cmd::Fly => fly(&cfg).await?,
        Cmd::Send { command } => send(&cfg, &command).await?,
        Cmd::Listen { seconds } => listen(&cfg, Duration::from_secs(seconds)).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    link_doctor::check_link(&cfg.link)?;
    relay_doctor::check_config(&cfg.relay)?;
    relay_doctor::check_binary(&cfg.relay).or_else(|e| {
        warn!("relay binary unusable, video will fail: {:#}", e);
        Ok::<(), anyhow::Error>(())
    })?;
    anyhow::ensure!(
        (50..=5000).contains(&cfg.session.grace_ms),
        "session.grace_ms should be 50..5000"
    );

    info!("doctor: OK (drone {}, local port {})", cfg.link.drone_addr, cfg.link.local_port);
    Ok(())
}

async fn fly(cfg: &Config) -> Result<()> {
    let relay = FfmpegRelay::new(cfg.relay.clone());
    if let Err(e) = relay.configure().await {
        warn!("fly: {:#}", e);
    }

    let link = DroneLink::new(cfg.link.clone());
    let session = Session::new(cfg.session(), link, relay, NoOrientation, TokioClock);
    let mut state_rx = session.subscribe();

    session.connect().await.context("connect")?;
    println!("video: {}", session.stream_url());
    println!("commands: takeoff | land | emergency | rc <roll> <pitch> <throttle> <yaw>");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("fly: interrupted");
                break;
            }
            fault = session.next_fault() => {
                warn!("fly: link lost: {}", fault.unwrap_or_default());
                break;
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let st = state_rx.borrow_and_update().clone();
                print_state(&st);
            }
            line = lines.next_line() => {
                let Some(line) = line.context("read stdin")? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(cmd) => {
                        if let Err(e) = session.command(cmd).await {
                            warn!("fly: {} not sent: {}", cmd, e);
                        }
                    }
                    Err(e) => warn!("fly: {}", e),
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

async fn send(cfg: &Config, text: &str) -> Result<()> {
    let cmd: Command = text.parse()?;
    let link = DroneLink::new(cfg.link.clone());
    let quiet: Arc<dyn TelemetryObserver> = Arc::new(|_ev: LinkEvent| {});
    link.open(quiet).await.context("open link")?;

    let result = async {
        link.send(Command::Command).await?;
        tokio::time::sleep(cfg.grace()).await;
        if cmd != Command::Command {
            link.send(cmd).await?;
            tokio::time::sleep(cfg.grace()).await;
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    let stats = link.stats();
    link.close();
    result?;
    println!("sent={} reply={}", cmd, stats.last_reply.as_deref().unwrap_or("(none)"));
    Ok(())
}

async fn listen(cfg: &Config, duration: Duration) -> Result<()> {
    let link = DroneLink::new(cfg.link.clone());
    let printer: Arc<dyn TelemetryObserver> = Arc::new(|ev: LinkEvent| match ev {
        LinkEvent::Telemetry(snap) => println!("{}", describe(&snap)),
        LinkEvent::ParseFailure(e) => warn!("listen: {}", e),
        LinkEvent::TransportError(e) => warn!("listen: transport: {}", e),
    });
    link.open(printer).await.context("open link")?;

    let sent = link.send(Command::Command).await;
    if sent.is_ok() {
        tokio::time::sleep(duration).await;
    }
    let stats = link.stats();
    link.close();
    sent?;

    let age = stats.rx_age().map(|d| format!("{}ms", d.as_millis()));
    println!(
        "telemetry={} replies={} parse_failures={} last_reply={} last_rx={}",
        stats.telemetry,
        stats.replies,
        stats.parse_failures,
        stats.last_reply.as_deref().unwrap_or("(none)"),
        age.as_deref().unwrap_or("never"),
    );
    Ok(())
}

fn describe(snap: &TelemetrySnapshot) -> String {
    let opt = |v: Option<String>| v.unwrap_or_else(|| "-".into());
    format!(
        "bat={}% time={}s h={}cm tof={}cm att={} vel={} temp={}",
        opt(snap.battery_pct().map(|v| v.to_string())),
        opt(snap.flight_time_s().map(|v| v.to_string())),
        opt(snap.height_cm().map(|v| v.to_string())),
        opt(snap.tof_cm().map(|v| v.to_string())),
        opt(snap.attitude_deg().map(|(p, r, y)| format!("{}/{}/{}", p, r, y))),
        opt(snap.velocity().map(|(x, y, z)| format!("{}/{}/{}", x, y, z))),
        opt(snap.temperature_c().map(|(lo, hi)| format!("{}..{}C", lo, hi))),
    )
}

fn print_state(st: &SessionState) {
    if let Some(err) = &st.last_error {
        println!("[{:?}] error: {}", st.phase, err);
    }
    match &st.telemetry {
        Some(snap) => println!("[{:?}] {}", st.phase, describe(snap)),
        None => println!("[{:?}]", st.phase),
    }
}
