use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::macros::datetime;
use time::OffsetDateTime;

use tello_link::{Link, LinkError, LinkEvent, TelemetryObserver};
use tello_proto::{Command, TelemetrySnapshot};
use tello_relay::{RelayError, VideoRelay};
use tello_session::{
    Clock, ConnectStep, OrientationLock, Phase, Session, SessionConfig, StepError,
};

type Journal = Arc<Mutex<Vec<String>>>;

fn note(journal: &Journal, entry: impl Into<String>) {
    journal.lock().unwrap().push(entry.into());
}

#[derive(Default)]
struct MockLink {
    journal: Journal,
    fail_send: Option<Command>,
    fail_open: bool,
    open: AtomicBool,
    observer: Mutex<Option<Arc<dyn TelemetryObserver>>>,
}

impl MockLink {
    fn emit(&self, event: LinkEvent) {
        let observer = self.observer.lock().unwrap().clone();
        observer.expect("no observer registered").on_event(event);
    }
}

#[async_trait]
impl Link for MockLink {
    async fn open(&self, observer: Arc<dyn TelemetryObserver>) -> Result<(), LinkError> {
        note(&self.journal, "link.open");
        if self.fail_open {
            return Err(LinkError::BindFailure {
                addr: "0.0.0.0:9000".parse().unwrap(),
                source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken"),
            });
        }
        self.open.store(true, Ordering::SeqCst);
        *self.observer.lock().unwrap() = Some(observer);
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<(), LinkError> {
        note(&self.journal, format!("send {}", command));
        if !self.open.load(Ordering::SeqCst) {
            return Err(LinkError::NotOpen);
        }
        if self.fail_send == Some(command) {
            return Err(LinkError::TransmitFailure {
                command: command.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "network unreachable"),
            });
        }
        Ok(())
    }

    fn close(&self) {
        note(&self.journal, "link.close");
        self.open.store(false, Ordering::SeqCst);
        *self.observer.lock().unwrap() = None;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MockRelay {
    journal: Journal,
    fail_start: bool,
    fail_stop: bool,
    stop_yields: bool,
}

#[async_trait]
impl VideoRelay for MockRelay {
    async fn configure(&self) -> Result<(), RelayError> {
        Ok(())
    }

    async fn start(&self, port: u16) -> Result<(), RelayError> {
        note(&self.journal, format!("relay.start {}", port));
        if self.fail_start {
            return Err(RelayError::Other("decoder crashed".into()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), RelayError> {
        note(&self.journal, "relay.stop");
        if self.stop_yields {
            tokio::task::yield_now().await;
        }
        if self.fail_stop {
            return Err(RelayError::Other("relay not running".into()));
        }
        Ok(())
    }
}

struct MockOrientation(Journal);

impl OrientationLock for MockOrientation {
    fn lock(&self) {
        note(&self.0, "orientation.lock");
    }

    fn unlock(&self) {
        note(&self.0, "orientation.unlock");
    }
}

/// Grace waits yield once instead of sleeping; a parked clock never wakes.
#[derive(Default)]
struct StepClock {
    sleeps: Arc<AtomicUsize>,
    parked: bool,
}

#[async_trait]
impl Clock for StepClock {
    async fn sleep(&self, _d: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        if self.parked {
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
    }

    fn now(&self) -> OffsetDateTime {
        datetime!(2024-05-01 12:00 UTC)
    }
}

type TestSession = Session<MockLink, MockRelay, MockOrientation, StepClock>;

struct Harness {
    session: TestSession,
    journal: Journal,
    sleeps: Arc<AtomicUsize>,
}

fn harness(link: MockLink, relay: MockRelay) -> Harness {
    harness_with_clock(link, relay, StepClock::default())
}

fn harness_with_clock(link: MockLink, relay: MockRelay, clock: StepClock) -> Harness {
    let journal = Journal::default();
    let link = MockLink { journal: journal.clone(), ..link };
    let relay = MockRelay { journal: journal.clone(), ..relay };
    let sleeps = clock.sleeps.clone();
    let session = Session::new(
        SessionConfig { grace: Duration::from_millis(500), relay_port: 8080 },
        link,
        relay,
        MockOrientation(journal.clone()),
        clock,
    );
    Harness { session, journal, sleeps }
}

impl Harness {
    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }

    fn clear(&self) {
        self.journal.lock().unwrap().clear();
    }
}

#[tokio::test]
async fn connect_runs_steps_in_order_and_goes_live() {
    let h = harness(MockLink::default(), MockRelay::default());
    h.session.connect().await.unwrap();

    assert_eq!(
        h.journal(),
        ["link.open", "send command", "send streamon", "relay.start 8080", "orientation.lock"]
    );
    assert_eq!(h.sleeps.load(Ordering::SeqCst), 2);
    let st = h.session.state();
    assert_eq!(st.phase, Phase::Live);
    assert_eq!(st.last_error, None);
    assert_eq!(h.session.stream_url(), "http://127.0.0.1:8080");
}

#[tokio::test]
async fn stream_enable_failure_tears_down_and_reports_original_error() {
    let h = harness(
        MockLink { fail_send: Some(Command::StreamOn), ..MockLink::default() },
        MockRelay { fail_stop: true, ..MockRelay::default() },
    );

    let err = h.session.connect().await.unwrap_err();
    assert_eq!(err.step(), ConnectStep::EnableStream);
    assert!(matches!(err.cause(), StepError::Link(LinkError::TransmitFailure { .. })));

    assert_eq!(
        h.journal(),
        [
            "link.open",
            "send command",
            "send streamon",
            "relay.stop",
            "send streamoff",
            "link.close",
            "orientation.unlock",
        ]
    );
    let st = h.session.state();
    assert_eq!(st.phase, Phase::Idle);
    assert!(st.last_error.unwrap().contains("stream enable"));
    assert!(!h.session.link().is_open());
}

#[tokio::test]
async fn relay_failure_is_surfaced_after_teardown() {
    let h = harness(MockLink::default(), MockRelay { fail_start: true, ..MockRelay::default() });

    let err = h.session.connect().await.unwrap_err();
    assert_eq!(err.step(), ConnectStep::StartRelay);
    assert!(matches!(err.cause(), StepError::Relay(RelayError::Other(_))));
    assert_eq!(
        &h.journal()[3..],
        ["relay.start 8080", "relay.stop", "send streamoff", "link.close", "orientation.unlock"]
    );
    assert_eq!(h.session.state().phase, Phase::Idle);
}

#[tokio::test]
async fn open_failure_skips_commands() {
    let h = harness(MockLink { fail_open: true, ..MockLink::default() }, MockRelay::default());

    let err = h.session.connect().await.unwrap_err();
    assert_eq!(err.step(), ConnectStep::OpenLink);
    assert!(matches!(err.cause(), StepError::Link(LinkError::BindFailure { .. })));
    assert_eq!(
        h.journal(),
        ["link.open", "relay.stop", "send streamoff", "link.close", "orientation.unlock"]
    );
    assert_eq!(h.sleeps.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn connect_while_live_is_a_no_op() {
    let h = harness(MockLink::default(), MockRelay::default());
    h.session.connect().await.unwrap();
    h.clear();

    h.session.connect().await.unwrap();
    assert!(h.journal().is_empty());
    assert_eq!(h.session.state().phase, Phase::Live);
}

#[tokio::test]
async fn disconnect_from_idle_is_harmless() {
    let h = harness(MockLink::default(), MockRelay { fail_stop: true, ..MockRelay::default() });

    h.session.disconnect().await;
    assert_eq!(
        h.journal(),
        ["relay.stop", "send streamoff", "link.close", "orientation.unlock"]
    );
    let st = h.session.state();
    assert_eq!(st.phase, Phase::Idle);
    assert_eq!(st.last_error, None);
}

#[tokio::test]
async fn connect_again_after_disconnect() {
    let h = harness(MockLink::default(), MockRelay::default());
    h.session.connect().await.unwrap();
    h.session.disconnect().await;
    h.clear();

    h.session.connect().await.unwrap();
    assert_eq!(h.journal()[0], "link.open");
    assert_eq!(h.session.state().phase, Phase::Live);
}

#[tokio::test]
async fn disconnect_during_connect_wins() {
    let h = harness(MockLink::default(), MockRelay::default());

    // connect yields on its first grace wait and disconnect runs to the end
    // before connect resumes.
    let (res, ()) = tokio::join!(h.session.connect(), h.session.disconnect());

    let err = res.unwrap_err();
    assert_eq!(err.step(), ConnectStep::EnableStream);
    assert!(matches!(err.cause(), StepError::Interrupted));
    assert_eq!(h.session.state().phase, Phase::Idle);
    assert!(!h.session.link().is_open());
    let journal = h.journal();
    assert!(!journal.iter().any(|e| e == "send streamon"));
    assert!(!journal.iter().any(|e| e.starts_with("relay.start")));
}

#[tokio::test]
async fn stale_connect_leaves_newer_connect_alone() {
    let h = harness(MockLink::default(), MockRelay::default());

    let (first, second) = tokio::join!(h.session.connect(), async {
        h.session.disconnect().await;
        h.session.connect().await
    });

    let err = first.unwrap_err();
    assert_eq!(err.step(), ConnectStep::EnableStream);
    assert!(matches!(err.cause(), StepError::Interrupted));
    second.unwrap();

    let st = h.session.state();
    assert_eq!(st.phase, Phase::Live);
    assert_eq!(st.last_error, None);
    assert!(h.session.link().is_open());

    let journal = h.journal();
    let count = |entry: &str| journal.iter().filter(|e| *e == entry).count();
    assert_eq!(count("send streamon"), 1);
    assert_eq!(count("relay.start 8080"), 1);
    assert_eq!(journal.last().map(String::as_str), Some("orientation.lock"));
}

#[tokio::test]
async fn connect_while_disconnecting_is_a_no_op() {
    let h = harness(
        MockLink::default(),
        MockRelay { stop_yields: true, ..MockRelay::default() },
    );

    // disconnect is parked inside relay.stop when connect arrives.
    let ((), res) = tokio::join!(h.session.disconnect(), h.session.connect());

    res.unwrap();
    assert!(!h.journal().iter().any(|e| e == "link.open"));
    assert_eq!(h.session.state().phase, Phase::Idle);
    assert!(!h.session.link().is_open());
}

#[tokio::test]
async fn dropped_connect_returns_to_idle() {
    let clock = StepClock { parked: true, ..StepClock::default() };
    let h = harness_with_clock(MockLink::default(), MockRelay::default(), clock);

    let mut connecting = Box::pin(h.session.connect());
    let waited = tokio::time::timeout(Duration::from_millis(20), &mut connecting).await;
    assert!(waited.is_err());
    assert_eq!(h.session.state().phase, Phase::Connecting);

    drop(connecting);
    assert_eq!(h.session.state().phase, Phase::Idle);

    h.session.disconnect().await;
    assert!(!h.session.link().is_open());
}

#[tokio::test]
async fn telemetry_updates_published_state() {
    let h = harness(MockLink::default(), MockRelay::default());
    let mut rx = h.session.subscribe();
    h.session.connect().await.unwrap();

    let snap = TelemetrySnapshot::parse("pitch:0;bat:77;time:5;");
    h.session.link().emit(LinkEvent::Telemetry(snap));
    rx.changed().await.unwrap();

    let st = rx.borrow().clone();
    assert_eq!(st.battery_pct, Some(77));
    assert_eq!(st.flight_time_s, Some(5));
    assert_eq!(st.last_update, Some(datetime!(2024-05-01 12:00 UTC)));
    assert_eq!(st.telemetry.unwrap().get("pitch"), Some("0"));
}

#[tokio::test]
async fn transport_error_surfaces_as_fault() {
    let h = harness(MockLink::default(), MockRelay::default());
    h.session.connect().await.unwrap();

    h.session.link().emit(LinkEvent::TransportError("socket closed".into()));
    assert_eq!(h.session.next_fault().await.as_deref(), Some("socket closed"));
    let st = h.session.state();
    assert_eq!(st.last_error.as_deref(), Some("socket closed"));
    assert_eq!(st.phase, Phase::Disconnecting);

    h.session.disconnect().await;
    let st = h.session.state();
    assert_eq!(st.last_error, None);
    assert_eq!(st.phase, Phase::Idle);
}

#[tokio::test]
async fn parse_failures_do_not_reach_state() {
    let h = harness(MockLink::default(), MockRelay::default());
    h.session.connect().await.unwrap();

    let bad = tello_proto::ParseError::NotText("bad utf-8".into());
    h.session.link().emit(LinkEvent::ParseFailure(bad));
    let st = h.session.state();
    assert_eq!(st.last_error, None);
    assert_eq!(st.telemetry, None);
    assert_eq!(st.phase, Phase::Live);
}

#[tokio::test]
async fn flight_commands_need_an_open_link() {
    let h = harness(MockLink::default(), MockRelay::default());
    assert!(matches!(h.session.command(Command::Takeoff).await, Err(LinkError::NotOpen)));

    h.session.connect().await.unwrap();
    h.session.command(Command::Takeoff).await.unwrap();
    assert_eq!(h.journal().last().map(String::as_str), Some("send takeoff"));
}
