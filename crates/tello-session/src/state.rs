use time::{Duration, OffsetDateTime};

use tello_proto::TelemetrySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Live,
    Disconnecting,
}

/// Published view of the session. Only the session writes it.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub phase: Phase,
    pub last_error: Option<String>,
    pub battery_pct: Option<u8>,
    pub flight_time_s: Option<u32>,
    pub last_update: Option<OffsetDateTime>,
    pub telemetry: Option<TelemetrySnapshot>,
}

impl SessionState {
    pub fn is_live(&self) -> bool {
        self.phase == Phase::Live
    }

    pub fn is_connecting(&self) -> bool {
        self.phase == Phase::Connecting
    }

    /// Replaces every telemetry-derived field; nothing from the previous
    /// snapshot survives.
    pub fn apply_telemetry(&mut self, snapshot: TelemetrySnapshot, at: OffsetDateTime) {
        self.battery_pct = snapshot.battery_pct();
        self.flight_time_s = snapshot.flight_time_s();
        self.last_update = Some(at);
        self.telemetry = Some(snapshot);
    }

    pub fn telemetry_age(&self, now: OffsetDateTime) -> Option<Duration> {
        self.last_update.map(|t| now - t)
    }
}
