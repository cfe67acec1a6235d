use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub telemetry: u64,
    pub replies: u64,
    pub parse_failures: u64,
    pub last_reply: Option<String>,
    pub last_rx: Option<Instant>,
}

impl LinkStats {
    pub fn rx_age(&self) -> Option<Duration> {
        self.last_rx.map(|t| t.elapsed())
    }
}
