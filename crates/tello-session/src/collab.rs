use async_trait::async_trait;
use std::time::Duration;
use time::OffsetDateTime;
use tracing::debug;

/// Time source; swapped out in tests so grace waits cost nothing.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, d: Duration);
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Screen orientation pinning. Fire-and-forget.
pub trait OrientationLock: Send + Sync {
    fn lock(&self);
    fn unlock(&self);
}

/// For hosts without a screen to pin.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOrientation;

impl OrientationLock for NoOrientation {
    fn lock(&self) {
        debug!("orientation: lock (no-op)");
    }

    fn unlock(&self) {
        debug!("orientation: unlock (no-op)");
    }
}
