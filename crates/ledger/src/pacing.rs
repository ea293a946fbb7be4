use std::time::Duration;

use async_trait::async_trait;

/// Spacing between consecutive deletion requests.
///
/// WhatsApp penalizes bursts of revokes, so the sweep calls [`Pacer::pause`]
/// after every attempt.
#[async_trait]
pub trait Pacer: Send + Sync {
    async fn pause(&self);
}

/// Sleep a fixed interval after every attempt.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

impl FixedDelay {
    /// Default pacing interval between deletions.
    pub const DEFAULT: Self = Self(Duration::from_millis(200));
}

impl Default for FixedDelay {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[async_trait]
impl Pacer for FixedDelay {
    async fn pause(&self) {
        if !self.0.is_zero() {
            tokio::time::sleep(self.0).await;
        }
    }
}

/// No pacing. For tests and local sidecars without rate limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDelay;

#[async_trait]
impl Pacer for NoDelay {
    async fn pause(&self) {}
}
