//! Retention sweeper
//!
//! Sessions are never removed by state changes alone. This task evicts the
//! ones nobody will touch again: Failed/Closed sessions idle past
//! `terminal_ttl`, and sessions still New idle past `idle_ttl`. Negotiating
//! and Connected sessions are left alone.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::RetentionConfig;
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionState};

pub struct RetentionSweeper {
    registry: Arc<dyn SessionRegistry>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(registry: Arc<dyn SessionRegistry>, config: RetentionConfig) -> Self {
        Self { registry, config }
    }

    async fn is_stale(&self, session: &Session) -> bool {
        let idle = session.idle_for().await;
        match session.state().await {
            SessionState::Failed | SessionState::Closed => idle >= self.config.terminal_ttl(),
            SessionState::New => idle >= self.config.idle_ttl(),
            SessionState::Negotiating | SessionState::Connected => false,
        }
    }

    /// Evict stale sessions once; returns how many were removed
    pub async fn sweep(&self) -> usize {
        let sessions = self
            .registry
            .publishers()
            .into_iter()
            .chain(self.registry.viewers());

        let mut evicted = 0;
        for session in sessions {
            if !self.is_stale(&session).await {
                continue;
            }
            if self.registry.evict(&session) {
                session.teardown().await;
                evicted += 1;
                debug!(session_id = %session.id(), role = %session.role(), "Evicted stale session");
            }
        }

        if evicted > 0 {
            info!(evicted, "Retention sweep removed stale sessions");
        }
        evicted
    }

    /// Sweep every `sweep_interval_secs` until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let period = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = period.as_secs(),
            terminal_ttl_secs = self.config.terminal_ttl_secs,
            idle_ttl_secs = self.config.idle_ttl_secs,
            "Starting retention sweeper"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }

        info!("Retention sweeper stopped");
    }
}
