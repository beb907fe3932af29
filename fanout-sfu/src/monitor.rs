//! Liveness monitor
//!
//! Periodic, read-only diagnostic sweep over the registry. Logs session
//! counts by role and state, and for each publisher whether it owns a
//! forwarding sink, how far each relay has got, and what its transport is
//! sending.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::SessionRegistry;
use crate::relay::RelayStats;
use crate::transport::SenderInfo;
use crate::types::SessionId;

/// One publisher as seen by a liveness sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherReport {
    pub id: SessionId,
    pub state: String,
    pub has_forwarding_sink: bool,
    pub relays: Vec<RelayStats>,
    pub senders: Vec<SenderInfo>,
}

/// Result of one liveness sweep
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LivenessReport {
    pub publishers: usize,
    pub viewers: usize,
    /// Session count per state name, both roles
    pub states: BTreeMap<String, usize>,
    pub publisher_details: Vec<PublisherReport>,
}

pub struct LivenessMonitor {
    registry: Arc<dyn SessionRegistry>,
    interval: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: Arc<dyn SessionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Collect a report without mutating any session
    pub async fn sweep(&self) -> LivenessReport {
        let publishers = self.registry.publishers();
        let viewers = self.registry.viewers();

        let mut report = LivenessReport {
            publishers: publishers.len(),
            viewers: viewers.len(),
            ..LivenessReport::default()
        };

        for viewer in &viewers {
            *report.states.entry(viewer.state().await.to_string()).or_default() += 1;
        }

        for publisher in &publishers {
            let snapshot = publisher.snapshot().await;
            *report.states.entry(snapshot.state.to_string()).or_default() += 1;

            let senders = match publisher.transport().await {
                Some(transport) => transport.senders().await,
                None => Vec::new(),
            };

            report.publisher_details.push(PublisherReport {
                id: snapshot.id,
                state: snapshot.state.to_string(),
                has_forwarding_sink: snapshot.has_forwarding_sink,
                relays: snapshot.relays,
                senders,
            });
        }

        report
    }

    fn log_report(report: &LivenessReport) {
        info!(
            publishers = report.publishers,
            viewers = report.viewers,
            states = ?report.states,
            "Liveness check"
        );

        for publisher in &report.publisher_details {
            let relayed: u64 = publisher.relays.iter().map(|r| r.units_relayed).sum();
            debug!(
                publisher_id = %publisher.id,
                state = %publisher.state,
                has_forwarding_sink = publisher.has_forwarding_sink,
                relays = publisher.relays.len(),
                units_relayed = relayed,
                "Publisher liveness"
            );

            if publisher.senders.is_empty() {
                debug!(publisher_id = %publisher.id, "Publisher transport has no senders");
            }
            for sender in &publisher.senders {
                match (&sender.kind, &sender.track_id) {
                    (Some(kind), Some(track_id)) => {
                        debug!(publisher_id = %publisher.id, kind = %kind, track_id = %track_id, "Sender track");
                    }
                    _ => debug!(publisher_id = %publisher.id, "Sender has no track"),
                }
            }
        }
    }

    /// Sweep every interval until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Starting liveness monitor");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let report = self.sweep().await;
                    Self::log_report(&report);
                }
            }
        }

        info!("Liveness monitor stopped");
    }
}
