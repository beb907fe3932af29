//! Media relay
//!
//! One task per relayed publisher track: read a unit, write it unmodified
//! to the forwarding sink, repeat. The loop ends on the first read or write
//! error, or when the owning session is torn down. Ending the loop never
//! changes session state; that is driven by connection-state events only.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::media::{InboundTrack, MediaSink, TrackKind};
use crate::types::SessionId;

/// Why a relay loop stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayExit {
    ReadFailed(String),
    WriteFailed(String),
    Cancelled,
}

#[derive(Default)]
struct RelayStatsInner {
    units_relayed: AtomicU64,
    bytes_relayed: AtomicU64,
    finished: AtomicBool,
    last_unit_at: RwLock<Option<Instant>>,
}

/// Point-in-time relay statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayStats {
    pub track_id: String,
    pub kind: TrackKind,
    pub units_relayed: u64,
    pub bytes_relayed: u64,
    pub running: bool,
    /// Milliseconds since the last relayed unit, if any
    pub idle_ms: Option<u64>,
}

/// Handle to a running relay task, owned by the publisher session
pub struct RelayHandle {
    track_id: String,
    kind: TrackKind,
    stats: Arc<RelayStatsInner>,
    cancel: CancellationToken,
    task: JoinHandle<RelayExit>,
}

impl RelayHandle {
    /// Spawn the relay loop for `track` writing into `sink`
    pub fn spawn(
        session_id: SessionId,
        track: Arc<dyn InboundTrack>,
        sink: Arc<dyn MediaSink>,
        cancel: CancellationToken,
    ) -> Self {
        let track_id = track.id();
        let kind = track.codec().kind;
        let stats = Arc::new(RelayStatsInner::default());

        info!(
            session_id = %session_id,
            track_id = %track_id,
            kind = %kind,
            ssrc = track.ssrc(),
            sink_id = %sink.id(),
            "Starting media relay"
        );

        let task = tokio::spawn(run_relay(
            session_id,
            track,
            sink,
            Arc::clone(&stats),
            cancel.clone(),
        ));

        Self {
            track_id,
            kind,
            stats,
            cancel,
            task,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.stats.finished.load(Ordering::Acquire)
    }

    /// Ask the loop to stop; it exits at its next suspension point
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the loop to end and report why
    pub async fn join(self) -> Option<RelayExit> {
        self.task.await.ok()
    }

    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let idle_ms = self
            .stats
            .last_unit_at
            .read()
            .map(|at| u64::try_from(at.elapsed().as_millis()).unwrap_or(u64::MAX));

        RelayStats {
            track_id: self.track_id.clone(),
            kind: self.kind,
            units_relayed: self.stats.units_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.stats.bytes_relayed.load(Ordering::Relaxed),
            running: self.is_running(),
            idle_ms,
        }
    }
}

async fn run_relay(
    session_id: SessionId,
    track: Arc<dyn InboundTrack>,
    sink: Arc<dyn MediaSink>,
    stats: Arc<RelayStatsInner>,
    cancel: CancellationToken,
) -> RelayExit {
    let exit = loop {
        let unit = tokio::select! {
            biased;
            () = cancel.cancelled() => break RelayExit::Cancelled,
            read = track.read_unit() => match read {
                Ok(unit) => unit,
                Err(e) => break RelayExit::ReadFailed(e.to_string()),
            },
        };

        if let Err(e) = sink.write_unit(&unit).await {
            break RelayExit::WriteFailed(e.to_string());
        }

        stats.units_relayed.fetch_add(1, Ordering::Relaxed);
        stats
            .bytes_relayed
            .fetch_add(unit.data.len() as u64, Ordering::Relaxed);
        *stats.last_unit_at.write() = Some(Instant::now());
    };

    stats.finished.store(true, Ordering::Release);

    match &exit {
        RelayExit::Cancelled => debug!(session_id = %session_id, track_id = %track.id(), "Media relay cancelled"),
        RelayExit::ReadFailed(e) => warn!(session_id = %session_id, track_id = %track.id(), error = %e, "Media relay stopped: read failed"),
        RelayExit::WriteFailed(e) => warn!(session_id = %session_id, track_id = %track.id(), error = %e, "Media relay stopped: write failed"),
    }

    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTrack, RecordingSink};
    use crate::media::{MediaCodec, TrackKind};
    use std::time::Duration;

    fn vp8() -> MediaCodec {
        MediaCodec::new(TrackKind::Video, "video/VP8", 90000)
    }

    #[tokio::test]
    async fn test_relay_forwards_units_in_read_order() {
        let track = Arc::new(ScriptedTrack::new("t1", vp8()));
        let sink = Arc::new(RecordingSink::new("sink", vp8()));
        for seq in 0..5 {
            track.push_unit(seq);
        }
        track.fail_next_read();

        let handle = RelayHandle::spawn(
            SessionId::from("pub"),
            track.clone(),
            sink.clone(),
            CancellationToken::new(),
        );
        let exit = tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .expect("relay should stop on read error");

        assert!(matches!(exit, Some(RelayExit::ReadFailed(_))));
        assert_eq!(sink.sequence_numbers(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_relay_stops_on_write_error() {
        let track = Arc::new(ScriptedTrack::new("t1", vp8()));
        let sink = Arc::new(RecordingSink::new("sink", vp8()));
        sink.fail_writes();
        track.push_unit(1);
        track.push_unit(2);

        let handle = RelayHandle::spawn(
            SessionId::from("pub"),
            track.clone(),
            sink.clone(),
            CancellationToken::new(),
        );
        let exit = tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .expect("relay should stop on write error");

        assert!(matches!(exit, Some(RelayExit::WriteFailed(_))));
        assert!(sink.sequence_numbers().is_empty());
    }

    #[tokio::test]
    async fn test_relay_cancellation_interrupts_blocked_read() {
        let track = Arc::new(ScriptedTrack::new("t1", vp8()));
        let sink = Arc::new(RecordingSink::new("sink", vp8()));
        let cancel = CancellationToken::new();

        let handle = RelayHandle::spawn(SessionId::from("pub"), track, sink, cancel.clone());
        assert!(handle.is_running());

        handle.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(1), handle.join())
            .await
            .expect("cancel should end the relay");
        assert_eq!(exit, Some(RelayExit::Cancelled));
    }

    #[tokio::test]
    async fn test_relay_stats_count_units() {
        let track = Arc::new(ScriptedTrack::new("t1", vp8()));
        let sink = Arc::new(RecordingSink::new("sink", vp8()));
        track.push_unit(7);
        track.push_unit(8);

        let handle = RelayHandle::spawn(
            SessionId::from("pub"),
            track.clone(),
            sink.clone(),
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(1), async {
            while handle.stats().units_relayed < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("two units should be relayed");

        let stats = handle.stats();
        assert_eq!(stats.units_relayed, 2);
        assert_eq!(stats.kind, TrackKind::Video);
        assert!(stats.bytes_relayed > 0);
        handle.cancel();
    }
}
