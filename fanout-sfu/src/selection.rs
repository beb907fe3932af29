//! Publisher selection strategies

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::session::Session;

/// How a viewer is matched to one of the eligible publishers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    /// Lowest session id
    #[default]
    FirstMatch,
    /// Rotate over eligible publishers in id order
    RoundRobin,
    /// Fewest live viewers bound to it, ties broken by id
    LeastLoaded,
}

impl fmt::Display for SelectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FirstMatch => "first_match",
            Self::RoundRobin => "round_robin",
            Self::LeastLoaded => "least_loaded",
        };
        f.write_str(s)
    }
}

pub struct PublisherSelector {
    strategy: SelectionStrategy,
    cursor: AtomicUsize,
}

impl PublisherSelector {
    #[must_use]
    pub const fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            cursor: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    /// Pick one publisher that is Connected and owns a forwarding sink.
    ///
    /// `viewers` is only consulted by `LeastLoaded`.
    pub async fn select(
        &self,
        publishers: Vec<Arc<Session>>,
        viewers: &[Arc<Session>],
    ) -> Option<Arc<Session>> {
        let mut eligible = Vec::with_capacity(publishers.len());
        for publisher in publishers {
            if publisher.is_selectable().await {
                eligible.push(publisher);
            }
        }
        if eligible.is_empty() {
            return None;
        }
        eligible.sort_by(|a, b| a.id().cmp(b.id()));

        let chosen = match self.strategy {
            SelectionStrategy::FirstMatch => eligible.swap_remove(0),
            SelectionStrategy::RoundRobin => {
                let n = self.cursor.fetch_add(1, Ordering::Relaxed);
                let index = n % eligible.len();
                eligible.swap_remove(index)
            }
            SelectionStrategy::LeastLoaded => {
                let mut loads = Vec::with_capacity(eligible.len());
                for publisher in &eligible {
                    loads.push(bound_viewer_count(publisher, viewers).await);
                }
                // min_by_key keeps the first minimum, so ties go to the lowest id
                let index = loads
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, load)| **load)
                    .map_or(0, |(i, _)| i);
                eligible.swap_remove(index)
            }
        };

        debug!(
            strategy = %self.strategy,
            publisher_id = %chosen.id(),
            "Selected publisher for viewer"
        );
        Some(chosen)
    }
}

async fn bound_viewer_count(publisher: &Session, viewers: &[Arc<Session>]) -> usize {
    let mut count = 0;
    for viewer in viewers {
        if viewer.state().await.is_terminal() {
            continue;
        }
        if viewer.bound_publisher().await.as_ref() == Some(publisher.id()) {
            count += 1;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaCodec, TrackKind};
    use crate::testing::{ScriptedEngine, ScriptedTrack};
    use crate::transport::{ConnectionState, TransportEngine, TransportEvent};
    use crate::types::{SessionId, SessionRole};

    async fn connected_publisher(engine: &Arc<ScriptedEngine>, id: &str) -> Arc<Session> {
        let id = SessionId::from(id);
        let session = Arc::new(Session::new(id.clone(), SessionRole::Publisher));
        let transport = engine.create_transport(&id, SessionRole::Publisher).await.unwrap();
        session.begin_negotiation(transport, engine.clone()).await.unwrap();
        session
            .apply_event(
                TransportEvent::ConnectionStateChanged(ConnectionState::Connected),
                engine.as_ref(),
            )
            .await;
        let codec = MediaCodec::new(TrackKind::Video, "video/VP8", 90000);
        session
            .apply_event(
                TransportEvent::TrackArrived(Arc::new(ScriptedTrack::new("v", codec))),
                engine.as_ref(),
            )
            .await;
        session
    }

    async fn viewer_bound_to(id: &str, publisher: &str) -> Arc<Session> {
        let viewer = Arc::new(Session::new(SessionId::from(id), SessionRole::Viewer));
        viewer.bind_publisher(SessionId::from(publisher)).await;
        viewer
    }

    #[tokio::test]
    async fn test_no_eligible_publisher() {
        let selector = PublisherSelector::new(SelectionStrategy::FirstMatch);
        let idle = Arc::new(Session::new(SessionId::from("idle"), SessionRole::Publisher));
        assert!(selector.select(vec![idle], &[]).await.is_none());
        assert!(selector.select(Vec::new(), &[]).await.is_none());
    }

    #[tokio::test]
    async fn test_first_match_picks_lowest_id() {
        let engine = Arc::new(ScriptedEngine::new());
        let b = connected_publisher(&engine, "b").await;
        let a = connected_publisher(&engine, "a").await;
        let selector = PublisherSelector::new(SelectionStrategy::FirstMatch);

        for _ in 0..3 {
            let chosen = selector.select(vec![b.clone(), a.clone()], &[]).await.unwrap();
            assert_eq!(chosen.id().as_str(), "a");
        }
    }

    #[tokio::test]
    async fn test_round_robin_rotates() {
        let engine = Arc::new(ScriptedEngine::new());
        let a = connected_publisher(&engine, "a").await;
        let b = connected_publisher(&engine, "b").await;
        let selector = PublisherSelector::new(SelectionStrategy::RoundRobin);

        let mut picked = Vec::new();
        for _ in 0..4 {
            let chosen = selector.select(vec![a.clone(), b.clone()], &[]).await.unwrap();
            picked.push(chosen.id().to_string());
        }
        assert_eq!(picked, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn test_least_loaded_prefers_fewest_viewers() {
        let engine = Arc::new(ScriptedEngine::new());
        let a = connected_publisher(&engine, "a").await;
        let b = connected_publisher(&engine, "b").await;
        let viewers = vec![
            viewer_bound_to("v1", "a").await,
            viewer_bound_to("v2", "a").await,
            viewer_bound_to("v3", "b").await,
        ];
        let selector = PublisherSelector::new(SelectionStrategy::LeastLoaded);

        let chosen = selector.select(vec![a.clone(), b.clone()], &viewers).await.unwrap();
        assert_eq!(chosen.id().as_str(), "b");
    }

    #[tokio::test]
    async fn test_least_loaded_ignores_closed_viewers() {
        let engine = Arc::new(ScriptedEngine::new());
        let a = connected_publisher(&engine, "a").await;
        let b = connected_publisher(&engine, "b").await;
        let gone = viewer_bound_to("v1", "a").await;
        gone.teardown().await;
        let viewers = vec![gone, viewer_bound_to("v2", "b").await];
        let selector = PublisherSelector::new(SelectionStrategy::LeastLoaded);

        let chosen = selector.select(vec![a, b], &viewers).await.unwrap();
        assert_eq!(chosen.id().as_str(), "a");
    }

    #[test]
    fn test_strategy_serde() {
        let strategy: SelectionStrategy = serde_json::from_str("\"least_loaded\"").unwrap();
        assert_eq!(strategy, SelectionStrategy::LeastLoaded);
        assert_eq!(SelectionStrategy::default(), SelectionStrategy::FirstMatch);
        assert_eq!(SelectionStrategy::RoundRobin.to_string(), "round_robin");
    }
}
