//! C10: Event/Behavior Bus. Emits typed behavior events toward the external
//! reputation collaborator and exposes `get_score` for C7's neighbor
//! selection and C3's optional admission filtering. The scoring *policy* is
//! explicitly out of scope (§1); this module ships only the
//! event plumbing, the `ReputationProvider` trait a collaborator implements,
//! and a trivial static-score default usable in tests.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Closed set of behavior events a collaborator's reputation engine
/// consumes to adjust its score for a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BehaviorEvent {
    MessageDelivered { peer_id: String },
    MessageFailed { peer_id: String },
    RouteSuccess { peer_id: String },
    RouteFailure { peer_id: String },
    SuspiciousBehavior { peer_id: String, reason: String },
    MaliciousActivity { peer_id: String, reason: String },
}

impl BehaviorEvent {
    pub fn peer_id(&self) -> &str {
        match self {
            BehaviorEvent::MessageDelivered { peer_id }
            | BehaviorEvent::MessageFailed { peer_id }
            | BehaviorEvent::RouteSuccess { peer_id }
            | BehaviorEvent::RouteFailure { peer_id }
            | BehaviorEvent::SuspiciousBehavior { peer_id, .. }
            | BehaviorEvent::MaliciousActivity { peer_id, .. } => peer_id,
        }
    }
}

/// Queried by C7 for neighbor selection and by C3 for optional admission
/// filtering. A collaborator owns the weighting/slashing policy; the core
/// only ever reads a score in `[0, 1]`.
pub trait ReputationProvider: Send + Sync {
    fn get_score(&self, peer_id: &str) -> f64;
}

/// Scores every peer identically. Used in tests and as a safe default before
/// a real reputation collaborator is wired in; never the production policy.
pub struct StaticReputationProvider {
    pub score: f64,
}

impl Default for StaticReputationProvider {
    fn default() -> Self {
        Self { score: 0.5 }
    }
}

impl ReputationProvider for StaticReputationProvider {
    fn get_score(&self, _peer_id: &str) -> f64 {
        self.score
    }
}

/// The typed observer bus: the core publishes, an external collaborator (or
/// a test harness) subscribes. Backed by a broadcast channel so multiple
/// subscribers (reputation engine, UI event stream) can listen independently
/// without coupling to the core's task structure.
pub struct EventBus {
    sender: broadcast::Sender<BehaviorEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BehaviorEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Silently drops it if there are no subscribers —
    /// an unobserved behavior event is not an error, just a missed
    /// scoring signal.
    pub fn publish(&self, event: BehaviorEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub type SharedReputationProvider = Arc<dyn ReputationProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_provider_returns_its_configured_score_for_any_peer() {
        let provider = StaticReputationProvider { score: 0.75 };
        assert_eq!(provider.get_score("any-peer"), 0.75);
        assert_eq!(provider.get_score("another"), 0.75);
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(BehaviorEvent::RouteFailure {
            peer_id: "peer-1".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.peer_id(), "peer-1");
        assert!(matches!(event, BehaviorEvent::RouteFailure { .. }));
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(BehaviorEvent::MessageDelivered {
            peer_id: "x".to_string(),
        });
    }
}
