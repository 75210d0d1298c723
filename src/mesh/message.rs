//! Mesh message envelope and delivery state machine (§4.6).
//! Decoupled from the wire frame: `MeshMessage` is what the dispatcher
//! queues and routes, `wire::FrameHeader`/`encode_body` is what the session
//! layer puts on the air once a destination link is chosen.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::wire::Priority;

/// `Queued -> Dispatched -> {Acked | Retrying | Failed}`. Broadcasts skip
/// straight to `Dispatched` after each outbound attempt; directed messages
/// wait for a hop-by-hop link ack before reaching `Acked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageState {
    Queued,
    Dispatched,
    Acked,
    Retrying,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshMessage {
    pub message_id: String,
    pub sender_id: String,
    /// `None` for a broadcast/flood message; `Some(peer_id)` for a directed one.
    pub receiver_id: Option<String>,
    pub priority: Priority,
    pub ttl: u16,
    pub hop_count: u16,
    /// Node ids this message has already traversed, for loop suppression.
    pub visited_nodes: HashSet<String>,
    pub payload: Vec<u8>,
    #[serde(skip)]
    pub state: MessageState,
    #[serde(skip)]
    pub retries: u32,
}

impl MeshMessage {
    pub fn new_broadcast(sender_id: String, priority: Priority, ttl: u16, payload: Vec<u8>) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            sender_id,
            receiver_id: None,
            priority,
            ttl,
            hop_count: 0,
            visited_nodes: HashSet::new(),
            payload,
            state: MessageState::Queued,
            retries: 0,
        }
    }

    pub fn new_directed(
        sender_id: String,
        receiver_id: String,
        priority: Priority,
        ttl: u16,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            sender_id,
            receiver_id: Some(receiver_id),
            priority,
            ttl,
            hop_count: 0,
            visited_nodes: HashSet::new(),
            payload,
            state: MessageState::Queued,
            retries: 0,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.receiver_id.is_none()
    }

    /// A message may be forwarded only if it has hops remaining and the
    /// local node hasn't already carried it.
    pub fn can_forward(&self, local_node_id: &str) -> bool {
        self.hop_count < self.ttl && !self.visited_nodes.contains(local_node_id)
    }

    /// Records this node as a hop: adds it to `visited_nodes` and
    /// increments `hop_count`. Called once, immediately before dispatch.
    pub fn mark_forwarded(&mut self, local_node_id: &str) {
        self.visited_nodes.insert(local_node_id.to_string());
        self.hop_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_has_no_receiver_and_directed_does() {
        let b = MeshMessage::new_broadcast("s".into(), Priority::Normal, 6, vec![1]);
        assert!(b.is_broadcast());

        let d = MeshMessage::new_directed("s".into(), "r".into(), Priority::Normal, 6, vec![1]);
        assert!(!d.is_broadcast());
    }

    #[test]
    fn cannot_forward_past_ttl_or_through_a_visited_node() {
        let mut msg = MeshMessage::new_broadcast("s".into(), Priority::Normal, 1, vec![]);
        assert!(msg.can_forward("a"));
        msg.mark_forwarded("a");
        assert!(!msg.can_forward("a"));
        assert!(!msg.can_forward("b"));
    }
}
