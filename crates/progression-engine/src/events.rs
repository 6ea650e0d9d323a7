//! Progression events.
//!
//! Published after each committed change, once the state lock is released.

use serde::Serialize;
use std::sync::Mutex;

use crate::model::{ProgressId, SessionId, UnlockSource, VotingOption};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressionEvent {
    SessionOpened {
        session_id: SessionId,
        options: Vec<VotingOption>,
        closes_at: u64,
    },
    VoteCast {
        session_id: SessionId,
        option_index: usize,
        node_key: String,
        votes: u64,
    },
    SessionClosed {
        session_id: SessionId,
        winner: Option<String>,
        total_votes: u64,
    },
    TargetSet {
        progress_id: ProgressId,
        node_key: String,
        level: u32,
        cost: u64,
    },
    NodeUnlocked {
        node_key: String,
        level: u32,
        source: UnlockSource,
        contributions: u64,
    },
    NodeRelocked {
        node_key: String,
        level: u32,
    },
    ProgressionReset {
        reason: String,
    },
    TreeCompleted,
}

/// Receiver for [`ProgressionEvent`]s.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ProgressionEvent);
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: ProgressionEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ProgressionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far.
    pub fn events(&self) -> Vec<ProgressionEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of `NodeUnlocked` events for `node_key`.
    pub fn unlock_count(&self, node_key: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, ProgressionEvent::NodeUnlocked { node_key: k, .. } if k == node_key))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, event: ProgressionEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(ProgressionEvent::NodeRelocked {
            node_key: "forge_1".into(),
            level: 0,
        })
        .unwrap();
        assert_eq!(json["type"], "node_relocked");
        assert_eq!(json["node_key"], "forge_1");

        let json = serde_json::to_value(ProgressionEvent::TreeCompleted).unwrap();
        assert_eq!(json["type"], "tree_completed");
    }

    #[test]
    fn recording_sink_counts_unlocks() {
        let sink = RecordingSink::new();
        sink.publish(ProgressionEvent::NodeUnlocked {
            node_key: "forge_1".into(),
            level: 1,
            source: UnlockSource::Contribution,
            contributions: 105,
        });
        sink.publish(ProgressionEvent::TreeCompleted);
        assert_eq!(sink.unlock_count("forge_1"), 1);
        assert_eq!(sink.unlock_count("forge_2"), 0);
        assert_eq!(sink.events().len(), 2);
    }
}
