//! Presentation views.

use serde::Serialize;

use crate::model::{ProgressId, SessionId, UnlockProgress};
use crate::voting::SessionView;

/// The active progress as shown to users.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    pub progress_id: ProgressId,
    pub node_key: Option<String>,
    pub node_name: Option<String>,
    pub target_level: Option<u32>,
    pub accumulated: u64,
    pub cost: Option<u64>,
    /// Rounded, 0 while voting.
    pub completion_percent: u32,
    pub started_at: u64,
    pub target_set_at: Option<u64>,
    pub session_id: Option<SessionId>,
}

impl ProgressView {
    pub(crate) fn new(progress: &UnlockProgress, node_name: Option<String>) -> Self {
        let target = progress.target.as_ref();
        Self {
            progress_id: progress.id,
            node_key: target.map(|t| t.node_key.clone()),
            node_name,
            target_level: target.map(|t| t.level),
            accumulated: progress.accumulated,
            cost: target.map(|t| t.cost),
            completion_percent: progress.completion_percent(),
            started_at: progress.started_at,
            target_set_at: progress.target_set_at,
            session_id: progress.session_id,
        }
    }
}

/// Overall progression snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressionStatus {
    pub total_unlocked: usize,
    pub total_nodes: usize,
    pub all_nodes_unlocked: bool,
    /// Points accumulated toward the active progress.
    pub contribution_score: u64,
    pub active_session: Option<SessionView>,
    pub unlock_progress: Option<ProgressView>,
    /// A vote is running and no target is selected.
    pub is_transitioning: bool,
}
