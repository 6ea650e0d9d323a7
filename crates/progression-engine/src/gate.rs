//! Capability interfaces for feature modules.
//!
//! A feature module (minigame, crafting, expeditions, ...) only needs two
//! things from the engine: ask whether its feature is open, and report
//! engagement after a successful action. The engine knows nothing about
//! which modules exist.

use std::future::Future;

use progression_tree::ProgressionNode;
use tracing::warn;

use crate::engine::Engine;
use crate::error::Result;
use crate::model::Engagement;

/// Gate check consulted before a gated action.
pub trait FeatureGate: Send + Sync {
    fn is_feature_unlocked(&self, feature_key: &str) -> impl Future<Output = Result<bool>> + Send;

    fn required_nodes(
        &self,
        feature_key: &str,
    ) -> impl Future<Output = Result<Vec<ProgressionNode>>> + Send;

    /// Fail-closed check: any error counts as locked.
    fn allows(&self, feature_key: &str) -> impl Future<Output = bool> + Send {
        async move {
            match self.is_feature_unlocked(feature_key).await {
                Ok(unlocked) => unlocked,
                Err(e) => {
                    warn!(feature = feature_key, error = %e, "Feature gate check failed, treating as locked");
                    false
                }
            }
        }
    }
}

/// "locked because of: A, B" from the display names of blocking nodes,
/// `None` when nothing blocks.
pub fn lock_reason(required: &[ProgressionNode]) -> Option<String> {
    if required.is_empty() {
        return None;
    }
    let names: Vec<&str> = required.iter().map(|n| n.name.as_str()).collect();
    Some(format!("locked because of: {}", names.join(", ")))
}

/// Fire-and-forget engagement reporting.
pub trait EngagementRecorder: Send + Sync {
    fn record(&self, engagement: Engagement) -> impl Future<Output = ()> + Send;
}

impl FeatureGate for Engine {
    fn is_feature_unlocked(&self, feature_key: &str) -> impl Future<Output = Result<bool>> + Send {
        Engine::is_feature_unlocked(self, feature_key)
    }

    fn required_nodes(
        &self,
        feature_key: &str,
    ) -> impl Future<Output = Result<Vec<ProgressionNode>>> + Send {
        Engine::required_nodes(self, feature_key)
    }
}

impl EngagementRecorder for Engine {
    fn record(&self, engagement: Engagement) -> impl Future<Output = ()> + Send {
        self.record_engagement_best_effort(engagement)
    }
}
