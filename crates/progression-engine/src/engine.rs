//! The progression engine.
//!
//! One [`Engine`] owns the shared progression state behind a single
//! `RwLock`. Each mutation takes the write lock for its whole
//! check-and-commit unit, writes its batch to the [`Store`] and only then
//! swaps the new state in. Events go out after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use progression_tree::{ActiveModifier, Catalog, NodeId, ProgressionNode, TreeNode, PROGRESSION_RATE};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::accumulator::{self, ContributionBreakdown, EngagementOutcome, LeaderboardEntry};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::estimator::{self, UnlockEstimate};
use crate::events::{EventSink, NullSink};
use crate::gate::lock_reason;
use crate::identity::{DefaultIdentityResolver, IdentityResolver};
use crate::model::{Engagement, EngagementMetric, SessionId, UnlockRecord};
use crate::state::{Core, EngineState, Ledger, Rules, Tx};
use crate::status::{ProgressView, ProgressionStatus};
use crate::store::{Store, StoreOp};
use crate::velocity::{VelocityMetrics, DEFAULT_VELOCITY_DAYS};
use crate::voting::{SessionResolution, SessionView, VoteReceipt};

/// Metric type recorded for each counted vote.
pub const VOTE_METRIC: &str = "vote_cast";

/// Builder for [`Engine`].
pub struct EngineBuilder {
    catalog: Arc<Catalog>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    identity: Arc<dyn IdentityResolver>,
    config: EngineConfig,
}

impl EngineBuilder {
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn identity_resolver(mut self, identity: Arc<dyn IdentityResolver>) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Load persisted state, run first-boot setup and make sure a target
    /// or vote is in place.
    pub async fn open(self) -> Result<Engine> {
        let persisted = self.store.load()?;
        let now = self.clock.now_ms();
        let state = EngineState::restore(&self.catalog, &self.config, persisted, now);

        let engine = Engine {
            catalog: self.catalog,
            store: self.store,
            clock: self.clock,
            sink: self.sink,
            identity: self.identity,
            config: self.config,
            state: RwLock::new(state),
        };
        engine
            .mutate(|core, tx, _, rules| {
                core.initialize(tx, rules);
                core.advance(tx, rules)
            })
            .await?;
        Ok(engine)
    }
}

/// Shared progression engine. Wrap in an `Arc` to hand out.
pub struct Engine {
    catalog: Arc<Catalog>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    identity: Arc<dyn IdentityResolver>,
    config: EngineConfig,
    state: RwLock<EngineState>,
}

impl Engine {
    /// Start building an engine over `catalog` and `store`.
    pub fn builder(catalog: Arc<Catalog>, store: Arc<dyn Store>) -> EngineBuilder {
        EngineBuilder {
            catalog,
            store,
            clock: Arc::new(SystemClock),
            sink: Arc::new(NullSink),
            identity: Arc::new(DefaultIdentityResolver),
            config: EngineConfig::default(),
        }
    }

    /// Open an engine with the default sink and identity resolver.
    pub async fn open(
        catalog: Arc<Catalog>,
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        Self::builder(catalog, store)
            .clock(clock)
            .config(config)
            .open()
            .await
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Run one check-and-commit unit.
    ///
    /// `f` works on a copy of the core state. Its batch is persisted before
    /// the copy replaces the live state; on any error nothing changes.
    pub(crate) async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Core, &mut Tx, &Ledger, &Rules<'_>) -> Result<T>,
    ) -> Result<T> {
        let rules = Rules {
            catalog: &self.catalog,
            config: &self.config,
        };
        let (value, events) = {
            let mut state = self.state.write().await;
            let mut tx = Tx::new(self.clock.now_ms());
            let mut draft = state.core.clone();
            let value = f(&mut draft, &mut tx, &state.ledger, &rules)?;

            if !tx.batch.is_empty() {
                if let Err(e) = self.store.apply(&tx.batch) {
                    warn!(error = %e, ops = tx.batch.len(), "Progression write failed, state unchanged");
                    return Err(e.into());
                }
            }
            state.core = draft;
            state.ledger.absorb(&tx.batch, tx.now);
            (value, tx.events)
        };

        for event in events {
            self.sink.publish(event);
        }
        Ok(value)
    }

    /// Make sure a target or an open vote exists.
    pub async fn ensure_progress(&self) -> Result<()> {
        self.mutate(|core, tx, _, rules| core.advance(tx, rules)).await
    }

    // ---- Contribution accumulator ----

    /// Apply one engagement to the active progress.
    ///
    /// The score is `value × metric weight` scaled by the unlocked
    /// `progression_rate` modifiers. Crossing the target cost commits the
    /// unlock in the same critical section and moves on to the next target
    /// or vote.
    pub async fn record_engagement(&self, engagement: Engagement) -> Result<EngagementOutcome> {
        accumulator::validate(&engagement)?;
        let weight = self.config.weight_for(&engagement.metric_type);
        let base = accumulator::base_score(engagement.value, weight);

        self.mutate(move |core, tx, ledger, rules| {
            if let Some(id) = engagement.event_id.as_deref() {
                if ledger.dedupe.contains(id) {
                    debug!(event_id = id, actor = %engagement.actor, "Duplicate engagement ignored");
                    return Ok(EngagementOutcome::duplicate());
                }
            }
            let score = accumulator::to_points(rules.catalog.modified_value(
                PROGRESSION_RATE,
                base,
                &core.levels,
            ));

            let landed = core.accumulate(tx, score);
            tx.batch.push(StoreOp::AppendMetric(EngagementMetric {
                actor: engagement.actor.clone(),
                metric_type: engagement.metric_type.clone(),
                value: engagement.value,
                score,
                event_id: engagement.event_id.clone(),
                progress_id: landed.map(|(id, _)| id),
                recorded_at: tx.now,
            }));
            core.advance(tx, rules)?;

            debug!(
                actor = %engagement.actor,
                metric_type = %engagement.metric_type,
                value = engagement.value,
                score,
                accumulated = ?landed.map(|(_, a)| a),
                "Engagement recorded"
            );
            Ok(EngagementOutcome {
                score,
                progress_id: landed.map(|(id, _)| id),
                accumulated: landed.map(|(_, a)| a).unwrap_or(0),
                unlocked: tx.unlocked.first().cloned(),
                duplicate: false,
            })
        })
        .await
    }

    /// Record an engagement, logging instead of failing.
    pub async fn record_engagement_best_effort(&self, engagement: Engagement) {
        let actor = engagement.actor.clone();
        let metric_type = engagement.metric_type.clone();
        if let Err(e) = self.record_engagement(engagement).await {
            warn!(%actor, %metric_type, error = %e, "Failed to record engagement");
        }
    }

    /// Points accumulated toward the active progress.
    pub async fn engagement_score(&self) -> u64 {
        let state = self.state.read().await;
        state.core.active.as_ref().map_or(0, |p| p.accumulated)
    }

    pub async fn get_unlock_progress(&self) -> Option<ProgressView> {
        let state = self.state.read().await;
        let progress = state.core.active.as_ref()?;
        let name = progress
            .target
            .as_ref()
            .and_then(|t| self.catalog.get_node(t.node_id))
            .map(|n| n.name.clone());
        Some(ProgressView::new(progress, name))
    }

    pub async fn user_engagement(&self, actor: &str) -> ContributionBreakdown {
        self.state.read().await.ledger.contributors.breakdown(actor)
    }

    /// Top contributors; `limit` 0 means the default, capped at 100.
    pub async fn contribution_leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.state.read().await.ledger.contributors.leaderboard(limit)
    }

    pub async fn unlock_history(&self) -> Vec<UnlockRecord> {
        self.state.read().await.ledger.history.clone()
    }

    // ---- Voting ----

    /// Open a session over explicit candidates.
    pub async fn open_session(&self, candidates: &[NodeId]) -> Result<SessionView> {
        self.mutate(|core, tx, _, rules| {
            let view = core.open_session(tx, rules, candidates)?;
            core.advance(tx, rules)?;
            Ok(view)
        })
        .await
    }

    /// Open a session over a sample of eligible nodes.
    pub async fn start_voting(&self) -> Result<SessionView> {
        self.mutate(|core, tx, _, rules| {
            if let Some(target) = core.active.as_ref().and_then(|p| p.target.as_ref()) {
                return Err(Error::TargetInProgress(target.node_key.clone()));
            }
            let view = core
                .start_voting(tx, rules)?
                .ok_or(Error::NoEligibleNodes)?;
            core.advance(tx, rules)?;
            Ok(view)
        })
        .await
    }

    /// The open session with projected unlock times per option.
    pub async fn active_session(&self) -> Option<SessionView> {
        let state = self.state.read().await;
        let session = state.core.session.as_ref()?;
        let now = self.clock.now_ms();
        let velocity = state.ledger.daily.metrics(now, DEFAULT_VELOCITY_DAYS);

        let mut view = SessionView::from(session);
        for option in &mut view.options {
            let cost = self
                .catalog
                .get_node(option.node_id)
                .and_then(|n| n.cost_for_level(option.target_level));
            option.estimated_unlock_at =
                cost.and_then(|cost| estimator::project(now, cost, velocity.points_per_day));
        }
        Some(view)
    }

    /// Count a vote. Option indices are 0-based.
    pub async fn cast_vote(
        &self,
        session_id: SessionId,
        voter: &str,
        option_index: usize,
    ) -> Result<VoteReceipt> {
        self.mutate(|core, tx, _, _| core.cast_vote(tx, session_id, voter, option_index))
            .await
    }

    /// Vote in the open session on behalf of a platform user.
    ///
    /// A counted vote also earns a best-effort `vote_cast` engagement.
    pub async fn vote_for_unlock(
        &self,
        platform: &str,
        platform_id: &str,
        voter_identity: &str,
        option_index: usize,
    ) -> Result<VoteReceipt> {
        let voter = self
            .identity
            .resolve(platform, platform_id, voter_identity)?;

        let receipt = self
            .mutate(|core, tx, _, _| {
                let session_id = core
                    .session
                    .as_ref()
                    .map(|s| s.id)
                    .ok_or(Error::NoActiveSession)?;
                core.cast_vote(tx, session_id, &voter, option_index)
            })
            .await?;

        let engagement = Engagement::new(voter.clone(), VOTE_METRIC, 1)
            .with_event_id(format!("vote:{}:{}", receipt.session_id, voter));
        self.record_engagement_best_effort(engagement).await;
        Ok(receipt)
    }

    /// Close a session and target its winner.
    pub async fn close_session(&self, session_id: SessionId) -> Result<SessionResolution> {
        self.mutate(|core, tx, _, rules| {
            let resolution = core.close_session(tx, rules, session_id)?;
            core.advance(tx, rules)?;
            Ok(resolution)
        })
        .await
    }

    /// Close the open session if its voting window has ended.
    pub async fn close_expired_session(&self) -> Result<Option<SessionResolution>> {
        let now = self.clock.now_ms();
        {
            let state = self.state.read().await;
            match &state.core.session {
                Some(session) if session.closes_at <= now => {}
                _ => return Ok(None),
            }
        }

        self.mutate(|core, tx, _, rules| {
            let session_id = match &core.session {
                Some(session) if session.closes_at <= tx.now => session.id,
                _ => return Ok(None),
            };
            let resolution = core.close_session(tx, rules, session_id)?;
            core.advance(tx, rules)?;
            Ok(Some(resolution))
        })
        .await
    }

    // ---- Estimation ----

    /// Project when `node_key` unlocks if it is the active target.
    pub async fn estimate_unlock_time(&self, node_key: &str) -> Result<UnlockEstimate> {
        let node = self
            .catalog
            .get_by_key(node_key)
            .ok_or_else(|| Error::NodeNotFound(node_key.to_string()))?;

        let state = self.state.read().await;
        let progress = state
            .core
            .active
            .as_ref()
            .filter(|p| p.target.as_ref().is_some_and(|t| t.node_id == node.id))
            .ok_or_else(|| Error::NoActiveProgress(node_key.to_string()))?;

        let now = self.clock.now_ms();
        let trend = state.ledger.daily.metrics(now, DEFAULT_VELOCITY_DAYS).trend;
        estimator::estimate(progress, now, self.config.min_sample_hours, trend)
            .ok_or_else(|| Error::NoActiveProgress(node_key.to_string()))
    }

    /// Daily velocity over the last `days` days (0 means 7).
    pub async fn engagement_velocity(&self, days: u32) -> VelocityMetrics {
        let now = self.clock.now_ms();
        self.state.read().await.ledger.daily.metrics(now, days)
    }

    // ---- Feature gate ----

    pub async fn is_feature_unlocked(&self, feature_key: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(self
            .catalog
            .is_feature_unlocked(feature_key, &state.core.levels))
    }

    /// Nodes still blocking `feature_key`, in catalog order.
    pub async fn required_nodes(&self, feature_key: &str) -> Result<Vec<ProgressionNode>> {
        let state = self.state.read().await;
        Ok(self
            .catalog
            .required_nodes(feature_key, &state.core.levels)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Whether `node_key` is unlocked to at least `level`.
    pub async fn is_node_unlocked(&self, node_key: &str, level: u32) -> Result<bool> {
        let node = self
            .catalog
            .get_by_key(node_key)
            .ok_or_else(|| Error::NodeNotFound(node_key.to_string()))?;
        let state = self.state.read().await;
        Ok(state.core.level(node.id) >= level.max(1))
    }

    /// Gate several features against one consistent snapshot.
    pub async fn are_features_unlocked(&self, feature_keys: &[&str]) -> HashMap<String, bool> {
        let state = self.state.read().await;
        feature_keys
            .iter()
            .map(|key| {
                (
                    key.to_string(),
                    self.catalog.is_feature_unlocked(key, &state.core.levels),
                )
            })
            .collect()
    }

    /// "locked because of: A, B", or `None` when the feature is open.
    pub async fn locked_message(&self, feature_key: &str) -> Result<Option<String>> {
        let required = self.required_nodes(feature_key).await?;
        Ok(lock_reason(&required))
    }

    /// Whether the `item_<name>` node is unlocked.
    pub async fn is_item_unlocked(&self, item_name: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(self.catalog.is_item_unlocked(item_name, &state.core.levels))
    }

    /// Gate several items against one consistent snapshot.
    pub async fn are_items_unlocked(&self, item_names: &[&str]) -> HashMap<String, bool> {
        let state = self.state.read().await;
        item_names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    self.catalog.is_item_unlocked(name, &state.core.levels),
                )
            })
            .collect()
    }

    // ---- Modifiers ----

    /// `base` with every unlocked modifier for `feature_key` stacked on top.
    pub async fn modified_value(&self, feature_key: &str, base: f64) -> f64 {
        let state = self.state.read().await;
        self.catalog
            .modified_value(feature_key, base, &state.core.levels)
    }

    /// Modifiers configured for `feature_key` with their current levels.
    pub async fn modifiers_for_feature(&self, feature_key: &str) -> Vec<ActiveModifier> {
        let state = self.state.read().await;
        self.catalog.modifiers_for(feature_key, &state.core.levels)
    }

    // ---- Tree and status ----

    pub async fn progression_tree(&self) -> Vec<TreeNode> {
        let state = self.state.read().await;
        self.catalog.tree(&state.core.levels)
    }

    pub async fn status(&self) -> ProgressionStatus {
        let progress = self.get_unlock_progress().await;
        let session = self.active_session().await;

        let state = self.state.read().await;
        let levels = &state.core.levels;
        ProgressionStatus {
            total_unlocked: self.catalog.total_unlocked(levels),
            total_nodes: self.catalog.len(),
            all_nodes_unlocked: self.catalog.all_maxed(levels),
            contribution_score: state.core.active.as_ref().map_or(0, |p| p.accumulated),
            is_transitioning: session.is_some()
                && progress.as_ref().is_some_and(|p| p.node_key.is_none()),
            active_session: session,
            unlock_progress: progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, HOUR_MS};
    use crate::estimator::Confidence;
    use crate::events::{ProgressionEvent, RecordingSink};
    use crate::store::MemoryStore;
    use progression_tree::load_tree_str;

    const TREE: &str = r#"{ "nodes": [
        { "key": "forge_1", "name": "Forge", "costs": [100] },
        { "key": "forge_2", "name": "Great Forge", "prerequisites": ["forge_1"], "costs": [200],
          "features": ["feature_compost"] },
        { "key": "bank", "name": "Bank", "costs": [300] }
    ] }"#;

    struct Harness {
        engine: Engine,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        sink: Arc<RecordingSink>,
    }

    async fn harness(config: EngineConfig) -> Harness {
        harness_with(TREE, config).await
    }

    async fn harness_with(tree: &str, config: EngineConfig) -> Harness {
        let catalog = Arc::new(load_tree_str(tree).unwrap());
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::new());
        let engine = Engine::builder(catalog, store.clone())
            .clock(clock.clone())
            .event_sink(sink.clone())
            .config(config)
            .open()
            .await
            .unwrap();
        Harness {
            engine,
            clock,
            store,
            sink,
        }
    }

    /// Close the opening vote on `forge_1` (index 0).
    async fn target_forge(h: &Harness) {
        let session = h.engine.active_session().await.unwrap();
        h.engine.cast_vote(session.id, "u1", 0).await.unwrap();
        let resolution = h.engine.close_session(session.id).await.unwrap();
        assert_eq!(resolution.target.unwrap().node_key, "forge_1");
    }

    #[tokio::test]
    async fn boot_opens_vote_over_eligible_nodes() {
        let h = harness(EngineConfig::default()).await;
        let session = h.engine.active_session().await.unwrap();
        let keys: Vec<_> = session.options.iter().map(|o| o.node_key.as_str()).collect();
        assert_eq!(keys, vec!["forge_1", "bank"]);

        let status = h.engine.status().await;
        assert!(status.is_transitioning);
        assert_eq!(status.total_nodes, 3);
        assert_eq!(status.unlock_progress.unwrap().completion_percent, 0);
    }

    #[tokio::test]
    async fn crossing_threshold_unlocks_once_and_resets_counter() {
        let h = harness(EngineConfig::default()).await;
        target_forge(&h).await;

        h.engine
            .record_engagement(Engagement::new("a", "message", 90))
            .await
            .unwrap();
        let outcome = h
            .engine
            .record_engagement(Engagement::new("b", "message", 15))
            .await
            .unwrap();

        let record = outcome.unlocked.unwrap();
        assert_eq!(record.node_key, "forge_1");
        assert_eq!(record.contributions, 105);
        assert_eq!(h.sink.unlock_count("forge_1"), 1);
        assert!(h.engine.is_node_unlocked("forge_1", 1).await.unwrap());

        // A new vote is open and its counter starts at zero.
        let progress = h.engine.get_unlock_progress().await.unwrap();
        assert_eq!(progress.accumulated, 0);
        assert!(progress.node_key.is_none());
        assert!(h.engine.active_session().await.is_some());
    }

    #[tokio::test]
    async fn metric_weights_scale_score() {
        let h = harness(EngineConfig::default()).await;
        let outcome = h
            .engine
            .record_engagement(Engagement::new("a", "item_crafted", 5))
            .await
            .unwrap();
        assert_eq!(outcome.score, 15);
        assert_eq!(h.engine.engagement_score().await, 15);
        assert_eq!(h.engine.user_engagement("a").await.total_score, 15);
    }

    #[tokio::test]
    async fn duplicate_event_id_is_not_counted() {
        let h = harness(EngineConfig::default()).await;
        let e = Engagement::new("a", "message", 10).with_event_id("evt-1");
        assert!(!h.engine.record_engagement(e.clone()).await.unwrap().duplicate);
        assert!(h.engine.record_engagement(e).await.unwrap().duplicate);
        assert_eq!(h.engine.engagement_score().await, 10);
    }

    #[tokio::test]
    async fn store_failure_leaves_counter_untouched() {
        let h = harness(EngineConfig::default()).await;
        target_forge(&h).await;

        h.store.fail_next_writes(1);
        let err = h
            .engine
            .record_engagement(Engagement::new("a", "message", 150))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.engine.engagement_score().await, 0);
        assert!(!h.engine.is_node_unlocked("forge_1", 1).await.unwrap());

        let outcome = h
            .engine
            .record_engagement(Engagement::new("a", "message", 150))
            .await
            .unwrap();
        assert!(outcome.unlocked.is_some());
    }

    #[tokio::test]
    async fn vote_for_unlock_records_engagement() {
        let h = harness(EngineConfig::default()).await;
        let receipt = h
            .engine
            .vote_for_unlock("discord", "42", "", 1)
            .await
            .unwrap();
        assert_eq!(receipt.voter, "discord:42");
        assert_eq!(receipt.node_key, "bank");

        let again = h.engine.vote_for_unlock("discord", "42", "", 0).await;
        assert!(matches!(again, Err(Error::AlreadyVoted { .. })));

        let breakdown = h.engine.user_engagement("discord:42").await;
        assert_eq!(breakdown.by_metric[VOTE_METRIC].events, 1);
    }

    #[tokio::test]
    async fn expired_session_closes_on_schedule() {
        let h = harness(EngineConfig::default().with_voting_duration_ms(HOUR_MS)).await;
        assert!(h.engine.close_expired_session().await.unwrap().is_none());

        h.clock.advance(HOUR_MS);
        let resolution = h.engine.close_expired_session().await.unwrap().unwrap();
        // No votes: first option in catalog order.
        assert_eq!(resolution.target.unwrap().node_key, "forge_1");
        assert!(h
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, ProgressionEvent::SessionClosed { .. })));
    }

    #[tokio::test]
    async fn estimate_requires_active_target() {
        let h = harness(EngineConfig::default()).await;
        assert!(matches!(
            h.engine.estimate_unlock_time("forge_1").await,
            Err(Error::NoActiveProgress(_))
        ));
        assert!(matches!(
            h.engine.estimate_unlock_time("nope").await,
            Err(Error::NodeNotFound(_))
        ));

        target_forge(&h).await;
        let estimate = h.engine.estimate_unlock_time("forge_1").await.unwrap();
        assert_eq!(estimate.estimated_days, None);
        assert_eq!(estimate.confidence, Confidence::Low);

        h.engine
            .record_engagement(Engagement::new("a", "message", 25))
            .await
            .unwrap();
        h.clock.advance(12 * HOUR_MS);
        let estimate = h.engine.estimate_unlock_time("forge_1").await.unwrap();
        assert_eq!(estimate.velocity_per_day, 50.0);
        assert_eq!(estimate.estimated_days, Some(1.5));
        assert_eq!(estimate.confidence, Confidence::Medium);
    }

    #[tokio::test]
    async fn estimate_counts_points_banked_during_vote() {
        let h = harness(EngineConfig::default()).await;
        h.engine
            .record_engagement(Engagement::new("a", "message", 50))
            .await
            .unwrap();
        h.clock.advance(24 * HOUR_MS);
        target_forge(&h).await;
        h.clock.advance(HOUR_MS);

        let estimate = h.engine.estimate_unlock_time("forge_1").await.unwrap();
        assert_eq!(estimate.accumulated, 50);
        assert_eq!(estimate.elapsed_hours, 25.0);
        assert!((estimate.velocity_per_day - 48.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn oversized_values_are_rejected_and_totals_saturate() {
        let h = harness(EngineConfig::default().with_metric_weight("burst", f64::MAX)).await;
        assert!(matches!(
            h.engine
                .record_engagement(Engagement::new("a", "message", u64::MAX))
                .await,
            Err(Error::InvalidEngagement(_))
        ));

        let max = crate::accumulator::MAX_ENGAGEMENT_VALUE;
        for _ in 0..2 {
            h.engine
                .record_engagement(Engagement::new("a", "burst", max))
                .await
                .unwrap();
        }
        assert_eq!(h.engine.engagement_score().await, u64::MAX);
        assert_eq!(h.engine.user_engagement("a").await.total_score, u64::MAX);
        assert_eq!(h.engine.engagement_velocity(1).await.total_points, u64::MAX);
    }

    const RATE_TREE: &str = r#"{ "nodes": [
        { "key": "forge_1", "name": "Forge", "costs": [1000] },
        { "key": "study_1", "name": "Study", "type": "upgrade", "costs": [10, 10, 10],
          "modifier_config": { "feature_key": "progression_rate", "base_value": 1.0,
                               "per_level_value": 0.5 } },
        { "key": "study_2", "name": "Deep Study", "type": "upgrade", "costs": [10, 10, 10],
          "modifier_config": { "feature_key": "progression_rate", "base_value": 1.0,
                               "per_level_value": 0.5 } },
        { "key": "item_lantern", "name": "Lantern", "costs": [10] }
    ] }"#;

    #[tokio::test]
    async fn progression_rate_modifiers_stack_into_scores() {
        let h = harness_with(RATE_TREE, EngineConfig::default()).await;
        let plain = h
            .engine
            .record_engagement(Engagement::new("a", "message", 100))
            .await
            .unwrap();
        assert_eq!(plain.score, 100);
        assert_eq!(h.engine.modified_value(PROGRESSION_RATE, 100.0).await, 100.0);

        h.engine.admin_unlock("study_1", 1).await.unwrap();
        h.engine.admin_unlock("study_2", 2).await.unwrap();
        // (1.0 + 0.5) then (1.0 + 0.5 × 2)
        assert_eq!(h.engine.modified_value(PROGRESSION_RATE, 100.0).await, 300.0);
        let levels: Vec<_> = h
            .engine
            .modifiers_for_feature(PROGRESSION_RATE)
            .await
            .iter()
            .map(|m| (m.node_key.clone(), m.level))
            .collect();
        assert_eq!(levels, vec![("study_1".into(), 1), ("study_2".into(), 2)]);

        let boosted = h
            .engine
            .record_engagement(Engagement::new("a", "message", 100))
            .await
            .unwrap();
        assert_eq!(boosted.score, 300);
        assert_eq!(h.engine.user_engagement("a").await.total_score, 400);
    }

    #[tokio::test]
    async fn items_gate_on_their_nodes() {
        let h = harness_with(RATE_TREE, EngineConfig::default()).await;
        assert!(!h.engine.is_item_unlocked("lantern").await.unwrap());

        h.engine.admin_unlock("item_lantern", 1).await.unwrap();
        assert!(h.engine.is_item_unlocked("lantern").await.unwrap());
        let items = h.engine.are_items_unlocked(&["lantern", "rope"]).await;
        assert!(items["lantern"]);
        assert!(!items["rope"]);
    }

    #[tokio::test]
    async fn gate_reports_required_nodes_and_message() {
        let h = harness(EngineConfig::default()).await;
        assert!(!h.engine.is_feature_unlocked("feature_compost").await.unwrap());
        let required: Vec<_> = h
            .engine
            .required_nodes("feature_compost")
            .await
            .unwrap()
            .into_iter()
            .map(|n| n.key)
            .collect();
        assert_eq!(required, vec!["forge_1", "forge_2"]);
        assert_eq!(
            h.engine.locked_message("feature_compost").await.unwrap().unwrap(),
            "locked because of: Forge, Great Forge"
        );
        assert!(h.engine.is_feature_unlocked("feature_free").await.unwrap());
        assert_eq!(h.engine.locked_message("feature_free").await.unwrap(), None);
    }
}
