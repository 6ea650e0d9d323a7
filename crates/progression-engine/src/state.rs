//! Progression state machine.
//!
//! [`Core`] is the mutable progression state: unlocked levels, the active
//! progress and the open session. Every transition records its writes and
//! events in a [`Tx`]; the engine persists the batch before swapping the
//! mutated copy in, so a failed write leaves the live state untouched.
//!
//! ```text
//! NoSession ──start_voting──▶ Open ──close──▶ target set ──threshold──▶ unlocked
//!     ▲                                                                   │
//!     └───────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use progression_tree::{level_of, Catalog, NodeId, ProgressionNode, UnlockedLevels};
use tracing::{debug, info, warn};

use crate::accumulator::{Contributors, DedupeWindow};
use crate::config::{EngineConfig, RetargetPolicy};
use crate::error::{Error, Result};
use crate::events::ProgressionEvent;
use crate::model::{
    EngagementMetric, ProgressId, SessionId, SessionStatus, Target, UnlockProgress, UnlockRecord,
    UnlockSource, VotingOption, VotingSession,
};
use crate::store::{PersistedState, StoreBatch, StoreOp};
use crate::velocity::DailyHistogram;
use crate::voting::{resolve_winner, sample_candidates, SessionResolution, SessionView, VoteReceipt};

/// Read-only inputs to every transition.
pub(crate) struct Rules<'a> {
    pub catalog: &'a Catalog,
    pub config: &'a EngineConfig,
}

/// Writes and events produced by one transition.
pub(crate) struct Tx {
    pub now: u64,
    pub batch: StoreBatch,
    pub events: Vec<ProgressionEvent>,
    pub unlocked: Vec<UnlockRecord>,
}

impl Tx {
    pub fn new(now: u64) -> Self {
        Self {
            now,
            batch: StoreBatch::new(),
            events: Vec::new(),
            unlocked: Vec::new(),
        }
    }

    fn put(&mut self, op: StoreOp) {
        self.batch.push(op);
    }

    fn emit(&mut self, event: ProgressionEvent) {
        self.events.push(event);
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Core {
    pub initialized: bool,
    pub levels: UnlockedLevels,
    pub active: Option<UnlockProgress>,
    pub session: Option<VotingSession>,
    pub next_progress_id: u64,
    pub next_session_id: u64,
    /// Node unlocked by the last commit, for same-node retargeting.
    pub last_unlocked: Option<NodeId>,
}

/// Append-only aggregates derived from committed batches.
#[derive(Debug)]
pub(crate) struct Ledger {
    pub dedupe: DedupeWindow,
    pub daily: DailyHistogram,
    pub contributors: Contributors,
    pub history: Vec<UnlockRecord>,
}

impl Ledger {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            dedupe: DedupeWindow::new(config.dedupe_window),
            daily: DailyHistogram::new(config.velocity_retention_days),
            contributors: Contributors::default(),
            history: Vec::new(),
        }
    }

    fn record_metric(&mut self, metric: &EngagementMetric) {
        if let Some(id) = &metric.event_id {
            self.dedupe.insert(id);
        }
        self.daily.record(metric.recorded_at, metric.score);
        self.contributors.record(metric);
    }

    /// Fold a committed batch into the aggregates.
    pub fn absorb(&mut self, batch: &StoreBatch, now: u64) {
        for op in batch.ops() {
            match op {
                StoreOp::AppendMetric(metric) => self.record_metric(metric),
                StoreOp::AppendUnlock(record) => self.history.push(record.clone()),
                _ => {}
            }
        }
        self.daily.prune(now);
    }
}

/// Everything behind the engine lock.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub core: Core,
    pub ledger: Ledger,
}

impl EngineState {
    /// Rebuild state from storage, re-binding node ids by key.
    pub fn restore(
        catalog: &Catalog,
        config: &EngineConfig,
        persisted: PersistedState,
        now: u64,
    ) -> Self {
        let mut levels = BTreeMap::new();
        for (key, level) in persisted.levels {
            match catalog.get_by_key(&key) {
                Some(node) => {
                    levels.insert(node.id, level.min(node.max_level));
                }
                None => warn!(node_key = %key, "Dropping unlock state for node missing from tree"),
            }
        }

        let next_progress_id = persisted
            .progresses
            .iter()
            .map(|p| p.id.0 + 1)
            .max()
            .unwrap_or(1);
        let mut active = persisted
            .progresses
            .into_iter()
            .filter(|p| p.retired_at.is_none())
            .max_by_key(|p| p.id);
        if let Some(progress) = active.as_mut() {
            if let Some(target) = progress.target.as_mut() {
                match catalog.get_by_key(&target.node_key) {
                    Some(node) => target.node_id = node.id,
                    None => {
                        warn!(node_key = %target.node_key, "Active target missing from tree, reverting to vote");
                        progress.target = None;
                        progress.target_set_at = None;
                    }
                }
            }
        }

        let next_session_id = persisted
            .sessions
            .iter()
            .map(|s| s.id.0 + 1)
            .max()
            .unwrap_or(1);
        let mut session = persisted
            .sessions
            .into_iter()
            .filter(VotingSession::is_open)
            .max_by_key(|s| s.id);
        if let Some(session) = session.as_mut() {
            for option in &mut session.options {
                option.node_id = catalog
                    .get_by_key(&option.node_key)
                    .map(|n| n.id)
                    .unwrap_or(NodeId(0));
            }
        }

        let mut ledger = Ledger::new(config);
        for metric in &persisted.metrics {
            ledger.record_metric(metric);
        }
        ledger.daily.prune(now);
        // Only committed targets feed the same-node policy.
        let last_unlocked = persisted
            .unlocks
            .iter()
            .rev()
            .find(|r| matches!(r.source, UnlockSource::Contribution | UnlockSource::Instant))
            .and_then(|r| catalog.get_by_key(&r.node_key))
            .map(|n| n.id);
        ledger.history = persisted.unlocks;

        info!(
            unlocked = levels.len(),
            active_progress = ?active.as_ref().map(|p| p.id),
            open_session = ?session.as_ref().map(|s| s.id),
            metrics = persisted.metrics.len(),
            "Restored progression state"
        );

        Self {
            core: Core {
                initialized: persisted.initialized,
                levels,
                active,
                session,
                next_progress_id,
                next_session_id,
                last_unlocked,
            },
            ledger,
        }
    }
}

impl Core {
    pub fn level(&self, id: NodeId) -> u32 {
        level_of(&self.levels, id)
    }

    fn set_level(&mut self, tx: &mut Tx, node: &ProgressionNode, level: u32) {
        if level == 0 {
            self.levels.remove(&node.id);
        } else {
            self.levels.insert(node.id, level);
        }
        tx.put(StoreOp::SetLevel {
            node_key: node.key.clone(),
            level,
        });
    }

    fn put_active(&self, tx: &mut Tx) {
        if let Some(progress) = &self.active {
            tx.put(StoreOp::PutProgress(progress.clone()));
        }
    }

    fn new_progress(&mut self, now: u64) -> UnlockProgress {
        let id = ProgressId(self.next_progress_id);
        self.next_progress_id += 1;
        UnlockProgress::new(id, now)
    }

    /// Add points to the active progress.
    ///
    /// Returns where they landed, `None` when nothing is active.
    pub fn accumulate(&mut self, tx: &mut Tx, score: u64) -> Option<(ProgressId, u64)> {
        let progress = self.active.as_mut()?;
        progress.accumulated = progress.accumulated.saturating_add(score);
        let landed = (progress.id, progress.accumulated);
        if score > 0 {
            self.put_active(tx);
        }
        Some(landed)
    }

    /// Mark first-boot setup done, unlocking auto-unlock nodes.
    pub fn initialize(&mut self, tx: &mut Tx, rules: &Rules<'_>) {
        if self.initialized {
            return;
        }
        self.apply_auto_unlocks(tx, rules);
        self.initialized = true;
        tx.put(StoreOp::MarkInitialized);
    }

    pub fn apply_auto_unlocks(&mut self, tx: &mut Tx, rules: &Rules<'_>) {
        for node in rules.catalog.auto_unlock_nodes() {
            if self.level(node.id) > 0 {
                continue;
            }
            self.set_level(tx, node, 1);
            self.record_unlock(tx, node, 1, UnlockSource::AutoUnlock, None, 0);
            info!(node_key = %node.key, "Auto-unlocked node");
        }
    }

    fn record_unlock(
        &mut self,
        tx: &mut Tx,
        node: &ProgressionNode,
        level: u32,
        source: UnlockSource,
        progress_id: Option<ProgressId>,
        contributions: u64,
    ) -> UnlockRecord {
        let record = UnlockRecord {
            node_id: node.id,
            node_key: node.key.clone(),
            level,
            source,
            progress_id,
            contributions,
            unlocked_at: tx.now,
        };
        tx.put(StoreOp::AppendUnlock(record.clone()));
        tx.emit(ProgressionEvent::NodeUnlocked {
            node_key: node.key.clone(),
            level,
            source,
            contributions,
        });
        tx.unlocked.push(record.clone());
        record
    }

    /// Set a node's level directly, recording an unlock when it rises.
    pub fn force_level(
        &mut self,
        tx: &mut Tx,
        node: &ProgressionNode,
        level: u32,
        source: UnlockSource,
    ) {
        let current = self.level(node.id);
        self.set_level(tx, node, level);
        if level > current {
            self.record_unlock(tx, node, level, source, None, 0);
        } else if level < current {
            tx.emit(ProgressionEvent::NodeRelocked {
                node_key: node.key.clone(),
                level,
            });
        }
    }

    /// Open a session over `candidates`.
    ///
    /// With a single candidate and auto-select on, the session is resolved
    /// immediately and the returned view is already closed.
    pub fn open_session(
        &mut self,
        tx: &mut Tx,
        rules: &Rules<'_>,
        candidates: &[NodeId],
    ) -> Result<SessionView> {
        if let Some(session) = &self.session {
            return Err(Error::SessionAlreadyOpen(session.id));
        }
        if let Some(target) = self.active.as_ref().and_then(|p| p.target.as_ref()) {
            return Err(Error::TargetInProgress(target.node_key.clone()));
        }

        let mut candidates = candidates.to_vec();
        candidates.sort_unstable();
        candidates.dedup();
        if candidates.is_empty() {
            return Err(Error::NoEligibleNodes);
        }

        let mut options = Vec::with_capacity(candidates.len());
        for id in candidates {
            let node = rules
                .catalog
                .get_node(id)
                .ok_or_else(|| Error::NodeNotFound(id.to_string()))?;
            if !rules.catalog.is_eligible(node, &self.levels) {
                return Err(Error::IneligibleCandidate(node.key.clone()));
            }
            options.push(VotingOption {
                node_id: node.id,
                node_key: node.key.clone(),
                node_name: node.name.clone(),
                target_level: self.level(node.id) + 1,
                votes: 0,
                estimated_unlock_at: None,
            });
        }

        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        let session = VotingSession {
            id,
            status: SessionStatus::Open,
            options,
            opened_at: tx.now,
            closes_at: tx.now.saturating_add(rules.config.voting_duration_ms),
            closed_at: None,
            voters: Default::default(),
            winner: None,
        };

        if self.active.is_none() {
            self.active = Some(self.new_progress(tx.now));
        }
        if let Some(progress) = self.active.as_mut() {
            progress.session_id = Some(id);
        }
        self.put_active(tx);

        tx.put(StoreOp::PutSession(session.clone()));
        tx.emit(ProgressionEvent::SessionOpened {
            session_id: id,
            options: session.options.clone(),
            closes_at: session.closes_at,
        });
        info!(
            session_id = %id,
            options = session.options.len(),
            closes_at = session.closes_at,
            "Voting session opened"
        );

        let single = session.options.len() == 1;
        let view = SessionView::from(&session);
        self.session = Some(session);

        if single && rules.config.auto_select_single_option {
            debug!(session_id = %id, "Single candidate, resolving immediately");
            return Ok(self.close_session(tx, rules, id)?.session);
        }
        Ok(view)
    }

    /// Count one vote. Rejects closed sessions, bad indices and repeat voters.
    pub fn cast_vote(
        &mut self,
        tx: &mut Tx,
        session_id: SessionId,
        voter: &str,
        option_index: usize,
    ) -> Result<VoteReceipt> {
        let session = match self.session.as_mut() {
            Some(s) if s.id == session_id && s.is_open() => s,
            _ => return Err(Error::SessionClosed(session_id)),
        };
        let options = session.options.len();
        let Some(option) = session.options.get_mut(option_index) else {
            return Err(Error::InvalidOption {
                index: option_index,
                options,
            });
        };
        if session.voters.contains_key(voter) {
            return Err(Error::AlreadyVoted {
                session_id,
                voter: voter.to_string(),
            });
        }

        option.votes += 1;
        let receipt = VoteReceipt {
            session_id,
            voter: voter.to_string(),
            option_index,
            node_key: option.node_key.clone(),
            votes: option.votes,
        };
        session.voters.insert(voter.to_string(), option_index);

        tx.put(StoreOp::PutSession(session.clone()));
        tx.emit(ProgressionEvent::VoteCast {
            session_id,
            option_index,
            node_key: receipt.node_key.clone(),
            votes: receipt.votes,
        });
        debug!(session_id = %session_id, voter, option_index, "Vote cast");
        Ok(receipt)
    }

    /// Close the open session and target its winner.
    pub fn close_session(
        &mut self,
        tx: &mut Tx,
        rules: &Rules<'_>,
        session_id: SessionId,
    ) -> Result<SessionResolution> {
        match &self.session {
            Some(s) if s.id == session_id && s.is_open() => {}
            _ => return Err(Error::SessionClosed(session_id)),
        }
        let Some(mut session) = self.session.take() else {
            return Err(Error::SessionClosed(session_id));
        };

        let levels = &self.levels;
        let winner = resolve_winner(&session.options, |option| {
            rules
                .catalog
                .get_node(option.node_id)
                .is_some_and(|node| rules.catalog.is_eligible(node, levels))
        });
        session.close(winner, tx.now);

        let winner_key = session.winning_option().map(|o| o.node_key.clone());
        tx.put(StoreOp::PutSession(session.clone()));
        tx.emit(ProgressionEvent::SessionClosed {
            session_id,
            winner: winner_key.clone(),
            total_votes: session.total_votes(),
        });

        let target = match session.winning_option() {
            Some(option) => {
                info!(
                    session_id = %session_id,
                    winner = %option.node_key,
                    votes = option.votes,
                    total_votes = session.total_votes(),
                    "Voting session closed"
                );
                self.set_target(tx, rules, option.node_id, Some(session_id))
            }
            None => {
                warn!(session_id = %session_id, "No option still eligible at close");
                if let Some(progress) = self.active.as_mut() {
                    progress.session_id = None;
                }
                self.put_active(tx);
                None
            }
        };

        Ok(SessionResolution {
            session: SessionView::from(&session),
            target,
        })
    }

    /// Point the active progress (creating one if needed) at the node's next level.
    fn set_target(
        &mut self,
        tx: &mut Tx,
        rules: &Rules<'_>,
        node_id: NodeId,
        session_id: Option<SessionId>,
    ) -> Option<Target> {
        let node = rules.catalog.get_node(node_id)?;
        let level = node.next_level(self.level(node_id))?;
        let target = Target {
            node_id,
            node_key: node.key.clone(),
            level,
            cost: node.cost_for_level(level).unwrap_or(0),
        };

        if self.active.is_none() {
            self.active = Some(self.new_progress(tx.now));
        }
        let progress = self.active.as_mut()?;
        progress.target = Some(target.clone());
        progress.target_set_at = Some(tx.now);
        progress.session_id = session_id;
        let progress_id = progress.id;
        self.put_active(tx);

        tx.emit(ProgressionEvent::TargetSet {
            progress_id,
            node_key: target.node_key.clone(),
            level: target.level,
            cost: target.cost,
        });
        info!(
            progress_id = %progress_id,
            node_key = %target.node_key,
            level = target.level,
            cost = target.cost,
            "Unlock target set"
        );
        Some(target)
    }

    /// Unlock the active target and retire its progress, regardless of the counter.
    pub fn commit(
        &mut self,
        tx: &mut Tx,
        rules: &Rules<'_>,
        source: UnlockSource,
    ) -> Option<UnlockRecord> {
        let target = self.active.as_ref()?.target.clone()?;
        let node = rules.catalog.get_node(target.node_id)?;
        let mut progress = self.active.take()?;

        if target.level > self.level(node.id) {
            self.set_level(tx, node, target.level);
        }
        progress.retired_at = Some(tx.now);
        tx.put(StoreOp::PutProgress(progress.clone()));

        let record = self.record_unlock(
            tx,
            node,
            target.level,
            source,
            Some(progress.id),
            progress.accumulated,
        );
        self.last_unlocked = Some(node.id);

        info!(
            node_key = %node.key,
            level = target.level,
            cost = target.cost,
            contributions = progress.accumulated,
            ?source,
            "Node unlocked"
        );
        Some(record)
    }

    /// Retire the active progress without unlocking anything.
    pub fn retire_active(&mut self, tx: &mut Tx) {
        if let Some(mut progress) = self.active.take() {
            progress.retired_at = Some(tx.now);
            tx.put(StoreOp::PutProgress(progress));
        }
    }

    /// Close the open session without a winner.
    pub fn abandon_session(&mut self, tx: &mut Tx) {
        if let Some(mut session) = self.session.take() {
            session.close(None, tx.now);
            tx.put(StoreOp::PutSession(session.clone()));
            tx.emit(ProgressionEvent::SessionClosed {
                session_id: session.id,
                winner: None,
                total_votes: session.total_votes(),
            });
        }
    }

    /// Open a session over a random sample of eligible nodes.
    ///
    /// Returns `None` when nothing is eligible; when every node is maxed the
    /// tree is complete and the active progress is retired.
    pub fn start_voting(&mut self, tx: &mut Tx, rules: &Rules<'_>) -> Result<Option<SessionView>> {
        if let Some(session) = &self.session {
            return Err(Error::SessionAlreadyOpen(session.id));
        }

        let eligible: Vec<NodeId> = rules
            .catalog
            .eligible_nodes(&self.levels)
            .iter()
            .map(|n| n.id)
            .collect();

        if eligible.is_empty() {
            let was_active = self.active.is_some();
            if rules.catalog.all_maxed(&self.levels) {
                self.retire_active(tx);
                if was_active || !tx.unlocked.is_empty() {
                    tx.emit(ProgressionEvent::TreeCompleted);
                    info!("Progression tree completed");
                }
            } else if was_active {
                warn!("No eligible nodes to vote on, progression stalled");
            } else {
                debug!("No eligible nodes to vote on");
            }
            return Ok(None);
        }

        let candidates = sample_candidates(
            eligible,
            rules.config.max_voting_options.max(1),
            &mut rand::thread_rng(),
        );
        self.open_session(tx, rules, &candidates).map(Some)
    }

    fn retarget_same_node(&mut self, tx: &mut Tx, rules: &Rules<'_>) -> bool {
        if rules.config.retarget_policy != RetargetPolicy::SameNodeUntilMax {
            return false;
        }
        let Some(id) = self.last_unlocked else {
            return false;
        };
        let eligible = rules
            .catalog
            .get_node(id)
            .is_some_and(|node| rules.catalog.is_eligible(node, &self.levels));
        eligible && self.set_target(tx, rules, id, None).is_some()
    }

    /// Drive the state machine until it needs outside input.
    ///
    /// Commits a reached target, picks the next one (vote or same-node
    /// policy) and repeats, so zero-cost targets and points banked during a
    /// vote unlock right away.
    pub fn advance(&mut self, tx: &mut Tx, rules: &Rules<'_>) -> Result<()> {
        loop {
            match &self.active {
                Some(progress)
                    if progress
                        .target
                        .as_ref()
                        .is_some_and(|t| self.level(t.node_id) >= t.level) =>
                {
                    // Target level was reached out of band (admin unlock);
                    // keep the points banked and pick a new target.
                    if let Some(progress) = self.active.as_mut() {
                        if let Some(stale) = progress.target.take() {
                            info!(node_key = %stale.node_key, level = stale.level, "Dropping target already unlocked");
                        }
                        progress.target_set_at = None;
                    }
                    self.put_active(tx);
                }
                Some(progress) if progress.is_complete() => {
                    if self.commit(tx, rules, UnlockSource::Contribution).is_none() {
                        self.retire_active(tx);
                    }
                }
                Some(progress) if progress.target.is_some() => return Ok(()),
                Some(_) if self.session.is_some() => return Ok(()),
                _ if self.session.is_some() => {
                    // Open session without a progress: attach a fresh one.
                    let mut progress = self.new_progress(tx.now);
                    progress.session_id = self.session.as_ref().map(|s| s.id);
                    self.active = Some(progress);
                    self.put_active(tx);
                    return Ok(());
                }
                _ => {
                    if self.retarget_same_node(tx, rules) {
                        continue;
                    }
                    if self.start_voting(tx, rules)?.is_none() {
                        return Ok(());
                    }
                }
            }
        }
    }
}
