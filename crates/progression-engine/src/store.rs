//! Persistence boundary.
//!
//! The engine writes every state change as one [`StoreBatch`] before
//! applying it in memory. A backend must apply a batch atomically: either
//! every op lands or none does.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::model::{EngagementMetric, UnlockProgress, UnlockRecord, VotingSession};

/// One write inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StoreOp {
    /// Set a node's unlocked level. Level 0 removes the entry.
    SetLevel { node_key: String, level: u32 },
    /// Remove every unlocked level.
    ClearLevels,
    /// Insert or replace a progress record.
    PutProgress(UnlockProgress),
    /// Insert or replace a session record.
    PutSession(VotingSession),
    AppendMetric(EngagementMetric),
    AppendUnlock(UnlockRecord),
    /// First-boot setup (auto-unlocks) has run.
    MarkInitialized,
}

/// Ordered set of writes applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreBatch {
    ops: Vec<StoreOp>,
}

impl StoreBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: StoreOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Everything a store returns at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub initialized: bool,
    /// Node key -> unlocked level.
    pub levels: BTreeMap<String, u32>,
    pub progresses: Vec<UnlockProgress>,
    pub sessions: Vec<VotingSession>,
    pub metrics: Vec<EngagementMetric>,
    pub unlocks: Vec<UnlockRecord>,
}

impl PersistedState {
    /// Apply one op in place.
    pub fn apply(&mut self, op: &StoreOp) {
        match op {
            StoreOp::SetLevel { node_key, level } => {
                if *level == 0 {
                    self.levels.remove(node_key);
                } else {
                    self.levels.insert(node_key.clone(), *level);
                }
            }
            StoreOp::ClearLevels => self.levels.clear(),
            StoreOp::PutProgress(progress) => {
                match self.progresses.iter_mut().find(|p| p.id == progress.id) {
                    Some(existing) => *existing = progress.clone(),
                    None => self.progresses.push(progress.clone()),
                }
            }
            StoreOp::PutSession(session) => {
                match self.sessions.iter_mut().find(|s| s.id == session.id) {
                    Some(existing) => *existing = session.clone(),
                    None => self.sessions.push(session.clone()),
                }
            }
            StoreOp::AppendMetric(metric) => self.metrics.push(metric.clone()),
            StoreOp::AppendUnlock(record) => self.unlocks.push(record.clone()),
            StoreOp::MarkInitialized => self.initialized = true,
        }
    }
}

/// Durable progression storage.
pub trait Store: Send + Sync {
    /// Apply every op in `batch` atomically.
    fn apply(&self, batch: &StoreBatch) -> Result<(), StoreError>;

    /// Load the full persisted state.
    fn load(&self) -> Result<PersistedState, StoreError>;
}

/// In-process store, with failure injection for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<PersistedState>,
    unavailable: AtomicBool,
    fail_next: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `n` writes.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Number of batches successfully applied.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn apply(&self, batch: &StoreBatch) -> Result<(), StoreError> {
        self.check_available()?;
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }

        let mut state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        for op in batch.ops() {
            state.apply(op);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> Result<PersistedState, StoreError> {
        self.check_available()?;
        let state = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ProgressId;

    #[test]
    fn level_zero_removes_entry() {
        let mut state = PersistedState::default();
        state.apply(&StoreOp::SetLevel {
            node_key: "forge_1".into(),
            level: 2,
        });
        assert_eq!(state.levels.get("forge_1"), Some(&2));
        state.apply(&StoreOp::SetLevel {
            node_key: "forge_1".into(),
            level: 0,
        });
        assert!(state.levels.is_empty());
    }

    #[test]
    fn put_progress_replaces_by_id() {
        let mut state = PersistedState::default();
        let mut progress = UnlockProgress::new(ProgressId(1), 0);
        state.apply(&StoreOp::PutProgress(progress.clone()));
        progress.accumulated = 40;
        state.apply(&StoreOp::PutProgress(progress));
        assert_eq!(state.progresses.len(), 1);
        assert_eq!(state.progresses[0].accumulated, 40);
    }

    #[test]
    fn injected_failure_applies_nothing() {
        let store = MemoryStore::new();
        let mut batch = StoreBatch::new();
        batch.push(StoreOp::MarkInitialized);

        store.fail_next_writes(1);
        assert!(store.apply(&batch).is_err());
        assert!(!store.load().unwrap().initialized);

        store.apply(&batch).unwrap();
        assert!(store.load().unwrap().initialized);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn unavailable_store_fails_reads_and_writes() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.load().is_err());
        assert!(store.apply(&StoreBatch::new()).is_err());
        store.set_unavailable(false);
        assert!(store.load().is_ok());
    }
}
