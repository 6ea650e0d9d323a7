//! Operator overrides.
//!
//! These bypass accumulation and voting. Every change is persisted and
//! recorded like a normal one, with [`UnlockSource::Admin`] or
//! [`UnlockSource::Instant`] as its source.

use tracing::{info, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::events::ProgressionEvent;
use crate::model::{UnlockRecord, UnlockSource};
use crate::store::StoreOp;
use crate::voting::SessionResolution;

impl Engine {
    fn admin_node(&self, node_key: &str, level: u32) -> Result<progression_tree::ProgressionNode> {
        let node = self
            .catalog()
            .get_by_key(node_key)
            .ok_or_else(|| Error::NodeNotFound(node_key.to_string()))?;
        if level == 0 || level > node.max_level {
            return Err(Error::InvalidLevel {
                node_key: node_key.to_string(),
                level,
                max_level: node.max_level,
            });
        }
        Ok(node.clone())
    }

    /// Set `node_key` to exactly `level`.
    ///
    /// A target this reaches is dropped; its points stay banked for the next one.
    pub async fn admin_unlock(&self, node_key: &str, level: u32) -> Result<()> {
        let node = self.admin_node(node_key, level)?;
        self.mutate(|core, tx, _, rules| {
            core.force_level(tx, &node, level, UnlockSource::Admin);
            core.advance(tx, rules)
        })
        .await?;
        info!(node_key, level, "Admin unlock");
        Ok(())
    }

    /// Drop `node_key` below `level` (to `level - 1`) if it is at or above it.
    ///
    /// Returns the node's level afterwards.
    pub async fn admin_relock(&self, node_key: &str, level: u32) -> Result<u32> {
        let node = self.admin_node(node_key, level)?;
        let new_level = self
            .mutate(|core, tx, _, rules| {
                let current = core.level(node.id);
                if current < level {
                    return Ok(current);
                }
                core.force_level(tx, &node, level - 1, UnlockSource::Admin);
                core.advance(tx, rules)?;
                Ok(level - 1)
            })
            .await?;
        info!(node_key, level = new_level, "Admin relock");
        Ok(new_level)
    }

    /// Unlock every node to its max level and end the current vote or target.
    pub async fn admin_unlock_all(&self) -> Result<Vec<UnlockRecord>> {
        let records = self
            .mutate(|core, tx, _, rules| {
                core.abandon_session(tx);
                core.retire_active(tx);
                for node in rules.catalog.nodes() {
                    if core.level(node.id) < node.max_level {
                        core.force_level(tx, node, node.max_level, UnlockSource::Admin);
                    }
                }
                core.advance(tx, rules)?;
                Ok(tx.unlocked.clone())
            })
            .await?;
        info!(unlocked = records.len(), "Admin unlocked all nodes");
        Ok(records)
    }

    /// Close the open session now and target its winner.
    pub async fn force_close_session(&self) -> Result<SessionResolution> {
        let resolution = self
            .mutate(|core, tx, _, rules| {
                let session_id = core
                    .session
                    .as_ref()
                    .map(|s| s.id)
                    .ok_or(Error::NoActiveSession)?;
                let resolution = core.close_session(tx, rules, session_id)?;
                core.advance(tx, rules)?;
                Ok(resolution)
            })
            .await?;
        info!(session_id = %resolution.session.id, "Session force-closed");
        Ok(resolution)
    }

    /// Close any open vote and unlock its winner immediately.
    pub async fn force_instant_unlock(&self) -> Result<UnlockRecord> {
        let record = self
            .mutate(|core, tx, _, rules| {
                if let Some(session_id) = core.session.as_ref().map(|s| s.id) {
                    core.close_session(tx, rules, session_id)?;
                }
                let record = core
                    .commit(tx, rules, UnlockSource::Instant)
                    .ok_or_else(|| Error::NoActiveProgress("instant unlock".into()))?;
                core.advance(tx, rules)?;
                Ok(record)
            })
            .await?;
        info!(node_key = %record.node_key, level = record.level, "Instant unlock");
        Ok(record)
    }

    /// Clear all unlocks, re-apply auto-unlocks and start a fresh vote.
    ///
    /// Engagement and unlock history are kept.
    pub async fn reset_progression(&self, reason: &str) -> Result<()> {
        self.mutate(|core, tx, _, rules| {
            core.abandon_session(tx);
            core.retire_active(tx);
            core.levels.clear();
            core.last_unlocked = None;
            tx.batch.push(StoreOp::ClearLevels);
            core.apply_auto_unlocks(tx, rules);
            tx.events.push(ProgressionEvent::ProgressionReset {
                reason: reason.to_string(),
            });
            core.advance(tx, rules)
        })
        .await?;
        warn!(reason, "Progression reset");
        Ok(())
    }
}
