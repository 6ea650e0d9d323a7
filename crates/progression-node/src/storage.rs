//! Persistent progression storage using RocksDB.
//!
//! Key layout:
//!
//! | Prefix | Value |
//! |---|---|
//! | `meta:initialized` | `1` once first-boot setup ran |
//! | `level:{node_key}` | unlocked level (JSON number) |
//! | `progress:{id:020}` | `UnlockProgress` |
//! | `session:{id:020}` | `VotingSession` |
//! | `metric:{seq:020}` | `EngagementMetric` |
//! | `unlock:{seq:020}` | `UnlockRecord` |
//!
//! Each engine batch becomes one RocksDB `WriteBatch`.

use progression_engine::{PersistedState, Store, StoreBatch, StoreError, StoreOp};
use rocksdb::{Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

const INITIALIZED_KEY: &[u8] = b"meta:initialized";
const LEVEL_PREFIX: &str = "level:";
/// First key after every `level:` key.
const LEVEL_END: &str = "level;";
const PROGRESS_PREFIX: &str = "progress:";
const SESSION_PREFIX: &str = "session:";
const METRIC_PREFIX: &str = "metric:";
const UNLOCK_PREFIX: &str = "unlock:";

/// Next sequence numbers for the append-only logs.
#[derive(Debug, Default, Clone, Copy)]
struct Sequences {
    metric: u64,
    unlock: u64,
}

/// RocksDB-backed [`Store`].
pub struct RocksStore {
    db: DB,
    sequences: Mutex<Sequences>,
}

impl RocksStore {
    /// Open or create storage at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;

        let sequences = Sequences {
            metric: next_sequence(&db, METRIC_PREFIX)?,
            unlock: next_sequence(&db, UNLOCK_PREFIX)?,
        };
        tracing::debug!(
            metrics = sequences.metric,
            unlocks = sequences.unlock,
            "Opened progression store"
        );

        Ok(Self {
            db,
            sequences: Mutex::new(sequences),
        })
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &str) -> std::result::Result<Vec<(String, T)>, StoreError> {
        let mut out = Vec::new();
        for item in self.db.prefix_iterator(prefix.as_bytes()) {
            let (key, value) = item.map_err(unavailable)?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let key = String::from_utf8_lossy(&key).into_owned();
            let value = serde_json::from_slice(&value).map_err(|e| StoreError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?;
            out.push((key, value));
        }
        Ok(out)
    }
}

impl Store for RocksStore {
    fn apply(&self, batch: &StoreBatch) -> std::result::Result<(), StoreError> {
        let mut sequences = self
            .sequences
            .lock()
            .map_err(|_| StoreError::Unavailable("sequence lock poisoned".into()))?;
        let mut next = *sequences;

        let mut write = WriteBatch::default();
        for op in batch.ops() {
            match op {
                StoreOp::SetLevel { node_key, level } => {
                    let key = format!("{LEVEL_PREFIX}{node_key}");
                    if *level == 0 {
                        write.delete(key.as_bytes());
                    } else {
                        write.put(key.as_bytes(), encode(level)?);
                    }
                }
                StoreOp::ClearLevels => write.delete_range(LEVEL_PREFIX, LEVEL_END),
                StoreOp::PutProgress(progress) => {
                    let key = format!("{PROGRESS_PREFIX}{:020}", progress.id.0);
                    write.put(key.as_bytes(), encode(progress)?);
                }
                StoreOp::PutSession(session) => {
                    let key = format!("{SESSION_PREFIX}{:020}", session.id.0);
                    write.put(key.as_bytes(), encode(session)?);
                }
                StoreOp::AppendMetric(metric) => {
                    let key = format!("{METRIC_PREFIX}{:020}", next.metric);
                    next.metric += 1;
                    write.put(key.as_bytes(), encode(metric)?);
                }
                StoreOp::AppendUnlock(record) => {
                    let key = format!("{UNLOCK_PREFIX}{:020}", next.unlock);
                    next.unlock += 1;
                    write.put(key.as_bytes(), encode(record)?);
                }
                StoreOp::MarkInitialized => write.put(INITIALIZED_KEY, b"1"),
            }
        }

        self.db.write(write).map_err(unavailable)?;
        *sequences = next;
        Ok(())
    }

    fn load(&self) -> std::result::Result<PersistedState, StoreError> {
        let initialized = self.db.get(INITIALIZED_KEY).map_err(unavailable)?.is_some();

        let levels = self
            .scan::<u32>(LEVEL_PREFIX)?
            .into_iter()
            .filter_map(|(key, level)| {
                key.strip_prefix(LEVEL_PREFIX)
                    .map(|node_key| (node_key.to_string(), level))
            })
            .collect();

        Ok(PersistedState {
            initialized,
            levels,
            progresses: values(self.scan(PROGRESS_PREFIX)?),
            sessions: values(self.scan(SESSION_PREFIX)?),
            metrics: values(self.scan(METRIC_PREFIX)?),
            unlocks: values(self.scan(UNLOCK_PREFIX)?),
        })
    }
}

fn values<T>(entries: Vec<(String, T)>) -> Vec<T> {
    entries.into_iter().map(|(_, v)| v).collect()
}

fn encode<T: Serialize + ?Sized>(value: &T) -> std::result::Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Unavailable(format!("encode failed: {e}")))
}

fn unavailable(e: rocksdb::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

/// One past the highest sequence number stored under `prefix`.
fn next_sequence(db: &DB, prefix: &str) -> Result<u64> {
    let mut next = 0;
    for item in db.prefix_iterator(prefix.as_bytes()) {
        let (key, _) = item?;
        if !key.starts_with(prefix.as_bytes()) {
            break;
        }
        let seq = String::from_utf8_lossy(&key[prefix.len()..]).parse::<u64>().ok();
        if let Some(seq) = seq {
            next = next.max(seq + 1);
        }
    }
    Ok(next)
}
