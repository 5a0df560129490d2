//! In-memory implementations of the storage traits
//!
//! Provides `MemoryStateStore` and `MemoryAuditSink`. The state store is the
//! production pool for a single run; the audit sink is mostly for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::schema::{DesignState, EvaluationResult, StateId};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Pool {
    entries: Vec<PoolEntry>,
    index: HashMap<StateId, usize>,
}

/// In-memory state pool backed by an insertion-ordered `Vec` plus an id index.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    pool: RwLock<Pool>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Pool> {
        self.pool.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Pool> {
        self.pool.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, state: DesignState, result: EvaluationResult) -> StoreResult<()> {
        if result.state_id != state.state_id {
            return Err(StoreError::MismatchedResult {
                state_id: state.state_id.to_string(),
                result_state_id: result.state_id.to_string(),
            });
        }

        let mut pool = self.write();
        if pool.index.contains_key(&state.state_id) {
            return Err(StoreError::DuplicateStateId {
                state_id: state.state_id.to_string(),
            });
        }
        if let Some(parent) = &state.parent_id {
            if !pool.index.contains_key(parent) {
                return Err(StoreError::OrphanState {
                    state_id: state.state_id.to_string(),
                    parent_id: parent.to_string(),
                });
            }
        }

        let seq = pool.entries.len();
        pool.index.insert(state.state_id.clone(), seq);
        pool.entries.push(PoolEntry {
            seq: seq as u64,
            state,
            result,
        });
        Ok(())
    }

    async fn get(&self, state_id: &StateId) -> StoreResult<PoolEntry> {
        let pool = self.read();
        pool.index
            .get(state_id)
            .and_then(|&i| pool.entries.get(i))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                state_id: state_id.to_string(),
            })
    }

    async fn best(&self) -> StoreResult<Option<PoolEntry>> {
        let pool = self.read();
        let mut best: Option<&PoolEntry> = None;
        for entry in &pool.entries {
            match best {
                Some(b) if entry.penalty().total_cmp(&b.penalty()).is_ge() => {}
                _ => best = Some(entry),
            }
        }
        Ok(best.cloned())
    }

    async fn contains(&self, state_id: &StateId) -> StoreResult<bool> {
        Ok(self.read().index.contains_key(state_id))
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.read().entries.len())
    }

    async fn lineage(&self, state_id: &StateId) -> StoreResult<Vec<StateId>> {
        let pool = self.read();
        let mut chain = Vec::new();
        let mut cursor = Some(state_id.clone());
        while let Some(id) = cursor {
            let entry = pool
                .index
                .get(&id)
                .and_then(|&i| pool.entries.get(i))
                .ok_or_else(|| StoreError::NotFound {
                    state_id: id.to_string(),
                })?;
            cursor = entry.state.parent_id.clone();
            chain.push(id);
        }
        Ok(chain)
    }

    async fn entries(&self) -> StoreResult<Vec<PoolEntry>> {
        Ok(self.read().entries.clone())
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditSink
// ---------------------------------------------------------------------------

/// Audit sink that keeps every entry in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of recorded entries, in order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.lock().clone()
    }

    /// Entries of a single kind.
    pub fn entries_of(&self, kind: AuditKind) -> Vec<AuditEntry> {
        self.lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> StoreResult<()> {
        self.lock().push(entry);
        Ok(())
    }
}
