// src/locks.rs

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::QuotaError;
use crate::model::LedgerKey;

/// One async mutex per ledger key. Different keys never contend.
#[derive(Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<LedgerKey, Arc<AsyncMutex<()>>>>,
}

/// Guards held for the duration of a reconciler transaction.
pub struct KeyGuards {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &LedgerKey) -> Result<Arc<AsyncMutex<()>>, QuotaError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| QuotaError::Storage("ledger lock table poisoned".into()))?;
        Ok(slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    pub async fn lock(&self, key: &LedgerKey) -> Result<KeyGuards, QuotaError> {
        self.lock_many(std::slice::from_ref(key)).await
    }

    /// Locks several keys in sorted order so two callers can never deadlock.
    pub async fn lock_many(&self, keys: &[LedgerKey]) -> Result<KeyGuards, QuotaError> {
        let mut ordered: Vec<&LedgerKey> = keys.iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for key in ordered {
            let slot = self.slot(key)?;
            debug!("Acquiring ledger lock: {}", key);
            guards.push(slot.lock_owned().await);
        }
        Ok(KeyGuards { _guards: guards })
    }

    /// Drops slots nobody is holding or waiting on.
    pub fn prune_idle(&self) -> Result<usize, QuotaError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| QuotaError::Storage("ledger lock table poisoned".into()))?;
        let before = slots.len();
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        Ok(before - slots.len())
    }
}
