// src/store.rs

use async_trait::async_trait;
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard,
    },
};
use tracing::debug;

use crate::error::QuotaError;
use crate::ledger::QuotaLedger;
use crate::model::{LedgerKey, Request, RequestId, RequestStatus, Span};

/// Persistence port used by the reconciler. Every call is treated as its own transaction.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn load_ledger(&self, key: &LedgerKey) -> Result<Option<QuotaLedger>, QuotaError>;

    async fn save_ledger(&self, ledger: &QuotaLedger) -> Result<(), QuotaError>;

    async fn load_request(&self, id: RequestId) -> Result<Option<Request>, QuotaError>;

    async fn save_request(&self, request: &Request) -> Result<(), QuotaError>;

    /// Writes ledgers and requests as one unit.
    async fn commit(&self, ledgers: &[QuotaLedger], requests: &[Request]) -> Result<(), QuotaError> {
        for ledger in ledgers {
            self.save_ledger(ledger).await?;
        }
        for request in requests {
            self.save_request(request).await?;
        }
        Ok(())
    }

    /// Active request of the same employee that collides with `span`, ignoring `exclude`.
    async fn find_overlapping(
        &self,
        employee_id: &str,
        span: &Span,
        exclude: Option<RequestId>,
    ) -> Result<Option<Request>, QuotaError>;

    async fn next_request_id(&self) -> Result<RequestId, QuotaError>;

    async fn pending_requests(&self, key: &LedgerKey) -> Result<Vec<Request>, QuotaError>;

    async fn requests_for_employee(&self, employee_id: &str) -> Result<Vec<Request>, QuotaError>;
}

/// Duplicate-guard rule shared by store implementations.
pub fn spans_collide(existing: &Span, proposed: &Span) -> bool {
    match (existing, proposed) {
        (Span::Permission(a), Span::Permission(b)) => a.date == b.date && a.start_time == b.start_time,
        (Span::Wfh(a), Span::Wfh(b)) => {
            let existing_dates = [a.start_date, a.end_date];
            existing_dates.contains(&b.start_date) || existing_dates.contains(&b.end_date)
        }
        _ => false,
    }
}

#[derive(Default)]
struct StoreState {
    ledgers: HashMap<LedgerKey, QuotaLedger>,
    requests: BTreeMap<RequestId, Request>,
}

/// Process-local store. Ledgers and requests share one lock so `commit` is atomic.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    next_id: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>, QuotaError> {
        self.state
            .lock()
            .map_err(|_| QuotaError::Storage("in-memory store lock poisoned".into()))
    }
}

#[async_trait]
impl QuotaStore for InMemoryStore {
    async fn load_ledger(&self, key: &LedgerKey) -> Result<Option<QuotaLedger>, QuotaError> {
        Ok(self.state()?.ledgers.get(key).cloned())
    }

    async fn save_ledger(&self, ledger: &QuotaLedger) -> Result<(), QuotaError> {
        self.state()?.ledgers.insert(ledger.key(), ledger.clone());
        Ok(())
    }

    async fn load_request(&self, id: RequestId) -> Result<Option<Request>, QuotaError> {
        Ok(self.state()?.requests.get(&id).cloned())
    }

    async fn save_request(&self, request: &Request) -> Result<(), QuotaError> {
        self.state()?.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn commit(&self, ledgers: &[QuotaLedger], requests: &[Request]) -> Result<(), QuotaError> {
        let mut state = self.state()?;
        for ledger in ledgers {
            state.ledgers.insert(ledger.key(), ledger.clone());
        }
        for request in requests {
            state.requests.insert(request.id, request.clone());
        }
        debug!(
            "Committed {} ledger(s) and {} request(s)",
            ledgers.len(),
            requests.len()
        );
        Ok(())
    }

    async fn find_overlapping(
        &self,
        employee_id: &str,
        span: &Span,
        exclude: Option<RequestId>,
    ) -> Result<Option<Request>, QuotaError> {
        let state = self.state()?;
        Ok(state
            .requests
            .values()
            .filter(|r| r.employee_id == employee_id && r.status.is_active())
            .filter(|r| Some(r.id) != exclude)
            .find(|r| spans_collide(&r.span, span))
            .cloned())
    }

    async fn next_request_id(&self) -> Result<RequestId, QuotaError> {
        Ok(RequestId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn pending_requests(&self, key: &LedgerKey) -> Result<Vec<Request>, QuotaError> {
        let state = self.state()?;
        Ok(state
            .requests
            .values()
            .filter(|r| r.status == RequestStatus::Pending && r.ledger_key() == *key)
            .cloned()
            .collect())
    }

    async fn requests_for_employee(&self, employee_id: &str) -> Result<Vec<Request>, QuotaError> {
        let state = self.state()?;
        Ok(state
            .requests
            .values()
            .filter(|r| r.employee_id == employee_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
impl InMemoryStore {
    pub(crate) fn requests_with_key(&self, key: &LedgerKey) -> Vec<Request> {
        self.state()
            .map(|state| {
                state
                    .requests
                    .values()
                    .filter(|r| r.ledger_key() == *key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
