// src/reconciler.rs

use chrono::NaiveDateTime;
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};
use tracing::{debug, info, warn};

use crate::calendar::MonthKey;
use crate::error::{QuotaError, ValidationReason};
use crate::events::{EventKind, EventPublisher, QuotaEvent};
use crate::ledger::{recompute_overdue_flag, QuotaLedger};
use crate::locks::{KeyGuards, KeyedLocks};
use crate::model::{
    LedgerEffect, LedgerKey, QuotaType, Request, RequestId, RequestStatus, Span,
};
use crate::store::QuotaStore;
use crate::validator::{check_change_window, validate_span};

/// Re-reads needed when a request moves ledgers between its key lookup and lock.
const LOCK_ATTEMPTS: usize = 3;

/// Per-id result of a bulk status change.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub succeeded: Vec<Request>,
    pub failed: Vec<(RequestId, QuotaError)>,
}

/// Lifecycle reconciler: the only writer of ledger rows.
pub struct QuotaEngine {
    store: Arc<dyn QuotaStore>,
    locks: KeyedLocks,
    events: Option<EventPublisher>,
}

impl QuotaEngine {
    pub fn new(store: Arc<dyn QuotaStore>) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, publisher: EventPublisher) -> Self {
        self.events = Some(publisher);
        self
    }

    fn emit(&self, events: Vec<QuotaEvent>) {
        if let Some(publisher) = &self.events {
            publisher.publish(events);
        }
    }

    async fn load_or_empty(&self, key: &LedgerKey) -> Result<QuotaLedger, QuotaError> {
        Ok(self
            .store
            .load_ledger(key)
            .await?
            .unwrap_or_else(|| QuotaLedger::empty(key)))
    }

    async fn load_existing(&self, id: RequestId) -> Result<Request, QuotaError> {
        self.store
            .load_request(id)
            .await?
            .ok_or(QuotaError::NotFound(id))
    }

    /// Loads a request and locks its ledger key (plus `also`), re-reading
    /// until the locked key matches the request's current bucket.
    async fn lock_request(
        &self,
        id: RequestId,
        also: Option<&LedgerKey>,
    ) -> Result<(Request, KeyGuards), QuotaError> {
        let mut current = self.load_existing(id).await?;
        for _ in 0..LOCK_ATTEMPTS {
            let mut keys = vec![current.ledger_key()];
            keys.extend(also.cloned());
            let guards = self.locks.lock_many(&keys).await?;
            let fresh = self.load_existing(id).await?;
            if fresh.ledger_key() == current.ledger_key() {
                return Ok((fresh, guards));
            }
            debug!("Request {} moved ledgers while locking; retrying", id);
            current = fresh;
        }
        Err(QuotaError::Storage(format!(
            "request {} kept moving between ledgers",
            id
        )))
    }

    async fn reject_duplicate(
        &self,
        employee_id: &str,
        span: &Span,
        exclude: Option<RequestId>,
    ) -> Result<(), QuotaError> {
        if let Some(existing) = self.store.find_overlapping(employee_id, span, exclude).await? {
            warn!(
                "Duplicate request rejected: Emp={}, Existing={}, Span={:?}",
                employee_id, existing.id, span
            );
            return Err(QuotaError::DuplicateRequest {
                existing: existing.id,
            });
        }
        Ok(())
    }

    /// Validates a new span and books it against the declared month's ledger.
    pub async fn validate_and_request(
        &self,
        employee_id: &str,
        span: Span,
        month: &str,
        quota_type: QuotaType,
        now: NaiveDateTime,
    ) -> Result<Request, QuotaError> {
        let month: MonthKey = month.parse()?;
        if let Err(reason) = validate_span(&span, month, quota_type, now) {
            warn!(
                "Request rejected: Emp={}, Month={}, Reason={}",
                employee_id,
                month,
                reason.code()
            );
            return Err(reason.into());
        }
        let amount = span.amount()?;
        let key = LedgerKey::new(employee_id, month, quota_type);

        let (request, event) = {
            let _guard = self.locks.lock(&key).await?;
            self.reject_duplicate(employee_id, &span, None).await?;

            let before = self.load_or_empty(&key).await?;
            let after = before.apply_delta(amount)?;
            let request = Request {
                id: self.store.next_request_id().await?,
                employee_id: employee_id.to_string(),
                month,
                quota_type,
                status: RequestStatus::Pending,
                amount,
                span,
                is_overdue_snapshot: recompute_overdue_flag(&after),
                created_at: now,
                updated_at: now,
                decided_by: None,
            };
            self.store
                .commit(std::slice::from_ref(&after), std::slice::from_ref(&request))
                .await?;
            let event = QuotaEvent::for_request(EventKind::Created, &request, &before, &after);
            (request, event)
        };

        info!(
            "Created request {}: {}, Amount={}, Consumed={}, Overdue={}",
            request.id,
            key,
            request.amount,
            event.ledger.consumed(),
            event.ledger.overdue()
        );
        self.emit(vec![event]);
        Ok(request)
    }

    /// Replaces the span of a pending request, moving only the difference through the ledger.
    pub async fn edit(
        &self,
        request_id: RequestId,
        new_span: Span,
        now: NaiveDateTime,
    ) -> Result<Request, QuotaError> {
        let current = self.load_existing(request_id).await?;
        Self::check_editable(&current, &new_span, now)?;

        let new_month = MonthKey::from_date(new_span.start_date());
        validate_span(&new_span, new_month, current.quota_type, now)?;
        let new_amount = new_span.amount()?;
        let new_key = LedgerKey::new(current.employee_id.clone(), new_month, current.quota_type);

        let (request, events, old_amount) = {
            let (current, _guards) = self.lock_request(request_id, Some(&new_key)).await?;
            // State may have moved while waiting for the lock
            Self::check_editable(&current, &new_span, now)?;
            self.reject_duplicate(&current.employee_id, &new_span, Some(request_id))
                .await?;

            let old_key = current.ledger_key();
            let old_amount = current.amount;
            let mut ledgers = Vec::with_capacity(2);
            let mut transitions = Vec::with_capacity(2);
            let target_after = if old_key == new_key {
                let before = self.load_or_empty(&old_key).await?;
                let after = before.apply_delta(new_amount - current.amount)?;
                transitions.push((before, after.clone()));
                after
            } else {
                let old_before = self.load_or_empty(&old_key).await?;
                let old_after = old_before.apply_delta(-current.amount)?;
                let new_before = self.load_or_empty(&new_key).await?;
                let new_after = new_before.apply_delta(new_amount)?;
                transitions.push((new_before, new_after.clone()));
                transitions.push((old_before, old_after));
                new_after
            };
            ledgers.extend(transitions.iter().map(|(_, after)| after.clone()));

            let updated = Request {
                month: new_month,
                amount: new_amount,
                span: new_span,
                is_overdue_snapshot: recompute_overdue_flag(&target_after),
                updated_at: now,
                ..current
            };
            self.store
                .commit(&ledgers, std::slice::from_ref(&updated))
                .await?;

            let events: Vec<QuotaEvent> = transitions
                .iter()
                .map(|(before, after)| QuotaEvent::for_request(EventKind::Edited, &updated, before, after))
                .collect();
            (updated, events, old_amount)
        };

        info!(
            "Edited request {}: Emp={}, Month={}, Amount {} -> {}, Overdue={}",
            request.id,
            request.employee_id,
            request.month,
            old_amount,
            request.amount,
            request.is_overdue_snapshot
        );
        self.emit(events);
        Ok(request)
    }

    fn check_editable(current: &Request, new_span: &Span, now: NaiveDateTime) -> Result<(), QuotaError> {
        if current.status != RequestStatus::Pending {
            warn!(
                "Edit rejected for request {}: status is {}",
                current.id, current.status
            );
            return Err(QuotaError::NotPending {
                status: current.status,
            });
        }
        if let Err(e) = check_change_window(current, new_span, now) {
            warn!("Edit rejected for request {}: {}", current.id, e);
            return Err(e);
        }
        if current.span == *new_span {
            return Err(ValidationReason::UnchangedEdit.into());
        }
        Ok(())
    }

    /// Applies one status change: approve, reject or cancel.
    pub async fn transition(
        &self,
        request_id: RequestId,
        target: RequestStatus,
        actor_id: &str,
        now: NaiveDateTime,
    ) -> Result<Request, QuotaError> {
        let (request, event) = {
            let (current, _guard) = self.lock_request(request_id, None).await?;
            let key = current.ledger_key();
            let before = self.load_or_empty(&key).await?;
            let (updated, after) = Self::apply_transition(&current, &before, target, actor_id, now)?;

            let ledgers: &[QuotaLedger] = if after != before {
                std::slice::from_ref(&after)
            } else {
                &[]
            };
            self.store
                .commit(ledgers, std::slice::from_ref(&updated))
                .await?;
            let event = QuotaEvent::for_request(event_kind(target), &updated, &before, &after);
            (updated, event)
        };

        info!(
            "Request {} -> {} by {}: {}, Consumed={}, Overdue={}",
            request.id,
            request.status,
            actor_id,
            request.ledger_key(),
            event.ledger.consumed(),
            event.ledger.overdue()
        );
        self.emit(vec![event]);
        Ok(request)
    }

    /// Pure step shared by single and bulk transitions.
    fn apply_transition(
        current: &Request,
        ledger: &QuotaLedger,
        target: RequestStatus,
        actor_id: &str,
        now: NaiveDateTime,
    ) -> Result<(Request, QuotaLedger), QuotaError> {
        let effect = current.status.transition_to(target).map_err(|e| {
            warn!("Transition rejected for request {}: {}", current.id, e);
            e
        })?;
        let after = match effect {
            LedgerEffect::Release => ledger.apply_delta(-current.amount)?,
            LedgerEffect::None => ledger.clone(),
        };
        let updated = Request {
            status: target,
            decided_by: Some(actor_id.to_string()),
            updated_at: now,
            ..current.clone()
        };
        Ok((updated, after))
    }

    /// Applies one status to many requests, one lock and one commit per ledger key.
    pub async fn transition_batch(
        &self,
        ids: &[RequestId],
        target: RequestStatus,
        actor_id: &str,
        now: NaiveDateTime,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let mut groups: BTreeMap<LedgerKey, Vec<RequestId>> = BTreeMap::new();
        for &id in ids {
            match self.load_existing(id).await {
                Ok(request) => groups.entry(request.ledger_key()).or_default().push(id),
                Err(e) => outcome.failed.push((id, e)),
            }
        }

        let mut moved = Vec::new();
        for (key, group) in groups {
            let group_outcome = self.transition_group(&key, &group, target, actor_id, now).await;
            outcome.succeeded.extend(group_outcome.succeeded);
            outcome.failed.extend(group_outcome.failed);
            moved.extend(group_outcome.moved);
        }
        // Requests edited into another month between grouping and locking
        for id in moved {
            match self.transition(id, target, actor_id, now).await {
                Ok(request) => outcome.succeeded.push(request),
                Err(e) => outcome.failed.push((id, e)),
            }
        }

        info!(
            "Batch {} by {}: {} succeeded, {} failed",
            target,
            actor_id,
            outcome.succeeded.len(),
            outcome.failed.len()
        );
        outcome
    }

    /// Runs one ledger key's share of a batch. When the group aborts nothing is
    /// committed: ids that had passed and ids not yet reached fail with the abort
    /// error, while per-id failures and moved ids keep their own outcome.
    async fn transition_group(
        &self,
        key: &LedgerKey,
        group: &[RequestId],
        target: RequestStatus,
        actor_id: &str,
        now: NaiveDateTime,
    ) -> GroupOutcome {
        let mut result = GroupOutcome::default();
        match self
            .run_group(key, group, target, actor_id, now, &mut result)
            .await
        {
            Ok(()) => {
                let events = std::mem::take(&mut result.events);
                self.emit(events);
            }
            Err(e) => {
                warn!("Batch group aborted: {}, Error={}", key, e);
                let unreached = group[result.reached.min(group.len())..].iter().copied();
                let aborted: Vec<RequestId> = result.tentative.drain(..).chain(unreached).collect();
                result
                    .failed
                    .extend(aborted.into_iter().map(|id| (id, e.clone())));
                result.events.clear();
            }
        }
        result
    }

    async fn run_group(
        &self,
        key: &LedgerKey,
        group: &[RequestId],
        target: RequestStatus,
        actor_id: &str,
        now: NaiveDateTime,
        result: &mut GroupOutcome,
    ) -> Result<(), QuotaError> {
        let _guard = self.locks.lock(key).await?;
        let before = self.load_or_empty(key).await?;
        let mut ledger = before.clone();
        let mut working: HashMap<RequestId, Request> = HashMap::new();
        let mut changed_order = Vec::new();

        for (index, &id) in group.iter().enumerate() {
            result.reached = index;
            let current = match working.get(&id) {
                Some(request) => request.clone(),
                None => match self.store.load_request(id).await? {
                    Some(request) => request,
                    None => {
                        result.failed.push((id, QuotaError::NotFound(id)));
                        continue;
                    }
                },
            };
            if current.ledger_key() != *key {
                result.moved.push(id);
                continue;
            }
            match Self::apply_transition(&current, &ledger, target, actor_id, now) {
                Ok((updated, after)) => {
                    result.events.push(QuotaEvent::for_request(
                        event_kind(target),
                        &updated,
                        &ledger,
                        &after,
                    ));
                    ledger = after;
                    if !working.contains_key(&id) {
                        changed_order.push(id);
                    }
                    working.insert(id, updated);
                    result.tentative.push(id);
                }
                Err(e @ QuotaError::LedgerConsistency { .. }) => return Err(e),
                Err(e) => result.failed.push((id, e)),
            }
        }
        result.reached = group.len();

        let updated: Vec<Request> = changed_order
            .iter()
            .filter_map(|id| working.remove(id))
            .collect();
        if !updated.is_empty() {
            let ledgers: &[QuotaLedger] = if ledger != before {
                std::slice::from_ref(&ledger)
            } else {
                &[]
            };
            self.store.commit(ledgers, &updated).await?;
        }
        result.tentative.clear();
        result.succeeded = updated;
        Ok(())
    }

    /// Current balance for a bucket; a zeroed ledger when nothing was booked yet.
    pub async fn get_ledger(
        &self,
        employee_id: &str,
        month: MonthKey,
        quota_type: QuotaType,
    ) -> Result<QuotaLedger, QuotaError> {
        self.load_or_empty(&LedgerKey::new(employee_id, month, quota_type))
            .await
    }

    pub fn recompute_overdue_flag(&self, ledger: &QuotaLedger) -> bool {
        recompute_overdue_flag(ledger)
    }

    /// Re-derives the overdue flag of every still-pending request in a bucket.
    /// Returns how many requests changed.
    pub async fn refresh_pending_flags(&self, key: &LedgerKey) -> Result<usize, QuotaError> {
        let (changed, ledger) = {
            let _guard = self.locks.lock(key).await?;
            let ledger = self.load_or_empty(key).await?;
            let flag = recompute_overdue_flag(&ledger);
            let changed: Vec<Request> = self
                .store
                .pending_requests(key)
                .await?
                .into_iter()
                .filter(|r| r.is_overdue_snapshot != flag)
                .map(|r| Request {
                    is_overdue_snapshot: flag,
                    ..r
                })
                .collect();
            if !changed.is_empty() {
                self.store.commit(&[], &changed).await?;
            }
            (changed, ledger)
        };

        if !changed.is_empty() {
            debug!("Pending flags refreshed: {}, Count={}", key, changed.len());
            self.emit(vec![QuotaEvent {
                kind: EventKind::FlagsRefreshed,
                request_id: None,
                is_overdue_snapshot: recompute_overdue_flag(&ledger),
                ledger,
                overdue_changed: false,
            }]);
        }
        Ok(changed.len())
    }

    pub async fn requests_for_employee(&self, employee_id: &str) -> Result<Vec<Request>, QuotaError> {
        self.store.requests_for_employee(employee_id).await
    }

    pub async fn load_request(&self, request_id: RequestId) -> Result<Request, QuotaError> {
        self.load_existing(request_id).await
    }

    /// Frees lock slots for keys no operation is using.
    pub fn prune_locks(&self) -> Result<usize, QuotaError> {
        self.locks.prune_idle()
    }
}

#[derive(Default)]
struct GroupOutcome {
    succeeded: Vec<Request>,
    failed: Vec<(RequestId, QuotaError)>,
    moved: Vec<RequestId>,
    /// Passed the transition table but not committed yet.
    tentative: Vec<RequestId>,
    /// Index of the first id not fully handled.
    reached: usize,
    events: Vec<QuotaEvent>,
}

fn event_kind(target: RequestStatus) -> EventKind {
    match target {
        RequestStatus::Approved => EventKind::Approved,
        RequestStatus::Rejected => EventKind::Rejected,
        RequestStatus::Cancelled => EventKind::Cancelled,
        RequestStatus::Pending => EventKind::Edited,
    }
}

