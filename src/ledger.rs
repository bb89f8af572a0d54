// src/ledger.rs

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::calendar::MonthKey;
use crate::error::QuotaError;
use crate::model::{EmployeeId, LedgerKey, QuotaType};

/// Running balance for one (employee, month, quota type).
///
/// `remaining` and `overdue` are always derived from `consumed`; nothing
/// outside this module writes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLedger {
    pub employee_id: EmployeeId,
    pub month: MonthKey,
    pub quota_type: QuotaType,
    pub total_allowance: Decimal,
    consumed: Decimal,
    remaining: Decimal,
    overdue: Decimal,
}

impl QuotaLedger {
    /// Zeroed row used for a bucket that has no history yet.
    pub fn empty(key: &LedgerKey) -> Self {
        let total_allowance = key.quota_type.allowance();
        Self {
            employee_id: key.employee_id.clone(),
            month: key.month,
            quota_type: key.quota_type,
            total_allowance,
            consumed: Decimal::ZERO,
            remaining: total_allowance,
            overdue: Decimal::ZERO,
        }
    }

    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(self.employee_id.clone(), self.month, self.quota_type)
    }

    pub fn consumed(&self) -> Decimal {
        self.consumed
    }

    pub fn remaining(&self) -> Decimal {
        self.remaining
    }

    pub fn overdue(&self) -> Decimal {
        self.overdue
    }

    /// Applies a signed delta and re-derives the dependent fields.
    ///
    /// A release larger than what was consumed clamps `consumed` at zero.
    pub fn apply_delta(&self, delta: Decimal) -> Result<QuotaLedger, QuotaError> {
        self.check_invariants()?;

        let raw = self.consumed + delta;
        let consumed = if raw.is_sign_negative() && !raw.is_zero() {
            warn!(
                "Ledger release clamped at zero: {}, Consumed={}, Delta={}, Shortfall={}",
                self.key(),
                self.consumed,
                delta,
                -raw
            );
            Decimal::ZERO
        } else {
            raw
        };

        let mut next = self.clone();
        next.set_consumed(consumed);
        next.check_invariants()?;
        Ok(next)
    }

    fn set_consumed(&mut self, consumed: Decimal) {
        // normalize() drops trailing zeros so 180.0 and 180 compare and print the same
        self.consumed = consumed.normalize();
        self.remaining = (self.total_allowance - self.consumed)
            .max(Decimal::ZERO)
            .normalize();
        self.overdue = (self.consumed - self.total_allowance)
            .max(Decimal::ZERO)
            .normalize();
    }

    /// Rejects rows whose stored fields disagree with the derivation rules.
    pub fn check_invariants(&self) -> Result<(), QuotaError> {
        let fail = |detail: String| -> Result<(), QuotaError> {
            error!("Ledger consistency failure: {}, {}", self.key(), detail);
            Err(QuotaError::consistency(detail))
        };
        if self.total_allowance != self.quota_type.allowance() {
            return fail(format!(
                "allowance {} does not match {} allowance {}",
                self.total_allowance,
                self.quota_type,
                self.quota_type.allowance()
            ));
        }
        if self.consumed.is_sign_negative() && !self.consumed.is_zero() {
            return fail(format!("consumed {} is negative", self.consumed));
        }
        let expected_remaining = (self.total_allowance - self.consumed).max(Decimal::ZERO);
        let expected_overdue = (self.consumed - self.total_allowance).max(Decimal::ZERO);
        if self.remaining != expected_remaining || self.overdue != expected_overdue {
            return fail(format!(
                "remaining {} / overdue {} do not derive from consumed {}",
                self.remaining, self.overdue, self.consumed
            ));
        }
        Ok(())
    }

    pub fn is_overdue(&self) -> bool {
        self.overdue > Decimal::ZERO
    }
}

/// Eligibility flag stamped onto a request written against `ledger`.
pub fn recompute_overdue_flag(ledger: &QuotaLedger) -> bool {
    ledger.is_overdue()
}

/// Read model for the stats endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub employee_id: EmployeeId,
    pub month: MonthKey,
    pub quota_type: QuotaType,
    pub total: Decimal,
    pub taken: Decimal,
    pub remaining: Decimal,
    pub overdue: Decimal,
    /// "HH:MM" renderings, permission ledgers only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clock: Option<ClockStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClockStats {
    pub total: String,
    pub taken: String,
    pub remaining: String,
    pub overdue: String,
}

impl From<&QuotaLedger> for LedgerStats {
    fn from(ledger: &QuotaLedger) -> Self {
        let clock = match ledger.quota_type {
            QuotaType::PermissionMinutes => Some(ClockStats {
                total: format_minutes(ledger.total_allowance),
                taken: format_minutes(ledger.consumed),
                remaining: format_minutes(ledger.remaining),
                overdue: format_minutes(ledger.overdue),
            }),
            QuotaType::WfhDays => None,
        };
        Self {
            employee_id: ledger.employee_id.clone(),
            month: ledger.month,
            quota_type: ledger.quota_type,
            total: ledger.total_allowance,
            taken: ledger.consumed,
            remaining: ledger.remaining,
            overdue: ledger.overdue,
            clock,
        }
    }
}

/// Renders a minute count as "HH:MM".
pub fn format_minutes(minutes: Decimal) -> String {
    let whole = minutes.trunc().to_i64().unwrap_or(0).max(0);
    format!("{:02}:{:02}", whole / 60, whole % 60)
}
