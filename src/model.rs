// src/model.rs

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::calendar::{self, MonthKey};
use crate::error::{QuotaError, ValidationReason};

pub type EmployeeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuotaType {
    PermissionMinutes,
    WfhDays,
}

impl QuotaType {
    /// Fixed monthly allowance: 180 minutes of permission, 4 WFH days.
    pub fn allowance(&self) -> Decimal {
        match self {
            QuotaType::PermissionMinutes => dec!(180),
            QuotaType::WfhDays => dec!(4),
        }
    }
}

impl fmt::Display for QuotaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaType::PermissionMinutes => write!(f, "PERMISSION_MINUTES"),
            QuotaType::WfhDays => write!(f, "WFH_DAYS"),
        }
    }
}

impl FromStr for QuotaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "permission_minutes" | "permission" => Ok(QuotaType::PermissionMinutes),
            "wfh_days" | "wfh" => Ok(QuotaType::WfhDays),
            _ => Err(format!("Unknown quota type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Session {
    #[serde(alias = "Half_Day", alias = "half_day")]
    HalfDay,
    #[serde(alias = "Full_Day", alias = "full_day")]
    FullDay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Approved => "APPROVED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// What a status change does to the owning ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerEffect {
    None,
    /// Give back the request's full committed amount.
    Release,
}

impl RequestStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Approved)
    }

    pub fn is_terminal_inactive(&self) -> bool {
        matches!(self, RequestStatus::Rejected | RequestStatus::Cancelled)
    }

    /// Transition table for manager and employee decisions.
    pub fn transition_to(self, target: RequestStatus) -> Result<LedgerEffect, QuotaError> {
        use RequestStatus::*;
        match (self, target) {
            (Pending, Approved) => Ok(LedgerEffect::None),
            (Pending, Rejected) | (Pending, Cancelled) => Ok(LedgerEffect::Release),
            (Approved, Cancelled) => Ok(LedgerEffect::Release),
            (from, Rejected) | (from, Cancelled) if from.is_terminal_inactive() => {
                Err(QuotaError::InactiveRequest { status: from })
            }
            (from, to) => Err(QuotaError::IllegalTransition { from, to }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSpan {
    pub date: NaiveDate,
    #[serde(with = "clock_time")]
    pub start_time: NaiveTime,
    #[serde(with = "clock_time")]
    pub end_time: NaiveTime,
}

impl PermissionSpan {
    pub fn minutes(&self) -> Decimal {
        Decimal::from((self.end_time - self.start_time).num_minutes().max(0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WfhSpan {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub session: Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Span {
    Permission(PermissionSpan),
    Wfh(WfhSpan),
}

impl Span {
    pub fn quota_type(&self) -> QuotaType {
        match self {
            Span::Permission(_) => QuotaType::PermissionMinutes,
            Span::Wfh(_) => QuotaType::WfhDays,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        match self {
            Span::Permission(p) => p.date,
            Span::Wfh(w) => w.start_date,
        }
    }

    /// Quantity charged against the ledger: minutes, or business days (0.5 for a half day).
    pub fn amount(&self) -> Result<Decimal, ValidationReason> {
        match self {
            Span::Permission(p) => Ok(p.minutes()),
            Span::Wfh(w) => calendar::wfh_days(w.start_date, w.end_date, w.session),
        }
    }
}

/// Identifies one ledger row; also the unit of serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LedgerKey {
    pub employee_id: EmployeeId,
    pub month: MonthKey,
    pub quota_type: QuotaType,
}

impl LedgerKey {
    pub fn new(employee_id: impl Into<EmployeeId>, month: MonthKey, quota_type: QuotaType) -> Self {
        Self {
            employee_id: employee_id.into(),
            month,
            quota_type,
        }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Emp={}, Month={}, Type={}",
            self.employee_id, self.month, self.quota_type
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub employee_id: EmployeeId,
    pub month: MonthKey,
    pub quota_type: QuotaType,
    pub status: RequestStatus,
    /// Amount counted in the ledger at the last committed size.
    pub amount: Decimal,
    pub span: Span,
    pub is_overdue_snapshot: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub decided_by: Option<EmployeeId>,
}

impl Request {
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.employee_id.clone(), self.month, self.quota_type)
    }
}

/// "HH:MM" on the wire; "HH:MM:SS" is also accepted on input when the seconds are zero.
mod clock_time {
    use chrono::{NaiveTime, Timelike};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&time.format("%H:%M"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        let time = NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time '{}': {}", raw, e)))?;
        // Ledgers count whole minutes
        if time.second() != 0 {
            return Err(serde::de::Error::custom(format!(
                "invalid time '{}': seconds must be 00",
                raw
            )));
        }
        Ok(time)
    }
}
