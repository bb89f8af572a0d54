// src/error.rs

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

use crate::calendar::MonthKey;
use crate::model::{QuotaType, RequestId, RequestStatus};

pub mod reason_code {
    pub const DATE_IN_PAST: &str = "DATE_IN_PAST";
    pub const YEAR_MISMATCH: &str = "YEAR_MISMATCH";
    pub const MONTH_MISMATCH: &str = "MONTH_MISMATCH";
    pub const MALFORMED_MONTH: &str = "MALFORMED_MONTH";
    pub const WEEKEND_DATE: &str = "WEEKEND_DATE";
    pub const START_NOT_BEFORE_END: &str = "START_NOT_BEFORE_END";
    pub const DURATION_TOO_SHORT: &str = "DURATION_TOO_SHORT";
    pub const OUTSIDE_WORKING_HOURS: &str = "OUTSIDE_WORKING_HOURS";
    pub const HALF_DAY_SPAN_MISMATCH: &str = "HALF_DAY_SPAN_MISMATCH";
    pub const END_BEFORE_START: &str = "END_BEFORE_START";
    pub const SPAN_TYPE_MISMATCH: &str = "SPAN_TYPE_MISMATCH";
    pub const UNCHANGED_EDIT: &str = "UNCHANGED_EDIT";
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationReason {
    #[error("Date {date} is before today ({today})")]
    DateInPast { date: NaiveDate, today: NaiveDate },
    #[error("Date {date} is not in the current year {current_year}")]
    YearMismatch { date: NaiveDate, current_year: i32 },
    #[error("Date {date} does not belong to the requested month {month}")]
    MonthMismatch { date: NaiveDate, month: MonthKey },
    #[error("Month '{value}' is not in MMMM-YYYY form")]
    MalformedMonth { value: String },
    #[error("Date {date} falls on a weekend")]
    WeekendDate { date: NaiveDate },
    #[error("Start time {start_time} must be before end time {end_time}")]
    StartNotBeforeEnd {
        start_time: NaiveTime,
        end_time: NaiveTime,
    },
    #[error("Permission of {minutes} minutes is shorter than the {minimum} minute minimum")]
    DurationTooShort { minutes: i64, minimum: i64 },
    #[error("Permission {start_time}-{end_time} is outside working hours {window_start}-{window_end}")]
    OutsideWorkingHours {
        start_time: NaiveTime,
        end_time: NaiveTime,
        window_start: NaiveTime,
        window_end: NaiveTime,
    },
    #[error("Half-day WFH must start and end on the same date ({start_date} vs {end_date})")]
    HalfDaySpanMismatch {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    #[error("End date {end_date} is before start date {start_date}")]
    EndBeforeStart {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    #[error("Span of type {span_type} cannot be booked against {quota_type}")]
    SpanTypeMismatch {
        span_type: QuotaType,
        quota_type: QuotaType,
    },
    #[error("Edit not allowed: the new span is the same as the existing request")]
    UnchangedEdit,
}

impl ValidationReason {
    pub fn code(&self) -> &'static str {
        use reason_code::*;
        match self {
            ValidationReason::DateInPast { .. } => DATE_IN_PAST,
            ValidationReason::YearMismatch { .. } => YEAR_MISMATCH,
            ValidationReason::MonthMismatch { .. } => MONTH_MISMATCH,
            ValidationReason::MalformedMonth { .. } => MALFORMED_MONTH,
            ValidationReason::WeekendDate { .. } => WEEKEND_DATE,
            ValidationReason::StartNotBeforeEnd { .. } => START_NOT_BEFORE_END,
            ValidationReason::DurationTooShort { .. } => DURATION_TOO_SHORT,
            ValidationReason::OutsideWorkingHours { .. } => OUTSIDE_WORKING_HOURS,
            ValidationReason::HalfDaySpanMismatch { .. } => HALF_DAY_SPAN_MISMATCH,
            ValidationReason::EndBeforeStart { .. } => END_BEFORE_START,
            ValidationReason::SpanTypeMismatch { .. } => SPAN_TYPE_MISMATCH,
            ValidationReason::UnchangedEdit => UNCHANGED_EDIT,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("Invalid request: {reason}")]
    Validation { reason: ValidationReason },
    #[error("Request overlaps existing request {existing}")]
    DuplicateRequest { existing: RequestId },
    #[error("Request is {status}; only PENDING requests can be edited")]
    NotPending { status: RequestStatus },
    #[error("Edit window closed at {deadline}")]
    EditWindowExpired { deadline: NaiveDateTime },
    #[error("Request is already {status}")]
    InactiveRequest { status: RequestStatus },
    #[error("Illegal status transition {from} -> {to}")]
    IllegalTransition {
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("Ledger consistency violated: {detail}")]
    LedgerConsistency { detail: String },
    #[error("Request {0} not found")]
    NotFound(RequestId),
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl From<ValidationReason> for QuotaError {
    fn from(reason: ValidationReason) -> Self {
        QuotaError::Validation { reason }
    }
}

impl QuotaError {
    pub fn code(&self) -> &'static str {
        match self {
            QuotaError::Validation { reason } => reason.code(),
            QuotaError::DuplicateRequest { .. } => "DUPLICATE_REQUEST",
            QuotaError::NotPending { .. } => "NOT_PENDING",
            QuotaError::EditWindowExpired { .. } => "EDIT_WINDOW_EXPIRED",
            QuotaError::InactiveRequest { .. } => "INACTIVE_REQUEST",
            QuotaError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            QuotaError::LedgerConsistency { .. } => "LEDGER_CONSISTENCY",
            QuotaError::NotFound(_) => "NOT_FOUND",
            QuotaError::Storage(_) => "STORAGE",
        }
    }

    pub(crate) fn consistency(detail: impl Into<String>) -> Self {
        QuotaError::LedgerConsistency {
            detail: detail.into(),
        }
    }
}

