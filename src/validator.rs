// src/validator.rs
//
// Stateless request checks. Nothing here reads the ledger or the store; the
// duplicate guard runs later inside the reconciler's key lock.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;

use crate::calendar::{is_weekend, MonthKey};
use crate::error::{QuotaError, ValidationReason};
use crate::model::{PermissionSpan, QuotaType, Request, Session, Span, WfhSpan};

pub const MIN_PERMISSION_MINUTES: i64 = 10;
pub const PERMISSION_EDIT_GRACE_MINUTES: i64 = 10;

pub fn work_day_start() -> NaiveTime {
    NaiveTime::MIN + Duration::hours(9)
}

pub fn work_day_end() -> NaiveTime {
    NaiveTime::MIN + Duration::hours(18)
}

/// Last moment a WFH request can be changed on its start date.
pub fn wfh_edit_cutoff() -> NaiveTime {
    NaiveTime::MIN + Duration::hours(19) + Duration::minutes(15)
}

/// Runs every stateless check for a proposed span, short-circuiting on the first failure.
pub fn validate_span(
    span: &Span,
    month: MonthKey,
    quota_type: QuotaType,
    now: NaiveDateTime,
) -> Result<(), ValidationReason> {
    if span.quota_type() != quota_type {
        return Err(ValidationReason::SpanTypeMismatch {
            span_type: span.quota_type(),
            quota_type,
        });
    }
    match span {
        Span::Permission(p) => validate_permission(p, month, now),
        Span::Wfh(w) => validate_wfh(w, month, now),
    }
}

fn check_calendar_position(date: NaiveDate, now: NaiveDateTime) -> Result<(), ValidationReason> {
    let today = now.date();
    if date < today {
        return Err(ValidationReason::DateInPast { date, today });
    }
    if date.year() != today.year() {
        return Err(ValidationReason::YearMismatch {
            date,
            current_year: today.year(),
        });
    }
    Ok(())
}

fn check_in_month(date: NaiveDate, month: MonthKey) -> Result<(), ValidationReason> {
    if month.contains(date) {
        Ok(())
    } else {
        Err(ValidationReason::MonthMismatch { date, month })
    }
}

fn check_weekday(date: NaiveDate) -> Result<(), ValidationReason> {
    if is_weekend(date) {
        Err(ValidationReason::WeekendDate { date })
    } else {
        Ok(())
    }
}

pub fn validate_permission(
    span: &PermissionSpan,
    month: MonthKey,
    now: NaiveDateTime,
) -> Result<(), ValidationReason> {
    debug!(
        "Validating permission: Date={}, {}-{}, Month={}",
        span.date, span.start_time, span.end_time, month
    );
    check_calendar_position(span.date, now)?;
    check_in_month(span.date, month)?;
    check_weekday(span.date)?;

    if span.start_time >= span.end_time {
        return Err(ValidationReason::StartNotBeforeEnd {
            start_time: span.start_time,
            end_time: span.end_time,
        });
    }
    let minutes = (span.end_time - span.start_time).num_minutes();
    if minutes < MIN_PERMISSION_MINUTES {
        return Err(ValidationReason::DurationTooShort {
            minutes,
            minimum: MIN_PERMISSION_MINUTES,
        });
    }
    let (window_start, window_end) = (work_day_start(), work_day_end());
    if span.start_time < window_start || span.end_time > window_end {
        return Err(ValidationReason::OutsideWorkingHours {
            start_time: span.start_time,
            end_time: span.end_time,
            window_start,
            window_end,
        });
    }
    Ok(())
}

pub fn validate_wfh(
    span: &WfhSpan,
    month: MonthKey,
    now: NaiveDateTime,
) -> Result<(), ValidationReason> {
    debug!(
        "Validating WFH: {}..{} ({:?}), Month={}",
        span.start_date, span.end_date, span.session, month
    );
    check_calendar_position(span.start_date, now)?;
    check_in_month(span.start_date, month)?;
    check_in_month(span.end_date, month)?;
    check_weekday(span.start_date)?;
    check_weekday(span.end_date)?;

    if span.session == Session::HalfDay && span.start_date != span.end_date {
        return Err(ValidationReason::HalfDaySpanMismatch {
            start_date: span.start_date,
            end_date: span.end_date,
        });
    }
    if span.end_date < span.start_date {
        return Err(ValidationReason::EndBeforeStart {
            start_date: span.start_date,
            end_date: span.end_date,
        });
    }
    Ok(())
}

/// Time gate for editing a request. Status changes are never gated.
///
/// A permission dated today (stored or proposed) may only change within ten
/// minutes of creation. A WFH request may change until 19:15 on its stored
/// start date.
pub fn check_change_window(
    request: &Request,
    proposed: &Span,
    now: NaiveDateTime,
) -> Result<(), QuotaError> {
    let today = now.date();
    match request.span {
        Span::Permission(stored) => {
            let touches_today = stored.date == today
                || matches!(proposed, Span::Permission(p) if p.date == today);
            if !touches_today {
                return Ok(());
            }
            let deadline = request.created_at + Duration::minutes(PERMISSION_EDIT_GRACE_MINUTES);
            if now > deadline {
                return Err(QuotaError::EditWindowExpired { deadline });
            }
            Ok(())
        }
        Span::Wfh(stored) => {
            let deadline = stored.start_date.and_time(wfh_edit_cutoff());
            if now >= deadline {
                return Err(QuotaError::EditWindowExpired { deadline });
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RequestId, RequestStatus};
    use rust_decimal_macros::dec;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d").expect("Invalid date format in test")
    }

    fn dt(datetime_str: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(datetime_str, "%Y-%m-%d %H:%M:%S")
            .expect("Invalid datetime format in test")
    }

    fn t(time_str: &str) -> NaiveTime {
        NaiveTime::parse_from_str(time_str, "%H:%M").expect("Invalid time format in test")
    }

    fn month(s: &str) -> MonthKey {
        s.parse().expect("Invalid month in test")
    }

    fn permission(date: &str, start: &str, end: &str) -> PermissionSpan {
        PermissionSpan {
            date: d(date),
            start_time: t(start),
            end_time: t(end),
        }
    }

    fn wfh(start: &str, end: &str, session: Session) -> WfhSpan {
        WfhSpan {
            start_date: d(start),
            end_date: d(end),
            session,
        }
    }

    // Monday 2026-03-02, before office hours
    const NOW: &str = "2026-03-02 08:00:00";

    #[test]
    fn accepts_well_formed_permission() {
        let span = permission("2026-03-09", "09:00", "09:30");
        assert_eq!(validate_permission(&span, month("March-2026"), dt(NOW)), Ok(()));
        // Boundaries of the working window are inclusive
        let span = permission("2026-03-09", "17:50", "18:00");
        assert_eq!(validate_permission(&span, month("March-2026"), dt(NOW)), Ok(()));
    }

    #[test]
    fn rejects_permission_in_the_past() {
        let span = permission("2026-02-27", "09:00", "09:30");
        assert!(matches!(
            validate_permission(&span, month("February-2026"), dt(NOW)),
            Err(ValidationReason::DateInPast { .. })
        ));
    }

    #[test]
    fn rejects_permission_for_next_year() {
        let span = permission("2027-01-04", "09:00", "09:30");
        assert!(matches!(
            validate_permission(&span, month("January-2027"), dt(NOW)),
            Err(ValidationReason::YearMismatch { current_year: 2026, .. })
        ));
    }

    #[test]
    fn rejects_permission_outside_declared_month() {
        let span = permission("2026-04-06", "09:00", "09:30");
        assert!(matches!(
            validate_permission(&span, month("March-2026"), dt(NOW)),
            Err(ValidationReason::MonthMismatch { .. })
        ));
    }

    #[test]
    fn rejects_weekend_permission() {
        let span = permission("2026-03-07", "09:00", "09:30");
        assert!(matches!(
            validate_permission(&span, month("March-2026"), dt(NOW)),
            Err(ValidationReason::WeekendDate { .. })
        ));
    }

    #[test]
    fn rejects_inverted_short_and_out_of_hours_permissions() {
        let m = month("March-2026");
        assert!(matches!(
            validate_permission(&permission("2026-03-09", "10:00", "10:00"), m, dt(NOW)),
            Err(ValidationReason::StartNotBeforeEnd { .. })
        ));
        assert!(matches!(
            validate_permission(&permission("2026-03-09", "10:00", "10:09"), m, dt(NOW)),
            Err(ValidationReason::DurationTooShort { minutes: 9, minimum: 10 })
        ));
        assert_eq!(
            validate_permission(&permission("2026-03-09", "10:00", "10:10"), m, dt(NOW)),
            Ok(())
        );
        assert!(matches!(
            validate_permission(&permission("2026-03-09", "08:45", "09:30"), m, dt(NOW)),
            Err(ValidationReason::OutsideWorkingHours { .. })
        ));
        assert!(matches!(
            validate_permission(&permission("2026-03-09", "17:30", "18:30"), m, dt(NOW)),
            Err(ValidationReason::OutsideWorkingHours { .. })
        ));
    }

    #[test]
    fn first_failing_check_wins() {
        // Past, weekend and inverted all at once: the past-date check comes first
        let span = permission("2026-02-28", "11:00", "10:00");
        assert!(matches!(
            validate_permission(&span, month("March-2026"), dt(NOW)),
            Err(ValidationReason::DateInPast { .. })
        ));
    }

    #[test]
    fn wfh_checks_both_ends_for_month_and_weekend() {
        let m = month("March-2026");
        assert_eq!(
            validate_wfh(&wfh("2026-03-09", "2026-03-11", Session::FullDay), m, dt(NOW)),
            Ok(())
        );
        assert!(matches!(
            validate_wfh(&wfh("2026-03-30", "2026-04-01", Session::FullDay), m, dt(NOW)),
            Err(ValidationReason::MonthMismatch { .. })
        ));
        assert!(matches!(
            validate_wfh(&wfh("2026-03-09", "2026-03-14", Session::FullDay), m, dt(NOW)),
            Err(ValidationReason::WeekendDate { .. })
        ));
        assert!(matches!(
            validate_wfh(&wfh("2026-03-08", "2026-03-10", Session::FullDay), m, dt(NOW)),
            Err(ValidationReason::WeekendDate { .. })
        ));
    }

    #[test]
    fn wfh_half_day_and_inverted_ranges_are_rejected() {
        let m = month("March-2026");
        assert!(matches!(
            validate_wfh(&wfh("2026-03-09", "2026-03-10", Session::HalfDay), m, dt(NOW)),
            Err(ValidationReason::HalfDaySpanMismatch { .. })
        ));
        assert!(matches!(
            validate_wfh(&wfh("2026-03-11", "2026-03-10", Session::FullDay), m, dt(NOW)),
            Err(ValidationReason::EndBeforeStart { .. })
        ));
        assert_eq!(
            validate_wfh(&wfh("2026-03-11", "2026-03-11", Session::HalfDay), m, dt(NOW)),
            Ok(())
        );
    }

    #[test]
    fn span_must_match_declared_quota_type() {
        let span = Span::Permission(permission("2026-03-09", "09:00", "09:30"));
        assert!(matches!(
            validate_span(&span, month("March-2026"), QuotaType::WfhDays, dt(NOW)),
            Err(ValidationReason::SpanTypeMismatch { .. })
        ));
    }

    fn stored(span: Span, created_at: &str) -> Request {
        Request {
            id: RequestId(1),
            employee_id: "E1".into(),
            month: MonthKey::from_date(span.start_date()),
            quota_type: span.quota_type(),
            status: RequestStatus::Pending,
            amount: dec!(30),
            span,
            is_overdue_snapshot: false,
            created_at: dt(created_at),
            updated_at: dt(created_at),
            decided_by: None,
        }
    }

    #[test]
    fn same_day_permission_edit_closes_ten_minutes_after_creation() {
        let req = stored(
            Span::Permission(permission("2026-03-02", "15:00", "15:30")),
            "2026-03-02 10:00:00",
        );
        let longer = Span::Permission(permission("2026-03-02", "15:00", "16:00"));
        assert!(check_change_window(&req, &longer, dt("2026-03-02 10:10:00")).is_ok());
        assert!(matches!(
            check_change_window(&req, &longer, dt("2026-03-02 10:10:01")),
            Err(QuotaError::EditWindowExpired { .. })
        ));
    }

    #[test]
    fn future_permission_edit_is_not_time_gated_unless_moved_to_today() {
        let req = stored(
            Span::Permission(permission("2026-03-09", "15:00", "15:30")),
            "2026-03-02 10:00:00",
        );
        let later = dt("2026-03-02 16:00:00");
        let same_day = Span::Permission(permission("2026-03-09", "16:00", "16:30"));
        assert!(check_change_window(&req, &same_day, later).is_ok());
        let to_today = Span::Permission(permission("2026-03-02", "16:30", "17:00"));
        assert!(matches!(
            check_change_window(&req, &to_today, later),
            Err(QuotaError::EditWindowExpired { .. })
        ));
    }

    #[test]
    fn wfh_edit_closes_at_quarter_past_seven_on_start_date() {
        let req = stored(
            Span::Wfh(wfh("2026-03-09", "2026-03-10", Session::FullDay)),
            "2026-03-02 10:00:00",
        );
        let shorter = Span::Wfh(wfh("2026-03-09", "2026-03-09", Session::FullDay));
        assert!(check_change_window(&req, &shorter, dt("2026-03-09 19:14:59")).is_ok());
        assert!(matches!(
            check_change_window(&req, &shorter, dt("2026-03-09 19:15:00")),
            Err(QuotaError::EditWindowExpired { .. })
        ));
        assert!(check_change_window(&req, &shorter, dt("2026-03-10 09:00:00")).is_err());
    }
}
