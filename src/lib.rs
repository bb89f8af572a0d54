// src/lib.rs

pub mod api;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod locks;
pub mod model;
pub mod reconciler;
pub mod store;
pub mod validator;

mod api_tests;

pub use calendar::{count_business_days, is_half_day, MonthKey};
pub use error::{QuotaError, ValidationReason};
pub use events::{EventKind, EventPublisher, QuotaEvent};
pub use ledger::{recompute_overdue_flag, LedgerStats, QuotaLedger};
pub use model::{
    LedgerKey, PermissionSpan, QuotaType, Request, RequestId, RequestStatus, Session, Span,
    WfhSpan,
};
pub use reconciler::{BatchOutcome, QuotaEngine};
pub use store::{InMemoryStore, QuotaStore};
