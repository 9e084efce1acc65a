use thiserror::Error;
use ulid::Ulid;

use crate::model::{Category, ConstraintKey, Day, PeriodId};

/// Business reasons a well-formed leave request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("date {date} falls in a blocked range: {reason}")]
    BlockedDate { date: Day, reason: String },
    #[error("quota exhausted: {used} of {limit} days already accepted")]
    QuotaExceeded { used: u32, limit: u32 },
    #[error("requested {days} days ahead, at least {min} required")]
    NoticeTooShort { days: i64, min: i64 },
    #[error("requested {days} days ahead, at most {max} allowed")]
    NoticeTooLong { days: i64, max: i64 },
    #[error("{date} already has {cap} requests")]
    ConcurrencyCap { date: Day, cap: i64 },
    #[error("{run} consecutive days exceeds the limit of {cap}")]
    ConsecutiveCap { run: i64, cap: i64 },
}

impl Rejection {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::BlockedDate { .. } => "blocked_date",
            Rejection::QuotaExceeded { .. } => "quota_exceeded",
            Rejection::NoticeTooShort { .. } => "notice_too_short",
            Rejection::NoticeTooLong { .. } => "notice_too_long",
            Rejection::ConcurrencyCap { .. } => "concurrency_cap",
            Rejection::ConsecutiveCap { .. } => "consecutive_cap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    LeaveRequest(Ulid),
    Booking(Ulid),
    Template(Ulid),
    Room(Ulid),
    Period(PeriodId),
    Employee,
    BlockedRange(Ulid),
    Override(Ulid),
    Constraint(ConstraintKey),
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::LeaveRequest(id) => write!(f, "leave request {id}"),
            Entity::Booking(id) => write!(f, "booking {id}"),
            Entity::Template(id) => write!(f, "recurrence template {id}"),
            Entity::Room(id) => write!(f, "room {id}"),
            Entity::Period(id) => write!(f, "period {id}"),
            Entity::Employee => write!(f, "employee"),
            Entity::BlockedRange(id) => write!(f, "blocked range {id}"),
            Entity::Override(id) => write!(f, "override {id}"),
            Entity::Constraint(key) => write!(f, "constraint {key}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{0}")]
    Rejected(Rejection),
    #[error("conflict with booking: {0}")]
    Conflict(Ulid),
    #[error("not found: {0}")]
    NotFound(Entity),
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("category {category} not configured: missing {}", format_keys(.missing))]
    NotConfigured {
        category: Category,
        missing: Vec<ConstraintKey>,
    },
    #[error("rules misconfigured: {0}")]
    Misconfigured(String),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

fn format_keys(keys: &[ConstraintKey]) -> String {
    keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
}

impl From<Rejection> for EngineError {
    fn from(r: Rejection) -> Self {
        EngineError::Rejected(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_configured_lists_keys() {
        let err = EngineError::NotConfigured {
            category: Category::PERSONAL_DAYS,
            missing: vec![ConstraintKey::Quota, ConstraintKey::NoticeMax],
        };
        assert_eq!(err.to_string(), "category 13 not configured: missing quota, notice_max");
    }

    #[test]
    fn rejection_codes_are_distinct() {
        let all = [
            Rejection::BlockedDate { date: Day::from_ymd(2025, 1, 1).unwrap(), reason: String::new() },
            Rejection::QuotaExceeded { used: 1, limit: 1 },
            Rejection::NoticeTooShort { days: 0, min: 1 },
            Rejection::NoticeTooLong { days: 9, max: 1 },
            Rejection::ConcurrencyCap { date: Day::from_ymd(2025, 1, 1).unwrap(), cap: 1 },
            Rejection::ConsecutiveCap { run: 3, cap: 2 },
        ];
        let mut codes: Vec<_> = all.iter().map(Rejection::code).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }
}
