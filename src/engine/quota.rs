use crate::model::*;

use super::{EngineError, Rejection};

/// Personal override when positive, otherwise the institutional quota.
pub fn effective_limit(employee: &Employee, institutional: Option<i64>) -> Result<u32, EngineError> {
    if employee.quota_override > 0 {
        return Ok(employee.quota_override);
    }
    match institutional {
        Some(q) if q > 0 => Ok(u32::try_from(q).unwrap_or(u32::MAX)),
        _ => Err(EngineError::NotConfigured {
            category: Category::PERSONAL_DAYS,
            missing: vec![ConstraintKey::Quota],
        }),
    }
}

pub fn check_quota(used: u32, limit: u32) -> Result<(), Rejection> {
    if used >= limit {
        return Err(Rejection::QuotaExceeded { used, limit });
    }
    Ok(())
}
