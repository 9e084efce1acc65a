use std::collections::BTreeMap;

use crate::model::*;

use super::EngineError;

/// Immutable, typed view of the rule rows taken at the start of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSet {
    pub quota: i64,
    pub concurrent: i64,
    pub notice_min: i64,
    pub notice_max: i64,
    pub consecutive: i64,
    pub obfuscate: bool,
    pub blocked: Vec<BlockedRange>,
}

impl ConstraintSet {
    /// Build the snapshot for `category`, failing with every missing required key.
    pub fn load(
        category: Category,
        rows: &BTreeMap<ConstraintKey, i64>,
        blocked: &[BlockedRange],
    ) -> Result<Self, EngineError> {
        let missing: Vec<ConstraintKey> = ConstraintKey::ALL
            .into_iter()
            .filter(|k| k.is_required() && !rows.contains_key(k))
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::NotConfigured { category, missing });
        }

        let get = |key| rows.get(&key).copied().unwrap_or_default();
        let set = Self {
            quota: get(ConstraintKey::Quota),
            concurrent: get(ConstraintKey::Concurrent),
            notice_min: get(ConstraintKey::NoticeMin),
            notice_max: get(ConstraintKey::NoticeMax),
            consecutive: get(ConstraintKey::Consecutive),
            obfuscate: get(ConstraintKey::Obfuscate) != 0,
            blocked: blocked.to_vec(),
        };
        if set.notice_min > set.notice_max {
            return Err(EngineError::Misconfigured(format!(
                "notice_min ({}) is greater than notice_max ({})",
                set.notice_min, set.notice_max
            )));
        }
        Ok(set)
    }

    pub fn blocked_range_for(&self, day: Day) -> Option<&BlockedRange> {
        self.blocked.iter().find(|b| b.contains(day))
    }
}

/// Range a rule value may take when written.
pub fn validate_value(key: ConstraintKey, value: i64) -> Result<(), EngineError> {
    match key {
        ConstraintKey::Obfuscate if !(0..=1).contains(&value) => Err(EngineError::Validation(
            "obfuscate must be 0 or 1".into(),
        )),
        _ if value < 0 => Err(EngineError::Validation(format!("{key} must not be negative"))),
        _ => Ok(()),
    }
}
