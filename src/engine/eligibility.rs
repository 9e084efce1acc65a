use crate::model::*;

use super::constraints::ConstraintSet;
use super::store::LeaveLedger;
use super::{consecutive, quota, Rejection};

/// What is being asked for. Identity and preconditions are checked by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Proposal<'a> {
    pub person: &'a str,
    pub date: Day,
    pub category: Category,
}

/// Decide whether `proposal` may be filed. Short-circuits on the first failing rule.
///
/// A blocked range and the quota always apply. An override for the exact
/// (person, date) pair skips notice, concurrency and consecutive-run checks.
/// Categories without a quota are never checked.
pub fn evaluate(
    ledger: &LeaveLedger,
    rules: &ConstraintSet,
    limit: u32,
    proposal: &Proposal<'_>,
    today: Day,
) -> Result<(), Rejection> {
    if !proposal.category.consumes_quota() {
        return Ok(());
    }

    if let Some(blocked) = rules.blocked_range_for(proposal.date) {
        return Err(Rejection::BlockedDate {
            date: proposal.date,
            reason: blocked.reason.clone(),
        });
    }

    quota::check_quota(ledger.accepted_count(proposal.person, proposal.category), limit)?;

    if ledger.override_for(proposal.person, proposal.date).is_some() {
        return Ok(());
    }

    check_notice(today.days_until(proposal.date), rules)?;

    if ledger.count_on_day(proposal.date, proposal.category) as i64 >= rules.concurrent {
        return Err(Rejection::ConcurrencyCap {
            date: proposal.date,
            cap: rules.concurrent,
        });
    }

    consecutive::evaluate_window(
        ledger,
        proposal.person,
        proposal.category,
        proposal.date,
        rules.consecutive,
    )
}

fn check_notice(days: i64, rules: &ConstraintSet) -> Result<(), Rejection> {
    if days < rules.notice_min {
        return Err(Rejection::NoticeTooShort { days, min: rules.notice_min });
    }
    if days > rules.notice_max {
        return Err(Rejection::NoticeTooLong { days, max: rules.notice_max });
    }
    Ok(())
}
