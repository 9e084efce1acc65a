use crate::limits::CONSECUTIVE_WINDOW_DAYS;
use crate::model::{Category, Day};

use super::store::LeaveLedger;
use super::Rejection;

/// Longest run of calendar-consecutive days in `days` plus `candidate`.
/// Duplicate dates count once. Runs that do not touch `candidate` still count,
/// so callers bound `days` to a window around it.
pub fn longest_run(days: &[Day], candidate: Day) -> i64 {
    let mut all: Vec<Day> = days.to_vec();
    all.push(candidate);
    all.sort();
    all.dedup();

    let mut longest = 1;
    let mut current = 1;
    for pair in all.windows(2) {
        current = if pair[0].days_until(pair[1]) == 1 { current + 1 } else { 1 };
        longest = longest.max(current);
    }
    longest
}

pub fn check_run(days: &[Day], candidate: Day, cap: i64) -> Result<(), Rejection> {
    let run = longest_run(days, candidate);
    if run > cap {
        return Err(Rejection::ConsecutiveCap { run, cap });
    }
    Ok(())
}

/// Windowed evaluation against one person's live requests.
pub fn evaluate_window(
    ledger: &LeaveLedger,
    person: &str,
    category: Category,
    center: Day,
    cap: i64,
) -> Result<(), Rejection> {
    let nearby = ledger.person_days_near(person, category, center, CONSECUTIVE_WINDOW_DAYS);
    check_run(&nearby, center, cap)
}
