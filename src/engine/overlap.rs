use ulid::Ulid;

use crate::model::*;

use super::store::RoomState;
use super::EngineError;

/// First booking in `existing` whose closed period range intersects `periods`.
pub fn find_conflict<'a>(
    existing: impl IntoIterator<Item = &'a RoomBooking>,
    periods: &PeriodRange,
) -> Option<&'a RoomBooking> {
    existing.into_iter().find(|b| b.periods.overlaps(periods))
}

pub fn conflicts(rs: &RoomState, date: Day, periods: &PeriodRange) -> bool {
    find_conflict(rs.on_day(date), periods).is_some()
}

/// Must be called under the room's write lock, immediately before the insert.
pub(crate) fn check_no_conflict(rs: &RoomState, date: Day, periods: &PeriodRange) -> Result<(), EngineError> {
    report(find_conflict(rs.on_day(date), periods))
}

/// Same check for an edit: the booking being changed never blocks itself.
pub(crate) fn check_no_conflict_excluding(
    rs: &RoomState,
    date: Day,
    periods: &PeriodRange,
    exclude: Ulid,
) -> Result<(), EngineError> {
    report(find_conflict(rs.on_day(date).iter().filter(|b| b.id != exclude), periods))
}

fn report(conflict: Option<&RoomBooking>) -> Result<(), EngineError> {
    if let Some(existing) = conflict {
        metrics::counter!(crate::observability::ROOM_CONFLICTS_TOTAL).increment(1);
        return Err(EngineError::Conflict(existing.id));
    }
    Ok(())
}
