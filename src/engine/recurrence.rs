use crate::limits::MAX_RECURRENCE_DATES;
use crate::model::{Day, Frequency};

use super::EngineError;

/// Every date in `[from, to]` selected by `frequency`, ascending.
pub fn expand(from: Day, to: Day, frequency: Frequency) -> Result<Vec<Day>, EngineError> {
    if from > to {
        return Err(EngineError::Validation(format!("range starts {from} after it ends {to}")));
    }

    if let Frequency::Weekly(days) = frequency {
        if days.is_empty() {
            return Err(EngineError::Validation("no dates generated".into()));
        }
    }

    let mut dates = Vec::new();
    let mut day = from;
    loop {
        let selected = match frequency {
            Frequency::Daily => true,
            Frequency::Weekly(days) => days.contains(day.weekday_index()),
        };
        if selected {
            if dates.len() == MAX_RECURRENCE_DATES {
                return Err(EngineError::LimitExceeded("recurrence generates too many dates"));
            }
            dates.push(day);
        }
        if day == to {
            break;
        }
        day = day
            .succ()
            .ok_or_else(|| EngineError::Validation(format!("date after {day} is out of range")))?;
    }

    if dates.is_empty() {
        return Err(EngineError::Validation("no dates generated".into()));
    }
    Ok(dates)
}
