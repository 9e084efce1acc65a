use crate::model::{Actor, Decision, Status};

use super::EngineError;

/// Next status for a review. Only pending requests may be reviewed.
pub fn transition(current: Status, decision: Decision) -> Result<Status, EngineError> {
    if current.is_terminal() {
        return Err(EngineError::Forbidden("request has already been reviewed"));
    }
    Ok(match decision {
        Decision::Accept => Status::Accepted,
        Decision::Reject => Status::Rejected,
    })
}

pub fn ensure_deletable(status: Status) -> Result<(), EngineError> {
    match status {
        Status::Pending => Ok(()),
        Status::Accepted => Err(EngineError::Forbidden("accepted requests cannot be deleted")),
        Status::Rejected => Err(EngineError::Forbidden("rejected requests cannot be deleted")),
    }
}

pub fn ensure_reviewer(actor: &Actor) -> Result<(), EngineError> {
    if !actor.role.is_privileged() {
        return Err(EngineError::Forbidden("only management may review requests"));
    }
    Ok(())
}
